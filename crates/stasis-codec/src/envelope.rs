// SPDX-License-Identifier: Apache-2.0
//! On-the-wire framing.
//!
//! The in-memory [`crate::value::Value`] graph is free to share `Rc`s and
//! form cycles. `ciborium` — this crate's native serializer — round-trips
//! `Rc<T>` by copying the inner value, so it cannot carry that sharing
//! across the wire on its own (see `SPEC_FULL.md` §4.2's escape hatch for a
//! host serializer that doesn't natively preserve identity). Any array,
//! object, or placeholder that is shared, cyclic, or (for placeholders)
//! simply exists is lifted into [`WireEnvelope::shortcuts`] and referenced
//! everywhere else by index (`WireValue::Ref`); everything else is inlined
//! as a plain tree.

use serde::{Deserialize, Serialize};

/// Key of an ordered keyed collection on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum WireKey {
    Int(i64),
    Str(String),
}

/// Flattened form of [`crate::value::Value`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum WireValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// A pass-through opaque value the native codec could render directly
    /// (encoder step 4.4.7 — no placeholder was needed).
    Native(ciborium::value::Value),
    /// Inlined, non-shared, acyclic array.
    Array(Vec<(WireKey, WireValue)>),
    /// Inlined, non-shared, acyclic object.
    Object {
        class: String,
        fields: Vec<(String, WireValue)>,
    },
    /// Index into the enclosing [`WireEnvelope::shortcuts`].
    Ref(usize),
}

/// Flattened form of [`crate::placeholder::Placeholder`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WirePlaceholder {
    pub class_tag: String,
    pub payload: WireValue,
}

/// One entry in [`WireEnvelope::shortcuts`]: a shared or cyclic array, a
/// shared or cyclic object, or a placeholder (always lifted here
/// regardless of sharing, so the decoder resolves every placeholder even
/// if it is reachable only through a cycle entered via `value`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum WireSlot {
    Array(Vec<(WireKey, WireValue)>),
    Object {
        class: String,
        fields: Vec<(String, WireValue)>,
    },
    Placeholder(WirePlaceholder),
}

/// Record pairing the encoded root value with every shared node and
/// placeholder reachable from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WireEnvelope {
    pub value: WireValue,
    pub shortcuts: Vec<WireSlot>,
}
