// SPDX-License-Identifier: Apache-2.0
//! Value graph codec with placeholder-based escape hatches for values the
//! native serializer can't represent on its own.
//!
//! [`Codec`] walks an in-memory [`Value`] graph and produces bytes that
//! round-trip through [`Codec::unserialize`], preserving shared-reference
//! identity and cycles. Values the native encoding (`ciborium`, CBOR) can
//! render directly take a cheap fast path; anything else — closures,
//! resource handles, anonymous instances — is handed to a registered
//! [`Transformer`], which produces a natively-serializable [`Placeholder`]
//! standing in for it.
//!
//! ```
//! use stasis_codec::{Codec, Value};
//!
//! let codec = Codec::new("", Vec::new());
//! let array = Value::new_array();
//! let bytes = codec.serialize(&array).unwrap();
//! let back = codec.unserialize(&bytes).unwrap();
//! assert_eq!(array.ref_id().is_some(), back.ref_id().is_some());
//! ```
//!
//! Configuring a non-empty secret authenticates the payload with
//! HMAC-SHA-256; a tampered or mis-keyed payload is rejected with
//! [`CodecError::SignatureMismatch`] before any decoding is attempted.

mod auth;
mod decoder;
mod encoder;
mod envelope;
mod error;
mod native;
mod placeholder;
mod transformer;
mod value;

pub use error::{CodecError, TransformerError};
pub use native::PassThrough;
pub use placeholder::Placeholder;
pub use transformer::{Registry, Transformer};
pub use value::{
    ArrayBody, ArrayHandle, Key, NativeBody, NativeHandle, NativeOpaque, ObjectBody, ObjectHandle, PlaceholderHandle,
    RefId, Value,
};

use envelope::WireEnvelope;
use tracing::{instrument, warn};

/// Entry point: encodes and decodes [`Value`] graphs, optionally
/// authenticating the wire payload with a shared secret.
///
/// A `Codec` keeps no state between calls — every `serialize`/`unserialize`
/// call builds its own bookkeeping tables and discards them on return,
/// including on error — so concurrent calls against one `&Codec` only need
/// ordinary `Sync`-free sharing discipline, and distinct `Codec` values may
/// be used from independent threads freely.
pub struct Codec {
    secret: String,
    registry: Registry,
}

impl Codec {
    /// Builds a codec. An empty `secret` disables authentication: payloads
    /// are written and read unprefixed.
    #[must_use]
    pub fn new(secret: impl Into<String>, transformers: Vec<Box<dyn Transformer>>) -> Self {
        let mut registry = Registry::new();
        for transformer in transformers {
            registry.push(transformer);
        }
        Self {
            secret: secret.into(),
            registry,
        }
    }

    /// Appends a transformer, to be consulted after every transformer
    /// already registered.
    pub fn push_transformer(&mut self, transformer: Box<dyn Transformer>) {
        self.registry.push(transformer);
    }

    /// Encodes `value` to bytes.
    ///
    /// Tries the fast path first (spec step 4.4.1): if `value` is natively
    /// representable without any transformer — no cycles, no shared
    /// references, no opaque value lacking a native representation — the
    /// result skips the full encode-table walk. Otherwise falls through to
    /// the slow path, which may call into registered transformers.
    #[instrument(skip(self, value))]
    pub fn serialize(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        let mut payload = Vec::new();
        if let Some(native) = encoder::try_native_encode(value) {
            ciborium::ser::into_writer(&native, &mut payload)
                .map_err(|e| CodecError::NativeCodecFailure(e.to_string()))?;
        } else {
            let envelope = encoder::Encoder::new(&self.registry).encode(value)?;
            ciborium::ser::into_writer(&envelope, &mut payload)
                .map_err(|e| CodecError::NativeCodecFailure(e.to_string()))?;
        }

        if self.secret.is_empty() {
            Ok(payload)
        } else {
            Ok(auth::sign(&self.secret, &payload))
        }
    }

    /// Decodes bytes produced by [`Codec::serialize`] under the same
    /// secret.
    ///
    /// Returns [`CodecError::SignatureMismatch`] if a secret is configured
    /// and the tag doesn't match, without attempting to decode the payload.
    ///
    /// Tries the fast path first (spec step 4.5.2): native-deserializes the
    /// payload, and if its shape isn't a [`WireEnvelope`] — no placeholders
    /// were ever lifted out of it at encode time — rebuilds the value
    /// directly, skipping shortcut resolution entirely.
    #[instrument(skip(self, bytes))]
    pub fn unserialize(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        let payload = if self.secret.is_empty() {
            bytes
        } else {
            auth::verify(&self.secret, bytes)?
        };

        if let Ok(envelope) = ciborium::de::from_reader::<WireEnvelope, _>(payload) {
            return decoder::decode(envelope, &self.registry);
        }

        let native: ciborium::value::Value = ciborium::de::from_reader(payload).map_err(|e| {
            warn!(error = %e, "payload did not decode as CBOR");
            CodecError::NativeCodecFailure(e.to_string())
        })?;
        decoder::native_to_value(&native)
    }
}
