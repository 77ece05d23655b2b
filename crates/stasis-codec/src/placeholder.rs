// SPDX-License-Identifier: Apache-2.0
//! The neutral, natively-serializable stand-in for a value the native codec
//! can't handle.

use crate::value::Value;

/// A natively-serializable record standing in for a value the native codec
/// cannot handle, carrying a class tag and a payload subgraph.
///
/// Placeholders are equality-free — identity is by reference (by the
/// `Rc<RefCell<_>>` slot that wraps them, via [`crate::value::Value::ref_id`]).
#[derive(Debug, Clone)]
pub struct Placeholder {
    /// Identifies which concrete live type this placeholder stands for
    /// (its original class, or a sentinel such as `"closure"`).
    pub class_tag: String,
    /// Arbitrary value a matching transformer knows how to consume at
    /// resolve time. May itself contain further unserializable values —
    /// the encoder recurses into it like any other slot.
    pub payload: Value,
    instance: Option<Value>,
}

impl Placeholder {
    /// Constructs a placeholder with no payload yet (`payload` starts `Null`).
    #[must_use]
    pub fn new(class_tag: impl Into<String>) -> Self {
        Self {
            class_tag: class_tag.into(),
            payload: Value::Null,
            instance: None,
        }
    }

    /// Constructs a placeholder with an explicit payload.
    #[must_use]
    pub fn new_from(class_tag: impl Into<String>, payload: Value) -> Self {
        Self {
            class_tag: class_tag.into(),
            payload,
            instance: None,
        }
    }

    /// Whether a live instance has been attached via [`Placeholder::set_instance`].
    #[must_use]
    pub fn has_instance(&self) -> bool {
        self.instance.is_some()
    }

    /// Attaches the reconstructed live value for this placeholder.
    pub fn set_instance(&mut self, live: Value) {
        self.instance = Some(live);
    }

    /// Returns the attached live instance, if any.
    ///
    /// `None` with no matching transformer at decode time is a decode error
    /// ([`crate::error::CodecError::UnresolvablePlaceholder`]), not a panic —
    /// unlike the reference algorithm's "programming error" framing, this
    /// crate always has a recoverable path back to the caller.
    #[must_use]
    pub fn get_instance(&self) -> Option<&Value> {
        self.instance.as_ref()
    }
}
