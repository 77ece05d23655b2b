// SPDX-License-Identifier: Apache-2.0
//! Built-in [`NativeOpaque`] implementations.

use std::any::Any;

use crate::value::NativeOpaque;

/// Wraps a decoded `ciborium` value that was pass-through encoded (encoder
/// step 4.4.7: the native codec could render it without a transformer).
///
/// Produced only by the decoder, to give a `Value::Native` slot for a wire
/// value that arrived as [`crate::envelope::WireValue::Native`] rather than
/// a placeholder. Its `native_repr` simply hands the same bytes back, so
/// re-encoding such a value takes the pass-through path again.
#[derive(Debug, Clone)]
pub struct PassThrough {
    repr: ciborium::value::Value,
}

impl PassThrough {
    pub(crate) fn new(repr: ciborium::value::Value) -> Self {
        Self { repr }
    }
}

impl NativeOpaque for PassThrough {
    fn type_tag(&self) -> &str {
        "native"
    }

    fn native_repr(&self) -> Option<ciborium::value::Value> {
        Some(self.repr.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_through_hands_back_the_same_repr() {
        let value = PassThrough::new(ciborium::value::Value::Integer(7.into()));
        assert_eq!(value.native_repr(), Some(ciborium::value::Value::Integer(7.into())));
        assert_eq!(value.type_tag(), "native");
    }
}
