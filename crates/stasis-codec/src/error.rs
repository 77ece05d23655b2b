// SPDX-License-Identifier: Apache-2.0
//! Error types surfaced by the codec.

/// Boxed error type returned by user-authored [`crate::Transformer`] impls.
///
/// A type alias rather than a trait bound lets transformers raise whatever
/// error type is natural for them; [`CodecError::TransformerFailure`] wraps
/// it at the boundary where it escapes `transform`/`resolve`.
pub type TransformerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by [`crate::Codec::serialize`] and [`crate::Codec::unserialize`].
#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    /// The authentication tag did not match the payload under the configured secret.
    #[error("[STASIS_SIGNATURE_MISMATCH] authentication tag does not match payload")]
    SignatureMismatch,

    /// A reference id was revisited with a different value mid-encode.
    #[error("[STASIS_SOURCE_MUTATED] value behind ref {0} changed during serialization")]
    SourceMutatedDuringEncode(crate::value::RefId),

    /// The graph walker was entered at a scalar root on the slow path.
    #[error("[STASIS_ILLEGAL_LEAF] the graph walker cannot be entered at a scalar value")]
    IllegalLeafEncoded,

    /// Decode reached a placeholder with no resolving transformer and no default instance.
    #[error("[STASIS_UNRESOLVABLE_PLACEHOLDER] no transformer resolves placeholder class `{0}`")]
    UnresolvablePlaceholder(String),

    /// A transformer raised while transforming or resolving a value.
    #[error("[STASIS_TRANSFORMER_FAILURE] transformer failed: {0}")]
    TransformerFailure(#[source] TransformerError),

    /// The native codec failed in a context where escalation to the slow path was not possible.
    #[error("[STASIS_NATIVE_CODEC_FAILURE] native codec failed: {0}")]
    NativeCodecFailure(String),
}

impl CodecError {
    pub(crate) fn transformer_failure(err: TransformerError) -> Self {
        CodecError::TransformerFailure(err)
    }
}
