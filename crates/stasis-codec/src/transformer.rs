// SPDX-License-Identifier: Apache-2.0
//! The transformer interface and ordered registry.

use crate::error::TransformerError;
use crate::placeholder::Placeholder;
use crate::value::Value;

/// A user-supplied bridge between a live value the native codec can't
/// handle and a [`Placeholder`] standing in for it.
///
/// Implementations must be idempotent: calling [`Transformer::transforms`]
/// or [`Transformer::resolves`] has no side effects.
pub trait Transformer {
    /// May this transformer encode `value`?
    fn transforms(&self, value: &Value) -> bool;

    /// Produce a placeholder for `value`. The returned placeholder's
    /// `payload` may itself contain further unserializable values — the
    /// encoder recurses into it after this call returns.
    fn transform(&self, value: &Value) -> Result<Placeholder, TransformerError>;

    /// May this transformer decode `placeholder`?
    fn resolves(&self, placeholder: &Placeholder) -> bool;

    /// Produce the live value for `placeholder`, whose payload has already
    /// been fully resolved by the time this is called.
    fn resolve(&self, placeholder: &Placeholder) -> Result<Value, TransformerError>;
}

/// Ordered list of transformers. First match wins for both `transforms`
/// and `resolves`; [`Registry::push`] appends, so earlier-registered
/// transformers always take precedence over later ones.
#[derive(Default)]
pub struct Registry {
    transformers: Vec<Box<dyn Transformer>>,
}

impl Registry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            transformers: Vec::new(),
        }
    }

    /// Appends a transformer to the end of the registry.
    pub fn push(&mut self, transformer: Box<dyn Transformer>) {
        self.transformers.push(transformer);
    }

    /// First transformer (in registration order) whose `transforms` matches.
    pub(crate) fn find_encoder(&self, value: &Value) -> Option<&dyn Transformer> {
        self.transformers
            .iter()
            .map(std::convert::AsRef::as_ref)
            .find(|t| t.transforms(value))
    }

    /// First transformer (in registration order) whose `resolves` matches.
    pub(crate) fn find_decoder(&self, placeholder: &Placeholder) -> Option<&dyn Transformer> {
        self.transformers
            .iter()
            .map(std::convert::AsRef::as_ref)
            .find(|t| t.resolves(placeholder))
    }
}
