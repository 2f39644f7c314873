//! Transformers: per-packet functions that pass, cancel or replace a packet.

use serde_json::Value;

use crate::protocol::PacketMeta;

/// Outcome of one transformer on one packet.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformResult {
    /// No decision; the packet continues unchanged.
    Pass,
    /// Drop the packet. Remaining transformers do not run.
    Cancel,
    /// Continue with new content. Later transformers see the replacement.
    Replace { fields: Value, meta: PacketMeta },
}

impl TransformResult {
    pub fn replace(fields: Value, meta: PacketMeta) -> Self {
        TransformResult::Replace { fields, meta }
    }
}

/// A registered packet function. Implemented for any matching closure.
pub trait Transformer: Send {
    fn transform(&mut self, fields: &Value, meta: &PacketMeta) -> TransformResult;
}

impl<F> Transformer for F
where
    F: FnMut(&Value, &PacketMeta) -> TransformResult + Send,
{
    fn transform(&mut self, fields: &Value, meta: &PacketMeta) -> TransformResult {
        self(fields, meta)
    }
}

/// Ordered, append-only list of transformers for one direction.
#[derive(Default)]
pub struct Chain {
    transformers: Vec<Box<dyn Transformer>>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, transformer: impl Transformer + 'static) {
        self.transformers.push(Box::new(transformer));
    }

    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn Transformer>> {
        self.transformers.iter_mut()
    }
}

impl std::fmt::Debug for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chain")
            .field("len", &self.transformers.len())
            .finish()
    }
}
