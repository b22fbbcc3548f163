//! Code generation seam.
//!
//! The environment asks the backend for a blob per accepted constant and
//! stores it by name without looking inside.

use std::fmt;
use std::sync::Arc;

use crate::declarations::ConstantBody;

/// Opaque executable code.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CodeBlob(pub Arc<[u8]>);

impl CodeBlob {
  pub fn new(bytes: &[u8]) -> Self {
    CodeBlob(Arc::from(bytes))
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.0
  }
}

impl fmt::Debug for CodeBlob {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "CodeBlob({} bytes)", self.0.len())
  }
}

pub trait CodeGen: fmt::Debug + Send + Sync {
  /// Code for a checked constant, or `None` when there is nothing to run
  /// (axioms, opaque proofs).
  fn compile(&self, body: &ConstantBody) -> Option<CodeBlob>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoCodeGen;

impl CodeGen for NoCodeGen {
  fn compile(&self, _: &ConstantBody) -> Option<CodeBlob> {
    None
  }
}
