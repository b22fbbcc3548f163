//! Environment errors.
//!
//! User errors leave the environment unchanged and carry the field, name or
//! digest at fault. Anomalies are broken kernel invariants; a driver should
//! stop when [`KernelError::is_anomaly`] holds.

use thiserror::Error;

use crate::codec::{CodecError, Digest};
use crate::declarations::OpaqueHandle;
use crate::kernel::{InductiveError, TypeError};
use crate::names::{DirPath, Ident, KerName, Label, ModPath};
use crate::univ::UniverseError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Anomaly {
  #[error("unknown opaque handle {0}")]
  UnknownHandle(OpaqueHandle),
  #[error("opaque handle {0} is already filled")]
  AlreadyFilled(OpaqueHandle),
  #[error("certificate nonce does not match opaque handle {0}")]
  NonceMismatch(OpaqueHandle),
  #[error("no pending obligation for opaque handle {0}")]
  MissingObligation(OpaqueHandle),
  #[error("certificate for {0} validated but does not extend the environment")]
  ForgedCertificate(KerName),
  #[error("universe polymorphic proof for {0} leaves monomorphic constraints")]
  PolymorphicResidual(OpaqueHandle),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
  #[error("label {0} is already used in this structure")]
  DuplicateLabel(Label),
  #[error("{0} is already bound in the current scope")]
  AlreadyBound(Ident),
  #[error("library {0} is not loaded")]
  UnknownLibrary(DirPath),
  #[error("library {lib} has digest {found}, expected {expected}")]
  DigestMismatch { lib: DirPath, expected: Digest, found: Digest },
  #[error("typing flags cannot change while a section is open")]
  FlagsInSection,
  #[error("library {0} was compiled with different typing flags")]
  FlagsMismatch(DirPath),
  #[error("ill-typed {name}: {source}")]
  Type {
    name: String,
    #[source]
    source: TypeError,
  },
  #[error("ill-formed inductive {name}: {source}")]
  Inductive {
    name: Label,
    #[source]
    source: InductiveError,
  },
  #[error(transparent)]
  Universe(#[from] UniverseError),
  #[error("universe polymorphic {0} needs constraints it does not declare")]
  UndeclaredConstraints(String),
  #[error("no section is open")]
  NoOpenSection,
  #[error("no {0} is open")]
  NoOpenModule(&'static str),
  #[error("modules cannot be started while section variables are in scope")]
  ModuleInSection,
  #[error("cannot close: a {0} opened inside is still open")]
  ScopeNesting(&'static str),
  #[error("functor parameter {0} must come before the first field")]
  ParameterAfterField(Label),
  #[error("{0} is not a module")]
  NotAModule(ModPath),
  #[error("{0} is not a module type")]
  NotAModuleType(ModPath),
  #[error("{0} is not a functor")]
  NotAFunctor(ModPath),
  #[error("signature mismatch on {label}: {reason}")]
  SignatureMismatch { label: Label, reason: String },
  #[error("cannot include {path}: {reason}")]
  BadInclude { path: ModPath, reason: String },
  #[error("{0} opaque proofs are still unchecked")]
  PendingObligations(usize),
  #[error("modules or sections are still open")]
  OpenScopes,
  #[error("rewrite rules are disabled by the typing flags")]
  RewriteRulesDisabled,
  #[error("rewrite rules cannot be declared inside a section")]
  RulesInSection,
  #[error("bad rewrite rule: {0}")]
  BadRewriteRule(String),
  #[error("unknown constant {0}")]
  UnknownConstant(KerName),
  #[error("side effect {name} rejected: {source}")]
  SideEffectRejected {
    name: KerName,
    #[source]
    source: Box<KernelError>,
  },
  #[error("{0} cannot be used as a side effect")]
  BadSideEffect(Label),
  #[error("side effects depend on each other cyclically")]
  CyclicSideEffects,
  #[error(transparent)]
  Codec(#[from] CodecError),
  #[error("anomaly: {0}")]
  Anomaly(#[from] Anomaly),
}

impl KernelError {
  pub fn is_anomaly(&self) -> bool {
    match self {
      KernelError::Anomaly(_) => true,
      KernelError::SideEffectRejected { source, .. } => source.is_anomaly(),
      _ => false,
    }
  }

  pub(crate) fn typing(name: impl ToString, source: TypeError) -> Self {
    KernelError::Type { name: name.to_string(), source }
  }
}

pub type KernelResult<T> = Result<T, KernelError>;

/// Log an anomaly before handing it back.
pub(crate) fn anomaly(a: Anomaly) -> KernelError {
  tracing::error!(anomaly = %a, "kernel anomaly");
  KernelError::Anomaly(a)
}
