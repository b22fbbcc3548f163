//! Delayed opaque proofs.
//!
//! Declaring an opaque constant opens an obligation keyed by an
//! [`OpaqueHandle`]. The proof is checked later against the environment the
//! constant was declared in, producing an [`OpaqueCertificate`] that `fill`
//! stores. Sections closed in the meantime are recorded on the obligation and
//! applied to the proof when it is filled.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};

use super::certificate::SideEffect;
use super::cooking::Abstraction;
use super::Environment;
use crate::arena::EphemeralId;
use crate::context::NamedContext;
use crate::declarations::{ConstantDef, ConstantEntry, OpaqueHandle, UniverseEntry};
use crate::error::{anomaly, Anomaly, KernelError, KernelResult};
use crate::expr::Expr;
use crate::names::{Ident, KerName, Label};
use crate::univ::ContextSet;

/// A proof still to be supplied.
#[derive(Debug, Clone)]
pub struct OpaqueObligation {
  pub owner: KerName,
  pub ty: Expr,
  pub ctx: NamedContext,
  pub universes: UniverseEntry,
  pub(crate) nonce: EphemeralId,
  /// The environment the constant was declared in.
  pub(crate) snapshot: Arc<Environment>,
  /// Sections closed since the declaration, innermost first.
  pub(crate) cooking: Vec<Arc<Abstraction>>,
}

/// A checked proof, ready to be filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueCertificate {
  pub handle: OpaqueHandle,
  pub(crate) nonce: EphemeralId,
  pub body: Expr,
  /// Monomorphic constraints the proof needs.
  pub residual: ContextSet,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct OpaqueTable {
  pending: im::HashMap<OpaqueHandle, OpaqueObligation>,
  filled: im::HashMap<OpaqueHandle, Expr>,
}

impl OpaqueTable {
  pub(crate) fn pending_count(&self) -> usize {
    self.pending.len()
  }

  pub(crate) fn open(&self, h: OpaqueHandle, obligation: OpaqueObligation) -> Self {
    let mut t = self.clone();
    t.pending.insert(h, obligation);
    t
  }

  pub(crate) fn body(&self, h: &OpaqueHandle) -> Option<&Expr> {
    self.filled.get(h)
  }

  pub(crate) fn insert_body(&mut self, h: OpaqueHandle, body: Expr) {
    self.pending.remove(&h);
    self.filled.insert(h, body);
  }

  /// Record a section closing over the proof of `h`. A pending proof keeps
  /// the record for later; a filled one is rewritten now.
  pub(crate) fn cook(&mut self, h: &OpaqueHandle, abs: Arc<Abstraction>) {
    if let Some(ob) = self.pending.get_mut(h) {
      ob.cooking.push(abs);
    } else if let Some(body) = self.filled.get(h) {
      let cooked = abs.apply(body);
      self.filled.insert(*h, cooked);
    }
  }
}

impl Environment {
  /// Declare an opaque constant whose proof is supplied later.
  pub fn declare_opaque(
    &self,
    label: Label,
    ty: Expr,
    secctx: Option<Vec<Ident>>,
    universes: UniverseEntry,
  ) -> KernelResult<(KerName, OpaqueHandle, Environment)> {
    let entry = ConstantEntry::Opaque { ty, universes, secctx };
    let (kn, env) = self.add_constant(label, entry)?;
    match env.lookup_constant(&kn).map(|c| &c.def) {
      Some(ConstantDef::Opaque(h)) => {
        let h = *h;
        debug!(%kn, handle = %h, "opaque obligation opened");
        Ok((kn, h, env))
      },
      _ => Err(KernelError::UnknownConstant(kn)),
    }
  }

  pub fn obligation(&self, h: &OpaqueHandle) -> Option<&OpaqueObligation> {
    self.opaques.pending.get(h)
  }

  /// Check `proof` against the obligation of `h`, inlining the side effects
  /// it uses. Does not change the environment.
  pub fn check_opaque(
    &self,
    h: OpaqueHandle,
    proof: &Expr,
    effects: &[SideEffect],
  ) -> KernelResult<OpaqueCertificate> {
    let Some(ob) = self.opaques.pending.get(&h) else {
      return Err(anomaly(Anomaly::MissingObligation(h)));
    };
    let body = self.inline_side_effects(proof, effects)?;
    let env = ob.snapshot.with_bound_universes(&ob.universes)?;
    let typer = self.typer.as_ref();
    let err = |e| KernelError::typing(&ob.owner, e);
    let j = typer.infer(&env, &ob.ctx, &body).map_err(err)?;
    let mut cs: BTreeSet<_> = j.constraints;
    cs.extend(typer.conv_leq(&env, &ob.ctx, &j.ty, &ob.ty).map_err(err)?);
    let residual = match &ob.universes {
      UniverseEntry::Monomorphic(_) => ContextSet::of_constraints(cs),
      UniverseEntry::Polymorphic(abs) => {
        if !cs.is_subset(&abs.constraints) {
          return Err(anomaly(Anomaly::PolymorphicResidual(h)));
        }
        ContextSet::empty()
      },
    };
    Ok(OpaqueCertificate { handle: h, nonce: ob.nonce, body, residual })
  }

  /// Store a checked proof. Each handle is filled at most once.
  pub fn fill(&self, cert: &OpaqueCertificate) -> KernelResult<Environment> {
    let h = cert.handle;
    let ob = match self.opaques.pending.get(&h) {
      Some(ob) => ob,
      None if self.opaques.filled.contains_key(&h) => {
        return Err(anomaly(Anomaly::AlreadyFilled(h)));
      },
      None => return Err(anomaly(Anomaly::UnknownHandle(h))),
    };
    if ob.nonce != cert.nonce {
      warn!(handle = %h, "certificate from another obligation");
      return Err(anomaly(Anomaly::NonceMismatch(h)));
    }
    let body = ob
      .cooking
      .iter()
      .fold(cert.body.clone(), |b, abs| abs.apply(&b));
    let mut env = self.push_context_set(false, &cert.residual)?;
    env.opaques.insert_body(h, body);
    debug!(handle = %h, owner = %ob.owner, "opaque proof filled");
    Ok(env)
  }

  pub fn is_fully_checked(&self) -> bool {
    self.opaques.pending.is_empty()
  }

  /// The proof of an opaque constant, once filled.
  pub fn opaque_body(&self, kn: &KerName) -> Option<&Expr> {
    match &self.lookup_constant(kn)?.def {
      ConstantDef::Opaque(h) => self.opaques.body(h),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::names::DirPath;

  fn setup() -> (KerName, OpaqueHandle, Environment) {
    let env = Environment::new(DirPath::new(&["Op"]));
    env.declare_opaque(Label::new("thm"), Expr::type0(), None, UniverseEntry::default()).unwrap()
  }

  #[test]
  fn declare_check_fill() {
    let (kn, h, env) = setup();
    assert!(!env.is_fully_checked());
    assert!(env.opaque_body(&kn).is_none());
    let cert = env.check_opaque(h, &Expr::prop(), &[]).unwrap();
    let env = env.fill(&cert).unwrap();
    assert!(env.is_fully_checked());
    assert_eq!(env.opaque_body(&kn), Some(&Expr::prop()));
  }

  #[test]
  fn wrong_proof_is_a_type_error() {
    let (_, h, env) = setup();
    let err = env.check_opaque(h, &Expr::type0(), &[]).unwrap_err();
    assert!(matches!(err, KernelError::Type { .. }));
    assert!(!err.is_anomaly());
  }

  #[test]
  fn second_fill_is_an_anomaly() {
    let (_, h, env) = setup();
    let cert = env.check_opaque(h, &Expr::prop(), &[]).unwrap();
    let env = env.fill(&cert).unwrap();
    let err = env.fill(&cert).unwrap_err();
    assert_eq!(err, KernelError::Anomaly(Anomaly::AlreadyFilled(h)));
    let err = env.check_opaque(h, &Expr::prop(), &[]).unwrap_err();
    assert!(err.is_anomaly());
  }

  #[test]
  fn nonce_must_match() {
    let (_, h, env) = setup();
    let universes = UniverseEntry::default();
    let (_, h2, env) =
      env.declare_opaque(Label::new("thm2"), Expr::type0(), None, universes).unwrap();
    let mut cert = env.check_opaque(h, &Expr::prop(), &[]).unwrap();
    cert.handle = h2;
    let err = env.fill(&cert).unwrap_err();
    assert_eq!(err, KernelError::Anomaly(Anomaly::NonceMismatch(h2)));
  }
}
