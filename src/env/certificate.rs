//! Side effects and their certificates.
//!
//! A side effect is a constant checked against some environment but not yet
//! added to its structure. Its [`Certificate`] remembers the structure and
//! universes it was checked against. Exporting a batch of effects into an
//! environment whose structure still extends every certificate skips the
//! re-check; otherwise each effect is checked again.

use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use super::Environment;
use crate::arena::EphemeralId;
use crate::context::NamedContext;
use crate::declarations::{ConstantBody, ConstantDef, ConstantEntry, StructureBody};
use crate::error::{anomaly, Anomaly, KernelError, KernelResult};
use crate::expr::{Expr, ExprData, GlobalRef};
use crate::names::{Ident, KerName, Label};
use crate::univ::ContextSet;

/// Proof that a value was checked against a given environment.
#[derive(Debug, Clone)]
pub struct Certificate {
  pub(crate) structure: StructureBody,
  pub(crate) univs: ContextSet,
  /// Open sections and the section variables in scope.
  pub(crate) sections: usize,
  pub(crate) named_ctx: NamedContext,
  pub(crate) id: EphemeralId,
}

/// A checked constant awaiting export.
#[derive(Debug, Clone)]
pub struct SideEffect {
  pub label: Label,
  pub body: ConstantBody,
  /// Universes the effect introduced on top of the environment it was
  /// checked in.
  pub univs: ContextSet,
  pub certificate: Certificate,
}

impl SideEffect {
  pub fn name(&self) -> &KerName {
    &self.body.name
  }

  fn depends_on(&self, other: &KerName) -> bool {
    let c = GlobalRef::Const(other.clone());
    self.body.ty.globals().contains(&c)
      || self.body.body().is_some_and(|b| b.globals().contains(&c))
  }
}

impl Environment {
  pub fn certificate(&self) -> Certificate {
    Certificate {
      structure: self.structure.clone(),
      univs: self.univs.clone(),
      sections: self.sections.len(),
      named_ctx: self.named_ctx.clone(),
      id: self.arena.mint(),
    }
  }

  /// Check `entry` as a side effect. The returned environment can see the
  /// new constant but its structure is unchanged.
  pub fn side_effect(
    &self,
    label: Label,
    entry: ConstantEntry,
  ) -> KernelResult<(SideEffect, Environment)> {
    self.check_label(&label)?;
    if matches!(entry, ConstantEntry::Opaque { .. }) {
      return Err(KernelError::BadSideEffect(label));
    }
    let name = self.next_name(label.clone());
    let (body, mut env) = self.check_constant_entry(&name, &entry)?;
    let univs = env.univs.difference(&self.univs);
    env.globals.constants.insert(name.clone(), body.clone());
    let certificate = env.certificate();
    trace!(%name, "side effect checked");
    Ok((SideEffect { label, body, univs, certificate }, env))
  }

  /// Validate a chain of certificates, oldest first. Every certificate must
  /// be live, its structure a suffix of ours and its section variables ours.
  /// Returns the universes the chain adds to this environment.
  pub fn check_signatures(&self, certs: &[&Certificate]) -> Option<ContextSet> {
    let mut univs = ContextSet::empty();
    for cert in certs.iter().rev() {
      if !self.arena.is_live(&cert.id) {
        debug!(id = %cert.id, "stale certificate");
        return None;
      }
      if !cert.structure.is_suffix_of(&self.structure) {
        debug!(id = %cert.id, "certificate does not match the structure");
        return None;
      }
      if cert.sections != self.sections.len() || cert.named_ctx != self.named_ctx {
        debug!(id = %cert.id, "certificate was issued under other section variables");
        return None;
      }
      univs.extend(&cert.univs);
    }
    Some(univs.difference(&self.univs))
  }

  /// Add side effects to the structure. Effects are ordered so that every
  /// effect comes after the ones it uses; if one is rejected, none is added.
  pub fn export_side_effects(
    &self,
    effects: Vec<SideEffect>,
  ) -> KernelResult<(Vec<KerName>, Environment)> {
    let ordered = order_side_effects(effects)?;
    let certs: Vec<&Certificate> = ordered.iter().map(|e| &e.certificate).collect();
    match self.check_signatures(&certs) {
      Some(univs) => self.export_trusted(&ordered, &univs),
      None => {
        debug!(effects = ordered.len(), "certificates rejected, checking side effects again");
        self.export_checked(&ordered)
      },
    }
  }

  /// Add effects whose certificates validated, without type checking.
  pub(crate) fn export_trusted(
    &self,
    ordered: &[SideEffect],
    univs: &ContextSet,
  ) -> KernelResult<(Vec<KerName>, Environment)> {
    let mut env = self.push_context_set(false, univs)?;
    let mut names = Vec::with_capacity(ordered.len());
    for e in ordered {
      if e.name() != &self.next_name(e.label.clone())
        || !e.certificate.structure.is_suffix_of(&self.structure)
      {
        return Err(anomaly(Anomaly::ForgedCertificate(e.name().clone())));
      }
      env = env.push_constant(e.label.clone(), e.body.clone(), None)?;
      names.push(e.name().clone());
    }
    Ok((names, env))
  }

  /// Check every effect again, in order.
  pub(crate) fn export_checked(
    &self,
    ordered: &[SideEffect],
  ) -> KernelResult<(Vec<KerName>, Environment)> {
    let mut env = self.clone();
    let mut names = Vec::with_capacity(ordered.len());
    for e in ordered {
      let reject = |source| {
        warn!(name = %e.name(), "side effect rejected");
        KernelError::SideEffectRejected { name: e.name().clone(), source: Box::new(source) }
      };
      let entry = entry_of(&e.body)
        .ok_or_else(|| reject(KernelError::BadSideEffect(e.label.clone())))?;
      let (kn, next) = env
        .push_context_set(false, &e.univs)
        .and_then(|env| env.add_constant(e.label.clone(), entry))
        .map_err(reject)?;
      env = next;
      names.push(kn);
    }
    Ok((names, env))
  }

  /// Let-bind the effects `term` uses, in dependency order, so that it no
  /// longer refers to them by name.
  pub fn inline_side_effects(&self, term: &Expr, effects: &[SideEffect]) -> KernelResult<Expr> {
    if effects.is_empty() {
      return Ok(term.clone());
    }
    let ordered = order_side_effects(effects.to_vec())?;
    let mut used: Vec<bool> = vec![false; ordered.len()];
    let globals = term.globals();
    for (i, e) in ordered.iter().enumerate().rev() {
      let direct = globals.contains(&GlobalRef::Const(e.name().clone()));
      let indirect = ordered[i + 1..]
        .iter()
        .zip(&used[i + 1..])
        .any(|(later, u)| *u && later.depends_on(e.name()));
      used[i] = direct || indirect;
    }
    let mut out = term.clone();
    for (e, _) in ordered.iter().zip(&used).rev().filter(|(_, u)| **u) {
      let ConstantDef::Def(val) = &e.body.def else {
        return Err(KernelError::BadSideEffect(e.label.clone()));
      };
      if e.body.universes.is_polymorphic() {
        return Err(KernelError::BadSideEffect(e.label.clone()));
      }
      let name = e.name();
      let abstracted = out.replace(&mut |t, depth| match t.as_data() {
        ExprData::Const(kn, _) if kn == name => Some(Expr::bvar(depth)),
        _ => None,
      });
      out = Expr::let_in(Ident::new(e.label.as_str()), e.body.ty.clone(), val.clone(), abstracted);
    }
    Ok(out)
  }
}

/// The entry that re-checks a stored constant.
fn entry_of(body: &ConstantBody) -> Option<ConstantEntry> {
  let universes = body.universes.to_entry();
  let entry = match &body.def {
    ConstantDef::Def(b) => {
      let entry = ConstantEntry::typed_definition(b.clone(), body.ty.clone());
      if body.inline { entry.inlined() } else { entry }
    },
    ConstantDef::Undef => ConstantEntry::parameter(body.ty.clone()),
    ConstantDef::Symbol => ConstantEntry::symbol(body.ty.clone()),
    ConstantDef::Opaque(_) => return None,
  };
  Some(entry.with_universes(universes))
}

/// Order effects so that each one follows the effects it mentions. Effects
/// without dependencies between them keep their relative order.
fn order_side_effects(effects: Vec<SideEffect>) -> KernelResult<Vec<SideEffect>> {
  let mut pending: IndexMap<KerName, SideEffect> =
    effects.into_iter().map(|e| (e.name().clone(), e)).collect();
  let mut out = Vec::with_capacity(pending.len());
  while !pending.is_empty() {
    let ready = pending.iter().position(|(_, e)| {
      !pending.keys().any(|other| other != e.name() && e.depends_on(other))
    });
    match ready {
      Some(i) => {
        if let Some((_, e)) = pending.shift_remove_index(i) {
          out.push(e);
        }
      },
      None => return Err(KernelError::CyclicSideEffects),
    }
  }
  Ok(out)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::names::DirPath;

  fn base() -> Environment {
    let env = Environment::new(DirPath::new(&["Eff"]));
    env.add_constant(Label::new("T"), ConstantEntry::parameter(Expr::type0())).unwrap().1
  }

  #[test]
  fn fresh_certificate_validates() {
    let env = base();
    let cert = env.certificate();
    assert_eq!(env.check_signatures(&[&cert]), Some(ContextSet::empty()));
  }

  #[test]
  fn certificate_of_another_branch_fails() {
    let env = base();
    let ty = ConstantEntry::parameter(Expr::type0());
    let (_, a) = env.add_constant(Label::new("a"), ty.clone()).unwrap();
    let (_, b) = env.add_constant(Label::new("b"), ty).unwrap();
    assert!(b.check_signatures(&[&a.certificate()]).is_none());
    // Older states are suffixes of newer ones.
    assert!(a.check_signatures(&[&env.certificate()]).is_some());
  }

  #[test]
  fn effects_are_ordered_by_dependency() {
    let env = base();
    let entry = ConstantEntry::definition(Expr::prop());
    let (a, scratch) = env.side_effect(Label::new("a"), entry).unwrap();
    let a_ref = Expr::cnst(a.name().clone(), vec![]);
    let (b, _) = scratch.side_effect(Label::new("b"), ConstantEntry::definition(a_ref)).unwrap();
    let ordered = order_side_effects(vec![b.clone(), a.clone()]).unwrap();
    assert_eq!(ordered[0].name(), a.name());
    assert_eq!(ordered[1].name(), b.name());
  }

  #[test]
  fn inlining_binds_used_effects() {
    let env = base();
    let entry = ConstantEntry::definition(Expr::prop());
    let (a, scratch) = env.side_effect(Label::new("a"), entry).unwrap();
    let term = Expr::cnst(a.name().clone(), vec![]);
    let inlined = scratch.inline_side_effects(&term, &[a]).unwrap();
    assert_eq!(inlined, Expr::let_in(Ident::new("a"), Expr::type0(), Expr::prop(), Expr::bvar(0)));
  }
}
