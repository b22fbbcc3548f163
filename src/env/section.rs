//! Sections: scopes of local variables that fields added inside them are
//! discharged over when the section closes.

use std::sync::Arc;

use tracing::debug;

use super::cooking::{Cooking, Discharge};
use super::{Environment, SectionFrame};
use crate::context::NamedDecl;
use crate::declarations::{ConstantDef, StructureField};
use crate::error::{KernelError, KernelResult};
use crate::expr::Expr;
use crate::names::Ident;
use crate::univ::ContextSet;

impl Environment {
  pub fn open_section(&self) -> Environment {
    let mut env = self.clone();
    env.sections.push(Arc::new(SectionFrame {
      saved: self.clone(),
      entries: Vec::new(),
      univs: ContextSet::empty(),
      mark: self.arena.watermark(),
      loads: Vec::new(),
    }));
    debug!(depth = env.sections.len(), "section opened");
    env
  }

  fn check_local(&self, id: &Ident) -> KernelResult<()> {
    if self.sections.is_empty() {
      return Err(KernelError::NoOpenSection);
    }
    if self.named_ctx.contains(id) {
      return Err(KernelError::AlreadyBound(id.clone()));
    }
    Ok(())
  }

  /// Add a section variable `id : ty`.
  pub fn push_named_assum(&self, id: Ident, ty: Expr) -> KernelResult<Environment> {
    self.check_local(&id)?;
    let (_, cs) =
      self.typer.infer_sort(self, &self.named_ctx, &ty).map_err(|e| KernelError::typing(&id, e))?;
    let mut env = self.add_constraints(&cs)?;
    env.named_ctx = env.named_ctx.push(NamedDecl::assum(id, ty));
    Ok(env)
  }

  /// Add a section definition `id := body`, typed by `ty` when given.
  pub fn push_named_def(
    &self,
    id: Ident,
    body: Expr,
    ty: Option<Expr>,
  ) -> KernelResult<Environment> {
    self.check_local(&id)?;
    let typer = self.typer.as_ref();
    let err = |e| KernelError::typing(&id, e);
    let j = typer.infer(self, &self.named_ctx, &body).map_err(err)?;
    let mut cs = j.constraints;
    let ty = match ty {
      Some(ty) => {
        cs.extend(typer.infer_sort(self, &self.named_ctx, &ty).map_err(err)?.1);
        cs.extend(typer.conv_leq(self, &self.named_ctx, &j.ty, &ty).map_err(err)?);
        ty
      },
      None => j.ty,
    };
    let mut env = self.add_constraints(&cs)?;
    env.named_ctx = env.named_ctx.push(NamedDecl::def(id, body, ty));
    Ok(env)
  }

  /// Close the innermost section. Fields added inside it are rebuilt over
  /// the section variables they use and checked again; the universes it
  /// declared and the libraries it loaded stay.
  pub fn close_section(&self) -> KernelResult<Environment> {
    let frame = self.sections.last().ok_or(KernelError::NoOpenSection)?.clone();
    self.arena.revoke_from(frame.mark);
    let mut env = frame.saved.clone();
    env.adopt_persistent(self);
    for (lib, digest) in &frame.loads {
      env = env.import(lib, *digest)?;
    }
    env = env.push_context_set(false, &frame.univs)?;

    let own = self.named_ctx.iter().skip(frame.saved.named_ctx.len());
    let mut cooking = Cooking::new(own);
    for entry in &frame.entries {
      env = match entry {
        Discharge::Constant { label, body, secctx } => {
          let (cooked, abstraction) = cooking.cook_constant(body, secctx.as_deref());
          let handle = match &body.def {
            ConstantDef::Opaque(h) => Some(*h),
            _ => None,
          };
          let (_, mut next) = env.add_constant_entry(label.clone(), cooked, handle)?;
          if let (Some(h), Some(abs)) = (handle, abstraction) {
            next.opaques.cook(&h, abs);
          }
          next
        },
        Discharge::Mind { body, universes } => {
          let cooked = cooking.cook_mind(body, universes.clone());
          env.add_mind(cooked)?.1
        },
      };
    }
    debug!(depth = self.sections.len(), fields = frame.entries.len(), "section closed");
    Ok(env)
  }

  /// Fields added since the innermost section opened, oldest first.
  pub fn section_fields(&self) -> Vec<&StructureField> {
    let Some(frame) = self.sections.last() else {
      return Vec::new();
    };
    let n = self.structure.len() - frame.saved.structure.len();
    let mut v: Vec<_> = self.structure.iter().take(n).map(|(_, f)| f).collect();
    v.reverse();
    v
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::declarations::ConstantEntry;
  use crate::names::{DirPath, Label};

  fn env() -> Environment {
    Environment::new(DirPath::new(&["Sec"]))
  }

  #[test]
  fn locals_need_a_section() {
    let err = env().push_named_assum(Ident::new("x"), Expr::type0()).unwrap_err();
    assert_eq!(err, KernelError::NoOpenSection);
    assert_eq!(env().close_section().unwrap_err(), KernelError::NoOpenSection);
  }

  #[test]
  fn locals_are_not_rebound() {
    let env = env().open_section();
    let env = env.push_named_assum(Ident::new("A"), Expr::type0()).unwrap();
    let err = env.push_named_def(Ident::new("A"), Expr::prop(), None).unwrap_err();
    assert_eq!(err, KernelError::AlreadyBound(Ident::new("A")));
  }

  #[test]
  fn closing_drops_locals_and_keeps_fields() {
    let a = Ident::new("A");
    let env = env().open_section().push_named_assum(a.clone(), Expr::type0()).unwrap();
    let id = Expr::lam(Ident::new("x"), Expr::var(a.clone()), Expr::bvar(0));
    let (kn, env) = env.add_constant(Label::new("id"), ConstantEntry::definition(id)).unwrap();
    assert_eq!(env.section_fields().len(), 1);
    let env = env.close_section().unwrap();
    assert!(env.named_context().is_empty());
    assert_eq!(env.sections_open(), 0);
    let c = env.lookup_constant(&kn).unwrap();
    let expected = Expr::pi(
      a.clone(),
      Expr::type0(),
      Expr::pi(Ident::new("x"), Expr::bvar(0), Expr::bvar(1)),
    );
    assert_eq!(c.ty, expected);
  }
}
