//! Type inference.

use std::collections::BTreeSet;
use std::fmt;

use tracing::trace;

use super::error::TypeError;
use crate::context::{NamedContext, NamedDecl};
use crate::declarations::Universes;
use crate::env::Environment;
use crate::expr::{Expr, ExprData};
use crate::names::{Ident, KerName};
use crate::univ::{Constraint, ConstraintKind, Level, UGraph};

/// A typing judgment: `term : ty`, provided the implied universe constraints
/// are added to the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Judgment {
  pub term: Expr,
  pub ty: Expr,
  pub constraints: BTreeSet<Constraint>,
}

/// The elaborator-facing typing contract. The environment calls it for every
/// constant it accepts.
pub trait Typer: fmt::Debug + Send + Sync {
  fn infer(
    &self,
    env: &Environment,
    ctx: &NamedContext,
    term: &Expr,
  ) -> Result<Judgment, TypeError>;

  /// Infer the type of `ty` and require it to be a sort.
  fn infer_sort(
    &self,
    env: &Environment,
    ctx: &NamedContext,
    ty: &Expr,
  ) -> Result<(Level, BTreeSet<Constraint>), TypeError>;

  /// Cumulative conversion `a <= b`.
  fn conv_leq(
    &self,
    env: &Environment,
    ctx: &NamedContext,
    a: &Expr,
    b: &Expr,
  ) -> Result<BTreeSet<Constraint>, TypeError>;
}

/// The built-in checker.
#[derive(Debug, Default, Clone, Copy)]
pub struct KernelTyper;

impl Typer for KernelTyper {
  fn infer(
    &self,
    env: &Environment,
    ctx: &NamedContext,
    term: &Expr,
  ) -> Result<Judgment, TypeError> {
    let mut tc = TypeChecker::new(env, ctx.clone());
    let ty = tc.infer(term)?;
    Ok(Judgment { term: term.clone(), ty, constraints: tc.into_constraints() })
  }

  fn infer_sort(
    &self,
    env: &Environment,
    ctx: &NamedContext,
    ty: &Expr,
  ) -> Result<(Level, BTreeSet<Constraint>), TypeError> {
    let mut tc = TypeChecker::new(env, ctx.clone());
    let l = tc.infer_sort(ty)?;
    Ok((l, tc.into_constraints()))
  }

  fn conv_leq(
    &self,
    env: &Environment,
    ctx: &NamedContext,
    a: &Expr,
    b: &Expr,
  ) -> Result<BTreeSet<Constraint>, TypeError> {
    let mut tc = TypeChecker::new(env, ctx.clone());
    if tc.is_leq(a, b) {
      Ok(tc.into_constraints())
    } else {
      Err(TypeError::NotConvertible { lhs: a.clone(), rhs: b.clone() })
    }
  }
}

pub struct TypeChecker<'a> {
  pub(crate) env: &'a Environment,
  pub(crate) ctx: NamedContext,
  pub(crate) graph: UGraph,
  constraints: BTreeSet<Constraint>,
  next_local: u32,
}

impl<'a> TypeChecker<'a> {
  pub fn new(env: &'a Environment, ctx: NamedContext) -> Self {
    TypeChecker {
      env,
      ctx,
      graph: env.graph().clone(),
      constraints: BTreeSet::new(),
      next_local: 0,
    }
  }

  pub fn constraints(&self) -> &BTreeSet<Constraint> {
    &self.constraints
  }

  pub fn into_constraints(self) -> BTreeSet<Constraint> {
    self.constraints
  }

  fn fresh(&mut self, hint: &Ident) -> Ident {
    self.next_local += 1;
    Ident::new(&format!("{hint}#{}", self.next_local))
  }

  /// Run `f` with a fresh local `x : ty` in scope.
  pub(crate) fn with_local<R>(
    &mut self,
    x: &Ident,
    ty: &Expr,
    f: impl FnOnce(&mut Self, Ident) -> R,
  ) -> R {
    let id = self.fresh(x);
    let saved = self.ctx.clone();
    self.ctx = self.ctx.push(NamedDecl::assum(id.clone(), ty.clone()));
    let r = f(self, id);
    self.ctx = saved;
    r
  }

  fn with_local_def<R>(
    &mut self,
    x: &Ident,
    ty: &Expr,
    val: &Expr,
    f: impl FnOnce(&mut Self, Ident) -> R,
  ) -> R {
    let id = self.fresh(x);
    let saved = self.ctx.clone();
    self.ctx = self.ctx.push(NamedDecl::def(id.clone(), val.clone(), ty.clone()));
    let r = f(self, id);
    self.ctx = saved;
    r
  }

  // ==========================================================================
  // Universes
  // ==========================================================================

  pub(crate) fn check_level(&self, l: &Level) -> Result<(), TypeError> {
    let mut vars = Vec::new();
    l.vars(&mut vars);
    match vars.into_iter().find(|u| !self.graph.is_declared(u)) {
      Some(u) => Err(TypeError::UndeclaredUniverse(u)),
      None => Ok(()),
    }
  }

  fn record(&mut self, cs: Vec<Constraint>) -> bool {
    let mut g = self.graph.clone();
    for c in &cs {
      match g.enforce(c) {
        Ok(next) => g = next,
        Err(_) => return false,
      }
    }
    self.graph = g;
    self.constraints.extend(cs);
    true
  }

  /// `l <= r`, recording the variable constraints that make it hold.
  pub(crate) fn level_leq(&mut self, l: &Level, r: &Level) -> bool {
    if !self.env.flags().check_universes || crate::univ::level::leq(l, r, &self.graph) {
      return true;
    }
    match crate::univ::level::implied_leq(l, r, &self.graph) {
      Some(cs) => self.record(cs),
      None => false,
    }
  }

  pub(crate) fn level_eq(&mut self, l: &Level, r: &Level) -> bool {
    if !self.env.flags().check_universes || crate::univ::level::eq_antisymm(l, r, &self.graph) {
      return true;
    }
    match crate::univ::level::implied_eq(l, r, &self.graph) {
      Some(cs) => self.record(cs),
      None => false,
    }
  }

  pub(crate) fn levels_eq(&mut self, ls: &[Level], rs: &[Level]) -> bool {
    ls.len() == rs.len() && ls.iter().zip(rs).all(|(l, r)| self.level_eq(l, r))
  }

  /// Check a universe instance against the declaration it instantiates.
  fn check_instance(
    &mut self,
    name: &KerName,
    universes: &Universes,
    levels: &[Level],
  ) -> Result<(), TypeError> {
    let params = universes.params();
    if params.len() != levels.len() {
      return Err(TypeError::UniverseArity {
        name: name.clone(),
        expected: params.len(),
        found: levels.len(),
      });
    }
    for l in levels {
      self.check_level(l)?;
    }
    if let Universes::Polymorphic(abs) = universes {
      let inst = |u: &crate::univ::UnivVar| {
        Level::var(u.clone())
          .subst(&|v| params.iter().position(|p| p == v).map(|i| levels[i].clone()))
      };
      for c in &abs.constraints {
        let (l, r) = (inst(&c.lhs), inst(&c.rhs));
        let ok = match c.kind {
          ConstraintKind::Le => self.level_leq(&l, &r),
          ConstraintKind::Lt => self.level_leq(&Level::succ(l), &r),
          ConstraintKind::Eq => self.level_eq(&l, &r),
        };
        if !ok {
          return Err(TypeError::UnsatisfiedConstraint(c.clone()));
        }
      }
    }
    Ok(())
  }

  // ==========================================================================
  // Inference
  // ==========================================================================

  pub fn infer(&mut self, e: &Expr) -> Result<Expr, TypeError> {
    trace!(term = %e, "infer");
    match e.as_data() {
      ExprData::Bvar(i) => Err(TypeError::LooseBvar(*i)),
      ExprData::Var(x) => {
        self.ctx.lookup(x).map(|d| d.ty.clone()).ok_or_else(|| TypeError::UnknownVar(x.clone()))
      },
      ExprData::Sort(l) => {
        self.check_level(l)?;
        Ok(Expr::sort(Level::succ(l.clone())))
      },
      ExprData::Const(kn, us) => {
        let env = self.env;
        let c = env.lookup_constant(kn).ok_or_else(|| TypeError::UnknownConstant(kn.clone()))?;
        self.check_instance(kn, &c.universes, us)?;
        Ok(c.instantiate_type(us))
      },
      ExprData::Ind(i, us) => {
        let env = self.env;
        let m = env.lookup_mind(&i.mind).ok_or_else(|| TypeError::UnknownInductive(i.clone()))?;
        let p = m.packet(i).ok_or_else(|| TypeError::UnknownInductive(i.clone()))?;
        self.check_instance(&m.name, &m.universes, us)?;
        Ok(p.closed_arity.instantiate_univs(m.universes.params(), us))
      },
      ExprData::Construct(c, us) => {
        let env = self.env;
        let m = env
          .lookup_mind(&c.ind.mind)
          .ok_or_else(|| TypeError::UnknownConstructor(c.clone()))?;
        let ctor = m.ctor(c).ok_or_else(|| TypeError::UnknownConstructor(c.clone()))?;
        self.check_instance(&m.name, &m.universes, us)?;
        Ok(ctor.closed_ty.instantiate_univs(m.universes.params(), us))
      },
      ExprData::App(f, a) => {
        let tf = self.infer(f)?;
        let tf = self.whnf(&tf);
        match tf.as_data() {
          ExprData::Pi(_, dom, cod) => {
            let ta = self.infer(a)?;
            if !self.is_leq(&ta, dom) {
              return Err(TypeError::AppMismatch {
                arg: a.clone(),
                expected: dom.clone(),
                found: ta,
              });
            }
            Ok(cod.inst(a))
          },
          _ => Err(TypeError::NotAFunction { term: f.clone(), ty: tf.clone() }),
        }
      },
      ExprData::Lam(x, t, b) => {
        self.infer_sort(t)?;
        self.with_local(x, t, |tc, id| {
          let tb = tc.infer(&b.inst(&Expr::var(id.clone())))?;
          Ok(Expr::pi(x.clone(), t.clone(), tb.abstract_vars(&[id])))
        })
      },
      ExprData::Pi(x, t, b) => {
        let s1 = self.infer_sort(t)?;
        let s2 = self.with_local(x, t, |tc, id| tc.infer_sort(&b.inst(&Expr::var(id))))?;
        Ok(Expr::sort(Level::imax(s1, s2)))
      },
      ExprData::Let(x, t, v, b) => {
        self.infer_sort(t)?;
        let tv = self.infer(v)?;
        if !self.is_leq(&tv, t) {
          return Err(TypeError::LetMismatch {
            value: v.clone(),
            expected: t.clone(),
            found: tv,
          });
        }
        self.with_local_def(x, t, v, |tc, id| {
          let tb = tc.infer(&b.inst(&Expr::var(id.clone())))?;
          Ok(tb.subst_var(&id, v))
        })
      },
    }
  }

  pub fn infer_sort(&mut self, ty: &Expr) -> Result<Level, TypeError> {
    let s = self.infer(ty)?;
    let s = self.whnf(&s);
    match s.as_data() {
      ExprData::Sort(l) => Ok(l.clone()),
      _ => Err(TypeError::NotASort(ty.clone())),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::declarations::ConstantEntry;
  use crate::names::{DirPath, Label};

  fn env() -> Environment {
    Environment::new(DirPath::new(&["Tc"]))
  }

  #[test]
  fn identity_has_pi_type() {
    let a = Ident::new("A");
    let x = Ident::new("x");
    let binders = [(a.clone(), Expr::type0()), (x.clone(), Expr::var(a.clone()))];
    let id = Expr::lams(&binders, Expr::var(x.clone()));
    let j = KernelTyper.infer(&env(), &NamedContext::new(), &id).unwrap();
    let expected = Expr::pis(&binders, Expr::var(a));
    let conv = KernelTyper.conv_leq(&env(), &NamedContext::new(), &j.ty, &expected);
    assert!(conv.is_ok());
  }

  #[test]
  fn app_mismatch_is_reported() {
    let (_, e) = env()
      .add_constant(Label::new("T"), ConstantEntry::parameter(Expr::type0()))
      .unwrap();
    let f = Expr::lam(Ident::new("x"), Expr::type0(), Expr::var(Ident::new("x")));
    // Prop : Type
    let good = Expr::app(f, Expr::prop());
    assert!(KernelTyper.infer(&e, &NamedContext::new(), &good).is_ok());
    let worse = Expr::app(
      Expr::lam(Ident::new("x"), Expr::prop(), Expr::var(Ident::new("x"))),
      Expr::type0(),
    );
    let err = KernelTyper.infer(&e, &NamedContext::new(), &worse).unwrap_err();
    assert!(matches!(err, TypeError::AppMismatch { .. }));
  }

  #[test]
  fn let_is_transparent() {
    let a = Ident::new("a");
    // let a : Type := Prop in (fun (p : a) => p) : a -> a, with a := Prop
    let body = Expr::lam(Ident::new("p"), Expr::bvar(0), Expr::bvar(0));
    let e = Expr::let_in(a, Expr::type0(), Expr::prop(), body);
    let j = KernelTyper.infer(&env(), &NamedContext::new(), &e).unwrap();
    assert_eq!(j.ty, Expr::pi(Ident::new("p"), Expr::prop(), Expr::prop()));
  }
}
