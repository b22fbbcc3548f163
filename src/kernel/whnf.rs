//! Weak-head normalisation.
//!
//! Reduction steps, tried at the head of an application spine:
//! - beta: `(fun x => b) a ~> b[a/x]`
//! - zeta: `let x := v in b ~> b[v/x]`, and local definitions of the context
//! - delta: transparent constants and inline resolver hints
//! - rewrite rules on symbol heads

use rustc_hash::FxHashMap;

use super::tc::TypeChecker;
use crate::declarations::RewriteRule;
use crate::expr::{Expr, ExprData};
use crate::names::{Ident, KerName};
use crate::univ::Level;

impl TypeChecker<'_> {
  pub fn whnf(&mut self, e: &Expr) -> Expr {
    let mut cur = e.clone();
    while let Some(next) = self.whnf_step(&cur) {
      cur = next;
    }
    cur
  }

  fn whnf_step(&mut self, e: &Expr) -> Option<Expr> {
    let (head, args) = e.unfold_apps();
    match head.as_data() {
      ExprData::Lam(..) if !args.is_empty() => {
        let mut body = head.clone();
        let mut used = 0;
        loop {
          let next = match body.as_data() {
            ExprData::Lam(_, _, b) if used < args.len() => b.inst(args[used]),
            _ => break,
          };
          body = next;
          used += 1;
        }
        Some(Expr::apps(body, args[used..].iter().map(|a| (*a).clone())))
      },
      ExprData::Let(_, _, v, b) => Some(Expr::apps(b.inst(v), args.into_iter().cloned())),
      ExprData::Var(x) => {
        let body = self.ctx.lookup(x)?.body.clone()?;
        Some(Expr::apps(body, args.into_iter().cloned()))
      },
      ExprData::Const(kn, us) => {
        if let Some(body) = self.unfold_const(kn, us) {
          return Some(Expr::apps(body, args.into_iter().cloned()));
        }
        let args: Vec<Expr> = args.into_iter().cloned().collect();
        self.rewrite(kn, &args)
      },
      _ => None,
    }
  }

  fn unfold_const(&self, kn: &KerName, us: &[Level]) -> Option<Expr> {
    if let Some(e) = self.env.resolver().inline_of(kn) {
      return Some(e.clone());
    }
    self.env.lookup_constant(kn)?.instantiate_body(us)
  }

  // ==========================================================================
  // Rewrite rules
  // ==========================================================================

  fn rewrite(&mut self, symbol: &KerName, args: &[Expr]) -> Option<Expr> {
    let env = self.env;
    for rule in env.rules_for(symbol) {
      let n = rule.arity();
      if args.len() < n {
        continue;
      }
      let (_, pats) = rule.lhs.unfold_apps();
      let mut subst = FxHashMap::default();
      let matched =
        pats.iter().zip(args).all(|(p, a)| self.match_pattern(rule, p, a, &mut subst));
      if matched {
        let rhs = rule.rhs.replace(&mut |t, _| match t.as_data() {
          ExprData::Var(x) => subst.get(x).cloned(),
          _ => None,
        });
        tracing::trace!(%symbol, "rewrite step");
        return Some(Expr::apps(rhs, args[n..].iter().cloned()));
      }
    }
    None
  }

  fn match_pattern(
    &mut self,
    rule: &RewriteRule,
    pat: &Expr,
    term: &Expr,
    subst: &mut FxHashMap<Ident, Expr>,
  ) -> bool {
    if let ExprData::Var(x) = pat.as_data() {
      if rule.pattern_vars.iter().any(|(y, _)| y == x) {
        subst.insert(x.clone(), term.clone());
        return true;
      }
    }
    let t = self.whnf(term);
    let (ph, pargs) = pat.unfold_apps();
    let (th, targs) = t.unfold_apps();
    pargs.len() == targs.len()
      && self.same_rigid_head(ph, th)
      && pargs.iter().zip(&targs).all(|(p, a)| self.match_pattern(rule, p, a, subst))
  }

  /// Heads compared up to name resolution, ignoring universe instances.
  pub(crate) fn same_rigid_head(&self, a: &Expr, b: &Expr) -> bool {
    let r = self.env.resolver();
    match (a.as_data(), b.as_data()) {
      (ExprData::Const(k1, _), ExprData::Const(k2, _)) => {
        r.resolve_kername(k1) == r.resolve_kername(k2)
      },
      (ExprData::Ind(i1, _), ExprData::Ind(i2, _)) => {
        i1.idx == i2.idx && r.resolve_kername(&i1.mind) == r.resolve_kername(&i2.mind)
      },
      (ExprData::Construct(c1, _), ExprData::Construct(c2, _)) => {
        c1.idx == c2.idx
          && c1.ind.idx == c2.ind.idx
          && r.resolve_kername(&c1.ind.mind) == r.resolve_kername(&c2.ind.mind)
      },
      _ => a == b,
    }
  }
}

#[cfg(test)]
mod tests {
  use crate::context::NamedContext;
  use crate::declarations::ConstantEntry;
  use crate::env::Environment;
  use crate::expr::Expr;
  use crate::kernel::tc::TypeChecker;
  use crate::names::{DirPath, Ident, Label};

  #[test]
  fn beta_and_delta() {
    let env = Environment::new(DirPath::new(&["W"]));
    let id = Expr::lam(Ident::new("x"), Expr::type0(), Expr::bvar(0));
    let (kn, env) = env.add_constant(Label::new("id"), ConstantEntry::definition(id)).unwrap();
    let mut tc = TypeChecker::new(&env, NamedContext::new());
    let e = Expr::app(Expr::cnst(kn, vec![]), Expr::prop());
    assert_eq!(tc.whnf(&e), Expr::prop());
  }

  #[test]
  fn local_definitions_unfold() {
    let env = Environment::new(DirPath::new(&["W"]));
    let x = Ident::new("x");
    let ctx = NamedContext::new().push(crate::context::NamedDecl::def(
      x.clone(),
      Expr::prop(),
      Expr::type0(),
    ));
    let mut tc = TypeChecker::new(&env, ctx);
    assert_eq!(tc.whnf(&Expr::var(x)), Expr::prop());
  }
}
