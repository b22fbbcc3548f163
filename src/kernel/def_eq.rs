//! Definitional equality and cumulativity.

use super::tc::TypeChecker;
use crate::expr::{Expr, ExprData};

impl TypeChecker<'_> {
  pub fn is_def_eq(&mut self, a: &Expr, b: &Expr) -> bool {
    self.conv(a, b, false)
  }

  /// `a` is convertible to `b` up to cumulativity of sorts.
  pub fn is_leq(&mut self, a: &Expr, b: &Expr) -> bool {
    self.conv(a, b, true)
  }

  fn conv(&mut self, a: &Expr, b: &Expr, cumul: bool) -> bool {
    if a == b {
      return true;
    }
    let a = self.whnf(a);
    let b = self.whnf(b);
    if a == b {
      return true;
    }
    match (a.as_data(), b.as_data()) {
      (ExprData::Sort(l1), ExprData::Sort(l2)) => {
        if cumul {
          self.level_leq(l1, l2)
        } else {
          self.level_eq(l1, l2)
        }
      },
      (ExprData::Pi(x, t1, b1), ExprData::Pi(_, t2, b2)) => {
        self.conv(t1, t2, false)
          && self.with_local(x, t1, |tc, id| {
            let v = Expr::var(id);
            tc.conv(&b1.inst(&v), &b2.inst(&v), cumul)
          })
      },
      (ExprData::Lam(x, t1, b1), ExprData::Lam(_, t2, b2)) => {
        self.conv(t1, t2, false)
          && self.with_local(x, t1, |tc, id| {
            let v = Expr::var(id);
            tc.conv(&b1.inst(&v), &b2.inst(&v), false)
          })
      },
      (ExprData::Lam(x, t, body), _) => self.with_local(x, t, |tc, id| {
        let v = Expr::var(id);
        tc.conv(&body.inst(&v), &Expr::app(b.clone(), v), false)
      }),
      (_, ExprData::Lam(x, t, body)) => self.with_local(x, t, |tc, id| {
        let v = Expr::var(id);
        tc.conv(&Expr::app(a.clone(), v.clone()), &body.inst(&v), false)
      }),
      _ => self.conv_stuck(&a, &b),
    }
  }

  /// Both sides are in weak-head normal form: compare heads, then arguments.
  fn conv_stuck(&mut self, a: &Expr, b: &Expr) -> bool {
    let (ha, aa) = a.unfold_apps();
    let (hb, ab) = b.unfold_apps();
    if aa.len() != ab.len() {
      return false;
    }
    let heads = match (ha.as_data(), hb.as_data()) {
      (ExprData::Var(x), ExprData::Var(y)) => x == y,
      (ExprData::Const(_, u1), ExprData::Const(_, u2))
      | (ExprData::Ind(_, u1), ExprData::Ind(_, u2))
      | (ExprData::Construct(_, u1), ExprData::Construct(_, u2)) => {
        self.same_rigid_head(ha, hb) && self.levels_eq(u1, u2)
      },
      _ => false,
    };
    heads && aa.iter().zip(&ab).all(|(x, y)| self.conv(x, y, false))
  }
}

#[cfg(test)]
mod tests {
  use crate::context::NamedContext;
  use crate::env::Environment;
  use crate::expr::Expr;
  use crate::kernel::tc::TypeChecker;
  use crate::names::{DirPath, Ident};
  use crate::univ::{ContextSet, Level, UnivVar};

  #[test]
  fn cumulativity_is_one_way() {
    let env = Environment::new(DirPath::new(&["D"]));
    let mut tc = TypeChecker::new(&env, NamedContext::new());
    assert!(tc.is_leq(&Expr::prop(), &Expr::type0()));
    assert!(!tc.is_leq(&Expr::type0(), &Expr::prop()));
    assert!(!tc.is_def_eq(&Expr::prop(), &Expr::type0()));
  }

  #[test]
  fn eta() {
    let env = Environment::new(DirPath::new(&["D"]));
    let f = Ident::new("f");
    let fty = Expr::arrow(Expr::type0(), Expr::type0());
    let ctx = NamedContext::new().push(crate::context::NamedDecl::assum(f.clone(), fty));
    let mut tc = TypeChecker::new(&env, ctx);
    let applied = Expr::app(Expr::var(f.clone()), Expr::bvar(0));
    let expanded = Expr::lam(Ident::new("x"), Expr::type0(), applied);
    assert!(tc.is_def_eq(&expanded, &Expr::var(f)));
  }

  #[test]
  fn implied_constraints_are_recorded() {
    let u = UnivVar::new("u");
    let v = UnivVar::new("v");
    let env = Environment::new(DirPath::new(&["D"]))
      .push_context_set(true, &ContextSet::of_univs([u.clone(), v.clone()]))
      .unwrap();
    let mut tc = TypeChecker::new(&env, NamedContext::new());
    let su = Expr::sort(Level::var(u.clone()));
    let sv = Expr::sort(Level::var(v.clone()));
    assert!(tc.is_leq(&su, &sv));
    assert_eq!(tc.constraints().len(), 1);
    // u <= v is now known, so v < u cannot be implied.
    let su1 = Expr::sort(Level::succ(Level::var(v)));
    assert!(!tc.is_leq(&su1, &su));
  }
}
