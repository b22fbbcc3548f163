use std::fmt;
use std::sync::Arc;

use super::graph::UGraph;
use super::{Constraint, ConstraintKind, UnivVar};

/// A universe level expression. `Zero` is the impredicative sort of
/// propositions.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Clone)]
pub struct Level(pub Arc<LevelData>);

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LevelData {
  Zero,
  Succ(Level),
  Max(Level, Level),
  IMax(Level, Level),
  Var(UnivVar),
}

impl Level {
  pub fn as_data(&self) -> &LevelData {
    &self.0
  }
  pub fn zero() -> Self {
    Level(Arc::new(LevelData::Zero))
  }
  pub fn one() -> Self {
    Level::succ(Level::zero())
  }
  pub fn succ(x: Level) -> Self {
    Level(Arc::new(LevelData::Succ(x)))
  }
  pub fn max(x: Level, y: Level) -> Self {
    Level(Arc::new(LevelData::Max(x, y)))
  }
  pub fn imax(x: Level, y: Level) -> Self {
    Level(Arc::new(LevelData::IMax(x, y)))
  }
  pub fn var(u: UnivVar) -> Self {
    Level(Arc::new(LevelData::Var(u)))
  }

  pub fn is_var(&self) -> Option<&UnivVar> {
    match self.as_data() {
      LevelData::Var(u) => Some(u),
      _ => None,
    }
  }

  /// Every universe variable occurring in the level.
  pub fn vars(&self, out: &mut Vec<UnivVar>) {
    match self.as_data() {
      LevelData::Zero => {},
      LevelData::Succ(l) => l.vars(out),
      LevelData::Max(a, b) | LevelData::IMax(a, b) => {
        a.vars(out);
        b.vars(out);
      },
      LevelData::Var(u) => {
        if !out.contains(u) {
          out.push(u.clone())
        }
      },
    }
  }

  /// Replace variables according to `f`; variables mapped to `None` are kept.
  pub fn subst(&self, f: &impl Fn(&UnivVar) -> Option<Level>) -> Level {
    match self.as_data() {
      LevelData::Zero => self.clone(),
      LevelData::Succ(l) => Level::succ(l.subst(f)),
      LevelData::Max(a, b) => Level::max(a.subst(f), b.subst(f)),
      LevelData::IMax(a, b) => Level::imax(a.subst(f), b.subst(f)),
      LevelData::Var(u) => f(u).unwrap_or_else(|| self.clone()),
    }
  }
}

impl fmt::Display for Level {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.as_data() {
      LevelData::Zero => write!(f, "0"),
      LevelData::Succ(l) => write!(f, "{l}+1"),
      LevelData::Max(a, b) => write!(f, "max({a}, {b})"),
      LevelData::IMax(a, b) => write!(f, "imax({a}, {b})"),
      LevelData::Var(u) => write!(f, "{u}"),
    }
  }
}

impl fmt::Debug for Level {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Level({self})")
  }
}

/// Simplify a universe level expression.
pub fn simplify(l: &Level) -> Level {
  match l.as_data() {
    LevelData::Zero | LevelData::Var(..) => l.clone(),
    LevelData::Succ(inner) => Level::succ(simplify(inner)),
    LevelData::Max(a, b) => combining(&simplify(a), &simplify(b)),
    LevelData::IMax(a, b) => {
      let a_s = simplify(a);
      let b_s = simplify(b);
      if is_zero_lit(&a_s) || is_one(&a_s) {
        b_s
      } else {
        match b_s.as_data() {
          LevelData::Zero => b_s,
          LevelData::Succ(..) => combining(&a_s, &b_s),
          _ => Level::imax(a_s, b_s),
        }
      }
    },
  }
}

/// Combine two levels, simplifying Max(Zero, x) = x and
/// Max(Succ a, Succ b) = Succ(Max(a, b)).
fn combining(l: &Level, r: &Level) -> Level {
  match (l.as_data(), r.as_data()) {
    (LevelData::Zero, _) => r.clone(),
    (_, LevelData::Zero) => l.clone(),
    (LevelData::Succ(a), LevelData::Succ(b)) => Level::succ(combining(a, b)),
    _ if l == r => l.clone(),
    _ => Level::max(l.clone(), r.clone()),
  }
}

fn is_zero_lit(l: &Level) -> bool {
  matches!(l.as_data(), LevelData::Zero)
}

fn is_one(l: &Level) -> bool {
  matches!(l.as_data(), LevelData::Succ(inner) if is_zero_lit(inner))
}

/// Check if a level is definitionally zero.
pub fn is_zero(l: &Level, g: &UGraph) -> bool {
  leq(l, &Level::zero(), g)
}

/// Check `l <= r` under the constraints of `g`.
pub fn leq(l: &Level, r: &Level, g: &UGraph) -> bool {
  leq_core(&simplify(l), &simplify(r), 0, g)
}

/// Check `l <= r + diff`.
fn leq_core(l: &Level, r: &Level, diff: isize, g: &UGraph) -> bool {
  match (l.as_data(), r.as_data()) {
    (LevelData::Zero, _) if diff >= 0 => true,
    (_, LevelData::Zero) if diff < 0 => false,
    (LevelData::Var(a), LevelData::Var(b)) => var_leq(a, b, diff, g),
    (LevelData::Var(..), LevelData::Zero) => false,
    (LevelData::Zero, LevelData::Var(..)) => diff >= 0,
    (LevelData::Succ(s), _) => leq_core(s, r, diff - 1, g),
    (_, LevelData::Succ(s)) => leq_core(l, s, diff + 1, g),
    (LevelData::Max(a, b), _) => {
      leq_core(a, r, diff, g) && leq_core(b, r, diff, g)
    },
    (LevelData::Var(..) | LevelData::Zero, LevelData::Max(x, y)) => {
      leq_core(l, x, diff, g) || leq_core(l, y, diff, g)
    },
    (LevelData::IMax(a, b), LevelData::IMax(x, y)) if a == x && b == y => true,
    (LevelData::IMax(_, b), _) if b.is_var().is_some() => {
      leq_imax_by_cases(b, l, r, diff, g)
    },
    (_, LevelData::IMax(_, y)) if y.is_var().is_some() => {
      leq_imax_by_cases(y, l, r, diff, g)
    },
    (LevelData::IMax(a, b), _) if is_any_max(b) => match b.as_data() {
      LevelData::IMax(x, y) => {
        let new_max = Level::max(
          Level::imax(a.clone(), y.clone()),
          Level::imax(x.clone(), y.clone()),
        );
        leq_core(&new_max, r, diff, g)
      },
      LevelData::Max(x, y) => {
        let new_max = Level::max(
          Level::imax(a.clone(), x.clone()),
          Level::imax(a.clone(), y.clone()),
        );
        leq_core(&simplify(&new_max), r, diff, g)
      },
      _ => false,
    },
    (_, LevelData::IMax(x, y)) if is_any_max(y) => match y.as_data() {
      LevelData::IMax(j, k) => {
        let new_max = Level::max(
          Level::imax(x.clone(), k.clone()),
          Level::imax(j.clone(), k.clone()),
        );
        leq_core(l, &new_max, diff, g)
      },
      LevelData::Max(j, k) => {
        let new_max = Level::max(
          Level::imax(x.clone(), j.clone()),
          Level::imax(x.clone(), k.clone()),
        );
        leq_core(l, &simplify(&new_max), diff, g)
      },
      _ => false,
    },
    _ => false,
  }
}

fn var_leq(a: &UnivVar, b: &UnivVar, diff: isize, g: &UGraph) -> bool {
  if a == b {
    return diff >= 0;
  }
  match diff {
    d if d >= 0 => g.check_leq(a, b),
    -1 => g.check_lt(a, b),
    _ => false,
  }
}

/// Test l <= r by substituting `var` with 0 and Succ(var) and checking both.
fn leq_imax_by_cases(
  var: &Level,
  lhs: &Level,
  rhs: &Level,
  diff: isize,
  g: &UGraph,
) -> bool {
  let zero = Level::zero();
  let succ_var = Level::succ(var.clone());
  let subst_simp = |lvl: &Level, to: &Level| simplify(&subst_single(lvl, var, to));
  leq_core(&subst_simp(lhs, &zero), &subst_simp(rhs, &zero), diff, g)
    && leq_core(&subst_simp(lhs, &succ_var), &subst_simp(rhs, &succ_var), diff, g)
}

fn subst_single(level: &Level, from: &Level, to: &Level) -> Level {
  if level == from {
    return to.clone();
  }
  match level.as_data() {
    LevelData::Zero | LevelData::Var(..) => level.clone(),
    LevelData::Succ(inner) => Level::succ(subst_single(inner, from, to)),
    LevelData::Max(a, b) => {
      Level::max(subst_single(a, from, to), subst_single(b, from, to))
    },
    LevelData::IMax(a, b) => {
      Level::imax(subst_single(a, from, to), subst_single(b, from, to))
    },
  }
}

fn is_any_max(l: &Level) -> bool {
  matches!(l.as_data(), LevelData::Max(..) | LevelData::IMax(..))
}

/// Check universe level equality via antisymmetry.
pub fn eq_antisymm(l: &Level, r: &Level, g: &UGraph) -> bool {
  leq(l, r, g) && leq(r, l, g)
}

pub fn eq_antisymm_many(ls: &[Level], rs: &[Level], g: &UGraph) -> bool {
  ls.len() == rs.len() && ls.iter().zip(rs).all(|(l, r)| eq_antisymm(l, r, g))
}

/// The variable constraints that would make `l <= r` hold, when the
/// comparison reduces to atomic variable comparisons. `None` when no finite
/// set of atomic constraints suffices.
pub fn implied_leq(l: &Level, r: &Level, g: &UGraph) -> Option<Vec<Constraint>> {
  let (l, r) = (simplify(l), simplify(r));
  if leq(&l, &r, g) {
    return Some(vec![]);
  }
  match (l.as_data(), r.as_data()) {
    (LevelData::Var(a), LevelData::Var(b)) => {
      Some(vec![Constraint::new(a.clone(), ConstraintKind::Le, b.clone())])
    },
    (LevelData::Succ(s), LevelData::Var(b)) => match s.as_data() {
      LevelData::Var(a) => {
        Some(vec![Constraint::new(a.clone(), ConstraintKind::Lt, b.clone())])
      },
      _ => None,
    },
    (LevelData::Succ(a), LevelData::Succ(b)) => implied_leq(a, b, g),
    (LevelData::Max(a, b), _) => {
      let mut cs = implied_leq(a, &r, g)?;
      cs.extend(implied_leq(b, &r, g)?);
      Some(cs)
    },
    _ => None,
  }
}

/// The constraints that would make `l == r` hold, when both reduce to the
/// same shape over variables.
pub fn implied_eq(l: &Level, r: &Level, g: &UGraph) -> Option<Vec<Constraint>> {
  let (l, r) = (simplify(l), simplify(r));
  if eq_antisymm(&l, &r, g) {
    return Some(vec![]);
  }
  match (l.as_data(), r.as_data()) {
    (LevelData::Var(a), LevelData::Var(b)) => {
      Some(vec![Constraint::new(a.clone(), ConstraintKind::Eq, b.clone())])
    },
    (LevelData::Succ(a), LevelData::Succ(b)) => implied_eq(a, b, g),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn v(s: &str) -> Level {
    Level::var(UnivVar::new(s))
  }

  fn graph(vars: &[&str]) -> UGraph {
    let mut g = UGraph::default();
    for s in vars {
      g = g.add_universe(UnivVar::new(s), true).unwrap();
    }
    g
  }

  #[test]
  fn simplify_max_of_succ() {
    let l = Level::max(Level::succ(v("u")), Level::succ(Level::zero()));
    assert_eq!(simplify(&l), Level::succ(v("u")));
    let same = Level::max(v("u"), v("u"));
    assert_eq!(simplify(&same), v("u"));
  }

  #[test]
  fn imax_with_zero_is_zero() {
    let g = graph(&["u"]);
    let l = Level::imax(v("u"), Level::zero());
    assert!(is_zero(&l, &g));
  }

  #[test]
  fn leq_uses_graph() {
    let g = graph(&["u", "w"]);
    assert!(!leq(&v("u"), &v("w"), &g));
    let g = g
      .enforce(&Constraint::new(UnivVar::new("u"), ConstraintKind::Lt, UnivVar::new("w")))
      .unwrap();
    assert!(leq(&v("u"), &v("w"), &g));
    assert!(leq(&Level::succ(v("u")), &v("w"), &g));
    assert!(!leq(&v("w"), &v("u"), &g));
  }

  #[test]
  fn leq_imax_by_cases() {
    let g = graph(&["u", "w"]);
    let l = Level::imax(v("u"), v("w"));
    assert!(leq(&l, &Level::max(v("u"), v("w")), &g));
  }

  #[test]
  fn implied_constraints_for_vars() {
    let g = graph(&["u", "w"]);
    let cs = implied_leq(&Level::succ(v("u")), &v("w"), &g).unwrap();
    assert_eq!(
      cs,
      vec![Constraint::new(UnivVar::new("u"), ConstraintKind::Lt, UnivVar::new("w"))]
    );
    assert!(implied_leq(&Level::succ(Level::succ(v("u"))), &v("w"), &g).is_none());
    assert_eq!(implied_eq(&v("u"), &v("u"), &g), Some(vec![]));
  }
}
