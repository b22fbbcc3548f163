//! Persistent universe graph.
//!
//! Nodes are declared universe variables; an edge `u -> v` records `u <= v`,
//! or `u < v` when strict. The graph is consistent iff no cycle goes through
//! a strict edge. All tables are persistent maps, so every environment
//! version keeps its own graph at the cost of a few shared nodes.

use std::collections::VecDeque;

use rustc_hash::FxHashSet;

use super::{
  Constraint, ConstraintKind, ContextSet, QConstraint, QConstraintKind, QVar,
  Quality, UnivVar, UniverseError,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Edge {
  to: UnivVar,
  strict: bool,
}

#[derive(Debug, Clone)]
pub struct UGraph {
  nodes: im::HashMap<UnivVar, im::Vector<Edge>>,
  qualities: im::HashSet<QVar>,
  qconstraints: im::OrdSet<QConstraint>,
  checking: bool,
}

impl Default for UGraph {
  fn default() -> Self {
    UGraph {
      nodes: im::HashMap::new(),
      qualities: im::HashSet::new(),
      qconstraints: im::OrdSet::new(),
      checking: true,
    }
  }
}

type UResult<T> = Result<T, UniverseError>;

impl UGraph {
  /// A graph that accepts every constraint between declared variables.
  pub fn set_checking(&self, checking: bool) -> Self {
    UGraph { checking, ..self.clone() }
  }

  pub fn is_checking(&self) -> bool {
    self.checking
  }

  pub fn is_declared(&self, u: &UnivVar) -> bool {
    self.nodes.contains_key(u)
  }

  pub fn is_declared_quality(&self, q: &QVar) -> bool {
    self.qualities.contains(q)
  }

  pub fn num_universes(&self) -> usize {
    self.nodes.len()
  }

  /// Declare `u`. In strict mode, re-declaration is an error; otherwise it is
  /// a no-op.
  pub fn add_universe(&self, u: UnivVar, strict: bool) -> UResult<Self> {
    if self.nodes.contains_key(&u) {
      if strict {
        return Err(UniverseError::AlreadyDeclared(u));
      }
      return Ok(self.clone());
    }
    let mut g = self.clone();
    g.nodes.insert(u, im::Vector::new());
    Ok(g)
  }

  pub fn add_quality(&self, q: QVar, strict: bool) -> UResult<Self> {
    if self.qualities.contains(&q) {
      if strict {
        return Err(UniverseError::QualityAlreadyDeclared(q));
      }
      return Ok(self.clone());
    }
    let mut g = self.clone();
    g.qualities.insert(q);
    Ok(g)
  }

  /// Searches paths from `from` to `to`. Returns `None` if `to` is
  /// unreachable, `Some(true)` if some path crosses a strict edge.
  fn reach(&self, from: &UnivVar, to: &UnivVar) -> Option<bool> {
    let mut seen: FxHashSet<(UnivVar, bool)> = FxHashSet::default();
    let mut queue: VecDeque<(UnivVar, bool)> = self
      .nodes
      .get(from)
      .map(|edges| edges.iter().map(|e| (e.to.clone(), e.strict)).collect())
      .unwrap_or_default();
    let mut found = None;
    while let Some((node, strict)) = queue.pop_front() {
      if !seen.insert((node.clone(), strict)) {
        continue;
      }
      if &node == to {
        if strict {
          return Some(true);
        }
        found = Some(false);
      }
      if let Some(edges) = self.nodes.get(&node) {
        for e in edges {
          queue.push_back((e.to.clone(), strict || e.strict));
        }
      }
    }
    found
  }

  /// `u <= v` is derivable.
  pub fn check_leq(&self, u: &UnivVar, v: &UnivVar) -> bool {
    u == v || self.reach(u, v).is_some()
  }

  /// `u < v` is derivable.
  pub fn check_lt(&self, u: &UnivVar, v: &UnivVar) -> bool {
    self.reach(u, v) == Some(true)
  }

  pub fn check_eq(&self, u: &UnivVar, v: &UnivVar) -> bool {
    self.check_leq(u, v) && self.check_leq(v, u)
  }

  pub fn check_constraint(&self, c: &Constraint) -> bool {
    match c.kind {
      ConstraintKind::Lt => self.check_lt(&c.lhs, &c.rhs),
      ConstraintKind::Le => self.check_leq(&c.lhs, &c.rhs),
      ConstraintKind::Eq => self.check_eq(&c.lhs, &c.rhs),
    }
  }

  fn push_edge(&mut self, from: &UnivVar, to: &UnivVar, strict: bool) {
    if let Some(edges) = self.nodes.get_mut(from) {
      let e = Edge { to: to.clone(), strict };
      if !edges.contains(&e) {
        edges.push_back(e);
      }
    }
  }

  /// Add a constraint, rejecting it if it would make the graph inconsistent.
  pub fn enforce(&self, c: &Constraint) -> UResult<Self> {
    for u in [&c.lhs, &c.rhs] {
      if !self.nodes.contains_key(u) {
        return Err(UniverseError::Undeclared(u.clone()));
      }
    }
    let (u, v) = (&c.lhs, &c.rhs);
    if self.checking {
      let inconsistent = match c.kind {
        ConstraintKind::Le => self.check_lt(v, u),
        ConstraintKind::Lt => u == v || self.check_leq(v, u),
        ConstraintKind::Eq => self.check_lt(u, v) || self.check_lt(v, u),
      };
      if inconsistent {
        return Err(UniverseError::Inconsistent(c.clone()));
      }
    }
    let mut g = self.clone();
    match c.kind {
      ConstraintKind::Le if u != v => g.push_edge(u, v, false),
      ConstraintKind::Le => {},
      ConstraintKind::Lt => g.push_edge(u, v, true),
      ConstraintKind::Eq if u != v => {
        g.push_edge(u, v, false);
        g.push_edge(v, u, false);
      },
      ConstraintKind::Eq => {},
    }
    Ok(g)
  }

  fn quality_declared(&self, q: &Quality) -> UResult<()> {
    match q {
      Quality::Var(v) if !self.qualities.contains(v) => {
        Err(UniverseError::UndeclaredQuality(v.clone()))
      },
      _ => Ok(()),
    }
  }

  /// Add a quality constraint. Constant qualities are checked against the
  /// fixed elimination table; variables only need to be declared.
  pub fn enforce_quality(&self, c: &QConstraint) -> UResult<Self> {
    self.quality_declared(&c.lhs)?;
    self.quality_declared(&c.rhs)?;
    let consistent = match (&c.lhs, c.kind, &c.rhs) {
      (Quality::Var(_), ..) | (_, _, Quality::Var(_)) => true,
      (a, QConstraintKind::Eq, b) => a == b,
      (Quality::Type, QConstraintKind::ElimTo, _) => true,
      (a, QConstraintKind::ElimTo, b) => a == b,
    };
    if self.checking && !consistent {
      return Err(UniverseError::QualityInconsistent(c.clone()));
    }
    let mut g = self.clone();
    g.qconstraints.insert(c.clone());
    Ok(g)
  }

  /// Declare every variable of `ctx` and enforce all of its constraints.
  pub fn merge_context_set(&self, ctx: &ContextSet, strict: bool) -> UResult<Self> {
    let mut g = self.clone();
    for u in &ctx.univs {
      g = g.add_universe(u.clone(), strict)?;
    }
    for q in &ctx.qualities {
      g = g.add_quality(q.clone(), strict)?;
    }
    for c in &ctx.constraints {
      g = g.enforce(c)?;
    }
    for c in &ctx.qconstraints {
      g = g.enforce_quality(c)?;
    }
    Ok(g)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn u(s: &str) -> UnivVar {
    UnivVar::new(s)
  }

  fn declared(names: &[&str]) -> UGraph {
    let ctx = ContextSet::of_univs(names.iter().map(|s| u(s)));
    UGraph::default().merge_context_set(&ctx, true).unwrap()
  }

  #[test]
  fn strict_cycle_is_inconsistent() {
    let g = declared(&["a", "b", "c"]);
    let g = g.enforce(&Constraint::new(u("a"), ConstraintKind::Le, u("b"))).unwrap();
    let g = g.enforce(&Constraint::new(u("b"), ConstraintKind::Lt, u("c"))).unwrap();
    assert!(g.check_lt(&u("a"), &u("c")));
    let err = g.enforce(&Constraint::new(u("c"), ConstraintKind::Le, u("a")));
    assert!(matches!(err, Err(UniverseError::Inconsistent(_))));
    // A non-strict cycle is fine: it makes the variables equal.
    let g = g.enforce(&Constraint::new(u("b"), ConstraintKind::Le, u("a"))).unwrap();
    assert!(g.check_eq(&u("a"), &u("b")));
  }

  #[test]
  fn equating_distinct_universes_fails() {
    let g = declared(&["a", "b"]);
    let g = g.enforce(&Constraint::new(u("a"), ConstraintKind::Lt, u("b"))).unwrap();
    let err = g.enforce(&Constraint::new(u("b"), ConstraintKind::Eq, u("a")));
    assert!(matches!(err, Err(UniverseError::Inconsistent(_))));
  }

  #[test]
  fn self_lt_is_inconsistent() {
    let g = declared(&["a"]);
    assert!(g.enforce(&Constraint::new(u("a"), ConstraintKind::Lt, u("a"))).is_err());
    assert!(g.enforce(&Constraint::new(u("a"), ConstraintKind::Le, u("a"))).is_ok());
  }

  #[test]
  fn unchecked_graph_accepts_cycles() {
    let g = declared(&["a", "b"]).set_checking(false);
    let g = g.enforce(&Constraint::new(u("a"), ConstraintKind::Lt, u("b"))).unwrap();
    assert!(g.enforce(&Constraint::new(u("b"), ConstraintKind::Lt, u("a"))).is_ok());
  }

  #[test]
  fn strict_redeclaration() {
    let g = declared(&["a"]);
    assert_eq!(
      g.add_universe(u("a"), true).unwrap_err(),
      UniverseError::AlreadyDeclared(u("a"))
    );
    assert!(g.add_universe(u("a"), false).is_ok());
  }

  #[test]
  fn undeclared_universe() {
    let g = declared(&["a"]);
    let err = g.enforce(&Constraint::new(u("a"), ConstraintKind::Le, u("z")));
    assert_eq!(err.unwrap_err(), UniverseError::Undeclared(u("z")));
  }

  #[test]
  fn quality_table() {
    let g = UGraph::default().add_quality(QVar::new("q"), true).unwrap();
    let ok = QConstraint {
      lhs: Quality::Type,
      kind: QConstraintKind::ElimTo,
      rhs: Quality::Prop,
    };
    let bad = QConstraint {
      lhs: Quality::Prop,
      kind: QConstraintKind::Eq,
      rhs: Quality::Type,
    };
    let var = QConstraint {
      lhs: Quality::Var(QVar::new("q")),
      kind: QConstraintKind::ElimTo,
      rhs: Quality::Prop,
    };
    assert!(g.enforce_quality(&ok).is_ok());
    assert!(g.enforce_quality(&bad).is_err());
    assert!(g.enforce_quality(&var).is_ok());
  }
}
