//! Universe variables, sort qualities, and the constraints between them.

pub mod graph;
pub mod level;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::names::DirPath;

pub use graph::UGraph;
pub use level::{Level, LevelData};

/// A universe variable. Variables declared by a loaded library are qualified
/// by that library, so two libraries never share a variable by accident.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnivVar {
  lib: Option<DirPath>,
  name: Arc<str>,
}

impl UnivVar {
  pub fn new(s: &str) -> Self {
    UnivVar { lib: None, name: Arc::from(s) }
  }

  pub fn qualified(lib: DirPath, s: &str) -> Self {
    UnivVar { lib: Some(lib), name: Arc::from(s) }
  }

  pub fn as_str(&self) -> &str {
    &self.name
  }

  pub fn library(&self) -> Option<&DirPath> {
    self.lib.as_ref()
  }

  /// The variable as seen from outside `lib`. Already qualified variables
  /// are left alone.
  pub fn qualify(&self, lib: &DirPath) -> Self {
    match self.lib {
      Some(_) => self.clone(),
      None => UnivVar { lib: Some(lib.clone()), name: self.name.clone() },
    }
  }
}

impl fmt::Display for UnivVar {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.lib {
      Some(lib) => write!(f, "{lib}.{}", self.name),
      None => f.write_str(&self.name),
    }
  }
}

impl fmt::Debug for UnivVar {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "UnivVar({self})")
  }
}

/// A sort-quality variable, qualified like [`UnivVar`].
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct QVar {
  lib: Option<DirPath>,
  name: Arc<str>,
}

impl QVar {
  pub fn new(s: &str) -> Self {
    QVar { lib: None, name: Arc::from(s) }
  }

  pub fn qualified(lib: DirPath, s: &str) -> Self {
    QVar { lib: Some(lib), name: Arc::from(s) }
  }

  pub fn as_str(&self) -> &str {
    &self.name
  }

  pub fn library(&self) -> Option<&DirPath> {
    self.lib.as_ref()
  }

  pub fn qualify(&self, lib: &DirPath) -> Self {
    match self.lib {
      Some(_) => self.clone(),
      None => QVar { lib: Some(lib.clone()), name: self.name.clone() },
    }
  }
}

impl fmt::Display for QVar {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.lib {
      Some(lib) => write!(f, "'{lib}.{}", self.name),
      None => write!(f, "'{}", self.name),
    }
  }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum ConstraintKind {
  Lt,
  Le,
  Eq,
}

/// `lhs kind rhs` over universe variables.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Constraint {
  pub lhs: UnivVar,
  pub kind: ConstraintKind,
  pub rhs: UnivVar,
}

impl Constraint {
  pub fn new(lhs: UnivVar, kind: ConstraintKind, rhs: UnivVar) -> Self {
    Constraint { lhs, kind, rhs }
  }
}

impl fmt::Display for Constraint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let op = match self.kind {
      ConstraintKind::Lt => "<",
      ConstraintKind::Le => "<=",
      ConstraintKind::Eq => "=",
    };
    write!(f, "{} {op} {}", self.lhs, self.rhs)
  }
}

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Quality {
  Prop,
  SProp,
  Type,
  Var(QVar),
}

impl fmt::Display for Quality {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Quality::Prop => write!(f, "Prop"),
      Quality::SProp => write!(f, "SProp"),
      Quality::Type => write!(f, "Type"),
      Quality::Var(q) => write!(f, "{q}"),
    }
  }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum QConstraintKind {
  Eq,
  /// `lhs` may be eliminated into `rhs`.
  ElimTo,
}

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct QConstraint {
  pub lhs: Quality,
  pub kind: QConstraintKind,
  pub rhs: Quality,
}

impl fmt::Display for QConstraint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let op = match self.kind {
      QConstraintKind::Eq => "=",
      QConstraintKind::ElimTo => "~>",
    };
    write!(f, "{} {op} {}", self.lhs, self.rhs)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UniverseError {
  #[error("universe {0} is not declared")]
  Undeclared(UnivVar),
  #[error("universe {0} is already declared")]
  AlreadyDeclared(UnivVar),
  #[error("universe inconsistency: cannot enforce {0}")]
  Inconsistent(Constraint),
  #[error("sort quality {0} is not declared")]
  UndeclaredQuality(QVar),
  #[error("sort quality {0} is already declared")]
  QualityAlreadyDeclared(QVar),
  #[error("sort quality inconsistency: cannot enforce {0}")]
  QualityInconsistent(QConstraint),
}

/// A set of universe and quality variables with constraints over them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextSet {
  pub univs: BTreeSet<UnivVar>,
  pub qualities: BTreeSet<QVar>,
  pub constraints: BTreeSet<Constraint>,
  pub qconstraints: BTreeSet<QConstraint>,
}

impl ContextSet {
  pub fn empty() -> Self {
    Self::default()
  }

  pub fn of_univs<I: IntoIterator<Item = UnivVar>>(univs: I) -> Self {
    ContextSet { univs: univs.into_iter().collect(), ..Self::default() }
  }

  pub fn of_constraints<I: IntoIterator<Item = Constraint>>(cs: I) -> Self {
    ContextSet { constraints: cs.into_iter().collect(), ..Self::default() }
  }

  pub fn is_empty(&self) -> bool {
    self.univs.is_empty()
      && self.qualities.is_empty()
      && self.constraints.is_empty()
      && self.qconstraints.is_empty()
  }

  pub fn union(&self, other: &ContextSet) -> ContextSet {
    let mut out = self.clone();
    out.extend(other);
    out
  }

  pub fn extend(&mut self, other: &ContextSet) {
    self.univs.extend(other.univs.iter().cloned());
    self.qualities.extend(other.qualities.iter().cloned());
    self.constraints.extend(other.constraints.iter().cloned());
    self.qconstraints.extend(other.qconstraints.iter().cloned());
  }

  /// Everything in `self` that is not in `other`.
  pub fn difference(&self, other: &ContextSet) -> ContextSet {
    ContextSet {
      univs: self.univs.difference(&other.univs).cloned().collect(),
      qualities: self.qualities.difference(&other.qualities).cloned().collect(),
      constraints: self.constraints.difference(&other.constraints).cloned().collect(),
      qconstraints: self
        .qconstraints
        .difference(&other.qconstraints)
        .cloned()
        .collect(),
    }
  }

  /// Qualify every unqualified variable by `lib`, constraints included.
  pub fn qualify(&self, lib: &DirPath) -> ContextSet {
    let quality = |q: &Quality| match q {
      Quality::Var(v) => Quality::Var(v.qualify(lib)),
      q => q.clone(),
    };
    ContextSet {
      univs: self.univs.iter().map(|u| u.qualify(lib)).collect(),
      qualities: self.qualities.iter().map(|q| q.qualify(lib)).collect(),
      constraints: self
        .constraints
        .iter()
        .map(|c| Constraint::new(c.lhs.qualify(lib), c.kind, c.rhs.qualify(lib)))
        .collect(),
      qconstraints: self
        .qconstraints
        .iter()
        .map(|c| QConstraint { lhs: quality(&c.lhs), kind: c.kind, rhs: quality(&c.rhs) })
        .collect(),
    }
  }

  pub fn is_subset(&self, other: &ContextSet) -> bool {
    self.univs.is_subset(&other.univs)
      && self.qualities.is_subset(&other.qualities)
      && self.constraints.is_subset(&other.constraints)
      && self.qconstraints.is_subset(&other.qconstraints)
  }
}

impl fmt::Display for ContextSet {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{{")?;
    let univs = self.univs.iter().map(|u| u.to_string());
    let quals = self.qualities.iter().map(|q| q.to_string());
    write!(f, "{}", univs.chain(quals).collect::<Vec<_>>().join(" "))?;
    let cs = self.constraints.iter().map(|c| c.to_string());
    let qcs = self.qconstraints.iter().map(|c| c.to_string());
    let all: Vec<_> = cs.chain(qcs).collect();
    if !all.is_empty() {
      write!(f, " | {}", all.join(", "))?;
    }
    write!(f, "}}")
  }
}
