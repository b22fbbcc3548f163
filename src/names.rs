//! Labels, module paths and kernel names.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::FxHasher;

/// The name of a structure field.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(Arc<str>);

impl Label {
  pub fn new(s: &str) -> Self {
    Label(Arc::from(s))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl From<&str> for Label {
  fn from(s: &str) -> Self {
    Label::new(s)
  }
}

impl fmt::Display for Label {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl fmt::Debug for Label {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:?}", &*self.0)
  }
}

/// The name of a local variable (section variable or binder).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ident(Arc<str>);

impl Ident {
  pub fn new(s: &str) -> Self {
    Ident(Arc::from(s))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl From<&str> for Ident {
  fn from(s: &str) -> Self {
    Ident::new(s)
  }
}

impl fmt::Display for Ident {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl fmt::Debug for Ident {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:?}", &*self.0)
  }
}

/// A dotted library name such as `Stdlib.Init.Nat`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DirPath(Arc<[Label]>);

impl DirPath {
  pub fn new(parts: &[&str]) -> Self {
    DirPath(parts.iter().map(|p| Label::new(p)).collect())
  }

  pub fn from_labels(parts: Vec<Label>) -> Self {
    DirPath(parts.into())
  }

  /// Parse a dotted string; empty components are dropped.
  pub fn parse(s: &str) -> Self {
    DirPath(s.split('.').filter(|p| !p.is_empty()).map(Label::new).collect())
  }

  pub fn labels(&self) -> &[Label] {
    &self.0
  }
}

impl fmt::Display for DirPath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, l) in self.0.iter().enumerate() {
      if i > 0 {
        f.write_str(".")?;
      }
      write!(f, "{l}")?;
    }
    Ok(())
  }
}

impl fmt::Debug for DirPath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "DirPath({self})")
  }
}

/// A bound functor-parameter identifier.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct MbId {
  pub uid: u64,
  pub label: Label,
  pub lib: DirPath,
}

impl fmt::Display for MbId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}#{}", self.label, self.uid)
  }
}

// ============================================================================
// Module paths
// ============================================================================

#[derive(PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum ModPathData {
  File(DirPath, u64),
  Bound(MbId, u64),
  Dot(ModPath, Label, u64),
}

/// A hierarchical module address. The structural hash is computed once at
/// construction.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ModPath(Arc<ModPathData>);

impl ModPath {
  pub fn as_data(&self) -> &ModPathData {
    &self.0
  }

  pub fn get_hash(&self) -> u64 {
    match *self.0 {
      ModPathData::File(_, h) | ModPathData::Bound(_, h) | ModPathData::Dot(.., h) => h,
    }
  }

  pub fn file(dp: DirPath) -> Self {
    let hasher = &mut FxHasher::default();
    (3, &dp).hash(hasher);
    ModPath(Arc::new(ModPathData::File(dp, hasher.finish())))
  }

  pub fn bound(mbid: MbId) -> Self {
    let hasher = &mut FxHasher::default();
    (5, &mbid).hash(hasher);
    ModPath(Arc::new(ModPathData::Bound(mbid, hasher.finish())))
  }

  pub fn dot(&self, l: Label) -> Self {
    let hasher = &mut FxHasher::default();
    (7, self.get_hash(), &l).hash(hasher);
    ModPath(Arc::new(ModPathData::Dot(self.clone(), l, hasher.finish())))
  }

  /// The file or bound path at the root of this path.
  pub fn root(&self) -> &ModPath {
    match self.as_data() {
      ModPathData::Dot(p, ..) => p.root(),
      _ => self,
    }
  }

  pub fn is_bound(&self) -> bool {
    matches!(self.root().as_data(), ModPathData::Bound(..))
  }

  /// `true` if `prefix` equals `self` or is one of its ancestors.
  pub fn has_prefix(&self, prefix: &ModPath) -> bool {
    if self == prefix {
      return true;
    }
    match self.as_data() {
      ModPathData::Dot(p, ..) => p.has_prefix(prefix),
      _ => false,
    }
  }
}

impl Hash for ModPath {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.get_hash().hash(state);
  }
}

impl fmt::Display for ModPath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.as_data() {
      ModPathData::File(dp, _) => write!(f, "{dp}"),
      ModPathData::Bound(mbid, _) => write!(f, "{mbid}"),
      ModPathData::Dot(p, l, _) => write!(f, "{p}.{l}"),
    }
  }
}

impl fmt::Debug for ModPath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "ModPath({self})")
  }
}

// ============================================================================
// Kernel names
// ============================================================================

/// The canonical name of a constant or mutual inductive block.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KerName {
  pub path: ModPath,
  pub label: Label,
}

impl KerName {
  pub fn new(path: ModPath, label: Label) -> Self {
    KerName { path, label }
  }
}

impl fmt::Display for KerName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}", self.path, self.label)
  }
}

impl fmt::Debug for KerName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "KerName({self})")
  }
}

/// The `idx`-th inductive type of a mutual block.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct IndRef {
  pub mind: KerName,
  pub idx: usize,
}

/// The `idx`-th constructor of an inductive type.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct CtorRef {
  pub ind: IndRef,
  pub idx: usize,
}

impl fmt::Display for IndRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}[{}]", self.mind, self.idx)
  }
}

impl fmt::Display for CtorRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}", self.ind, self.idx)
  }
}
