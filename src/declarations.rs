//! Entries submitted to the environment and the bodies it stores.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::arena::EphemeralId;
use crate::cons_list::ConsList;
use crate::expr::Expr;
use crate::names::{CtorRef, Ident, IndRef, KerName, Label, MbId, ModPath};
use crate::resolver::DeltaResolver;
use crate::univ::{Constraint, ContextSet, Level, UnivVar};

// ============================================================================
// Universes
// ============================================================================

/// Universe parameters bound by a polymorphic declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AbstractUniverses {
  pub params: Vec<UnivVar>,
  pub constraints: BTreeSet<Constraint>,
}

impl AbstractUniverses {
  pub fn new(params: Vec<UnivVar>) -> Self {
    AbstractUniverses { params, constraints: BTreeSet::new() }
  }

  pub fn as_context_set(&self) -> ContextSet {
    ContextSet {
      univs: self.params.iter().cloned().collect(),
      constraints: self.constraints.clone(),
      ..ContextSet::default()
    }
  }
}

/// How an entry declares its universes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UniverseEntry {
  /// Global universes, pushed into the environment before the entry is
  /// checked.
  Monomorphic(ContextSet),
  /// Universes bound by the declaration and instantiated at every use.
  Polymorphic(AbstractUniverses),
}

impl Default for UniverseEntry {
  fn default() -> Self {
    UniverseEntry::Monomorphic(ContextSet::empty())
  }
}

impl UniverseEntry {
  pub fn to_universes(&self) -> Universes {
    match self {
      UniverseEntry::Monomorphic(_) => Universes::Monomorphic,
      UniverseEntry::Polymorphic(abs) => Universes::Polymorphic(abs.clone()),
    }
  }
}

/// The universe status of a stored body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Universes {
  #[default]
  Monomorphic,
  Polymorphic(AbstractUniverses),
}

impl Universes {
  pub fn params(&self) -> &[UnivVar] {
    match self {
      Universes::Monomorphic => &[],
      Universes::Polymorphic(abs) => &abs.params,
    }
  }

  pub fn is_polymorphic(&self) -> bool {
    matches!(self, Universes::Polymorphic(_))
  }

  /// The entry that declares these universes again. Monomorphic universes
  /// are already global, so the entry declares none.
  pub fn to_entry(&self) -> UniverseEntry {
    match self {
      Universes::Monomorphic => UniverseEntry::default(),
      Universes::Polymorphic(abs) => UniverseEntry::Polymorphic(abs.clone()),
    }
  }
}

// ============================================================================
// Constants
// ============================================================================

/// Reference to a delayed proof body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpaqueHandle(pub EphemeralId);

impl fmt::Display for OpaqueHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "opaque{}", self.0)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstantDef {
  Undef,
  Def(Expr),
  Opaque(OpaqueHandle),
  /// Head symbol of rewrite rules.
  Symbol,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantBody {
  pub name: KerName,
  pub ty: Expr,
  pub def: ConstantDef,
  pub universes: Universes,
  pub inline: bool,
}

impl ConstantBody {
  pub fn body(&self) -> Option<&Expr> {
    match &self.def {
      ConstantDef::Def(b) => Some(b),
      _ => None,
    }
  }

  /// Type instantiated at the given universe levels.
  pub fn instantiate_type(&self, levels: &[Level]) -> Expr {
    self.ty.instantiate_univs(self.universes.params(), levels)
  }

  pub fn instantiate_body(&self, levels: &[Level]) -> Option<Expr> {
    self.body().map(|b| b.instantiate_univs(self.universes.params(), levels))
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstantEntry {
  Definition {
    body: Expr,
    ty: Option<Expr>,
    universes: UniverseEntry,
    secctx: Option<Vec<Ident>>,
    inline: bool,
  },
  Parameter {
    ty: Expr,
    universes: UniverseEntry,
    secctx: Option<Vec<Ident>>,
  },
  /// A constant whose proof is supplied later through an opaque handle.
  Opaque {
    ty: Expr,
    universes: UniverseEntry,
    secctx: Option<Vec<Ident>>,
  },
  Symbol {
    ty: Expr,
    universes: UniverseEntry,
  },
}

impl ConstantEntry {
  pub fn definition(body: Expr) -> Self {
    ConstantEntry::Definition {
      body,
      ty: None,
      universes: UniverseEntry::default(),
      secctx: None,
      inline: false,
    }
  }

  pub fn typed_definition(body: Expr, ty: Expr) -> Self {
    ConstantEntry::Definition {
      body,
      ty: Some(ty),
      universes: UniverseEntry::default(),
      secctx: None,
      inline: false,
    }
  }

  pub fn parameter(ty: Expr) -> Self {
    ConstantEntry::Parameter { ty, universes: UniverseEntry::default(), secctx: None }
  }

  pub fn opaque(ty: Expr) -> Self {
    ConstantEntry::Opaque { ty, universes: UniverseEntry::default(), secctx: None }
  }

  pub fn symbol(ty: Expr) -> Self {
    ConstantEntry::Symbol { ty, universes: UniverseEntry::default() }
  }

  pub fn with_universes(mut self, entry: UniverseEntry) -> Self {
    match &mut self {
      ConstantEntry::Definition { universes, .. }
      | ConstantEntry::Parameter { universes, .. }
      | ConstantEntry::Opaque { universes, .. }
      | ConstantEntry::Symbol { universes, .. } => *universes = entry,
    }
    self
  }

  /// Declare the section variables the entry depends on.
  pub fn with_secctx(mut self, ids: Vec<Ident>) -> Self {
    match &mut self {
      ConstantEntry::Definition { secctx, .. }
      | ConstantEntry::Parameter { secctx, .. }
      | ConstantEntry::Opaque { secctx, .. } => *secctx = Some(ids),
      ConstantEntry::Symbol { .. } => {},
    }
    self
  }

  pub fn inlined(mut self) -> Self {
    if let ConstantEntry::Definition { inline, .. } = &mut self {
      *inline = true;
    }
    self
  }

  pub fn universes(&self) -> &UniverseEntry {
    match self {
      ConstantEntry::Definition { universes, .. }
      | ConstantEntry::Parameter { universes, .. }
      | ConstantEntry::Opaque { universes, .. }
      | ConstantEntry::Symbol { universes, .. } => universes,
    }
  }

  pub fn secctx(&self) -> Option<&[Ident]> {
    match self {
      ConstantEntry::Definition { secctx, .. }
      | ConstantEntry::Parameter { secctx, .. }
      | ConstantEntry::Opaque { secctx, .. } => secctx.as_deref(),
      ConstantEntry::Symbol { .. } => None,
    }
  }
}

// ============================================================================
// Inductives
// ============================================================================

/// One inductive of a mutual block, as submitted. Arity and constructor types
/// are open in the block parameters; the inductives of the block are referred
/// to by `Var` of their labels, applied to the parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneInductiveEntry {
  pub label: Label,
  pub arity: Expr,
  pub ctors: Vec<(Label, Expr)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutualInductiveEntry {
  pub params: Vec<(Ident, Expr)>,
  pub packets: Vec<OneInductiveEntry>,
  pub universes: UniverseEntry,
}

impl MutualInductiveEntry {
  /// The label of the block is the label of its first inductive.
  pub fn label(&self) -> Option<&Label> {
    self.packets.first().map(|p| &p.label)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constructor {
  pub label: Label,
  /// Open in the block parameters.
  pub ty: Expr,
  /// Closed over the block parameters.
  pub closed_ty: Expr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneInductiveBody {
  pub label: Label,
  pub arity: Expr,
  pub closed_arity: Expr,
  pub sort: Level,
  pub ctors: Vec<Constructor>,
}

impl OneInductiveBody {
  pub fn new(
    params: &[(Ident, Expr)],
    label: Label,
    arity: Expr,
    sort: Level,
    ctors: Vec<(Label, Expr)>,
  ) -> Self {
    let closed_arity = Expr::pis(params, arity.clone());
    let ctors = ctors
      .into_iter()
      .map(|(label, ty)| Constructor { label, closed_ty: Expr::pis(params, ty.clone()), ty })
      .collect();
    OneInductiveBody { label, arity, closed_arity, sort, ctors }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutIndBody {
  pub name: KerName,
  pub params: Vec<(Ident, Expr)>,
  pub packets: Vec<OneInductiveBody>,
  pub universes: Universes,
}

impl MutIndBody {
  pub fn packet(&self, ind: &IndRef) -> Option<&OneInductiveBody> {
    self.packets.get(ind.idx)
  }

  pub fn ctor(&self, c: &CtorRef) -> Option<&Constructor> {
    self.packet(&c.ind).and_then(|p| p.ctors.get(c.idx))
  }

  /// Every label the block reserves in its structure.
  pub fn labels(&self) -> impl Iterator<Item = &Label> {
    self
      .packets
      .iter()
      .flat_map(|p| std::iter::once(&p.label).chain(p.ctors.iter().map(|c| &c.label)))
  }

  /// Rebuild an entry whose recursive occurrences are `Var`s of the packet
  /// labels again.
  pub fn to_entry(&self, universes: UniverseEntry) -> MutualInductiveEntry {
    let labels: Vec<Ident> =
      self.packets.iter().map(|p| Ident::new(p.label.as_str())).collect();
    let unbind = |e: &Expr| {
      e.replace(&mut |t, _| match t.as_data() {
        crate::expr::ExprData::Ind(i, _) if i.mind == self.name => {
          labels.get(i.idx).cloned().map(Expr::var)
        },
        _ => None,
      })
    };
    MutualInductiveEntry {
      params: self.params.clone(),
      packets: self
        .packets
        .iter()
        .map(|p| OneInductiveEntry {
          label: p.label.clone(),
          arity: p.arity.clone(),
          ctors: p.ctors.iter().map(|c| (c.label.clone(), unbind(&c.ty))).collect(),
        })
        .collect(),
      universes,
    }
  }
}

// ============================================================================
// Rewrite rules
// ============================================================================

/// `lhs ~> rhs` where `lhs` is a symbol applied to patterns over
/// `pattern_vars`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteRule {
  pub pattern_vars: Vec<(Ident, Expr)>,
  pub lhs: Expr,
  pub rhs: Expr,
}

impl RewriteRule {
  pub fn head(&self) -> Option<&KerName> {
    match self.lhs.unfold_apps().0.as_data() {
      crate::expr::ExprData::Const(kn, _) => Some(kn),
      _ => None,
    }
  }

  pub fn arity(&self) -> usize {
    self.lhs.unfold_apps().1.len()
  }
}

// ============================================================================
// Structures and modules
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructureField {
  Constant(ConstantBody),
  MutInd(MutIndBody),
  Module(Arc<ModuleBody>),
  ModType(Arc<ModuleBody>),
  Rules(Vec<RewriteRule>),
}

impl StructureField {
  pub fn kind_name(&self) -> &'static str {
    match self {
      StructureField::Constant(_) => "constant",
      StructureField::MutInd(_) => "inductive",
      StructureField::Module(_) => "module",
      StructureField::ModType(_) => "module type",
      StructureField::Rules(_) => "rewrite rules",
    }
  }
}

/// Fields of a structure, most recent first.
pub type StructureBody = ConsList<(Label, StructureField)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
  Module,
  ModType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleBody {
  pub path: ModPath,
  /// Functor parameters, outermost first.
  pub params: Vec<(MbId, Arc<ModuleBody>)>,
  pub kind: ModuleKind,
  pub structure: StructureBody,
  pub delta: DeltaResolver,
  pub alias: Option<ModPath>,
}

impl ModuleBody {
  pub fn is_functor(&self) -> bool {
    !self.params.is_empty()
  }

  pub fn field(&self, label: &Label) -> Option<&StructureField> {
    self.structure.iter().find(|(l, _)| l == label).map(|(_, f)| f)
  }

  /// Fields in declaration order.
  pub fn fields(&self) -> Vec<&(Label, StructureField)> {
    let mut v: Vec<_> = self.structure.iter().collect();
    v.reverse();
    v
  }
}

/// A module expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleExpr {
  Path(ModPath),
  /// Functor application to a module path.
  Apply(Box<ModuleExpr>, ModPath),
}

impl ModuleExpr {
  pub fn apply(self, arg: ModPath) -> Self {
    ModuleExpr::Apply(Box::new(self), arg)
  }
}
