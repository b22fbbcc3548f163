//! The safe environment.
//!
//! An [`Environment`] is an immutable snapshot of everything the kernel has
//! accepted. Every operation takes `&self` and returns a new environment, so
//! a failed operation leaves the caller's value untouched and earlier versions
//! stay valid. Tables are persistent maps and the structure of the current
//! module is a cons-list, so versions share almost all of their state.

mod certificate;
mod cooking;
mod fields;
mod library;
mod modules;
mod opaque;
mod section;

#[cfg(test)]
mod tests;

use std::fmt;
use std::sync::Arc;

use tracing::debug;

pub use certificate::{Certificate, SideEffect};
pub use library::CompiledLibrary;
pub use modules::Include;
pub use opaque::{OpaqueCertificate, OpaqueObligation};

use crate::arena::{IdentityArena, Watermark};
use crate::codec::Digest;
use crate::codegen::{CodeBlob, CodeGen, NoCodeGen};
use crate::context::NamedContext;
use crate::declarations::{
  ConstantBody, Constructor, ModuleBody, MutIndBody, OneInductiveBody, RewriteRule,
  StructureBody, UniverseEntry,
};
use crate::error::{KernelError, KernelResult};
use crate::flags::TypingFlags;
use crate::kernel::{KernelTyper, Typer};
use crate::names::{CtorRef, DirPath, IndRef, KerName, Label, MbId, ModPath};
use crate::resolver::DeltaResolver;
use crate::univ::{Constraint, ContextSet, Level, UGraph};

use cooking::Discharge;
use opaque::OpaqueTable;

/// Everything accepted so far, addressable by canonical name.
#[derive(Debug, Clone, Default)]
pub(crate) struct Globals {
  pub(crate) constants: im::HashMap<KerName, ConstantBody>,
  pub(crate) minds: im::HashMap<KerName, MutIndBody>,
  pub(crate) modules: im::HashMap<ModPath, Arc<ModuleBody>>,
  pub(crate) modtypes: im::HashMap<ModPath, Arc<ModuleBody>>,
  pub(crate) rules: im::HashMap<KerName, Arc<Vec<RewriteRule>>>,
}

/// What kind of structure the environment is currently building.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
  TopLevel,
  Module,
  Signature,
}

/// A library loaded by `import`, kept so that loads performed inside a
/// module or section can be replayed into the enclosing scope.
pub(crate) type Load = (Arc<CompiledLibrary>, Digest);

#[derive(Debug, Clone)]
pub(crate) struct ModuleFrame {
  pub(crate) kind: Scope,
  pub(crate) label: Label,
  pub(crate) parent: Environment,
  pub(crate) params: Vec<(MbId, Arc<ModuleBody>)>,
  pub(crate) mark: Watermark,
  pub(crate) loads: Vec<Load>,
}

#[derive(Debug, Clone)]
pub(crate) struct SectionFrame {
  pub(crate) saved: Environment,
  pub(crate) entries: Vec<Discharge>,
  pub(crate) univs: ContextSet,
  pub(crate) mark: Watermark,
  pub(crate) loads: Vec<Load>,
}

#[derive(Clone)]
pub struct Environment {
  pub(crate) mp: ModPath,
  pub(crate) structure: StructureBody,
  pub(crate) labels: im::HashSet<Label>,
  pub(crate) globals: Globals,
  pub(crate) resolver: DeltaResolver,
  pub(crate) graph: UGraph,
  /// Every universe and constraint known, imported ones included.
  pub(crate) univs: ContextSet,
  /// Universes and constraints introduced by this library.
  pub(crate) own_univs: ContextSet,
  pub(crate) named_ctx: NamedContext,
  pub(crate) sections: Vec<Arc<SectionFrame>>,
  pub(crate) modules: Vec<Arc<ModuleFrame>>,
  pub(crate) opaques: OpaqueTable,
  pub(crate) required: im::Vector<(DirPath, Digest)>,
  pub(crate) flags: TypingFlags,
  pub(crate) arena: IdentityArena,
  pub(crate) typer: Arc<dyn Typer>,
  pub(crate) codegen: Arc<dyn CodeGen>,
  pub(crate) code: im::HashMap<KerName, CodeBlob>,
}

impl fmt::Debug for Environment {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Environment")
      .field("mp", &self.mp)
      .field("fields", &self.structure.len())
      .field("constants", &self.globals.constants.len())
      .field("universes", &self.graph.num_universes())
      .field("sections", &self.sections.len())
      .field("modules", &self.modules.len())
      .field("pending", &self.opaques.pending_count())
      .finish()
  }
}

impl Environment {
  /// An empty environment for the library `name`.
  pub fn new(name: DirPath) -> Self {
    Environment {
      mp: ModPath::file(name),
      structure: StructureBody::default(),
      labels: im::HashSet::new(),
      globals: Globals::default(),
      resolver: DeltaResolver::new(),
      graph: UGraph::default(),
      univs: ContextSet::empty(),
      own_univs: ContextSet::empty(),
      named_ctx: NamedContext::new(),
      sections: Vec::new(),
      modules: Vec::new(),
      opaques: OpaqueTable::default(),
      required: im::Vector::new(),
      flags: TypingFlags::default(),
      arena: IdentityArena::new(),
      typer: Arc::new(KernelTyper),
      codegen: Arc::new(NoCodeGen),
      code: im::HashMap::new(),
    }
  }

  pub fn with_typer(mut self, typer: Arc<dyn Typer>) -> Self {
    self.typer = typer;
    self
  }

  pub fn with_codegen(mut self, codegen: Arc<dyn CodeGen>) -> Self {
    self.codegen = codegen;
    self
  }

  /// Set the typing flags of a fresh environment.
  pub fn with_flags(mut self, flags: TypingFlags) -> Self {
    self.flags = flags;
    self.graph = self.graph.set_checking(flags.check_universes);
    self
  }

  /// Change the typing flags. Refused while a section is open, since cooking
  /// replays the section under the flags it was checked with.
  pub fn set_typing_flags(&self, flags: TypingFlags) -> KernelResult<Environment> {
    if !self.sections.is_empty() {
      return Err(KernelError::FlagsInSection);
    }
    debug!(?flags, "typing flags changed");
    Ok(self.clone().with_flags(flags))
  }

  // ==========================================================================
  // Accessors
  // ==========================================================================

  pub fn mp(&self) -> &ModPath {
    &self.mp
  }

  pub fn library(&self) -> &DirPath {
    match self.mp.root().as_data() {
      crate::names::ModPathData::File(dp, _) => dp,
      // The current path is always rooted at the library file.
      _ => unreachable!("environment path is not rooted at a file"),
    }
  }

  pub fn structure(&self) -> &StructureBody {
    &self.structure
  }

  pub fn flags(&self) -> &TypingFlags {
    &self.flags
  }

  pub fn graph(&self) -> &UGraph {
    &self.graph
  }

  pub fn universes(&self) -> &ContextSet {
    &self.univs
  }

  pub fn resolver(&self) -> &DeltaResolver {
    &self.resolver
  }

  pub fn named_context(&self) -> &NamedContext {
    &self.named_ctx
  }

  pub fn typer(&self) -> &dyn Typer {
    self.typer.as_ref()
  }

  pub fn required(&self) -> Vec<(DirPath, Digest)> {
    self.required.iter().cloned().collect()
  }

  pub fn scope(&self) -> Scope {
    self.modules.last().map_or(Scope::TopLevel, |f| f.kind)
  }

  pub fn sections_open(&self) -> usize {
    self.sections.len()
  }

  /// The name a field labelled `label` would get.
  pub fn next_name(&self, label: Label) -> KerName {
    KerName::new(self.mp.clone(), label)
  }

  pub fn has_label(&self, label: &Label) -> bool {
    self.labels.contains(label)
  }

  // ==========================================================================
  // Lookups
  // ==========================================================================

  pub fn lookup_constant(&self, kn: &KerName) -> Option<&ConstantBody> {
    self.globals.constants.get(kn).or_else(|| {
      let r = self.resolver.resolve_kername(kn);
      if &r == kn { None } else { self.globals.constants.get(&r) }
    })
  }

  pub fn lookup_mind(&self, kn: &KerName) -> Option<&MutIndBody> {
    self.globals.minds.get(kn).or_else(|| {
      let r = self.resolver.resolve_kername(kn);
      if &r == kn { None } else { self.globals.minds.get(&r) }
    })
  }

  pub fn lookup_inductive(&self, ind: &IndRef) -> Option<(&MutIndBody, &OneInductiveBody)> {
    let m = self.lookup_mind(&ind.mind)?;
    Some((m, m.packet(ind)?))
  }

  pub fn lookup_constructor(&self, c: &CtorRef) -> Option<&Constructor> {
    self.lookup_mind(&c.ind.mind)?.ctor(c)
  }

  pub fn lookup_module(&self, mp: &ModPath) -> Option<&Arc<ModuleBody>> {
    self
      .globals
      .modules
      .get(mp)
      .or_else(|| self.globals.modules.get(&self.resolver.resolve_module(mp)))
  }

  pub fn lookup_modtype(&self, mp: &ModPath) -> Option<&Arc<ModuleBody>> {
    self.globals.modtypes.get(mp)
  }

  pub fn code_of(&self, kn: &KerName) -> Option<&CodeBlob> {
    self.code.get(kn)
  }

  pub fn rules_for(&self, symbol: &KerName) -> &[RewriteRule] {
    let resolved = self.resolver.resolve_kername(symbol);
    match self.globals.rules.get(symbol).or_else(|| self.globals.rules.get(&resolved)) {
      Some(rules) => rules.as_slice(),
      None => &[],
    }
  }

  // ==========================================================================
  // Universes
  // ==========================================================================

  /// Declare the variables of `ctx` and enforce its constraints. In strict
  /// mode, re-declaring a known variable is an error. Inside a section the
  /// additions are recorded so that closing the section can replay them.
  pub fn push_context_set(&self, strict: bool, ctx: &ContextSet) -> KernelResult<Environment> {
    if ctx.is_empty() {
      return Ok(self.clone());
    }
    let graph = self.graph.merge_context_set(ctx, strict)?;
    let mut env = self.clone();
    env.graph = graph;
    env.univs.extend(ctx);
    env.own_univs.extend(ctx);
    if let Some(top) = env.sections.last_mut() {
      Arc::make_mut(top).univs.extend(ctx);
    }
    debug!(univs = %ctx, "universes added");
    Ok(env)
  }

  pub fn add_constraints<'c, I>(&self, cs: I) -> KernelResult<Environment>
  where
    I: IntoIterator<Item = &'c Constraint>,
  {
    self.push_context_set(false, &ContextSet::of_constraints(cs.into_iter().cloned()))
  }

  pub fn check_leq(&self, l: &Level, r: &Level) -> bool {
    !self.flags.check_universes || crate::univ::level::leq(l, r, &self.graph)
  }

  /// A scratch environment whose graph also binds the universes of a
  /// polymorphic declaration. Never stored.
  pub(crate) fn with_bound_universes(&self, entry: &UniverseEntry) -> KernelResult<Environment> {
    match entry {
      UniverseEntry::Monomorphic(_) => Ok(self.clone()),
      UniverseEntry::Polymorphic(abs) => {
        let mut env = self.clone();
        env.graph = self.graph.merge_context_set(&abs.as_context_set(), true)?;
        Ok(env)
      },
    }
  }

  // ==========================================================================
  // Scopes
  // ==========================================================================

  /// Record a library load in the innermost open scope. Sections only open
  /// inside modules, never the other way around.
  pub(crate) fn record_load(&mut self, load: Load) {
    if let Some(top) = self.sections.last_mut() {
      Arc::make_mut(top).loads.push(load);
    } else if let Some(top) = self.modules.last_mut() {
      Arc::make_mut(top).loads.push(load);
    }
  }

  /// Carry the opaque table and generated code, which outlive every scope,
  /// from `inner` into `self`.
  pub(crate) fn adopt_persistent(&mut self, inner: &Environment) {
    self.opaques = inner.opaques.clone();
    self.code = inner.code.clone();
  }

  pub(crate) fn adopt_universes(&mut self, inner: &Environment) {
    self.graph = inner.graph.clone();
    self.univs = inner.univs.clone();
    self.own_univs = inner.own_univs.clone();
  }
}
