//! Delta resolvers and module-path substitutions.
//!
//! A [`DeltaResolver`] maps names to their canonical targets: module aliases
//! rewrite path prefixes, name hints redirect single constants or give them
//! an inlinable body. A [`ModSubst`] rewrites path prefixes in everything
//! stored under a module, and is what functor application and inclusion use
//! to relocate a body.

use std::sync::Arc;

use crate::declarations::{
  ConstantBody, Constructor, MutIndBody, ModuleBody, OneInductiveBody, RewriteRule,
  StructureBody, StructureField,
};
use crate::expr::Expr;
use crate::names::{KerName, ModPath, ModPathData};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaHint {
  /// The name is another name.
  Equiv(KerName),
  /// The name may be replaced by this closed term.
  Inline(Expr),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaResolver {
  modules: im::HashMap<ModPath, ModPath>,
  names: im::HashMap<KerName, DeltaHint>,
}

impl DeltaResolver {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn is_empty(&self) -> bool {
    self.modules.is_empty() && self.names.is_empty()
  }

  pub fn add_module_alias(&self, from: ModPath, to: ModPath) -> Self {
    let mut r = self.clone();
    r.modules.insert(from, to);
    r
  }

  pub fn add_hint(&self, name: KerName, hint: DeltaHint) -> Self {
    let mut r = self.clone();
    r.names.insert(name, hint);
    r
  }

  /// Follow module aliases, the longest aliased prefix first.
  pub fn resolve_module(&self, mp: &ModPath) -> ModPath {
    if let Some(target) = self.modules.get(mp) {
      return self.resolve_module(target);
    }
    match mp.as_data() {
      ModPathData::Dot(parent, label, _) => {
        let resolved = self.resolve_module(parent);
        if &resolved == parent {
          mp.clone()
        } else {
          self.resolve_module(&resolved.dot(label.clone()))
        }
      },
      _ => mp.clone(),
    }
  }

  /// Canonical form of `kn`. Only the module path changes; the label is kept.
  pub fn resolve_kername(&self, kn: &KerName) -> KerName {
    if let Some(DeltaHint::Equiv(target)) = self.names.get(kn) {
      return self.resolve_kername(target);
    }
    let path = self.resolve_module(&kn.path);
    if path == kn.path {
      return kn.clone();
    }
    self.resolve_kername(&KerName::new(path, kn.label.clone()))
  }

  /// An inline body for `kn` or for its canonical form.
  pub fn inline_of(&self, kn: &KerName) -> Option<&Expr> {
    if let Some(DeltaHint::Inline(e)) = self.names.get(kn) {
      return Some(e);
    }
    match self.names.get(&self.resolve_kername(kn)) {
      Some(DeltaHint::Inline(e)) => Some(e),
      _ => None,
    }
  }

  /// Module aliases, sorted by source path.
  pub fn module_aliases(&self) -> Vec<(&ModPath, &ModPath)> {
    let mut v: Vec<_> = self.modules.iter().collect();
    v.sort();
    v
  }

  /// Name hints, sorted by name.
  pub fn hints(&self) -> Vec<(&KerName, &DeltaHint)> {
    let mut v: Vec<_> = self.names.iter().collect();
    v.sort_by(|a, b| a.0.cmp(b.0));
    v
  }

  /// `self` followed by `other`; entries of `other` win.
  pub fn join(&self, other: &DeltaResolver) -> DeltaResolver {
    DeltaResolver {
      modules: other.modules.clone().union(self.modules.clone()),
      names: other.names.clone().union(self.names.clone()),
    }
  }

  /// Entries keyed under `prefix`.
  pub fn restrict(&self, prefix: &ModPath) -> DeltaResolver {
    DeltaResolver {
      modules: self
        .modules
        .iter()
        .filter(|(k, _)| k.has_prefix(prefix))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect(),
      names: self
        .names
        .iter()
        .filter(|(k, _)| k.path.has_prefix(prefix))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect(),
    }
  }
}

// ============================================================================
// Substitutions
// ============================================================================

/// A prefix substitution on module paths. Pairs are tried in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModSubst(Vec<(ModPath, ModPath)>);

impl ModSubst {
  pub fn empty() -> Self {
    Self::default()
  }

  pub fn single(from: ModPath, to: ModPath) -> Self {
    ModSubst(vec![(from, to)])
  }

  pub fn add(mut self, from: ModPath, to: ModPath) -> Self {
    self.0.push((from, to));
    self
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn apply_path(&self, mp: &ModPath) -> ModPath {
    for (from, to) in &self.0 {
      if let Some(p) = replace_prefix(mp, from, to) {
        return p;
      }
    }
    mp.clone()
  }

  pub fn apply_kername(&self, kn: &KerName) -> KerName {
    KerName::new(self.apply_path(&kn.path), kn.label.clone())
  }

  pub fn apply_expr(&self, e: &Expr) -> Expr {
    if self.is_empty() {
      return e.clone();
    }
    e.map_names(&|kn| self.apply_kername(kn))
  }

  pub fn apply_constant(&self, c: &ConstantBody) -> ConstantBody {
    use crate::declarations::ConstantDef;
    ConstantBody {
      name: self.apply_kername(&c.name),
      ty: self.apply_expr(&c.ty),
      def: match &c.def {
        ConstantDef::Def(b) => ConstantDef::Def(self.apply_expr(b)),
        d => d.clone(),
      },
      universes: c.universes.clone(),
      inline: c.inline,
    }
  }

  pub fn apply_mind(&self, m: &MutIndBody) -> MutIndBody {
    let params: Vec<_> =
      m.params.iter().map(|(x, t)| (x.clone(), self.apply_expr(t))).collect();
    let packets = m
      .packets
      .iter()
      .map(|p| OneInductiveBody {
        label: p.label.clone(),
        arity: self.apply_expr(&p.arity),
        closed_arity: self.apply_expr(&p.closed_arity),
        sort: p.sort.clone(),
        ctors: p
          .ctors
          .iter()
          .map(|c| Constructor {
            label: c.label.clone(),
            ty: self.apply_expr(&c.ty),
            closed_ty: self.apply_expr(&c.closed_ty),
          })
          .collect(),
      })
      .collect();
    MutIndBody {
      name: self.apply_kername(&m.name),
      params,
      packets,
      universes: m.universes.clone(),
    }
  }

  pub fn apply_rule(&self, r: &RewriteRule) -> RewriteRule {
    RewriteRule {
      pattern_vars: r
        .pattern_vars
        .iter()
        .map(|(x, t)| (x.clone(), self.apply_expr(t)))
        .collect(),
      lhs: self.apply_expr(&r.lhs),
      rhs: self.apply_expr(&r.rhs),
    }
  }

  pub fn apply_structure(&self, s: &StructureBody) -> StructureBody {
    let fields: Vec<_> = s
      .iter()
      .map(|(l, f)| (l.clone(), self.apply_field(f)))
      .collect();
    StructureBody::from_iter(fields)
  }

  pub fn apply_field(&self, f: &StructureField) -> StructureField {
    match f {
      StructureField::Constant(c) => StructureField::Constant(self.apply_constant(c)),
      StructureField::MutInd(m) => StructureField::MutInd(self.apply_mind(m)),
      StructureField::Module(m) => StructureField::Module(Arc::new(self.apply_module(m))),
      StructureField::ModType(m) => StructureField::ModType(Arc::new(self.apply_module(m))),
      StructureField::Rules(rs) => {
        StructureField::Rules(rs.iter().map(|r| self.apply_rule(r)).collect())
      },
    }
  }

  pub fn apply_module(&self, m: &ModuleBody) -> ModuleBody {
    ModuleBody {
      path: self.apply_path(&m.path),
      params: m
        .params
        .iter()
        .map(|(mbid, sig)| (mbid.clone(), Arc::new(self.apply_module(sig))))
        .collect(),
      kind: m.kind,
      structure: self.apply_structure(&m.structure),
      delta: self.apply_resolver(&m.delta),
      alias: m.alias.as_ref().map(|a| self.apply_path(a)),
    }
  }

  pub fn apply_resolver(&self, r: &DeltaResolver) -> DeltaResolver {
    DeltaResolver {
      modules: r
        .modules
        .iter()
        .map(|(k, v)| (self.apply_path(k), self.apply_path(v)))
        .collect(),
      names: r
        .names
        .iter()
        .map(|(k, h)| {
          let h = match h {
            DeltaHint::Equiv(t) => DeltaHint::Equiv(self.apply_kername(t)),
            DeltaHint::Inline(e) => DeltaHint::Inline(self.apply_expr(e)),
          };
          (self.apply_kername(k), h)
        })
        .collect(),
    }
  }
}

fn replace_prefix(mp: &ModPath, from: &ModPath, to: &ModPath) -> Option<ModPath> {
  if mp == from {
    return Some(to.clone());
  }
  match mp.as_data() {
    ModPathData::Dot(parent, label, _) => {
      replace_prefix(parent, from, to).map(|p| p.dot(label.clone()))
    },
    _ => None,
  }
}
