//! Compiled libraries: exporting a finished environment and loading one
//! into another.

use std::sync::Arc;

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use super::Environment;
use crate::codec::{CodecError, Decoder, Digest, Encoder, Serialize};
use crate::cons_list::ConsList;
use crate::declarations::{
  AbstractUniverses, ConstantBody, ConstantDef, Constructor, ModuleBody, ModuleKind, MutIndBody,
  OneInductiveBody, OpaqueHandle, RewriteRule, StructureField, Universes,
};
use crate::error::{anomaly, Anomaly, KernelError, KernelResult};
use crate::expr::Expr;
use crate::flags::TypingFlags;
use crate::names::DirPath;
use crate::resolver::{DeltaHint, DeltaResolver};
use crate::univ::{Constraint, ContextSet, Level, UnivVar};

const MAGIC: &[u8; 4] = b"KENV";
const VERSION: u8 = 1;

/// A self-contained, fully checked library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledLibrary {
  pub name: DirPath,
  pub module: ModuleBody,
  /// Universes introduced by the library itself, not by its imports.
  pub univs: ContextSet,
  pub deps: Vec<(DirPath, Digest)>,
  pub flags: TypingFlags,
  /// Proofs of the opaque constants in `module`.
  pub opaques: Vec<(OpaqueHandle, Expr)>,
}

impl CompiledLibrary {
  pub fn to_bytes(&self) -> Vec<u8> {
    let mut enc = Encoder::new();
    enc.put_bytes(MAGIC);
    enc.put_u8(VERSION);
    self.name.put(&mut enc);
    self.module.put(&mut enc);
    self.univs.put(&mut enc);
    self.deps.put(&mut enc);
    self.flags.put(&mut enc);
    self.opaques.put(&mut enc);
    enc.finish()
  }

  pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
    let mut dec = Decoder::new(bytes);
    if dec.get_bytes(MAGIC.len(), "magic")? != MAGIC {
      return Err(CodecError::BadMagic);
    }
    match dec.get_u8("version")? {
      VERSION => {},
      v => return Err(CodecError::Version(v)),
    }
    let lib = CompiledLibrary {
      name: DirPath::get(&mut dec)?,
      module: ModuleBody::get(&mut dec)?,
      univs: ContextSet::get(&mut dec)?,
      deps: Vec::get(&mut dec)?,
      flags: TypingFlags::get(&mut dec)?,
      opaques: Vec::get(&mut dec)?,
    };
    dec.finish()?;
    Ok(lib)
  }

  pub fn digest(&self) -> Digest {
    Digest::of(&self.to_bytes())
  }
}

/// Opaque handles of a module in structure order, with the universe
/// parameters their constants bind.
fn collect_handles(m: &ModuleBody, out: &mut IndexMap<OpaqueHandle, Vec<UnivVar>>) {
  for (_, sig) in &m.params {
    collect_handles(sig, out);
  }
  for (_, field) in m.fields() {
    match field {
      StructureField::Constant(c) => {
        if let ConstantDef::Opaque(h) = &c.def {
          out.insert(*h, c.universes.params().to_vec());
        }
      },
      StructureField::Module(sub) | StructureField::ModType(sub) => collect_handles(sub, out),
      StructureField::MutInd(_) | StructureField::Rules(_) => {},
    }
  }
}

/// What changes when a library is loaded: its opaque handles become handles
/// of the loading environment and the universes it declared itself are
/// qualified by its name. Universes of its own imports are qualified already.
struct Relocation<'a> {
  lib: &'a DirPath,
  handles: FxHashMap<OpaqueHandle, OpaqueHandle>,
}

impl Relocation<'_> {
  fn univ(&self, u: &UnivVar, bound: &[UnivVar]) -> UnivVar {
    if bound.contains(u) { u.clone() } else { u.qualify(self.lib) }
  }

  fn level(&self, l: &Level, bound: &[UnivVar]) -> Level {
    l.subst(&|u| Some(Level::var(self.univ(u, bound))))
  }

  fn expr(&self, e: &Expr, bound: &[UnivVar]) -> Expr {
    e.subst_levels(&|u| Some(Level::var(self.univ(u, bound))))
  }

  fn universes(&self, us: &Universes) -> Universes {
    match us {
      Universes::Monomorphic => Universes::Monomorphic,
      Universes::Polymorphic(abs) => {
        let bound = &abs.params;
        let constraints = abs
          .constraints
          .iter()
          .map(|c| Constraint::new(self.univ(&c.lhs, bound), c.kind, self.univ(&c.rhs, bound)))
          .collect();
        Universes::Polymorphic(AbstractUniverses { params: bound.clone(), constraints })
      },
    }
  }

  fn constant(&self, c: &ConstantBody) -> ConstantBody {
    let bound = c.universes.params();
    let def = match &c.def {
      ConstantDef::Def(b) => ConstantDef::Def(self.expr(b, bound)),
      ConstantDef::Opaque(h) => ConstantDef::Opaque(self.handles.get(h).copied().unwrap_or(*h)),
      d => d.clone(),
    };
    ConstantBody {
      name: c.name.clone(),
      ty: self.expr(&c.ty, bound),
      def,
      universes: self.universes(&c.universes),
      inline: c.inline,
    }
  }

  fn mind(&self, m: &MutIndBody) -> MutIndBody {
    let bound = m.universes.params();
    let packets = m
      .packets
      .iter()
      .map(|p| OneInductiveBody {
        label: p.label.clone(),
        arity: self.expr(&p.arity, bound),
        closed_arity: self.expr(&p.closed_arity, bound),
        sort: self.level(&p.sort, bound),
        ctors: p
          .ctors
          .iter()
          .map(|c| Constructor {
            label: c.label.clone(),
            ty: self.expr(&c.ty, bound),
            closed_ty: self.expr(&c.closed_ty, bound),
          })
          .collect(),
      })
      .collect();
    MutIndBody {
      name: m.name.clone(),
      params: m.params.iter().map(|(x, t)| (x.clone(), self.expr(t, bound))).collect(),
      packets,
      universes: self.universes(&m.universes),
    }
  }

  fn rule(&self, r: &RewriteRule) -> RewriteRule {
    RewriteRule {
      pattern_vars: r.pattern_vars.iter().map(|(x, t)| (x.clone(), self.expr(t, &[]))).collect(),
      lhs: self.expr(&r.lhs, &[]),
      rhs: self.expr(&r.rhs, &[]),
    }
  }

  fn resolver(&self, r: &DeltaResolver) -> DeltaResolver {
    let mut out = DeltaResolver::new();
    for (from, to) in r.module_aliases() {
      out = out.add_module_alias(from.clone(), to.clone());
    }
    for (kn, hint) in r.hints() {
      let hint = match hint {
        DeltaHint::Inline(e) => DeltaHint::Inline(self.expr(e, &[])),
        h => h.clone(),
      };
      out = out.add_hint(kn.clone(), hint);
    }
    out
  }

  fn module(&self, m: &ModuleBody) -> ModuleBody {
    let params = m.params.iter().map(|(id, sig)| (id.clone(), Arc::new(self.module(sig))));
    let fields: Vec<_> = m
      .structure
      .iter()
      .map(|(l, field)| {
        let field = match field {
          StructureField::Constant(c) => StructureField::Constant(self.constant(c)),
          StructureField::MutInd(mi) => StructureField::MutInd(self.mind(mi)),
          StructureField::Module(sub) => StructureField::Module(Arc::new(self.module(sub))),
          StructureField::ModType(sub) => StructureField::ModType(Arc::new(self.module(sub))),
          StructureField::Rules(rs) => {
            StructureField::Rules(rs.iter().map(|r| self.rule(r)).collect())
          },
        };
        (l.clone(), field)
      })
      .collect();
    ModuleBody {
      params: params.collect(),
      structure: ConsList::from_iter(fields),
      delta: self.resolver(&m.delta),
      ..m.clone()
    }
  }
}

impl Environment {
  /// Package the current library. Every module and section must be closed
  /// and every opaque proof filled.
  pub fn export(&self) -> KernelResult<CompiledLibrary> {
    if !self.modules.is_empty() || !self.sections.is_empty() {
      return Err(KernelError::OpenScopes);
    }
    if !self.is_fully_checked() {
      return Err(KernelError::PendingObligations(self.opaques.pending_count()));
    }
    let module = ModuleBody {
      path: self.mp.clone(),
      params: Vec::new(),
      kind: ModuleKind::Module,
      structure: self.structure.clone(),
      delta: self.resolver.restrict(&self.mp),
      alias: None,
    };
    let mut handles = IndexMap::new();
    collect_handles(&module, &mut handles);
    let mut opaques = Vec::with_capacity(handles.len());
    for h in handles.into_keys() {
      let body = self.opaques.body(&h).ok_or_else(|| anomaly(Anomaly::UnknownHandle(h)))?;
      opaques.push((h, body.clone()));
    }
    let lib = CompiledLibrary {
      name: self.library().clone(),
      module,
      univs: self.own_univs.clone(),
      deps: self.required(),
      flags: self.flags,
      opaques,
    };
    info!(lib = %lib.name, fields = self.structure.len(), "library exported");
    Ok(lib)
  }

  /// Load a compiled library whose encoding hashes to `digest`. Its
  /// dependencies must already be loaded with the same digests.
  pub fn import(&self, lib: &CompiledLibrary, digest: Digest) -> KernelResult<Environment> {
    let found = lib.digest();
    if found != digest {
      return Err(KernelError::DigestMismatch { lib: lib.name.clone(), expected: digest, found });
    }
    if let Some((_, d)) = self.required.iter().find(|(dp, _)| dp == &lib.name) {
      if *d == digest {
        debug!(lib = %lib.name, "library already loaded");
        return Ok(self.clone());
      }
      return Err(KernelError::DigestMismatch { lib: lib.name.clone(), expected: *d, found });
    }
    for (dep, expected) in &lib.deps {
      match self.required.iter().find(|(dp, _)| dp == dep) {
        None => return Err(KernelError::UnknownLibrary(dep.clone())),
        Some((_, d)) if d != expected => {
          return Err(KernelError::DigestMismatch {
            lib: dep.clone(),
            expected: *expected,
            found: *d,
          });
        },
        Some(_) => {},
      }
    }
    if lib.flags != self.flags {
      return Err(KernelError::FlagsMismatch(lib.name.clone()));
    }

    let mut bound = IndexMap::new();
    collect_handles(&lib.module, &mut bound);
    let handles = lib.opaques.iter().map(|(h, _)| (*h, OpaqueHandle(self.arena.mint()))).collect();
    let reloc = Relocation { lib: &lib.name, handles };
    let module = Arc::new(reloc.module(&lib.module));
    let univs = lib.univs.qualify(&lib.name);

    let mut env = self.clone();
    env.graph = self.graph.merge_context_set(&univs, true)?;
    env.univs.extend(&univs);
    for (h, body) in &lib.opaques {
      if let Some(fresh) = reloc.handles.get(h) {
        let params = bound.get(h).map_or(&[][..], Vec::as_slice);
        env.opaques.insert_body(*fresh, reloc.expr(body, params));
      }
    }
    env.register_module(&module);
    env.resolver = env.resolver.join(&module.delta);
    env.required.push_back((lib.name.clone(), digest));
    env.record_load((Arc::new(lib.clone()), digest));
    info!(lib = %lib.name, %digest, "library loaded");
    Ok(env)
  }
}
