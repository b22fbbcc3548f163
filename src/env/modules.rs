//! Modules, module types, functors and inclusion.

use std::sync::Arc;

use tracing::debug;

use super::{Environment, ModuleFrame, Scope};
use crate::context::NamedContext;
use crate::declarations::{
  ConstantDef, ModuleBody, ModuleExpr, ModuleKind, StructureBody, StructureField,
};
use crate::error::{KernelError, KernelResult};
use crate::kernel::TypeChecker;
use crate::names::{KerName, Label, MbId, ModPath};
use crate::resolver::{DeltaHint, DeltaResolver, ModSubst};

/// What `add_include` splices into the current structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Include {
  Module(ModuleExpr),
  ModType(ModPath),
}

impl Environment {
  // ==========================================================================
  // Interactive modules
  // ==========================================================================

  pub fn start_module(&self, label: Label) -> KernelResult<(ModPath, Environment)> {
    self.start_scope(Scope::Module, label)
  }

  pub fn start_modtype(&self, label: Label) -> KernelResult<(ModPath, Environment)> {
    self.start_scope(Scope::Signature, label)
  }

  fn start_scope(&self, kind: Scope, label: Label) -> KernelResult<(ModPath, Environment)> {
    if !self.sections.is_empty() {
      return Err(KernelError::ModuleInSection);
    }
    self.check_label(&label)?;
    let mp = self.mp.dot(label.clone());
    let mut env = self.clone();
    env.mp = mp.clone();
    env.structure = StructureBody::default();
    env.labels = im::HashSet::new();
    env.modules.push(Arc::new(ModuleFrame {
      kind,
      label,
      parent: self.clone(),
      params: Vec::new(),
      mark: self.arena.watermark(),
      loads: Vec::new(),
    }));
    debug!(%mp, ?kind, "module started");
    Ok((mp, env))
  }

  /// Bind a functor parameter of type `mtype` in the module being built.
  /// Parameters come before every field.
  pub fn add_module_parameter(
    &self,
    label: Label,
    mtype: &ModPath,
  ) -> KernelResult<(MbId, Environment)> {
    if self.modules.is_empty() {
      return Err(KernelError::NoOpenModule("module"));
    }
    if !self.structure.is_empty() {
      return Err(KernelError::ParameterAfterField(label));
    }
    let sig =
      self.lookup_modtype(mtype).ok_or_else(|| KernelError::NotAModuleType(mtype.clone()))?;
    if sig.is_functor() {
      return Err(KernelError::NotAModuleType(mtype.clone()));
    }
    let mbid = MbId { uid: self.arena.fresh_uid(), label, lib: self.library().clone() };
    let mp = ModPath::bound(mbid.clone());
    let mut body = ModSubst::single(sig.path.clone(), mp.clone()).apply_module(sig);
    body.kind = ModuleKind::Module;
    let body = Arc::new(body);
    let mut env = self.clone();
    env.register_module(&body);
    if let Some(top) = env.modules.last_mut() {
      Arc::make_mut(top).params.push((mbid.clone(), body));
    }
    debug!(%mbid, "functor parameter bound");
    Ok((mbid, env))
  }

  pub fn end_module(&self) -> KernelResult<(ModPath, Environment)> {
    self.end_scope(Scope::Module)
  }

  pub fn end_modtype(&self) -> KernelResult<(ModPath, Environment)> {
    self.end_scope(Scope::Signature)
  }

  fn end_scope(&self, kind: Scope) -> KernelResult<(ModPath, Environment)> {
    let what = match kind {
      Scope::Signature => "module type",
      _ => "module",
    };
    let frame = match self.modules.last() {
      Some(f) if f.kind == kind => f.clone(),
      _ => return Err(KernelError::NoOpenModule(what)),
    };
    if !self.sections.is_empty() {
      return Err(KernelError::ScopeNesting("section"));
    }
    let body = Arc::new(ModuleBody {
      path: self.mp.clone(),
      params: frame.params.clone(),
      kind: match kind {
        Scope::Signature => ModuleKind::ModType,
        _ => ModuleKind::Module,
      },
      structure: self.structure.clone(),
      delta: self.resolver.restrict(&self.mp),
      alias: None,
    });

    let mut env = frame.parent.clone();
    env.adopt_persistent(self);
    env.adopt_universes(self);
    if kind == Scope::Module && !body.is_functor() {
      // Everything the module accepted stays reachable by name.
      env.globals = self.globals.clone();
      env.resolver = self.resolver.clone();
      env.required = self.required.clone();
      for load in &frame.loads {
        env.record_load(load.clone());
      }
    } else {
      for (lib, digest) in &frame.loads {
        env = env.import(lib, *digest)?;
      }
      env.resolver = env.resolver.join(&body.delta);
    }
    let field = match kind {
      Scope::Signature => StructureField::ModType(body),
      _ => StructureField::Module(body),
    };
    env = env.push_field(frame.label.clone(), field)?;
    self.arena.revoke_from(frame.mark);
    debug!(mp = %self.mp, "module ended");
    Ok((self.mp.clone(), env))
  }

  // ==========================================================================
  // Non-interactive modules
  // ==========================================================================

  /// Add a module defined by a module expression: an alias of an existing
  /// module or a functor application.
  pub fn add_module(
    &self,
    label: Label,
    expr: &ModuleExpr,
  ) -> KernelResult<(ModPath, Environment)> {
    if !self.sections.is_empty() {
      return Err(KernelError::ModuleInSection);
    }
    self.check_label(&label)?;
    let mp = self.mp.dot(label.clone());
    let evaluated = self.eval_module_expr(expr)?;
    let mut body = ModSubst::single(evaluated.path.clone(), mp.clone()).apply_module(&evaluated);
    let mut env = self.clone();
    if let ModuleExpr::Path(target) = expr {
      let target = self.resolver.resolve_module(target);
      body.alias = Some(target.clone());
      env.resolver = env.resolver.add_module_alias(mp.clone(), target);
    }
    let env = env.push_field(label, StructureField::Module(Arc::new(body)))?;
    debug!(%mp, "module added");
    Ok((mp, env))
  }

  /// Add a module type equal to the module type at `path`.
  pub fn add_modtype(&self, label: Label, path: &ModPath) -> KernelResult<(ModPath, Environment)> {
    if !self.sections.is_empty() {
      return Err(KernelError::ModuleInSection);
    }
    self.check_label(&label)?;
    let mp = self.mp.dot(label.clone());
    let sig = self.lookup_modtype(path).ok_or_else(|| KernelError::NotAModuleType(path.clone()))?;
    let body = ModSubst::single(sig.path.clone(), mp.clone()).apply_module(sig);
    let env = self.push_field(label, StructureField::ModType(Arc::new(body)))?;
    Ok((mp, env))
  }

  /// Evaluate a module expression to a body that still lives at the path of
  /// its head module.
  fn eval_module_expr(&self, expr: &ModuleExpr) -> KernelResult<ModuleBody> {
    match expr {
      ModuleExpr::Path(mp) => {
        let m = self.lookup_module(mp).ok_or_else(|| KernelError::NotAModule(mp.clone()))?;
        Ok(m.as_ref().clone())
      },
      ModuleExpr::Apply(f, arg) => {
        let fb = self.eval_module_expr(f)?;
        let Some((mbid, sig)) = fb.params.first().cloned() else {
          return Err(KernelError::NotAFunctor(fb.path.clone()));
        };
        let argb = self.lookup_module(arg).ok_or_else(|| KernelError::NotAModule(arg.clone()))?;
        if argb.is_functor() {
          return Err(KernelError::NotAModule(arg.clone()));
        }
        self.check_subtype(argb, &sig)?;
        let subst = ModSubst::single(ModPath::bound(mbid), self.resolver.resolve_module(arg));
        let rest = ModuleBody { params: fb.params[1..].to_vec(), ..fb };
        Ok(subst.apply_module(&rest))
      },
    }
  }

  /// Splice the fields of a module or module type into the current
  /// structure. A functor of one parameter is instantiated with the current
  /// structure itself, which must satisfy the parameter's signature.
  pub fn add_include(&self, inc: &Include) -> KernelResult<Environment> {
    if self.modules.is_empty() {
      return Err(KernelError::NoOpenModule("module"));
    }
    if !self.sections.is_empty() {
      return Err(KernelError::ModuleInSection);
    }
    let body = match inc {
      Include::Module(e) => self.eval_module_expr(e)?,
      Include::ModType(p) => {
        let sig = self.lookup_modtype(p).ok_or_else(|| KernelError::NotAModuleType(p.clone()))?;
        sig.as_ref().clone()
      },
    };
    if body.params.len() > 1 {
      return Err(KernelError::BadInclude {
        path: body.path.clone(),
        reason: format!("functor takes {} parameters", body.params.len()),
      });
    }
    let body = match body.params.first().cloned() {
      None => body,
      Some((mbid, sig)) => {
        let current = ModuleBody {
          path: self.mp.clone(),
          params: Vec::new(),
          kind: ModuleKind::Module,
          structure: self.structure.clone(),
          delta: DeltaResolver::new(),
          alias: None,
        };
        self.check_subtype(&current, &sig)?;
        let subst = ModSubst::single(ModPath::bound(mbid), self.mp.clone());
        subst.apply_module(&ModuleBody { params: Vec::new(), ..body })
      },
    };
    let subst = ModSubst::single(body.path.clone(), self.mp.clone());
    let mut env = self.clone();
    for (label, field) in body.fields() {
      let field = subst.apply_field(field);
      let hints: Vec<Label> = match &field {
        StructureField::Constant(_) => vec![label.clone()],
        StructureField::MutInd(m) => vec![m.name.label.clone()],
        _ => Vec::new(),
      };
      if let StructureField::Module(_) | StructureField::ModType(_) = &field {
        env.resolver =
          env.resolver.add_module_alias(body.path.dot(label.clone()), self.mp.dot(label.clone()));
      }
      env = env.push_field(label.clone(), field)?;
      for l in hints {
        let from = KerName::new(body.path.clone(), l.clone());
        env.resolver = env.resolver.add_hint(from, DeltaHint::Equiv(self.next_name(l)));
      }
    }
    debug!(from = %body.path, into = %self.mp, "structure included");
    Ok(env)
  }

  // ==========================================================================
  // Helpers
  // ==========================================================================

  /// Add a finished field of any kind.
  pub(crate) fn push_field(
    &self,
    label: Label,
    field: StructureField,
  ) -> KernelResult<Environment> {
    match field {
      StructureField::Constant(c) => self.push_constant(label, c, None),
      StructureField::MutInd(m) => {
        let universes = m.universes.to_entry();
        self.push_mind(m, universes)
      },
      StructureField::Rules(rs) => {
        self.check_label(&label)?;
        let mut env = self.clone();
        env.push_rules(label, rs);
        Ok(env)
      },
      StructureField::Module(body) => {
        self.check_label(&label)?;
        let mut env = self.clone();
        env.register_module(&body);
        env.labels.insert(label.clone());
        env.structure = env.structure.cons((label, StructureField::Module(body)));
        Ok(env)
      },
      StructureField::ModType(body) => {
        self.check_label(&label)?;
        let mut env = self.clone();
        env.globals.modtypes.insert(body.path.clone(), body.clone());
        env.labels.insert(label.clone());
        env.structure = env.structure.cons((label, StructureField::ModType(body)));
        Ok(env)
      },
    }
  }

  /// Make a module and, unless it is a functor, everything in it reachable
  /// by name.
  pub(crate) fn register_module(&mut self, body: &Arc<ModuleBody>) {
    self.globals.modules.insert(body.path.clone(), body.clone());
    if body.is_functor() {
      return;
    }
    for (_, field) in body.structure.iter() {
      match field {
        StructureField::Constant(c) => {
          self.globals.constants.insert(c.name.clone(), c.clone());
        },
        StructureField::MutInd(m) => {
          self.globals.minds.insert(m.name.clone(), m.clone());
        },
        StructureField::Module(sub) => self.register_module(sub),
        StructureField::ModType(t) => {
          self.globals.modtypes.insert(t.path.clone(), t.clone());
        },
        StructureField::Rules(rs) => {
          for rule in rs {
            if let Some(head) = rule.head() {
              let mut v =
                self.globals.rules.get(head).map(|r| r.as_ref().clone()).unwrap_or_default();
              v.push(rule.clone());
              self.globals.rules.insert(head.clone(), Arc::new(v));
            }
          }
        },
      }
    }
  }

  /// Check that `m` implements every field of the signature `sig`.
  pub(crate) fn check_subtype(&self, m: &ModuleBody, sig: &ModuleBody) -> KernelResult<()> {
    let subst = ModSubst::single(sig.path.clone(), m.path.clone());
    let mismatch = |label: &Label, reason: String| KernelError::SignatureMismatch {
      label: label.clone(),
      reason,
    };
    let mut tc = TypeChecker::new(self, NamedContext::new());
    for (label, sfield) in sig.fields() {
      let Some(ifield) = m.field(label) else {
        return Err(mismatch(label, "missing field".into()));
      };
      match (sfield, ifield) {
        (StructureField::Constant(sc), StructureField::Constant(ic)) => {
          if sc.universes.params().len() != ic.universes.params().len() {
            return Err(mismatch(label, "universe arity differs".into()));
          }
          let sty = subst.apply_expr(&sc.ty);
          if !tc.is_leq(&ic.ty, &sty) {
            return Err(mismatch(label, format!("{} is not {}", ic.ty, sty)));
          }
          if let ConstantDef::Def(sb) = &sc.def {
            let sb = subst.apply_expr(sb);
            let same = ic.body().is_some_and(|ib| tc.is_def_eq(ib, &sb));
            if !same {
              return Err(mismatch(label, "definitions differ".into()));
            }
          }
        },
        (StructureField::MutInd(sm), StructureField::MutInd(im)) => {
          let sm = subst.apply_mind(sm);
          let shape = sm.params.len() == im.params.len()
            && sm.packets.len() == im.packets.len()
            && sm.packets.iter().zip(&im.packets).all(|(s, i)| s.ctors.len() == i.ctors.len());
          if !shape {
            return Err(mismatch(label, "inductive blocks differ in shape".into()));
          }
          for (s, i) in sm.packets.iter().zip(&im.packets) {
            let ctors_ok = s
              .ctors
              .iter()
              .zip(&i.ctors)
              .all(|(sc, ic)| tc.is_def_eq(&sc.closed_ty, &ic.closed_ty));
            if !tc.is_def_eq(&s.closed_arity, &i.closed_arity) || !ctors_ok {
              return Err(mismatch(label, format!("inductive {} differs", s.label)));
            }
          }
        },
        (StructureField::Module(ss), StructureField::Module(is)) => {
          self.check_subtype(is, &subst.apply_module(ss))?;
        },
        (StructureField::ModType(_), StructureField::ModType(_))
        | (StructureField::Rules(_), StructureField::Rules(_)) => {},
        (s, i) => {
          let reason = format!("expected a {}, found a {}", s.kind_name(), i.kind_name());
          return Err(mismatch(label, reason));
        },
      }
    }
    if !tc.constraints().is_empty() {
      return Err(KernelError::UndeclaredConstraints(m.path.to_string()));
    }
    Ok(())
  }
}
