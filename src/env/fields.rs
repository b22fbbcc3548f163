//! Adding constants, inductive blocks and rewrite rules to the current
//! structure.

use std::collections::BTreeSet;
use std::sync::Arc;

use indexmap::IndexSet;
use tracing::debug;

use super::cooking::Discharge;
use super::opaque::OpaqueObligation;
use super::Environment;
use crate::context::{NamedContext, NamedDecl};
use crate::declarations::{
  ConstantBody, ConstantDef, ConstantEntry, MutIndBody, MutualInductiveEntry, OpaqueHandle,
  RewriteRule, StructureField, UniverseEntry,
};
use crate::error::{KernelError, KernelResult};
use crate::expr::ExprData;
use crate::kernel::{check_inductive, InductiveError, TypeError};
use crate::names::{Ident, KerName, Label};
use crate::resolver::DeltaHint;
use crate::univ::{Constraint, ContextSet};

impl Environment {
  pub(crate) fn check_label(&self, label: &Label) -> KernelResult<()> {
    if self.labels.contains(label) {
      return Err(KernelError::DuplicateLabel(label.clone()));
    }
    Ok(())
  }

  /// The section context an entry is checked in: the whole named context, or
  /// the closure of the declared variables.
  pub(crate) fn section_context(&self, secctx: Option<&[Ident]>) -> KernelResult<NamedContext> {
    let Some(ids) = secctx else {
      return Ok(self.named_ctx.clone());
    };
    if let Some(x) = ids.iter().find(|x| !self.named_ctx.contains(x)) {
      return Err(KernelError::typing(x, TypeError::UnknownVar(x.clone())));
    }
    let keep: IndexSet<Ident> = self.named_ctx.dependency_closure(ids).into_iter().collect();
    Ok(self.named_ctx.filter(|x| keep.contains(x)))
  }

  /// Residual constraints of a checked declaration. Monomorphic ones go to
  /// the graph; polymorphic ones must already be declared.
  fn settle_constraints(
    &self,
    name: &KerName,
    universes: &UniverseEntry,
    cs: &BTreeSet<Constraint>,
  ) -> KernelResult<Environment> {
    match universes {
      UniverseEntry::Monomorphic(_) => self.add_constraints(cs),
      UniverseEntry::Polymorphic(abs) => {
        if cs.is_subset(&abs.constraints) {
          Ok(self.clone())
        } else {
          Err(KernelError::UndeclaredConstraints(name.to_string()))
        }
      },
    }
  }

  /// Type-check `entry` under the name `name`. Returns the body to store and
  /// the environment extended with the entry's monomorphic universes.
  pub(crate) fn check_constant_entry(
    &self,
    name: &KerName,
    entry: &ConstantEntry,
  ) -> KernelResult<(ConstantBody, Environment)> {
    let universes = entry.universes();
    let env = match universes {
      UniverseEntry::Monomorphic(ctx) => self.push_context_set(true, ctx)?,
      UniverseEntry::Polymorphic(_) => self.clone(),
    };
    let cenv = env.with_bound_universes(universes)?;
    let ctx = self.section_context(entry.secctx())?;
    let typer = self.typer.as_ref();
    let err = |e| KernelError::typing(name, e);

    let (ty, def, inline, cs) = match entry {
      ConstantEntry::Definition { body, ty, inline, .. } => {
        let j = typer.infer(&cenv, &ctx, body).map_err(err)?;
        let mut cs = j.constraints;
        let ty = match ty {
          Some(ty) => {
            let (_, sort_cs) = typer.infer_sort(&cenv, &ctx, ty).map_err(err)?;
            cs.extend(sort_cs);
            cs.extend(typer.conv_leq(&cenv, &ctx, &j.ty, ty).map_err(err)?);
            ty.clone()
          },
          None => j.ty,
        };
        (ty, ConstantDef::Def(body.clone()), *inline, cs)
      },
      ConstantEntry::Parameter { ty, .. } | ConstantEntry::Opaque { ty, .. } => {
        let (_, cs) = typer.infer_sort(&cenv, &ctx, ty).map_err(err)?;
        (ty.clone(), ConstantDef::Undef, false, cs)
      },
      ConstantEntry::Symbol { ty, .. } => {
        if !self.flags.allow_rewrite_rules {
          return Err(KernelError::RewriteRulesDisabled);
        }
        let (_, cs) = typer.infer_sort(&cenv, &ctx, ty).map_err(err)?;
        (ty.clone(), ConstantDef::Symbol, false, cs)
      },
    };
    let env = env.settle_constraints(name, universes, &cs)?;
    let body =
      ConstantBody { name: name.clone(), ty, def, universes: universes.to_universes(), inline };
    Ok((body, env))
  }

  /// Check and add a constant labelled `label` to the current structure.
  pub fn add_constant(
    &self,
    label: Label,
    entry: ConstantEntry,
  ) -> KernelResult<(KerName, Environment)> {
    self.add_constant_entry(label, entry, None)
  }

  /// `add_constant`, reusing `handle` for an opaque entry instead of opening
  /// a new obligation. Used when cooking replays a section.
  pub(crate) fn add_constant_entry(
    &self,
    label: Label,
    entry: ConstantEntry,
    handle: Option<OpaqueHandle>,
  ) -> KernelResult<(KerName, Environment)> {
    self.check_label(&label)?;
    let name = self.next_name(label.clone());
    let (mut body, mut env) = self.check_constant_entry(&name, &entry)?;
    if let ConstantEntry::Opaque { universes, secctx, .. } = &entry {
      let handle = match handle {
        Some(h) => h,
        None => {
          let h = OpaqueHandle(self.arena.mint());
          let obligation = OpaqueObligation {
            owner: name.clone(),
            ty: body.ty.clone(),
            ctx: self.section_context(secctx.as_deref())?,
            universes: universes.clone(),
            nonce: self.arena.mint(),
            snapshot: Arc::new(env.clone()),
            cooking: Vec::new(),
          };
          env.opaques = env.opaques.open(h, obligation);
          h
        },
      };
      body.def = ConstantDef::Opaque(handle);
    }
    let secctx = entry.secctx().map(<[Ident]>::to_vec);
    let env = env.push_constant(label, body, secctx)?;
    Ok((name, env))
  }

  /// Store an already checked constant.
  pub(crate) fn push_constant(
    &self,
    label: Label,
    body: ConstantBody,
    secctx: Option<Vec<Ident>>,
  ) -> KernelResult<Environment> {
    self.check_label(&label)?;
    let mut env = self.clone();
    let name = body.name.clone();
    if let (true, ConstantDef::Def(b)) = (body.inline, &body.def) {
      if b.free_vars().is_empty() && !body.universes.is_polymorphic() {
        env.resolver = env.resolver.add_hint(name.clone(), DeltaHint::Inline(b.clone()));
      }
    }
    if let Some(code) = env.codegen.compile(&body) {
      env.code.insert(name.clone(), code);
    }
    env.globals.constants.insert(name.clone(), body.clone());
    env.labels.insert(label.clone());
    env.structure = env.structure.cons((label.clone(), StructureField::Constant(body.clone())));
    if let Some(top) = env.sections.last_mut() {
      Arc::make_mut(top).entries.push(Discharge::Constant { label, body, secctx });
    }
    debug!(%name, "constant added");
    Ok(env)
  }

  // ==========================================================================
  // Inductives
  // ==========================================================================

  /// Check and add a mutual inductive block. The block is named after its
  /// first inductive; every inductive and constructor label is reserved.
  pub fn add_mind(&self, entry: MutualInductiveEntry) -> KernelResult<(KerName, Environment)> {
    let label = match entry.label() {
      Some(l) => l.clone(),
      None => {
        return Err(KernelError::Inductive {
          name: Label::new("_"),
          source: InductiveError::Empty,
        });
      },
    };
    let mut seen = IndexSet::new();
    for p in &entry.packets {
      for l in std::iter::once(&p.label).chain(p.ctors.iter().map(|(l, _)| l)) {
        self.check_label(l)?;
        if !seen.insert(l.clone()) {
          return Err(KernelError::DuplicateLabel(l.clone()));
        }
      }
    }
    let name = self.next_name(label.clone());
    let env = match &entry.universes {
      UniverseEntry::Monomorphic(ctx) => self.push_context_set(true, ctx)?,
      UniverseEntry::Polymorphic(_) => self.clone(),
    };
    let cenv = env.with_bound_universes(&entry.universes)?;
    let (body, cs) = check_inductive(&cenv, &self.named_ctx, &name, &entry)
      .map_err(|source| KernelError::Inductive { name: label, source })?;
    let env = env.settle_constraints(&name, &entry.universes, &cs)?;
    let env = env.push_mind(body, entry.universes)?;
    Ok((name, env))
  }

  pub(crate) fn push_mind(
    &self,
    body: MutIndBody,
    universes: UniverseEntry,
  ) -> KernelResult<Environment> {
    for l in body.labels() {
      self.check_label(l)?;
    }
    let label = body.name.label.clone();
    let mut env = self.clone();
    for l in body.labels() {
      env.labels.insert(l.clone());
    }
    env.globals.minds.insert(body.name.clone(), body.clone());
    env.structure = env.structure.cons((label, StructureField::MutInd(body.clone())));
    debug!(name = %body.name, packets = body.packets.len(), "inductive block added");
    if let Some(top) = env.sections.last_mut() {
      Arc::make_mut(top).entries.push(Discharge::Mind { body, universes });
    }
    Ok(env)
  }

  // ==========================================================================
  // Rewrite rules
  // ==========================================================================

  /// Add a block of rewrite rules. Every rule rewrites an application of a
  /// symbol; pattern variables occur once in the left-hand side and both
  /// sides must have convertible types.
  pub fn add_rewrite_rules(
    &self,
    label: Label,
    rules: Vec<RewriteRule>,
  ) -> KernelResult<Environment> {
    if !self.flags.allow_rewrite_rules {
      return Err(KernelError::RewriteRulesDisabled);
    }
    if !self.sections.is_empty() {
      return Err(KernelError::RulesInSection);
    }
    self.check_label(&label)?;
    let mut cs = BTreeSet::new();
    for rule in &rules {
      cs.extend(self.check_rule(rule)?);
    }
    let mut env = self.add_constraints(&cs)?;
    env.push_rules(label, rules);
    Ok(env)
  }

  fn check_rule(&self, rule: &RewriteRule) -> KernelResult<BTreeSet<Constraint>> {
    let bad = |msg: String| KernelError::BadRewriteRule(msg);
    let head = rule.head().ok_or_else(|| bad(format!("{} is not headed by a symbol", rule.lhs)))?;
    match self.lookup_constant(head) {
      Some(c) if c.def == ConstantDef::Symbol => {},
      _ => return Err(bad(format!("{head} is not a symbol"))),
    }
    for (x, _) in &rule.pattern_vars {
      let n = occurrences(&rule.lhs, x);
      if n != 1 {
        return Err(bad(format!("pattern variable {x} occurs {n} times in {}", rule.lhs)));
      }
    }
    let bound: IndexSet<&Ident> = rule.pattern_vars.iter().map(|(x, _)| x).collect();
    if let Some(x) = rule.rhs.free_vars().iter().find(|x| !bound.contains(x)) {
      return Err(bad(format!("{x} is unbound in {}", rule.rhs)));
    }

    let typer = self.typer.as_ref();
    let err = |e: TypeError| bad(e.to_string());
    let mut cs = BTreeSet::new();
    let mut ctx = self.named_ctx.clone();
    for (x, ty) in &rule.pattern_vars {
      cs.extend(typer.infer_sort(self, &ctx, ty).map_err(err)?.1);
      ctx = ctx.push(NamedDecl::assum(x.clone(), ty.clone()));
    }
    let lhs = typer.infer(self, &ctx, &rule.lhs).map_err(err)?;
    let rhs = typer.infer(self, &ctx, &rule.rhs).map_err(err)?;
    cs.extend(lhs.constraints);
    cs.extend(rhs.constraints);
    cs.extend(typer.conv_leq(self, &ctx, &rhs.ty, &lhs.ty).map_err(err)?);
    Ok(cs)
  }

  pub(crate) fn push_rules(&mut self, label: Label, rules: Vec<RewriteRule>) {
    for rule in &rules {
      if let Some(head) = rule.head() {
        let mut v = self.globals.rules.get(head).map(|rs| rs.as_ref().clone()).unwrap_or_default();
        v.push(rule.clone());
        self.globals.rules.insert(head.clone(), Arc::new(v));
      }
    }
    debug!(%label, rules = rules.len(), "rewrite rules added");
    self.labels.insert(label.clone());
    self.structure = self.structure.cons((label, StructureField::Rules(rules)));
  }

  /// Declare the universes of `ctx` as monomorphic globals of this library.
  pub fn add_universes(&self, ctx: &ContextSet) -> KernelResult<Environment> {
    self.push_context_set(true, ctx)
  }
}

fn occurrences(e: &crate::expr::Expr, x: &Ident) -> usize {
  let mut n = 0;
  e.visit(&mut |t, _| {
    if matches!(t.as_data(), ExprData::Var(y) if y == x) {
      n += 1;
    }
    true
  });
  n
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::declarations::{AbstractUniverses, OneInductiveEntry};
  use crate::expr::Expr;
  use crate::names::DirPath;
  use crate::univ::{ConstraintKind, Level, UnivVar};

  fn env() -> Environment {
    Environment::new(DirPath::new(&["Fields"]))
  }

  #[test]
  fn definition_type_is_inferred() {
    let entry = ConstantEntry::definition(Expr::prop());
    let (kn, env) = env().add_constant(Label::new("t"), entry).unwrap();
    let c = env.lookup_constant(&kn).unwrap();
    assert_eq!(c.ty, Expr::type0());
    assert_eq!(c.body(), Some(&Expr::prop()));
    assert!(env.has_label(&Label::new("t")));
  }

  #[test]
  fn declared_type_must_match() {
    let entry = ConstantEntry::typed_definition(Expr::prop(), Expr::prop());
    let err = env().add_constant(Label::new("t"), entry).unwrap_err();
    assert!(matches!(err, KernelError::Type { .. }));
  }

  #[test]
  fn polymorphic_constraints_must_be_declared() {
    let u = UnivVar::new("u");
    let v = UnivVar::new("v");
    // Sort u : Sort (u+1), checked against Sort v needs u < v.
    let body = Expr::sort(Level::var(u.clone()));
    let target = Expr::sort(Level::var(v.clone()));
    let undeclared = AbstractUniverses::new(vec![u.clone(), v.clone()]);
    let entry = ConstantEntry::typed_definition(body.clone(), target.clone())
      .with_universes(UniverseEntry::Polymorphic(undeclared));
    let err = env().add_constant(Label::new("lift"), entry).unwrap_err();
    assert!(matches!(err, KernelError::UndeclaredConstraints(_)));

    let mut declared = AbstractUniverses::new(vec![u.clone(), v.clone()]);
    declared.constraints.insert(Constraint::new(u, ConstraintKind::Lt, v));
    let entry = ConstantEntry::typed_definition(body, target)
      .with_universes(UniverseEntry::Polymorphic(declared));
    let (kn, env) = env().add_constant(Label::new("lift"), entry).unwrap();
    assert!(env.lookup_constant(&kn).unwrap().universes.is_polymorphic());
    assert!(env.universes().constraints.is_empty());
  }

  #[test]
  fn mind_labels_share_the_namespace() {
    let entry = ConstantEntry::parameter(Expr::type0());
    let (_, env) = env().add_constant(Label::new("S"), entry).unwrap();
    let nat = Expr::var(Ident::new("Nat"));
    let entry = MutualInductiveEntry {
      params: vec![],
      packets: vec![OneInductiveEntry {
        label: Label::new("Nat"),
        arity: Expr::type0(),
        ctors: vec![
          (Label::new("O"), nat.clone()),
          (Label::new("S"), Expr::arrow(nat.clone(), nat)),
        ],
      }],
      universes: UniverseEntry::default(),
    };
    let err = env.add_mind(entry).unwrap_err();
    assert_eq!(err, KernelError::DuplicateLabel(Label::new("S")));
  }

  #[test]
  fn symbols_need_the_flag() {
    let entry = ConstantEntry::symbol(Expr::type0());
    let err = env().add_constant(Label::new("f"), entry).unwrap_err();
    assert_eq!(err, KernelError::RewriteRulesDisabled);
  }
}
