//! Discharging section contents.
//!
//! When a section closes, every field added inside it is rebuilt for the
//! enclosing scope: section definitions are inlined, references to fields
//! already rebuilt are applied to the variables those fields now take, and
//! the section variables the field needs are abstracted as leading binders.

use std::sync::Arc;

use indexmap::IndexSet;
use rustc_hash::FxHashMap;

use crate::context::NamedDecl;
use crate::declarations::{
  ConstantBody, ConstantDef, ConstantEntry, MutIndBody, MutualInductiveEntry, UniverseEntry,
};
use crate::expr::{Expr, ExprData};
use crate::names::{Ident, KerName, Label};

/// A field added while a section was open, as it was checked.
#[derive(Debug, Clone)]
pub(crate) enum Discharge {
  Constant { label: Label, body: ConstantBody, secctx: Option<Vec<Ident>> },
  Mind { body: MutIndBody, universes: UniverseEntry },
}

/// Rewriting state of a closing section.
#[derive(Debug, Clone, Default)]
pub(crate) struct Cooking {
  /// Section definitions, oldest first.
  lets: Vec<(Ident, Expr)>,
  /// Section assumptions with their raw types, oldest first.
  assums: Vec<(Ident, Expr)>,
  /// Rebuilt globals and the section variables they are applied to.
  expand: FxHashMap<KerName, Vec<Ident>>,
}

/// How one field was closed over its section variables.
#[derive(Debug, Clone)]
pub(crate) struct Abstraction {
  cooking: Cooking,
  vars: Vec<(Ident, Expr)>,
}

impl Abstraction {
  /// Rewrite a term checked inside the section into a closed one.
  pub(crate) fn apply(&self, body: &Expr) -> Expr {
    Expr::lams(&self.vars, self.cooking.cook_term(body))
  }
}

impl Cooking {
  /// State for a section whose own declarations are `decls`.
  pub(crate) fn new<'a>(decls: impl IntoIterator<Item = &'a NamedDecl>) -> Self {
    let mut c = Cooking::default();
    for d in decls {
      match &d.body {
        Some(b) => c.lets.push((d.id.clone(), b.clone())),
        None => c.assums.push((d.id.clone(), d.ty.clone())),
      }
    }
    c
  }

  pub(crate) fn cook_term(&self, e: &Expr) -> Expr {
    let e = self.lets.iter().rev().fold(e.clone(), |acc, (x, v)| acc.subst_var(x, v));
    if self.expand.is_empty() {
      return e;
    }
    e.replace(&mut |t, _| {
      let kn = match t.as_data() {
        ExprData::Const(kn, _) => kn,
        ExprData::Ind(i, _) => &i.mind,
        ExprData::Construct(c, _) => &c.ind.mind,
        _ => return None,
      };
      let vars = self.expand.get(kn)?;
      Some(Expr::apps(t.clone(), vars.iter().cloned().map(Expr::var)))
    })
  }

  /// The section assumptions `terms` need, closed under the dependencies of
  /// their types, with cooked types.
  fn needed<'a>(
    &self,
    terms: impl IntoIterator<Item = &'a Expr>,
    secctx: Option<&[Ident]>,
  ) -> Vec<(Ident, Expr)> {
    let mut seeds: IndexSet<Ident> = IndexSet::new();
    for t in terms {
      t.collect_vars(&mut seeds);
    }
    seeds.extend(secctx.into_iter().flatten().cloned());
    let cooked: Vec<(Ident, Expr)> =
      self.assums.iter().map(|(x, t)| (x.clone(), self.cook_term(t))).collect();
    for (x, t) in cooked.iter().rev() {
      if seeds.contains(x) {
        t.collect_vars(&mut seeds);
      }
    }
    cooked.into_iter().filter(|(x, _)| seeds.contains(x)).collect()
  }

  fn all_assums(&self) -> Vec<(Ident, Expr)> {
    self.assums.iter().map(|(x, t)| (x.clone(), self.cook_term(t))).collect()
  }

  fn record(&mut self, name: &KerName, vars: &[(Ident, Expr)]) {
    if !vars.is_empty() {
      self.expand.insert(name.clone(), vars.iter().map(|(x, _)| x.clone()).collect());
    }
  }

  /// Rebuild a constant. Returns the entry to replay and, for an opaque
  /// constant, how its proof must be closed.
  pub(crate) fn cook_constant(
    &mut self,
    body: &ConstantBody,
    secctx: Option<&[Ident]>,
  ) -> (ConstantEntry, Option<Arc<Abstraction>>) {
    let ty = self.cook_term(&body.ty);
    let def = body.body().map(|b| self.cook_term(b));
    let vars = match (&body.def, secctx) {
      // A proof may use any section variable until it is supplied.
      (ConstantDef::Opaque(_), None) => self.all_assums(),
      _ => self.needed(std::iter::once(&ty).chain(def.as_ref()), secctx),
    };
    let universes = body.universes.to_entry();
    let ty = Expr::pis(&vars, ty);
    let mut abstraction = None;
    let entry = match (&body.def, def) {
      (_, Some(def)) => ConstantEntry::Definition {
        body: Expr::lams(&vars, def),
        ty: Some(ty),
        universes,
        secctx: None,
        inline: body.inline,
      },
      (ConstantDef::Opaque(_), None) => {
        abstraction = Some(Arc::new(Abstraction { cooking: self.clone(), vars: vars.clone() }));
        ConstantEntry::Opaque { ty, universes, secctx: None }
      },
      (ConstantDef::Symbol, None) => ConstantEntry::Symbol { ty, universes },
      (_, None) => ConstantEntry::Parameter { ty, universes, secctx: None },
    };
    self.record(&body.name, &vars);
    (entry, abstraction)
  }

  /// Rebuild an inductive block: the needed section variables become
  /// leading parameters.
  pub(crate) fn cook_mind(
    &mut self,
    body: &MutIndBody,
    universes: UniverseEntry,
  ) -> MutualInductiveEntry {
    let entry = body.to_entry(universes);
    let labels: Vec<Ident> = entry.packets.iter().map(|p| Ident::new(p.label.as_str())).collect();
    let cook = |e: &Expr| self.cook_term(e);
    let params: Vec<(Ident, Expr)> =
      entry.params.iter().map(|(x, t)| (x.clone(), cook(t))).collect();
    let mut packets = entry.packets.clone();
    for p in &mut packets {
      p.arity = cook(&p.arity);
      for (_, t) in &mut p.ctors {
        *t = cook(t);
      }
    }
    let packet_terms = packets
      .iter()
      .flat_map(|p| std::iter::once(&p.arity).chain(p.ctors.iter().map(|(_, t)| t)));
    let terms = params.iter().map(|(_, t)| t).chain(packet_terms);
    let mut vars = self.needed(terms, None);
    // Block labels and parameters are not section variables.
    vars.retain(|(x, _)| !labels.contains(x) && !params.iter().any(|(p, _)| p == x));
    let applied = |e: &Expr| {
      e.replace(&mut |t, _| match t.as_data() {
        ExprData::Var(x) if labels.contains(x) => {
          Some(Expr::apps(t.clone(), vars.iter().map(|(v, _)| Expr::var(v.clone()))))
        },
        _ => None,
      })
    };
    for p in &mut packets {
      for (_, t) in &mut p.ctors {
        *t = applied(t);
      }
    }
    self.record(&body.name, &vars);
    MutualInductiveEntry {
      params: vars.into_iter().chain(params).collect(),
      packets,
      universes: entry.universes,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::declarations::Universes;
  use crate::names::{DirPath, ModPath};

  fn kn(l: &str) -> KerName {
    KerName::new(ModPath::file(DirPath::new(&["Cook"])), Label::new(l))
  }

  #[test]
  fn lets_are_inlined_and_needed_vars_abstracted() {
    let a = Ident::new("A");
    let x = Ident::new("x");
    let d = Ident::new("d");
    let decls = vec![
      NamedDecl::assum(a.clone(), Expr::type0()),
      NamedDecl::assum(x.clone(), Expr::var(a.clone())),
      NamedDecl::def(d.clone(), Expr::var(x.clone()), Expr::var(a.clone())),
    ];
    let mut cooking = Cooking::new(&decls);
    let body = ConstantBody {
      name: kn("c"),
      ty: Expr::var(a.clone()),
      def: ConstantDef::Def(Expr::var(d)),
      universes: Universes::Monomorphic,
      inline: false,
    };
    let (entry, abs) = cooking.cook_constant(&body, None);
    assert!(abs.is_none());
    let vars = vec![(a.clone(), Expr::type0()), (x.clone(), Expr::var(a.clone()))];
    match entry {
      ConstantEntry::Definition { body, ty, .. } => {
        assert_eq!(body, Expr::lams(&vars, Expr::var(x.clone())));
        assert_eq!(ty, Some(Expr::pis(&vars, Expr::var(a.clone()))));
      },
      other => panic!("unexpected entry {other:?}"),
    }
    // Later references to `c` are applied to its variables.
    let later = cooking.cook_term(&Expr::cnst(kn("c"), vec![]));
    assert_eq!(later, Expr::apps(Expr::cnst(kn("c"), vec![]), [Expr::var(a), Expr::var(x)]));
  }

  #[test]
  fn unused_vars_are_not_abstracted() {
    let a = Ident::new("A");
    let decls = vec![NamedDecl::assum(a, Expr::type0())];
    let mut cooking = Cooking::new(&decls);
    let body = ConstantBody {
      name: kn("p"),
      ty: Expr::type0(),
      def: ConstantDef::Undef,
      universes: Universes::Monomorphic,
      inline: false,
    };
    let (entry, _) = cooking.cook_constant(&body, None);
    assert_eq!(entry, ConstantEntry::parameter(Expr::type0()));
    assert_eq!(cooking.cook_term(&Expr::cnst(kn("p"), vec![])), Expr::cnst(kn("p"), vec![]));
  }
}
