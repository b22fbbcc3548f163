//! Well-formedness of mutual inductive blocks.

use std::collections::BTreeSet;

use thiserror::Error;
use tracing::trace;

use super::error::TypeError;
use super::tc::TypeChecker;
use crate::context::{NamedContext, NamedDecl};
use crate::declarations::{MutIndBody, MutualInductiveEntry, OneInductiveBody};
use crate::env::Environment;
use crate::expr::{Expr, ExprData};
use crate::names::{Ident, IndRef, KerName, Label};
use crate::univ::level::is_zero;
use crate::univ::{Constraint, Level};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InductiveError {
  #[error("a mutual block needs at least one inductive")]
  Empty,
  #[error("{0} names both a parameter and an inductive of the block")]
  ParamClash(Ident),
  #[error("the arity of {0} does not end in a sort")]
  BadArity(Label),
  #[error("constructor {ctor} does not build {ind} applied to the block parameters")]
  BadConclusion { ind: Label, ctor: Label },
  #[error("non strictly positive occurrence of the block in constructor {ctor} of {ind}")]
  NonPositive { ind: Label, ctor: Label },
  #[error("constructor {ctor} has an argument in a universe too large for {ind}")]
  UniverseTooLarge { ind: Label, ctor: Label },
  #[error(transparent)]
  Type(#[from] TypeError),
}

struct BlockChecker<'a> {
  tc: TypeChecker<'a>,
  labels: Vec<Ident>,
  params: Vec<Ident>,
}

/// Check `entry` as the block named `name`. Returns the stored body and the
/// universe constraints the check implied.
pub fn check_inductive(
  env: &Environment,
  ctx: &NamedContext,
  name: &KerName,
  entry: &MutualInductiveEntry,
) -> Result<(MutIndBody, BTreeSet<Constraint>), InductiveError> {
  if entry.packets.is_empty() {
    return Err(InductiveError::Empty);
  }
  let labels: Vec<Ident> =
    entry.packets.iter().map(|p| Ident::new(p.label.as_str())).collect();
  if let Some((x, _)) = entry.params.iter().find(|(x, _)| labels.contains(x)) {
    return Err(InductiveError::ParamClash(x.clone()));
  }
  let mut bc = BlockChecker {
    tc: TypeChecker::new(env, ctx.clone()),
    labels,
    params: entry.params.iter().map(|(x, _)| x.clone()).collect(),
  };

  // Parameters, then arities under the parameters.
  for (x, t) in &entry.params {
    bc.tc.infer_sort(t)?;
    bc.tc.ctx = bc.tc.ctx.push(NamedDecl::assum(x.clone(), t.clone()));
  }
  let with_params = bc.tc.ctx.clone();
  let mut sorts = Vec::with_capacity(entry.packets.len());
  for p in &entry.packets {
    bc.tc.infer_sort(&p.arity)?;
    let sort = bc.arity_sort(&p.arity).ok_or_else(|| InductiveError::BadArity(p.label.clone()))?;
    bc.tc.ctx = with_params.clone();
    sorts.push(sort);
  }

  // Constructors see the inductives as assumptions over the parameters.
  let mut ind_ctx = ctx.clone();
  for (p, x) in entry.packets.iter().zip(&bc.labels) {
    ind_ctx = ind_ctx.push(NamedDecl::assum(x.clone(), Expr::pis(&entry.params, p.arity.clone())));
  }
  for (x, t) in &entry.params {
    ind_ctx = ind_ctx.push(NamedDecl::assum(x.clone(), t.clone()));
  }
  let flags = *env.flags();
  for (i, p) in entry.packets.iter().enumerate() {
    for (clabel, cty) in &p.ctors {
      bc.tc.ctx = ind_ctx.clone();
      bc.tc.infer_sort(cty)?;
      bc.check_ctor(
        i,
        &p.label,
        clabel,
        cty,
        &sorts[i],
        flags.check_universes,
        flags.check_positivity,
      )?;
    }
  }

  let levels: Vec<Level> =
    entry.universes.to_universes().params().iter().cloned().map(Level::var).collect();
  let bind = |e: &Expr| {
    e.replace(&mut |t, _| match t.as_data() {
      ExprData::Var(x) => bc.labels.iter().position(|l| l == x).map(|idx| {
        Expr::ind(IndRef { mind: name.clone(), idx }, levels.clone())
      }),
      _ => None,
    })
  };
  let packets = entry
    .packets
    .iter()
    .zip(sorts)
    .map(|(p, sort)| {
      let ctors = p.ctors.iter().map(|(l, t)| (l.clone(), bind(t))).collect();
      OneInductiveBody::new(&entry.params, p.label.clone(), p.arity.clone(), sort, ctors)
    })
    .collect();
  trace!(%name, "inductive block checked");
  let body = MutIndBody {
    name: name.clone(),
    params: entry.params.clone(),
    packets,
    universes: entry.universes.to_universes(),
  };
  Ok((body, bc.tc.into_constraints()))
}

impl BlockChecker<'_> {
  /// The sort an arity ends in. Leaves the context unchanged.
  fn arity_sort(&mut self, arity: &Expr) -> Option<Level> {
    let saved = self.tc.ctx.clone();
    let mut cur = arity.clone();
    let mut n = 0;
    let r = loop {
      let t = self.tc.whnf(&cur);
      match t.as_data() {
        ExprData::Pi(_, a, b) => {
          n += 1;
          let id = Ident::new(&format!("_arity#{n}"));
          self.tc.ctx = self.tc.ctx.push(NamedDecl::assum(id.clone(), a.clone()));
          cur = b.inst(&Expr::var(id));
        },
        ExprData::Sort(l) => break Some(l.clone()),
        _ => break None,
      }
    };
    self.tc.ctx = saved;
    r
  }

  fn mentions_block(&self, e: &Expr) -> bool {
    let fv = e.free_vars();
    self.labels.iter().any(|l| fv.contains(l))
  }

  /// `t` is `I params indices` for an inductive `I` of the block (`own` if
  /// given), with indices free of the block.
  fn is_block_app(&self, t: &Expr, own: Option<usize>) -> bool {
    let (head, args) = t.unfold_apps();
    let idx = match head.as_data() {
      ExprData::Var(x) => self.labels.iter().position(|l| l == x),
      _ => None,
    };
    let Some(idx) = idx else { return false };
    if own.is_some_and(|o| o != idx) || args.len() < self.params.len() {
      return false;
    }
    let params_ok = self
      .params
      .iter()
      .zip(&args)
      .all(|(p, a)| matches!(a.as_data(), ExprData::Var(x) if x == p));
    params_ok && args[self.params.len()..].iter().all(|a| !self.mentions_block(a))
  }

  fn positive(&mut self, arg: &Expr) -> bool {
    let t = self.tc.whnf(arg);
    if !self.mentions_block(&t) {
      return true;
    }
    match t.as_data() {
      ExprData::Pi(x, d, b) => {
        if self.mentions_block(d) {
          return false;
        }
        let saved = self.tc.ctx.clone();
        let id = Ident::new(&format!("{x}#pos"));
        self.tc.ctx = self.tc.ctx.push(NamedDecl::assum(id.clone(), d.clone()));
        let ok = self.positive(&b.inst(&Expr::var(id)));
        self.tc.ctx = saved;
        ok
      },
      _ => self.is_block_app(&t, None),
    }
  }

  #[allow(clippy::too_many_arguments)]
  fn check_ctor(
    &mut self,
    own: usize,
    ind: &Label,
    ctor: &Label,
    ty: &Expr,
    sort: &Level,
    check_universes: bool,
    check_positivity: bool,
  ) -> Result<(), InductiveError> {
    let mut cur = ty.clone();
    let mut n = 0;
    loop {
      let t = self.tc.whnf(&cur);
      match t.as_data() {
        ExprData::Pi(_, a, b) => {
          if check_positivity && !self.positive(a) {
            return Err(InductiveError::NonPositive { ind: ind.clone(), ctor: ctor.clone() });
          }
          if check_universes && !is_zero(sort, &self.tc.graph) {
            let s = self.tc.infer_sort(a)?;
            if !self.tc.level_leq(&s, sort) {
              return Err(InductiveError::UniverseTooLarge {
                ind: ind.clone(),
                ctor: ctor.clone(),
              });
            }
          }
          n += 1;
          let id = Ident::new(&format!("_ctor#{n}"));
          self.tc.ctx = self.tc.ctx.push(NamedDecl::assum(id.clone(), a.clone()));
          cur = b.inst(&Expr::var(id));
        },
        _ => {
          if !self.is_block_app(&t, Some(own)) {
            return Err(InductiveError::BadConclusion { ind: ind.clone(), ctor: ctor.clone() });
          }
          return Ok(());
        },
      }
    }
  }
}
