//! Kernel terms.
//!
//! Terms are locally nameless: binder bodies refer to their binders with de
//! Bruijn `Bvar` indices, while open terms mention section variables and
//! checker-introduced locals by name with `Var`.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexSet;

use crate::names::{CtorRef, Ident, IndRef, KerName};
use crate::univ::{Level, UnivVar};

#[derive(PartialEq, Eq, Hash, Clone)]
pub struct Expr(pub Arc<ExprData>);

#[derive(Debug, PartialEq, Eq, Hash)]
pub enum ExprData {
  Bvar(u32),
  Var(Ident),
  Sort(Level),
  Const(KerName, Vec<Level>),
  Ind(IndRef, Vec<Level>),
  Construct(CtorRef, Vec<Level>),
  App(Expr, Expr),
  Lam(Ident, Expr, Expr),
  Pi(Ident, Expr, Expr),
  Let(Ident, Expr, Expr, Expr),
}

/// A global reference occurring in a term.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GlobalRef {
  Const(KerName),
  Mind(KerName),
}

impl Expr {
  pub fn as_data(&self) -> &ExprData {
    &self.0
  }
  pub fn bvar(i: u32) -> Self {
    Expr(Arc::new(ExprData::Bvar(i)))
  }
  pub fn var(x: Ident) -> Self {
    Expr(Arc::new(ExprData::Var(x)))
  }
  pub fn sort(l: Level) -> Self {
    Expr(Arc::new(ExprData::Sort(l)))
  }
  pub fn prop() -> Self {
    Expr::sort(Level::zero())
  }
  pub fn type0() -> Self {
    Expr::sort(Level::one())
  }
  pub fn cnst(kn: KerName, us: Vec<Level>) -> Self {
    Expr(Arc::new(ExprData::Const(kn, us)))
  }
  pub fn ind(i: IndRef, us: Vec<Level>) -> Self {
    Expr(Arc::new(ExprData::Ind(i, us)))
  }
  pub fn construct(c: CtorRef, us: Vec<Level>) -> Self {
    Expr(Arc::new(ExprData::Construct(c, us)))
  }
  pub fn app(f: Expr, a: Expr) -> Self {
    Expr(Arc::new(ExprData::App(f, a)))
  }
  pub fn apps<I: IntoIterator<Item = Expr>>(f: Expr, args: I) -> Self {
    args.into_iter().fold(f, Expr::app)
  }
  pub fn lam(x: Ident, ty: Expr, body: Expr) -> Self {
    Expr(Arc::new(ExprData::Lam(x, ty, body)))
  }
  pub fn pi(x: Ident, ty: Expr, body: Expr) -> Self {
    Expr(Arc::new(ExprData::Pi(x, ty, body)))
  }
  pub fn let_in(x: Ident, ty: Expr, val: Expr, body: Expr) -> Self {
    Expr(Arc::new(ExprData::Let(x, ty, val, body)))
  }
  /// A non-dependent product. `body` must be locally closed.
  pub fn arrow(dom: Expr, body: Expr) -> Self {
    Expr::pi(Ident::new("_"), dom, body)
  }

  /// `Π (x1 : T1) ... (xn : Tn), body`, closing the named variables.
  pub fn pis(binders: &[(Ident, Expr)], body: Expr) -> Self {
    binders.iter().rev().fold(body, |acc, (x, ty)| {
      Expr::pi(x.clone(), ty.clone(), acc.abstract_vars(std::slice::from_ref(x)))
    })
  }

  /// `λ (x1 : T1) ... (xn : Tn), body`, closing the named variables.
  pub fn lams(binders: &[(Ident, Expr)], body: Expr) -> Self {
    binders.iter().rev().fold(body, |acc, (x, ty)| {
      Expr::lam(x.clone(), ty.clone(), acc.abstract_vars(std::slice::from_ref(x)))
    })
  }

  pub fn is_sort(&self) -> Option<&Level> {
    match self.as_data() {
      ExprData::Sort(l) => Some(l),
      _ => None,
    }
  }

  /// Split `f a1 ... an` into `(f, [a1, ..., an])`.
  pub fn unfold_apps(&self) -> (&Expr, Vec<&Expr>) {
    let mut args = Vec::new();
    let mut cur = self;
    while let ExprData::App(f, a) = cur.as_data() {
      args.push(a);
      cur = f;
    }
    args.reverse();
    (cur, args)
  }

  // ==========================================================================
  // Binding operations
  // ==========================================================================

  /// Instantiate the loose `Bvar(0)` with `val`. `val` must be locally closed.
  pub fn inst(&self, val: &Expr) -> Expr {
    self.inst_at(val, 0)
  }

  fn inst_at(&self, val: &Expr, depth: u32) -> Expr {
    if !self.has_loose_bvar_ge(depth) {
      return self.clone();
    }
    match self.as_data() {
      ExprData::Bvar(i) if *i == depth => val.clone(),
      ExprData::Bvar(i) if *i > depth => Expr::bvar(i - 1),
      ExprData::App(f, a) => Expr::app(f.inst_at(val, depth), a.inst_at(val, depth)),
      ExprData::Lam(x, t, b) => {
        Expr::lam(x.clone(), t.inst_at(val, depth), b.inst_at(val, depth + 1))
      },
      ExprData::Pi(x, t, b) => {
        Expr::pi(x.clone(), t.inst_at(val, depth), b.inst_at(val, depth + 1))
      },
      ExprData::Let(x, t, v, b) => Expr::let_in(
        x.clone(),
        t.inst_at(val, depth),
        v.inst_at(val, depth),
        b.inst_at(val, depth + 1),
      ),
      _ => self.clone(),
    }
  }

  /// Whether some `Bvar(i)` with `i >= depth` occurs free.
  pub fn has_loose_bvar_ge(&self, depth: u32) -> bool {
    match self.as_data() {
      ExprData::Bvar(i) => *i >= depth,
      ExprData::App(f, a) => f.has_loose_bvar_ge(depth) || a.has_loose_bvar_ge(depth),
      ExprData::Lam(_, t, b) | ExprData::Pi(_, t, b) => {
        t.has_loose_bvar_ge(depth) || b.has_loose_bvar_ge(depth + 1)
      },
      ExprData::Let(_, t, v, b) => {
        t.has_loose_bvar_ge(depth)
          || v.has_loose_bvar_ge(depth)
          || b.has_loose_bvar_ge(depth + 1)
      },
      _ => false,
    }
  }

  pub fn is_locally_closed(&self) -> bool {
    !self.has_loose_bvar_ge(0)
  }

  /// Turn the named variables `ids` into bound variables for `ids.len()`
  /// enclosing binders, `ids[0]` being the outermost. `self` must be locally
  /// closed.
  pub fn abstract_vars(&self, ids: &[Ident]) -> Expr {
    if ids.is_empty() {
      return self.clone();
    }
    self.abstract_at(ids, 0)
  }

  fn abstract_at(&self, ids: &[Ident], depth: u32) -> Expr {
    match self.as_data() {
      ExprData::Var(x) => match ids.iter().position(|y| y == x) {
        Some(k) => Expr::bvar(depth + (ids.len() - 1 - k) as u32),
        None => self.clone(),
      },
      ExprData::App(f, a) => Expr::app(f.abstract_at(ids, depth), a.abstract_at(ids, depth)),
      ExprData::Lam(x, t, b) => {
        Expr::lam(x.clone(), t.abstract_at(ids, depth), b.abstract_at(ids, depth + 1))
      },
      ExprData::Pi(x, t, b) => {
        Expr::pi(x.clone(), t.abstract_at(ids, depth), b.abstract_at(ids, depth + 1))
      },
      ExprData::Let(x, t, v, b) => Expr::let_in(
        x.clone(),
        t.abstract_at(ids, depth),
        v.abstract_at(ids, depth),
        b.abstract_at(ids, depth + 1),
      ),
      _ => self.clone(),
    }
  }

  /// Pre-order replacement: `f` sees every subterm (with the number of
  /// binders crossed) and may return a replacement, which is not revisited.
  pub fn replace(&self, f: &mut impl FnMut(&Expr, u32) -> Option<Expr>) -> Expr {
    self.replace_at(f, 0)
  }

  fn replace_at(&self, f: &mut impl FnMut(&Expr, u32) -> Option<Expr>, depth: u32) -> Expr {
    if let Some(r) = f(self, depth) {
      return r;
    }
    match self.as_data() {
      ExprData::App(g, a) => Expr::app(g.replace_at(f, depth), a.replace_at(f, depth)),
      ExprData::Lam(x, t, b) => {
        Expr::lam(x.clone(), t.replace_at(f, depth), b.replace_at(f, depth + 1))
      },
      ExprData::Pi(x, t, b) => {
        Expr::pi(x.clone(), t.replace_at(f, depth), b.replace_at(f, depth + 1))
      },
      ExprData::Let(x, t, v, b) => Expr::let_in(
        x.clone(),
        t.replace_at(f, depth),
        v.replace_at(f, depth),
        b.replace_at(f, depth + 1),
      ),
      _ => self.clone(),
    }
  }

  /// Pre-order visit of every subterm with the number of binders crossed.
  /// Subterms of a node are skipped when `f` returns `false` for it.
  pub fn visit(&self, f: &mut impl FnMut(&Expr, u32) -> bool) {
    self.visit_at(f, 0)
  }

  fn visit_at(&self, f: &mut impl FnMut(&Expr, u32) -> bool, depth: u32) {
    if !f(self, depth) {
      return;
    }
    match self.as_data() {
      ExprData::App(g, a) => {
        g.visit_at(f, depth);
        a.visit_at(f, depth);
      },
      ExprData::Lam(_, t, b) | ExprData::Pi(_, t, b) => {
        t.visit_at(f, depth);
        b.visit_at(f, depth + 1);
      },
      ExprData::Let(_, t, v, b) => {
        t.visit_at(f, depth);
        v.visit_at(f, depth);
        b.visit_at(f, depth + 1);
      },
      _ => {},
    }
  }

  /// Replace the named variable `x` by the locally closed term `val`.
  pub fn subst_var(&self, x: &Ident, val: &Expr) -> Expr {
    self.replace(&mut |e, _| match e.as_data() {
      ExprData::Var(y) if y == x => Some(val.clone()),
      _ => None,
    })
  }

  /// Substitute universe variables in every level of the term.
  pub fn subst_levels(&self, f: &impl Fn(&UnivVar) -> Option<Level>) -> Expr {
    let map = |us: &[Level]| us.iter().map(|l| l.subst(f)).collect::<Vec<_>>();
    self.replace(&mut |e, _| match e.as_data() {
      ExprData::Sort(l) => Some(Expr::sort(l.subst(f))),
      ExprData::Const(kn, us) => Some(Expr::cnst(kn.clone(), map(us))),
      ExprData::Ind(i, us) => Some(Expr::ind(i.clone(), map(us))),
      ExprData::Construct(c, us) => Some(Expr::construct(c.clone(), map(us))),
      _ => None,
    })
  }

  /// Instantiate universe parameters `params` with `levels`.
  pub fn instantiate_univs(&self, params: &[UnivVar], levels: &[Level]) -> Expr {
    if params.is_empty() {
      return self.clone();
    }
    self.subst_levels(&|u| {
      params.iter().position(|p| p == u).and_then(|i| levels.get(i).cloned())
    })
  }

  /// Rename every global name of the term.
  pub fn map_names(&self, f: &impl Fn(&KerName) -> KerName) -> Expr {
    self.replace(&mut |e, _| match e.as_data() {
      ExprData::Const(kn, us) => Some(Expr::cnst(f(kn), us.clone())),
      ExprData::Ind(i, us) => {
        Some(Expr::ind(IndRef { mind: f(&i.mind), idx: i.idx }, us.clone()))
      },
      ExprData::Construct(c, us) => Some(Expr::construct(
        CtorRef { ind: IndRef { mind: f(&c.ind.mind), idx: c.ind.idx }, idx: c.idx },
        us.clone(),
      )),
      _ => None,
    })
  }

  // ==========================================================================
  // Queries
  // ==========================================================================

  /// Named variables occurring in the term, in order of first occurrence.
  pub fn free_vars(&self) -> IndexSet<Ident> {
    let mut out = IndexSet::new();
    self.collect_vars(&mut out);
    out
  }

  pub fn collect_vars(&self, out: &mut IndexSet<Ident>) {
    match self.as_data() {
      ExprData::Var(x) => {
        out.insert(x.clone());
      },
      ExprData::App(f, a) => {
        f.collect_vars(out);
        a.collect_vars(out);
      },
      ExprData::Lam(_, t, b) | ExprData::Pi(_, t, b) => {
        t.collect_vars(out);
        b.collect_vars(out);
      },
      ExprData::Let(_, t, v, b) => {
        t.collect_vars(out);
        v.collect_vars(out);
        b.collect_vars(out);
      },
      _ => {},
    }
  }

  pub fn mentions_var(&self, x: &Ident) -> bool {
    self.free_vars().contains(x)
  }

  /// Global references occurring in the term.
  pub fn globals(&self) -> IndexSet<GlobalRef> {
    let mut out = IndexSet::new();
    self.collect_globals(&mut out);
    out
  }

  fn collect_globals(&self, out: &mut IndexSet<GlobalRef>) {
    match self.as_data() {
      ExprData::Const(kn, _) => {
        out.insert(GlobalRef::Const(kn.clone()));
      },
      ExprData::Ind(i, _) => {
        out.insert(GlobalRef::Mind(i.mind.clone()));
      },
      ExprData::Construct(c, _) => {
        out.insert(GlobalRef::Mind(c.ind.mind.clone()));
      },
      ExprData::App(f, a) => {
        f.collect_globals(out);
        a.collect_globals(out);
      },
      ExprData::Lam(_, t, b) | ExprData::Pi(_, t, b) => {
        t.collect_globals(out);
        b.collect_globals(out);
      },
      ExprData::Let(_, t, v, b) => {
        t.collect_globals(out);
        v.collect_globals(out);
        b.collect_globals(out);
      },
      _ => {},
    }
  }

  /// Universe variables occurring in the term.
  pub fn univ_vars(&self) -> Vec<UnivVar> {
    let mut out = Vec::new();
    self.visit(&mut |e, _| {
      match e.as_data() {
        ExprData::Sort(l) => l.vars(&mut out),
        ExprData::Const(_, us) | ExprData::Ind(_, us) | ExprData::Construct(_, us) => {
          us.iter().for_each(|l| l.vars(&mut out))
        },
        _ => {},
      }
      true
    });
    out
  }

  /// Does the term mention one of the inductives of block `mind`?
  pub fn mentions_mind(&self, mind: &KerName) -> bool {
    self.globals().contains(&GlobalRef::Mind(mind.clone()))
  }
}

impl fmt::Display for Expr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.as_data() {
      ExprData::Bvar(i) => write!(f, "#{i}"),
      ExprData::Var(x) => write!(f, "{x}"),
      ExprData::Sort(l) => write!(f, "Sort({l})"),
      ExprData::Const(kn, us) if us.is_empty() => write!(f, "{kn}"),
      ExprData::Const(kn, us) => {
        let us: Vec<_> = us.iter().map(|l| l.to_string()).collect();
        write!(f, "{kn}.{{{}}}", us.join(" "))
      },
      ExprData::Ind(i, _) => write!(f, "{i}"),
      ExprData::Construct(c, _) => write!(f, "{c}"),
      ExprData::App(..) => {
        let (head, args) = self.unfold_apps();
        write!(f, "({head}")?;
        for a in args {
          write!(f, " {a}")?;
        }
        write!(f, ")")
      },
      ExprData::Lam(x, t, b) => write!(f, "(fun {x} : {t} => {b})"),
      ExprData::Pi(x, t, b) => write!(f, "(forall {x} : {t}, {b})"),
      ExprData::Let(x, t, v, b) => write!(f, "(let {x} : {t} := {v} in {b})"),
    }
  }
}

impl fmt::Debug for Expr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Expr({self})")
  }
}
