//! Named local contexts.

use crate::expr::Expr;
use crate::names::Ident;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedDecl {
  pub id: Ident,
  pub ty: Expr,
  pub body: Option<Expr>,
}

impl NamedDecl {
  pub fn assum(id: Ident, ty: Expr) -> Self {
    NamedDecl { id, ty, body: None }
  }

  pub fn def(id: Ident, body: Expr, ty: Expr) -> Self {
    NamedDecl { id, ty, body: Some(body) }
  }

  pub fn is_assum(&self) -> bool {
    self.body.is_none()
  }
}

/// An ordered context of named declarations, oldest first. Later entries may
/// mention earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamedContext(im::Vector<NamedDecl>);

impl NamedContext {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&self, decl: NamedDecl) -> Self {
    let mut v = self.0.clone();
    v.push_back(decl);
    NamedContext(v)
  }

  pub fn lookup(&self, id: &Ident) -> Option<&NamedDecl> {
    self.0.iter().rev().find(|d| &d.id == id)
  }

  pub fn contains(&self, id: &Ident) -> bool {
    self.lookup(id).is_some()
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> impl DoubleEndedIterator<Item = &NamedDecl> {
    self.0.iter()
  }

  /// Keep only the declarations whose identifiers satisfy `keep`.
  pub fn filter(&self, keep: impl Fn(&Ident) -> bool) -> Self {
    NamedContext(self.0.iter().filter(|d| keep(&d.id)).cloned().collect())
  }

  /// The smallest set of identifiers containing `seeds` and closed under
  /// "mentioned by the type or body of a member".
  pub fn dependency_closure<'a, I>(&self, seeds: I) -> Vec<Ident>
  where
    I: IntoIterator<Item = &'a Ident>,
  {
    let mut needed: indexmap::IndexSet<Ident> = seeds.into_iter().cloned().collect();
    for d in self.0.iter().rev() {
      if needed.contains(&d.id) {
        needed.extend(d.ty.free_vars());
        if let Some(b) = &d.body {
          needed.extend(b.free_vars());
        }
      }
    }
    self.0.iter().filter(|d| needed.contains(&d.id)).map(|d| d.id.clone()).collect()
  }
}

impl FromIterator<NamedDecl> for NamedContext {
  fn from_iter<T: IntoIterator<Item = NamedDecl>>(iter: T) -> Self {
    NamedContext(iter.into_iter().collect())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn closure_follows_types() {
    let a = Ident::new("A");
    let x = Ident::new("x");
    let y = Ident::new("y");
    let ctx = NamedContext::new()
      .push(NamedDecl::assum(a.clone(), Expr::type0()))
      .push(NamedDecl::assum(x.clone(), Expr::var(a.clone())))
      .push(NamedDecl::assum(y.clone(), Expr::type0()));
    assert_eq!(ctx.dependency_closure([&x]), vec![a.clone(), x.clone()]);
    assert_eq!(ctx.dependency_closure([&y]), vec![y]);
    assert!(ctx.contains(&a));
  }
}
