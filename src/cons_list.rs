//! Persistent, reference-counted cons list.
//!
//! Every `cons` allocates one shared cell and keeps the tail alive, so older
//! versions of a list remain valid suffixes of newer ones. Suffix tests are
//! by cell identity, never by deep comparison.

use std::sync::Arc;

#[derive(Debug)]
pub struct ConsCell<T> {
  head: T,
  tail: ConsList<T>,
  len: usize,
}

#[derive(Debug)]
pub enum ConsList<T> {
  Nil,
  Cons(Arc<ConsCell<T>>),
}

impl<T> Clone for ConsList<T> {
  fn clone(&self) -> Self {
    match self {
      Self::Nil => Self::Nil,
      Self::Cons(cell) => Self::Cons(cell.clone()),
    }
  }
}

impl<T> Default for ConsList<T> {
  fn default() -> Self {
    Self::Nil
  }
}

struct ConsListIter<'a, T>(&'a ConsList<T>);
impl<'a, T> Iterator for ConsListIter<'a, T> {
  type Item = &'a T;
  fn next(&mut self) -> Option<Self::Item> {
    match self.0 {
      ConsList::Nil => None,
      ConsList::Cons(cell) => {
        self.0 = &cell.tail;
        Some(&cell.head)
      },
    }
  }
}

impl<T> ConsList<T> {
  #[inline]
  pub fn cons(&self, t: T) -> Self {
    let len = self.len() + 1;
    Self::Cons(Arc::new(ConsCell { head: t, tail: self.clone(), len }))
  }

  #[inline]
  pub fn len(&self) -> usize {
    match self {
      Self::Nil => 0,
      Self::Cons(cell) => cell.len,
    }
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    matches!(self, Self::Nil)
  }

  #[inline]
  pub fn head(&self) -> Option<&T> {
    match self {
      Self::Nil => None,
      Self::Cons(cell) => Some(&cell.head),
    }
  }

  #[inline]
  pub fn tail(&self) -> Option<&ConsList<T>> {
    match self {
      Self::Nil => None,
      Self::Cons(cell) => Some(&cell.tail),
    }
  }

  #[inline]
  pub fn iter(&self) -> impl Iterator<Item = &T> {
    ConsListIter(self)
  }

  /// Drops the `n` most recent elements. Returns `Nil` if `n >= len`.
  pub fn skip(&self, n: usize) -> &ConsList<T> {
    let mut cur = self;
    for _ in 0..n {
      match cur {
        Self::Nil => break,
        Self::Cons(cell) => cur = &cell.tail,
      }
    }
    cur
  }

  /// Physical identity of two list versions.
  pub fn ptr_eq(&self, other: &ConsList<T>) -> bool {
    match (self, other) {
      (Self::Nil, Self::Nil) => true,
      (Self::Cons(a), Self::Cons(b)) => Arc::ptr_eq(a, b),
      _ => false,
    }
  }

  /// `true` iff `self` is literally a suffix of `other`: `other` was built by
  /// consing zero or more elements onto this very list value.
  pub fn is_suffix_of(&self, other: &ConsList<T>) -> bool {
    let (mine, theirs) = (self.len(), other.len());
    mine <= theirs && other.skip(theirs - mine).ptr_eq(self)
  }

  /// The elements consed onto `suffix` to obtain `self`, most recent first,
  /// or `None` when `suffix` is not a suffix of `self`.
  pub fn prefix_above(&self, suffix: &ConsList<T>) -> Option<Vec<&T>> {
    if !suffix.is_suffix_of(self) {
      return None;
    }
    Some(self.iter().take(self.len() - suffix.len()).collect())
  }

  pub fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self
  where
    <I as IntoIterator>::IntoIter: DoubleEndedIterator,
  {
    iter.into_iter().rev().fold(Self::Nil, |acc, t| acc.cons(t))
  }

  #[inline]
  pub fn contains(&self, t: &T) -> bool
  where
    T: PartialEq,
  {
    self.iter().any(|x| x == t)
  }

  #[inline]
  pub fn index_of(&self, t: &T) -> Option<usize>
  where
    T: PartialEq,
  {
    self.iter().position(|x| x == t)
  }
}

impl<T: PartialEq> PartialEq for ConsList<T> {
  fn eq(&self, other: &Self) -> bool {
    self.len() == other.len()
      && (self.ptr_eq(other) || self.iter().zip(other.iter()).all(|(a, b)| a == b))
  }
}

impl<T: Eq> Eq for ConsList<T> {}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_list_len_and_iter() {
    let list: ConsList<i32> = ConsList::Nil;
    assert_eq!(list.len(), 0);
    assert!(list.is_empty());
    assert_eq!(list.iter().count(), 0);
  }

  #[test]
  fn test_multiple_elements_list() {
    let list = ConsList::Nil.cons(3).cons(2).cons(1);
    assert_eq!(list.len(), 3);
    let collected: Vec<_> = list.iter().cloned().collect();
    assert_eq!(collected, vec![1, 2, 3]);
    assert_eq!(list.head(), Some(&1));
  }

  #[test]
  fn test_from_iter_and_index_of() {
    let list = ConsList::from_iter(vec![10, 20, 30]);
    assert_eq!(list.index_of(&10), Some(0));
    assert_eq!(list.index_of(&30), Some(2));
    assert!(list.contains(&20));
    assert!(!list.contains(&99));
  }

  #[test]
  fn test_suffix_is_by_identity() {
    let base = ConsList::Nil.cons(1).cons(2);
    let grown = base.cons(3).cons(4);
    assert!(base.is_suffix_of(&grown));
    assert!(grown.is_suffix_of(&grown));
    assert!(!grown.is_suffix_of(&base));

    // Structurally equal, but not the same cells.
    let rebuilt = ConsList::Nil.cons(1).cons(2);
    assert_eq!(rebuilt, base);
    assert!(!rebuilt.is_suffix_of(&grown));
    assert!(ConsList::<i32>::Nil.is_suffix_of(&grown));
  }

  #[test]
  fn test_prefix_above() {
    let base = ConsList::Nil.cons("a");
    let grown = base.cons("b").cons("c");
    let above = grown.prefix_above(&base).unwrap();
    assert_eq!(above, vec![&"c", &"b"]);
    assert!(base.prefix_above(&grown).is_none());
  }

  #[test]
  fn test_skip_past_end() {
    let list = ConsList::from_iter(vec![1, 2]);
    assert!(list.skip(5).is_empty());
    assert_eq!(list.skip(1).head(), Some(&2));
  }

  #[test]
  fn test_cons_increases_length() {
    let mut list = ConsList::Nil;
    for i in 0..5 {
      list = list.cons(i);
      assert_eq!(list.len(), i + 1);
    }
    let collected: Vec<_> = list.iter().cloned().collect();
    assert_eq!(collected, vec![4, 3, 2, 1, 0]);
  }
}
