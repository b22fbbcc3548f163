//! Ephemeral identities.
//!
//! [`IdentityArena`] hands out [`EphemeralId`]s: an arena id paired with a
//! generation drawn from a monotonically increasing counter. Identities are
//! compared by value, so two live identities are equal only if they were the
//! same allocation. Every environment derived from one root shares a single
//! arena; a fresh root gets a fresh arena id.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

static NEXT_ARENA: AtomicU64 = AtomicU64::new(1);

/// A generation-tagged identity. Ordering is by `(arena, generation)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EphemeralId {
  arena: u64,
  generation: u64,
}

impl EphemeralId {
  pub fn arena(&self) -> u64 {
    self.arena
  }

  pub fn generation(&self) -> u64 {
    self.generation
  }
}

impl fmt::Display for EphemeralId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}.{}", self.arena, self.generation)
  }
}

/// A position in the allocation sequence. Everything minted at or after a
/// watermark can be revoked together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Watermark(u64);

#[derive(Debug)]
struct ArenaInner {
  id: u64,
  next: AtomicU64,
  // Half-open generation ranges `[from, to)` that have been revoked.
  revoked: Mutex<Vec<(u64, u64)>>,
}

/// Shared allocator of ephemeral identities.
#[derive(Debug, Clone)]
pub struct IdentityArena(Arc<ArenaInner>);

impl Default for IdentityArena {
  fn default() -> Self {
    Self::new()
  }
}

impl IdentityArena {
  pub fn new() -> Self {
    IdentityArena(Arc::new(ArenaInner {
      id: NEXT_ARENA.fetch_add(1, Ordering::Relaxed),
      next: AtomicU64::new(0),
      revoked: Mutex::new(Vec::new()),
    }))
  }

  pub fn id(&self) -> u64 {
    self.0.id
  }

  pub fn mint(&self) -> EphemeralId {
    let generation = self.0.next.fetch_add(1, Ordering::Relaxed);
    EphemeralId { arena: self.0.id, generation }
  }

  /// A fresh numeric uid, used for bound module identifiers.
  pub fn fresh_uid(&self) -> u64 {
    self.mint().generation
  }

  pub fn watermark(&self) -> Watermark {
    Watermark(self.0.next.load(Ordering::Relaxed))
  }

  /// Revoke every identity minted at or after `mark`.
  pub fn revoke_from(&self, mark: Watermark) {
    let to = self.0.next.load(Ordering::Relaxed);
    if mark.0 >= to {
      return;
    }
    let mut revoked = match self.0.revoked.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    };
    revoked.push((mark.0, to));
  }

  /// An identity is live if it belongs to this arena, was actually minted,
  /// and has not been revoked.
  pub fn is_live(&self, id: &EphemeralId) -> bool {
    if id.arena != self.0.id || id.generation >= self.0.next.load(Ordering::Relaxed) {
      return false;
    }
    let revoked = match self.0.revoked.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    };
    !revoked.iter().any(|(from, to)| (*from..*to).contains(&id.generation))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn minted_ids_are_distinct() {
    let arena = IdentityArena::new();
    let a = arena.mint();
    let b = arena.mint();
    assert_ne!(a, b);
    assert!(a < b);
    assert!(arena.is_live(&a) && arena.is_live(&b));
  }

  #[test]
  fn ids_from_other_arenas_are_not_live() {
    let a = IdentityArena::new();
    let b = IdentityArena::new();
    let id = a.mint();
    assert_ne!(a.id(), b.id());
    assert!(!b.is_live(&id));
  }

  #[test]
  fn revoke_from_watermark() {
    let arena = IdentityArena::new();
    let before = arena.mint();
    let mark = arena.watermark();
    let inside = arena.mint();
    arena.revoke_from(mark);
    let after = arena.mint();
    assert!(arena.is_live(&before));
    assert!(!arena.is_live(&inside));
    assert!(arena.is_live(&after));
  }
}
