//! Kernel configuration.

/// Permanent typing configuration. It is recorded in exported libraries and
/// must match on import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypingFlags {
  /// Reject universe inconsistencies. When off, every constraint between
  /// declared universes is accepted.
  pub check_universes: bool,
  /// Require strictly positive recursive occurrences in inductive types.
  pub check_positivity: bool,
  pub allow_rewrite_rules: bool,
}

impl Default for TypingFlags {
  fn default() -> Self {
    TypingFlags { check_universes: true, check_positivity: true, allow_rewrite_rules: false }
  }
}

impl TypingFlags {
  pub fn with_rewrite_rules(self) -> Self {
    TypingFlags { allow_rewrite_rules: true, ..self }
  }

  pub fn to_bits(self) -> u8 {
    (self.check_universes as u8)
      | (self.check_positivity as u8) << 1
      | (self.allow_rewrite_rules as u8) << 2
  }

  pub fn from_bits(bits: u8) -> Option<Self> {
    if bits & !0b111 != 0 {
      return None;
    }
    Some(TypingFlags {
      check_universes: bits & 1 != 0,
      check_positivity: bits & 2 != 0,
      allow_rewrite_rules: bits & 4 != 0,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn bits() {
    let f = TypingFlags::default().with_rewrite_rules();
    assert_eq!(TypingFlags::from_bits(f.to_bits()), Some(f));
    assert_eq!(TypingFlags::from_bits(0b1000), None);
  }
}
