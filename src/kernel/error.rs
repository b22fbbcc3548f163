//! Typing failures.

use thiserror::Error;

use crate::expr::Expr;
use crate::names::{CtorRef, Ident, IndRef, KerName};
use crate::univ::{Constraint, UnivVar};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
  #[error("unbound variable {0}")]
  UnknownVar(Ident),
  #[error("unknown constant {0}")]
  UnknownConstant(KerName),
  #[error("unknown inductive {0}")]
  UnknownInductive(IndRef),
  #[error("unknown constructor {0}")]
  UnknownConstructor(CtorRef),
  #[error("loose bound variable #{0}")]
  LooseBvar(u32),
  #[error("universe {0} is not declared")]
  UndeclaredUniverse(UnivVar),
  #[error("{name} expects {expected} universe levels, got {found}")]
  UniverseArity { name: KerName, expected: usize, found: usize },
  #[error("universe constraint {0} does not hold")]
  UnsatisfiedConstraint(Constraint),
  #[error("expected a sort, found {0}")]
  NotASort(Expr),
  #[error("expected a function, found {term} of type {ty}")]
  NotAFunction { term: Expr, ty: Expr },
  #[error("argument {arg} has type {found}, expected {expected}")]
  AppMismatch { arg: Expr, expected: Expr, found: Expr },
  #[error("{lhs} is not convertible to {rhs}")]
  NotConvertible { lhs: Expr, rhs: Expr },
  #[error("let-bound value {value} has type {found}, expected {expected}")]
  LetMismatch { value: Expr, expected: Expr, found: Expr },
}
