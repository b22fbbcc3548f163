//! The built-in type checker.
//!
//! The environment only talks to type checking through the [`Typer`] trait;
//! [`KernelTyper`] is the default implementation. Inductive blocks are always
//! checked by the built-in checker.

pub mod def_eq;
pub mod error;
pub mod inductive;
pub mod tc;
pub mod whnf;

pub use error::TypeError;
pub use inductive::{InductiveError, check_inductive};
pub use tc::{Judgment, KernelTyper, TypeChecker, Typer};
