//! A persistent, checked environment for a dependently typed kernel.
//!
//! Declarations are accepted one at a time into an [`Environment`]. Each
//! accepted field yields a new environment and leaves the old one valid.
//! Sections, modules, functors, delayed opaque proofs, side effects and
//! compiled libraries are all operations on that value.

#[cfg(test)]
extern crate quickcheck;
#[cfg(test)]
#[macro_use(quickcheck)]
extern crate quickcheck_macros;

pub mod arena;
pub mod codec;
pub mod codegen;
pub mod cons_list;
pub mod context;
pub mod declarations;
pub mod env;
pub mod error;
pub mod expr;
pub mod flags;
pub mod kernel;
pub mod names;
pub mod resolver;
pub mod univ;

pub use codec::Digest;
pub use declarations::{ConstantEntry, ModuleExpr, MutualInductiveEntry, OneInductiveEntry};
pub use env::{CompiledLibrary, Environment, Include, Scope};
pub use error::{Anomaly, KernelError, KernelResult};
pub use expr::Expr;
pub use flags::TypingFlags;
pub use names::{DirPath, Ident, KerName, Label, ModPath};
