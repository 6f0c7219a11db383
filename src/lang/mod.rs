//! # Cinder language model
//!
//! The syntax tree produced by the parser, the runtime value model and the
//! environment chain shared by scopes and object instances.
//!
//! ## Conventions
//!
//! - Token ranges are inclusive indices into the program's token list.
//! - Names beginning with `@` or `$_` are synthesized by the compiler and
//!   cannot be written in source.

pub mod ast;
pub mod env;
pub mod native;
pub mod value;
