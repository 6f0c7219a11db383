//! # Cinder virtual machine
//!
//! Executes a verified [`Program`](crate::bytecode::Program) on a single
//! stack of values and control markers. Host code drives it through
//! [`Vm::run`], [`Vm::step`] and [`Vm::call`].

pub mod convert;
pub mod runtime_error;
pub mod stack;
pub mod vm;

pub use runtime_error::RuntimeError;
pub use stack::{CallSite, StackEntry, TryRegion};
pub use vm::{NativeFn, RunMode, Vm, VmConfig};
