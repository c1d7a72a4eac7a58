//! Execution: lowering a validated tree into a [`Program`] and running it.

pub mod prepare;
pub mod runner;

pub use prepare::{PrepareError, Program, ProgramNode};
pub use runner::{RunOptions, Runner, SIGNALLED_ERROR, StepInfo, StepInterceptor};
