//! CodexCore: the CodexLang symbolic operator pipeline and the governed
//! decision-influence runtime.
pub mod cli;
pub mod commands;
pub mod config;
pub mod core;
pub mod influence;
pub mod io;

pub use crate::core::ast::Node;
pub use crate::core::executor::{ExecResult, ExecStatus, Executor};
pub use crate::core::pipeline::run;
