//! Symbolic operator pipeline: lexing, parsing, operator resolution,
//! rewriting, and dispatch to evaluation backends.

pub mod ast;
pub mod backends;
pub mod debug;
pub mod diagnostics;
pub mod error;
pub mod executor;
pub mod lexer;
pub mod parser;
pub mod pipeline;
pub mod registry;
pub mod rewriter;
pub mod sinks;
pub mod token;

pub use token::TokenKind;
