use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "codexcore",
    about = "CodexLang parser, operator resolver, executor, and governed influence runtime",
    version,
    propagate_version = true,
    disable_help_subcommand = true
)]
pub struct CodexCli {
    /// Global: path to config (TOML); default: ~/.codexcore/codexcore.toml
    #[arg(long = "config", value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Global: render parse errors as caret diagnostics on stderr
    #[arg(long = "pretty-errors", action = ArgAction::SetTrue, global = true)]
    pub pretty_errors: bool,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Parse CodexLang and print the instruction tree
    ///
    /// Examples:
    ///   codexcore parse "A ⊕ B"
    ///   codexcore parse "⟦ Logic | Gate : A -> A ∧ B ⟧"
    Parse {
        #[arg(value_name = "SRC")]
        source: String,
        /// Resolver context; canonicalizes the tree when given
        #[arg(long = "mode", value_name = "M")]
        mode: Option<String>,
    },

    /// Parse, rewrite, and execute CodexLang
    ///
    /// Examples:
    ///   codexcore exec "A ∧ B" --bind A=true --bind B=false
    ///   codexcore exec "⊕_q(X, Y)" --test-mode
    Exec {
        #[arg(value_name = "SRC")]
        source: String,
        #[arg(long = "mode", value_name = "M")]
        mode: Option<String>,
        /// Return the rewritten tree instead of evaluating it
        #[arg(long = "test-mode", action = ArgAction::SetTrue)]
        test_mode: bool,
        /// Truth value for an identifier (repeatable)
        #[arg(long = "bind", value_name = "NAME=BOOL", value_parser = parse_binding)]
        bind: Vec<(String, bool)>,
    },

    /// Resolve a raw operator symbol to its canonical key
    Resolve {
        #[arg(value_name = "SYMBOL")]
        symbol: String,
        #[arg(long = "context", value_name = "D")]
        context: Option<String>,
    },

    /// List canonical operators, optionally for one domain
    Ops {
        #[arg(long = "domain", value_name = "D")]
        domain: Option<String>,
    },

    /// Send a payload to the governed influence router
    ///
    /// Examples:
    ///   codexcore influence '{"action": "show"}'
    ///   codexcore influence @update.json
    Influence {
        /// JSON object, or @FILE to read it from a file
        #[arg(value_name = "JSON|@FILE")]
        payload: String,
    },
}

fn parse_binding(raw: &str) -> Result<(String, bool), String> {
    let (name, value) = raw.split_once('=').ok_or_else(|| format!("expected NAME=BOOL, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty binding name in '{raw}'"));
    }
    let value = match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "⊤" => true,
        "0" | "false" | "no" | "off" | "⊥" => false,
        other => return Err(format!("not a boolean: '{other}'")),
    };
    Ok((name.to_string(), value))
}
