use clap::Parser; // trait import enables CodexCli::parse()
use std::sync::Arc;

use anyhow::Context;
use tracing::debug;

use codexcore::cli::{CodexCli, Command};
use codexcore::commands;
use codexcore::config::Config;
use codexcore::core::debug::init_logging;
use codexcore::core::registry;
use codexcore::influence::DecisionInfluenceRuntime;

fn main() -> anyhow::Result<()> {
    init_logging();
    let args = CodexCli::parse();

    let cfg = Config::load_resolved(&args.config)?;
    let registry = registry::global();
    if let Some(path) = cfg.registry.operators_path.as_deref() {
        registry
            .reload_from_path(path)
            .with_context(|| format!("loading operator overrides from {}", path.display()))?;
    }
    debug!(target: "codexcore::cli", command = ?args.cmd, "dispatch");

    let out = match args.cmd {
        Command::Parse { source, mode } => commands::parse::main(&source, mode.as_deref(), &registry, args.pretty_errors)?,
        Command::Exec { source, mode, test_mode, bind } => {
            commands::exec::main(&source, mode.as_deref(), test_mode, bind, cfg.executor.clone(), registry.clone())?
        }
        Command::Resolve { symbol, context } => commands::resolve::main(&symbol, context.as_deref(), &registry)?,
        Command::Ops { domain } => commands::ops::main(domain.as_deref(), &registry)?,
        Command::Influence { payload } => {
            let runtime = Arc::new(DecisionInfluenceRuntime::from_config(&cfg.influence));
            commands::influence::main(&payload, runtime)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&out)?);
    if !commands::is_success(&out) {
        std::process::exit(1);
    }
    Ok(())
}
