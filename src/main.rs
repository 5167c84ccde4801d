//! dgrpcd — demo server/bench CLI for the connectionless RPC transport core.
//!
//! `dgrpcd serve` runs the duplex-locked endpoint with a duplicate-reply
//! cache; `dgrpcd bench` drives it from a client socket. Run `dgrpcd --help`
//! for usage.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod bench;
mod cli;
mod config;
mod serve;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.command {
        Commands::Init => None,
        _ => {
            if !cli.config.exists() {
                std::fs::write(&cli.config, b"")?;
                eprintln!(
                    "Created '{}' with default settings — edit it or run `dgrpcd init > {}` to see the defaults.",
                    cli.config.display(),
                    cli.config.display()
                );
            }
            Some(config::ServeConfig::load(&cli.config)?)
        }
    };

    if let Some(cfg) = &config {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_new(&cfg.log_filter).unwrap_or_else(|_| EnvFilter::new("warn")))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
            .init();
    }

    match cli.command {
        Commands::Init => {
            let example = config::ServeConfig::default_example();
            print!("{}", toml::to_string_pretty(&example)?);
        }
        Commands::Serve => {
            serve::run(config.as_ref().unwrap())?;
        }
        Commands::Bench { target, count, retransmit } => {
            bench::run(&target, count, retransmit)?;
        }
    }

    Ok(())
}
