//! CLI definitions for `dgrpcd`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[clap(
    name = "dgrpcd",
    version,
    about = "Connectionless RPC transport demo: duplicate-reply cache, PKTINFO-aware replies, duplex-locked endpoints",
    long_about = None
)]
pub struct Cli {
    /// Path to dgrpcd.toml config file
    #[clap(long, short, default_value = "dgrpcd.toml")]
    pub config: PathBuf,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print an example dgrpcd.toml to stdout
    Init,

    /// Run the demo echo server over the transport core
    Serve,

    /// Fire a burst of calls at a running server and report latency/cache stats
    Bench {
        /// Server address to target
        #[clap(long, default_value = "127.0.0.1:9111")]
        target: String,

        /// How many distinct calls to send
        #[clap(long, default_value = "100")]
        count: u64,

        /// Resend each call once, verbatim, to exercise the duplicate-reply cache
        #[clap(long)]
        retransmit: bool,
    },
}
