use std::path::PathBuf;

use clap::Parser;

/// LLM reverse proxy with prompt-injected function calling.
#[derive(Debug, Parser)]
#[command(name = "toolify", version, about)]
pub struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "TOOLIFY_CONFIG", default_value = "toolify.toml")]
    pub config: PathBuf,

    /// Log filter, e.g. `info` or `llm=debug,server=debug`. Overrides
    /// `features.log_level` from the configuration.
    #[arg(long, env = "TOOLIFY_LOG")]
    pub log: Option<String>,
}
