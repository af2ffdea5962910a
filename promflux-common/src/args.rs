//! CLI argument parsing for bridges.

use std::path::PathBuf;

use clap::Parser;

/// Common CLI arguments for all bridges.
#[derive(Parser, Debug, Clone)]
#[command(about = "promflux metrics bridge", version)]
pub struct BridgeArgs {
    /// Path to configuration file.
    #[arg(short, long)]
    pub config: PathBuf,

    /// Don't print any informative messages.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Become really verbose in printing messages.
    #[arg(short, long)]
    pub verbose: bool,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,
}

impl BridgeArgs {
    /// Parse CLI arguments with a default config path.
    ///
    /// If no `--config` argument is provided, uses the default.
    pub fn parse_with_default(default_config: &'static str) -> Self {
        Self::try_parse_from_with_default(std::env::args_os(), default_config)
            .unwrap_or_else(|e| e.exit())
    }

    /// Parse the given arguments with a default config path.
    pub fn try_parse_from_with_default<I, T>(
        args: I,
        default_config: &'static str,
    ) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let matches = <Self as clap::CommandFactory>::command()
            .mut_arg("config", |arg| arg.default_value(default_config))
            .try_get_matches_from(args)?;

        <Self as clap::FromArgMatches>::from_arg_matches(&matches)
    }

    /// The log level requested on the command line, if any.
    ///
    /// An explicit `--log-level` wins over `--verbose` and `--quiet`.
    pub fn log_level_override(&self) -> Option<String> {
        if let Some(ref level) = self.log_level {
            Some(level.clone())
        } else if self.verbose {
            Some("debug".to_string())
        } else if self.quiet {
            Some("warn".to_string())
        } else {
            None
        }
    }
}
