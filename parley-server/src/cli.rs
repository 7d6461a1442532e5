//! Command-line argument parsing for the relay server
//!
//! Uses clap for argument parsing with derive macros. Flags override values
//! from the configuration file.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use parley_utils::LogOutput;

use crate::config::AppConfig;

/// parley - line-oriented multi-client chat relay
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file (defaults to the XDG config location)
    #[arg(long, short = 'c', env = "PARLEY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Interface for the chat listener
    #[arg(long, env = "PARLEY_HOST")]
    pub host: Option<String>,

    /// Chat listener port
    #[arg(long, short = 'p', env = "PARLEY_PORT")]
    pub port: Option<u16>,

    /// Seconds of silence before a client is disconnected
    #[arg(long)]
    pub idle_timeout_secs: Option<u64>,

    /// Lines buffered per client before fan-out waits
    #[arg(long)]
    pub outbox_capacity: Option<usize>,

    /// Do not start the echo/handshake endpoint
    #[arg(long, default_value_t = false)]
    pub no_echo: bool,

    /// Echo endpoint port
    #[arg(long)]
    pub echo_port: Option<u16>,

    /// Where log output goes
    #[arg(long, value_enum, default_value_t = LogTarget::Stderr)]
    pub log_output: LogTarget,

    /// Verbose stderr logging with span events (ignores --log-output)
    #[arg(long, short = 'v', default_value_t = false)]
    pub verbose: bool,

    /// Print the default configuration file and exit
    #[arg(long, default_value_t = false)]
    pub print_default_config: bool,
}

/// Log destination as spelled on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogTarget {
    Stderr,
    File,
    Both,
}

impl From<LogTarget> for LogOutput {
    fn from(target: LogTarget) -> Self {
        match target {
            LogTarget::Stderr => LogOutput::Stderr,
            LogTarget::File => LogOutput::File,
            LogTarget::Both => LogOutput::Both,
        }
    }
}

impl Args {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Apply flag overrides to a loaded configuration
    ///
    /// Returns true if anything changed.
    pub fn apply_overrides(&self, config: &mut AppConfig) -> bool {
        let before = config.clone();

        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(secs) = self.idle_timeout_secs {
            config.session.idle_timeout_secs = secs;
        }
        if let Some(capacity) = self.outbox_capacity {
            config.session.outbox_capacity = capacity;
        }
        if self.no_echo {
            config.echo.enabled = false;
        }
        if let Some(port) = self.echo_port {
            config.echo.port = port;
        }

        *config != before
    }
}
