//! Command-line interface definitions
//!
//! Argument parsing for the ACP session bridge binary.

use std::path::PathBuf;

use clap::Parser;

/// Pilot ACP bridge - expose a coding-assistant controller to any ACP client
#[derive(Parser, Debug, Clone)]
#[command(name = "pilot-acp-rs")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Controller command to spawn for prompt turns
    #[arg(long, value_name = "CMD", env = "PILOT_CONTROLLER_CMD")]
    pub controller_cmd: Option<String>,

    /// Argument passed to the controller command (repeatable)
    #[arg(long = "controller-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub controller_args: Vec<String>,

    /// Enable diagnostic mode (log to a file instead of stderr)
    #[arg(short, long)]
    pub diagnostic: bool,

    /// Log directory (implies diagnostic mode)
    #[arg(short = 'l', long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Log file name (implies diagnostic mode)
    #[arg(short = 'f', long, value_name = "FILE")]
    pub log_file: Option<String>,

    /// Increase logging verbosity (-v, -vv)
    /// Note: RUST_LOG env var takes priority over this flag
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (only errors)
    /// Note: RUST_LOG env var takes priority over this flag
    #[arg(short, long)]
    pub quiet: bool,
}

#[allow(clippy::derivable_impls)]
impl Default for Cli {
    fn default() -> Self {
        Self {
            controller_cmd: None,
            controller_args: Vec::new(),
            diagnostic: false,
            log_dir: None,
            log_file: None,
            verbose: 0,
            quiet: false,
        }
    }
}

impl Cli {
    /// Check if diagnostic mode is enabled (output to file)
    pub fn is_diagnostic(&self) -> bool {
        self.diagnostic || self.log_dir.is_some() || self.log_file.is_some()
    }

    /// Get the log level based on CLI arguments
    ///
    /// - `--quiet`: ERROR
    /// - default: INFO
    /// - `-v`: DEBUG
    /// - `-vv` or more: TRACE
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else {
            match self.verbose {
                0 => tracing::Level::INFO,
                1 => tracing::Level::DEBUG,
                _ => tracing::Level::TRACE,
            }
        }
    }

    /// Get the log file path for diagnostic mode
    ///
    /// Uses the specified log directory and file name, or defaults to the
    /// system temp directory with a timestamped file name.
    pub fn log_path(&self) -> PathBuf {
        let dir = self.log_dir.clone().unwrap_or_else(std::env::temp_dir);

        let filename = self.log_file.clone().unwrap_or_else(|| {
            let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
            format!("pilot-acp-rs-{timestamp}.log")
        });

        dir.join(filename)
    }
}
