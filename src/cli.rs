//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::Operation;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

/// calcmesh - distributed arithmetic evaluation cluster
///
/// A dispatcher routes arithmetic requests to one operator per operation
/// kind; operators forward every outcome to a single aggregator, which
/// persists the results and closes each run once all of them are in.
///
/// Examples:
///   calcmesh aggregator --output results.csv
///   calcmesh operator --kind add
///   calcmesh dispatch --input requests.csv
///   calcmesh local --input requests.csv
///   calcmesh init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Path to configuration file
    ///
    /// If not specified, looks for .calcmesh.toml in the current directory
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Per-call transport timeout in seconds
    #[arg(long, global = true, value_name = "SECS", env = "CALCMESH_TIMEOUT")]
    pub timeout: Option<u64>,
}

/// Cluster role to run.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Read entries and route them to the operators
    ///
    /// Reads a CSV file when --input is given, stdin otherwise
    /// (type 'exit' or 'quit' to finish).
    Dispatch {
        /// Batch input file, one `operand1,operand2,operator` per line
        #[arg(short, long, value_name = "FILE")]
        input: Option<PathBuf>,

        /// Aggregator endpoint to notify on completion
        #[arg(long, value_name = "ADDR", env = "CALCMESH_AGGREGATOR")]
        aggregator: Option<String>,
    },

    /// Serve one operation kind until Ctrl-C
    Operator {
        /// Operation this operator is dedicated to
        #[arg(short, long, value_name = "KIND")]
        kind: OperatorKind,

        /// Listen address (defaults to the routed address for the kind)
        #[arg(short, long, value_name = "ADDR")]
        listen: Option<String>,

        /// Aggregator endpoint to forward outcomes to
        #[arg(long, value_name = "ADDR", env = "CALCMESH_AGGREGATOR")]
        aggregator: Option<String>,
    },

    /// Collect outcomes and persist each completed run until Ctrl-C
    Aggregator {
        /// Listen address
        #[arg(short, long, value_name = "ADDR")]
        listen: Option<String>,

        /// Results file, rewritten for every run
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Run the whole cluster in this process
    Local {
        /// Batch input file (stdin when omitted)
        #[arg(short, long, value_name = "FILE")]
        input: Option<PathBuf>,

        /// Results file
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Generate a default .calcmesh.toml configuration file
    InitConfig,
}

/// Operation kind accepted by `--kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OperatorKind {
    Add,
    Sub,
    Mul,
    Div,
}

impl From<OperatorKind> for Operation {
    fn from(kind: OperatorKind) -> Self {
        match kind {
            OperatorKind::Add => Operation::Add,
            OperatorKind::Sub => Operation::Sub,
            OperatorKind::Mul => Operation::Mul,
            OperatorKind::Div => Operation::Div,
        }
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        match &self.command {
            Command::Dispatch { input, .. } | Command::Local { input, .. } => {
                if let Some(path) = input {
                    if !path.is_file() {
                        return Err(format!("Input file does not exist: {}", path.display()));
                    }
                }
            }
            Command::Operator {
                listen: Some(addr), ..
            }
            | Command::Aggregator {
                listen: Some(addr), ..
            } => {
                if addr.parse::<SocketAddr>().is_err() {
                    return Err(format!("Invalid listen address: {}", addr));
                }
            }
            _ => {}
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
