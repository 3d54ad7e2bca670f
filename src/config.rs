//! Configuration handling for db-toolkit.
//!
//! The library reads connection settings through [`EnvSource`], so tests and
//! embedding applications can supply their own environment. The binary's
//! command line is parsed into [`Config`] via clap, with env fallbacks.

use clap::{Args, Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Read-only view of environment variables.
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;

    /// The variable's value, treating empty strings as unset.
    fn non_empty(&self, key: &str) -> Option<String> {
        self.var(key).filter(|v| !v.is_empty())
    }
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

impl<E: EnvSource + ?Sized> EnvSource for &E {
    fn var(&self, key: &str) -> Option<String> {
        (**self).var(key)
    }
}

/// Command-line configuration.
#[derive(Parser, Debug, Clone)]
#[command(name = "db-toolkit", version, about = "Database access utilities")]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = DEFAULT_LOG_LEVEL, env = "DB_TOOLKIT_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, global = true, env = "DB_TOOLKIT_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Resolve connection parameters for a logical database and print them as JSON
    Resolve {
        /// Logical database name (e.g., "billing")
        name: String,

        /// Route to the replica regardless of request method
        #[arg(long, conflicts_with = "write")]
        read_only: bool,

        /// Always use the primary
        #[arg(long)]
        write: bool,
    },

    /// Apply a declared schema (JSON file) to the target database
    Install {
        /// Path to a JSON schema declaration
        #[arg(long, value_name = "FILE")]
        schema: PathBuf,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Load rows by id and print them as JSON
    Load {
        /// Table to read
        #[arg(long)]
        table: String,

        /// Key values to load; integers are bound as integers
        #[arg(long = "id", value_name = "ID", required = true)]
        ids: Vec<String>,

        /// Key column
        #[arg(long, default_value = "id")]
        key: String,

        #[command(flatten)]
        target: TargetArgs,
    },
}

/// Where to connect: an explicit URL or a resolved logical name.
#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct TargetArgs {
    /// Connection URL (mysql://, postgres://, sqlite:)
    #[arg(long)]
    pub url: Option<String>,

    /// Logical database name resolved from the environment
    #[arg(long)]
    pub name: Option<String>,
}
