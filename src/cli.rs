use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// lockweave - turn a resolved lock file into a build plan
#[derive(Parser)]
#[command(name = "lockweave")]
#[command(about = "Plan per-package builds from a poetry.lock for one target environment")]
#[command(version)]
pub struct Cli {
    /// Log decisions (filtered packages, chosen artifacts, overrides) at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build the plan for a lock file
    Plan {
        /// Path to poetry.lock
        lock: PathBuf,

        /// Target environment JSON (defaults to CPython 3.11 on x86_64 Linux)
        #[arg(short, long)]
        env: Option<PathBuf>,

        /// Planner configuration JSON
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print a one-line-per-package summary instead of JSON
        #[arg(long)]
        summary: bool,

        /// Exit with status 2 when any package is broken for the interpreter
        #[arg(long)]
        strict: bool,

        /// Write the JSON plan to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check a version against a constraint expression
    Constraint {
        version: String,
        constraint: String,
    },
    /// Evaluate a marker expression
    Marker {
        marker: String,

        /// Target environment JSON
        #[arg(short, long)]
        env: Option<PathBuf>,

        /// Activate an extra (repeatable)
        #[arg(long = "extra")]
        extras: Vec<String>,
    },
    /// Show the native requirements of a wheel platform tag
    Platform {
        tag: String,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}
