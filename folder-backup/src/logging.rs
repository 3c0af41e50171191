//! Tracing subscriber setup for the `backup` binary.
//!
//! `BACKUP_LOG` wins over `RUST_LOG`, which wins over the level implied by
//! `--quiet` / `--verbose`. Everything goes to stderr; stdout only carries the
//! final report. The print-only listing stays on under `--quiet`.

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use crate::sync::store::PLAN_TARGET;

pub const LOG_ENV: &str = "BACKUP_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// Warnings and errors only; hides per-file progress.
    Quiet,
    /// Per-file progress and run milestones.
    Normal,
    Verbose,
}

impl Verbosity {
    pub const fn from_flags(verbose: bool, quiet: bool) -> Self {
        if verbose {
            Self::Verbose
        } else if quiet {
            Self::Quiet
        } else {
            Self::Normal
        }
    }

    pub const fn default_level(self) -> Level {
        match self {
            Self::Quiet => Level::WARN,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
        }
    }
}

/// Installs the global subscriber. Call once, first thing in `main`.
pub fn init_subscriber(verbosity: Verbosity, print_only: bool) {
    let use_ansi = std::io::IsTerminal::is_terminal(&std::io::stderr());
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(use_ansi)
        .with_target(false);

    tracing_subscriber::registry()
        .with(build_env_filter(verbosity, print_only))
        .with(fmt_layer)
        .init();
}

fn build_env_filter(verbosity: Verbosity, print_only: bool) -> EnvFilter {
    let directives = std::env::var(LOG_ENV)
        .ok()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .filter(|value| !value.trim().is_empty());
    filter_from(directives.as_deref(), verbosity, print_only)
}

fn default_directives(verbosity: Verbosity, print_only: bool) -> String {
    let level = verbosity.default_level().as_str().to_ascii_lowercase();
    if print_only && verbosity == Verbosity::Quiet {
        format!("{level},{PLAN_TARGET}=info")
    } else {
        level
    }
}

fn filter_from(directives: Option<&str>, verbosity: Verbosity, print_only: bool) -> EnvFilter {
    let default = || EnvFilter::new(default_directives(verbosity, print_only));
    match directives {
        Some(directives) => EnvFilter::try_new(directives).unwrap_or_else(|_| default()),
        None => default(),
    }
}
