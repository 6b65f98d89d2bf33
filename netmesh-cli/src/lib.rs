//! netmesh command-line front end
//!
//! - `cli`: clap definitions
//! - `commands`: `run`, `plan` and `stop`

pub mod cli;
pub mod commands;

use anyhow::{Context, Result};
use env_logger::Env;
use log::LevelFilter;
use netmesh::MeshError;

/// Exit status of an interrupted run (128 + SIGINT)
pub const EXIT_INTERRUPTED: i32 = 130;

/// Initialize logging
///
/// `level` applies unless `RUST_LOG` is set.
pub fn init_logging(level: LevelFilter) -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or(level.to_string()))
        .format_timestamp_millis()
        .format_module_path(false)
        .format_target(false)
        .try_init()
        .context("Failed to initialize logging")
}

/// Process exit status for the outcome of a command.
///
/// Link failures never reach here: they are part of a successful report.
pub fn exit_code(result: &Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => match e.downcast_ref::<MeshError>() {
            Some(MeshError::Interrupted { .. }) => EXIT_INTERRUPTED,
            _ => 1,
        },
    }
}

#[cfg(test)]
mod tests {
    use netmesh::DirectoryError;

    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&Ok(())), 0);

        let interrupted: Result<()> = Err(MeshError::Interrupted { completed_rounds: 2 }.into());
        assert_eq!(exit_code(&interrupted), EXIT_INTERRUPTED);

        let empty: Result<()> = Err(MeshError::from(DirectoryError::empty("all nodes")).into());
        assert_eq!(exit_code(&empty), 1);

        let other: Result<()> = Err(anyhow::anyhow!("inventory missing"));
        assert_eq!(exit_code(&other), 1);
    }
}
