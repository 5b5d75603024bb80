use std::process::ExitCode;

use tae::TaeError;
use thiserror::Error;

/// Everything a subcommand can fail with, including the one failure mode
/// that has no `TaeError` counterpart: a `--must-success` run that
/// completed without error but still didn't satisfy its own assertion.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Engine(#[from] TaeError),
    #[error("mandatory-success assertion failed: {0}")]
    AssertionFailed(String),
}

/// Exit codes: 0 on success; non-zero on WAL-flush failure, catalog
/// corruption, or unsatisfied mandatory-success assertion.
fn exit_code_for(err: &CliError) -> u8 {
    match err {
        CliError::Engine(TaeError::Durability(_)) => 2,
        CliError::Engine(TaeError::Catalog(_)) | CliError::Engine(TaeError::Corruption(_)) => 3,
        CliError::AssertionFailed(_) => 4,
        CliError::Engine(_) => 1,
    }
}

pub fn result_to_exit_code(result: Result<(), CliError>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::from(exit_code_for(&e))
        }
    }
}
