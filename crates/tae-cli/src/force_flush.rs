use std::path::Path;
use std::thread;
use std::time::Duration;

use clap::Args;
use tae::{Config, Engine};
use tae_primitives::{CancelToken, TableId};

use crate::exit_code::CliError;

/// `force-flush` loop for a table: periodically triggers a flush,
/// optionally asserting every attempt must succeed.
#[derive(Args)]
pub struct ForceFlushArgs {
    /// Database name to open the table in.
    #[arg(long)]
    db: String,
    /// Numeric table id to flush. The catalog's `TableEntry` carries no
    /// name, only an id.
    #[arg(long)]
    table: u64,
    /// How long to wait between flush attempts (`humantime` syntax, e.g. `30s`).
    #[arg(long, default_value = "30s")]
    period: String,
    /// Number of flush attempts to run before exiting. `0` means run
    /// forever (until the process is killed).
    #[arg(long, default_value_t = 1)]
    iterations: u64,
    /// Exit non-zero the moment any attempt fails to freeze an object,
    /// instead of logging and continuing to the next period.
    #[arg(long)]
    must_success: bool,
}

pub fn run(data_dir: &Path, args: ForceFlushArgs) -> Result<(), CliError> {
    let period = humantime::parse_duration(&args.period)
        .map_err(|e| CliError::Engine(tae::TaeError::Config(format!("--period: {e}"))))?;
    let table_id = TableId(args.table);

    let engine = Engine::open(data_dir, Config::default())?;
    let cancel = CancelToken::new();
    // Resolves the db name once up front; a rename mid-loop would require
    // re-resolving, which this straightforward operator loop does not do.
    let _db = engine.database(&args.db)?;

    let mut attempt = 0u64;
    loop {
        attempt += 1;
        match engine.force_flush(table_id) {
            Ok(frozen) => {
                tracing::info!(attempt, table = args.table, frozen = ?frozen, "force-flush attempt succeeded");
            }
            Err(e) => {
                tracing::warn!(attempt, table = args.table, error = %e, "force-flush attempt failed");
                if args.must_success {
                    return Err(CliError::AssertionFailed(format!(
                        "force-flush attempt {attempt} for table {} failed: {e}",
                        args.table
                    )));
                }
            }
        }
        cancel.check().map_err(|_| CliError::AssertionFailed("cancelled".to_string()))?;

        if args.iterations != 0 && attempt >= args.iterations {
            break;
        }
        thread::sleep(period.min(Duration::from_secs(3600)));
    }

    engine.close()?;
    Ok(())
}
