use std::path::Path;
use std::sync::Arc;
use std::thread;

use clap::Subcommand;
use rand::Rng;
use tae::{Config, Engine};
use tae_primitives::{Batch, CancelToken, ColumnSchema, Schema, Value};

use crate::exit_code::CliError;

#[derive(Subcommand)]
pub enum MockdataCommand {
    /// Writes a parallel synthetic workload: several threads append random
    /// rows into the same table concurrently.
    BdCase1(BdCase1Args),
}

#[derive(clap::Args)]
pub struct BdCase1Args {
    #[arg(long, default_value = "mockdata")]
    db: String,
    #[arg(long, default_value_t = 4)]
    threads: u32,
    /// Rows each thread appends, one commit per `batch_size` rows.
    #[arg(long, default_value_t = 10_000)]
    rows_per_thread: u64,
    #[arg(long, default_value_t = 100)]
    batch_size: u64,
}

pub fn run(data_dir: &Path, command: MockdataCommand) -> Result<(), CliError> {
    let MockdataCommand::BdCase1(args) = command;

    let engine = Arc::new(Engine::open(data_dir, Config::default())?);
    let cancel = CancelToken::new();

    let db = match engine.database(&args.db) {
        Ok(db) => db,
        Err(_) => engine.create_database(args.db.clone(), &cancel)?,
    };
    let schema = Schema::new(vec![ColumnSchema::new("id").pk(), ColumnSchema::new("payload")]);
    let table = engine.create_table(&db, schema, &cancel)?;
    let table_id = table.id;

    tracing::info!(
        threads = args.threads,
        rows_per_thread = args.rows_per_thread,
        "bd-case1: starting parallel synthetic workload"
    );

    let handles: Vec<_> = (0..args.threads)
        .map(|worker| {
            let engine = engine.clone();
            let cancel = cancel.clone();
            let batch_size = args.batch_size.max(1);
            let rows_per_thread = args.rows_per_thread;
            thread::Builder::new()
                .name(format!("bd-case1-{worker}"))
                .spawn(move || -> Result<(), CliError> {
                    let mut rng = rand::thread_rng();
                    let mut written = 0u64;
                    let base = (worker as u64) << 32;
                    while written < rows_per_thread {
                        let this_batch = batch_size.min(rows_per_thread - written);
                        let ids: Vec<Value> = (0..this_batch).map(|i| Value::I64((base + written + i) as i64)).collect();
                        let payloads: Vec<Value> = (0..this_batch).map(|_| Value::I64(rng.gen())).collect();
                        let batch = Batch { columns: vec![ids, payloads] };

                        let txn = engine.begin();
                        txn.append(table_id, batch).map_err(tae::TaeError::from)?;
                        engine.commit(txn, &cancel)?;
                        written += this_batch;
                    }
                    Ok(())
                })
                .expect("failed to spawn bd-case1 worker thread")
        })
        .collect();

    for handle in handles {
        handle.join().expect("bd-case1 worker thread panicked")?;
    }

    tracing::info!("bd-case1: workload complete");
    engine.close()?;
    Ok(())
}
