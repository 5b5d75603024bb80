use tae_primitives::{DbId, TableId};

use crate::candidate::ObjectCandidate;
use crate::error::Result;

/// What the scheduler hands off for the "remote" task host: tenant, user,
/// role, db, table, input object stats, and estimated memory. The real RPC
/// transport is out of scope; this descriptor is the full extent of what
/// this engine specifies.
#[derive(Debug, Clone)]
pub struct MergeDescriptor {
    pub tenant: String,
    pub user: String,
    pub role: String,
    pub db_id: DbId,
    pub table_id: TableId,
    pub inputs: Vec<ObjectCandidate>,
    pub estimated_memory_bytes: u64,
}

/// Injectable seam for sending a merge task to a remote compute node. The
/// real RPC wire format is out of this engine's scope, so the scheduler
/// depends on this trait rather than a concrete client — the embedder
/// supplies the transport.
pub trait RemoteDispatcher: Send + Sync {
    fn dispatch(&self, descriptor: &MergeDescriptor) -> Result<()>;
}

/// Stand-in for the real transport: logs the descriptor and reports
/// success. Useful as a default for embedders that have not wired in a
/// remote compute node yet, and in this crate's own tests.
pub struct LoggingRemoteDispatcher;

impl RemoteDispatcher for LoggingRemoteDispatcher {
    fn dispatch(&self, descriptor: &MergeDescriptor) -> Result<()> {
        log::info!(
            "dispatching merge of {} objects for table {:?} to remote compute (est. {} bytes)",
            descriptor.inputs.len(),
            descriptor.table_id,
            descriptor.estimated_memory_bytes
        );
        Ok(())
    }
}
