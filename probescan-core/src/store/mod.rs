//! Persistence: the ledger of probed identifiers, schema-driven result
//! tables, and read-only gap queries over the ledger.

pub mod broadcast;
pub mod extract;
pub mod schema;
pub mod sqlite;
pub mod value;

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ids::Identifier;
use crate::probe::Payload;

pub use sqlite::SqliteScanStore;

/// Name of the table holding every probed identifier.
pub const LEDGER_TABLE: &str = "checked_ids";

/// Unscanned stretch between two consecutive ledger identifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hole {
    /// Last scanned identifier before the gap.
    pub start: Identifier,
    /// First scanned identifier after the gap.
    pub end: Identifier,
    /// `end - start`.
    pub size: i64,
}

impl Hole {
    pub fn as_tuple(&self) -> (Identifier, Identifier, i64) {
        (self.start, self.end, self.size)
    }

    /// Number of identifiers strictly inside the gap.
    pub fn missing(&self) -> i64 {
        self.size - 1
    }
}

/// What one `record` call wrote.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecordOutcome {
    pub rows_written: usize,
}

/// Read-only queries over the ledger.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Smallest probed identifier, `None` when nothing was probed.
    async fn minimum(&self) -> Result<Option<Identifier>>;

    /// Largest probed identifier, `None` when nothing was probed.
    async fn maximum(&self) -> Result<Option<Identifier>>;

    /// Gaps wider than one, smallest first.
    async fn holes(&self) -> Result<Vec<Hole>>;

    async fn checked(&self) -> Result<BTreeSet<Identifier>>;

    async fn count(&self) -> Result<u64>;
}

/// Write side used by the scan consumer. Only one task writes at a time.
#[async_trait]
pub trait ScanStore: Ledger {
    /// Mark `id` as probed and, when `payload` is present, write its rows.
    /// The ledger entry and the rows commit together.
    async fn record(
        &self,
        id: Identifier,
        payload: Option<&Payload>,
    ) -> Result<RecordOutcome>;
}
