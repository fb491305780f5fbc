//! The scan engine: striped workers feeding one persisting consumer.

pub mod coordinator;
pub mod handoff;
pub mod pool;

pub use coordinator::{ScanReport, Scanner, StopReason};
pub use handoff::{HandoffBuffer, Producer, QueueEntry};
pub use pool::{PoolProgress, WorkerExit, WorkerPool, WorkerReport};
