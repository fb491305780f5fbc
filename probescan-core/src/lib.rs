//! # probescan-core
//!
//! Resumable, gap-aware scanning of an integer identifier space.
//!
//! A scan stripes an [`IdentifierSet`](ids::IdentifierSet) across a pool of
//! concurrent workers. Each worker asks a [`Probe`](probe::Probe) whether the
//! external source holds anything at an identifier and hands the answer to a
//! single consumer, which records every probed identifier in a ledger and
//! writes present payloads into schema-declared tables. A present payload
//! outside the configured [`IdentifierRange`](ids::IdentifierRange) stops the
//! scan; results already produced are still persisted.
//!
//! ## Architecture
//!
//! - [`ids`]: identifiers, ranges, partitioning, and the key codec
//! - [`probe`]: the probe contract and the HTTP probe
//! - [`scan`]: handoff buffer, worker pool, and the coordinating consumer
//! - [`store`]: ledger, schema/extractor/broadcast engine, SQLite backend,
//!   and gap queries
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use probescan_core::{
//!     config::{RetryPolicy, ScanSettings},
//!     ids::IdentifierSet,
//!     probe::{HttpProbe, KeyFormat},
//!     scan::Scanner,
//!     store::{Ledger, SqliteScanStore, schema::Schema},
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! async fn scan() -> probescan_core::error::Result<()> {
//!     let settings = ScanSettings::default();
//!     let store =
//!         SqliteScanStore::open("scan.sqlite", Schema::empty(), settings.broadcast)
//!             .await?;
//!     let probe = HttpProbe::new(
//!         "https://api.example.com/items/{key}",
//!         KeyFormat::Decimal,
//!         RetryPolicy::default(),
//!     )?;
//!
//!     let scanner = Scanner::new(store, Arc::new(probe), settings);
//!     let report = scanner
//!         .run(IdentifierSet::range(1, 10_000), CancellationToken::new())
//!         .await?;
//!     println!("stopped: {:?}", report.stop);
//!
//!     for hole in scanner.store().holes().await? {
//!         println!("{} .. {}", hole.start, hole.end);
//!     }
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

/// Engine settings and retry policy
pub mod config;

/// Error types and error handling utilities
pub mod error;

/// Identifier model, partitioning, and key codec
pub mod ids;

/// Probe contract and HTTP implementation
pub mod probe;

/// Worker pool, handoff buffer, and scan coordinator
pub mod scan;

/// Ledger, schema tables, and gap queries
pub mod store;

pub use error::{Result, ScanError};
