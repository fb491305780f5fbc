//! Shared fixtures for core integration tests.
#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use probescan_core::Result;
use probescan_core::ids::Identifier;
use probescan_core::probe::{Payload, Probe, ProbeError};
use probescan_core::store::extract::Extractor;
use probescan_core::store::schema::{ColumnType, FieldDef, Schema, TableDef};
use probescan_core::store::{Hole, Ledger, RecordOutcome, ScanStore};

/// Payload shaped like a campaign with fan-out events.
pub fn campaign(id: Identifier, events: &[&str]) -> Payload {
    json!({
        "campaign": {
            "id": format!("c-{id}"),
            "name": format!("Campaign {id}"),
            "events": events
                .iter()
                .map(|event| json!({"id": event, "title": format!("{event} title")}))
                .collect::<Vec<_>>(),
        }
    })
}

pub fn campaign_schema() -> Schema {
    Schema::builder()
        .table(
            TableDef::new("campaigns")
                .field(
                    FieldDef::new("mapped_id", ColumnType::Integer, Extractor::Identifier)
                        .primary_key(),
                )
                .field(FieldDef::new(
                    "campaign_id",
                    ColumnType::Text,
                    Extractor::pointer("/campaign/id"),
                ))
                .field(FieldDef::new(
                    "name",
                    ColumnType::Text,
                    Extractor::pointer("/campaign/name"),
                )),
        )
        .table(
            TableDef::new("events")
                .field(
                    FieldDef::new(
                        "event_id",
                        ColumnType::Text,
                        Extractor::each("/campaign/events", "/id"),
                    )
                    .primary_key(),
                )
                .field(FieldDef::new(
                    "campaign_id",
                    ColumnType::Text,
                    Extractor::pointer("/campaign/id"),
                ))
                .field(FieldDef::new(
                    "mapped_id",
                    ColumnType::Integer,
                    Extractor::Identifier,
                )),
        )
        .build()
        .expect("campaign schema is valid")
}

/// What a [`FakeProbe`] answers for one identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Answer {
    Absent,
    Present,
    Fail,
}

/// Probe driven by a closure, recording every identifier it was asked for.
pub struct FakeProbe {
    answer: Box<dyn Fn(Identifier) -> Answer + Send + Sync>,
    delay: Duration,
    calls: Mutex<Vec<Identifier>>,
}

impl FakeProbe {
    pub fn new<F>(delay: Duration, answer: F) -> Arc<Self>
    where
        F: Fn(Identifier) -> Answer + Send + Sync + 'static,
    {
        Arc::new(Self {
            answer: Box::new(answer),
            delay,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<Identifier> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }
}

#[async_trait]
impl Probe for FakeProbe {
    async fn probe(
        &self,
        id: Identifier,
        _cancel: &CancellationToken,
    ) -> std::result::Result<Option<Payload>, ProbeError> {
        self.calls.lock().expect("calls lock").push(id);
        if self.delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.delay).await;
        }
        match (self.answer)(id) {
            Answer::Absent => Ok(None),
            Answer::Present => Ok(Some(campaign(id, &["a", "b"]))),
            Answer::Fail => Err(ProbeError::UnexpectedStatus { id, status: 403 }),
        }
    }
}

/// Store wrapper that logs record order and checks there is never more
/// than one writer at a time.
pub struct RecordingStore<S> {
    inner: S,
    order: Mutex<Vec<Identifier>>,
    writing: AtomicBool,
}

impl<S> RecordingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            order: Mutex::new(Vec::new()),
            writing: AtomicBool::new(false),
        }
    }

    pub fn order(&self) -> Vec<Identifier> {
        self.order.lock().expect("order lock").clone()
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: ScanStore> Ledger for RecordingStore<S> {
    async fn minimum(&self) -> Result<Option<Identifier>> {
        self.inner.minimum().await
    }

    async fn maximum(&self) -> Result<Option<Identifier>> {
        self.inner.maximum().await
    }

    async fn holes(&self) -> Result<Vec<Hole>> {
        self.inner.holes().await
    }

    async fn checked(&self) -> Result<BTreeSet<Identifier>> {
        self.inner.checked().await
    }

    async fn count(&self) -> Result<u64> {
        self.inner.count().await
    }
}

#[async_trait]
impl<S: ScanStore> ScanStore for RecordingStore<S> {
    async fn record(
        &self,
        id: Identifier,
        payload: Option<&Payload>,
    ) -> Result<RecordOutcome> {
        assert!(
            !self.writing.swap(true, Ordering::SeqCst),
            "concurrent writers detected"
        );
        let outcome = self.inner.record(id, payload).await;
        self.order.lock().expect("order lock").push(id);
        self.writing.store(false, Ordering::SeqCst);
        outcome
    }
}
