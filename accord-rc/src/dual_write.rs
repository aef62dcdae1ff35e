//! Dual-write pipeline interface.
//!
//! The pipeline is an external collaborator; Accord only consumes its
//! write-back primitive. Repair writes never touch either store directly:
//! everything the resolver applies funnels through `dual_write_update`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use accord_common::types::Record;
use accord_common::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::stores::MemoryStore;

/// Consistency level requested from the pipeline for a write-back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyLevel {
    Eventual,
    Strong,
}

/// Acknowledgement returned by the pipeline.
#[derive(Debug, Clone, Deserialize)]
pub struct WriteAck {
    pub success: bool,
    pub operation_id: String,
}

#[async_trait]
pub trait DualWriteClient: Send + Sync {
    /// Write `data` for (table, primary_key) through the pipeline, which
    /// propagates it to both stores.
    async fn dual_write_update(
        &self,
        table: &str,
        primary_key: &str,
        data: &Record,
        level: ConsistencyLevel,
    ) -> Result<WriteAck>;
}

#[derive(Serialize)]
struct DualWriteRequest<'a> {
    table: &'a str,
    primary_key: &'a str,
    data: &'a Record,
    consistency_level: ConsistencyLevel,
}

/// HTTP client for the pipeline's write-back endpoint.
pub struct HttpDualWriteClient {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpDualWriteClient {
    pub fn new(endpoint: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::DualWrite(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            client,
        })
    }
}

#[async_trait]
impl DualWriteClient for HttpDualWriteClient {
    async fn dual_write_update(
        &self,
        table: &str,
        primary_key: &str,
        data: &Record,
        level: ConsistencyLevel,
    ) -> Result<WriteAck> {
        let request = DualWriteRequest {
            table,
            primary_key,
            data,
            consistency_level: level,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::DualWrite(format!("pipeline request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::DualWrite(format!(
                "pipeline returned HTTP {}",
                response.status()
            )));
        }

        let ack: WriteAck = response
            .json()
            .await
            .map_err(|e| Error::DualWrite(format!("invalid pipeline response: {e}")))?;
        tracing::debug!(
            table = %table,
            primary_key = %primary_key,
            operation_id = %ack.operation_id,
            success = ack.success,
            "Dual-write acknowledged"
        );
        Ok(ack)
    }
}

/// Stand-in used when no pipeline endpoint is configured: every write-back
/// fails with an explicit error so resolution outcomes report it instead of
/// pretending drift was repaired.
pub struct DisabledDualWriteClient;

#[async_trait]
impl DualWriteClient for DisabledDualWriteClient {
    async fn dual_write_update(
        &self,
        _table: &str,
        _primary_key: &str,
        _data: &Record,
        _level: ConsistencyLevel,
    ) -> Result<WriteAck> {
        Err(Error::DualWrite(
            "no dual-write endpoint configured".to_string(),
        ))
    }
}

/// One captured write-back.
#[derive(Debug, Clone)]
pub struct RecordedWrite {
    pub table: String,
    pub primary_key: String,
    pub data: Record,
    pub level: ConsistencyLevel,
    pub operation_id: String,
}

/// Test double: records every write, can be forced to fail, and optionally
/// applies writes to memory stores so tests can observe convergence.
#[derive(Default)]
pub struct RecordingDualWriteClient {
    writes: std::sync::Mutex<Vec<RecordedWrite>>,
    next_id: AtomicU64,
    failing: AtomicBool,
    targets: Vec<Arc<MemoryStore>>,
}

impl RecordingDualWriteClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Propagate every accepted write into the given stores, the way the
    /// real pipeline fans out to both engines.
    pub fn with_targets(targets: Vec<Arc<MemoryStore>>) -> Self {
        Self {
            targets,
            ..Self::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().expect("recording lock").clone()
    }
}

#[async_trait]
impl DualWriteClient for RecordingDualWriteClient {
    async fn dual_write_update(
        &self,
        table: &str,
        primary_key: &str,
        data: &Record,
        level: ConsistencyLevel,
    ) -> Result<WriteAck> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::DualWrite("simulated pipeline failure".to_string()));
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let operation_id = format!("dw-{n}");
        for target in &self.targets {
            target.insert(table, primary_key, data.clone());
        }
        self.writes.lock().expect("recording lock").push(RecordedWrite {
            table: table.to_string(),
            primary_key: primary_key.to_string(),
            data: data.clone(),
            level,
            operation_id: operation_id.clone(),
        });
        Ok(WriteAck {
            success: true,
            operation_id,
        })
    }
}
