//! Resumable snapshots of executions suspended in a Wait state.
//!
//! While a top-level Wait is sleeping, the execution's logical position is
//! fully described by a [`Snapshot`]: which state it waits in, the payload
//! it will carry on, where it goes next and when. Persisting a snapshot
//! and handing it to [`Interpreter::resume_execution`] continues the
//! execution in another process.
//!
//! [`Interpreter::resume_execution`]: crate::execution::Interpreter::resume_execution

use crate::definition::DefinitionRef;
use crate::execution::error::SnapshotError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version identifier for snapshot format
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serializable position of a suspended execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Snapshot format version
    pub version: u32,

    pub execution_id: String,
    pub execution_name: String,
    pub definition: DefinitionRef,

    /// Original execution input, exposed as `$$.Execution.Input`
    pub input: Value,
    pub started_at: DateTime<Utc>,

    /// Wait state the execution is suspended in
    pub state: String,

    /// Output of the Wait state
    pub payload: Value,

    /// State to continue with; `None` when the Wait ends the machine
    pub next: Option<String>,

    /// When the wait elapses
    pub resume_at: DateTime<Utc>,

    /// When the snapshot was taken
    pub taken_at: DateTime<Utc>,
}

/// Binary layout: bincode cannot encode arbitrary JSON values, so payloads
/// travel as JSON text.
#[derive(Serialize, Deserialize)]
struct BinarySnapshot {
    version: u32,
    execution_id: String,
    execution_name: String,
    definition: DefinitionRef,
    input: String,
    started_at: DateTime<Utc>,
    state: String,
    payload: String,
    next: Option<String>,
    resume_at: DateTime<Utc>,
    taken_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        serde_json::to_string(self).map_err(|e| SnapshotError::SerializationFailed(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        let snapshot: Self = serde_json::from_str(json)
            .map_err(|e| SnapshotError::DeserializationFailed(e.to_string()))?;
        snapshot.check_version()?;
        Ok(snapshot)
    }

    pub fn to_binary(&self) -> Result<Vec<u8>, SnapshotError> {
        let encode = |value: &Value| {
            serde_json::to_string(value).map_err(|e| SnapshotError::SerializationFailed(e.to_string()))
        };
        let wire = BinarySnapshot {
            version: self.version,
            execution_id: self.execution_id.clone(),
            execution_name: self.execution_name.clone(),
            definition: self.definition.clone(),
            input: encode(&self.input)?,
            started_at: self.started_at,
            state: self.state.clone(),
            payload: encode(&self.payload)?,
            next: self.next.clone(),
            resume_at: self.resume_at,
            taken_at: self.taken_at,
        };
        bincode::serialize(&wire).map_err(|e| SnapshotError::SerializationFailed(e.to_string()))
    }

    pub fn from_binary(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let wire: BinarySnapshot = bincode::deserialize(bytes)
            .map_err(|e| SnapshotError::DeserializationFailed(e.to_string()))?;
        let decode = |text: &str| {
            serde_json::from_str::<Value>(text)
                .map_err(|e| SnapshotError::DeserializationFailed(e.to_string()))
        };
        let snapshot = Self {
            version: wire.version,
            execution_id: wire.execution_id,
            execution_name: wire.execution_name,
            definition: wire.definition,
            input: decode(&wire.input)?,
            started_at: wire.started_at,
            state: wire.state,
            payload: decode(&wire.payload)?,
            next: wire.next,
            resume_at: wire.resume_at,
            taken_at: wire.taken_at,
        };
        snapshot.check_version()?;
        Ok(snapshot)
    }

    /// Time left until the wait elapses, measured against `now`.
    pub fn remaining(&self, now: DateTime<Utc>) -> std::time::Duration {
        (self.resume_at - now).to_std().unwrap_or_default()
    }

    fn check_version(&self) -> Result<(), SnapshotError> {
        if self.version == SNAPSHOT_VERSION {
            Ok(())
        } else {
            Err(SnapshotError::UnsupportedVersion {
                found: self.version,
                supported: SNAPSHOT_VERSION,
            })
        }
    }
}
