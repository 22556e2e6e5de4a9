//! Journal record types and binary serialization.

use crate::graph::FutureKind;
use crate::state::{ExecutionResult, SuccessValue};
use crate::types::{Address, FutureId, TxHash};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{self, Read, Write};

/// Minimum record size: length (4) + crc (4) + type (1) + id length (2) +
/// timestamp (8) + payload length (4).
pub const MIN_RECORD_SIZE: usize = 4 + 4 + 1 + 2 + 8 + 4;

/// Type of journal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JournalRecordType {
    /// A run was started.
    RunStart = 0,
    /// Execution of a future started; records its shape for reconciliation.
    ExecutionStart = 1,
    /// A transaction was submitted. Appended before waiting on it.
    SubmissionRecorded = 2,
    /// The future completed successfully.
    ExecutionSuccess = 3,
    /// The future failed after an on-chain side effect.
    ExecutionFailure = 4,
    /// The confirmation wait timed out.
    ExecutionTimeout = 5,
    /// A previously interrupted confirmation wait was resumed.
    WaitResumed = 6,
}

impl TryFrom<u8> for JournalRecordType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::RunStart),
            1 => Ok(Self::ExecutionStart),
            2 => Ok(Self::SubmissionRecorded),
            3 => Ok(Self::ExecutionSuccess),
            4 => Ok(Self::ExecutionFailure),
            5 => Ok(Self::ExecutionTimeout),
            6 => Ok(Self::WaitResumed),
            _ => Err("Unknown journal record type"),
        }
    }
}

/// Typed payload of a journal record, JSON-encoded on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JournalPayload {
    /// A run was started.
    RunStart {
        /// Run identifier.
        run_id: crate::types::RunId,
        /// Strategy selected for the run.
        strategy: String,
        /// Account addresses available to the run.
        accounts: Vec<Address>,
    },
    /// Execution of a future started.
    ExecutionStart {
        /// Kind of the future at execution time.
        kind: FutureKind,
        /// Dependency set at execution time.
        dependencies: Vec<FutureId>,
        /// Parameter payload at execution time.
        params: Value,
        /// Resolved sending account, if any.
        account: Option<Address>,
        /// Strategy name.
        strategy: String,
    },
    /// A transaction was submitted.
    SubmissionRecorded {
        /// Strategy-constructed payload.
        payload: Value,
        /// Transaction hash, `None` for synchronous resolutions.
        tx: Option<TxHash>,
    },
    /// The future completed successfully.
    ExecutionSuccess {
        /// Success payload.
        value: SuccessValue,
    },
    /// The future failed after an on-chain side effect.
    ExecutionFailure {
        /// The failure result.
        result: ExecutionResult,
    },
    /// The confirmation wait timed out.
    ExecutionTimeout,
    /// A previously interrupted confirmation wait was resumed.
    WaitResumed,
}

impl JournalPayload {
    /// The record type tag for this payload.
    #[must_use]
    pub fn record_type(&self) -> JournalRecordType {
        match self {
            Self::RunStart { .. } => JournalRecordType::RunStart,
            Self::ExecutionStart { .. } => JournalRecordType::ExecutionStart,
            Self::SubmissionRecorded { .. } => JournalRecordType::SubmissionRecorded,
            Self::ExecutionSuccess { .. } => JournalRecordType::ExecutionSuccess,
            Self::ExecutionFailure { .. } => JournalRecordType::ExecutionFailure,
            Self::ExecutionTimeout => JournalRecordType::ExecutionTimeout,
            Self::WaitResumed => JournalRecordType::WaitResumed,
        }
    }
}

/// A single journal record.
///
/// # Record Format
///
/// ```text
/// ┌─────────┬────────┬───────┬──────────┬───────────┬───────────┬─────────┐
/// │ Length  │ CRC32  │ Type  │ Id len   │ FutureId  │ Timestamp │ Payload │
/// │ (4 B)   │ (4 B)  │ (1 B) │ (2 B)    │ (var)     │ (8 B)     │ (var)   │
/// └─────────┴────────┴───────┴──────────┴───────────┴───────────┴─────────┘
/// ```
///
/// The CRC covers everything after the CRC field. Run-level records carry
/// an empty future id.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalRecord {
    /// The future this record is about (empty for run-level records).
    pub future_id: FutureId,
    /// Timestamp (Unix epoch nanoseconds).
    pub timestamp_ns: u64,
    /// Typed payload.
    pub payload: JournalPayload,
}

impl JournalRecord {
    /// Create a record with the current timestamp.
    pub fn new(future_id: FutureId, payload: JournalPayload) -> Self {
        Self {
            future_id,
            timestamp_ns: current_timestamp_ns(),
            payload,
        }
    }

    /// Create a run start record.
    pub fn run_start(
        run_id: crate::types::RunId,
        strategy: impl Into<String>,
        accounts: Vec<Address>,
    ) -> Self {
        Self::new(
            FutureId::new(""),
            JournalPayload::RunStart {
                run_id,
                strategy: strategy.into(),
                accounts,
            },
        )
    }

    /// Create an execution start record.
    pub fn execution_start(
        future_id: FutureId,
        kind: FutureKind,
        dependencies: Vec<FutureId>,
        params: Value,
        account: Option<Address>,
        strategy: impl Into<String>,
    ) -> Self {
        Self::new(
            future_id,
            JournalPayload::ExecutionStart {
                kind,
                dependencies,
                params,
                account,
                strategy: strategy.into(),
            },
        )
    }

    /// Create a submission record.
    pub fn submission(future_id: FutureId, payload: Value, tx: Option<TxHash>) -> Self {
        Self::new(
            future_id,
            JournalPayload::SubmissionRecorded { payload, tx },
        )
    }

    /// Create a success record.
    pub fn success(future_id: FutureId, value: SuccessValue) -> Self {
        Self::new(future_id, JournalPayload::ExecutionSuccess { value })
    }

    /// Create a failure record.
    pub fn failure(future_id: FutureId, result: ExecutionResult) -> Self {
        Self::new(future_id, JournalPayload::ExecutionFailure { result })
    }

    /// Create a timeout record.
    pub fn timeout(future_id: FutureId) -> Self {
        Self::new(future_id, JournalPayload::ExecutionTimeout)
    }

    /// Create a wait-resumed record.
    pub fn wait_resumed(future_id: FutureId) -> Self {
        Self::new(future_id, JournalPayload::WaitResumed)
    }

    /// The record type tag.
    #[must_use]
    pub fn record_type(&self) -> JournalRecordType {
        self.payload.record_type()
    }

    /// Serialize the record to bytes.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let payload_json = serde_json::to_vec(&self.payload)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let id_bytes = self.future_id.as_str().as_bytes();
        if id_bytes.len() > u16::MAX as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "future id too long",
            ));
        }

        // Body: everything the CRC covers.
        let mut body = Vec::with_capacity(1 + 2 + id_bytes.len() + 8 + 4 + payload_json.len());
        body.write_u8(self.record_type() as u8)?;
        body.write_u16::<LittleEndian>(id_bytes.len() as u16)?;
        body.write_all(id_bytes)?;
        body.write_u64::<LittleEndian>(self.timestamp_ns)?;
        body.write_u32::<LittleEndian>(payload_json.len() as u32)?;
        body.write_all(&payload_json)?;

        let crc = crc32fast::hash(&body);
        let total_len = 4 + 4 + body.len();

        let mut record = Vec::with_capacity(total_len);
        record.write_u32::<LittleEndian>(total_len as u32)?;
        record.write_u32::<LittleEndian>(crc)?;
        record.write_all(&body)?;
        Ok(record)
    }

    /// Deserialize a record from the front of `bytes`.
    ///
    /// Returns the record and its total length on success.
    pub fn from_bytes(bytes: &[u8]) -> io::Result<(Self, usize)> {
        if bytes.len() < MIN_RECORD_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Record too small",
            ));
        }

        let mut cursor = io::Cursor::new(bytes);
        let total_len = cursor.read_u32::<LittleEndian>()? as usize;
        let stored_crc = cursor.read_u32::<LittleEndian>()?;

        if total_len < MIN_RECORD_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Record length below minimum",
            ));
        }
        if bytes.len() < total_len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "Record truncated: expected {} bytes, got {}",
                    total_len,
                    bytes.len()
                ),
            ));
        }

        let body = &bytes[8..total_len];
        let computed_crc = crc32fast::hash(body);
        if computed_crc != stored_crc {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("CRC mismatch: expected {stored_crc}, got {computed_crc}"),
            ));
        }

        let mut body_cursor = io::Cursor::new(body);
        let record_type_byte = body_cursor.read_u8()?;
        JournalRecordType::try_from(record_type_byte)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let id_len = body_cursor.read_u16::<LittleEndian>()? as usize;
        let mut id_buf = vec![0u8; id_len];
        body_cursor.read_exact(&mut id_buf)?;
        let future_id = FutureId::new(String::from_utf8_lossy(&id_buf).into_owned());

        let timestamp_ns = body_cursor.read_u64::<LittleEndian>()?;

        let payload_len = body_cursor.read_u32::<LittleEndian>()? as usize;
        let mut payload_buf = vec![0u8; payload_len];
        body_cursor.read_exact(&mut payload_buf)?;
        let payload: JournalPayload = serde_json::from_slice(&payload_buf)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        Ok((
            Self {
                future_id,
                timestamp_ns,
                payload,
            },
            total_len,
        ))
    }
}

/// Get current timestamp in nanoseconds since Unix epoch.
fn current_timestamp_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_roundtrip() {
        let record = JournalRecord::submission(
            FutureId::from("Module#Token"),
            json!({"to": null, "data": "0x6080"}),
            Some(TxHash::new([3; 32])),
        );

        let bytes = record.to_bytes().unwrap();
        let (restored, consumed) = JournalRecord::from_bytes(&bytes).unwrap();

        assert_eq!(consumed, bytes.len());
        assert_eq!(restored.record_type(), JournalRecordType::SubmissionRecorded);
        assert_eq!(restored.future_id, FutureId::from("Module#Token"));
        assert_eq!(restored.payload, record.payload);
    }

    #[test]
    fn run_level_record_has_empty_id() {
        let record = JournalRecord::run_start(crate::types::RunId::new(), "direct", vec![]);
        let bytes = record.to_bytes().unwrap();
        let (restored, _) = JournalRecord::from_bytes(&bytes).unwrap();
        assert_eq!(restored.future_id.as_str(), "");
        assert_eq!(restored.record_type(), JournalRecordType::RunStart);
    }

    #[test]
    fn crc_verification() {
        let record = JournalRecord::timeout(FutureId::from("a"));
        let mut bytes = record.to_bytes().unwrap();

        // Corrupt a byte in the body.
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        let err = JournalRecord::from_bytes(&bytes).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn truncated_record_reports_eof() {
        let record = JournalRecord::failure(
            FutureId::from("a"),
            ExecutionResult::RevertedTransaction {
                tx: TxHash::new([0; 32]),
            },
        );
        let bytes = record.to_bytes().unwrap();
        let err = JournalRecord::from_bytes(&bytes[..bytes.len() - 4]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn consecutive_records_parse_in_sequence() {
        let r1 = JournalRecord::execution_start(
            FutureId::from("a"),
            FutureKind::ContractDeployment,
            vec![],
            json!({"args": [1]}),
            None,
            "direct",
        );
        let r2 = JournalRecord::success(
            FutureId::from("a"),
            SuccessValue::Address {
                address: Address::new([1; 20]),
            },
        );

        let mut bytes = r1.to_bytes().unwrap();
        bytes.extend(r2.to_bytes().unwrap());

        let (first, consumed) = JournalRecord::from_bytes(&bytes).unwrap();
        let (second, _) = JournalRecord::from_bytes(&bytes[consumed..]).unwrap();
        assert_eq!(first.record_type(), JournalRecordType::ExecutionStart);
        assert_eq!(second.record_type(), JournalRecordType::ExecutionSuccess);
    }
}
