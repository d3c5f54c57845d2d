//! Per-transfer bookkeeping.
//!
//! A `TransferSession` lives for exactly one send or receive.  It holds
//! the sequence number, the retry and error budgets in use, the file
//! buffer and the counters that end up in the final `TransferReport`.

use crate::serial::protocols::{build_progress, BLOCK_SIZE};
use crate::serial::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Terminal state of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransferOutcome {
    Success,
    ProtocolFailure,
    Cancelled,
    IoFailure,
}

impl TransferOutcome {
    fn state(&self) -> TransferState {
        match self {
            Self::Success => TransferState::Completed,
            Self::Cancelled => TransferState::Cancelled,
            Self::ProtocolFailure | Self::IoFailure => TransferState::Failed,
        }
    }
}

/// Summary handed back to the caller once a transfer ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReport {
    pub transfer_id: String,
    pub direction: TransferDirection,
    pub file_name: String,
    pub outcome: TransferOutcome,
    /// Operator-facing reason for the outcome.
    pub message: String,
    /// Bytes written to the destination (receive) or acknowledged file
    /// bytes (send).
    pub bytes: u64,
    pub blocks: u32,
    pub errors: u32,
    pub retries: u32,
    pub timeouts: u32,
    pub duplicates: u32,
    pub eot_acknowledged: bool,
    pub elapsed_ms: u64,
    pub started_at: DateTime<Utc>,
}

impl TransferReport {
    pub fn is_success(&self) -> bool {
        self.outcome == TransferOutcome::Success
    }
}

/// Mutable state of one transfer.
#[derive(Debug)]
pub struct TransferSession {
    pub id: String,
    pub direction: TransferDirection,
    pub file_name: String,
    /// Sender: next block to send.  Receiver: last accepted block.
    pub seq: u8,
    /// Consecutive bad blocks (receiver).
    pub errors: u32,
    pub retries: u32,
    pub timeouts: u32,
    pub duplicates: u32,
    pub blocks: u32,
    /// Payload bytes moved over the link.
    pub bytes: u64,
    pub buffer: Vec<u8>,
    pub offset: usize,
    pub expected_size: Option<u64>,
    /// Bytes already handed to the destination.
    pub file_offset: u64,
    started: Instant,
    started_at: DateTime<Utc>,
}

impl TransferSession {
    /// `buffer_size` is rounded down to whole blocks, minimum one.
    pub fn new(
        direction: TransferDirection,
        file_name: impl Into<String>,
        buffer_size: usize,
        expected_size: Option<u64>,
    ) -> Self {
        let blocks = (buffer_size / BLOCK_SIZE).max(1);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            direction,
            file_name: file_name.into(),
            seq: match direction {
                TransferDirection::Send => 1,
                TransferDirection::Receive => 0,
            },
            errors: 0,
            retries: 0,
            timeouts: 0,
            duplicates: 0,
            blocks: 0,
            bytes: 0,
            buffer: vec![0u8; blocks * BLOCK_SIZE],
            offset: 0,
            expected_size,
            file_offset: 0,
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// Log prefix, e.g. `[xmodem:recv]`.
    pub fn tag(&self) -> String {
        format!("[xmodem:{}]", self.direction.label())
    }

    /// How many of the next `len` buffered bytes belong in the file.
    ///
    /// Without a known size every byte is written; with one, writes stop
    /// at the size.
    pub fn bytes_for_write(&self, len: usize) -> usize {
        match self.expected_size {
            Some(size) if size > 0 => {
                let left = size.saturating_sub(self.file_offset);
                len.min(usize::try_from(left).unwrap_or(usize::MAX))
            }
            _ => len,
        }
    }

    pub fn progress(&self, state: TransferState, file_size: u64) -> TransferProgress {
        build_progress(
            &self.id,
            &self.file_name,
            file_size,
            self.bytes,
            self.blocks,
            self.direction,
            state,
            self.errors,
            self.retries,
            self.started,
        )
    }

    pub fn report(
        &self,
        outcome: TransferOutcome,
        message: impl Into<String>,
        eot_acknowledged: bool,
    ) -> TransferReport {
        let bytes = match self.direction {
            TransferDirection::Receive => self.file_offset,
            TransferDirection::Send => self.bytes,
        };
        TransferReport {
            transfer_id: self.id.clone(),
            direction: self.direction,
            file_name: self.file_name.clone(),
            outcome,
            message: message.into(),
            bytes,
            blocks: self.blocks,
            errors: self.errors,
            retries: self.retries,
            timeouts: self.timeouts,
            duplicates: self.duplicates,
            eot_acknowledged,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            started_at: self.started_at,
        }
    }

    /// Final progress snapshot for `outcome`.
    pub fn final_progress(&self, outcome: TransferOutcome, file_size: u64) -> TransferProgress {
        self.progress(outcome.state(), file_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_defaults() {
        let tx = TransferSession::new(TransferDirection::Send, "a.bin", 4096, None);
        assert_eq!(tx.seq, 1);
        assert_eq!(tx.buffer.len(), 4096);
        let rx = TransferSession::new(TransferDirection::Receive, "a.bin", 4096, None);
        assert_eq!(rx.seq, 0);
        assert_ne!(tx.id, rx.id);
        assert_eq!(rx.tag(), "[xmodem:recv]");
    }

    #[test]
    fn test_buffer_rounded_to_blocks() {
        let s = TransferSession::new(TransferDirection::Receive, "x", 1000, None);
        assert_eq!(s.buffer.len(), 896);
        let s = TransferSession::new(TransferDirection::Receive, "x", 0, None);
        assert_eq!(s.buffer.len(), BLOCK_SIZE);
    }

    #[test]
    fn test_bytes_for_write_without_size() {
        let s = TransferSession::new(TransferDirection::Receive, "x", 4096, None);
        assert_eq!(s.bytes_for_write(4096), 4096);
        let s = TransferSession::new(TransferDirection::Receive, "x", 4096, Some(0));
        assert_eq!(s.bytes_for_write(128), 128);
    }

    #[test]
    fn test_bytes_for_write_truncates_to_expected_size() {
        let mut s = TransferSession::new(TransferDirection::Receive, "x", 4096, Some(5000));
        assert_eq!(s.bytes_for_write(4096), 4096);
        s.file_offset = 4096;
        assert_eq!(s.bytes_for_write(4096), 904);
        s.file_offset = 5000;
        assert_eq!(s.bytes_for_write(128), 0);
    }

    #[test]
    fn test_report_carries_counters() {
        let mut s = TransferSession::new(TransferDirection::Send, "f.txt", 4096, None);
        s.bytes = 300;
        s.blocks = 3;
        s.retries = 2;
        s.timeouts = 1;
        let r = s.report(TransferOutcome::Success, "Send OK", true);
        assert!(r.is_success());
        assert_eq!(r.bytes, 300);
        assert_eq!(r.blocks, 3);
        assert_eq!(r.retries, 2);
        assert_eq!(r.timeouts, 1);
        assert!(r.eot_acknowledged);

        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["outcome"], "success");
        assert_eq!(json["eotAcknowledged"], true);
    }

    #[test]
    fn test_final_progress_state() {
        let s = TransferSession::new(TransferDirection::Receive, "x", 4096, None);
        let p = s.final_progress(TransferOutcome::Cancelled, 0);
        assert_eq!(p.state, TransferState::Cancelled);
        let p = s.final_progress(TransferOutcome::IoFailure, 0);
        assert_eq!(p.state, TransferState::Failed);
    }
}
