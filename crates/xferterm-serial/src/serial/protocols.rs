//! XMODEM (checksum) wire format.
//!
//! Framing constants, block construction and verification, the
//! baud-proportional payload timeout, and progress helpers shared by
//! the sender and the receiver.

use crate::serial::types::*;
use std::time::Instant;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Constants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const SOH: u8 = 0x01; // Start of XMODEM 128-byte block
pub const EOT: u8 = 0x04; // End of Transmission
pub const ACK: u8 = 0x06; // Acknowledge
pub const NAK: u8 = 0x15; // Negative Acknowledge

/// Payload bytes per block.
pub const BLOCK_SIZE: usize = 128;
/// `SOH`, sequence, complement, payload, checksum.
pub const FRAME_LEN: usize = 3 + BLOCK_SIZE + 1;
/// Fill for the tail of the last block.
pub const PAD_BYTE: u8 = 0x00;

/// Floor for the payload read timeout.
pub const MIN_PAYLOAD_TIMEOUT_MS: u64 = 1000;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Blocks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Calculate simple checksum (sum of all bytes mod 256).
pub fn xmodem_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Build an XMODEM data block, zero-padding short payloads.
pub fn build_xmodem_block(block_num: u8, data: &[u8]) -> Vec<u8> {
    let mut padded = [PAD_BYTE; BLOCK_SIZE];
    let n = data.len().min(BLOCK_SIZE);
    padded[..n].copy_from_slice(&data[..n]);

    let mut block = Vec::with_capacity(FRAME_LEN);
    block.push(SOH);
    block.push(block_num);
    block.push(!block_num); // One's complement
    block.extend_from_slice(&padded);
    block.push(xmodem_checksum(&padded));
    block
}

/// Time allowed for the rest of a block once its first byte arrived.
///
/// 128 bytes at 10 bits each at the current rate, plus 50%, never less
/// than one second.
pub fn payload_timeout_ms(baud: BaudRate) -> u64 {
    let bits = (BLOCK_SIZE as u64) * 10;
    let ms = bits * 1000 * 3 / (u64::from(baud.value()) * 2);
    ms.max(MIN_PAYLOAD_TIMEOUT_MS)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Progress
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build transfer progress info.
#[allow(clippy::too_many_arguments)]
pub fn build_progress(
    transfer_id: &str,
    file_name: &str,
    file_size: u64,
    bytes_transferred: u64,
    block_number: u32,
    direction: TransferDirection,
    state: TransferState,
    error_count: u32,
    retry_count: u32,
    start_time: Instant,
) -> TransferProgress {
    let elapsed_ms = start_time.elapsed().as_millis() as u64;
    let bytes_per_second = if elapsed_ms > 0 {
        (bytes_transferred as f64) / (elapsed_ms as f64 / 1000.0)
    } else {
        0.0
    };
    let percent_complete = if file_size > 0 {
        ((bytes_transferred as f64 / file_size as f64) * 100.0).min(100.0)
    } else {
        0.0
    };
    let remaining_bytes = file_size.saturating_sub(bytes_transferred);
    let eta_ms = if bytes_per_second > 0.0 {
        ((remaining_bytes as f64 / bytes_per_second) * 1000.0) as u64
    } else {
        0
    };

    TransferProgress {
        transfer_id: transfer_id.to_string(),
        file_name: file_name.to_string(),
        file_size,
        bytes_transferred,
        block_number,
        total_blocks: calculate_total_blocks(file_size),
        direction,
        state,
        error_count,
        retry_count,
        bytes_per_second,
        elapsed_ms,
        eta_ms,
        percent_complete,
    }
}

/// Number of 128-byte blocks needed for `file_size` bytes.
pub fn calculate_total_blocks(file_size: u64) -> u32 {
    let block_size = BLOCK_SIZE as u64;
    ((file_size + block_size - 1) / block_size) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xmodem_checksum() {
        let data = [1u8, 2, 3, 4, 5];
        assert_eq!(xmodem_checksum(&data), 15);
        assert_eq!(xmodem_checksum(&[0xFF, 0x02]), 0x01);
        assert_eq!(xmodem_checksum(&[]), 0);
    }

    #[test]
    fn test_build_xmodem_block_layout() {
        let data = b"Hello, XMODEM!";
        let block = build_xmodem_block(1, data);
        assert_eq!(block.len(), FRAME_LEN);
        assert_eq!(block[0], SOH);
        assert_eq!(block[1], 1);
        assert_eq!(block[2], 0xFE);
        let payload = &block[3..3 + BLOCK_SIZE];
        assert_eq!(&payload[..data.len()], data);
        assert!(payload[data.len()..].iter().all(|&b| b == PAD_BYTE));
        assert_eq!(block[FRAME_LEN - 1], xmodem_checksum(payload));
    }

    #[test]
    fn test_block_number_zero_complement() {
        let block = build_xmodem_block(0, &[0xAA; BLOCK_SIZE]);
        assert_eq!(block[1], 0x00);
        assert_eq!(block[2], 0xFF);
        assert_eq!(block[FRAME_LEN - 1], xmodem_checksum(&[0xAA; BLOCK_SIZE]));
    }

    #[test]
    fn test_payload_timeout_floor() {
        assert_eq!(payload_timeout_ms(BaudRate::Baud9600), 1000);
        assert_eq!(payload_timeout_ms(BaudRate::Baud115200), 1000);
        assert_eq!(payload_timeout_ms(BaudRate::Baud2400), 1000);
    }

    #[test]
    fn test_payload_timeout_floor_dominates_at_9600_and_19200() {
        // Raw budgets are 200 ms and 100 ms; both sit under the floor, so
        // doubling the rate from 9600 does not halve the timeout.
        assert_eq!(payload_timeout_ms(BaudRate::Baud9600), MIN_PAYLOAD_TIMEOUT_MS);
        assert_eq!(payload_timeout_ms(BaudRate::Baud19200), MIN_PAYLOAD_TIMEOUT_MS);
        assert_eq!(
            payload_timeout_ms(BaudRate::Baud9600),
            payload_timeout_ms(BaudRate::Baud19200)
        );
    }

    #[test]
    fn test_payload_timeout_scales_with_baud() {
        assert_eq!(payload_timeout_ms(BaudRate::Baud1200), 1600);
        assert_eq!(payload_timeout_ms(BaudRate::Baud300), 6400);
        assert_eq!(
            payload_timeout_ms(BaudRate::Baud300),
            4 * payload_timeout_ms(BaudRate::Baud1200)
        );
    }

    #[test]
    fn test_calculate_total_blocks() {
        assert_eq!(calculate_total_blocks(0), 0);
        assert_eq!(calculate_total_blocks(128), 1);
        assert_eq!(calculate_total_blocks(129), 2);
        assert_eq!(calculate_total_blocks(4096), 32);
    }

    #[test]
    fn test_build_progress() {
        let start = Instant::now();
        let progress = build_progress(
            "xfer-1",
            "test.bin",
            10240,
            5120,
            40,
            TransferDirection::Send,
            TransferState::InProgress,
            0,
            0,
            start,
        );
        assert_eq!(progress.file_name, "test.bin");
        assert_eq!(progress.file_size, 10240);
        assert_eq!(progress.total_blocks, 80);
        assert_eq!(progress.bytes_transferred, 5120);
        assert!((progress.percent_complete - 50.0).abs() < 0.1);
    }

    #[test]
    fn test_build_progress_unknown_size() {
        let progress = build_progress(
            "xfer-2",
            "in.bin",
            0,
            256,
            2,
            TransferDirection::Receive,
            TransferState::InProgress,
            1,
            0,
            Instant::now(),
        );
        assert_eq!(progress.percent_complete, 0.0);
        assert_eq!(progress.eta_ms, 0);
        assert_eq!(progress.total_blocks, 0);
    }
}
