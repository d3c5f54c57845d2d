//! XMODEM receiver.
//!
//! Pulls a file from a remote sender into any `AsyncWrite`.  Blocks are
//! accumulated in the session buffer and flushed to the destination a
//! buffer at a time, truncated to the expected size when one is known.

use crate::serial::link::{Link, ReadFault};
use crate::serial::protocols::*;
use crate::serial::session::{TransferOutcome, TransferReport, TransferSession};
use crate::serial::types::*;
use std::path::Path;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Why the receive loop stopped early.
enum Stop {
    Cancelled,
    Protocol(String),
    Io(String),
}

impl From<SerialError> for Stop {
    fn from(e: SerialError) -> Self {
        Stop::Io(format!("Serial write failed: {}", e.message))
    }
}

/// What happened to the block that was just read.
enum Block {
    Accepted,
    Duplicate,
    Bad(&'static str),
    TimedOut(&'static str),
    Resync,
}

/// Receive a file into `dest`.
///
/// `expected_size` truncates the written data; without it the output is
/// a whole number of blocks.
pub async fn receive<W: AsyncWrite + Unpin>(
    link: &mut Link,
    dest: &mut W,
    file_name: &str,
    expected_size: Option<u64>,
    config: &TransferConfig,
) -> TransferReport {
    let mut session = TransferSession::new(
        TransferDirection::Receive,
        file_name,
        config.buffer_size,
        expected_size,
    );
    let tag = session.tag();
    log::info!(
        "{} {} receiving '{}' on {}",
        tag,
        session.id,
        file_name,
        link.channel().port_name()
    );
    link.emit("Receiving File...");

    let result = run(link, dest, &mut session, config).await;

    let (outcome, message) = match result {
        Ok(()) => (TransferOutcome::Success, "Receive OK".to_string()),
        Err(stop) => {
            let (outcome, message) = match stop {
                Stop::Cancelled => (TransferOutcome::Cancelled, "User cancelled transfer".to_string()),
                Stop::Protocol(m) => (TransferOutcome::ProtocolFailure, m),
                Stop::Io(m) => (TransferOutcome::IoFailure, m),
            };
            link.emit(&message);
            link.emit("Receive fail");
            // Eat any half-sent block before handing the line back.
            let _ = link.read_flush(config.drain_timeout_ms).await;
            (outcome, message)
        }
    };
    link.finish();

    if outcome == TransferOutcome::Success {
        link.emit(&message);
        log::info!(
            "{} {} received {} bytes in {} blocks",
            tag,
            session.id,
            session.file_offset,
            session.blocks
        );
    } else {
        log::warn!("{} {} ended {:?}: {}", tag, session.id, outcome, message);
    }
    link.status()
        .progress(&session.final_progress(outcome, expected_size.unwrap_or(0)));
    session.report(outcome, message, outcome == TransferOutcome::Success)
}

/// Create `path` and receive into it.
pub async fn receive_file(
    link: &mut Link,
    path: &Path,
    expected_size: Option<u64>,
    config: &TransferConfig,
) -> TransferReport {
    let file_name = path.display().to_string();
    let mut file = match tokio::fs::File::create(path).await {
        Ok(f) => f,
        Err(e) => {
            let message = format!("Cannot Open File: {}", e);
            link.emit(&message);
            let session = TransferSession::new(
                TransferDirection::Receive,
                file_name,
                config.buffer_size,
                expected_size,
            );
            return session.report(TransferOutcome::IoFailure, message, false);
        }
    };
    receive(link, &mut file, &file_name, expected_size, config).await
}

async fn run<W: AsyncWrite + Unpin>(
    link: &mut Link,
    dest: &mut W,
    session: &mut TransferSession,
    config: &TransferConfig,
) -> Result<(), Stop> {
    let tag = session.tag();

    // Flush everything first, then kick the remote side.
    flush(link, config.flush_timeout_ms).await?;
    link.write_byte(NAK).await?;

    let mut header_timeouts = 0u32;
    loop {
        if session.errors >= config.error_max {
            return Err(Stop::Protocol(format!(
                "Too many errors ({}), giving up",
                session.errors
            )));
        }

        let first = match link.read_one(true, config.header_timeout_ms as i64).await {
            Ok(b) if b == SOH || b == EOT => b,
            Ok(_) => continue,
            Err(ReadFault::Io(e)) => {
                session.errors += 1;
                link.emit("Error receiving header");
                log::warn!("{} link fault: {} (errors {})", tag, e, session.errors);
                flush(link, config.flush_timeout_ms).await?;
                link.write_byte(NAK).await?;
                continue;
            }
            Err(ReadFault::Timeout) => {
                header_timeouts += 1;
                session.timeouts += 1;
                if header_timeouts > config.retry_max {
                    return Err(Stop::Protocol("Sender not responding".to_string()));
                }
                session.retries += 1;
                log::debug!("{} header timeout {}, re-sending NAK", tag, header_timeouts);
                link.write_byte(NAK).await?;
                continue;
            }
            Err(ReadFault::Abort) => return Err(Stop::Cancelled),
        };
        header_timeouts = 0;

        if first == EOT {
            link.write_byte(ACK).await?;
            let n = session.bytes_for_write(session.offset);
            write_out(dest, session, n).await?;
            dest.flush()
                .await
                .map_err(|e| Stop::Io(format!("Error Writing File: {}", e)))?;
            return Ok(());
        }

        match read_block(link, session, config).await? {
            Block::Accepted => {
                session.errors = 0;
                session.seq = session.seq.wrapping_add(1);
                session.offset += BLOCK_SIZE;
                session.bytes += BLOCK_SIZE as u64;
                session.blocks += 1;
                log::debug!("{} block {} accepted", tag, session.seq);
                if session.offset == session.buffer.len() {
                    let n = session.bytes_for_write(session.offset);
                    write_out(dest, session, n).await?;
                    session.offset = 0;
                }
                link.write_byte(ACK).await?;
                link.status().progress(&session.progress(
                    TransferState::InProgress,
                    session.expected_size.unwrap_or(0),
                ));
            }
            Block::Duplicate => {
                session.duplicates += 1;
                link.emit("Received Duplicate Sector");
                link.write_byte(ACK).await?;
            }
            Block::Resync => {
                flush(link, config.flush_timeout_ms).await?;
            }
            Block::TimedOut(what) => {
                session.timeouts += 1;
                session.errors += 1;
                link.emit(what);
                log::warn!("{} {} (errors {})", tag, what, session.errors);
                flush(link, config.flush_timeout_ms).await?;
                link.write_byte(NAK).await?;
            }
            Block::Bad(what) => {
                session.errors += 1;
                link.emit(what);
                link.emit("Sending NAK");
                log::warn!("{} {} (errors {})", tag, what, session.errors);
                flush(link, config.flush_timeout_ms).await?;
                link.write_byte(NAK).await?;
            }
        }
    }
}

/// Read the rest of a block after its `SOH`.
async fn read_block(
    link: &mut Link,
    session: &mut TransferSession,
    config: &TransferConfig,
) -> Result<Block, Stop> {
    let char_timeout = config.char_timeout_ms as i64;

    let mut header = [0u8; 2];
    for slot in header.iter_mut() {
        *slot = match link.read_one(true, char_timeout).await {
            Ok(b) => b,
            Err(ReadFault::Abort) => return Err(Stop::Cancelled),
            Err(ReadFault::Timeout) => return Ok(Block::Resync),
            Err(ReadFault::Io(_)) => return Ok(Block::Bad("Invalid sector bytes")),
        };
    }
    let [sector, complement] = header;

    if sector.wrapping_add(complement) != 0xFF {
        return Ok(Block::Bad("Invalid sector bytes"));
    }

    if sector == session.seq.wrapping_add(1) {
        let start = session.offset;
        match link
            .read_block(&mut session.buffer[start..start + BLOCK_SIZE])
            .await
        {
            Ok(()) => {}
            Err(ReadFault::Abort) => return Err(Stop::Cancelled),
            Err(ReadFault::Timeout) => return Ok(Block::TimedOut("Timeout receiving block")),
            Err(ReadFault::Io(_)) => return Ok(Block::Bad("Error receiving block")),
        }
        let checksum = xmodem_checksum(&session.buffer[start..start + BLOCK_SIZE]);

        return match link.read_one(true, char_timeout).await {
            Ok(c) if c == checksum => Ok(Block::Accepted),
            Ok(_) => Ok(Block::Bad("Invalid checksum")),
            Err(ReadFault::Abort) => Err(Stop::Cancelled),
            Err(ReadFault::Timeout) => Ok(Block::TimedOut("Timeout receiving checksum")),
            Err(ReadFault::Io(_)) => Ok(Block::Bad("Error receiving checksum")),
        };
    }

    if session.blocks > 0 && sector == session.seq {
        // Retransmission of a block we already ACKed; swallow it unchecked.
        let mut scratch = [0u8; BLOCK_SIZE + 1];
        return match link.read_block(&mut scratch).await {
            Ok(()) => Ok(Block::Duplicate),
            Err(ReadFault::Abort) => Err(Stop::Cancelled),
            // Cut short: not a whole frame, so no ACK.
            Err(ReadFault::Timeout) | Err(ReadFault::Io(_)) => Ok(Block::Resync),
        };
    }

    Ok(Block::Bad("Wrong sector offset"))
}

async fn flush(link: &mut Link, timeout_ms: u64) -> Result<(), Stop> {
    link.read_flush(timeout_ms).await.map_err(|fault| match fault {
        ReadFault::Io(e) => Stop::Io(format!("Serial read failed: {}", e.message)),
        _ => Stop::Cancelled,
    })
}

async fn write_out<W: AsyncWrite + Unpin>(
    dest: &mut W,
    session: &mut TransferSession,
    n: usize,
) -> Result<(), Stop> {
    if n == 0 {
        return Ok(());
    }
    dest.write_all(&session.buffer[..n])
        .await
        .map_err(|e| Stop::Io(format!("Error Writing File: {}", e)))?;
    session.file_offset += n as u64;
    Ok(())
}
