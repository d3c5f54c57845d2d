//! XMODEM sender.
//!
//! Pushes any `AsyncRead` to a remote receiver, one buffer of file data
//! at a time.  The last block is zero-padded.

use crate::serial::link::{Link, ReadFault};
use crate::serial::protocols::*;
use crate::serial::session::{TransferOutcome, TransferReport, TransferSession};
use crate::serial::types::*;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt};

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

/// Send everything `source` yields.
///
/// `file_size` only feeds progress reporting.
pub async fn send<R: AsyncRead + Unpin>(
    link: &mut Link,
    source: &mut R,
    file_name: &str,
    file_size: Option<u64>,
    config: &TransferConfig,
) -> TransferReport {
    let mut session =
        TransferSession::new(TransferDirection::Send, file_name, config.buffer_size, None);
    let tag = session.tag();
    log::info!(
        "{} {} sending '{}' on {}",
        tag,
        session.id,
        file_name,
        link.channel().port_name()
    );
    link.emit("Sending File...");

    let result = run(link, source, &mut session, file_size.unwrap_or(0), config).await;
    link.finish();

    let (outcome, message, eot_acknowledged) = match result {
        Ok(true) => (TransferOutcome::Success, "Send OK".to_string(), true),
        Ok(false) => {
            link.emit("No Acknowledgment Of End Of File");
            (TransferOutcome::Success, "Send OK (EOT not acknowledged)".to_string(), false)
        }
        Err(Stop::Cancelled) => (TransferOutcome::Cancelled, "User cancelled transfer".to_string(), false),
        Err(Stop::Protocol(m)) => (TransferOutcome::ProtocolFailure, m, false),
        Err(Stop::Io(m)) => (TransferOutcome::IoFailure, m, false),
    };
    link.emit(&message);

    if outcome == TransferOutcome::Success {
        log::info!(
            "{} {} sent {} bytes in {} blocks",
            tag,
            session.id,
            session.bytes,
            session.blocks
        );
    } else {
        log::warn!("{} {} ended {:?}: {}", tag, session.id, outcome, message);
    }
    link.status()
        .progress(&session.final_progress(outcome, file_size.unwrap_or(0)));
    session.report(outcome, message, eot_acknowledged)
}

/// Open `path` and send it.
pub async fn send_file(link: &mut Link, path: &Path, config: &TransferConfig) -> TransferReport {
    let file_name = path.display().to_string();
    let opened = match tokio::fs::File::open(path).await {
        Ok(f) => f.metadata().await.map(|m| (f, m.len())),
        Err(e) => Err(e),
    };
    let (mut file, size) = match opened {
        Ok(pair) => pair,
        Err(e) => {
            let message = format!("Cannot Open Send File: {}", e);
            link.emit(&message);
            let session =
                TransferSession::new(TransferDirection::Send, file_name, config.buffer_size, None);
            return session.report(TransferOutcome::IoFailure, message, false);
        }
    };
    send(link, &mut file, &file_name, Some(size), config).await
}

/// Returns whether the receiver acknowledged `EOT`.
async fn run<R: AsyncRead + Unpin>(
    link: &mut Link,
    source: &mut R,
    session: &mut TransferSession,
    file_size: u64,
    config: &TransferConfig,
) -> Result<bool, Stop> {
    let tag = session.tag();
    let char_timeout = config.char_timeout_ms as i64;

    // Wait for the receiver's first NAK.
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match link.read_one(true, config.header_timeout_ms as i64).await {
            Ok(NAK) => break,
            Ok(_) | Err(ReadFault::Io(_)) => {}
            Err(ReadFault::Timeout) => session.timeouts += 1,
            Err(ReadFault::Abort) => return Err(Stop::Cancelled),
        }
        if attempts >= config.sync_attempts {
            return Err(Stop::Protocol("Receiver not sending NAKs".to_string()));
        }
    }
    log::debug!("{} got sync after {} reads", tag, attempts);

    loop {
        let filled = fill_buffer(source, &mut session.buffer).await?;
        if filled == 0 {
            break;
        }
        session.buffer[filled..].fill(PAD_BYTE);

        let mut pos = 0;
        while pos < filled {
            let size = BLOCK_SIZE.min(filled - pos);
            send_block(link, session, pos, config, char_timeout).await?;
            pos += BLOCK_SIZE;
            session.bytes += size as u64;
            session.blocks += 1;
            session.seq = session.seq.wrapping_add(1);
            link.status()
                .progress(&session.progress(TransferState::InProgress, file_size));
        }
    }

    for _ in 0..config.retry_max {
        link.write_byte(EOT).await?;
        match link.read_one(true, char_timeout).await {
            Ok(ACK) => return Ok(true),
            Ok(_) | Err(ReadFault::Io(_)) => {}
            Err(ReadFault::Timeout) => session.timeouts += 1,
            Err(ReadFault::Abort) => return Err(Stop::Cancelled),
        }
    }
    Ok(false)
}

/// Transmit the block at `pos` until it is ACKed or attempts run out.
async fn send_block(
    link: &mut Link,
    session: &mut TransferSession,
    pos: usize,
    config: &TransferConfig,
    char_timeout: i64,
) -> Result<(), Stop> {
    let tag = session.tag();
    let seq = session.seq;
    let checksum = xmodem_checksum(&session.buffer[pos..pos + BLOCK_SIZE]);

    for attempt in 1..=config.retry_max {
        link.write_byte(SOH).await?;
        link.write_byte(seq).await?;
        link.write_byte(!seq).await?;
        link.write_block(&session.buffer[pos..pos + BLOCK_SIZE]).await?;
        link.write_byte(checksum).await?;

        match link.read_one(true, char_timeout).await {
            Ok(ACK) => return Ok(()),
            Ok(NAK) => log::warn!("{} block {} NAKed (attempt {})", tag, seq, attempt),
            Ok(c) => log::warn!("{} block {} got {:02X} (attempt {})", tag, seq, c, attempt),
            Err(ReadFault::Timeout) => {
                session.timeouts += 1;
                link.emit("Timeout waiting for ACK/NACK");
            }
            Err(ReadFault::Io(e)) => log::warn!("{} block {} link error: {}", tag, seq, e),
            Err(ReadFault::Abort) => return Err(Stop::Cancelled),
        }
        session.retries += 1;
    }
    Err(Stop::Protocol(
        "No Acknowledgment Of Sector, Aborting".to_string(),
    ))
}

/// Read until `buf` is full or the source is exhausted.
async fn fill_buffer<R: AsyncRead + Unpin>(source: &mut R, buf: &mut [u8]) -> Result<usize, Stop> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = source
            .read(&mut buf[filled..])
            .await
            .map_err(|e| Stop::Io(format!("Error Reading File: {}", e)))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::cancel::{CancelFlag, CancelSource, NeverCancel};
    use crate::serial::channel::SerialChannel;
    use crate::serial::link::LogSink;
    use crate::serial::transport::SimulatedTransport;
    use std::sync::Arc;
    use std::time::Duration;

    async fn sender_link(cancel: Arc<dyn CancelSource>) -> (Arc<SimulatedTransport>, Link) {
        let sim = SimulatedTransport::new("SIM0");
        let ch = SerialChannel::open(sim.clone(), SerialConfig::default())
            .await
            .unwrap();
        (sim, Link::new(ch, cancel, Arc::new(LogSink)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_single_block_with_padding() {
        let (sim, mut link) = sender_link(Arc::new(NeverCancel)).await;
        sim.inject_rx(&[NAK, ACK, ACK]);
        let mut src: &[u8] = b"hello";
        let report = send(&mut link, &mut src, "mem", Some(5), &TransferConfig::default()).await;

        assert_eq!(report.outcome, TransferOutcome::Success);
        assert!(report.eot_acknowledged);
        assert_eq!(report.bytes, 5);
        assert_eq!(report.blocks, 1);

        let mut expected = build_xmodem_block(1, b"hello");
        expected.push(EOT);
        assert_eq!(sim.drain_tx(), expected);
        assert!(!link.read_outstanding());
        assert!(!link.timer_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_empty_source_sends_only_eot() {
        let (sim, mut link) = sender_link(Arc::new(NeverCancel)).await;
        sim.inject_rx(&[NAK, ACK]);
        let mut src: &[u8] = b"";
        let report = send(&mut link, &mut src, "mem", Some(0), &TransferConfig::default()).await;
        assert!(report.is_success());
        assert_eq!(report.blocks, 0);
        assert_eq!(sim.drain_tx(), vec![EOT]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_retries_nakked_block() {
        let (sim, mut link) = sender_link(Arc::new(NeverCancel)).await;
        sim.inject_rx(&[NAK, NAK, b'?', ACK, ACK]);
        let mut src: &[u8] = &[9u8; 128];
        let report = send(&mut link, &mut src, "mem", None, &TransferConfig::default()).await;
        assert!(report.is_success());
        assert_eq!(report.retries, 2);
        let tx = sim.drain_tx();
        assert_eq!(tx.len(), 3 * FRAME_LEN + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_gives_up_after_retry_max_naks() {
        let (sim, mut link) = sender_link(Arc::new(NeverCancel)).await;
        let mut script = vec![NAK];
        script.extend(std::iter::repeat(NAK).take(10));
        sim.inject_rx(&script);
        let mut src: &[u8] = &[1u8; 300];
        let report = send(&mut link, &mut src, "mem", None, &TransferConfig::default()).await;
        assert_eq!(report.outcome, TransferOutcome::ProtocolFailure);
        assert_eq!(report.retries, 10);
        assert_eq!(report.blocks, 0);
        assert_eq!(sim.drain_tx().len(), 10 * FRAME_LEN);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_timeouts_counted_separately() {
        let config = TransferConfig::default();
        let (sim, mut link) = sender_link(Arc::new(NeverCancel)).await;
        sim.inject_rx(&[NAK]);
        let mut src: &[u8] = b"x";
        let (_, report) = tokio::join!(
            async {
                // first attempt times out at 1 s, ACK lands during the second
                tokio::time::sleep(Duration::from_millis(1500)).await;
                sim.inject_rx(&[ACK, ACK]);
            },
            send(&mut link, &mut src, "mem", None, &config),
        );
        assert!(report.is_success());
        assert_eq!(report.timeouts, 1);
        assert_eq!(report.retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_no_sync() {
        let (sim, mut link) = sender_link(Arc::new(NeverCancel)).await;
        sim.inject_rx(&[b'x'; 10]);
        let mut src: &[u8] = b"data";
        let report = send(&mut link, &mut src, "mem", None, &TransferConfig::default()).await;
        assert_eq!(report.outcome, TransferOutcome::ProtocolFailure);
        assert_eq!(report.message, "Receiver not sending NAKs");
        assert!(sim.drain_tx().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_eot_unacknowledged_is_still_success() {
        let (sim, mut link) = sender_link(Arc::new(NeverCancel)).await;
        sim.inject_rx(&[NAK, ACK]);
        let config = TransferConfig {
            retry_max: 3,
            ..Default::default()
        };
        let mut src: &[u8] = b"abc";
        let report = send(&mut link, &mut src, "mem", None, &config).await;
        assert_eq!(report.outcome, TransferOutcome::Success);
        assert!(!report.eot_acknowledged);
        assert_eq!(report.timeouts, 3);
        let tx = sim.drain_tx();
        assert_eq!(&tx[FRAME_LEN..], &[EOT, EOT, EOT]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_cancelled_awaiting_ack() {
        let config = TransferConfig::default();
        let flag = Arc::new(CancelFlag::new());
        let (sim, mut link) = sender_link(flag.clone()).await;
        sim.inject_rx(&[NAK]);
        let mut src: &[u8] = &[3u8; 256];
        let (_, report) = tokio::join!(
            async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                flag.request();
            },
            send(&mut link, &mut src, "mem", None, &config),
        );
        assert_eq!(report.outcome, TransferOutcome::Cancelled);
        assert_eq!(report.blocks, 0);
        assert!(!link.read_outstanding());
        assert!(!link.timer_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_cancelled_during_sync() {
        let config = TransferConfig::default();
        let flag = Arc::new(CancelFlag::new());
        let (sim, mut link) = sender_link(flag.clone()).await;
        let mut src: &[u8] = b"never sent";
        let (_, report) = tokio::join!(
            async {
                tokio::time::sleep(Duration::from_millis(2000)).await;
                flag.request();
            },
            send(&mut link, &mut src, "mem", None, &config),
        );
        assert_eq!(report.outcome, TransferOutcome::Cancelled);
        assert!(sim.drain_tx().is_empty());
        assert!(!link.read_outstanding());
        assert!(!link.timer_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_cancelled_awaiting_eot_ack() {
        let config = TransferConfig::default();
        let flag = Arc::new(CancelFlag::new());
        let (sim, mut link) = sender_link(flag.clone()).await;
        sim.inject_rx(&[NAK, ACK]);
        let mut src: &[u8] = b"abc";
        let (_, report) = tokio::join!(
            async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                flag.request();
            },
            send(&mut link, &mut src, "mem", None, &config),
        );
        assert_eq!(report.outcome, TransferOutcome::Cancelled);
        assert_eq!(report.blocks, 1);
        assert_eq!(sim.drain_tx().last(), Some(&EOT));
        assert!(!link.read_outstanding());
        assert!(!link.timer_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_file_missing() {
        let (_sim, mut link) = sender_link(Arc::new(NeverCancel)).await;
        let dir = tempfile::tempdir().unwrap();
        let report = send_file(&mut link, &dir.path().join("nope.bin"), &TransferConfig::default()).await;
        assert_eq!(report.outcome, TransferOutcome::IoFailure);
        assert!(report.message.starts_with("Cannot Open Send File"));
    }
}
