//! Character / block transport.
//!
//! `Link` composes a [`SerialChannel`], a [`CountdownTimer`] and a
//! [`CancelSource`] into blocking reads with a timeout and operator abort.
//! The only suspension point is [`Link::wait_any`], a single `select!`
//! over read readiness, the timer and cancellation.

use crate::serial::cancel::CancelSource;
use crate::serial::channel::{ReadOutcome, SerialChannel};
use crate::serial::protocols::payload_timeout_ms;
use crate::serial::timer::CountdownTimer;
use crate::serial::types::*;
use std::sync::Arc;

/// Back-to-back link faults `read_flush` swallows before reporting one.
pub const FLUSH_FAULT_LIMIT: u32 = 10;

/// Why a read did not produce data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadFault {
    #[error("timed out")]
    Timeout,
    #[error("cancelled by operator")]
    Abort,
    #[error(transparent)]
    Io(#[from] SerialError),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Status output
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Operator-facing status lines and progress.
pub trait StatusSink: Send + Sync {
    fn emit_line(&self, line: &str);

    fn progress(&self, _progress: &TransferProgress) {}
}

/// Forwards status lines to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl StatusSink for LogSink {
    fn emit_line(&self, line: &str) {
        log::info!("{}", line);
    }

    fn progress(&self, p: &TransferProgress) {
        log::debug!(
            "[xmodem:{}] block {} ({} bytes, {:.1}%)",
            p.direction.label(),
            p.block_number,
            p.bytes_transferred,
            p.percent_complete
        );
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Link
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Timeout- and cancel-aware reads and plain writes over one channel.
pub struct Link {
    channel: SerialChannel,
    timer: CountdownTimer,
    cancel: Arc<dyn CancelSource>,
    status: Arc<dyn StatusSink>,
    char_timeout_ms: u64,
}

impl Link {
    pub fn new(
        channel: SerialChannel,
        cancel: Arc<dyn CancelSource>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            channel,
            timer: CountdownTimer::new(),
            cancel,
            status,
            char_timeout_ms: 1000,
        }
    }

    /// Timeout for the first byte of a block read.
    pub fn with_char_timeout(mut self, ms: u64) -> Self {
        self.char_timeout_ms = ms;
        self
    }

    pub fn channel(&self) -> &SerialChannel {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut SerialChannel {
        &mut self.channel
    }

    pub fn into_channel(self) -> SerialChannel {
        self.channel
    }

    pub fn status(&self) -> &dyn StatusSink {
        self.status.as_ref()
    }

    pub fn emit(&self, line: &str) {
        self.status.emit_line(line);
    }

    pub fn timer_armed(&self) -> bool {
        self.timer.is_armed()
    }

    pub fn read_outstanding(&self) -> bool {
        self.channel.read_outstanding()
    }

    /// Suspend until the read is ready, the timer fires or an abort is
    /// requested.  The caller decides which one happened.
    async fn wait_any(&mut self) {
        let Self {
            channel,
            timer,
            cancel,
            ..
        } = self;
        tokio::select! {
            biased;
            _ = channel.wait_read() => {}
            _ = timer.wait() => {}
            _ = cancel.wait() => {}
        }
    }

    /// Read one byte.
    ///
    /// `timeout_ms <= 0` waits without a deadline.  When `schedule_next`
    /// is set a fresh single-byte read is issued after a byte or a link
    /// error, so the next call may complete without waiting.  A link
    /// error yields to the runtime before it is returned: a dead device
    /// fails every read at once and would otherwise starve other tasks.
    pub async fn read_one(&mut self, schedule_next: bool, timeout_ms: i64) -> Result<u8, ReadFault> {
        if !self.channel.read_outstanding() {
            self.channel.start_read_one();
        }
        if timeout_ms > 0 {
            self.timer.set_timeout(timeout_ms as u64);
        }

        let mut ready = self.channel.read_is_immediately_ready();
        let result = loop {
            if !ready {
                self.wait_any().await;
            }
            ready = false;

            match self.channel.get_char() {
                ReadOutcome::Error(e) => {
                    if schedule_next {
                        self.channel.start_read_one();
                    }
                    tokio::task::yield_now().await;
                    break Err(ReadFault::Io(e));
                }
                ReadOutcome::Byte(b) => {
                    if schedule_next {
                        self.channel.start_read_one();
                    }
                    break Ok(b);
                }
                ReadOutcome::Pending => {}
            }
            if self.timer.complete() {
                break Err(ReadFault::Timeout);
            }
            if self.cancel.poll_abort_requested() {
                break Err(ReadFault::Abort);
            }
        };

        self.timer.abort();
        result
    }

    /// Fill `buf` completely.
    ///
    /// The first byte gets the per-character timeout, the remainder the
    /// baud-scaled payload timeout.  Leaves a single-byte read primed.
    pub async fn read_block(&mut self, buf: &mut [u8]) -> Result<(), ReadFault> {
        if buf.is_empty() {
            return Ok(());
        }
        let result = self.read_block_inner(buf).await;
        self.channel.abort_read();
        self.channel.start_read_one();
        self.timer.abort();
        result
    }

    async fn read_block_inner(&mut self, buf: &mut [u8]) -> Result<(), ReadFault> {
        buf[0] = self.read_one(false, self.char_timeout_ms as i64).await?;
        if buf.len() == 1 {
            return Ok(());
        }

        self.timer.set_timeout(payload_timeout_ms(self.channel.baud()));
        self.channel.abort_read();
        self.channel.start_read_block(buf.len() - 1);

        let mut ready = self.channel.read_is_immediately_ready();
        loop {
            if !ready {
                self.wait_any().await;
            }
            ready = false;

            if self.channel.read_ready() {
                return match self.channel.complete_read(&mut buf[1..]) {
                    Ok(_) => Ok(()),
                    Err(e) => Err(ReadFault::Io(e)),
                };
            }
            if self.timer.complete() {
                return Err(ReadFault::Timeout);
            }
            if self.cancel.poll_abort_requested() {
                return Err(ReadFault::Abort);
            }
        }
    }

    /// Discard input until `timeout_ms` passes with the line idle.
    ///
    /// Isolated link errors are swallowed.  [`FLUSH_FAULT_LIMIT`] of them
    /// in a row mean the device is gone and the last one is returned.
    pub async fn read_flush(&mut self, timeout_ms: u64) -> Result<(), ReadFault> {
        let timeout = timeout_ms.max(1) as i64;
        let mut faults = 0u32;
        loop {
            match self.read_one(true, timeout).await {
                Ok(_) => faults = 0,
                Err(ReadFault::Io(e)) => {
                    faults += 1;
                    if faults >= FLUSH_FAULT_LIMIT {
                        log::warn!("[serial:{}] flush gave up: {}", self.channel.port_name(), e);
                        return Err(ReadFault::Io(e));
                    }
                }
                Err(ReadFault::Timeout) => return Ok(()),
                Err(ReadFault::Abort) => return Err(ReadFault::Abort),
            }
        }
    }

    pub async fn write_byte(&mut self, c: u8) -> Result<(), SerialError> {
        self.channel.write_byte(c).await
    }

    pub async fn write_block(&mut self, buf: &[u8]) -> Result<(), SerialError> {
        self.channel.write_block(buf).await
    }

    /// Common exit step: no timer armed, no read in flight.
    pub fn finish(&mut self) {
        self.timer.abort();
        self.channel.abort_read();
    }
}
