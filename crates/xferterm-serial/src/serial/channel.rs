//! Single-request serial channel.
//!
//! `SerialChannel` owns a transport and enforces the request discipline
//! the transfer engines rely on: at most one read and one bulk write in
//! flight, readiness that can be polled or awaited, and an immediate
//! completion fast path when the data is already buffered.

use crate::serial::transport::SerialTransport;
use crate::serial::types::*;
use std::sync::Arc;

/// State of the outstanding read request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    Ready,
    Failed(SerialError),
}

/// Result of [`SerialChannel::get_char`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Pending,
    Byte(u8),
    Error(SerialError),
}

#[derive(Debug)]
struct ReadRequest {
    buf: Vec<u8>,
    filled: usize,
    status: RequestStatus,
    immediate: bool,
}

/// Duplex byte link with single-outstanding-request reads and writes.
pub struct SerialChannel {
    transport: Arc<dyn SerialTransport>,
    config: SerialConfig,
    read: Option<ReadRequest>,
    write_pending: Option<Vec<u8>>,
}

impl SerialChannel {
    /// Open `transport` with `config` and wrap it.
    pub async fn open(
        transport: Arc<dyn SerialTransport>,
        config: SerialConfig,
    ) -> Result<Self, SerialError> {
        transport
            .open(&config)
            .await
            .map_err(|e| e.with_port(transport.port_name()))?;
        log::debug!(
            "[serial:{}] channel opened at {}",
            transport.port_name(),
            config.shorthand()
        );
        Ok(Self {
            transport,
            config,
            read: None,
            write_pending: None,
        })
    }

    pub fn baud(&self) -> BaudRate {
        self.config.baud_rate
    }

    pub fn hardware_flow(&self) -> bool {
        self.config.hardware_flow()
    }

    pub fn port_name(&self) -> &str {
        self.transport.port_name()
    }

    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Begin a single-byte read.
    pub fn start_read_one(&mut self) {
        self.start_read_block(1);
    }

    /// Begin a read of exactly `len` bytes.
    ///
    /// # Panics
    /// If a read is already outstanding.
    pub fn start_read_block(&mut self, len: usize) {
        assert!(
            self.read.is_none(),
            "read already outstanding on {}",
            self.transport.port_name()
        );
        self.read = Some(ReadRequest {
            buf: vec![0u8; len],
            filled: 0,
            status: RequestStatus::Pending,
            immediate: false,
        });
        self.fill();
        if let Some(req) = self.read.as_mut() {
            req.immediate = req.status != RequestStatus::Pending;
        }
    }

    /// Whether the last started read was satisfied at start time.
    pub fn read_is_immediately_ready(&self) -> bool {
        self.read.as_ref().map(|r| r.immediate).unwrap_or(false)
    }

    /// Non-blocking poll of the outstanding read.
    pub fn read_ready(&mut self) -> bool {
        self.fill();
        matches!(
            self.read.as_ref().map(|r| &r.status),
            Some(RequestStatus::Ready | RequestStatus::Failed(_))
        )
    }

    pub fn read_outstanding(&self) -> bool {
        self.read.is_some()
    }

    /// Resolve once the outstanding read is ready.  Never resolves when
    /// no read is outstanding.  Cancel-safe.
    pub async fn wait_read(&mut self) {
        loop {
            if self.read.is_none() {
                std::future::pending::<()>().await;
            }
            if self.read_ready() {
                return;
            }
            let transport = self.transport.clone();
            transport.readable().await;
        }
    }

    /// Finish a ready read, copying its bytes into `out`.
    ///
    /// Clears the outstanding request.  A link fault is reported here
    /// exactly once.
    ///
    /// # Panics
    /// If no read is outstanding or it is still pending.
    pub fn complete_read(&mut self, out: &mut [u8]) -> Result<usize, SerialError> {
        let req = match self.read.take() {
            Some(req) => req,
            None => panic!("complete_read with no read outstanding"),
        };
        match req.status {
            RequestStatus::Ready => {
                let n = out.len().min(req.filled);
                out[..n].copy_from_slice(&req.buf[..n]);
                Ok(n)
            }
            RequestStatus::Failed(err) => Err(err),
            RequestStatus::Pending => panic!("complete_read on a pending request"),
        }
    }

    /// Ready + complete for a single byte.  Does not start another read.
    pub fn get_char(&mut self) -> ReadOutcome {
        if !self.read_ready() {
            return ReadOutcome::Pending;
        }
        let mut byte = [0u8; 1];
        match self.complete_read(&mut byte) {
            Ok(_) => ReadOutcome::Byte(byte[0]),
            Err(e) => ReadOutcome::Error(e),
        }
    }

    /// Drop the outstanding read, if any.
    pub fn abort_read(&mut self) {
        self.read = None;
    }

    fn fill(&mut self) {
        let Some(req) = self.read.as_mut() else {
            return;
        };
        if req.status != RequestStatus::Pending {
            return;
        }
        match self.transport.try_read(&mut req.buf[req.filled..]) {
            Ok(n) => {
                req.filled += n;
                if req.filled == req.buf.len() {
                    req.status = RequestStatus::Ready;
                }
            }
            Err(e) => req.status = RequestStatus::Failed(e),
        }
    }

    // ── Line control ─────────────────────────────────────────────────

    /// Change the baud rate.
    ///
    /// # Panics
    /// If a read is outstanding.
    pub async fn set_baud(&mut self, rate: BaudRate) -> Result<(), SerialError> {
        assert!(self.read.is_none(), "set_baud with a read outstanding");
        let mut config = self.config.clone();
        config.baud_rate = rate;
        self.transport.reconfigure(&config).await?;
        self.config = config;
        Ok(())
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Transmit one byte and wait until it has left.
    pub async fn write_byte(&mut self, c: u8) -> Result<(), SerialError> {
        self.write_all(&[c]).await
    }

    /// Queue a bulk write.
    ///
    /// # Panics
    /// If a bulk write is already outstanding.
    pub fn start_write_block(&mut self, buf: &[u8]) {
        assert!(
            self.write_pending.is_none(),
            "bulk write already outstanding on {}",
            self.transport.port_name()
        );
        self.write_pending = Some(buf.to_vec());
    }

    /// Complete the outstanding bulk write.
    pub async fn wait_write(&mut self) -> Result<(), SerialError> {
        match self.write_pending.take() {
            Some(buf) => self.write_all(&buf).await,
            None => Ok(()),
        }
    }

    pub async fn write_block(&mut self, buf: &[u8]) -> Result<(), SerialError> {
        self.start_write_block(buf);
        self.wait_write().await
    }

    pub fn write_outstanding(&self) -> bool {
        self.write_pending.is_some()
    }

    async fn write_all(&self, mut buf: &[u8]) -> Result<(), SerialError> {
        while !buf.is_empty() {
            let n = self.transport.write(buf).await?;
            if n == 0 {
                return Err(SerialError::new(SerialErrorKind::IoError, "write accepted no bytes")
                    .with_port(self.transport.port_name()));
            }
            buf = &buf[n..];
        }
        self.transport.drain().await
    }

    /// Abort outstanding requests and release the device.
    pub async fn close(&mut self) -> Result<(), SerialError> {
        self.abort_read();
        self.write_pending = None;
        log::debug!("[serial:{}] channel closed", self.transport.port_name());
        self.transport.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::transport::SimulatedTransport;
    use std::time::Duration;

    async fn open_sim() -> (Arc<SimulatedTransport>, SerialChannel) {
        let sim = SimulatedTransport::new("SIM0");
        let ch = SerialChannel::open(sim.clone(), SerialConfig::default())
            .await
            .unwrap();
        (sim, ch)
    }

    #[tokio::test]
    async fn test_read_one_immediate_fast_path() {
        let (sim, mut ch) = open_sim().await;
        sim.inject_rx(b"Z");
        ch.start_read_one();
        assert!(ch.read_is_immediately_ready());
        assert_eq!(ch.get_char(), ReadOutcome::Byte(b'Z'));
        assert!(!ch.read_outstanding());
    }

    #[tokio::test]
    async fn test_get_char_pending_then_ready() {
        let (sim, mut ch) = open_sim().await;
        ch.start_read_one();
        assert!(!ch.read_is_immediately_ready());
        assert_eq!(ch.get_char(), ReadOutcome::Pending);
        assert!(ch.read_outstanding());

        sim.inject_rx(b"ab");
        assert_eq!(ch.get_char(), ReadOutcome::Byte(b'a'));
        // never re-arms
        assert_eq!(ch.get_char(), ReadOutcome::Pending);
        assert!(!ch.read_outstanding());
    }

    #[tokio::test]
    #[should_panic(expected = "read already outstanding")]
    async fn test_second_read_panics() {
        let (_sim, mut ch) = open_sim().await;
        ch.start_read_one();
        ch.start_read_block(4);
    }

    #[tokio::test]
    async fn test_block_read_accumulates_partial_input() {
        let (sim, mut ch) = open_sim().await;
        ch.start_read_block(4);
        sim.inject_rx(b"12");
        assert!(!ch.read_ready());
        sim.inject_rx(b"345");
        assert!(ch.read_ready());

        let mut out = [0u8; 4];
        assert_eq!(ch.complete_read(&mut out).unwrap(), 4);
        assert_eq!(&out, b"1234");

        ch.start_read_one();
        assert!(ch.read_is_immediately_ready());
        assert_eq!(ch.get_char(), ReadOutcome::Byte(b'5'));
    }

    #[tokio::test]
    async fn test_link_error_surfaces_once() {
        let (sim, mut ch) = open_sim().await;
        ch.start_read_one();
        sim.inject_error(SerialError::new(SerialErrorKind::OverrunError, "overrun"));
        match ch.get_char() {
            ReadOutcome::Error(e) => assert_eq!(e.kind, SerialErrorKind::OverrunError),
            other => panic!("unexpected {:?}", other),
        }
        ch.start_read_one();
        assert_eq!(ch.get_char(), ReadOutcome::Pending);
    }

    #[tokio::test]
    async fn test_abort_read_is_safe_when_idle() {
        let (sim, mut ch) = open_sim().await;
        ch.abort_read();
        ch.start_read_block(2);
        sim.inject_rx(b"x");
        assert!(!ch.read_ready());
        ch.abort_read();
        assert!(!ch.read_outstanding());
        assert!(!ch.read_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_read_resolves_on_data() {
        let (sim, mut ch) = open_sim().await;
        ch.start_read_one();
        let (_, waited) = tokio::join!(
            async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                sim.inject_rx(b"q");
            },
            tokio::time::timeout(Duration::from_secs(1), ch.wait_read()),
        );
        assert!(waited.is_ok());
        assert_eq!(ch.get_char(), ReadOutcome::Byte(b'q'));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_read_without_request_never_resolves() {
        let (_sim, mut ch) = open_sim().await;
        let waited = tokio::time::timeout(Duration::from_secs(1), ch.wait_read()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_set_baud_reconfigures_transport() {
        let (sim, mut ch) = open_sim().await;
        ch.set_baud(BaudRate::Baud1200).await.unwrap();
        assert_eq!(ch.baud(), BaudRate::Baud1200);
        assert_eq!(sim.config().baud_rate, BaudRate::Baud1200);
    }

    #[tokio::test]
    #[should_panic(expected = "set_baud with a read outstanding")]
    async fn test_set_baud_with_read_outstanding_panics() {
        let (_sim, mut ch) = open_sim().await;
        ch.start_read_one();
        let _ = ch.set_baud(BaudRate::Baud1200).await;
    }

    #[tokio::test]
    async fn test_writes_reach_transport() {
        let (sim, mut ch) = open_sim().await;
        ch.write_byte(0x15).await.unwrap();
        ch.start_write_block(&[1, 2, 3]);
        assert!(ch.write_outstanding());
        ch.wait_write().await.unwrap();
        assert!(!ch.write_outstanding());
        ch.write_block(&[4]).await.unwrap();
        assert_eq!(sim.drain_tx(), vec![0x15, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_failed_bulk_write_clears_outstanding() {
        let (sim, mut ch) = open_sim().await;
        sim.fail_writes(Some(SerialError::new(SerialErrorKind::IoError, "gone")));
        assert!(ch.write_block(&[0u8; 128]).await.is_err());
        assert!(!ch.write_outstanding());
    }

    #[tokio::test]
    async fn test_close_releases_device() {
        let (sim, mut ch) = open_sim().await;
        ch.start_read_one();
        ch.close().await.unwrap();
        assert!(!ch.read_outstanding());
        assert!(!sim.is_open());
    }
}
