//! Serial port transport abstraction.
//!
//! The transport is the raw duplex byte pipe underneath `SerialChannel`.
//! Reads are split into a non-blocking `try_read` and a cancel-safe
//! `readable` wait so that the channel can keep exactly one request in
//! flight while the caller multiplexes the wait with a timer and a
//! cancellation source.  Writes are plain async calls.

use crate::serial::types::*;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Transport trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Platform-agnostic serial port transport.
///
/// Implementations must be `Send + Sync` so they can be held behind an
/// `Arc` and shared between the channel and the code that opened it.
#[async_trait::async_trait]
pub trait SerialTransport: Send + Sync {
    /// Open the port with the given configuration.
    async fn open(&self, config: &SerialConfig) -> Result<(), SerialError>;

    /// Close the port.
    async fn close(&self) -> Result<(), SerialError>;

    /// Copy whatever is already buffered into `buf` without waiting.
    /// Returns `Ok(0)` when nothing is pending.  A pending line fault
    /// (overrun, framing, parity) is reported once and then cleared.
    fn try_read(&self, buf: &mut [u8]) -> Result<usize, SerialError>;

    /// Resolve once `try_read` would return data or a fault.
    ///
    /// Must be cancel-safe: dropping the future loses nothing.
    async fn readable(&self);

    /// Write bytes; returns how many were accepted.
    async fn write(&self, buf: &[u8]) -> Result<usize, SerialError>;

    /// Drain: wait until all output has been physically transmitted.
    async fn drain(&self) -> Result<(), SerialError>;

    /// Get number of bytes waiting in the receive buffer.
    async fn bytes_available(&self) -> Result<usize, SerialError>;

    /// Reconfigure the port (e.g. change baud rate on the fly).
    async fn reconfigure(&self, config: &SerialConfig) -> Result<(), SerialError>;

    /// Check whether the port is open.
    fn is_open(&self) -> bool;

    /// Retrieve the port name.
    fn port_name(&self) -> &str;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Simulated transport (for testing & offline use)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One direction of an in-memory line.
#[derive(Default)]
struct Pipe {
    data: Mutex<VecDeque<u8>>,
    fault: Mutex<Option<SerialError>>,
    notify: Notify,
}

impl Pipe {
    fn data(&self) -> MutexGuard<'_, VecDeque<u8>> {
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn fault(&self) -> MutexGuard<'_, Option<SerialError>> {
        self.fault.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, bytes: &[u8]) {
        self.data().extend(bytes);
        self.notify.notify_waiters();
    }

    fn has_input(&self) -> bool {
        !self.data().is_empty() || self.fault().is_some()
    }
}

/// A fully in-memory transport useful for unit tests and offline demos.
///
/// A standalone instance records everything written (see [`drain_tx`])
/// and only receives what is injected.  [`SimulatedTransport::pair`]
/// builds two instances wired back to back like a null-modem cable.
///
/// [`drain_tx`]: SimulatedTransport::drain_tx
pub struct SimulatedTransport {
    name: String,
    open: AtomicBool,
    config: Mutex<SerialConfig>,
    rx: Arc<Pipe>,
    tx: Arc<Pipe>,
    write_fault: Mutex<Option<SerialError>>,
    loopback: AtomicBool,
}

impl SimulatedTransport {
    /// Create a new simulated transport for the given port name.
    pub fn new(port_name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::with_pipes(
            port_name.into(),
            Arc::new(Pipe::default()),
            Arc::new(Pipe::default()),
        ))
    }

    /// Two transports connected TX-to-RX in both directions.
    pub fn pair(a: impl Into<String>, b: impl Into<String>) -> (Arc<Self>, Arc<Self>) {
        let a_to_b = Arc::new(Pipe::default());
        let b_to_a = Arc::new(Pipe::default());
        (
            Arc::new(Self::with_pipes(a.into(), b_to_a.clone(), a_to_b.clone())),
            Arc::new(Self::with_pipes(b.into(), a_to_b, b_to_a)),
        )
    }

    fn with_pipes(name: String, rx: Arc<Pipe>, tx: Arc<Pipe>) -> Self {
        Self {
            name,
            open: AtomicBool::new(false),
            config: Mutex::new(SerialConfig::default()),
            rx,
            tx,
            write_fault: Mutex::new(None),
            loopback: AtomicBool::new(false),
        }
    }

    /// Enable loopback mode (TX data is immediately available in RX).
    pub fn set_loopback(&self, enabled: bool) {
        self.loopback.store(enabled, Ordering::SeqCst);
    }

    /// Inject bytes into the receive buffer (simulate incoming data).
    pub fn inject_rx(&self, data: &[u8]) {
        self.rx.push(data);
    }

    /// Queue a line fault; the next read reports it once.
    pub fn inject_error(&self, err: SerialError) {
        *self.rx.fault() = Some(err);
        self.rx.notify.notify_waiters();
    }

    /// Make every subsequent write fail with `err` (or succeed again with `None`).
    pub fn fail_writes(&self, err: Option<SerialError>) {
        *self.write_fault.lock().unwrap_or_else(|e| e.into_inner()) = err;
    }

    /// Drain all bytes from the transmit buffer (for test assertions).
    ///
    /// On a paired transport this consumes what the peer has not read yet.
    pub fn drain_tx(&self) -> Vec<u8> {
        self.tx.data().drain(..).collect()
    }

    /// Peek at the transmit buffer contents without draining.
    pub fn peek_tx(&self) -> Vec<u8> {
        self.tx.data().iter().copied().collect()
    }

    /// Current configuration as last applied by `open` / `reconfigure`.
    pub fn config(&self) -> SerialConfig {
        self.config.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn ensure_open(&self) -> Result<(), SerialError> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SerialError::not_connected(&self.name))
        }
    }
}

#[async_trait::async_trait]
impl SerialTransport for SimulatedTransport {
    async fn open(&self, config: &SerialConfig) -> Result<(), SerialError> {
        if self.open.load(Ordering::SeqCst) {
            return Err(SerialError::new(
                SerialErrorKind::PortBusy,
                format!("Port {} already open", self.name),
            )
            .with_port(&self.name));
        }
        *self.config.lock().unwrap_or_else(|e| e.into_inner()) = config.clone();
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), SerialError> {
        self.open.store(false, Ordering::SeqCst);
        self.rx.notify.notify_waiters();
        Ok(())
    }

    fn try_read(&self, buf: &mut [u8]) -> Result<usize, SerialError> {
        self.ensure_open()?;
        if let Some(err) = self.rx.fault().take() {
            return Err(err.with_port(&self.name));
        }
        let mut rx = self.rx.data();
        let count = buf.len().min(rx.len());
        for (slot, byte) in buf.iter_mut().zip(rx.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }

    async fn readable(&self) {
        loop {
            // Registered before the check so a push in between is not missed.
            let notified = self.rx.notify.notified();
            if !self.open.load(Ordering::SeqCst) || self.rx.has_input() {
                return;
            }
            notified.await;
        }
    }

    async fn write(&self, buf: &[u8]) -> Result<usize, SerialError> {
        self.ensure_open()?;
        let fault = self
            .write_fault
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(err) = fault {
            return Err(err.with_port(&self.name));
        }
        self.tx.push(buf);
        if self.loopback.load(Ordering::SeqCst) {
            self.rx.push(buf);
        }
        Ok(buf.len())
    }

    async fn drain(&self) -> Result<(), SerialError> {
        self.ensure_open()
    }

    async fn bytes_available(&self) -> Result<usize, SerialError> {
        Ok(self.rx.data().len())
    }

    async fn reconfigure(&self, config: &SerialConfig) -> Result<(), SerialError> {
        self.ensure_open()?;
        *self.config.lock().unwrap_or_else(|e| e.into_inner()) = config.clone();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn port_name(&self) -> &str {
        &self.name
    }
}
