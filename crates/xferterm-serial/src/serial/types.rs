//! Shared types for the serial link and XMODEM transfer crate.
//!
//! Covers port configuration, transfer parameters, progress payloads,
//! and the structured error type used by every transport back-end.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Port Configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Supported baud rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BaudRate {
    #[serde(rename = "300")]
    Baud300,
    #[serde(rename = "1200")]
    Baud1200,
    #[serde(rename = "2400")]
    Baud2400,
    #[serde(rename = "4800")]
    Baud4800,
    #[serde(rename = "9600")]
    Baud9600,
    #[serde(rename = "19200")]
    Baud19200,
    #[serde(rename = "38400")]
    Baud38400,
    #[serde(rename = "57600")]
    Baud57600,
    #[serde(rename = "115200")]
    Baud115200,
}

impl Default for BaudRate {
    fn default() -> Self {
        Self::Baud9600
    }
}

impl BaudRate {
    /// Numeric value of the baud rate.
    pub fn value(&self) -> u32 {
        match self {
            Self::Baud300 => 300,
            Self::Baud1200 => 1200,
            Self::Baud2400 => 2400,
            Self::Baud4800 => 4800,
            Self::Baud9600 => 9600,
            Self::Baud19200 => 19200,
            Self::Baud38400 => 38400,
            Self::Baud57600 => 57600,
            Self::Baud115200 => 115200,
        }
    }

    /// Map a numeric rate onto the supported set.
    pub fn from_value(v: u32) -> Option<Self> {
        match v {
            300 => Some(Self::Baud300),
            1200 => Some(Self::Baud1200),
            2400 => Some(Self::Baud2400),
            4800 => Some(Self::Baud4800),
            9600 => Some(Self::Baud9600),
            19200 => Some(Self::Baud19200),
            38400 => Some(Self::Baud38400),
            57600 => Some(Self::Baud57600),
            115200 => Some(Self::Baud115200),
            _ => None,
        }
    }

    /// All supported baud rate values.
    pub fn standard_rates() -> Vec<u32> {
        vec![300, 1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200]
    }
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataBits {
    #[serde(rename = "7")]
    Seven,
    #[serde(rename = "8")]
    Eight,
}

impl Default for DataBits {
    fn default() -> Self {
        Self::Eight
    }
}

impl DataBits {
    pub fn value(&self) -> u8 {
        match self {
            Self::Seven => 7,
            Self::Eight => 8,
        }
    }
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl Default for Parity {
    fn default() -> Self {
        Self::None
    }
}

impl Parity {
    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "N",
            Self::Odd => "O",
            Self::Even => "E",
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    #[serde(rename = "1")]
    One,
    #[serde(rename = "2")]
    Two,
}

impl Default for StopBits {
    fn default() -> Self {
        Self::One
    }
}

impl StopBits {
    pub fn label(&self) -> &'static str {
        match self {
            Self::One => "1",
            Self::Two => "2",
        }
    }
}

/// Flow control mode.  XMODEM is binary, so software flow control is
/// never offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FlowControl {
    None,
    /// Hardware flow control (RTS/CTS).
    RtsCts,
}

impl Default for FlowControl {
    fn default() -> Self {
        Self::RtsCts
    }
}

/// Complete serial port configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerialConfig {
    /// Port name (e.g. `COM3`, `/dev/ttyUSB0`).
    #[serde(default)]
    pub port_name: String,

    #[serde(default)]
    pub baud_rate: BaudRate,

    #[serde(default)]
    pub data_bits: DataBits,

    #[serde(default)]
    pub parity: Parity,

    #[serde(default)]
    pub stop_bits: StopBits,

    #[serde(default)]
    pub flow_control: FlowControl,

    /// Upper bound for a single blocking write, in milliseconds.
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,

    /// How often the native back-end polls the driver for input.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_write_timeout() -> u64 {
    5000
}
fn default_poll_interval() -> u64 {
    5
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: BaudRate::default(),
            data_bits: DataBits::default(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            flow_control: FlowControl::default(),
            write_timeout_ms: default_write_timeout(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl SerialConfig {
    /// Shorthand notation (e.g. "9600-8N1").
    pub fn shorthand(&self) -> String {
        format!(
            "{}-{}{}{}",
            self.baud_rate.value(),
            self.data_bits.value(),
            self.parity.label(),
            self.stop_bits.label()
        )
    }

    pub fn hardware_flow(&self) -> bool {
        self.flow_control == FlowControl::RtsCts
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  File Transfer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Direction of a file transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransferDirection {
    Send,
    Receive,
}

impl TransferDirection {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Send => "send",
            Self::Receive => "recv",
        }
    }
}

/// State of a file transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransferState {
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

/// Progress information for a file transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub transfer_id: String,
    pub file_name: String,
    /// Known file size in bytes (0 when the receiver was not told).
    pub file_size: u64,
    pub bytes_transferred: u64,
    pub block_number: u32,
    pub total_blocks: u32,
    pub direction: TransferDirection,
    pub state: TransferState,
    pub error_count: u32,
    pub retry_count: u32,
    pub bytes_per_second: f64,
    pub elapsed_ms: u64,
    pub eta_ms: u64,
    pub percent_complete: f64,
}

/// Protocol budgets and timeouts for one transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferConfig {
    /// Consecutive bad blocks the receiver tolerates.
    #[serde(default = "default_error_max")]
    pub error_max: u32,
    /// Attempts per block (sender), per EOT handshake, and consecutive
    /// header timeouts (receiver).
    #[serde(default = "default_retry_max")]
    pub retry_max: u32,
    /// Bytes the sender reads while waiting for the receiver's first NAK.
    #[serde(default = "default_sync_attempts")]
    pub sync_attempts: u32,
    /// Per-character read timeout.
    #[serde(default = "default_char_timeout")]
    pub char_timeout_ms: u64,
    /// How long the receiver waits for `SOH`/`EOT` before re-sending NAK.
    #[serde(default = "default_header_timeout")]
    pub header_timeout_ms: u64,
    /// Idle time used to resynchronise after a bad block.
    #[serde(default = "default_flush_timeout")]
    pub flush_timeout_ms: u64,
    /// Idle time used to drain the line after a failed transfer.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_ms: u64,
    /// File buffer size; must be a non-zero multiple of 128.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_error_max() -> u32 {
    10
}
fn default_retry_max() -> u32 {
    10
}
fn default_sync_attempts() -> u32 {
    10
}
fn default_char_timeout() -> u64 {
    1000
}
fn default_header_timeout() -> u64 {
    10_000
}
fn default_flush_timeout() -> u64 {
    100
}
fn default_drain_timeout() -> u64 {
    500
}
fn default_buffer_size() -> usize {
    0x1000
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            error_max: default_error_max(),
            retry_max: default_retry_max(),
            sync_attempts: default_sync_attempts(),
            char_timeout_ms: default_char_timeout(),
            header_timeout_ms: default_header_timeout(),
            flush_timeout_ms: default_flush_timeout(),
            drain_timeout_ms: default_drain_timeout(),
            buffer_size: default_buffer_size(),
        }
    }
}

impl TransferConfig {
    /// Reject budgets the state machines cannot run with.
    pub fn validate(&self) -> Result<(), SerialError> {
        if self.buffer_size == 0 || self.buffer_size % crate::serial::protocols::BLOCK_SIZE != 0 {
            return Err(SerialError::new(
                SerialErrorKind::InvalidConfig,
                format!(
                    "buffer size {} is not a non-zero multiple of {}",
                    self.buffer_size,
                    crate::serial::protocols::BLOCK_SIZE
                ),
            ));
        }
        if self.error_max == 0 || self.retry_max == 0 || self.sync_attempts == 0 {
            return Err(SerialError::new(
                SerialErrorKind::InvalidConfig,
                "error, retry and sync budgets must be at least 1",
            ));
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Error kinds specific to serial operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SerialErrorKind {
    PortNotFound,
    PortBusy,
    PermissionDenied,
    InvalidConfig,
    Timeout,
    IoError,
    FramingError,
    ParityError,
    OverrunError,
    NotConnected,
    FileError,
}

/// Structured serial error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("[{kind:?}] {message}")]
pub struct SerialError {
    pub kind: SerialErrorKind,
    pub message: String,
    pub port_name: Option<String>,
}

impl SerialError {
    pub fn new(kind: SerialErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            port_name: None,
        }
    }

    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port_name = Some(port.into());
        self
    }

    pub fn not_connected(port: &str) -> Self {
        Self::new(SerialErrorKind::NotConnected, format!("Port {} not open", port)).with_port(port)
    }
}

impl From<std::io::Error> for SerialError {
    fn from(e: std::io::Error) -> Self {
        let kind = match e.kind() {
            std::io::ErrorKind::NotFound => SerialErrorKind::PortNotFound,
            std::io::ErrorKind::PermissionDenied => SerialErrorKind::PermissionDenied,
            std::io::ErrorKind::TimedOut => SerialErrorKind::Timeout,
            _ => SerialErrorKind::IoError,
        };
        Self::new(kind, e.to_string())
    }
}
