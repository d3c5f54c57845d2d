//! # xferterm – Serial / RS-232 file transfer
//!
//! Serial link layer and XMODEM (checksum) transfer engines:
//!
//! - **Transport** – `SerialTransport` over real hardware (`serialport`) or
//!   an in-memory simulation with null-modem pairing
//! - **Channel** – single-outstanding-request reads and writes with an
//!   immediate-completion fast path
//! - **Timer / Cancel** – countdown timer and operator abort source
//! - **Link** – timeout- and cancel-aware character and block reads
//! - **XMODEM** – sender and receiver state machines with retry budgets,
//!   duplicate detection and progress reporting

pub mod serial;
