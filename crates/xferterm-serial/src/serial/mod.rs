//! Serial crate: sub-modules.

pub mod types;
pub mod transport;
pub mod native;
pub mod channel;
pub mod timer;
pub mod cancel;
pub mod link;
pub mod protocols;
pub mod session;
pub mod receive;
pub mod send;

// Re-export top-level items for convenience.
pub use types::*;
pub use cancel::{CancelFlag, CancelSource, NeverCancel};
pub use channel::{ReadOutcome, RequestStatus, SerialChannel};
pub use link::{Link, LogSink, ReadFault, StatusSink};
pub use native::{available_ports, NativeTransport, PortInfo};
pub use receive::{receive, receive_file};
pub use send::{send, send_file};
pub use session::{TransferOutcome, TransferReport, TransferSession};
pub use timer::CountdownTimer;
pub use transport::{SerialTransport, SimulatedTransport};
