//! Status output on the terminal.

use std::io::Write;
use xferterm_serial::serial::{StatusSink, TransferProgress, TransferState};

/// Prints status lines and a single updating progress line to stderr.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl StatusSink for ConsoleSink {
    fn emit_line(&self, line: &str) {
        eprintln!("{}", line);
    }

    fn progress(&self, p: &TransferProgress) {
        let mut err = std::io::stderr().lock();
        let _ = if p.total_blocks > 0 {
            write!(
                err,
                "\rblock {}/{}  {} bytes  {:.0}%  {:.0} B/s",
                p.block_number, p.total_blocks, p.bytes_transferred, p.percent_complete, p.bytes_per_second
            )
        } else {
            write!(
                err,
                "\rblock {}  {} bytes  {:.0} B/s",
                p.block_number, p.bytes_transferred, p.bytes_per_second
            )
        };
        if p.state != TransferState::InProgress {
            let _ = writeln!(err);
        }
        let _ = err.flush();
    }
}
