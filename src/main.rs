//! `xferterm` command line: XMODEM send/receive over a serial port.

mod config;
mod console;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use xferterm_serial::serial::{
    available_ports, receive_file, send_file, BaudRate, CancelFlag, FlowControl, Link,
    NativeTransport, SerialChannel, SerialError, SerialErrorKind, TransferReport,
};

use crate::config::AppConfig;
use crate::console::ConsoleSink;

/// XMODEM (checksum) file transfer over RS-232.
#[derive(Debug, Parser)]
#[command(name = "xferterm", version, about)]
struct Cli {
    /// JSON configuration file (defaults to <config dir>/xferterm/config.json).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Serial device, e.g. /dev/ttyUSB0 or COM3.
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Line speed in bits per second.
    #[arg(short, long, global = true)]
    baud: Option<u32>,

    /// Disable RTS/CTS hardware flow control.
    #[arg(long, global = true)]
    no_flow: bool,

    /// Print the final report (or port list) as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send a file to the remote receiver.
    Send {
        file: PathBuf,
    },
    /// Receive a file from the remote sender.
    Receive {
        file: PathBuf,
        /// Expected size in bytes; trailing pad beyond it is dropped.
        #[arg(long)]
        size: Option<u64>,
    },
    /// List serial ports present on this system.
    Ports,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    // Also installs the `log` bridge, which is what the serial crate logs through.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn apply_overrides(cfg: &mut AppConfig, cli: &Cli) -> Result<(), SerialError> {
    if let Some(port) = &cli.port {
        cfg.serial.port_name = port.clone();
    }
    if let Some(baud) = cli.baud {
        cfg.serial.baud_rate = BaudRate::from_value(baud).ok_or_else(|| {
            let supported: Vec<String> = BaudRate::standard_rates()
                .iter()
                .map(|r| r.to_string())
                .collect();
            SerialError::new(
                SerialErrorKind::InvalidConfig,
                format!("Unsupported baud rate {} (use one of {})", baud, supported.join(", ")),
            )
        })?;
    }
    if cli.no_flow {
        cfg.serial.flow_control = FlowControl::None;
    }
    cfg.transfer.validate()?;
    if cfg.serial.port_name.is_empty() {
        return Err(SerialError::new(
            SerialErrorKind::InvalidConfig,
            "No serial port given (use --port or the config file)",
        ));
    }
    Ok(())
}

async fn list_ports(json: bool) -> Result<ExitCode, SerialError> {
    let ports = available_ports().await?;
    if json {
        let text = serde_json::to_string_pretty(&ports)
            .map_err(|e| SerialError::new(SerialErrorKind::IoError, e.to_string()))?;
        println!("{}", text);
    } else if ports.is_empty() {
        eprintln!("No serial ports found");
    } else {
        for p in &ports {
            match (&p.product, p.vid, p.pid) {
                (Some(product), Some(vid), Some(pid)) => {
                    println!("{}\t{}\t{:04x}:{:04x} {}", p.port_name, p.port_type, vid, pid, product)
                }
                _ => println!("{}\t{}", p.port_name, p.port_type),
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn print_report(report: &TransferReport, json: bool) -> Result<(), SerialError> {
    if json {
        let text = serde_json::to_string_pretty(report)
            .map_err(|e| SerialError::new(SerialErrorKind::IoError, e.to_string()))?;
        println!("{}", text);
    } else {
        eprintln!(
            "{}: {} bytes in {} blocks, {} errors, {} retries, {} timeouts, {} duplicates, {} ms",
            report.message,
            report.bytes,
            report.blocks,
            report.errors,
            report.retries,
            report.timeouts,
            report.duplicates,
            report.elapsed_ms
        );
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<ExitCode, SerialError> {
    let (file, receive_size) = match &cli.command {
        Command::Ports => return list_ports(cli.json).await,
        Command::Send { file } => (file.clone(), None),
        Command::Receive { file, size } => (file.clone(), Some(*size)),
    };

    let mut cfg = config::load(cli.config.as_deref())?;
    apply_overrides(&mut cfg, &cli)?;

    let transport = Arc::new(NativeTransport::new(cfg.serial.port_name.clone()));
    let channel = SerialChannel::open(transport, cfg.serial.clone()).await?;

    let cancel = Arc::new(CancelFlag::new());
    let flag = cancel.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            flag.request();
        }
    });

    let mut link = Link::new(channel, cancel, Arc::new(ConsoleSink))
        .with_char_timeout(cfg.transfer.char_timeout_ms);

    let report = match receive_size {
        None => send_file(&mut link, &file, &cfg.transfer).await,
        Some(size) => receive_file(&mut link, &file, size, &cfg.transfer).await,
    };

    if let Err(e) = link.channel_mut().close().await {
        log::warn!("[serial:{}] close failed: {}", cfg.serial.port_name, e);
    }

    print_report(&report, cli.json)?;
    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("xferterm: {}", e);
            ExitCode::FAILURE
        }
    }
}
