//! `serialport`-backed transport for real hardware.
//!
//! The driver handle is blocking, so input readiness is discovered by
//! polling `bytes_to_read` every `poll_interval_ms`.  Writes are short
//! (at most one block) and go straight to the driver with its write
//! timeout.

use crate::serial::transport::SerialTransport;
use crate::serial::types::*;
use serde::{Deserialize, Serialize};
use serialport::SerialPort;
use std::io::{Read, Write};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

impl From<serialport::Error> for SerialError {
    fn from(e: serialport::Error) -> Self {
        let kind = match e.kind() {
            serialport::ErrorKind::NoDevice => SerialErrorKind::PortNotFound,
            serialport::ErrorKind::InvalidInput => SerialErrorKind::InvalidConfig,
            serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                SerialErrorKind::PermissionDenied
            }
            serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => SerialErrorKind::PortNotFound,
            serialport::ErrorKind::Io(std::io::ErrorKind::TimedOut) => SerialErrorKind::Timeout,
            _ => SerialErrorKind::IoError,
        };
        SerialError::new(kind, e.description)
    }
}

fn map_data_bits(d: DataBits) -> serialport::DataBits {
    match d {
        DataBits::Seven => serialport::DataBits::Seven,
        DataBits::Eight => serialport::DataBits::Eight,
    }
}

fn map_parity(p: Parity) -> serialport::Parity {
    match p {
        Parity::None => serialport::Parity::None,
        Parity::Odd => serialport::Parity::Odd,
        Parity::Even => serialport::Parity::Even,
    }
}

fn map_stop_bits(s: StopBits) -> serialport::StopBits {
    match s {
        StopBits::One => serialport::StopBits::One,
        StopBits::Two => serialport::StopBits::Two,
    }
}

fn map_flow(f: FlowControl) -> serialport::FlowControl {
    match f {
        FlowControl::None => serialport::FlowControl::None,
        FlowControl::RtsCts => serialport::FlowControl::Hardware,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Native transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Transport over an OS serial device.
pub struct NativeTransport {
    name: String,
    port: Mutex<Option<Box<dyn SerialPort>>>,
    poll_interval: Mutex<Duration>,
}

impl NativeTransport {
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            name: port_name.into(),
            port: Mutex::new(None),
            poll_interval: Mutex::new(Duration::from_millis(5)),
        }
    }

    fn port(&self) -> MutexGuard<'_, Option<Box<dyn SerialPort>>> {
        self.port.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn poll_interval(&self) -> Duration {
        *self.poll_interval.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_port<T>(
        &self,
        f: impl FnOnce(&mut Box<dyn SerialPort>) -> Result<T, SerialError>,
    ) -> Result<T, SerialError> {
        let mut guard = self.port();
        match guard.as_mut() {
            Some(port) => f(port).map_err(|e| e.with_port(&self.name)),
            None => Err(SerialError::not_connected(&self.name)),
        }
    }
}

#[async_trait::async_trait]
impl SerialTransport for NativeTransport {
    async fn open(&self, config: &SerialConfig) -> Result<(), SerialError> {
        if self.is_open() {
            return Err(SerialError::new(
                SerialErrorKind::PortBusy,
                format!("Port {} already open", self.name),
            )
            .with_port(&self.name));
        }
        let port = serialport::new(&self.name, config.baud_rate.value())
            .data_bits(map_data_bits(config.data_bits))
            .parity(map_parity(config.parity))
            .stop_bits(map_stop_bits(config.stop_bits))
            .flow_control(map_flow(config.flow_control))
            .timeout(Duration::from_millis(config.write_timeout_ms))
            .open()
            .map_err(|e| SerialError::from(e).with_port(&self.name))?;

        *self.poll_interval.lock().unwrap_or_else(|e| e.into_inner()) =
            Duration::from_millis(config.poll_interval_ms.max(1));
        *self.port() = Some(port);
        log::info!("[serial:{}] opened at {}", self.name, config.shorthand());
        Ok(())
    }

    async fn close(&self) -> Result<(), SerialError> {
        if self.port().take().is_some() {
            log::info!("[serial:{}] closed", self.name);
        }
        Ok(())
    }

    fn try_read(&self, buf: &mut [u8]) -> Result<usize, SerialError> {
        self.with_port(|port| {
            let available = port.bytes_to_read()? as usize;
            if available == 0 || buf.is_empty() {
                return Ok(0);
            }
            let want = available.min(buf.len());
            match port.read(&mut buf[..want]) {
                Ok(n) => Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
                Err(e) => Err(e.into()),
            }
        })
    }

    async fn readable(&self) {
        let interval = self.poll_interval();
        loop {
            let ready = {
                let mut guard = self.port();
                match guard.as_mut() {
                    Some(port) => !matches!(port.bytes_to_read(), Ok(0)),
                    None => true,
                }
            };
            if ready {
                return;
            }
            tokio::time::sleep(interval).await;
        }
    }

    async fn write(&self, buf: &[u8]) -> Result<usize, SerialError> {
        self.with_port(|port| port.write(buf).map_err(SerialError::from))
    }

    async fn drain(&self) -> Result<(), SerialError> {
        self.with_port(|port| port.flush().map_err(SerialError::from))
    }

    async fn bytes_available(&self) -> Result<usize, SerialError> {
        self.with_port(|port| Ok(port.bytes_to_read()? as usize))
    }

    async fn reconfigure(&self, config: &SerialConfig) -> Result<(), SerialError> {
        self.with_port(|port| {
            port.set_baud_rate(config.baud_rate.value())?;
            port.set_data_bits(map_data_bits(config.data_bits))?;
            port.set_parity(map_parity(config.parity))?;
            port.set_stop_bits(map_stop_bits(config.stop_bits))?;
            port.set_flow_control(map_flow(config.flow_control))?;
            Ok(())
        })?;
        log::debug!("[serial:{}] reconfigured to {}", self.name, config.shorthand());
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port().is_some()
    }

    fn port_name(&self) -> &str {
        &self.name
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Port discovery
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One entry of the system port list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortInfo {
    pub port_name: String,
    /// `usb`, `pci`, `bluetooth` or `unknown`.
    pub port_type: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl From<serialport::SerialPortInfo> for PortInfo {
    fn from(info: serialport::SerialPortInfo) -> Self {
        let mut out = PortInfo {
            port_name: info.port_name,
            port_type: "unknown".to_string(),
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
        };
        match info.port_type {
            serialport::SerialPortType::UsbPort(usb) => {
                out.port_type = "usb".to_string();
                out.vid = Some(usb.vid);
                out.pid = Some(usb.pid);
                out.manufacturer = usb.manufacturer;
                out.product = usb.product;
            }
            serialport::SerialPortType::PciPort => out.port_type = "pci".to_string(),
            serialport::SerialPortType::BluetoothPort => out.port_type = "bluetooth".to_string(),
            serialport::SerialPortType::Unknown => {}
        }
        out
    }
}

/// Enumerate serial ports present on the system.
pub async fn available_ports() -> Result<Vec<PortInfo>, SerialError> {
    let ports = tokio::task::spawn_blocking(serialport::available_ports)
        .await
        .map_err(|e| SerialError::new(SerialErrorKind::IoError, format!("Task join error: {}", e)))??;
    let mut list: Vec<PortInfo> = ports.into_iter().map(PortInfo::from).collect();
    list.sort_by(|a, b| a.port_name.cmp(&b.port_name));
    Ok(list)
}
