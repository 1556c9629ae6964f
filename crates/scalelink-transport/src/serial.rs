//! Serial port channel for scale communication.
//!
//! This module provides [`SerialChannel`], which implements the [`Channel`]
//! trait for USB virtual COM ports and physical RS-232 connections.
//!
//! Scale indicators are typically RS-232 devices behind a USB adapter and
//! ship with a wide range of factory settings:
//! - Many retail indicators: 9600 8N1, CR LF
//! - Older counting scales: 2400 or 4800 7E1
//! - Some platform scales: 1200 7E1 with STX/ETX framing
//!
//! # Example
//!
//! ```no_run
//! use scalelink_core::{Channel, Delimiter, Framing, LinkConfig};
//! use scalelink_transport::SerialChannel;
//! use std::time::Duration;
//!
//! # async fn example() -> scalelink_core::Result<()> {
//! let mut channel = SerialChannel::new("/dev/ttyUSB0");
//! channel
//!     .open(&LinkConfig::new(9600, Framing::EIGHT_N_ONE, Delimiter::CrLf)?)
//!     .await?;
//!
//! let mut buf = [0u8; 256];
//! let n = channel.receive(&mut buf, Duration::from_secs(1)).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use scalelink_core::error::{Error, Result};
use scalelink_core::transport::{Channel, Signals};
use scalelink_core::types::{ChannelId, DataBits, LinkConfig, Parity, StopBits};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControl {
    #[default]
    None,
    Software,
    Hardware,
}

impl From<FlowControl> for tokio_serial::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => tokio_serial::FlowControl::None,
            FlowControl::Software => tokio_serial::FlowControl::Software,
            FlowControl::Hardware => tokio_serial::FlowControl::Hardware,
        }
    }
}

fn serial_data_bits(bits: DataBits) -> tokio_serial::DataBits {
    match bits {
        DataBits::Seven => tokio_serial::DataBits::Seven,
        DataBits::Eight => tokio_serial::DataBits::Eight,
    }
}

fn serial_stop_bits(bits: StopBits) -> tokio_serial::StopBits {
    match bits {
        StopBits::One => tokio_serial::StopBits::One,
        StopBits::Two => tokio_serial::StopBits::Two,
    }
}

fn serial_parity(parity: Parity) -> tokio_serial::Parity {
    match parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Odd => tokio_serial::Parity::Odd,
        Parity::Even => tokio_serial::Parity::Even,
    }
}

fn map_io_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::UnexpectedEof => Error::ConnectionLost,
        _ => Error::Io(e),
    }
}

/// Serial port channel to a scale indicator.
///
/// Created closed; [`Channel::open`] applies a [`LinkConfig`].
pub struct SerialChannel {
    /// The underlying serial port stream, present while open.
    port: Option<SerialStream>,
    id: ChannelId,
    flow_control: FlowControl,
}

impl SerialChannel {
    /// A closed channel for the given port path (e.g. `/dev/ttyUSB0`, `COM3`).
    pub fn new(port: impl Into<String>) -> Self {
        SerialChannel {
            port: None,
            id: ChannelId::new(port),
            flow_control: FlowControl::None,
        }
    }

    /// Flow control applied on every open.
    pub fn with_flow_control(mut self, flow_control: FlowControl) -> Self {
        self.flow_control = flow_control;
        self
    }

    /// Get the name of the serial port.
    pub fn port_name(&self) -> &str {
        self.id.as_str()
    }
}

#[async_trait]
impl Channel for SerialChannel {
    fn id(&self) -> &ChannelId {
        &self.id
    }

    async fn open(&mut self, config: &LinkConfig) -> Result<()> {
        if self.port.is_some() {
            return Err(Error::Transport(format!("{} is already open", self.id)));
        }

        tracing::debug!(
            port = %self.id,
            config = %config,
            flow_control = ?self.flow_control,
            "Opening serial port"
        );

        let stream = tokio_serial::new(self.id.as_str(), config.baud_rate())
            .data_bits(serial_data_bits(config.data_bits()))
            .stop_bits(serial_stop_bits(config.stop_bits()))
            .parity(serial_parity(config.parity()))
            .flow_control(self.flow_control.into())
            .open_native_async()
            .map_err(|e| {
                tracing::debug!(port = %self.id, config = %config, error = %e, "Serial open failed");
                match e.kind {
                    tokio_serial::ErrorKind::InvalidInput => Error::ConfigRejected {
                        config: *config,
                        reason: e.description,
                    },
                    _ => Error::Transport(format!("failed to open {}: {}", self.id, e)),
                }
            })?;

        self.port = Some(stream);
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;

        tracing::trace!(port = %self.id, bytes = data.len(), data = ?data, "Sending data");

        port.write_all(data).await.map_err(|e| {
            tracing::warn!(port = %self.id, error = %e, "Failed to send data");
            map_io_error(e)
        })?;
        port.flush().await.map_err(map_io_error)?;
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;

        match tokio::time::timeout(timeout, port.read(buf)).await {
            Ok(Ok(n)) => {
                tracing::trace!(port = %self.id, bytes = n, data = ?&buf[..n], "Received data");
                Ok(n)
            }
            Ok(Err(e)) => {
                tracing::warn!(port = %self.id, error = %e, "Failed to receive data");
                Err(map_io_error(e))
            }
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut port) = self.port.take() {
            tracing::debug!(port = %self.id, "Closing serial port");
            if let Err(e) = port.flush().await {
                tracing::debug!(port = %self.id, error = %e, "Flush before close failed");
            }
        }
        Ok(())
    }

    async fn set_signals(&mut self, signals: Signals) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;
        port.write_data_terminal_ready(signals.dtr)
            .map_err(|e| Error::Transport(format!("failed to set DTR: {e}")))?;
        port.write_request_to_send(signals.rts)
            .map_err(|e| Error::Transport(format!("failed to set RTS: {e}")))?;
        tracing::debug!(port = %self.id, dtr = signals.dtr, rts = signals.rts, "Control lines set");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}
