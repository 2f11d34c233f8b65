//! Actuator link - write-only command channel to the bump controller
//!
//! The link is optional: when the serial port cannot be opened the loop keeps
//! running, commands are still computed and logged, then dropped.

use crate::infra::config::{CommandProtocol, Config};
use crate::infra::metrics::Metrics;
use crate::services::throttler::ActuatorCommand;
use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, trace, warn};

/// Byte sink the encoded commands are written to
#[async_trait]
pub trait ActuatorSink: Send {
    async fn write_command(&mut self, bytes: &[u8]) -> anyhow::Result<()>;
}

/// Serial port sink (USB CDC or RS485 adapter)
pub struct SerialSink {
    port: tokio_serial::SerialStream,
}

impl SerialSink {
    pub fn open(device: &str, baud: u32) -> anyhow::Result<Self> {
        let port = tokio_serial::new(device, baud)
            .timeout(Duration::from_millis(100))
            .open_native_async()
            .with_context(|| format!("open serial port {device} at {baud} baud"))?;
        Ok(Self { port })
    }
}

#[async_trait]
impl ActuatorSink for SerialSink {
    async fn write_command(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        self.port.write_all(bytes).await?;
        self.port.flush().await?;
        Ok(())
    }
}

/// Encodes commands for the deployment protocol and writes them when a link exists
pub struct Actuator {
    sink: Option<Box<dyn ActuatorSink>>,
    protocol: CommandProtocol,
    metrics: Arc<Metrics>,
}

impl Actuator {
    pub fn new(sink: Option<Box<dyn ActuatorSink>>, protocol: CommandProtocol, metrics: Arc<Metrics>) -> Self {
        Self { sink, protocol, metrics }
    }

    /// Open the configured serial link; failure leaves the actuator absent
    pub fn from_config(config: &Config, metrics: Arc<Metrics>) -> Self {
        let sink: Option<Box<dyn ActuatorSink>> = if !config.actuator_enabled() {
            info!("actuator_disabled");
            None
        } else {
            match SerialSink::open(config.actuator_device(), config.actuator_baud()) {
                Ok(sink) => {
                    info!(device = %config.actuator_device(), baud = %config.actuator_baud(), "actuator_port_opened");
                    Some(Box::new(sink))
                }
                Err(e) => {
                    warn!(device = %config.actuator_device(), error = %format!("{e:#}"), "actuator_unavailable");
                    None
                }
            }
        };
        Self::new(sink, config.command_protocol(), metrics)
    }

    pub fn is_connected(&self) -> bool {
        self.sink.is_some()
    }

    /// Send one command. Never fails: a missing link or a write error drops it.
    pub async fn send(&mut self, command: ActuatorCommand) -> bool {
        let bytes = command.encode(self.protocol);
        let Some(sink) = self.sink.as_mut() else {
            debug!(command = %command, "actuator_absent_command_dropped");
            self.metrics.record_command_dropped();
            return false;
        };

        match sink.write_command(&bytes).await {
            Ok(()) => {
                info!(command = %command, "actuator_command");
                trace!(bytes = %hex::encode(&bytes), "actuator_bytes");
                self.metrics.record_command_sent();
                true
            }
            Err(e) => {
                warn!(command = %command, error = %e, "actuator_write_failed");
                self.metrics.record_command_dropped();
                false
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use parking_lot::Mutex;

    /// Sink capturing every write
    #[derive(Clone, Default)]
    pub struct RecordingSink {
        pub writes: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    #[async_trait]
    impl ActuatorSink for RecordingSink {
        async fn write_command(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
            self.writes.lock().push(bytes.to_vec());
            Ok(())
        }
    }
}
