//! Modbus TCP transport for inverter communication
//!
//! Owns a single Modbus TCP session to the inverter and exposes the
//! blocking-style operations the polling hub needs: connect, close and
//! block reads of holding registers. The client itself has no
//! concurrency; the hub serializes access through its transport mutex.

use crate::config::Settings;
use crate::error::{PhoebusError, Result, TransportError};
use crate::logging::get_logger;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::timeout;
use tokio_modbus::client::tcp;
use tokio_modbus::prelude::*;

/// Transport abstraction over the Modbus session.
///
/// The production implementation is [`ModbusClient`]; tests substitute
/// their own to drive the hub without a device on the network.
#[async_trait]
pub trait Transport: Send {
    /// Open the TCP session. Idempotent if already connected.
    async fn connect(&mut self) -> Result<()>;

    /// Close the session if open; no-op otherwise.
    async fn close(&mut self) -> Result<()>;

    /// Whether a session is currently open
    fn is_connected(&self) -> bool;

    /// Read `count` consecutive holding registers starting at `address`,
    /// addressed to the unit bound at connect time. Returns the raw
    /// big-endian register words.
    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> std::result::Result<Vec<u16>, TransportError>;
}

/// Modbus TCP client for inverter communication
pub struct ModbusClient {
    /// Modbus TCP client connection
    client: Option<tokio_modbus::client::Context>,

    /// Inverter endpoint
    host: String,
    port: u16,

    /// Modbus unit identifier bound to the session
    unit_id: u8,

    /// Connection timeout
    connection_timeout: Duration,

    /// Operation timeout
    operation_timeout: Duration,

    /// Logger
    logger: crate::logging::StructuredLogger,
}

impl ModbusClient {
    /// Create a new Modbus client from hub settings
    pub fn new(settings: &Settings) -> Self {
        let logger = get_logger("modbus");
        Self {
            client: None,
            host: settings.host.clone(),
            port: settings.port,
            unit_id: settings.unit_id,
            connection_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(5),
            logger,
        }
    }

    /// Resolve an owned `host:port` endpoint string. Takes no borrow of
    /// the client so the connect future stays `Send` across the lookup.
    async fn resolve_endpoint(endpoint: String) -> Result<SocketAddr> {
        let mut addrs = tokio::net::lookup_host(&endpoint)
            .await
            .map_err(|e| PhoebusError::connection(format!("Failed to resolve {}: {}", endpoint, e)))?;
        addrs
            .next()
            .ok_or_else(|| PhoebusError::connection(format!("No address found for {}", endpoint)))
    }
}

#[async_trait]
impl Transport for ModbusClient {
    async fn connect(&mut self) -> Result<()> {
        if self.client.is_some() {
            return Ok(());
        }

        let socket_addr =
            Self::resolve_endpoint(format!("{}:{}", self.host, self.port)).await?;
        self.logger.info(&format!(
            "Connecting to Modbus server at {} (unit {})",
            socket_addr, self.unit_id
        ));

        let slave = Slave(self.unit_id);
        match timeout(self.connection_timeout, tcp::connect_slave(socket_addr, slave)).await {
            Ok(Ok(client)) => {
                self.client = Some(client);
                self.logger.info("Successfully connected to Modbus server");
                Ok(())
            }
            Ok(Err(e)) => {
                let error_msg = format!("Failed to connect to Modbus server: {}", e);
                self.logger.error(&error_msg);
                Err(PhoebusError::connection(error_msg))
            }
            Err(_) => {
                let error_msg = "Connection timeout".to_string();
                self.logger.error(&error_msg);
                Err(PhoebusError::connection(error_msg))
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(_client) = self.client.take() {
            self.logger.info("Disconnecting from Modbus server");
            // The session is torn down when the context is dropped
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> std::result::Result<Vec<u16>, TransportError> {
        let timeout_duration = self.operation_timeout;

        // Log before borrowing client
        self.logger.debug(&format!(
            "Reading {} registers from address {}",
            count, address
        ));

        let client = self.client.as_mut().ok_or(TransportError::NotConnected)?;
        let request = client.read_holding_registers(address, count);

        match timeout(timeout_duration, request).await {
            Ok(Ok(Ok(words))) => {
                if words.len() < count as usize {
                    let err = TransportError::ShortRead {
                        requested: count,
                        received: words.len(),
                    };
                    self.logger.error(&err.to_string());
                    return Err(err);
                }
                self.logger
                    .trace(&format!("Read {} registers: {:?}", words.len(), words));
                Ok(words)
            }
            Ok(Ok(Err(exception))) => {
                let err = TransportError::protocol(format!(
                    "Device returned exception: {}",
                    exception
                ));
                self.logger.error(&err.to_string());
                Err(err)
            }
            Ok(Err(e)) => {
                let err =
                    TransportError::protocol(format!("Failed to read holding registers: {}", e));
                self.logger.error(&err.to_string());
                Err(err)
            }
            Err(_) => {
                self.logger.error("Read operation timeout");
                Err(TransportError::Timeout)
            }
        }
    }
}
