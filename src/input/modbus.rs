// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/jointline

//! Live Modbus RTU input over a serial port

use async_trait::async_trait;
use serialport::{ClearBuffer, SerialPort};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::{debug, info};

use super::rtu;
use super::traits::{InputMode, InputSource, InputStatus, RawInputFrame, TransportError};
use crate::config::IoConfig;

/// Reads 8 discrete inputs from a Modbus RTU slave
pub struct ModbusInput {
    name: String,
    port_path: String,
    baud_rate: u32,
    unit_id: u8,
    timeout: Duration,
    status: InputStatus,
    port: Option<Box<dyn SerialPort>>,
}

impl ModbusInput {
    pub fn new(port_path: &str, config: &IoConfig) -> Self {
        Self {
            name: format!("modbus-rtu:{}", port_path),
            port_path: port_path.to_string(),
            baud_rate: config.baud_rate,
            unit_id: config.unit_id,
            timeout: Duration::from_millis(config.read_timeout_ms),
            status: InputStatus::Init,
            port: None,
        }
    }
}

fn transact(port: &mut dyn SerialPort, unit_id: u8) -> Result<RawInputFrame, TransportError> {
    port.clear(ClearBuffer::Input)
        .map_err(|e| TransportError::Protocol(e.to_string()))?;

    let request = rtu::encode_read_request(unit_id, 0);
    port.write_all(&request)?;
    port.flush()?;

    let mut response = [0u8; rtu::RESPONSE_LEN];
    port.read_exact(&mut response[..3])?;
    let len = if response[1] & 0x80 != 0 {
        rtu::EXCEPTION_LEN
    } else {
        rtu::RESPONSE_LEN
    };
    port.read_exact(&mut response[3..len])?;

    rtu::decode_read_response(unit_id, &response[..len])
}

#[async_trait]
impl InputSource for ModbusInput {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> InputMode {
        InputMode::Live
    }

    fn status(&self) -> InputStatus {
        self.status
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        self.status = InputStatus::Connecting;
        info!("Connecting to Modbus ({} @ {} baud)...", self.port_path, self.baud_rate);

        let builder = serialport::new(&self.port_path, self.baud_rate).timeout(self.timeout);
        let port = tokio::task::spawn_blocking(move || builder.open())
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))?
            .map_err(|e| {
                self.status = InputStatus::Disconnected;
                TransportError::Protocol(e.to_string())
            })?;

        self.port = Some(port);
        self.status = InputStatus::Connected;
        info!("Modbus connected on {}", self.port_path);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.port = None;
        self.status = InputStatus::Disconnected;
        Ok(())
    }

    async fn poll(&mut self) -> Result<RawInputFrame, TransportError> {
        // The port is handed to the blocking task and only put back on success,
        // so a cancelled or failed read always leaves us disconnected.
        let mut port = self.port.take().ok_or(TransportError::Disconnected)?;
        self.status = InputStatus::Disconnected;

        let unit_id = self.unit_id;
        let (port, result) = tokio::task::spawn_blocking(move || {
            let result = transact(port.as_mut(), unit_id);
            (port, result)
        })
        .await
        .map_err(|e| TransportError::Protocol(e.to_string()))?;

        match result {
            Ok(frame) => {
                self.port = Some(port);
                self.status = InputStatus::Connected;
                Ok(frame)
            }
            Err(e) => {
                debug!("Modbus read failed on {}: {}", self.port_path, e);
                Err(e)
            }
        }
    }
}
