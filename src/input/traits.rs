// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/jointline

//! Input source traits and common types

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of discrete inputs read per poll
pub const FRAME_WIDTH: usize = 8;

/// Bit position of the joint-pass sensor
pub const JOINT_SENSOR_BIT: usize = 0;

/// Bit position of the machine-power flag
pub const MACHINE_POWER_BIT: usize = 7;

/// One poll worth of discrete inputs.
///
/// Bit positions are a contract with the transport: bit 0 is the joint-pass
/// sensor, bit 7 is machine power. Frames are never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawInputFrame {
    bits: [bool; FRAME_WIDTH],
}

impl RawInputFrame {
    pub fn new(bits: [bool; FRAME_WIDTH]) -> Self {
        Self { bits }
    }

    /// Frame with only the two bits the counter cares about set
    pub fn from_signals(joint_sensor: bool, machine_power: bool) -> Self {
        let mut bits = [false; FRAME_WIDTH];
        bits[JOINT_SENSOR_BIT] = joint_sensor;
        bits[MACHINE_POWER_BIT] = machine_power;
        Self { bits }
    }

    /// Unpack a Modbus coil/input byte, LSB = input 0
    pub fn from_byte(byte: u8) -> Self {
        let mut bits = [false; FRAME_WIDTH];
        for (i, bit) in bits.iter_mut().enumerate() {
            *bit = byte & (1 << i) != 0;
        }
        Self { bits }
    }

    pub fn joint_sensor(&self) -> bool {
        self.bits[JOINT_SENSOR_BIT]
    }

    pub fn machine_power(&self) -> bool {
        self.bits[MACHINE_POWER_BIT]
    }

    pub fn bit(&self, index: usize) -> Option<bool> {
        self.bits.get(index).copied()
    }

    pub fn bits(&self) -> &[bool; FRAME_WIDTH] {
        &self.bits
    }
}

/// Transport-level failures. All of them mean "no data this poll".
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("input source disconnected")]
    Disconnected,

    #[error("read timed out after {0} ms")]
    Timeout(u64),

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Connection status of an input source as seen by the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputStatus {
    Init,
    Connecting,
    Connected,
    Disconnected,
    /// Connected, but no successful read for longer than the stale threshold
    Stale,
}

impl InputStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, InputStatus::Connected)
    }
}

/// Which implementation is feeding the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputMode {
    Simulated,
    Live,
}

/// Trait for anything that can produce [`RawInputFrame`]s.
///
/// `poll` must be safe to call while disconnected and report an error
/// instead of panicking.
#[async_trait]
pub trait InputSource: Send {
    /// Human-readable identifier used in logs
    fn name(&self) -> &str;

    fn mode(&self) -> InputMode;

    fn status(&self) -> InputStatus;

    /// Open the underlying transport
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Close the underlying transport
    async fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Read the 8 discrete inputs once
    async fn poll(&mut self) -> Result<RawInputFrame, TransportError>;
}

/// Input health metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputHealth {
    pub source: String,
    pub mode: InputMode,
    pub status: InputStatus,
    pub reads_count: u64,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub last_success: Option<NaiveDateTime>,
}
