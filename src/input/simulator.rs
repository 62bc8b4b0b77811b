// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/jointline

//! Synthetic input generator for demo/testing

use async_trait::async_trait;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};

use super::traits::{InputMode, InputSource, InputStatus, RawInputFrame, TransportError};

/// Simulator tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// How long the joint sensor stays high per pass
    pub pulse_on_ms: u64,

    /// Gap between passes
    pub pulse_off_ms: u64,

    /// Chance that a single sample of the joint sensor is inverted
    pub bounce_probability: f64,

    /// Chance that a poll fails like a dropped serial frame
    pub read_failure_probability: f64,

    /// Cut machine power once per this period, if set
    pub power_off_every_secs: Option<u64>,

    /// Length of each simulated power cut
    pub power_off_duration_secs: u64,

    /// Fixed RNG seed for reproducible runs
    pub seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            pulse_on_ms: 800,
            pulse_off_ms: 2500,
            bounce_probability: 0.0,
            read_failure_probability: 0.0,
            power_off_every_secs: None,
            power_off_duration_secs: 90,
            seed: None,
        }
    }
}

/// Generates a square-wave joint pulse with optional noise and power cuts
pub struct InputSimulator {
    name: String,
    config: SimulatorConfig,
    status: InputStatus,
    rng: StdRng,
    started: Instant,
    pulse: bool,
    next_toggle: Instant,
}

impl InputSimulator {
    pub fn new(name: &str, config: SimulatorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let now = Instant::now();

        Self {
            name: name.to_string(),
            config,
            status: InputStatus::Init,
            rng,
            started: now,
            pulse: false,
            next_toggle: now,
        }
    }

    fn power_on(&self, now: Instant) -> bool {
        let Some(every) = self.config.power_off_every_secs.filter(|&e| e > 0) else {
            return true;
        };
        let period = Duration::from_secs(every).as_millis();
        let cut = Duration::from_secs(self.config.power_off_duration_secs.min(every)).as_millis();
        let phase = now.duration_since(self.started).as_millis() % period;
        phase < period - cut
    }

    fn advance_pulse(&mut self, now: Instant) {
        if now >= self.next_toggle {
            self.pulse = !self.pulse;
            let hold = if self.pulse {
                self.config.pulse_on_ms
            } else {
                self.config.pulse_off_ms
            };
            self.next_toggle = now + Duration::from_millis(hold);
        }
    }
}

#[async_trait]
impl InputSource for InputSimulator {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> InputMode {
        InputMode::Simulated
    }

    fn status(&self) -> InputStatus {
        self.status
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        self.status = InputStatus::Connected;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.status = InputStatus::Disconnected;
        Ok(())
    }

    async fn poll(&mut self) -> Result<RawInputFrame, TransportError> {
        if self.status != InputStatus::Connected {
            return Err(TransportError::Disconnected);
        }

        if self.config.read_failure_probability > 0.0
            && self.rng.gen::<f64>() < self.config.read_failure_probability
        {
            return Err(TransportError::Protocol("simulated dropped frame".to_string()));
        }

        let now = Instant::now();
        self.advance_pulse(now);

        let mut sensor = self.pulse;
        if self.config.bounce_probability > 0.0 && self.rng.gen::<f64>() < self.config.bounce_probability {
            sensor = !sensor;
        }

        Ok(RawInputFrame::from_signals(sensor, self.power_on(now)))
    }
}
