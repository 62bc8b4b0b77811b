// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/jointline

//! Input manager - timeout, health and reconnect around one input source

use chrono::NaiveDateTime;
use tokio::time::{timeout, Duration, Instant};
use tracing::{debug, info, warn};

use super::traits::{InputHealth, InputSource, InputStatus, RawInputFrame, TransportError};
use crate::config::IoConfig;

/// Owns the active input source and shields the engine from its failures
pub struct InputManager {
    source: Box<dyn InputSource>,
    health: InputHealth,
    read_timeout: Duration,
    reconnect_interval: Duration,
    last_connect_attempt: Option<Instant>,
}

impl InputManager {
    pub fn new(source: Box<dyn InputSource>, config: &IoConfig) -> Self {
        let health = InputHealth {
            source: source.name().to_string(),
            mode: source.mode(),
            status: InputStatus::Init,
            reads_count: 0,
            error_count: 0,
            last_error: None,
            last_success: None,
        };

        Self {
            source,
            health,
            read_timeout: Duration::from_millis(config.read_timeout_ms),
            reconnect_interval: Duration::from_millis(config.reconnect_interval_ms),
            last_connect_attempt: None,
        }
    }

    pub fn status(&self) -> InputStatus {
        self.health.status
    }

    pub fn health(&self) -> &InputHealth {
        &self.health
    }

    /// Connect now, ignoring the reconnect interval
    pub async fn start(&mut self) {
        info!("Input source: {} ({:?})", self.health.source, self.health.mode);
        self.try_connect().await;
    }

    pub async fn stop(&mut self) {
        if let Err(e) = self.source.disconnect().await {
            warn!("Error disconnecting {}: {}", self.health.source, e);
        }
        self.health.status = InputStatus::Disconnected;
    }

    async fn try_connect(&mut self) {
        self.last_connect_attempt = Some(Instant::now());
        self.health.status = InputStatus::Connecting;

        match timeout(self.read_timeout, self.source.connect()).await {
            Ok(Ok(())) => {
                info!("Connected input source: {}", self.health.source);
                self.health.status = InputStatus::Connected;
            }
            Ok(Err(e)) => {
                warn!("Input connect failed for {}, retrying: {}", self.health.source, e);
                self.record_error(&e);
            }
            Err(_) => {
                warn!("Input connect timed out for {}, retrying", self.health.source);
                self.record_error(&TransportError::Timeout(self.read_timeout.as_millis() as u64));
            }
        }
    }

    fn record_error(&mut self, e: &TransportError) {
        self.health.status = InputStatus::Disconnected;
        self.health.error_count += 1;
        self.health.last_error = Some(e.to_string());
    }

    /// Read one frame. Any failure, including a timeout, is "no data".
    pub async fn read(&mut self, now: NaiveDateTime) -> Result<RawInputFrame, TransportError> {
        if self.health.status != InputStatus::Connected {
            let due = self
                .last_connect_attempt
                .map_or(true, |t| t.elapsed() >= self.reconnect_interval);
            if due {
                self.try_connect().await;
            }
            if self.health.status != InputStatus::Connected {
                return Err(TransportError::Disconnected);
            }
        }

        let result = match timeout(self.read_timeout, self.source.poll()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.read_timeout.as_millis() as u64)),
        };

        match result {
            Ok(frame) => {
                self.health.reads_count += 1;
                self.health.last_success = Some(now);
                Ok(frame)
            }
            Err(e) => {
                debug!("Read error for {}: {}", self.health.source, e);
                self.record_error(&e);
                // Start the reconnect clock from the failure, not the last connect
                self.last_connect_attempt = Some(Instant::now());
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::InputMode;
    use async_trait::async_trait;

    /// Fails every `fail_every`th poll, never connects while `down` is set
    struct FlakySource {
        polls: u32,
        fail_every: u32,
        down: bool,
        connected: bool,
    }

    #[async_trait]
    impl InputSource for FlakySource {
        fn name(&self) -> &str { "flaky" }
        fn mode(&self) -> InputMode { InputMode::Live }
        fn status(&self) -> InputStatus {
            if self.connected { InputStatus::Connected } else { InputStatus::Disconnected }
        }
        async fn connect(&mut self) -> Result<(), TransportError> {
            if self.down {
                return Err(TransportError::Disconnected);
            }
            self.connected = true;
            Ok(())
        }
        async fn disconnect(&mut self) -> Result<(), TransportError> {
            self.connected = false;
            Ok(())
        }
        async fn poll(&mut self) -> Result<RawInputFrame, TransportError> {
            self.polls += 1;
            if self.polls % self.fail_every == 0 {
                self.connected = false;
                return Err(TransportError::Protocol("crc".into()));
            }
            Ok(RawInputFrame::from_signals(true, true))
        }
    }

    fn now() -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(8, 0, 0).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_read_degrades_then_reconnects() {
        let source = FlakySource { polls: 0, fail_every: 2, down: false, connected: false };
        let mut manager = InputManager::new(Box::new(source), &IoConfig::default());
        manager.start().await;
        assert_eq!(manager.status(), InputStatus::Connected);

        assert!(manager.read(now()).await.is_ok());
        assert!(manager.read(now()).await.is_err());
        assert_eq!(manager.status(), InputStatus::Disconnected);
        assert_eq!(manager.health().error_count, 1);

        // Not yet due for reconnect
        assert!(matches!(manager.read(now()).await, Err(TransportError::Disconnected)));

        tokio::time::advance(Duration::from_millis(IoConfig::default().reconnect_interval_ms)).await;
        assert!(manager.read(now()).await.is_ok());
        assert_eq!(manager.status(), InputStatus::Connected);
        assert_eq!(manager.health().reads_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_source_never_panics() {
        let source = FlakySource { polls: 0, fail_every: 1, down: true, connected: false };
        let mut manager = InputManager::new(Box::new(source), &IoConfig::default());
        manager.start().await;

        for _ in 0..5 {
            assert!(manager.read(now()).await.is_err());
            tokio::time::advance(Duration::from_secs(10)).await;
        }
        assert_eq!(manager.status(), InputStatus::Disconnected);
    }
}
