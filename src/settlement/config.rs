//! Reconciler configuration.
//!
//! Timeouts arrive as fractional seconds (the wire configuration format uses
//! floats); negative values are rejected here, at configuration time, never
//! deferred to the processing loop.

use std::time::Duration;

use super::error::ConfigError;

/// Configuration for the post-auction reconciliation engine.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Default loss deadline applied to submissions that do not carry their
    /// own: an auction with no win after this long is implicitly lost.
    pub win_timeout: Duration,
    /// Retention horizon for matched wins awaiting campaign events. Past it,
    /// late clicks and conversions resolve as unmatched.
    pub auction_timeout: Duration,
    /// Sweep cadence. Bounds ledger growth and loss-billing latency; must be
    /// strictly shorter than `win_timeout`.
    pub sweep_interval: Duration,
    /// Intake queue capacity for submitted auctions.
    pub submission_queue_size: usize,
    /// Intake queue capacity for win/loss/campaign events.
    pub event_queue_size: usize,
    /// How long the consumer keeps processing queued events after a
    /// shutdown signal before discarding the rest.
    pub drain_window: Duration,
    /// Buffer size of the outcome broadcast channel for listeners.
    pub outcome_channel_size: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            win_timeout: Duration::from_secs(30),
            auction_timeout: Duration::from_secs(900), // 15min campaign window
            sweep_interval: Duration::from_secs(1),
            submission_queue_size: 4096,
            event_queue_size: 8192,
            drain_window: Duration::from_secs(2),
            outcome_channel_size: 1024,
        }
    }
}

impl ReconcilerConfig {
    /// Build a config from the two externally-visible timeouts, both in
    /// seconds. Negative values are a configuration error.
    pub fn try_new(win_timeout_secs: f64, auction_timeout_secs: f64) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        cfg.set_win_timeout(win_timeout_secs)?;
        cfg.set_auction_timeout(auction_timeout_secs)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn set_win_timeout(&mut self, secs: f64) -> Result<(), ConfigError> {
        if !secs.is_finite() || secs < 0.0 {
            return Err(ConfigError::NegativeTimeout {
                name: "win",
                seconds: secs,
            });
        }
        self.win_timeout = Duration::from_secs_f64(secs);
        Ok(())
    }

    pub fn set_auction_timeout(&mut self, secs: f64) -> Result<(), ConfigError> {
        if !secs.is_finite() || secs < 0.0 {
            return Err(ConfigError::NegativeTimeout {
                name: "auction",
                seconds: secs,
            });
        }
        self.auction_timeout = Duration::from_secs_f64(secs);
        Ok(())
    }

    /// Cross-field checks, applied after every mutation path.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.win_timeout.is_zero() && self.sweep_interval >= self.win_timeout {
            return Err(ConfigError::SweepIntervalTooLong {
                interval_ms: self.sweep_interval.as_millis(),
                timeout_ms: self.win_timeout.as_millis(),
            });
        }
        Ok(())
    }

    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(secs) = read_env_f64("PA_WIN_TIMEOUT_SECS")? {
            cfg.set_win_timeout(secs)?;
        }
        if let Some(secs) = read_env_f64("PA_AUCTION_TIMEOUT_SECS")? {
            cfg.set_auction_timeout(secs)?;
        }
        if let Some(ms) = read_env_u64("PA_SWEEP_INTERVAL_MS")? {
            if ms == 0 {
                return Err(ConfigError::InvalidEnv {
                    var: "PA_SWEEP_INTERVAL_MS",
                    value: "0".to_string(),
                });
            }
            cfg.sweep_interval = Duration::from_millis(ms);
        }
        if let Some(n) = read_env_u64("PA_SUBMISSION_QUEUE_SIZE")? {
            if n > 0 {
                cfg.submission_queue_size = n as usize;
            }
        }
        if let Some(n) = read_env_u64("PA_EVENT_QUEUE_SIZE")? {
            if n > 0 {
                cfg.event_queue_size = n as usize;
            }
        }
        if let Some(ms) = read_env_u64("PA_DRAIN_WINDOW_MS")? {
            cfg.drain_window = Duration::from_millis(ms);
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

fn read_env_f64(var: &'static str) -> Result<Option<f64>, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value: raw }),
        Err(_) => Ok(None),
    }
}

fn read_env_u64(var: &'static str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value: raw }),
        Err(_) => Ok(None),
    }
}
