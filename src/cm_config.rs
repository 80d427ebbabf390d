use std::fmt;

use crate::cm_interface::{
    SimTime, ACTIVATION_DELAY_INTERVALS, BASE_CHANNEL_UPDATE_INTERVAL, BASE_CONNECTION_INTERVAL,
    BASE_TIMEOUT_DURATION,
};

// ============================================================================
// Configuration
// ============================================================================

/// Which channel-activation strategy the run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// Algorithm 1: a scheduled update activates unconditionally when its
    /// activation time arrives.
    TimeTriggered,

    /// Algorithm 2: a scheduled update activates only through a completed
    /// Ack1/Ack2 handshake before its activation time; otherwise it expires.
    AckGated,
}

impl Algorithm {
    /// Numeric id used on the CLI and in scenario files.
    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            1 => Some(Algorithm::TimeTriggered),
            2 => Some(Algorithm::AckGated),
            _ => None,
        }
    }

    pub fn id(&self) -> u32 {
        match self {
            Algorithm::TimeTriggered => 1,
            Algorithm::AckGated => 2,
        }
    }
}

/// Main configuration for a single simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Packet error rate right after a successful channel activation (0-1).
    pub initial_error_rate: f64,

    /// Ceiling the error rate ramps to over one update interval (0-1).
    pub max_error_rate: f64,

    /// Probability that a packet still gets through while the two nodes sit
    /// on different channels (0-1).
    pub merge_success_rate: f64,

    /// Activation strategy under comparison.
    pub algorithm: Algorithm,

    /// Run duration in seconds, original (pre-speedup) time scale.
    pub duration_secs: f64,

    /// Time-compression factor applied to every interval and the duration.
    pub speedup: f64,

    /// Random seed for reproducibility.
    pub seed: Option<[u8; 32]>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            initial_error_rate: 0.1,
            max_error_rate: 0.5,
            merge_success_rate: 0.5,
            algorithm: Algorithm::TimeTriggered,
            duration_secs: 60.0,
            speedup: 5.0,
            seed: None,
        }
    }
}

impl SimConfig {
    /// Validate ranges and derive the speedup-scaled timing parameters.
    /// Fails before any simulation state is created.
    pub fn build_params(&self) -> Result<SimParams, ConfigError> {
        if !(0.0..=1.0).contains(&self.initial_error_rate) {
            return Err(ConfigError::RateOutOfRange {
                name: "initial error rate",
                value: self.initial_error_rate,
            });
        }
        if !(0.0..=1.0).contains(&self.max_error_rate) {
            return Err(ConfigError::RateOutOfRange {
                name: "max error rate",
                value: self.max_error_rate,
            });
        }
        if !(0.0..=1.0).contains(&self.merge_success_rate) {
            return Err(ConfigError::RateOutOfRange {
                name: "merge success rate",
                value: self.merge_success_rate,
            });
        }
        if !self.duration_secs.is_finite() || self.duration_secs <= 0.0 {
            return Err(ConfigError::NonPositiveDuration {
                value: self.duration_secs,
            });
        }
        if !self.speedup.is_finite() || self.speedup <= 0.0 {
            return Err(ConfigError::NonPositiveSpeedup { value: self.speedup });
        }

        let connection_interval = BASE_CONNECTION_INTERVAL / self.speedup;
        Ok(SimParams {
            connection_interval,
            channel_update_interval: BASE_CHANNEL_UPDATE_INTERVAL / self.speedup,
            channel_activation_delay: ACTIVATION_DELAY_INTERVALS * connection_interval,
            timeout_duration: BASE_TIMEOUT_DURATION / self.speedup,
            run_duration: self.duration_secs / self.speedup,
        })
    }
}

/// Speedup-scaled timing parameters, all in simulated seconds.
#[derive(Debug, Clone, Copy)]
pub struct SimParams {
    pub connection_interval: SimTime,
    pub channel_update_interval: SimTime,
    pub channel_activation_delay: SimTime,
    pub timeout_duration: SimTime,
    pub run_duration: SimTime,
}

// ============================================================================
// Errors
// ============================================================================

/// Fatal configuration errors, reported before the simulator is constructed.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    RateOutOfRange { name: &'static str, value: f64 },
    NonPositiveDuration { value: f64 },
    NonPositiveSpeedup { value: f64 },
    UnknownAlgorithm { id: u32 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::RateOutOfRange { name, value } => {
                write!(f, "{} must be between 0 and 1, got {}", name, value)
            }
            ConfigError::NonPositiveDuration { value } => {
                write!(f, "duration must be positive, got {}", value)
            }
            ConfigError::NonPositiveSpeedup { value } => {
                write!(f, "speedup must be positive, got {}", value)
            }
            ConfigError::UnknownAlgorithm { id } => {
                write!(f, "unknown algorithm id {} (expected 1 or 2)", id)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_builds_params() {
        let params = SimConfig::default().build_params().unwrap();

        // speedup 5 divides every base interval
        assert!((params.connection_interval - 0.0045).abs() < 1e-12);
        assert!((params.channel_update_interval - 0.3).abs() < 1e-12);
        assert!((params.timeout_duration - 0.8).abs() < 1e-12);
        assert!((params.run_duration - 12.0).abs() < 1e-12);

        // activation delay is 20 connection intervals, post-speedup
        assert!((params.channel_activation_delay - 20.0 * 0.0045).abs() < 1e-12);
    }

    #[test]
    fn test_rates_outside_unit_interval_rejected() {
        let mut config = SimConfig::default();
        config.initial_error_rate = -0.1;
        assert!(matches!(
            config.build_params(),
            Err(ConfigError::RateOutOfRange { name: "initial error rate", .. })
        ));

        let mut config = SimConfig::default();
        config.max_error_rate = 1.5;
        assert!(matches!(
            config.build_params(),
            Err(ConfigError::RateOutOfRange { name: "max error rate", .. })
        ));

        let mut config = SimConfig::default();
        config.merge_success_rate = 2.0;
        assert!(matches!(
            config.build_params(),
            Err(ConfigError::RateOutOfRange { name: "merge success rate", .. })
        ));
    }

    #[test]
    fn test_non_positive_duration_rejected() {
        let mut config = SimConfig::default();
        config.duration_secs = 0.0;
        assert!(matches!(
            config.build_params(),
            Err(ConfigError::NonPositiveDuration { .. })
        ));

        config.duration_secs = -3.0;
        assert!(config.build_params().is_err());
    }

    #[test]
    fn test_algorithm_ids() {
        assert_eq!(Algorithm::from_id(1), Some(Algorithm::TimeTriggered));
        assert_eq!(Algorithm::from_id(2), Some(Algorithm::AckGated));
        assert_eq!(Algorithm::from_id(3), None);
        assert_eq!(Algorithm::TimeTriggered.id(), 1);
        assert_eq!(Algorithm::AckGated.id(), 2);
    }
}
