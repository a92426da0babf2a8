//! Configuration structures for the RTIO harness.
//!
//! Supports TOML deserialization with defaults that describe a small
//! simulated crate (one LED, four TTL outputs, two TTL inputs wired back to
//! the first output), so the harness runs without any file at all.

use crate::error::RtioResult;
use crate::time::TimeBase;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level harness configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Period of one machine unit.
    #[serde(with = "humantime_serde")]
    pub ref_period: Duration,

    /// Slack and pacing policy.
    pub slack: SlackConfig,

    /// Event queue model.
    pub queue: QueueConfig,

    /// Simulated controller parameters.
    pub simulator: SimulatorConfig,

    /// LED blink routine.
    pub led_test: LedTestConfig,

    /// TTL output pulse-train routine.
    pub ttl_out_test: PulseTrainConfig,

    /// Gate/count loopback routine.
    pub gate_count: GateCountConfig,

    /// Addressable channels supplied to the harness.
    pub channels: Vec<ChannelConfig>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            ref_period: Duration::from_nanos(1),
            slack: SlackConfig::default(),
            queue: QueueConfig::default(),
            simulator: SimulatorConfig::default(),
            led_test: LedTestConfig::default(),
            ttl_out_test: PulseTrainConfig::default(),
            gate_count: GateCountConfig::default(),
            channels: default_channels(),
        }
    }
}

fn default_channels() -> Vec<ChannelConfig> {
    let mut channels = vec![ChannelConfig {
        name: "led0".into(),
        index: 0,
        direction: ChannelDirection::Output,
        role: ChannelRole::Led,
    }];
    for i in 0..4 {
        channels.push(ChannelConfig {
            name: format!("ttl{i}"),
            index: i + 1,
            direction: ChannelDirection::Output,
            role: ChannelRole::Ttl,
        });
    }
    for i in 4..6 {
        channels.push(ChannelConfig {
            name: format!("ttl{i}"),
            index: i + 1,
            direction: ChannelDirection::InOut,
            role: ChannelRole::Ttl,
        });
    }
    channels
}

/// Slack controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    /// Lead time added to the live counter by a realtime break.
    #[serde(with = "humantime_serde")]
    pub break_margin: Duration,

    /// Queue lead time the pacing wait aims to keep (cursor minus counter).
    #[serde(with = "humantime_serde")]
    pub target_fill: Duration,

    /// Upper bound on a single pacing wait. `None` waits indefinitely.
    #[serde(
        with = "humantime_serde_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub pacing_timeout: Option<Duration>,

    /// Counter polls between abort/timeout checks in the pacing wait.
    pub abort_check_every: u32,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            break_margin: Duration::from_micros(125),
            target_fill: Duration::from_millis(200),
            pacing_timeout: Some(Duration::from_secs(10)),
            abort_check_every: 256,
        }
    }
}

/// Event queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of events the controller buffers ahead of the counter.
    pub capacity: usize,

    /// Stall the producer when the queue is full instead of failing.
    pub stall_on_full: bool,

    /// Free slots at or below which the routines widen slack before an
    /// iteration.
    pub headroom: usize,

    /// Slack the cursor is widened to when the queue is near capacity.
    #[serde(with = "humantime_serde")]
    pub widen_slack: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 128,
            stall_on_full: true,
            headroom: 8,
            widen_slack: Duration::from_millis(1),
        }
    }
}

/// Simulated controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Counter advance per submitted event.
    #[serde(with = "humantime_serde")]
    pub emit_cost: Duration,

    /// Counter advance per counter read.
    #[serde(with = "humantime_serde")]
    pub poll_cost: Duration,

    /// Delay between gate close and the count becoming readable.
    #[serde(with = "humantime_serde")]
    pub count_latency: Duration,

    /// Output-to-input wiring observed by gate windows.
    pub loopback: Vec<LoopbackConfig>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            emit_cost: Duration::from_nanos(500),
            poll_cost: Duration::from_nanos(100),
            count_latency: Duration::from_micros(5),
            loopback: vec![
                LoopbackConfig {
                    output: "ttl0".into(),
                    input: "ttl4".into(),
                },
                LoopbackConfig {
                    output: "ttl0".into(),
                    input: "ttl5".into(),
                },
            ],
        }
    }
}

/// A wire from an output channel to an input channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopbackConfig {
    /// Driving output channel name.
    pub output: String,
    /// Observing input channel name.
    pub input: String,
}

/// LED blink routine parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedTestConfig {
    /// LED on time per blink.
    #[serde(with = "humantime_serde")]
    pub on: Duration,
    /// LED off time per blink.
    #[serde(with = "humantime_serde")]
    pub off: Duration,
    /// Blinks per outer iteration.
    pub blinks: u32,
}

impl Default for LedTestConfig {
    fn default() -> Self {
        Self {
            on: Duration::from_millis(100),
            off: Duration::from_millis(100),
            blinks: 3,
        }
    }
}

/// TTL output pulse-train routine parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseTrainConfig {
    /// High time of each pulse.
    #[serde(with = "humantime_serde")]
    pub pulse: Duration,
    /// Low time after each pulse.
    #[serde(with = "humantime_serde")]
    pub gap: Duration,
    /// Pause after each channel's pulses.
    #[serde(with = "humantime_serde")]
    pub group_gap: Duration,
    /// Bursts per outer iteration.
    pub bursts: u32,
    /// Channels tested together.
    pub group_size: usize,
}

impl Default for PulseTrainConfig {
    fn default() -> Self {
        Self {
            pulse: Duration::from_micros(1),
            gap: Duration::from_micros(1),
            group_gap: Duration::from_micros(10),
            bursts: 50_000,
            group_size: 4,
        }
    }
}

/// Gate/count loopback parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateCountConfig {
    /// Input gate window.
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// Delay before the first output pulse.
    #[serde(with = "humantime_serde")]
    pub settle: Duration,
    /// Number of output pulses.
    pub pulses: u32,
    /// High time of each pulse.
    #[serde(with = "humantime_serde")]
    pub pulse_width: Duration,
    /// Low time after each pulse.
    #[serde(with = "humantime_serde")]
    pub pulse_spacing: Duration,
}

impl Default for GateCountConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(1),
            settle: Duration::from_micros(50),
            pulses: 42,
            pulse_width: Duration::from_micros(2),
            pulse_spacing: Duration::from_micros(2),
        }
    }
}

/// Channel direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelDirection {
    /// Output-only line.
    #[default]
    Output,
    /// Bidirectional line; can gate its input.
    InOut,
}

/// What a channel is used for by the test routines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelRole {
    /// General purpose TTL line.
    #[default]
    Ttl,
    /// Front-panel LED.
    Led,
}

/// One addressable channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Device name.
    pub name: String,
    /// RTIO channel number, used for ordering.
    pub index: u32,
    /// Line direction.
    #[serde(default)]
    pub direction: ChannelDirection,
    /// Routine the channel belongs to.
    #[serde(default)]
    pub role: ChannelRole,
}

impl HarnessConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Time base derived from `ref_period`.
    ///
    /// # Errors
    ///
    /// Returns an error if the period is zero.
    pub fn time_base(&self) -> RtioResult<TimeBase> {
        TimeBase::new(self.ref_period)
    }

    /// Look up a channel by name.
    #[must_use]
    pub fn channel(&self, name: &str) -> Option<&ChannelConfig> {
        self.channels.iter().find(|c| c.name == name)
    }

    /// Check cross-references between sections.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] on duplicate channels, dangling
    /// loopback names, or loopback wires with the wrong direction.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        let mut indices = HashSet::new();
        for ch in &self.channels {
            if !names.insert(ch.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate channel name {}",
                    ch.name
                )));
            }
            if !indices.insert(ch.index) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate channel index {}",
                    ch.index
                )));
            }
        }

        for wire in &self.simulator.loopback {
            let output = self.channel(&wire.output).ok_or_else(|| {
                ConfigError::Invalid(format!("loopback output {} not defined", wire.output))
            })?;
            let input = self.channel(&wire.input).ok_or_else(|| {
                ConfigError::Invalid(format!("loopback input {} not defined", wire.input))
            })?;
            if input.direction != ChannelDirection::InOut {
                return Err(ConfigError::Invalid(format!(
                    "loopback input {} is output-only",
                    input.name
                )));
            }
            if output.name == input.name {
                return Err(ConfigError::Invalid(format!(
                    "channel {} is wired to itself",
                    output.name
                )));
            }
        }

        if self.queue.capacity == 0 {
            return Err(ConfigError::Invalid("queue capacity must be non-zero".into()));
        }
        if self.queue.headroom >= self.queue.capacity {
            return Err(ConfigError::Invalid(format!(
                "queue headroom {} must be below capacity {}",
                self.queue.headroom, self.queue.capacity
            )));
        }
        if self.ref_period.is_zero() {
            return Err(ConfigError::Invalid("ref_period must be non-zero".into()));
        }
        Ok(())
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Semantically invalid configuration.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

/// Same as [`humantime_serde`] for optional durations.
mod humantime_serde_opt {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[allow(clippy::ref_option)]
    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_str(&humantime::format_duration(*d).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = Option::<String>::deserialize(deserializer)?;
        match s.as_deref() {
            None | Some("none" | "off") => Ok(None),
            Some(s) => humantime::parse_duration(s)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}
