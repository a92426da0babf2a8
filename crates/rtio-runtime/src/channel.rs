//! Channel handles.
//!
//! Handles are created from the externally supplied channel list and live
//! for the session. Output operations emit edges at the session cursor;
//! input operations open gate windows and read back edge counts.

use crate::controller::{EventKind, RtioController};
use crate::session::Session;
use rtio_common::config::{ChannelConfig, ChannelDirection, ChannelRole};
use rtio_common::error::{RtioError, RtioResult};
use rtio_common::time::Mu;
use std::fmt;
use std::time::Duration;

/// One addressable line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Channel {
    name: String,
    index: u32,
    direction: ChannelDirection,
}

impl Channel {
    /// Create a channel handle.
    pub fn new(name: impl Into<String>, index: u32, direction: ChannelDirection) -> Self {
        Self {
            name: name.into(),
            index,
            direction,
        }
    }

    /// Device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// RTIO channel number.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Line direction.
    pub fn direction(&self) -> ChannelDirection {
        self.direction
    }
}

impl From<&ChannelConfig> for Channel {
    fn from(config: &ChannelConfig) -> Self {
        Self::new(config.name.clone(), config.index, config.direction)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.index)
    }
}

/// TTL output handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TtlOut {
    channel: Channel,
}

impl TtlOut {
    /// Wrap a channel as an output.
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }

    /// Underlying channel.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Device name.
    pub fn name(&self) -> &str {
        self.channel.name()
    }

    /// Drive the output high at the cursor.
    ///
    /// # Errors
    ///
    /// Propagates emission errors.
    pub fn on<C: RtioController>(&self, session: &mut Session<C>) -> RtioResult<()> {
        session.emit(self.channel.index, EventKind::Rising)
    }

    /// Drive the output low at the cursor.
    ///
    /// # Errors
    ///
    /// Propagates emission errors.
    pub fn off<C: RtioController>(&self, session: &mut Session<C>) -> RtioResult<()> {
        session.emit(self.channel.index, EventKind::Falling)
    }

    /// Rising edge at the cursor, advance by `width` mu, falling edge.
    ///
    /// Both edges are checked against the live counter individually.
    ///
    /// # Errors
    ///
    /// Propagates emission errors.
    pub fn pulse_mu<C: RtioController>(
        &self,
        session: &mut Session<C>,
        width: Mu,
    ) -> RtioResult<()> {
        self.on(session)?;
        session.advance(width);
        self.off(session)
    }

    /// [`TtlOut::pulse_mu`] with a real-time width.
    ///
    /// # Errors
    ///
    /// Propagates emission errors.
    pub fn pulse<C: RtioController>(
        &self,
        session: &mut Session<C>,
        width: Duration,
    ) -> RtioResult<()> {
        let width = session.time_base().duration_to_mu(width);
        self.pulse_mu(session, width)
    }
}

/// A closed gate window awaiting read-back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "the gate count is only read through the handle"]
pub struct GateHandle {
    /// Input channel index.
    pub channel: u32,
    /// Gate open timestamp.
    pub open: Mu,
    /// Gate close timestamp.
    pub close: Mu,
}

/// TTL input-output handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TtlInOut {
    channel: Channel,
}

impl TtlInOut {
    /// Wrap a bidirectional channel.
    ///
    /// # Errors
    ///
    /// [`RtioError::Direction`] for an output-only channel.
    pub fn new(channel: Channel) -> RtioResult<Self> {
        if channel.direction != ChannelDirection::InOut {
            return Err(RtioError::Direction {
                channel: channel.index,
            });
        }
        Ok(Self { channel })
    }

    /// Underlying channel.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Device name.
    pub fn name(&self) -> &str {
        self.channel.name()
    }

    /// Count rising edges for `window` mu starting at the cursor.
    ///
    /// Emits gate-open at the cursor, advances by `window`, emits
    /// gate-close. The window is fixed once emitted.
    ///
    /// # Errors
    ///
    /// Propagates emission errors.
    pub fn gate_rising_mu<C: RtioController>(
        &self,
        session: &mut Session<C>,
        window: Mu,
    ) -> RtioResult<GateHandle> {
        let open = session.now_mu();
        session.emit(self.channel.index, EventKind::GateOpen)?;
        session.advance(window);
        session.emit(self.channel.index, EventKind::GateClose)?;
        Ok(GateHandle {
            channel: self.channel.index,
            open,
            close: session.now_mu(),
        })
    }

    /// [`TtlInOut::gate_rising_mu`] with a real-time window.
    ///
    /// # Errors
    ///
    /// Propagates emission errors.
    pub fn gate_rising<C: RtioController>(
        &self,
        session: &mut Session<C>,
        window: Duration,
    ) -> RtioResult<GateHandle> {
        let window = session.time_base().duration_to_mu(window);
        self.gate_rising_mu(session, window)
    }

    /// Read back the rising edges observed by `gate`.
    ///
    /// Blocks until the controller has passed the gate close.
    ///
    /// # Errors
    ///
    /// A configuration error if `gate` belongs to another channel, or any
    /// controller read-back error.
    pub fn count<C: RtioController>(
        &self,
        session: &mut Session<C>,
        gate: GateHandle,
    ) -> RtioResult<u32> {
        if gate.channel != self.channel.index {
            return Err(RtioError::Config(format!(
                "gate on channel {} read through {}",
                gate.channel, self.channel
            )));
        }
        session
            .controller_mut()
            .count_rising(self.channel.index, gate.close)
    }
}

/// The ordered channel sets the test routines operate on.
#[derive(Debug, Clone, Default)]
pub struct ChannelSet {
    /// LEDs, by channel index.
    pub leds: Vec<TtlOut>,
    /// Output-only TTL lines, by channel index.
    pub ttl_outs: Vec<TtlOut>,
    /// Bidirectional TTL lines, by channel index.
    pub ttl_ins: Vec<TtlInOut>,
}

impl ChannelSet {
    /// Sort the supplied channels into LEDs, outputs and inputs.
    ///
    /// # Errors
    ///
    /// A configuration error on duplicate channel indices.
    pub fn from_configs(configs: &[ChannelConfig]) -> RtioResult<Self> {
        let mut sorted: Vec<&ChannelConfig> = configs.iter().collect();
        sorted.sort_by_key(|c| c.index);
        if let Some(pair) = sorted.windows(2).find(|w| w[0].index == w[1].index) {
            return Err(RtioError::Config(format!(
                "channels {} and {} share index {}",
                pair[0].name, pair[1].name, pair[0].index
            )));
        }

        let mut set = Self::default();
        for config in sorted {
            let channel = Channel::from(config);
            match (config.role, config.direction) {
                (ChannelRole::Led, _) => set.leds.push(TtlOut::new(channel)),
                (ChannelRole::Ttl, ChannelDirection::Output) => {
                    set.ttl_outs.push(TtlOut::new(channel));
                }
                (ChannelRole::Ttl, ChannelDirection::InOut) => {
                    set.ttl_ins.push(TtlInOut::new(channel)?);
                }
            }
        }
        Ok(set)
    }

    /// Output-only TTL lines in groups of `size` (the last may be shorter).
    pub fn chunks(&self, size: usize) -> std::slice::Chunks<'_, TtlOut> {
        self.ttl_outs.chunks(size.max(1))
    }
}
