//! Engine configuration
use crate::{Bps, ChNum, SampleRate};

/// Which family of sound resources the engine plays.
///
/// The families agree on the overall architecture but differ in a number of
/// numeric details, which are all decided by this value.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Flavor {
    /// Legacy VOC-chunked sounds, 8-bit mono, no MAP
    Voc,
    /// MAP-driven sounds played at their native sample rate.
    ///
    /// Forward jumps are never crossfaded.
    Map,
    /// MAP-driven sounds with pitch shifting and larger MAPs.
    ///
    /// A new jump crossfade is refused while one is still playing.
    MapPitched {
        /// Demo builds only accept small MAPs
        demo: bool,
    },
}

impl Flavor {
    /// Whether sounds carry an embedded MAP
    #[must_use]
    pub const fn has_map(self) -> bool {
        !matches!(self, Self::Voc)
    }
    /// Largest accepted MAP size in bytes, including the `MAP ` header
    #[must_use]
    pub const fn max_map_size(self) -> usize {
        match self {
            Self::Voc | Self::Map | Self::MapPitched { demo: true } => 0x400,
            Self::MapPitched { demo: false } => 0x2000,
        }
    }
    /// How many bytes a single stream read may hand out at once
    #[must_use]
    pub const fn stream_max_read(self) -> usize {
        match self {
            Self::Voc => 0x800,
            Self::Map | Self::MapPitched { .. } => 0x4000,
        }
    }
    /// Whether the track's pitch shift affects the playback rate
    #[must_use]
    pub const fn pitched(self) -> bool {
        matches!(self, Self::MapPitched { .. })
    }
    /// Numerator applied to the music volume while speech plays (out of 128)
    #[must_use]
    pub const fn duck_ratio(self) -> i32 {
        match self {
            Self::Map => 82,
            Self::Voc | Self::MapPitched { .. } => 80,
        }
    }
}

/// Default number of tracks
pub const DEFAULT_TRACK_COUNT: usize = 8;
/// Number of tracks in low latency mode
pub const LOW_LATENCY_TRACK_COUNT: usize = 6;

/// Engine configuration
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// Resource family
    pub flavor: Flavor,
    /// Number of tracks in the pool (at most [`crate::MAX_TRACKS`])
    pub track_count: usize,
    /// Output sample rate
    pub out_rate: SampleRate,
    /// Output word size
    pub out_bps: Bps,
    /// Output channel count
    pub out_channels: ChNum,
    /// Frames mixed per heartbeat
    pub feed_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            flavor: Flavor::Map,
            track_count: DEFAULT_TRACK_COUNT,
            out_rate: 22_050,
            out_bps: Bps::B16,
            out_channels: ChNum::Stereo,
            feed_size: 512,
        }
    }
}

impl EngineConfig {
    /// Default configuration for `flavor`
    #[must_use]
    pub fn new(flavor: Flavor) -> Self {
        Self {
            flavor,
            ..Self::default()
        }
    }
    /// Use the smaller track pool of low latency mode
    #[must_use]
    pub const fn low_latency(mut self) -> Self {
        self.track_count = LOW_LATENCY_TRACK_COUNT;
        self
    }
    /// Duration of one heartbeat in microseconds
    #[must_use]
    pub fn feed_duration_us(&self) -> u64 {
        if self.out_rate == 0 {
            return 0;
        }
        self.feed_size as u64 * 1_000_000 / u64::from(self.out_rate)
    }
    /// Size in bytes of one mixed heartbeat
    #[must_use]
    pub const fn feed_bytes(&self) -> usize {
        self.feed_size * self.out_channels as usize * (self.out_bps as usize / 8)
    }
}
