//! Timing related definitions and utilities

/// Microseconds, the unit the heartbeat clock counts in
pub type Micros = u64;

/// Ticks of the 60 Hz clock that drives fades and deferred commands.
pub type Tick = u32;

/// Period of the 60 Hz clock
pub const FAST_PERIOD_US: Micros = 16_667;
/// Period of the 10 Hz clock that drives ducking
pub const SLOW_PERIOD_US: Micros = 100_000;

/// Converts milliseconds to 60 Hz [`Tick`]s, at least one.
#[must_use]
pub fn ms_to_ticks(ms: u32) -> Tick {
    let ticks = u64::from(ms) * 60 / 1000;
    Tick::try_from(ticks).unwrap_or(Tick::MAX).max(1)
}

/// Converts a byte offset into raw audio to milliseconds.
///
/// Returns 0 for degenerate formats.
#[must_use]
pub fn offset_to_ms(offset: usize, word_size: u32, rate: u32, channels: u32) -> i32 {
    let bytes_per_5ms = u64::from(word_size / 8) * u64::from(rate) * u64::from(channels) / 200;
    if bytes_per_5ms == 0 {
        return 0;
    }
    i32::try_from(offset as u64 * 5 / bytes_per_5ms).unwrap_or(i32::MAX)
}

/// Number of clock ticks that elapsed during one heartbeat
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct Elapsed {
    /// 60 Hz ticks
    pub fast: Tick,
    /// 10 Hz ticks
    pub slow: Tick,
}

/// Derives the 60 Hz and 10 Hz clocks from the irregular heartbeat period
#[derive(Clone, Copy, Default, Debug)]
pub struct Clock {
    fast_acc: Micros,
    slow_acc: Micros,
}

impl Clock {
    /// Advance by `us` microseconds
    pub fn advance(&mut self, us: Micros) -> Elapsed {
        self.fast_acc += us;
        self.slow_acc += us;
        let mut elapsed = Elapsed::default();
        while self.fast_acc >= FAST_PERIOD_US {
            self.fast_acc -= FAST_PERIOD_US;
            elapsed.fast += 1;
        }
        while self.slow_acc >= SLOW_PERIOD_US {
            self.slow_acc -= SLOW_PERIOD_US;
            elapsed.slow += 1;
        }
        elapsed
    }
}
