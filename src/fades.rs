//! Linear parameter ramps
use {
    crate::{
        SoundId,
        result::{DimuseError, DimuseResult, Pool},
        timing::Tick,
        track::Param,
    },
    arrayvec::ArrayVec,
};

/// Number of parameter fades that can run at the same time
pub const MAX_FADES: usize = 16;
/// A running fade applies its value every this many ticks
const APPLY_INTERVAL: Tick = 6;

/// A running fade.
///
/// The slope is the integer quotient of the distance by the length; the
/// remainder is spread over the fade by `mod_counter`, so the fade lands on
/// its destination exactly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fade {
    /// Sound whose parameter is faded (0: free slot)
    pub sound: SoundId,
    /// Faded parameter
    pub param: Param,
    /// Current value
    pub val: i32,
    /// Ticks left
    pub counter: Tick,
    /// Total length in ticks
    pub length: Tick,
    /// Per-tick change
    pub slope: i32,
    /// Remainder of the slope division
    pub slope_mod: i32,
    /// Accumulated remainder
    pub mod_counter: i32,
    /// -1 or 1, the direction of the fade
    pub nudge: i32,
}

impl Default for Fade {
    fn default() -> Self {
        Self {
            sound: 0,
            param: Param::Volume,
            val: 0,
            counter: 0,
            length: 0,
            slope: 0,
            slope_mod: 0,
            mod_counter: 0,
            nudge: 1,
        }
    }
}

impl Fade {
    fn new(sound: SoundId, param: Param, from: i32, to: i32, length: Tick) -> Self {
        let diff = to - from;
        let len = i32::try_from(length).unwrap_or(i32::MAX);
        Self {
            sound,
            param,
            val: from,
            counter: length,
            length,
            slope: diff / len,
            slope_mod: (diff % len).abs(),
            mod_counter: 0,
            nudge: if diff < 0 { -1 } else { 1 },
        }
    }
    /// Advance by one tick. Returns whether the value is due to be applied.
    fn step(&mut self) -> bool {
        self.counter -= 1;
        self.val += self.slope;
        self.mod_counter += self.slope_mod;
        let len = i32::try_from(self.length).unwrap_or(i32::MAX);
        if self.mod_counter >= len {
            self.mod_counter -= len;
            self.val += self.nudge;
        }
        self.counter % APPLY_INTERVAL == 0 || self.counter == 0
    }
}

/// A value a fade wants applied
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FadeStep {
    /// Target sound
    pub sound: SoundId,
    /// Target parameter
    pub param: Param,
    /// New value
    pub val: i32,
    /// The fade is over
    pub last: bool,
}

/// The fade table
#[derive(Default, Debug)]
pub struct Fades {
    pub(crate) fades: [Fade; MAX_FADES],
}

impl Fades {
    /// Start fading `param` of `sound` from `from` to `to` over `length` ticks.
    ///
    /// Replaces a fade of the same parameter.
    pub fn fade_param(
        &mut self,
        sound: SoundId,
        param: Param,
        from: i32,
        to: i32,
        length: Tick,
    ) -> DimuseResult {
        if sound == 0 || length == 0 {
            return Err(DimuseError::ParamOutOfRange);
        }
        self.clear(sound, Some(param));
        let Some(slot) = self.fades.iter_mut().find(|f| f.sound == 0) else {
            log::warn!("No free fade for sound {sound}");
            return Err(DimuseError::PoolExhausted(Pool::Fade));
        };
        *slot = Fade::new(sound, param, from, to, length);
        log::debug!("Fading {param:?} of sound {sound} from {from} to {to} in {length} ticks");
        Ok(())
    }
    /// Stop the fades of `sound`, either all of them or only that of `param`
    pub fn clear(&mut self, sound: SoundId, param: Option<Param>) {
        for fade in &mut self.fades {
            if fade.sound == sound && param.is_none_or(|p| p == fade.param) {
                fade.sound = 0;
            }
        }
    }
    /// Whether any fade is running
    #[cfg(test)]
    pub fn is_active(&self, sound: SoundId, param: Param) -> bool {
        self.fades
            .iter()
            .any(|f| f.sound != 0 && f.sound == sound && f.param == param)
    }
    /// Advance every fade by one tick
    pub fn tick(&mut self) -> ArrayVec<FadeStep, MAX_FADES> {
        let mut steps = ArrayVec::new();
        for fade in &mut self.fades {
            if fade.sound == 0 || fade.counter == 0 {
                continue;
            }
            if fade.step() {
                steps.push(FadeStep {
                    sound: fade.sound,
                    param: fade.param,
                    val: fade.val,
                    last: fade.counter == 0,
                });
            }
            if fade.counter == 0 {
                fade.sound = 0;
            }
        }
        steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(from: i32, to: i32, length: Tick) -> (i32, Vec<FadeStep>) {
        let mut fades = Fades::default();
        fades.fade_param(1, Param::Volume, from, to, length).unwrap();
        let mut applied = Vec::new();
        for _ in 0..length {
            applied.extend(fades.tick());
        }
        assert!(!fades.is_active(1, Param::Volume));
        (applied.last().unwrap().val, applied)
    }

    #[test]
    fn test_fade_lands_exactly() {
        for (from, to) in [(0, 127), (127, 0), (5, 6), (100, 99), (64, 64), (0, 1)] {
            for length in [1, 2, 3, 7, 59, 60, 127, 128, 1000, 9999, 10_000] {
                let (end, _) = run(from, to, length);
                assert_eq!(end, to, "{from} -> {to} in {length} ticks");
            }
        }
    }

    #[test]
    fn test_fade_applies_every_sixth_tick() {
        let (_, applied) = run(0, 120, 20);
        let vals: Vec<i32> = applied.iter().map(|s| s.val).collect();
        // counter hits 18, 12, 6, 0
        assert_eq!(vals, [12, 48, 84, 120]);
        assert!(applied.last().unwrap().last);
        assert!(!applied[0].last);
    }

    #[test]
    fn test_fade_replacement_and_pool() {
        let mut fades = Fades::default();
        fades.fade_param(1, Param::Pan, 0, 10, 10).unwrap();
        fades.fade_param(1, Param::Pan, 10, 0, 10).unwrap();
        assert_eq!(fades.fades.iter().filter(|f| f.sound != 0).count(), 1);
        for sound in 2..=MAX_FADES as SoundId {
            fades.fade_param(sound, Param::Volume, 0, 10, 10).unwrap();
        }
        assert_eq!(
            fades.fade_param(99, Param::Volume, 0, 10, 10),
            Err(DimuseError::PoolExhausted(Pool::Fade))
        );
        fades.clear(1, None);
        assert!(fades.fade_param(99, Param::Volume, 0, 10, 10).is_ok());
    }
}
