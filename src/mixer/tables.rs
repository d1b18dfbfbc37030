//! Precomputed lookup tables of the mixer

/// Number of discrete volume levels
pub const VOLUME_LEVELS: usize = 17;
/// Amplitude of a full scale sample at the highest volume level
pub const FULL_SCALE: i32 = 2048;
/// Accumulator value up to which the limiter passes samples through linearly
const LIMITER_KNEE: i32 = 1536;
/// Controls how quickly the limiter curve flattens out past the knee
const LIMITER_SOFTNESS: f64 = 512.;

/// Quantize a 0..=127 volume to one of the [`VOLUME_LEVELS`]
#[must_use]
pub fn volume_level(volume: i32) -> usize {
    if volume <= 0 {
        0
    } else {
        // 1..=16
        (volume.min(127) >> 3).unsigned_abs() as usize + 1
    }
}

/// Amplitude lookup tables, indexed by volume level and raw sample value
pub struct AmpTables {
    amp8: Box<[[i16; 256]; VOLUME_LEVELS]>,
    amp12: Box<[[i16; 4096]; VOLUME_LEVELS]>,
    /// Left and right volume levels, indexed by volume and pan
    pan: Box<[[[u8; 2]; 128]; 128]>,
}

impl AmpTables {
    #[expect(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn new() -> Self {
        let mut amp8 = Box::new([[0; 256]; VOLUME_LEVELS]);
        let mut amp12 = Box::new([[0; 4096]; VOLUME_LEVELS]);
        let mut pan = Box::new([[[0; 2]; 128]; 128]);
        for (level, (row8, row12)) in amp8.iter_mut().zip(amp12.iter_mut()).enumerate() {
            let level = level as i32;
            for (raw, amp) in row8.iter_mut().enumerate() {
                *amp = ((raw as i32 - 128) * level) as i16;
            }
            for (raw, amp) in row12.iter_mut().enumerate() {
                *amp = ((raw as i32 - 2048) * level / 16) as i16;
            }
        }
        for (vol, row) in pan.iter_mut().enumerate() {
            let vol = vol as i32;
            for (p, levels) in row.iter_mut().enumerate() {
                let p = p as i32;
                let left = vol * (127 - p).min(63) / 63;
                let right = vol * p.min(64) / 64;
                *levels = [volume_level(left) as u8, volume_level(right) as u8];
            }
        }
        Self { amp8, amp12, pan }
    }
    /// Amplitude of an unsigned 8 bit sample
    pub fn amp8(&self, level: usize, raw: u8) -> i32 {
        i32::from(self.amp8[level][usize::from(raw)])
    }
    /// Amplitude of an unsigned 12 bit sample (16 bit samples are reduced to 12 bits first)
    pub fn amp12(&self, level: usize, raw: u16) -> i32 {
        i32::from(self.amp12[level][usize::from(raw & 0xFFF)])
    }
    /// Left and right volume levels for `volume` and `pan`
    pub fn pan_levels(&self, volume: i32, pan: i32) -> (usize, usize) {
        let [l, r] = self.pan[volume.clamp(0, 127).unsigned_abs() as usize]
            [pan.clamp(0, 127).unsigned_abs() as usize];
        (usize::from(l), usize::from(r))
    }
}

/// Soft limiter mapping accumulated amplitudes in `-range..=range` to 16 bit samples.
///
/// The curve (see `limit`) is an approximation of its own, not the iMUSE
/// clipping table: past the knee the output isn't bit exact with the games.
pub struct Limiter {
    range: i32,
    table: Vec<i16>,
}

impl Limiter {
    /// Limiter for the sum of `channels` full scale contributions
    pub fn new(channels: usize) -> Self {
        let range = FULL_SCALE * i32::try_from(channels.max(1)).unwrap_or(i32::MAX / FULL_SCALE);
        let half: Vec<i16> = (0..=range).map(|x| limit(x, range)).collect();
        let mut table = Vec::with_capacity(half.len() * 2 - 1);
        table.extend(half.iter().rev().map(|&y| -y));
        table.extend_from_slice(&half[1..]);
        Self { range, table }
    }
    pub fn apply(&self, acc: i32) -> i16 {
        let idx = acc.clamp(-self.range, self.range) + self.range;
        self.table[idx.unsigned_abs() as usize]
    }
}

/// Linear up to the knee, then a logarithmic curve reaching full scale at `range`.
///
/// The knee and softness are tuning values of this limiter, not iMUSE constants.
#[expect(clippy::cast_possible_truncation)]
fn limit(x: i32, range: i32) -> i16 {
    let knee_y = LIMITER_KNEE * 16;
    if x <= LIMITER_KNEE || range <= LIMITER_KNEE {
        return (x * 16).min(i32::from(i16::MAX)) as i16;
    }
    let t = f64::from(x - LIMITER_KNEE);
    let span = f64::from(range - LIMITER_KNEE);
    let curve = (1. + t / LIMITER_SOFTNESS).ln() / (1. + span / LIMITER_SOFTNESS).ln();
    let y = f64::from(knee_y) + f64::from(i32::from(i16::MAX) - knee_y) * curve;
    y.round().min(f64::from(i16::MAX)) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_levels() {
        assert_eq!(volume_level(0), 0);
        assert_eq!(volume_level(1), 1);
        assert_eq!(volume_level(127), 16);
        assert_eq!(volume_level(-4), 0);
    }

    #[test]
    fn test_pan_balance() {
        let tables = AmpTables::new();
        assert_eq!(tables.pan_levels(127, 64), (16, 16));
        assert_eq!(tables.pan_levels(127, 0), (16, 0));
        assert_eq!(tables.pan_levels(127, 127), (0, 16));
        assert_eq!(tables.pan_levels(0, 64), (0, 0));
    }

    #[test]
    fn test_limiter_shape() {
        let lim = Limiter::new(8);
        assert_eq!(lim.apply(0), 0);
        assert_eq!(lim.apply(100), 1600);
        assert_eq!(lim.apply(-100), -1600);
        assert_eq!(lim.apply(FULL_SCALE * 8), i16::MAX);
        assert_eq!(lim.apply(i32::MAX), i16::MAX);
        assert_eq!(lim.apply(i32::MIN), -i16::MAX);
        let mut prev = lim.apply(-FULL_SCALE * 8);
        for x in (-FULL_SCALE * 8 + 1)..=(FULL_SCALE * 8) {
            let y = lim.apply(x);
            assert!(y >= prev);
            prev = y;
        }
    }
}
