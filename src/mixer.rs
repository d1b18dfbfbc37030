//! Fixed point mixing of 8, 12 and 16 bit sources into the output accumulator
use {
    crate::{Bps, ChNum, config::EngineConfig},
    tables::{AmpTables, Limiter, volume_level},
};

pub mod tables;

/// Layout of a source buffer
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MixFormat {
    /// 8, 12 or 16
    pub word_size: u32,
    /// 1 or 2
    pub channels: u32,
}

/// How source frames are spread over output frames
#[derive(Clone, Copy)]
enum Step {
    /// One source frame per output frame
    Copy,
    /// Every source frame twice, odd output frames interpolated
    Double,
    /// Nearest source frame
    Resample,
}

/// Length of the moving average removed by the radio effect
const RADIO_WINDOW: usize = 4;

/// The mixer.
///
/// Every [`mix`](Self::mix) adds into an accumulator of `feed_size` frames,
/// [`finish`](Self::finish) turns the accumulator into output samples.
pub struct Mixer {
    tables: AmpTables,
    limiter: Limiter,
    out_channels: ChNum,
    out_bps: Bps,
    acc: Vec<i32>,
    out: Vec<u8>,
    radio: bool,
    scratch: Vec<u8>,
}

impl Mixer {
    /// Mixer for `cfg.feed_size` output frames
    #[must_use]
    pub fn new(cfg: &EngineConfig) -> Self {
        Self {
            tables: AmpTables::new(),
            limiter: Limiter::new(cfg.track_count),
            out_channels: cfg.out_channels,
            out_bps: cfg.out_bps,
            acc: vec![0; cfg.feed_size * cfg.out_channels as usize],
            out: Vec::with_capacity(cfg.feed_bytes()),
            radio: false,
            scratch: Vec::new(),
        }
    }
    /// Start a new feed
    pub fn clear(&mut self) {
        self.acc.fill(0);
    }
    /// Turn the lo-fi radio effect on or off for subsequent 8 bit mono mixes
    pub const fn set_radio_chatter(&mut self, on: bool) {
        self.radio = on;
    }
    /// Accumulated amplitudes, interleaved
    #[cfg(test)]
    pub fn accumulator(&self) -> &[i32] {
        &self.acc
    }
    fn frames(&self) -> usize {
        self.acc.len() / self.out_channels as usize
    }
    /// Add `in_frames` frames of `src` into `out_frames` output frames starting at `start`
    #[expect(clippy::too_many_arguments)]
    pub fn mix(
        &mut self,
        src: &[u8],
        fmt: MixFormat,
        in_frames: usize,
        out_frames: usize,
        start: usize,
        volume: i32,
        pan: i32,
    ) {
        if in_frames == 0 || out_frames == 0 || start >= self.frames() {
            return;
        }
        let out_frames = out_frames.min(self.frames() - start);
        let radio = self.radio && fmt.word_size == 8 && fmt.channels == 1;
        if radio {
            radio_filter(&src[..in_frames.min(src.len())], &mut self.scratch);
        }
        let src = if radio { &self.scratch[..] } else { src };
        let tables = &self.tables;
        let channels = fmt.channels as usize;
        let amp = |level: usize, n: usize| -> i32 {
            match fmt.word_size {
                8 => src.get(n).map_or(0, |&raw| tables.amp8(level, raw)),
                12 => sample12(src, n).map_or(0, |raw| tables.amp12(level, raw)),
                16 => src.get(n * 2..n * 2 + 2).map_or(0, |b| {
                    let s = i16::from_be_bytes([b[0], b[1]]);
                    tables.amp12(level, ((s >> 4) + 2048).cast_unsigned())
                }),
                _ => 0,
            }
        };
        let step = if in_frames == out_frames {
            Step::Copy
        } else if in_frames * 2 == out_frames {
            Step::Double
        } else {
            Step::Resample
        };
        let vol_level = volume_level(volume);
        let (left, right) = tables.pan_levels(volume, pan);
        let acc = &mut self.acc[..];
        let (mut i, mut err) = (0, 0);
        for o in 0..out_frames {
            let (frame, next) = match step {
                Step::Copy => (o, None),
                Step::Double => {
                    let frame = o / 2;
                    let next = (frame + 1).min(in_frames - 1);
                    (frame, (o % 2 == 1).then_some(next))
                }
                Step::Resample => (i, None),
            };
            let value = |level: usize, ch: usize| -> i32 {
                let a = amp(level, frame * channels + ch);
                match next {
                    Some(next) => (a + amp(level, next * channels + ch)) >> 1,
                    None => a,
                }
            };
            let at = start + o;
            match (channels, self.out_channels) {
                (1, ChNum::Mono) => acc[at] += value(vol_level, 0),
                (1, ChNum::Stereo) => {
                    acc[at * 2] += value(left, 0);
                    acc[at * 2 + 1] += value(right, 0);
                }
                (2, ChNum::Stereo) => {
                    acc[at * 2] += value(left, 0);
                    acc[at * 2 + 1] += value(right, 1);
                }
                (2, ChNum::Mono) => acc[at] += (value(vol_level, 0) + value(vol_level, 1)) >> 1,
                _ => {
                    log::warn!("Can't mix {channels} channel audio");
                    return;
                }
            }
            err += in_frames;
            while err >= out_frames {
                err -= out_frames;
                i += 1;
            }
        }
    }
    /// Run the accumulator through the limiter and return the output samples
    #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn finish(&mut self) -> &[u8] {
        self.out.clear();
        for &a in &self.acc {
            let y = self.limiter.apply(a);
            match self.out_bps {
                Bps::B16 => self.out.extend_from_slice(&y.to_le_bytes()),
                Bps::B8 => self.out.push((i32::from(y >> 8) + 128) as u8),
            }
        }
        &self.out
    }
    /// A feed of silence
    pub fn silence(&mut self) -> &[u8] {
        self.clear();
        self.finish()
    }
}

/// Sample `n` of packed 12 bit audio: two samples in three bytes
fn sample12(src: &[u8], n: usize) -> Option<u16> {
    let b = src.get(n / 2 * 3..n / 2 * 3 + 3)?;
    let (v1, v2, v3) = (u16::from(b[0]), u16::from(b[1]), u16::from(b[2]));
    Some(if n % 2 == 0 {
        ((v2 & 0x0F) << 8) | v1
    } else {
        ((v2 & 0xF0) << 4) | v3
    })
}

/// Remove the low frequencies and overdrive what remains
#[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn radio_filter(src: &[u8], dst: &mut Vec<u8>) {
    dst.clear();
    let mut window = [0i32; RADIO_WINDOW];
    for (n, &raw) in src.iter().enumerate() {
        let centered = i32::from(raw) - 128;
        window[n % RADIO_WINDOW] = centered;
        let avg = window.iter().sum::<i32>() >> 2;
        let out = ((centered - avg) * 4).clamp(-128, 127);
        dst.push((out + 128) as u8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mixer(channels: ChNum) -> Mixer {
        Mixer::new(&EngineConfig {
            out_channels: channels,
            feed_size: 64,
            ..EngineConfig::default()
        })
    }

    /// A buffer of silence in the given format
    fn silence(fmt: MixFormat, frames: usize) -> Vec<u8> {
        let samples = frames * fmt.channels as usize;
        match fmt.word_size {
            8 => vec![0x80; samples],
            12 => [0x00, 0x88, 0x00].repeat(samples.div_ceil(2)),
            _ => vec![0; samples * 2],
        }
    }

    #[test]
    fn test_silence_mixes_to_silence() {
        for out in [ChNum::Mono, ChNum::Stereo] {
            let mut mixer = mixer(out);
            for word_size in [8, 12, 16] {
                for channels in [1, 2] {
                    let fmt = MixFormat {
                        word_size,
                        channels,
                    };
                    for (in_frames, out_frames) in [(64, 64), (32, 64), (48, 64)] {
                        let src = silence(fmt, in_frames);
                        mixer.mix(&src, fmt, in_frames, out_frames, 0, 127, 64);
                        mixer.mix(&src, fmt, in_frames, out_frames, 0, 90, 10);
                    }
                }
            }
            assert!(mixer.accumulator().iter().all(|&a| a == 0));
            assert!(mixer.finish().iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn test_word_sizes_agree() {
        let mut mixer = mixer(ChNum::Mono);
        // Full scale positive: 0xFF (8 bit), 0xFFF (12 bit), 0x7FF0 (16 bit)
        let fmt = |word_size| MixFormat {
            word_size,
            channels: 1,
        };
        mixer.mix(&[0xFF, 0xFF], fmt(8), 2, 2, 0, 127, 64);
        mixer.mix(&[0xFF, 0xFF, 0xFF], fmt(12), 2, 2, 2, 127, 64);
        mixer.mix(&[0x7F, 0xF0, 0x7F, 0xF0], fmt(16), 2, 2, 4, 127, 64);
        assert_eq!(&mixer.accumulator()[..6], &[2032, 2032, 2047, 2047, 2047, 2047]);
    }

    #[test]
    fn test_pan_and_offset() {
        let mut mixer = mixer(ChNum::Stereo);
        let fmt = MixFormat {
            word_size: 8,
            channels: 1,
        };
        mixer.mix(&[0x90; 4], fmt, 4, 4, 10, 127, 0);
        let acc = mixer.accumulator();
        assert_eq!(acc[20], 16 * 16);
        assert_eq!(acc[21], 0);
        assert_eq!(acc[19], 0);
        assert_eq!(acc[28], 0);
    }

    #[test]
    fn test_rate_doubling_interpolates() {
        let mut mixer = mixer(ChNum::Mono);
        let fmt = MixFormat {
            word_size: 8,
            channels: 1,
        };
        mixer.mix(&[0x80, 0x90], fmt, 2, 4, 0, 127, 64);
        assert_eq!(&mixer.accumulator()[..4], &[0, 128, 256, 256]);
    }

    #[test]
    fn test_output_conversion() {
        let mut mixer = mixer(ChNum::Mono);
        let fmt = MixFormat {
            word_size: 8,
            channels: 1,
        };
        mixer.mix(&[0x81], fmt, 1, 1, 0, 127, 64);
        let out = mixer.finish();
        assert_eq!(&out[..2], &256i16.to_le_bytes());
        assert_eq!(out.len(), 128);
        assert!(mixer.silence().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_radio_filter_removes_dc() {
        let mut dst = Vec::new();
        radio_filter(&[0xA0; 16], &mut dst);
        assert!(dst[4..].iter().all(|&b| b == 0x80));
    }
}
