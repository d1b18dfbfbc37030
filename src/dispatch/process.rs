//! Feeding a track's audio to the mixer, one heartbeat at a time
use {
    super::{Ctx, Dispatch, NavOutcome, eff_rate, navigate, predict_stream},
    crate::{
        mixer::MixFormat,
        source::SoundSource,
        streamer::ring::RingError,
        track::Track,
        triggers::Marker,
    },
};

/// What to do with a track after processing it
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Outcome {
    /// Keep playing
    Keep,
    /// The sound ended or failed: clear the track
    Clear,
    /// A marker was passed mid feed. Fire its triggers, then call again to finish the feed.
    Marker(Marker),
}

/// Progress through the feed being mixed
#[derive(Clone, Copy, Debug)]
pub struct Feed {
    /// Next output frame
    start: usize,
    /// Output frames left
    left: usize,
}

/// Input and output frame counts for mixing `feed` output frames of audio
/// at `rate`, of which `available` input frames remain
fn frame_counts(rate: usize, out_rate: usize, feed: usize, available: usize) -> (usize, usize) {
    let wanted = rate * feed / out_rate;
    if wanted <= available {
        (wanted, feed)
    } else {
        (available, out_rate * available / rate)
    }
}

/// 12 bit mono audio packs two samples in three bytes
const fn pairs_only(word_size: u32, channels: u32) -> bool {
    word_size == 12 && channels == 1
}

/// Mix what remains of the fade buffer of `track` at output frame `start`,
/// covering at most `feed` output frames
fn mix_fade<S: SoundSource + ?Sized>(ctx: &mut Ctx<S>, track: &mut Track, start: usize, feed: usize) {
    let d = &mut track.dispatch;
    let Some(buf) = d.fade else {
        return;
    };
    let out_rate = ctx.cfg.out_rate as usize;
    let rate = eff_rate(ctx.cfg.flavor, track.pitch_shift, d.fade_rate);
    let frame_bits = (d.fade_word_size * d.fade_channels) as usize;
    if rate == 0 || frame_bits == 0 {
        d.release_fade(ctx.fade_bufs);
        return;
    }
    let available = 8 * d.fade_remaining / frame_bits;
    let (mut in_frames, out_frames) = frame_counts(rate, out_rate, feed, available);
    if pairs_only(d.fade_word_size, d.fade_channels) {
        in_frames &= !1;
    }
    if in_frames == 0 {
        if feed > 0 {
            log::debug!("Sound {}: crossfade ends on a partial frame", track.sound);
            d.release_fade(ctx.fade_bufs);
        }
        return;
    }
    let bytes = frame_bits * in_frames / 8;
    let vol = d.fade_out_volume(track.eff_vol, bytes);
    let fmt = MixFormat {
        word_size: d.fade_word_size,
        channels: d.fade_channels,
    };
    let src = &ctx.fade_bufs.data(buf)[d.fade_offset..d.fade_offset + bytes];
    ctx.mixer
        .mix(src, fmt, in_frames, out_frames, start, vol, track.pan);
    d.fade_offset += bytes;
    d.fade_remaining -= bytes;
    if d.fade_remaining == 0 {
        d.release_fade(ctx.fade_bufs);
    }
}

/// Volume of the main material: it fades in while a crossfade runs
fn main_volume(d: &mut Dispatch, eff_vol: i32) -> i32 {
    if d.fade.is_some() {
        d.fade_in_volume(eff_vol)
    } else {
        eff_vol
    }
}

/// Start a feed of a MAP sound: look ahead in its stream and mix what's left
/// of its crossfade
pub fn begin_feed<S: SoundSource + ?Sized>(ctx: &mut Ctx<S>, track: &mut Track) -> Feed {
    predict_stream(ctx, track);
    let left = ctx.cfg.feed_size;
    if track.dispatch.fade.is_some() {
        mix_fade(ctx, track, 0, left);
    }
    Feed { start: 0, left }
}

/// Mix the rest of `feed` for a MAP sound
pub fn process_map<S: SoundSource + ?Sized>(
    ctx: &mut Ctx<S>,
    track: &mut Track,
    feed: &mut Feed,
) -> Outcome {
    let out_rate = ctx.cfg.out_rate as usize;
    loop {
        if track.dispatch.audio_remaining == 0 || track.dispatch.resume.is_some() {
            match navigate(ctx, track) {
                Ok(NavOutcome::Region { fade_started }) => {
                    if fade_started {
                        mix_fade(ctx, track, feed.start, feed.left);
                    }
                }
                Ok(NavOutcome::Pending) => break,
                Ok(NavOutcome::Marker(marker)) => return Outcome::Marker(marker),
                Ok(NavOutcome::Stop) => {
                    log::debug!("Sound {} reached its end", track.sound);
                    return Outcome::Clear;
                }
                Err(e) => {
                    log::warn!("Sound {}: {e}", track.sound);
                    return Outcome::Clear;
                }
            }
        }
        if feed.left == 0 {
            return Outcome::Keep;
        }
        let d = &mut track.dispatch;
        let rate = eff_rate(ctx.cfg.flavor, track.pitch_shift, d.sample_rate);
        let frame_bits = (d.word_size * d.channels) as usize;
        if rate == 0 || frame_bits == 0 {
            log::warn!("Sound {}: region without a usable format", track.sound);
            return Outcome::Clear;
        }
        let mut available = 8 * d.audio_remaining / frame_bits;
        if d.stream.is_some() {
            // Streams hand out at most this much at once; the rest comes next round
            available = available.min(8 * ctx.cfg.flavor.stream_max_read() / frame_bits);
        }
        let (mut in_frames, mut out_frames) = frame_counts(rate, out_rate, feed.left, available);
        let pairs = pairs_only(d.word_size, d.channels);
        if pairs {
            in_frames &= !1;
        }
        if in_frames == 0 {
            log::warn!(
                "Sound {}: region ends with an incomplete frame, or the feed with less than one",
                track.sound
            );
            return Outcome::Clear;
        }
        let bytes = frame_bits * in_frames / 8;
        let mut src = match d.stream {
            Some(stream) => match ctx.streamer.get_buffer(stream, bytes) {
                Ok(src) => {
                    if let Some(&head) = d.zones.first() {
                        let zone = &mut ctx.zones[head];
                        zone.offset += bytes;
                        zone.size = zone.size.saturating_sub(bytes);
                    }
                    d.stream_err = false;
                    src
                }
                Err(RingError::TooLarge) => {
                    log::warn!(
                        "Sound {}: read of {bytes} bytes is too large for its stream",
                        track.sound
                    );
                    return Outcome::Clear;
                }
                Err(RingError::Underflow) => {
                    d.stream_err = true;
                    if d.fade.is_some() && d.fade_sync {
                        d.fade_sync_delta += feed.left;
                    }
                    if ctx.streamer.query(stream).paused {
                        log::warn!("Sound {}: stream ended before its audio", track.sound);
                        return Outcome::Clear;
                    }
                    log::debug!("Sound {}: stream underrun", track.sound);
                    return Outcome::Keep;
                }
            },
            None => {
                let Some(src) = ctx
                    .source
                    .sound_data(track.sound)
                    .and_then(|data| data.get(d.current_offset..d.current_offset + bytes))
                else {
                    log::warn!("Sound {}: audio data is truncated", track.sound);
                    return Outcome::Clear;
                };
                src
            }
        };
        if d.fade.is_some() && d.fade_sync && d.fade_sync_delta > 0 {
            let skip = out_frames.min(d.fade_sync_delta);
            d.fade_sync_delta -= skip;
            out_frames -= skip;
            in_frames = rate * out_frames / out_rate;
            if pairs {
                in_frames &= !1;
            }
            let keep = frame_bits * in_frames / 8;
            src = &src[bytes - keep..];
        }
        let vol = main_volume(d, track.eff_vol);
        let fmt = MixFormat {
            word_size: d.word_size,
            channels: d.channels,
        };
        ctx.mixer.set_radio_chatter(track.mailbox != 0);
        ctx.mixer
            .mix(src, fmt, in_frames, out_frames, feed.start, vol, track.pan);
        ctx.mixer.set_radio_chatter(false);
        feed.start += out_frames;
        feed.left -= out_frames;
        d.current_offset += bytes;
        d.audio_remaining -= bytes;
    }
    let d = &mut track.dispatch;
    if d.fade.is_some() && d.fade_sync {
        d.fade_sync_delta += feed.left;
    }
    feed.left = 0;
    Outcome::Keep
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_counts() {
        // Same rate: one to one
        assert_eq!(frame_counts(22_050, 22_050, 512, 10_000), (512, 512));
        // Half rate source: half the input covers the feed
        assert_eq!(frame_counts(11_025, 22_050, 512, 10_000), (256, 512));
        // Running out of input
        assert_eq!(frame_counts(11_025, 22_050, 512, 100), (100, 200));
        assert_eq!(frame_counts(22_050, 22_050, 512, 0), (0, 0));
    }
}
