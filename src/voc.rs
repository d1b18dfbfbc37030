//! Creative Voice (VOC) playback, for the engine flavor that predates MAPs
use crate::{
    SoundId,
    dispatch::{Ctx, Dispatch, process::Outcome},
    mixer::MixFormat,
    result::{DimuseError, DimuseResult},
    source::SoundSource,
    track::Track,
};

const FILE_MAGIC: &[u8; 4] = b"Crea";
/// Header size and version fields of a VOC file
const FILE_VERSION: [u8; 4] = [0x1A, 0x00, 0x0A, 0x01];
const FILE_HEADER_LEN: usize = 26;
const BLOCK_HEADER_LEN: usize = 6;
/// Blocks walked in one seek before giving up on the file
const MAX_BLOCKS: usize = 64;
/// Rate bytes above this one are played at 22050 Hz, the rest at 11025 Hz
const FAST_RATE_BYTE: u8 = 196;

const BLOCK_SOUND: u8 = 1;
const BLOCK_MARKER: u8 = 4;
const BLOCK_REPEAT: u8 = 6;
const BLOCK_REPEAT_END: u8 = 7;

/// 8 bit unsigned mono
const VOC_FORMAT: MixFormat = MixFormat {
    word_size: 8,
    channels: 1,
};

/// Where a seek for the next chunk of audio ended
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum VocStep {
    /// A sound block was entered
    Audio,
    /// Waiting for the stream
    Pending,
    /// The file ended
    End,
}

/// Copy up to `FILE_HEADER_LEN` bytes at the read position of the track's sound.
///
/// Returns the amount of bytes available.
fn peek_head<S: SoundSource + ?Sized>(
    ctx: &mut Ctx<S>,
    track: &Track,
    head: &mut [u8; FILE_HEADER_LEN],
) -> DimuseResult<usize> {
    let d = &track.dispatch;
    let avail = match d.stream {
        Some(stream) => {
            let len = ctx.streamer.buffered(stream).min(FILE_HEADER_LEN);
            let bytes = ctx
                .streamer
                .peek(stream, 0, len)
                .map_err(|_| DimuseError::InvalidVoc)?;
            head[..len].copy_from_slice(bytes);
            len
        }
        None => {
            let data = ctx
                .source
                .sound_data(track.sound)
                .ok_or(DimuseError::SoundNotFound)?;
            let rest = data.get(d.current_offset..).unwrap_or_default();
            let len = rest.len().min(FILE_HEADER_LEN);
            head[..len].copy_from_slice(&rest[..len]);
            len
        }
    };
    Ok(avail)
}

/// Advance the read position by `len` bytes
fn consume<S: SoundSource + ?Sized>(ctx: &mut Ctx<S>, d: &Dispatch, len: usize) {
    if let Some(stream) = d.stream {
        ctx.streamer.set_read_index(stream, len);
    }
}

/// Walk VOC blocks until one carrying sound data is entered
pub fn seek_next_chunk<S: SoundSource + ?Sized>(
    ctx: &mut Ctx<S>,
    track: &mut Track,
) -> DimuseResult<VocStep> {
    for _ in 0..MAX_BLOCKS {
        let mut head = [0; FILE_HEADER_LEN];
        let avail = peek_head(ctx, track, &mut head)?;
        let d = &mut track.dispatch;
        let paused = d.stream.is_none_or(|s| ctx.streamer.query(s).paused);
        let is_file_header = avail >= FILE_MAGIC.len() && head.starts_with(FILE_MAGIC);
        let needed = if is_file_header {
            FILE_HEADER_LEN
        } else {
            match head[0] {
                BLOCK_SOUND | BLOCK_MARKER | BLOCK_REPEAT => BLOCK_HEADER_LEN,
                _ => 1,
            }
        };
        if avail < needed {
            return match (avail, paused) {
                (_, false) => Ok(VocStep::Pending),
                (0, true) => Ok(VocStep::End),
                _ => Err(DimuseError::InvalidVoc),
            };
        }
        if is_file_header {
            if head[20..24] != FILE_VERSION {
                return Err(DimuseError::InvalidVoc);
            }
            consume(ctx, d, FILE_HEADER_LEN);
            d.current_offset += FILE_HEADER_LEN;
            continue;
        }
        match head[0] {
            BLOCK_SOUND => {
                d.sample_rate = if head[4] > FAST_RATE_BYTE {
                    22_050
                } else {
                    11_025
                };
                let len = u32::from_le_bytes([head[1], head[2], head[3], 0]) as usize;
                d.audio_remaining = len.checked_sub(2).ok_or(DimuseError::InvalidVoc)?;
                d.current_offset += BLOCK_HEADER_LEN;
                consume(ctx, d, BLOCK_HEADER_LEN);
                if d.voc_loop_start != 0
                    && let Some(stream) = d.stream
                {
                    let end = d.current_offset + d.audio_remaining;
                    ctx.streamer.set_loop_flag(stream, end);
                    if ctx.streamer.stream(stream).cur_offset > end {
                        voc_loop_callback(ctx, d, track.sound);
                    }
                }
                return Ok(VocStep::Audio);
            }
            BLOCK_MARKER => {
                d.current_offset += BLOCK_HEADER_LEN;
                consume(ctx, d, BLOCK_HEADER_LEN);
            }
            BLOCK_REPEAT => {
                d.voc_loop_start = d.current_offset;
                d.current_offset += BLOCK_HEADER_LEN;
                consume(ctx, d, BLOCK_HEADER_LEN);
            }
            BLOCK_REPEAT_END if d.voc_loop_start != 0 => {
                log::debug!("Sound {}: VOC loop back to {}", track.sound, d.voc_loop_start);
                d.current_offset = d.voc_loop_start;
                consume(ctx, d, 1);
            }
            _ => return Ok(VocStep::End),
        }
    }
    Err(DimuseError::InvalidVoc)
}

/// The stream loaded the end of a VOC loop.
///
/// If the loop end follows the current chunk, drop what was loaded past it
/// and stream the loop body again.
pub fn voc_loop_callback<S: SoundSource + ?Sized>(ctx: &mut Ctx<S>, d: &Dispatch, sound: SoundId) {
    let Some(stream) = d.stream else {
        return;
    };
    if ctx
        .streamer
        .peek(stream, d.audio_remaining, 1)
        .is_ok_and(|b| b[0] == BLOCK_REPEAT_END)
    {
        ctx.streamer.set_load_index(stream, d.audio_remaining + 1);
        ctx.streamer
            .set_sound_from_offset(&mut *ctx.source, stream, sound, d.voc_loop_start);
    }
}

/// Mix one feed of a VOC sound
pub fn process_voc<S: SoundSource + ?Sized>(ctx: &mut Ctx<S>, track: &mut Track) -> Outcome {
    let out_rate = ctx.cfg.out_rate as usize;
    let feed = ctx.cfg.feed_size;
    let mut fade_chunk = 0;
    let d = &mut track.dispatch;
    if let Some(buf) = d.fade {
        let rate = (d.fade_rate as usize).max(1);
        let chunk = (feed * rate / out_rate).min(d.fade_remaining);
        let vol = d.fade_out_volume(track.eff_vol, chunk);
        let src = &ctx.fade_bufs.data(buf)[d.fade_offset..d.fade_offset + chunk];
        ctx.mixer
            .mix(src, VOC_FORMAT, chunk, chunk * out_rate / rate, 0, vol, track.pan);
        d.fade_offset += chunk;
        d.fade_remaining -= chunk;
        if d.fade_remaining == 0 {
            d.release_fade(ctx.fade_bufs);
        }
        fade_chunk = chunk;
    }
    let mut feed_left = feed;
    let mut start = 0;
    loop {
        if track.dispatch.audio_remaining == 0 {
            match seek_next_chunk(ctx, track) {
                Ok(VocStep::Audio) => {}
                Ok(VocStep::Pending) => break,
                Ok(VocStep::End) => return Outcome::Clear,
                Err(e) => {
                    log::warn!("Sound {}: {e}", track.sound);
                    return Outcome::Clear;
                }
            }
        }
        if feed_left == 0 {
            return Outcome::Keep;
        }
        let d = &mut track.dispatch;
        let rate = (d.sample_rate as usize).max(1);
        let mut in_frames = d.audio_remaining.min(feed_left * rate / out_rate);
        if in_frames == 0 {
            return Outcome::Keep;
        }
        let mut src = match d.stream {
            Some(stream) => {
                let Ok(src) = ctx.streamer.get_buffer(stream, in_frames) else {
                    d.stream_err = true;
                    if d.fade.is_some() {
                        d.fade_sync_delta += fade_chunk;
                    }
                    return Outcome::Keep;
                };
                d.stream_err = false;
                src
            }
            None => {
                let Some(src) = ctx
                    .source
                    .sound_data(track.sound)
                    .and_then(|data| data.get(d.current_offset..d.current_offset + in_frames))
                else {
                    log::warn!("Sound {}: VOC data is truncated", track.sound);
                    return Outcome::Clear;
                };
                src
            }
        };
        if d.fade.is_some() && d.fade_sync_delta > 0 {
            let skip = d.fade_sync_delta.min(in_frames);
            d.fade_sync_delta -= skip;
            in_frames -= skip;
            src = &src[skip..];
            d.current_offset += skip;
            d.audio_remaining -= skip;
        }
        if in_frames > 0 {
            let vol = if d.fade.is_some() {
                d.fade_in_volume(track.eff_vol)
            } else {
                track.eff_vol
            };
            let out_frames = in_frames * out_rate / rate;
            ctx.mixer
                .mix(src, VOC_FORMAT, in_frames, out_frames, start, vol, track.pan);
            start += out_frames;
            feed_left = feed_left.saturating_sub(out_frames.max(1));
            d.current_offset += in_frames;
            d.audio_remaining -= in_frames;
        }
    }
    if track.dispatch.fade.is_some() {
        track.dispatch.fade_sync_delta += fade_chunk;
    }
    Outcome::Keep
}
