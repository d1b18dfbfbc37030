//! Walking the MAP of a sound
use {
    super::{Ctx, pools::Zone, take_jump},
    crate::{
        map::{Block, SoundMap, check_hook, resource_header_size},
        result::{DimuseError, DimuseResult, NavError, Pool},
        source::SoundSource,
        streamer::ring::RingError,
        track::Track,
        triggers::{Marker, marker},
    },
};

/// Events processed in one navigation before the MAP is deemed to loop on itself
const MAX_EVENTS: usize = 1024;
/// Bytes needed to learn the size of a resource header
const HEADER_PEEK: usize = 16;

/// Where navigation stopped
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NavOutcome {
    /// A region of audio is ready to play
    Region {
        /// A jump crossfade started on the way
        fade_started: bool,
    },
    /// The stream hasn't buffered enough to go on yet
    Pending,
    /// The sound reached its end
    Stop,
    /// A marker was passed. Its triggers run before navigation resumes.
    Marker(Marker),
}

impl NavOutcome {
    /// The marker to handle when navigating outside of mixing.
    ///
    /// Reaching the end there is an error.
    pub fn marker(self) -> DimuseResult<Option<Marker>> {
        match self {
            Self::Region { .. } | Self::Pending => Ok(None),
            Self::Marker(marker) => Ok(Some(marker)),
            Self::Stop => Err(NavError::EndOfSound.into()),
        }
    }
}

/// Where an interrupted walk picks up
#[derive(Clone, Copy, Debug)]
pub(crate) struct Resume {
    /// The `TEXT` event that interrupted it
    event: usize,
    /// Events processed so far
    steps: usize,
    fade_started: bool,
}

/// Make sure the MAP of the track's sound is loaded.
///
/// Returns `false` if the stream hasn't buffered the header yet.
fn get_map<S: SoundSource + ?Sized>(ctx: &mut Ctx<S>, track: &mut Track) -> DimuseResult<bool> {
    let d = &mut track.dispatch;
    if d.map.is_some() {
        return Ok(true);
    }
    if d.current_offset != 0 {
        return Err(NavError::NoMap.into());
    }
    let max_size = ctx.cfg.flavor.max_map_size();
    let Some(stream) = d.stream else {
        let res = ctx
            .source
            .sound_data(track.sound)
            .ok_or(DimuseError::SoundNotFound)?;
        let (map, data_offset) = SoundMap::parse_resource(res, max_size)?;
        d.map = Some(map);
        d.current_offset = data_offset;
        return Ok(true);
    };
    let paused = ctx.streamer.query(stream).paused;
    let size = match ctx.streamer.peek(stream, 0, HEADER_PEEK) {
        Ok(head) => resource_header_size(head).ok_or(NavError::BadHeader)?,
        Err(RingError::Underflow) if !paused => return Ok(false),
        Err(_) => return Err(NavError::BadHeader.into()),
    };
    let map = match ctx.streamer.peek(stream, 0, size) {
        Ok(res) => SoundMap::parse_resource(res, max_size)?.0,
        Err(RingError::Underflow) if !paused => return Ok(false),
        Err(RingError::Underflow) => return Err(DimuseError::Data),
        Err(RingError::TooLarge) => return Err(NavError::Oversized.into()),
    };
    ctx.streamer.set_read_index(stream, size);
    d.map = Some(map);
    d.current_offset = size;
    if !d.zones.is_empty() {
        return Err(NavError::ZoneMismatch.into());
    }
    let buffered = ctx.streamer.buffered(stream);
    if !d.push_zone(
        ctx.zones,
        Zone {
            offset: size,
            size: buffered,
            fade: false,
        },
    ) {
        return Err(DimuseError::PoolExhausted(Pool::Zone));
    }
    log::debug!("Sound {}: read a {size} byte header from the stream", track.sound);
    Ok(true)
}

/// Process the MAP events at the current offset until a region of audio is reached.
///
/// Jumps are taken when the track's hook allows and `SYNC` data is stored in
/// the track. A `TEXT` event interrupts the walk with [`NavOutcome::Marker`]:
/// the next call picks up after it, unless the marker's triggers started the
/// audio in the meantime.
pub fn navigate<S: SoundSource + ?Sized>(
    ctx: &mut Ctx<S>,
    track: &mut Track,
) -> DimuseResult<NavOutcome> {
    let (mut event, mut steps, mut fade_started) = match track.dispatch.resume.take() {
        Some(resume) => {
            if track.dispatch.audio_remaining != 0 {
                return Ok(NavOutcome::Region {
                    fade_started: resume.fade_started,
                });
            }
            (Some(resume.event), resume.steps, resume.fade_started)
        }
        None => {
            if !get_map(ctx, track)? {
                return Ok(NavOutcome::Pending);
            }
            let d = &track.dispatch;
            if d.audio_remaining != 0 {
                return Err(NavError::AudioPending.into());
            }
            if d.stream.is_some()
                && d
                    .zones
                    .first()
                    .is_none_or(|&z| ctx.zones[z].offset != d.current_offset)
            {
                return Err(NavError::ZoneMismatch.into());
            }
            (None, 0, false)
        }
    };
    while steps < MAX_EVENTS {
        steps += 1;
        let d = &mut track.dispatch;
        let Some(map) = d.map.as_ref() else {
            return Err(NavError::NoMap.into());
        };
        let next = match event {
            None => map.first_event_at(d.current_offset),
            Some(idx) => map.next_event_at(idx, d.current_offset),
        };
        let Some(idx) = next else {
            log::warn!(
                "Sound {}: no MAP event at offset {}",
                track.sound,
                d.current_offset
            );
            return Err(NavError::NoEvent.into());
        };
        event = Some(idx);
        let block = &map.blocks[idx];
        match block {
            Block::Jump(jump) => {
                let jump = *jump;
                if !check_hook(&mut track.jump_hook, jump.hook_id) {
                    continue;
                }
                log::debug!(
                    "Sound {}: jump {} -> {} (hook {})",
                    track.sound,
                    jump.hook_pos,
                    jump.dest,
                    jump.hook_id
                );
                d.current_offset = jump.dest as usize;
                if d.stream.is_some() {
                    fade_started |= take_jump(ctx, track, &jump)?;
                }
                event = None;
            }
            Block::Sync { data, .. } => {
                match track.syncs.iter_mut().find(|slot| slot.is_none()) {
                    Some(slot) => *slot = Some(data.clone()),
                    None => log::debug!("Sound {}: no room for more sync data", track.sound),
                }
            }
            Block::Format {
                word_size,
                rate,
                channels,
                ..
            } => {
                let (word_size, rate, channels) = (*word_size, *rate, *channels);
                d.word_size = word_size;
                d.sample_rate = rate;
                d.channels = channels;
            }
            Block::Region { offset, length } => {
                if *offset as usize != d.current_offset {
                    return Err(NavError::RegionMismatch.into());
                }
                d.audio_remaining = *length as usize;
                return Ok(NavOutcome::Region { fade_started });
            }
            Block::Stop { .. } => return Ok(NavOutcome::Stop),
            Block::Text { .. } => {
                let text = marker(block.marker().unwrap_or_default());
                d.resume = Some(Resume {
                    event: idx,
                    steps,
                    fade_started,
                });
                return Ok(NavOutcome::Marker(text));
            }
            Block::Unknown { tag, .. } => {
                log::warn!("Sound {}: unknown MAP block {tag:#010x}", track.sound);
                return Err(NavError::UnknownBlock.into());
            }
        }
    }
    Err(NavError::Inconsistent.into())
}
