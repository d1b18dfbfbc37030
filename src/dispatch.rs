//! Per-track playback state, and the stream bookkeeping behind jumps and switches
use {
    crate::{
        SoundId,
        config::{EngineConfig, Flavor},
        map::{Jump, SoundMap},
        mixer::Mixer,
        result::{DimuseError, DimuseResult, NavError},
        source::{BufferId, SoundSource},
        streamer::{StreamIdx, Streamer},
        track::Track,
        triggers::Marker,
        voc::{self, VocStep},
    },
    arrayvec::ArrayVec,
    bitflags::bitflags,
    navigate::Resume,
    pools::{FadeBufIdx, FadeBufPool, MAX_ZONES, Zone, ZoneIdx, ZonePool},
};

pub mod navigate;
pub mod pools;
pub mod process;

pub use navigate::{NavOutcome, navigate};

/// Crossfade volume at full scale, in 16.16 fixed point
pub const FADE_VOL_MAX: i32 = 127 << 16;
/// Longest crossfade of a stream switch
pub const MAX_SWITCH_FADE_MS: u32 = 2000;
const FADE_COPY_CHUNK: usize = 0x4000;
const VOC_FADE_COPY_CHUNK: usize = 0x800;

bitflags! {
    /// Options of [`switch_stream`]
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct SwitchFlags: u8 {
        /// Skip the new sound ahead by the time the stream spends starving during the fade
        const FADE_SYNC = 1;
        /// The new sound has the same layout: continue from the current offset
        const FROM_OFFSET = 2;
    }
}

/// Everything a dispatch borrows from the engine while it works
pub struct Ctx<'a, S: SoundSource + ?Sized> {
    /// Engine configuration
    pub cfg: &'a EngineConfig,
    /// Sound data
    pub source: &'a mut S,
    /// Stream pool
    pub streamer: &'a mut Streamer,
    /// Stream zone pool
    pub zones: &'a mut ZonePool,
    /// Crossfade buffer pool
    pub fade_bufs: &'a mut FadeBufPool,
    /// Output mixer
    pub mixer: &'a mut Mixer,
}

/// Playback state of a track
#[derive(Debug)]
pub struct Dispatch {
    /// 8, 12 or 16
    pub word_size: u32,
    /// Sample rate of the current region
    pub sample_rate: u32,
    /// Channel count of the current region
    pub channels: u32,
    /// Resource offset of the next audio byte
    pub current_offset: usize,
    /// Bytes left in the current region
    pub audio_remaining: usize,
    /// The sound's MAP, once read
    pub map: Option<SoundMap>,
    /// Stream the sound is read through, if it is streamed
    pub stream: Option<StreamIdx>,
    /// Buffer group of the stream
    pub stream_buf_id: BufferId,
    /// The last read from the stream underran
    pub stream_err: bool,
    /// Buffered spans of the stream, oldest first
    pub(crate) zones: ArrayVec<ZoneIdx, MAX_ZONES>,
    /// Audio being faded out
    pub fade: Option<FadeBufIdx>,
    /// Bytes of the fade already mixed
    pub fade_offset: usize,
    /// Bytes of the fade left to mix
    pub fade_remaining: usize,
    /// Word size of the faded audio
    pub fade_word_size: u32,
    /// Sample rate of the faded audio
    pub fade_rate: u32,
    /// Channel count of the faded audio
    pub fade_channels: u32,
    /// Keep the new material in sync with the faded one
    pub fade_sync: bool,
    /// Output frames (bytes for VOC) the new material has to catch up
    pub fade_sync_delta: usize,
    /// Fade out volume, 16.16
    pub fade_vol: i32,
    /// Per byte change of `fade_vol`
    pub fade_slope: i32,
    /// Offset of the VOC loop start block (0: none)
    pub voc_loop_start: usize,
    /// Navigation interrupted by a marker
    pub(crate) resume: Option<Resume>,
}

impl Default for Dispatch {
    fn default() -> Self {
        Self {
            word_size: 0,
            sample_rate: 0,
            channels: 0,
            current_offset: 0,
            audio_remaining: 0,
            map: None,
            stream: None,
            stream_buf_id: 0,
            stream_err: false,
            zones: ArrayVec::new(),
            fade: None,
            fade_offset: 0,
            fade_remaining: 0,
            fade_word_size: 0,
            fade_rate: 0,
            fade_channels: 0,
            fade_sync: false,
            fade_sync_delta: 0,
            fade_vol: FADE_VOL_MAX,
            fade_slope: 0,
            voc_loop_start: 0,
            resume: None,
        }
    }
}

impl Dispatch {
    /// Whether the sound is read through a stream
    #[must_use]
    pub const fn is_streamed(&self) -> bool {
        self.stream.is_some()
    }
    /// The stream zones, oldest first
    pub fn zones<'p>(&self, pool: &'p ZonePool) -> impl Iterator<Item = &'p Zone> {
        self.zones.iter().map(move |&z| &pool[z])
    }
    /// Total size of the first `count` zones
    fn zone_sizes(&self, pool: &ZonePool, count: usize) -> usize {
        self.zones[..count].iter().map(|&z| pool[z].size).sum()
    }
    /// Drop every zone from `len` on
    fn truncate_zones(&mut self, pool: &mut ZonePool, len: usize) {
        for z in self.zones.drain(len.min(self.zones.len())..) {
            pool.free(z);
        }
    }
    fn pop_head_zone(&mut self, pool: &mut ZonePool) {
        if !self.zones.is_empty() {
            pool.free(self.zones.remove(0));
        }
    }
    pub(crate) fn push_zone(&mut self, pool: &mut ZonePool, zone: Zone) -> bool {
        if self.zones.is_full() {
            return false;
        }
        let Some(z) = pool.alloc(zone) else {
            return false;
        };
        self.zones.push(z);
        true
    }
    pub(crate) fn release_fade(&mut self, bufs: &mut FadeBufPool) {
        if let Some(buf) = self.fade.take() {
            bufs.release(buf);
        }
        self.fade_remaining = 0;
    }
    /// Bytes of `ms` milliseconds of the current format, in whole frame pairs
    fn fade_size(&self, ms: u32) -> usize {
        let frames = (u64::from(self.sample_rate) * u64::from(ms) / 1000) & !1;
        let bytes = u64::from(self.word_size) * u64::from(self.channels) * frames / 8;
        usize::try_from(bytes).unwrap_or(usize::MAX)
    }
    /// Round a fade size down to whole samples of every channel
    fn align_fade_size(&self, size: usize, flavor: Flavor) -> usize {
        let per_channel = match (flavor, self.word_size) {
            (_, 8) => 1,
            (Flavor::Map | Flavor::MapPitched { demo: true }, _) | (_, 12) => 3,
            _ => 2,
        };
        let align = self.channels as usize * per_channel;
        if align == 0 {
            log::warn!("Can't align a fade of {size} bytes for a format without channels");
            return size;
        }
        size - size % align
    }
    /// Volume of the faded out audio for the next `bytes` bytes
    pub(crate) fn fade_out_volume(&mut self, eff_vol: i32, bytes: usize) -> i32 {
        let vol = ((self.fade_vol >> 16) + 1) * eff_vol / 128;
        let bytes = i64::try_from(bytes).unwrap_or(i64::MAX);
        let next = i64::from(self.fade_vol).saturating_add(bytes.saturating_mul(i64::from(self.fade_slope)));
        #[expect(clippy::cast_possible_truncation)]
        let next = next.clamp(0, i64::from(FADE_VOL_MAX)) as i32;
        self.fade_vol = next;
        vol
    }
    /// Volume of the material faded in, the complement of the fade out volume
    pub(crate) fn fade_in_volume(&mut self, eff_vol: i32) -> i32 {
        let vol = eff_vol * (128 - (self.fade_vol >> 16)) / 128;
        if self.fade_slope == 0 {
            let remaining = i32::try_from(self.fade_remaining.max(2)).unwrap_or(i32::MAX);
            self.fade_slope = -(FADE_VOL_MAX / remaining);
        }
        vol
    }
    /// Begin fading out the audio at the head of the stream, up to `size` bytes.
    ///
    /// Returns the amount of bytes moved to the fade buffer.
    fn start_fade<S: SoundSource + ?Sized>(
        &mut self,
        ctx: &mut Ctx<S>,
        size: usize,
        sync: bool,
    ) -> usize {
        self.release_fade(ctx.fade_bufs);
        let Some(stream) = self.stream else {
            return 0;
        };
        let Some((buf, granted)) = ctx.fade_bufs.alloc(size) else {
            log::warn!("No fade buffer for a crossfade of {size} bytes");
            return 0;
        };
        self.fade = Some(buf);
        self.fade_offset = 0;
        self.fade_remaining = 0;
        self.fade_word_size = self.word_size;
        self.fade_rate = self.sample_rate;
        self.fade_channels = self.channels;
        self.fade_sync = sync;
        self.fade_sync_delta = 0;
        self.fade_vol = FADE_VOL_MAX;
        self.fade_slope = 0;
        while self.fade_remaining < granted {
            let chunk = (granted - self.fade_remaining).min(FADE_COPY_CHUNK);
            let Ok(src) = ctx.streamer.get_buffer(stream, chunk) else {
                log::warn!("Stream ran dry while copying a crossfade");
                break;
            };
            ctx.fade_bufs.data_mut(buf)[self.fade_remaining..self.fade_remaining + chunk]
                .copy_from_slice(src);
            self.fade_remaining += chunk;
        }
        if self.fade_remaining == 0 {
            self.release_fade(ctx.fade_bufs);
            return 0;
        }
        self.fade_remaining
    }
}

/// Effective playback rate of audio recorded at `rate`
pub(crate) fn eff_rate(flavor: Flavor, pitch_shift: i32, rate: u32) -> usize {
    if !flavor.pitched() {
        return rate as usize;
    }
    let shifted = (i64::from(pitch_shift.max(0)) * i64::from(rate)) >> 8;
    usize::try_from(shifted).unwrap_or(0)
}

/// Set up the dispatch of a freshly reserved track and start navigating.
///
/// With a `buf_id`, the sound is streamed through that buffer group.
/// Returns the marker navigation stopped at, if any.
pub fn allocate<S: SoundSource + ?Sized>(
    ctx: &mut Ctx<S>,
    track: &mut Track,
    buf_id: Option<BufferId>,
) -> DimuseResult<Option<Marker>> {
    let flavor = ctx.cfg.flavor;
    let d = &mut track.dispatch;
    *d = Dispatch::default();
    if flavor == Flavor::Voc {
        d.word_size = 8;
        d.channels = 1;
        d.sample_rate = 22_050;
    }
    if let Some(buf_id) = buf_id {
        let stream = ctx.streamer.allocate(
            &mut *ctx.source,
            track.sound,
            buf_id,
            flavor.stream_max_read(),
            flavor,
        )?;
        d.stream = Some(stream);
        d.stream_buf_id = buf_id;
        if flavor == Flavor::Voc {
            return Ok(None);
        }
    } else if flavor == Flavor::Voc {
        return match voc::seek_next_chunk(ctx, track)? {
            VocStep::Audio | VocStep::Pending => Ok(None),
            VocStep::End => Err(NavError::EndOfSound.into()),
        };
    }
    navigate(ctx, track)?.marker()
}

/// Give back the stream, zones and fade buffer of a dispatch
pub fn release<S: SoundSource + ?Sized>(ctx: &mut Ctx<S>, d: &mut Dispatch) {
    if let Some(stream) = d.stream.take() {
        ctx.streamer.release(stream);
    }
    d.truncate_zones(ctx.zones, 0);
    d.release_fade(ctx.fade_bufs);
}

/// Attribute newly loaded bytes to the last zone, then look for upcoming jumps
/// in every buffered span, redirecting the stream as needed.
pub fn predict_stream<S: SoundSource + ?Sized>(ctx: &mut Ctx<S>, track: &mut Track) {
    let d = &mut track.dispatch;
    let (Some(stream), Some(&last)) = (d.stream, d.zones.last()) else {
        return;
    };
    let total = d.zone_sizes(ctx.zones, d.zones.len());
    let buffered = ctx.streamer.buffered(stream);
    let last = &mut ctx.zones[last];
    last.size = (last.size + buffered).saturating_sub(total);
    let mut hook = track.jump_hook;
    let mut pos = 0;
    while pos < d.zones.len() {
        let zone = ctx.zones[d.zones[pos]];
        if !zone.fade {
            let jump = d
                .map
                .as_ref()
                .and_then(|map| map.find_jump(zone.offset, zone.offset + zone.size, &mut hook));
            match jump {
                Some(jump) => prepare_to_jump(ctx, d, track.sound, pos, &jump, false),
                None => stream_next_zone(ctx, d, track.sound, pos),
            }
        }
        pos += 1;
    }
}

/// Cut the stream after the hook of `jump` found in zone `pos`, keeping the
/// crossfade material, and continue streaming from the jump destination.
fn prepare_to_jump<S: SoundSource + ?Sized>(
    ctx: &mut Ctx<S>,
    d: &mut Dispatch,
    sound: SoundId,
    pos: usize,
    jump: &Jump,
    from_navigate: bool,
) {
    let Some(stream) = d.stream else {
        return;
    };
    let hook = jump.hook_pos as usize;
    let dest = jump.dest as usize;
    let zone = ctx.zones[d.zones[pos]];
    let end = zone.offset + zone.size;
    if end == hook
        && let Some(&next) = d.zones.get(pos + 1)
    {
        let next = ctx.zones[next];
        let already = if next.fade {
            next.offset == hook
                && d
                    .zones
                    .get(pos + 2)
                    .is_some_and(|&after| ctx.zones[after].offset == dest)
        } else {
            next.offset == dest
        };
        if already {
            return;
        }
    }
    let room = end.saturating_sub(hook);
    let mut size = d.fade_size(jump.fade_ms);
    if !from_navigate && size > room {
        return;
    }
    size = d.align_fade_size(size.min(room), ctx.cfg.flavor);
    match ctx.cfg.flavor {
        Flavor::Map if hook < dest => size = 0,
        Flavor::MapPitched { .. } if d.fade_remaining != 0 => size = 0,
        _ => {}
    }
    let needed = if size > 0 { 2 } else { 1 };
    if ctx.zones.available() < needed {
        log::warn!("No stream zones left to prepare the jump of sound {sound}");
        return;
    }
    ctx.zones[d.zones[pos]].size = hook.saturating_sub(zone.offset);
    let keep = hook.saturating_sub(zone.offset) + size + d.zone_sizes(ctx.zones, pos);
    ctx.streamer.set_load_index(stream, keep);
    d.truncate_zones(ctx.zones, pos + 1);
    ctx.streamer
        .set_sound_from_offset(&mut *ctx.source, stream, sound, dest);
    if size > 0 {
        d.push_zone(
            ctx.zones,
            Zone {
                offset: hook,
                size,
                fade: true,
            },
        );
    }
    d.push_zone(
        ctx.zones,
        Zone {
            offset: dest,
            size: 0,
            fade: false,
        },
    );
    log::debug!("Sound {sound}: jump {hook} -> {dest} prepared with a {size} byte crossfade");
}

/// Zone `pos` plays on linearly: forget any zones predicted after it
fn stream_next_zone<S: SoundSource + ?Sized>(
    ctx: &mut Ctx<S>,
    d: &mut Dispatch,
    sound: SoundId,
    pos: usize,
) {
    let Some(stream) = d.stream else {
        return;
    };
    if pos + 1 >= d.zones.len() {
        return;
    }
    let zone = ctx.zones[d.zones[pos]];
    let keep = d.zone_sizes(ctx.zones, pos + 1);
    ctx.streamer.set_load_index(stream, keep);
    d.truncate_zones(ctx.zones, pos + 1);
    ctx.streamer
        .set_sound_from_offset(&mut *ctx.source, stream, sound, zone.offset + zone.size);
    log::debug!("Sound {sound}: predicted jump cancelled at {}", zone.offset + zone.size);
}

/// Take a jump found during navigation: drop the zone that led to it and
/// start the crossfade, if one was prepared.
///
/// Returns whether a crossfade started.
fn take_jump<S: SoundSource + ?Sized>(
    ctx: &mut Ctx<S>,
    track: &mut Track,
    jump: &Jump,
) -> DimuseResult<bool> {
    let d = &mut track.dispatch;
    let Some(stream) = d.stream else {
        return Ok(false);
    };
    let head = *d.zones.first().ok_or(NavError::ZoneMismatch)?;
    if ctx.zones[head].size > 0 || d.zones.len() == 1 {
        prepare_to_jump(ctx, d, track.sound, 0, jump, true);
        if d.zones.len() < 2 {
            return Err(DimuseError::PoolExhausted(crate::result::Pool::Zone));
        }
    }
    d.pop_head_zone(ctx.zones);
    let Some(&next) = d.zones.first() else {
        return Err(NavError::ZoneMismatch.into());
    };
    let next = ctx.zones[next];
    if !next.fade {
        return Ok(false);
    }
    let copied = d.start_fade(ctx, next.size, false);
    if copied < next.size {
        ctx.streamer.set_read_index(stream, next.size - copied);
    }
    d.pop_head_zone(ctx.zones);
    Ok(copied > 0)
}

/// Crossfade the streamed sound of `track` into `new`, a sound of the same family.
///
/// The caller rebinds fades and triggers, and handles the returned marker.
pub fn switch_stream<S: SoundSource + ?Sized>(
    ctx: &mut Ctx<S>,
    track: &mut Track,
    new: SoundId,
    fade_ms: u32,
    flags: SwitchFlags,
) -> DimuseResult<Option<Marker>> {
    let d = &mut track.dispatch;
    let stream = d.stream.ok_or(DimuseError::SoundNotFound)?;
    let fade_ms = fade_ms.min(MAX_SWITCH_FADE_MS);
    if let Some(&head) = d.zones.first() {
        if d.word_size == 0 {
            return Err(NavError::MissingFormat.into());
        }
        let size = d.fade_size(fade_ms).min(ctx.zones[head].size);
        let size = d.align_fade_size(size, ctx.cfg.flavor);
        let sync = flags.intersects(SwitchFlags::FADE_SYNC | SwitchFlags::FROM_OFFSET);
        if size > 0 && d.start_fade(ctx, size, sync) == 0 {
            log::warn!("Switching sound {} to {new} without a crossfade", track.sound);
        }
    }
    let old = track.sound;
    track.sound = new;
    let buffered = ctx.streamer.buffered(stream);
    ctx.streamer.set_read_index(stream, buffered);
    if flags.contains(SwitchFlags::FROM_OFFSET)
        && let Some(&head) = d.zones.first()
    {
        ctx.streamer
            .set_sound_from_offset(&mut *ctx.source, stream, new, d.current_offset);
        d.truncate_zones(ctx.zones, 1);
        ctx.zones[head].size = 0;
        log::debug!("Switched sound {old} to {new} at offset {}", d.current_offset);
        return Ok(None);
    }
    ctx.streamer
        .set_sound_from_offset(&mut *ctx.source, stream, new, 0);
    d.truncate_zones(ctx.zones, 0);
    d.current_offset = 0;
    d.audio_remaining = 0;
    d.map = None;
    d.resume = None;
    log::debug!("Switched sound {old} to {new} from the start");
    navigate(ctx, track)?.marker()
}

/// Switch the streamed VOC sound of `track` to `new`, fading out up to
/// `crossfade_size` bytes of the old one.
///
/// With `voc_loop`, the new sound continues at the current position.
pub fn switch_stream_with_buffer<S: SoundSource + ?Sized>(
    ctx: &mut Ctx<S>,
    track: &mut Track,
    new: SoundId,
    crossfade_size: usize,
    voc_loop: bool,
) -> DimuseResult {
    let stream = track.dispatch.stream.ok_or(DimuseError::SoundNotFound)?;
    let (offset, remaining) = (track.dispatch.current_offset, track.dispatch.audio_remaining);
    track.dispatch.release_fade(ctx.fade_bufs);
    if crossfade_size > 0
        && let Some((buf, granted)) = ctx.fade_bufs.alloc(crossfade_size)
    {
        let d = &mut track.dispatch;
        d.fade = Some(buf);
        d.fade_offset = 0;
        d.fade_remaining = 0;
        d.fade_word_size = 8;
        d.fade_channels = 1;
        d.fade_rate = d.sample_rate;
        d.fade_sync = true;
        d.fade_sync_delta = 0;
        d.fade_vol = FADE_VOL_MAX;
        d.fade_slope = 0;
        while track.dispatch.fade_remaining < granted {
            if ctx.streamer.buffered(stream) == 0 {
                break;
            }
            if track.dispatch.audio_remaining == 0
                && !matches!(voc::seek_next_chunk(ctx, track), Ok(VocStep::Audio))
            {
                break;
            }
            let d = &mut track.dispatch;
            let chunk = d
                .audio_remaining
                .min(granted - d.fade_remaining)
                .min(ctx.streamer.buffered(stream))
                .min(VOC_FADE_COPY_CHUNK);
            let Ok(src) = ctx.streamer.get_buffer(stream, chunk) else {
                break;
            };
            ctx.fade_bufs.data_mut(buf)[d.fade_remaining..d.fade_remaining + chunk]
                .copy_from_slice(src);
            d.fade_remaining += chunk;
            d.current_offset += chunk;
            d.audio_remaining -= chunk;
        }
        if track.dispatch.fade_remaining == 0 {
            track.dispatch.release_fade(ctx.fade_bufs);
        }
    }
    let d = &mut track.dispatch;
    let buffered = ctx.streamer.buffered(stream);
    ctx.streamer.set_read_index(stream, buffered);
    let from = if voc_loop { offset } else { 0 };
    ctx.streamer
        .set_sound_from_offset(&mut *ctx.source, stream, new, from);
    if voc_loop {
        if d.voc_loop_start != 0 {
            ctx.streamer.set_loop_flag(stream, offset + remaining);
        }
        d.current_offset = offset;
        d.audio_remaining = remaining;
    } else {
        ctx.streamer.remove_loop_flag(stream);
        d.current_offset = 0;
        d.audio_remaining = 0;
        d.voc_loop_start = 0;
    }
    log::debug!("Switched VOC sound {} to {new}", track.sound);
    track.sound = new;
    Ok(())
}
