//! Saving and restoring the engine state.
//!
//! Little endian, in this order:
//!
//! ```text
//! "DIMU" | version | group volumes | tracks, most recent first | fades | triggers | defers
//! ```
//!
//! Stream buffers aren't saved: streams are reloaded from the saved offset.
use {
    super::Engine,
    crate::{
        SoundId,
        dispatch::{self, pools::Zone},
        fades::{Fade, MAX_FADES},
        groups::{Groups, MAX_GROUPS},
        io::{Reader, write_be_u32, write_blob, write_bool, write_i32, write_u32, write_usize},
        map::SoundMap,
        result::{DimuseError, DimuseResult, Pool},
        source::SoundSource,
        track::{Param, Track, TrackIdx},
        triggers::{Args, Defer, MAX_DEFERS, MAX_TRIGGERS, Marker, TRIGGER_ARGS, Trigger},
    },
    arrayvec::ArrayVec,
};

const MAGIC: u32 = u32::from_be_bytes(*b"DIMU");
const VERSION: u32 = 1;

fn write_args(out: &mut Vec<u8>, args: &Args) {
    for &arg in args {
        write_i32(out, arg);
    }
}

fn read_args(rd: &mut Reader) -> DimuseResult<Args> {
    let mut args = [0; TRIGGER_ARGS];
    for arg in &mut args {
        *arg = rd.next()?;
    }
    Ok(args)
}

fn read_param(rd: &mut Reader) -> DimuseResult<Param> {
    Param::from_code(rd.next()?).ok_or(DimuseError::BadSaveData)
}

fn write_track(out: &mut Vec<u8>, idx: TrackIdx, t: &Track) {
    out.push(idx.0);
    for val in [
        t.sound,
        t.priority,
        t.vol,
        t.eff_vol,
        t.pan,
        t.detune,
        t.transpose,
        t.pitch_shift,
        t.group,
        t.mailbox,
        t.jump_hook,
    ] {
        write_i32(out, val);
    }
    for sync in &t.syncs {
        write_bool(out, sync.is_some());
        if let Some(sync) = sync {
            write_blob(out, sync);
        }
    }
    let d = &t.dispatch;
    write_u32(out, d.word_size);
    write_u32(out, d.sample_rate);
    write_u32(out, d.channels);
    write_usize(out, d.current_offset);
    write_usize(out, d.audio_remaining);
    write_usize(out, d.voc_loop_start);
    write_bool(out, d.stream.is_some());
    out.push(d.stream_buf_id);
    write_blob(out, &d.map.as_ref().map(SoundMap::to_bytes).unwrap_or_default());
}

/// A track as saved, with what its dispatch needs to pick up again
struct SavedTrack {
    idx: TrackIdx,
    track: Track,
    streamed: bool,
}

fn read_track(rd: &mut Reader, track_count: usize, max_map: usize) -> DimuseResult<SavedTrack> {
    let idx = TrackIdx(rd.next()?);
    if idx.usize() >= track_count {
        return Err(DimuseError::BadSaveData);
    }
    let mut t = Track::default();
    for val in [
        &mut t.sound,
        &mut t.priority,
        &mut t.vol,
        &mut t.eff_vol,
        &mut t.pan,
        &mut t.detune,
        &mut t.transpose,
        &mut t.pitch_shift,
        &mut t.group,
        &mut t.mailbox,
        &mut t.jump_hook,
    ] {
        *val = rd.next()?;
    }
    if t.sound == 0 {
        return Err(DimuseError::BadSaveData);
    }
    for sync in &mut t.syncs {
        if rd.next_bool()? {
            *sync = Some(rd.next_blob()?.to_vec());
        }
    }
    let d = &mut t.dispatch;
    d.word_size = rd.next()?;
    d.sample_rate = rd.next()?;
    d.channels = rd.next()?;
    d.current_offset = rd.next_usize()?;
    d.audio_remaining = rd.next_usize()?;
    d.voc_loop_start = rd.next_usize()?;
    let streamed = rd.next_bool()?;
    d.stream_buf_id = rd.next()?;
    let map = rd.next_blob()?;
    if !map.is_empty() {
        d.map = Some(SoundMap::parse(map, max_map).map_err(|_| DimuseError::BadSaveData)?);
    }
    Ok(SavedTrack {
        idx,
        track: t,
        streamed,
    })
}

/// Everything read back from a save, checked before any of it is applied
struct Saved {
    groups: Groups,
    tracks: ArrayVec<SavedTrack, { crate::MAX_TRACKS }>,
    fades: [Fade; MAX_FADES],
    triggers: [Trigger; MAX_TRIGGERS],
    defers: [Defer; MAX_DEFERS],
}

impl Saved {
    fn read(data: &[u8], track_count: usize, max_map: usize) -> DimuseResult<Self> {
        let mut rd = Reader::new(data);
        if rd.next_be_u32()? != MAGIC || rd.next::<u32>()? != VERSION {
            return Err(DimuseError::BadSaveData);
        }
        let mut groups = Groups::default();
        for group in 0..MAX_GROUPS {
            #[expect(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
            let id = group as i32;
            groups.set_group_vol(id, rd.next()?)?;
        }
        let count = rd.next_usize()?;
        let mut tracks = ArrayVec::new();
        for _ in 0..count {
            let saved = read_track(&mut rd, track_count, max_map)?;
            if tracks.iter().any(|t: &SavedTrack| t.idx == saved.idx) {
                return Err(DimuseError::BadSaveData);
            }
            tracks
                .try_push(saved)
                .map_err(|_| DimuseError::BadSaveData)?;
        }
        let mut fades = [Fade::default(); MAX_FADES];
        for fade in &mut fades {
            fade.sound = rd.next()?;
            fade.param = read_param(&mut rd)?;
            fade.val = rd.next()?;
            fade.counter = rd.next()?;
            fade.length = rd.next()?;
            fade.slope = rd.next()?;
            fade.slope_mod = rd.next()?;
            fade.mod_counter = rd.next()?;
            fade.nudge = rd.next()?;
        }
        let mut triggers = [Trigger::default(); MAX_TRIGGERS];
        for t in &mut triggers {
            t.sound = rd.next()?;
            let marker = std::str::from_utf8(rd.next_blob()?).map_err(|_| DimuseError::BadSaveData)?;
            t.marker = Marker::from(marker).map_err(|_| DimuseError::BadSaveData)?;
            t.opcode = rd.next()?;
            t.args = read_args(&mut rd)?;
        }
        let mut defers = [Defer::default(); MAX_DEFERS];
        for d in &mut defers {
            d.counter = rd.next()?;
            d.opcode = rd.next()?;
            d.args = read_args(&mut rd)?;
        }
        if rd.remaining() != 0 {
            return Err(DimuseError::BadSaveData);
        }
        Ok(Self {
            groups,
            tracks,
            fades,
            triggers,
            defers,
        })
    }
}

impl<S: SoundSource> Engine<S> {
    /// Serialize the engine state
    #[must_use]
    pub fn save_state(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_be_u32(&mut out, MAGIC);
        write_u32(&mut out, VERSION);
        for &vol in &self.groups.vols {
            write_i32(&mut out, vol);
        }
        let list = self.tracks.list();
        write_usize(&mut out, list.len());
        for &idx in &list {
            write_track(&mut out, idx, self.tracks.get(idx));
        }
        for fade in &self.fades.fades {
            write_i32(&mut out, fade.sound);
            write_i32(&mut out, fade.param.code());
            write_i32(&mut out, fade.val);
            write_u32(&mut out, fade.counter);
            write_u32(&mut out, fade.length);
            write_i32(&mut out, fade.slope);
            write_i32(&mut out, fade.slope_mod);
            write_i32(&mut out, fade.mod_counter);
            write_i32(&mut out, fade.nudge);
        }
        for t in &self.triggers.triggers {
            // Triggers cleared mid-processing are as good as gone
            let sound = if t.clear_later { 0 } else { t.sound };
            write_i32(&mut out, sound);
            write_blob(&mut out, t.marker.as_bytes());
            write_i32(&mut out, t.opcode);
            write_args(&mut out, &t.args);
        }
        for d in &self.triggers.defers {
            write_u32(&mut out, d.counter);
            write_i32(&mut out, d.opcode);
            write_args(&mut out, &d.args);
        }
        out
    }
    /// Replace the engine state with a saved one.
    ///
    /// Every sound playing is stopped first. Sounds that can't be resumed are dropped.
    pub fn load_state(&mut self, data: &[u8]) -> DimuseResult {
        let saved = Saved::read(
            data,
            self.cfg.track_count,
            self.cfg.flavor.max_map_size(),
        )
        .map_err(|e| {
            log::warn!("Rejecting save data: {e}");
            DimuseError::BadSaveData
        })?;
        self.stop_all_sounds();
        self.pools.streamer.reset();
        self.pools.zones.reset();
        self.pools.fade_bufs.reset();
        self.groups = saved.groups;
        self.fades.fades = saved.fades;
        self.triggers.reset();
        self.triggers.triggers = saved.triggers;
        self.triggers.defers = saved.defers;
        let mut order = ArrayVec::<TrackIdx, { crate::MAX_TRACKS }>::new();
        for saved in saved.tracks {
            let (idx, sound) = (saved.idx, saved.track.sound);
            match self.restore_track(saved) {
                Ok(()) => order.push(idx),
                Err(e) => {
                    log::warn!("Couldn't resume sound {sound}: {e}");
                    self.fades.clear(sound, None);
                    self.triggers.clear_trigger(Some(sound), "", None);
                }
            }
        }
        self.tracks.relink(&order);
        log::debug!("Restored {} sounds", order.len());
        Ok(())
    }
    fn restore_track(&mut self, saved: SavedTrack) -> DimuseResult {
        let SavedTrack {
            idx,
            mut track,
            streamed,
        } = saved;
        let sound: SoundId = track.sound;
        let flavor = self.cfg.flavor;
        let mut ctx = self.pools.ctx(&self.cfg);
        let d = &mut track.dispatch;
        if streamed {
            let stream = ctx.streamer.allocate(
                &mut *ctx.source,
                sound,
                d.stream_buf_id,
                flavor.stream_max_read(),
                flavor,
            )?;
            d.stream = Some(stream);
            ctx.streamer
                .set_sound_from_offset(&mut *ctx.source, stream, sound, d.current_offset);
            if d.map.is_some()
                && !d.push_zone(
                    ctx.zones,
                    Zone {
                        offset: d.current_offset,
                        size: 0,
                        fade: false,
                    },
                )
            {
                dispatch::release(&mut ctx, d);
                return Err(DimuseError::PoolExhausted(Pool::Zone));
            }
            if d.voc_loop_start != 0 {
                ctx.streamer
                    .set_loop_flag(stream, d.current_offset + d.audio_remaining);
            }
        } else if !ctx.source.open_sound(sound) {
            return Err(DimuseError::SoundNotFound);
        }
        let slot = self.tracks.get_mut(idx);
        track.prev = None;
        track.next = None;
        *slot = track;
        Ok(())
    }
}
