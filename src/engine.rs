//! The engine core: tracks, their dispatches, and the tables driving them
use {
    crate::{
        SoundId,
        command::Command,
        config::{EngineConfig, Flavor},
        dispatch::{
            self, Ctx, NavOutcome, SwitchFlags,
            pools::{FadeBufPool, ZonePool},
            process::{self, Outcome},
        },
        fades::Fades,
        groups::{GROUP_MUSIC, GROUP_MUSIC_EFFECT, GROUP_SPEECH, Groups, MAX_GROUPS},
        map::HOOK_SUPPRESS,
        mixer::Mixer,
        result::{DimuseError, DimuseResult},
        source::{BufferId, SoundSource},
        streamer::{FetchEvent, StreamStatus, Streamer},
        timing::{Clock, Tick, ms_to_ticks, offset_to_ms},
        track::{Param, Track, TrackIdx, TrackPool},
        triggers::{Action, Args, Marker, Triggers},
        voc,
    },
    arrayvec::ArrayVec,
};

mod save;

/// Largest detune, in 1/256 semitones
pub const MAX_DETUNE: i32 = 9216;
/// Largest coarse transpose, in semitones
pub const MAX_TRANSPOSE: i32 = 12;
/// Largest absolute pitch shift of pitched sounds
pub const MAX_PITCH_SHIFT: i32 = 4095;
/// Ducking steps, per 10 Hz tick
const DUCK_STEP_DOWN: i32 = 18;
const DUCK_STEP_UP: i32 = 3;

/// Something for the script layer, produced by a fired trigger or a deferred command
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ScriptEvent {
    /// A watched marker was passed
    Marker {
        /// Sound that passed it
        sound: SoundId,
        /// Marker text
        marker: Marker,
    },
    /// A script should run
    Script {
        /// Script number
        opcode: i32,
        /// Its arguments
        args: Args,
    },
}

/// Resources shared by every dispatch
struct Pools<S> {
    source: S,
    streamer: Streamer,
    zones: ZonePool,
    fade_bufs: FadeBufPool,
    mixer: Mixer,
}

impl<S: SoundSource> Pools<S> {
    fn ctx<'a>(&'a mut self, cfg: &'a EngineConfig) -> Ctx<'a, S> {
        Ctx {
            cfg,
            source: &mut self.source,
            streamer: &mut self.streamer,
            zones: &mut self.zones,
            fade_bufs: &mut self.fade_bufs,
            mixer: &mut self.mixer,
        }
    }
}

/// The digital iMUSE engine.
///
/// Not synchronized: see [`Imuse`](crate::Imuse) for the locked front end.
pub struct Engine<S: SoundSource> {
    cfg: EngineConfig,
    pools: Pools<S>,
    tracks: TrackPool,
    groups: Groups,
    fades: Fades,
    triggers: Triggers,
    clock: Clock,
    paused: bool,
    events: Vec<ScriptEvent>,
}

impl<S: SoundSource> Engine<S> {
    /// Create an engine reading sounds from `source`
    pub fn new(cfg: EngineConfig, source: S) -> Self {
        log::debug!(
            "Starting engine: {:?}, {} tracks, {} Hz",
            cfg.flavor,
            cfg.track_count,
            cfg.out_rate
        );
        Self {
            pools: Pools {
                source,
                streamer: Streamer::default(),
                zones: ZonePool::default(),
                fade_bufs: FadeBufPool::default(),
                mixer: Mixer::new(&cfg),
            },
            tracks: TrackPool::new(cfg.track_count),
            groups: Groups::default(),
            fades: Fades::default(),
            triggers: Triggers::default(),
            clock: Clock::default(),
            paused: false,
            events: Vec::new(),
            cfg,
        }
    }
    /// The configuration the engine was created with
    pub const fn config(&self) -> &EngineConfig {
        &self.cfg
    }
    /// The sound source
    pub const fn source(&self) -> &S {
        &self.pools.source
    }
    /// The sound source, mutably
    pub const fn source_mut(&mut self) -> &mut S {
        &mut self.pools.source
    }
    /// The track pool
    pub const fn tracks(&self) -> &TrackPool {
        &self.tracks
    }
    /// The track playing `sound`
    pub fn track(&self, sound: SoundId) -> Option<&Track> {
        self.tracks.find(sound).map(|idx| self.tracks.get(idx))
    }
    /// Group volumes
    pub const fn groups(&self) -> &Groups {
        &self.groups
    }
    /// Playing sounds, most recently started first
    pub fn playing(&self) -> ArrayVec<SoundId, { crate::MAX_TRACKS }> {
        self.tracks
            .list()
            .iter()
            .map(|&idx| self.tracks.get(idx).sound)
            .collect()
    }
    /// Whether mixing is paused
    pub const fn is_paused(&self) -> bool {
        self.paused
    }
    /// Take the script events produced since the last call
    pub fn take_events(&mut self) -> Vec<ScriptEvent> {
        std::mem::take(&mut self.events)
    }
    fn find(&self, sound: SoundId) -> DimuseResult<TrackIdx> {
        self.tracks.find(sound).ok_or(DimuseError::SoundNotFound)
    }

    /// Play a resident sound
    pub fn start_sound(&mut self, sound: SoundId, priority: i32) -> DimuseResult {
        self.check_startable(sound)?;
        if !self.pools.source.open_sound(sound) {
            return Err(DimuseError::SoundNotFound);
        }
        self.start(sound, priority, None)
    }
    /// Play a sound through the stream of buffer group `buf_id`
    pub fn start_stream(&mut self, sound: SoundId, priority: i32, buf_id: BufferId) -> DimuseResult {
        self.check_startable(sound)?;
        self.start(sound, priority, Some(buf_id))
    }
    fn check_startable(&self, sound: SoundId) -> DimuseResult {
        if sound == 0 {
            return Err(DimuseError::ParamOutOfRange);
        }
        if self.tracks.find(sound).is_some() {
            return Err(DimuseError::AlreadyPlaying);
        }
        Ok(())
    }
    fn start(&mut self, sound: SoundId, priority: i32, buf_id: Option<BufferId>) -> DimuseResult {
        let priority = priority.clamp(0, 127);
        let (idx, evicted) = match self.tracks.reserve(priority) {
            Ok(found) => found,
            Err(e) => {
                if buf_id.is_none() {
                    self.pools.source.close_sound(sound);
                }
                return Err(e);
            }
        };
        if evicted.is_some() {
            self.clear_track(idx);
        }
        let mut ctx = self.pools.ctx(&self.cfg);
        let track = self.tracks.get_mut(idx);
        track.reset(sound, priority);
        track.eff_vol = self.groups.track_eff_vol(track.group, track.vol);
        let marker = match dispatch::allocate(&mut ctx, track, buf_id) {
            Ok(marker) => marker,
            Err(e) => {
                log::warn!("Couldn't start sound {sound}: {e}");
                dispatch::release(&mut ctx, &mut track.dispatch);
                track.sound = 0;
                if buf_id.is_none() {
                    ctx.source.close_sound(sound);
                }
                return Err(e);
            }
        };
        self.tracks.link(idx);
        log::debug!("Sound {sound} started at priority {priority}");
        self.pass_markers(idx, marker)
    }
    /// Fire the triggers of a marker met while navigating track `idx` outside
    /// of mixing, then resume the walk. A walk that ends clears the track.
    fn pass_markers(&mut self, idx: TrackIdx, mut marker: Option<Marker>) -> DimuseResult {
        while let Some(text) = marker {
            let sound = self.tracks.get(idx).sound;
            self.process_triggers(sound, &text);
            if self.tracks.get(idx).sound != sound {
                return Ok(());
            }
            let mut ctx = self.pools.ctx(&self.cfg);
            let walked = dispatch::navigate(&mut ctx, self.tracks.get_mut(idx));
            marker = match walked.and_then(NavOutcome::marker) {
                Ok(next) => next,
                Err(e) => {
                    log::warn!("Sound {sound}: {e}");
                    self.clear_track(idx);
                    return Err(e);
                }
            };
        }
        Ok(())
    }
    /// Tear a track down, releasing everything it holds
    fn clear_track(&mut self, idx: TrackIdx) {
        let mut ctx = self.pools.ctx(&self.cfg);
        let track = self.tracks.get_mut(idx);
        let sound = track.sound;
        let resident = !track.dispatch.is_streamed();
        dispatch::release(&mut ctx, &mut track.dispatch);
        if resident && sound != 0 {
            ctx.source.close_sound(sound);
        }
        track.sound = 0;
        self.tracks.unlink(idx);
        self.fades.clear(sound, None);
        self.triggers.clear_trigger(Some(sound), "", None);
        log::debug!("Sound {sound} cleared");
    }
    /// Stop a sound
    pub fn stop_sound(&mut self, sound: SoundId) -> DimuseResult {
        let idx = self.find(sound)?;
        self.clear_track(idx);
        Ok(())
    }
    /// Stop every sound
    pub fn stop_all_sounds(&mut self) {
        for idx in self.tracks.list() {
            self.clear_track(idx);
        }
    }
    /// The lowest playing sound id above `sound` (0: none)
    pub fn get_next_sound(&self, sound: SoundId) -> SoundId {
        self.tracks
            .list()
            .iter()
            .map(|&idx| self.tracks.get(idx).sound)
            .filter(|&s| s > sound)
            .min()
            .unwrap_or(0)
    }

    /// Set or query (with -1) the volume of a group, updating the tracks
    pub fn set_group_vol(&mut self, group: i32, vol: i32) -> DimuseResult<i32> {
        let vol = self.groups.set_group_vol(group, vol)?;
        self.refresh_volumes();
        Ok(vol)
    }
    fn refresh_volumes(&mut self) {
        for idx in self.tracks.list() {
            let track = self.tracks.get_mut(idx);
            track.eff_vol = self.groups.track_eff_vol(track.group, track.vol);
        }
    }
    /// Set a track parameter
    pub fn set_param(&mut self, sound: SoundId, param: Param, val: i32) -> DimuseResult {
        let idx = self.find(sound)?;
        let flavor = self.cfg.flavor;
        let track = self.tracks.get_mut(idx);
        let in_range = |lo: i32, hi: i32| {
            if (lo..=hi).contains(&val) {
                Ok(val)
            } else {
                Err(DimuseError::ParamOutOfRange)
            }
        };
        match param {
            Param::Group => {
                #[expect(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
                let max = MAX_GROUPS as i32 - 1;
                track.group = in_range(0, max)?;
                track.eff_vol = self.groups.track_eff_vol(track.group, track.vol);
            }
            Param::Priority => track.priority = in_range(0, 127)?,
            Param::Volume => {
                track.vol = in_range(0, 127)?;
                track.eff_vol = self.groups.track_eff_vol(track.group, track.vol);
            }
            Param::Pan => track.pan = in_range(0, 127)?,
            Param::Detune => track.detune = in_range(-MAX_DETUNE, MAX_DETUNE)?,
            Param::Transpose if flavor.pitched() => {
                track.pitch_shift = in_range(0, MAX_PITCH_SHIFT)?;
                track.transpose = val;
            }
            Param::Transpose => {
                let val = in_range(-MAX_TRANSPOSE, MAX_TRANSPOSE)?;
                track.transpose = if val == 0 {
                    0
                } else {
                    (track.detune + val).clamp(-MAX_TRANSPOSE, MAX_TRANSPOSE)
                };
            }
            Param::Mailbox => track.mailbox = val,
            Param::SoundTrackNum
            | Param::TrigsSounds
            | Param::SoundHasStream
            | Param::StreamBufferId
            | Param::SoundPositionMs => return Err(DimuseError::ParamOutOfRange),
        }
        Ok(())
    }
    /// Get a track parameter
    pub fn get_param(&self, sound: SoundId, param: Param) -> DimuseResult<i32> {
        match param {
            Param::SoundTrackNum => {
                return Ok(self
                    .tracks
                    .find(sound)
                    .map_or(0, |idx| i32::from(idx.0) + 1));
            }
            Param::TrigsSounds => {
                let count = self.triggers.check_trigger(Some(sound), "", None);
                return Ok(i32::try_from(count).unwrap_or(i32::MAX));
            }
            _ => {}
        }
        let track = self.tracks.get(self.find(sound)?);
        let d = &track.dispatch;
        Ok(match param {
            Param::Group => track.group,
            Param::Priority => track.priority,
            Param::Volume => track.vol,
            Param::Pan => track.pan,
            Param::Detune => track.detune,
            Param::Transpose if self.cfg.flavor.pitched() => track.pitch_shift,
            Param::Transpose => track.transpose,
            Param::Mailbox => track.mailbox,
            Param::SoundHasStream => i32::from(d.is_streamed()),
            Param::StreamBufferId => {
                if d.is_streamed() {
                    i32::from(d.stream_buf_id)
                } else {
                    0
                }
            }
            Param::SoundPositionMs => {
                offset_to_ms(d.current_offset, d.word_size, d.sample_rate, d.channels)
            }
            Param::SoundTrackNum | Param::TrigsSounds => 0,
        })
    }
    /// Ramp a parameter to `val` over `ms` milliseconds.
    ///
    /// A zero length sets the value right away; a volume snapped to 0 stops the sound.
    pub fn fade_param(&mut self, sound: SoundId, param: Param, val: i32, ms: u32) -> DimuseResult {
        self.find(sound)?;
        if ms == 0 {
            self.fades.clear(sound, Some(param));
            if param == Param::Volume && val == 0 {
                return self.stop_sound(sound);
            }
            return self.set_param(sound, param, val);
        }
        let from = self.get_param(sound, param)?;
        self.fades
            .fade_param(sound, param, from, val, ms_to_ticks(ms))
    }
    /// Arm a jump hook
    pub fn set_hook(&mut self, sound: SoundId, hook: i32) -> DimuseResult {
        if !(0..=HOOK_SUPPRESS).contains(&hook) {
            return Err(DimuseError::ParamOutOfRange);
        }
        let idx = self.find(sound)?;
        self.tracks.get_mut(idx).jump_hook = hook;
        Ok(())
    }
    /// The armed jump hook
    pub fn get_hook(&self, sound: SoundId) -> DimuseResult<i32> {
        Ok(self.tracks.get(self.find(sound)?).jump_hook)
    }
    /// Lip sync (width, height) of SYNC `slot` of `sound` at `ms`
    pub fn lip_sync(&self, sound: SoundId, slot: usize, ms: i32) -> DimuseResult<(i32, i32)> {
        self.tracks.get(self.find(sound)?).lip_sync(slot, ms)
    }

    /// Arm a trigger on `marker` of `sound` (empty marker: any)
    pub fn set_trigger(&mut self, sound: SoundId, marker: &str, opcode: i32, args: Args) -> DimuseResult {
        self.triggers.set_trigger(sound, marker, opcode, args)
    }
    /// Count the armed triggers matching a query
    pub fn check_trigger(&self, sound: Option<SoundId>, marker: &str, opcode: Option<i32>) -> usize {
        self.triggers.check_trigger(sound, marker, opcode)
    }
    /// Disarm the triggers matching a query
    pub fn clear_trigger(&mut self, sound: Option<SoundId>, marker: &str, opcode: Option<i32>) {
        self.triggers.clear_trigger(sound, marker, opcode);
    }
    /// Run a command after `ticks` 60 Hz ticks
    pub fn defer_command(&mut self, ticks: Tick, opcode: i32, args: Args) -> DimuseResult {
        self.triggers.defer_command(ticks, opcode, args)
    }
    /// Fire the triggers of `marker` of `sound`
    pub fn process_triggers(&mut self, sound: SoundId, marker: &str) {
        let actions = self.triggers.begin_processing(sound, marker);
        for action in actions {
            self.run_action(action);
        }
        self.triggers.end_processing();
    }
    fn run_action(&mut self, action: Action) {
        match action {
            Action::Marker { sound, marker } => self.events.push(ScriptEvent::Marker { sound, marker }),
            Action::Script { opcode, args } => self.events.push(ScriptEvent::Script { opcode, args }),
            Action::Command { opcode, args } => {
                if let Err(e) = self.handle_cmd(opcode, &args) {
                    log::warn!("Triggered command {opcode} failed: {e}");
                }
            }
        }
    }
    /// Run a numeric command
    pub fn handle_cmd(&mut self, opcode: i32, args: &Args) -> DimuseResult<i32> {
        let ok = |_| 0;
        match Command::parse(opcode, args)? {
            Command::Pause => {
                self.pause();
                Ok(0)
            }
            Command::Resume => {
                self.resume();
                Ok(0)
            }
            Command::SetGroupVol { group, vol } => self.set_group_vol(group, vol),
            Command::StartSound { sound, priority } => self.start_sound(sound, priority).map(ok),
            Command::StopSound { sound } => self.stop_sound(sound).map(ok),
            Command::StopAllSounds => {
                self.stop_all_sounds();
                Ok(0)
            }
            Command::GetNextSound { sound } => Ok(self.get_next_sound(sound)),
            Command::SetParam { sound, param, val } => self.set_param(sound, param, val).map(ok),
            Command::GetParam { sound, param } => self.get_param(sound, param),
            Command::FadeParam {
                sound,
                param,
                val,
                ms,
            } => self.fade_param(sound, param, val, ms).map(ok),
            Command::SetHook { sound, hook } => self.set_hook(sound, hook).map(ok),
            Command::GetHook { sound } => self.get_hook(sound),
            Command::CheckTrigger { sound, opcode } => {
                let count = self.check_trigger(sound, "", opcode);
                Ok(i32::try_from(count).unwrap_or(i32::MAX))
            }
            Command::ClearTrigger { sound, opcode } => {
                self.clear_trigger(sound, "", opcode);
                Ok(0)
            }
            Command::DeferCommand {
                ticks,
                opcode,
                args,
            } => self.defer_command(ticks, opcode, args).map(ok),
            Command::StartStream {
                sound,
                priority,
                buf_id,
            } => self.start_stream(sound, priority, buf_id).map(ok),
            Command::SwitchStream {
                old,
                new,
                fade_ms,
                flags,
            } => self.switch_stream(old, new, fade_ms, flags).map(ok),
            Command::ProcessStreams => {
                self.process_streams();
                Ok(0)
            }
        }
    }

    /// Crossfade the stream of `old` into `new`
    pub fn switch_stream(
        &mut self,
        old: SoundId,
        new: SoundId,
        fade_ms: u32,
        flags: SwitchFlags,
    ) -> DimuseResult {
        if self.cfg.flavor == Flavor::Voc {
            let idx = self.find(old)?;
            let rate = self.tracks.get(idx).dispatch.sample_rate;
            let size = u64::from(rate) * u64::from(fade_ms.min(dispatch::MAX_SWITCH_FADE_MS)) / 1000;
            return self.switch_stream_with_buffer(
                old,
                new,
                usize::try_from(size).unwrap_or(0),
                flags.contains(SwitchFlags::FROM_OFFSET),
            );
        }
        self.switch(old, new, |ctx, track| {
            dispatch::switch_stream(ctx, track, new, fade_ms, flags)
        })
    }
    /// Switch the VOC stream of `old` to `new`, crossfading `crossfade_size` bytes
    pub fn switch_stream_with_buffer(
        &mut self,
        old: SoundId,
        new: SoundId,
        crossfade_size: usize,
        voc_loop: bool,
    ) -> DimuseResult {
        self.switch(old, new, |ctx, track| {
            dispatch::switch_stream_with_buffer(ctx, track, new, crossfade_size, voc_loop)
                .map(|()| None)
        })
    }
    fn switch(
        &mut self,
        old: SoundId,
        new: SoundId,
        f: impl FnOnce(&mut Ctx<'_, S>, &mut Track) -> DimuseResult<Option<Marker>>,
    ) -> DimuseResult {
        let idx = self.find(old)?;
        self.check_startable(new)?;
        let mut ctx = self.pools.ctx(&self.cfg);
        let result = f(&mut ctx, self.tracks.get_mut(idx));
        self.fades.clear(old, None);
        self.triggers.clear_trigger(Some(old), "", None);
        match result {
            Ok(marker) => self.pass_markers(idx, marker),
            Err(e) => {
                log::warn!("Switching sound {old} to {new} failed: {e}");
                self.clear_track(idx);
                Err(e)
            }
        }
    }

    /// Look ahead in the streams, then load the one that needs it most
    pub fn process_streams(&mut self) {
        let mut ctx = self.pools.ctx(&self.cfg);
        for idx in self.tracks.list() {
            dispatch::predict_stream(&mut ctx, self.tracks.get_mut(idx));
        }
        if let Some(FetchEvent::LoopReached(sound)) = ctx.streamer.process(&mut *ctx.source)
            && let Some(idx) = self.tracks.find(sound)
        {
            voc::voc_loop_callback(&mut ctx, &self.tracks.get(idx).dispatch, sound);
        }
    }
    /// Status of the stream of `sound`
    pub fn query_stream(&self, sound: SoundId) -> DimuseResult<StreamStatus> {
        let stream = self
            .tracks
            .get(self.find(sound)?)
            .dispatch
            .stream
            .ok_or(DimuseError::SoundNotFound)?;
        Ok(self.pools.streamer.query(stream))
    }
    /// Push externally produced data into the stream of `sound`
    pub fn feed_stream(&mut self, sound: SoundId, data: &[u8], paused: bool) -> DimuseResult {
        let stream = self
            .tracks
            .get(self.find(sound)?)
            .dispatch
            .stream
            .ok_or(DimuseError::SoundNotFound)?;
        self.pools.streamer.feed(stream, data, paused);
        Ok(())
    }

    /// Stop mixing. Heartbeats output silence and advance nothing.
    pub const fn pause(&mut self) {
        self.paused = true;
    }
    /// Resume mixing
    pub const fn resume(&mut self) {
        self.paused = false;
    }
    /// Mix one feed and advance the clocks.
    ///
    /// Returns the mixed feed in the output format.
    pub fn heartbeat(&mut self) -> &[u8] {
        if self.paused {
            return self.pools.mixer.silence();
        }
        self.process_streams();
        self.pools.mixer.clear();
        for idx in self.tracks.list() {
            if self.tracks.get(idx).sound == 0 {
                continue;
            }
            if self.cfg.flavor == Flavor::Voc {
                let mut ctx = self.pools.ctx(&self.cfg);
                if voc::process_voc(&mut ctx, self.tracks.get_mut(idx)) == Outcome::Clear {
                    self.clear_track(idx);
                }
            } else {
                self.mix_map_track(idx);
            }
        }
        let elapsed = self.clock.advance(self.cfg.feed_duration_us());
        for _ in 0..elapsed.fast {
            self.tick_fades();
            for action in self.triggers.tick_defers() {
                self.run_action(action);
            }
        }
        for _ in 0..elapsed.slow {
            self.duck();
        }
        self.pools.mixer.finish()
    }
    /// Mix one feed of the MAP sound of track `idx`, firing the triggers of
    /// the markers it passes on the way
    fn mix_map_track(&mut self, idx: TrackIdx) {
        let sound = self.tracks.get(idx).sound;
        let mut ctx = self.pools.ctx(&self.cfg);
        let mut feed = process::begin_feed(&mut ctx, self.tracks.get_mut(idx));
        loop {
            let mut ctx = self.pools.ctx(&self.cfg);
            let outcome = process::process_map(&mut ctx, self.tracks.get_mut(idx), &mut feed);
            match outcome {
                Outcome::Keep => return,
                Outcome::Clear => {
                    self.clear_track(idx);
                    return;
                }
                Outcome::Marker(marker) => {
                    self.process_triggers(sound, &marker);
                    if self.tracks.get(idx).sound != sound {
                        return;
                    }
                }
            }
        }
    }
    fn tick_fades(&mut self) {
        for step in self.fades.tick() {
            let result = if step.last && step.param == Param::Volume && step.val == 0 {
                self.stop_sound(step.sound)
            } else {
                self.set_param(step.sound, step.param, step.val)
            };
            if let Err(e) = result {
                log::debug!("Fade of sound {} not applied: {e}", step.sound);
            }
        }
    }
    /// Move the music effect group toward its target: ducked while speech plays
    fn duck(&mut self) {
        let speaking = self
            .tracks
            .list()
            .iter()
            .any(|&idx| self.tracks.get(idx).group == GROUP_SPEECH);
        let music = self.groups.vol(GROUP_MUSIC).unwrap_or(127);
        let target = if speaking {
            music * self.cfg.flavor.duck_ratio() / 128
        } else {
            music
        };
        let cur = self.groups.vol(GROUP_MUSIC_EFFECT).unwrap_or(127);
        let next = if cur > target {
            (cur - DUCK_STEP_DOWN).max(target)
        } else if cur < target {
            (cur + DUCK_STEP_UP).min(target)
        } else {
            return;
        };
        if self.set_group_vol(GROUP_MUSIC_EFFECT, next).is_err() {
            log::warn!("Couldn't duck music to {next}");
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            map::{Block, SoundMap},
            source::MemorySource,
        },
    };

    /// A MAP sound of 16 bit stereo audio, `len` bytes long
    fn sound(len: u32) -> Vec<u8> {
        let blocks = |at: u32| {
            vec![
                Block::Format {
                    offset: at,
                    reserved: 0,
                    word_size: 16,
                    rate: 22_050,
                    channels: 2,
                },
                Block::Region {
                    offset: at,
                    length: len,
                },
                Block::Stop { offset: at + len },
            ]
        };
        let at = u32::try_from(SoundMap { blocks: blocks(0) }.data_offset()).unwrap();
        SoundMap { blocks: blocks(at) }.to_resource(&vec![0x10; len as usize])
    }

    fn engine() -> Engine<MemorySource> {
        let mut src = MemorySource::new();
        for id in 1..=10 {
            src.insert(id, sound(100_000));
        }
        Engine::new(EngineConfig::default(), src)
    }

    #[test]
    fn test_params() {
        let mut e = engine();
        e.start_sound(1, 10).unwrap();
        assert_eq!(e.set_param(1, Param::Volume, 128), Err(DimuseError::ParamOutOfRange));
        assert_eq!(e.set_param(1, Param::Group, 16), Err(DimuseError::ParamOutOfRange));
        assert_eq!(e.set_param(1, Param::Detune, -9217), Err(DimuseError::ParamOutOfRange));
        assert_eq!(e.get_param(1, Param::Volume), Ok(127));
        e.set_param(1, Param::Volume, 63).unwrap();
        assert_eq!(e.track(1).unwrap().eff_vol, 63);
        e.set_group_vol(0, 63).unwrap();
        assert_eq!(e.track(1).unwrap().eff_vol, 31);
        e.set_param(1, Param::Detune, 5).unwrap();
        e.set_param(1, Param::Transpose, 10).unwrap();
        assert_eq!(e.get_param(1, Param::Transpose), Ok(12));
        e.set_param(1, Param::Transpose, 0).unwrap();
        assert_eq!(e.get_param(1, Param::Transpose), Ok(0));
        assert_eq!(e.get_param(1, Param::SoundTrackNum), Ok(1));
        assert_eq!(e.get_param(2, Param::SoundTrackNum), Ok(0));
        assert_eq!(e.get_param(2, Param::Volume), Err(DimuseError::SoundNotFound));
        assert_eq!(e.set_param(1, Param::SoundPositionMs, 0), Err(DimuseError::ParamOutOfRange));
    }

    #[test]
    fn test_pitched_transpose() {
        let mut src = MemorySource::new();
        src.insert(1, sound(40_000));
        let mut e = Engine::new(EngineConfig::new(Flavor::MapPitched { demo: false }), src);
        e.start_sound(1, 10).unwrap();
        e.set_param(1, Param::Transpose, 512).unwrap();
        assert_eq!(e.track(1).unwrap().pitch_shift, 512);
        assert_eq!(e.set_param(1, Param::Transpose, 4096), Err(DimuseError::ParamOutOfRange));
        assert_eq!(e.set_param(1, Param::Transpose, -1), Err(DimuseError::ParamOutOfRange));
    }

    #[test]
    fn test_volume_fade_to_zero_stops() {
        let mut e = engine();
        e.start_sound(3, 10).unwrap();
        e.fade_param(3, Param::Volume, 0, 100).unwrap();
        // 100 ms is 6 ticks, a heartbeat is about 1.4 ticks
        for _ in 0..8 {
            e.heartbeat();
        }
        assert!(e.track(3).is_none());
        assert_eq!(e.source().pin_count(3), 0);
    }

    #[test]
    fn test_pause_freezes() {
        let mut e = engine();
        e.start_sound(1, 10).unwrap();
        let before = e.get_param(1, Param::SoundPositionMs).unwrap();
        e.pause();
        let silence = e.heartbeat().to_vec();
        assert!(silence.iter().all(|&b| b == 0));
        assert_eq!(e.get_param(1, Param::SoundPositionMs), Ok(before));
        e.resume();
        e.heartbeat();
        assert!(e.get_param(1, Param::SoundPositionMs).unwrap() > before);
    }

    #[test]
    fn test_ducking() {
        let mut e = engine();
        e.start_sound(1, 10).unwrap();
        e.set_param(1, Param::Group, GROUP_SPEECH).unwrap();
        // Half a second
        for _ in 0..22 {
            e.heartbeat();
        }
        let ducked = e.groups().vol(GROUP_MUSIC_EFFECT).unwrap();
        assert_eq!(ducked, 127 * 82 / 128);
        e.stop_sound(1).unwrap();
        for _ in 0..4 {
            e.heartbeat();
        }
        let recovering = e.groups().vol(GROUP_MUSIC_EFFECT).unwrap();
        assert!(recovering > ducked && recovering < 127);
    }

    #[test]
    fn test_triggered_commands() {
        let mut e = engine();
        e.start_sound(1, 10).unwrap();
        e.start_sound(2, 10).unwrap();
        let mut args = Args::default();
        args[0] = 2;
        e.set_trigger(1, "cue", crate::command::opcode::STOP_SOUND, args)
            .unwrap();
        e.set_trigger(1, "cue", 0, Args::default()).unwrap();
        e.process_triggers(1, "cue");
        assert!(e.track(2).is_none());
        assert_eq!(
            e.take_events(),
            [ScriptEvent::Marker {
                sound: 1,
                marker: Marker::from("cue").unwrap()
            }]
        );
        // Stopping a sound disarms its triggers
        e.set_trigger(1, "", 40, Args::default()).unwrap();
        e.stop_sound(1).unwrap();
        assert_eq!(e.check_trigger(Some(1), "", None), 0);
    }

    #[test]
    fn test_hooks() {
        let mut e = engine();
        e.start_sound(1, 10).unwrap();
        assert_eq!(e.set_hook(1, 129), Err(DimuseError::ParamOutOfRange));
        e.set_hook(1, 3).unwrap();
        assert_eq!(e.get_hook(1), Ok(3));
        assert_eq!(e.get_hook(2), Err(DimuseError::SoundNotFound));
    }
}
