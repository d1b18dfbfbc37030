//! The thread safe front end
use {
    crate::{
        SoundId,
        config::EngineConfig,
        dispatch::SwitchFlags,
        engine::{Engine, ScriptEvent},
        result::DimuseResult,
        source::{BufferId, SoundSource},
        streamer::StreamStatus,
        timing::Tick,
        track::Param,
        triggers::Args,
    },
    parking_lot::{Mutex, MutexGuard},
};

/// Receives what fired triggers and deferred commands ask of the game scripts.
///
/// Called with the engine unlocked, so it may call back into [`Imuse`].
pub trait ScriptHost {
    /// `marker` of `sound` was passed
    fn marker(&mut self, sound: SoundId, marker: &str);
    /// Run script `opcode`
    fn run_script(&mut self, opcode: i32, args: &Args);
}

/// A host that ignores everything
impl ScriptHost for () {
    fn marker(&mut self, _sound: SoundId, _marker: &str) {}
    fn run_script(&mut self, _opcode: i32, _args: &Args) {}
}

/// [`Engine`] behind a lock, shared between the game thread and the audio callback
pub struct Imuse<S: SoundSource> {
    engine: Mutex<Engine<S>>,
}

impl<S: SoundSource> Imuse<S> {
    /// Create an engine reading sounds from `source`
    pub fn new(cfg: EngineConfig, source: S) -> Self {
        Self {
            engine: Mutex::new(Engine::new(cfg, source)),
        }
    }
    /// Lock the engine for a sequence of calls
    pub fn lock(&self) -> MutexGuard<'_, Engine<S>> {
        self.engine.lock()
    }
    fn deliver(&self, host: &mut impl ScriptHost) {
        let events = self.engine.lock().take_events();
        for event in events {
            match event {
                ScriptEvent::Marker { sound, marker } => host.marker(sound, &marker),
                ScriptEvent::Script { opcode, args } => host.run_script(opcode, &args),
            }
        }
    }
    /// Mix one feed into `out`, then deliver the script events it produced
    pub fn heartbeat(&self, out: &mut Vec<u8>, host: &mut impl ScriptHost) {
        {
            let mut engine = self.engine.lock();
            out.clear();
            out.extend_from_slice(engine.heartbeat());
        }
        self.deliver(host);
    }
    /// Run a numeric command, then deliver the script events it produced
    pub fn handle_cmd(&self, opcode: i32, args: &Args, host: &mut impl ScriptHost) -> DimuseResult<i32> {
        let result = self.engine.lock().handle_cmd(opcode, args);
        self.deliver(host);
        result
    }
    /// Fire the triggers of `marker` of `sound`, then deliver the script events
    pub fn process_triggers(&self, sound: SoundId, marker: &str, host: &mut impl ScriptHost) {
        self.engine.lock().process_triggers(sound, marker);
        self.deliver(host);
    }
    /// See [`Engine::start_sound`]
    pub fn start_sound(&self, sound: SoundId, priority: i32) -> DimuseResult {
        self.engine.lock().start_sound(sound, priority)
    }
    /// See [`Engine::start_stream`]
    pub fn start_stream(&self, sound: SoundId, priority: i32, buf_id: BufferId) -> DimuseResult {
        self.engine.lock().start_stream(sound, priority, buf_id)
    }
    /// See [`Engine::stop_sound`]
    pub fn stop_sound(&self, sound: SoundId) -> DimuseResult {
        self.engine.lock().stop_sound(sound)
    }
    /// See [`Engine::stop_all_sounds`]
    pub fn stop_all_sounds(&self) {
        self.engine.lock().stop_all_sounds();
    }
    /// See [`Engine::get_next_sound`]
    pub fn get_next_sound(&self, sound: SoundId) -> SoundId {
        self.engine.lock().get_next_sound(sound)
    }
    /// See [`Engine::set_group_vol`]
    pub fn set_group_vol(&self, group: i32, vol: i32) -> DimuseResult<i32> {
        self.engine.lock().set_group_vol(group, vol)
    }
    /// See [`Engine::set_param`]
    pub fn set_param(&self, sound: SoundId, param: Param, val: i32) -> DimuseResult {
        self.engine.lock().set_param(sound, param, val)
    }
    /// See [`Engine::get_param`]
    pub fn get_param(&self, sound: SoundId, param: Param) -> DimuseResult<i32> {
        self.engine.lock().get_param(sound, param)
    }
    /// See [`Engine::fade_param`]
    pub fn fade_param(&self, sound: SoundId, param: Param, val: i32, ms: u32) -> DimuseResult {
        self.engine.lock().fade_param(sound, param, val, ms)
    }
    /// See [`Engine::set_hook`]
    pub fn set_hook(&self, sound: SoundId, hook: i32) -> DimuseResult {
        self.engine.lock().set_hook(sound, hook)
    }
    /// See [`Engine::get_hook`]
    pub fn get_hook(&self, sound: SoundId) -> DimuseResult<i32> {
        self.engine.lock().get_hook(sound)
    }
    /// See [`Engine::lip_sync`]
    pub fn lip_sync(&self, sound: SoundId, slot: usize, ms: i32) -> DimuseResult<(i32, i32)> {
        self.engine.lock().lip_sync(sound, slot, ms)
    }
    /// See [`Engine::set_trigger`]
    pub fn set_trigger(&self, sound: SoundId, marker: &str, opcode: i32, args: Args) -> DimuseResult {
        self.engine.lock().set_trigger(sound, marker, opcode, args)
    }
    /// See [`Engine::check_trigger`]
    pub fn check_trigger(&self, sound: Option<SoundId>, marker: &str, opcode: Option<i32>) -> usize {
        self.engine.lock().check_trigger(sound, marker, opcode)
    }
    /// See [`Engine::clear_trigger`]
    pub fn clear_trigger(&self, sound: Option<SoundId>, marker: &str, opcode: Option<i32>) {
        self.engine.lock().clear_trigger(sound, marker, opcode);
    }
    /// See [`Engine::defer_command`]
    pub fn defer_command(&self, ticks: Tick, opcode: i32, args: Args) -> DimuseResult {
        self.engine.lock().defer_command(ticks, opcode, args)
    }
    /// See [`Engine::switch_stream`]
    pub fn switch_stream(
        &self,
        old: SoundId,
        new: SoundId,
        fade_ms: u32,
        flags: SwitchFlags,
    ) -> DimuseResult {
        self.engine.lock().switch_stream(old, new, fade_ms, flags)
    }
    /// See [`Engine::switch_stream_with_buffer`]
    pub fn switch_stream_with_buffer(
        &self,
        old: SoundId,
        new: SoundId,
        crossfade_size: usize,
        voc_loop: bool,
    ) -> DimuseResult {
        self.engine
            .lock()
            .switch_stream_with_buffer(old, new, crossfade_size, voc_loop)
    }
    /// See [`Engine::process_streams`]
    pub fn process_streams(&self) {
        self.engine.lock().process_streams();
    }
    /// See [`Engine::query_stream`]
    pub fn query_stream(&self, sound: SoundId) -> DimuseResult<StreamStatus> {
        self.engine.lock().query_stream(sound)
    }
    /// See [`Engine::feed_stream`]
    pub fn feed_stream(&self, sound: SoundId, data: &[u8], paused: bool) -> DimuseResult {
        self.engine.lock().feed_stream(sound, data, paused)
    }
    /// See [`Engine::pause`]
    pub fn pause(&self) {
        self.engine.lock().pause();
    }
    /// See [`Engine::resume`]
    pub fn resume(&self) {
        self.engine.lock().resume();
    }
    /// See [`Engine::save_state`]
    pub fn save_state(&self) -> Vec<u8> {
        self.engine.lock().save_state()
    }
    /// See [`Engine::load_state`]
    pub fn load_state(&self, data: &[u8]) -> DimuseResult {
        self.engine.lock().load_state(data)
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{command::opcode, source::MemorySource},
    };

    #[derive(Default)]
    struct Recorder {
        markers: Vec<(SoundId, String)>,
        scripts: Vec<i32>,
    }

    impl ScriptHost for Recorder {
        fn marker(&mut self, sound: SoundId, marker: &str) {
            self.markers.push((sound, marker.to_owned()));
        }
        fn run_script(&mut self, opcode: i32, _args: &Args) {
            self.scripts.push(opcode);
        }
    }

    #[test]
    fn test_events_delivered_unlocked() {
        let imuse = Imuse::new(EngineConfig::default(), MemorySource::new());
        imuse.set_trigger(4, "", 0, Args::default()).unwrap();
        imuse.set_trigger(4, "end", 45, Args::default()).unwrap();
        let mut host = Recorder::default();
        imuse.process_triggers(4, "end", &mut host);
        assert_eq!(host.markers, [(4, "end".to_owned())]);
        assert_eq!(host.scripts, [45]);
        // The host could lock again
        assert_eq!(imuse.check_trigger(Some(4), "", None), 0);
    }

    #[test]
    fn test_deferred_script() {
        let imuse = Imuse::new(EngineConfig::default(), MemorySource::new());
        let mut args = Args::default();
        args[0] = 2;
        args[1] = 50;
        let mut host = Recorder::default();
        imuse
            .handle_cmd(opcode::DEFER_COMMAND, &args, &mut host)
            .unwrap();
        let mut out = Vec::new();
        for _ in 0..3 {
            imuse.heartbeat(&mut out, &mut host);
        }
        assert_eq!(out.len(), 512 * 4);
        assert_eq!(host.scripts, [50]);
    }
}
