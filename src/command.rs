//! Numeric command interface, used by triggers and deferred commands
use crate::{
    SoundId,
    dispatch::SwitchFlags,
    result::{DimuseError, DimuseResult},
    source::BufferId,
    timing::Tick,
    track::Param,
    triggers::{Args, TRIGGER_ARGS},
};

/// Command opcodes
pub mod opcode {
    /// Stop mixing
    pub const PAUSE: i32 = 3;
    /// Resume mixing
    pub const RESUME: i32 = 4;
    /// `group, vol` (vol -1 queries)
    pub const SET_GROUP_VOL: i32 = 7;
    /// `sound, priority`
    pub const START_SOUND: i32 = 8;
    /// `sound`
    pub const STOP_SOUND: i32 = 9;
    /// No arguments
    pub const STOP_ALL_SOUNDS: i32 = 10;
    /// `sound`
    pub const GET_NEXT_SOUND: i32 = 11;
    /// `sound, param, val`
    pub const SET_PARAM: i32 = 12;
    /// `sound, param`
    pub const GET_PARAM: i32 = 13;
    /// `sound, param, val, ms`
    pub const FADE_PARAM: i32 = 14;
    /// `sound, hook`
    pub const SET_HOOK: i32 = 15;
    /// `sound`
    pub const GET_HOOK: i32 = 16;
    /// `sound, opcode` (-1 matches anything)
    pub const CHECK_TRIGGER: i32 = 18;
    /// `sound, opcode` (-1 matches anything)
    pub const CLEAR_TRIGGER: i32 = 19;
    /// `ticks, opcode, args...`
    pub const DEFER_COMMAND: i32 = 20;
    /// `sound, priority, buffer id`
    pub const START_STREAM: i32 = 25;
    /// `old sound, new sound, fade ms, flags`
    pub const SWITCH_STREAM: i32 = 26;
    /// No arguments
    pub const PROCESS_STREAMS: i32 = 27;
}

/// A decoded command
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Command {
    /// Stop mixing
    Pause,
    /// Resume mixing
    Resume,
    /// Set or query a group volume
    SetGroupVol {
        /// Group
        group: i32,
        /// Volume, -1 to query
        vol: i32,
    },
    /// Play a resident sound
    StartSound {
        /// Sound
        sound: SoundId,
        /// Priority
        priority: i32,
    },
    /// Stop a sound
    StopSound {
        /// Sound
        sound: SoundId,
    },
    /// Stop every sound
    StopAllSounds,
    /// Lowest playing sound id above `sound` (0: none)
    GetNextSound {
        /// Sound (0: from the start)
        sound: SoundId,
    },
    /// Set a track parameter
    SetParam {
        /// Sound
        sound: SoundId,
        /// Parameter
        param: Param,
        /// Value
        val: i32,
    },
    /// Get a track parameter
    GetParam {
        /// Sound
        sound: SoundId,
        /// Parameter
        param: Param,
    },
    /// Ramp a track parameter
    FadeParam {
        /// Sound
        sound: SoundId,
        /// Parameter
        param: Param,
        /// Destination value
        val: i32,
        /// Length
        ms: u32,
    },
    /// Arm a jump hook
    SetHook {
        /// Sound
        sound: SoundId,
        /// Hook
        hook: i32,
    },
    /// Get the armed jump hook
    GetHook {
        /// Sound
        sound: SoundId,
    },
    /// Count armed triggers
    CheckTrigger {
        /// Sound (`None`: any)
        sound: Option<SoundId>,
        /// Opcode (`None`: any)
        opcode: Option<i32>,
    },
    /// Disarm triggers
    ClearTrigger {
        /// Sound (`None`: any)
        sound: Option<SoundId>,
        /// Opcode (`None`: any)
        opcode: Option<i32>,
    },
    /// Run a command later
    DeferCommand {
        /// 60 Hz ticks to wait
        ticks: Tick,
        /// Command opcode
        opcode: i32,
        /// Its arguments
        args: Args,
    },
    /// Stream a sound through a buffer group
    StartStream {
        /// Sound
        sound: SoundId,
        /// Priority
        priority: i32,
        /// Buffer group
        buf_id: BufferId,
    },
    /// Crossfade a stream into another sound
    SwitchStream {
        /// Sound playing
        old: SoundId,
        /// Sound to switch to
        new: SoundId,
        /// Crossfade length
        fade_ms: u32,
        /// Switch options
        flags: SwitchFlags,
    },
    /// Service the streams
    ProcessStreams,
}

/// Wildcard for trigger queries
const ANY: i32 = -1;

fn wildcard(val: i32) -> Option<i32> {
    (val != ANY).then_some(val)
}

fn param(code: i32) -> DimuseResult<Param> {
    Param::from_code(code).ok_or(DimuseError::ParamOutOfRange)
}

fn non_negative<T: TryFrom<i32>>(val: i32) -> DimuseResult<T> {
    T::try_from(val).map_err(|_| DimuseError::ParamOutOfRange)
}

impl Command {
    /// Decode `opcode` with its arguments
    pub fn parse(opcode: i32, args: &Args) -> DimuseResult<Self> {
        let [a, b, c, d, ..] = *args;
        Ok(match opcode {
            opcode::PAUSE => Self::Pause,
            opcode::RESUME => Self::Resume,
            opcode::SET_GROUP_VOL => Self::SetGroupVol { group: a, vol: b },
            opcode::START_SOUND => Self::StartSound {
                sound: a,
                priority: b,
            },
            opcode::STOP_SOUND => Self::StopSound { sound: a },
            opcode::STOP_ALL_SOUNDS => Self::StopAllSounds,
            opcode::GET_NEXT_SOUND => Self::GetNextSound { sound: a },
            opcode::SET_PARAM => Self::SetParam {
                sound: a,
                param: param(b)?,
                val: c,
            },
            opcode::GET_PARAM => Self::GetParam {
                sound: a,
                param: param(b)?,
            },
            opcode::FADE_PARAM => Self::FadeParam {
                sound: a,
                param: param(b)?,
                val: c,
                ms: non_negative(d)?,
            },
            opcode::SET_HOOK => Self::SetHook { sound: a, hook: b },
            opcode::GET_HOOK => Self::GetHook { sound: a },
            opcode::CHECK_TRIGGER => Self::CheckTrigger {
                sound: wildcard(a),
                opcode: wildcard(b),
            },
            opcode::CLEAR_TRIGGER => Self::ClearTrigger {
                sound: wildcard(a),
                opcode: wildcard(b),
            },
            opcode::DEFER_COMMAND => {
                let mut deferred = [0; TRIGGER_ARGS];
                deferred[..TRIGGER_ARGS - 2].copy_from_slice(&args[2..]);
                Self::DeferCommand {
                    ticks: non_negative(a)?,
                    opcode: b,
                    args: deferred,
                }
            }
            opcode::START_STREAM => Self::StartStream {
                sound: a,
                priority: b,
                buf_id: non_negative(c)?,
            },
            opcode::SWITCH_STREAM => Self::SwitchStream {
                old: a,
                new: b,
                fade_ms: non_negative(c)?,
                flags: SwitchFlags::from_bits_truncate(non_negative(d)?),
            },
            opcode::PROCESS_STREAMS => Self::ProcessStreams,
            _ => return Err(DimuseError::UnknownOpcode(opcode)),
        })
    }
}
