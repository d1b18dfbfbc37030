#![doc = include_str!("../README.md")]
// When we return an error type, the possible errors are encoded within it.
#![allow(clippy::missing_errors_doc)]

pub mod command;
mod config;
mod dispatch;
mod engine;
mod fades;
mod groups;
mod imuse;
mod io;
mod map;
mod mixer;
mod result;
mod source;
mod streamer;
pub mod timing;
mod track;
mod triggers;
mod voc;

pub use {
    command::Command,
    config::{DEFAULT_TRACK_COUNT, EngineConfig, Flavor, LOW_LATENCY_TRACK_COUNT},
    dispatch::{Dispatch, FADE_VOL_MAX, MAX_SWITCH_FADE_MS, SwitchFlags},
    engine::{Engine, MAX_DETUNE, MAX_PITCH_SHIFT, MAX_TRANSPOSE, ScriptEvent},
    fades::MAX_FADES,
    groups::{
        GROUP_MASTER, GROUP_MUSIC, GROUP_MUSIC_EFFECT, GROUP_SFX, GROUP_SPEECH, Groups, MAX_GROUPS,
    },
    imuse::{Imuse, ScriptHost},
    map::{Block, HOOK_SUPPRESS, Jump, SoundMap},
    result::{DimuseError, DimuseResult, NavError, Pool},
    source::{BUFFER_MUSIC, BUFFER_SFX, BUFFER_SPEECH, BufferId, BufferInfo, MemorySource, SoundSource},
    streamer::{MAX_STREAMS, StreamStatus},
    track::{MAX_SYNCS, Param, Track, TrackIdx, TrackPool},
    triggers::{Args, MAX_DEFERS, MAX_TRIGGERS, Marker, TRIGGER_ARGS},
};

/// Sound identifier as used by the game scripts (0: none)
pub type SoundId = i32;

/// Sample rate in Hz
pub type SampleRate = u32;

/// Upper bound of the track pool
pub const MAX_TRACKS: usize = 8;

/// Channel number (mono or stereo)
#[derive(Default, Clone, Copy, PartialEq, Eq, Debug)]
pub enum ChNum {
    /// Monaural, one channel
    #[default]
    Mono = 1,
    /// Stereo, two channels
    Stereo = 2,
}

/// Bits per sample
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Bps {
    /// 8 bits per sample
    #[default]
    B8 = 8,
    /// 16 bits per sample (little endian)
    B16 = 16,
}

#[cfg(target_endian = "big")]
const _: () = panic!("Only little endian architectures are supported currently.");
