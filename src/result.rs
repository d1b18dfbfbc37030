use thiserror::Error;

/// Fixed pool that ran out of free slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool {
    /// Playback tracks
    Track,
    /// Ring-buffered streams
    Stream,
    /// Stream zones (buffered span bookkeeping)
    Zone,
    /// Crossfade sample buffers
    FadeBuffer,
    /// Parameter fades
    Fade,
    /// Marker triggers
    Trigger,
    /// Deferred commands
    Defer,
}

/// Reason a sound's MAP could not be walked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavError {
    /// The resource does not start with an `iMUS`/`MAP ` header
    BadHeader,
    /// The MAP is larger than this engine flavor accepts
    Oversized,
    /// Block sizes don't add up to the declared MAP size
    Inconsistent,
    /// The first block is not `FRMT`, or data doesn't follow the MAP
    MissingFormat,
    /// No block is recorded at the current playback offset
    NoEvent,
    /// A `REGN` block doesn't start at the current playback offset
    RegionMismatch,
    /// Block tag the engine doesn't understand
    UnknownBlock,
    /// Navigation was asked for while audio of the current region remains
    AudioPending,
    /// The stream's head zone disagrees with the playback offset
    ZoneMismatch,
    /// Playback offset is nonzero but the MAP was never loaded
    NoMap,
    /// The sound stopped before reaching any audio
    EndOfSound,
}

/// Errors the engine can report. None of them are fatal to the engine as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DimuseError {
    /// A fixed pool had no free slot
    #[error("{0:?} pool exhausted")]
    PoolExhausted(Pool),
    /// MAP navigation or format error; fatal to the affected track only
    #[error("Navigation error: {0:?}")]
    Navigation(NavError),
    /// Parameter value outside its documented bound
    #[error("Parameter out of range")]
    ParamOutOfRange,
    /// Opcode not understood by this entry point
    #[error("Unknown opcode: {0:#x}")]
    UnknownOpcode(i32),
    /// No track is playing the requested sound
    #[error("Sound not found")]
    SoundNotFound,
    /// The sound is already bound to a track
    #[error("Sound already playing")]
    AlreadyPlaying,
    /// Stream reads could not keep up with playback
    #[error("Stream underrun")]
    StreamUnderrun,
    /// The resource collaborator has no buffer configuration for this buffer id
    #[error("No buffer info for buffer {0}")]
    NoBufferInfo(u8),
    /// Malformed VOC chunk stream
    #[error("Invalid VOC data")]
    InvalidVoc,
    /// Low level data read error (premature end of data)
    #[error("Data read error")]
    Data,
    /// Save data has the wrong magic or an unsupported version
    #[error("Bad save data")]
    BadSaveData,
}

impl From<NavError> for DimuseError {
    fn from(err: NavError) -> Self {
        Self::Navigation(err)
    }
}

/// Result of an engine operation
pub type DimuseResult<T = ()> = Result<T, DimuseError>;
