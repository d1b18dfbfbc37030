//! The track pool
use {
    crate::{
        MAX_TRACKS, SoundId,
        dispatch::Dispatch,
        result::{DimuseError, DimuseResult, Pool},
    },
    arrayvec::ArrayVec,
};

/// Number of SYNC blobs kept per track
pub const MAX_SYNCS: usize = 4;
/// Pitch shift meaning "play at the recorded rate"
pub const PITCH_NEUTRAL: i32 = 256;

/// Track index
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub struct TrackIdx(pub u8);
impl TrackIdx {
    /// Get the index as a usize
    #[must_use]
    pub fn usize(self) -> usize {
        usize::from(self.0)
    }
}

/// Parameters accessible through `set_param`/`get_param`
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
#[repr(i32)]
pub enum Param {
    /// 1-based slot of the sound's track, 0 if it isn't playing (read only)
    SoundTrackNum = 0x100,
    /// Number of armed triggers of the sound (read only)
    TrigsSounds = 0x200,
    /// Volume group, 0..16
    Group = 0x400,
    /// 0..=127
    Priority = 0x500,
    /// 0..=127
    Volume = 0x600,
    /// 0..=127, 64 is center
    Pan = 0x700,
    /// Fine tuning in 1/256 semitones
    Detune = 0x800,
    /// Coarse tuning, or absolute pitch shift for pitched sounds
    Transpose = 0x900,
    /// Value reserved to scripts
    Mailbox = 0xA00,
    /// Whether the sound is streamed (read only)
    SoundHasStream = 0x1800,
    /// Buffer group of the sound's stream (read only)
    StreamBufferId = 0x1900,
    /// Playback position in milliseconds (read only)
    SoundPositionMs = 0x1A00,
}

impl Param {
    const ALL: [Self; 12] = [
        Self::SoundTrackNum,
        Self::TrigsSounds,
        Self::Group,
        Self::Priority,
        Self::Volume,
        Self::Pan,
        Self::Detune,
        Self::Transpose,
        Self::Mailbox,
        Self::SoundHasStream,
        Self::StreamBufferId,
        Self::SoundPositionMs,
    ];
    /// Look a parameter up by its numeric code
    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.code() == code)
    }
    /// Numeric code
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }
}

/// One voice
#[derive(Debug)]
pub struct Track {
    /// Sound bound to this track (0: free)
    pub sound: SoundId,
    /// Eviction priority
    pub priority: i32,
    /// Volume as set
    pub vol: i32,
    /// Volume after group scaling
    pub eff_vol: i32,
    /// Stereo position
    pub pan: i32,
    /// Fine tuning
    pub detune: i32,
    /// Coarse tuning
    pub transpose: i32,
    /// Playback rate multiplier, 256 = 1.0
    pub pitch_shift: i32,
    /// Volume group
    pub group: i32,
    /// Script scratch value. Nonzero enables the radio effect.
    pub mailbox: i32,
    /// Armed jump hook
    pub jump_hook: i32,
    /// Lip sync data collected from the sound's SYNC blocks
    pub syncs: [Option<Vec<u8>>; MAX_SYNCS],
    pub(crate) prev: Option<TrackIdx>,
    pub(crate) next: Option<TrackIdx>,
    /// Playback state
    pub dispatch: Dispatch,
}

impl Default for Track {
    fn default() -> Self {
        Self {
            sound: 0,
            priority: 0,
            vol: 127,
            eff_vol: 127,
            pan: 64,
            detune: 0,
            transpose: 0,
            pitch_shift: PITCH_NEUTRAL,
            group: 0,
            mailbox: 0,
            jump_hook: 0,
            syncs: Default::default(),
            prev: None,
            next: None,
            dispatch: Dispatch::default(),
        }
    }
}

impl Track {
    /// Put every parameter back to its default for a new `sound`
    pub fn reset(&mut self, sound: SoundId, priority: i32) {
        let dispatch = std::mem::take(&mut self.dispatch);
        let (prev, next) = (self.prev, self.next);
        *self = Self {
            sound,
            priority,
            dispatch,
            prev,
            next,
            ..Self::default()
        };
    }
    /// Look up lip sync `slot` at `ms` milliseconds into the sound.
    ///
    /// Returns the (width, height) of the latest entry not after `ms`.
    pub fn lip_sync(&self, slot: usize, ms: i32) -> DimuseResult<(i32, i32)> {
        let time = u16::try_from(ms >> 4).map_err(|_| DimuseError::ParamOutOfRange)?;
        let sync = self
            .syncs
            .get(slot)
            .ok_or(DimuseError::ParamOutOfRange)?;
        let Some(sync) = sync else {
            return Ok((0, 0));
        };
        let mut found = (0, 0);
        for entry in sync.chunks_exact(4) {
            let at = u16::from_le_bytes([entry[0], entry[1]]);
            if at > time {
                break;
            }
            let val = i32::from(u16::from_le_bytes([entry[2], entry[3]]));
            found = ((val >> 8) & 0x7F, val & 0x7F);
        }
        Ok(found)
    }
}

/// Fixed track storage plus the list of active tracks, most recent first
#[derive(Debug)]
pub struct TrackPool {
    tracks: Vec<Track>,
    head: Option<TrackIdx>,
}

impl TrackPool {
    /// Pool of `count` tracks (at most [`MAX_TRACKS`])
    #[must_use]
    pub fn new(count: usize) -> Self {
        Self {
            tracks: (0..count.min(MAX_TRACKS)).map(|_| Track::default()).collect(),
            head: None,
        }
    }
    /// Number of slots
    #[must_use]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }
    /// Whether the pool has no slots at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
    /// Track in slot `idx`
    pub fn get(&self, idx: TrackIdx) -> &Track {
        &self.tracks[idx.usize()]
    }
    /// Mutable track in slot `idx`
    pub fn get_mut(&mut self, idx: TrackIdx) -> &mut Track {
        &mut self.tracks[idx.usize()]
    }
    /// Every slot, free or not, in slot order
    pub fn slots(&self) -> impl Iterator<Item = (TrackIdx, &Track)> {
        self.tracks.iter().enumerate().map(|(i, t)| {
            #[expect(clippy::cast_possible_truncation)]
            let idx = TrackIdx(i as u8);
            (idx, t)
        })
    }
    /// Active tracks in list order
    #[must_use]
    pub fn list(&self) -> ArrayVec<TrackIdx, MAX_TRACKS> {
        let mut out = ArrayVec::new();
        let mut cur = self.head;
        while let Some(idx) = cur {
            if out.is_full() {
                log::error!("Track list is cyclic");
                break;
            }
            out.push(idx);
            cur = self.get(idx).next;
        }
        out
    }
    /// Slot playing `sound`
    #[must_use]
    pub fn find(&self, sound: SoundId) -> Option<TrackIdx> {
        if sound == 0 {
            return None;
        }
        self.slots().find(|(_, t)| t.sound == sound).map(|(i, _)| i)
    }
    /// Find a slot for a sound of `priority`, evicting a less important one if need be.
    ///
    /// Returns the slot and the sound evicted from it, if any. An evicted track
    /// stays linked; the caller clears it.
    pub fn reserve(&mut self, priority: i32) -> DimuseResult<(TrackIdx, Option<SoundId>)> {
        if let Some((idx, _)) = self.slots().find(|(_, t)| t.sound == 0) {
            return Ok((idx, None));
        }
        let mut lowest: Option<(TrackIdx, i32)> = None;
        for idx in self.list() {
            let prio = self.get(idx).priority;
            if lowest.is_none_or(|(_, min)| prio < min) {
                lowest = Some((idx, prio));
            }
        }
        match lowest {
            Some((idx, min)) if priority >= min => {
                let sound = self.get(idx).sound;
                log::debug!("Evicting sound {sound} (priority {min}) for priority {priority}");
                Ok((idx, Some(sound)))
            }
            _ => {
                log::warn!("No spare track for priority {priority}");
                Err(DimuseError::PoolExhausted(Pool::Track))
            }
        }
    }
    /// Insert `idx` at the head of the active list
    pub fn link(&mut self, idx: TrackIdx) {
        let old_head = self.head;
        {
            let track = self.get_mut(idx);
            track.prev = None;
            track.next = old_head;
        }
        if let Some(head) = old_head {
            self.get_mut(head).prev = Some(idx);
        }
        self.head = Some(idx);
    }
    /// Remove `idx` from the active list
    pub fn unlink(&mut self, idx: TrackIdx) {
        let (prev, next) = {
            let track = self.get(idx);
            (track.prev, track.next)
        };
        match prev {
            Some(prev) => self.get_mut(prev).next = next,
            None if self.head == Some(idx) => self.head = next,
            None => return,
        }
        if let Some(next) = next {
            self.get_mut(next).prev = prev;
        }
        let track = self.get_mut(idx);
        track.prev = None;
        track.next = None;
    }
    /// Rebuild the list from a sequence of slots, first one at the head
    pub(crate) fn relink(&mut self, order: &[TrackIdx]) {
        self.head = None;
        for &idx in order.iter().rev() {
            self.link(idx);
        }
    }
}
