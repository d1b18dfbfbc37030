//! The boundary between the engine and whatever holds the sound resources
use {
    crate::SoundId,
    std::{collections::HashMap, io::SeekFrom},
};

/// Buffer group a stream is fed through
pub type BufferId = u8;

/// Speech buffer group
pub const BUFFER_SPEECH: BufferId = 1;
/// Music buffer group
pub const BUFFER_MUSIC: BufferId = 2;
/// Sound effect buffer group
pub const BUFFER_SFX: BufferId = 3;

/// Ring buffer configuration of a buffer group
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BufferInfo {
    /// Allocated size of the ring buffer, including the compaction slack
    pub size: usize,
    /// Largest amount read from the resource in one go
    pub load_size: usize,
    /// Buffered amount below which the stream is considered starved
    pub critical_size: usize,
}

/// Provider of sound resource data.
///
/// Streamed sounds are read incrementally through [`seek`](Self::seek) and
/// [`read`](Self::read). Resident sounds are accessed all at once through
/// [`sound_data`](Self::sound_data), and are pinned between
/// [`open_sound`](Self::open_sound) and [`close_sound`](Self::close_sound).
pub trait SoundSource {
    /// Pin a resident sound. Returns false if the sound doesn't exist.
    fn open_sound(&mut self, sound: SoundId) -> bool;
    /// Release a pin taken by [`open_sound`](Self::open_sound)
    fn close_sound(&mut self, sound: SoundId);
    /// Position the read cursor of `sound` in buffer group `buf`.
    ///
    /// Returns the new absolute position.
    fn seek(&mut self, sound: SoundId, pos: SeekFrom, buf: BufferId) -> Option<usize>;
    /// Read at the cursor. Returns the amount of bytes read.
    fn read(&mut self, sound: SoundId, dst: &mut [u8], buf: BufferId) -> usize;
    /// Entire data of a resident sound
    fn sound_data(&self, sound: SoundId) -> Option<&[u8]>;
    /// Ring buffer configuration of buffer group `buf`
    fn buffer_info(&self, buf: BufferId) -> Option<BufferInfo>;
}

/// In-memory [`SoundSource`].
///
/// Every sound can be accessed both as a stream and as a resident sound.
#[derive(Default)]
pub struct MemorySource {
    sounds: HashMap<SoundId, Vec<u8>>,
    buffers: HashMap<BufferId, BufferInfo>,
    cursors: HashMap<(SoundId, BufferId), usize>,
    pins: HashMap<SoundId, u32>,
}

impl MemorySource {
    /// Source with the usual music, speech and sfx buffer groups
    #[must_use]
    pub fn new() -> Self {
        let mut src = Self::default();
        src.set_buffer(
            BUFFER_SPEECH,
            BufferInfo {
                size: 110_592,
                load_size: 22_528,
                critical_size: 44_032,
            },
        );
        src.set_buffer(
            BUFFER_MUSIC,
            BufferInfo {
                size: 176_128,
                load_size: 44_032,
                critical_size: 88_064,
            },
        );
        src.set_buffer(
            BUFFER_SFX,
            BufferInfo {
                size: 198_656,
                load_size: 22_528,
                critical_size: 44_032,
            },
        );
        src
    }
    /// Add or replace a sound
    pub fn insert(&mut self, sound: SoundId, data: Vec<u8>) {
        self.sounds.insert(sound, data);
    }
    /// Configure buffer group `buf`
    pub fn set_buffer(&mut self, buf: BufferId, info: BufferInfo) {
        self.buffers.insert(buf, info);
    }
    /// Number of outstanding [`SoundSource::open_sound`] pins of `sound`
    #[must_use]
    pub fn pin_count(&self, sound: SoundId) -> u32 {
        self.pins.get(&sound).copied().unwrap_or(0)
    }
}

impl SoundSource for MemorySource {
    fn open_sound(&mut self, sound: SoundId) -> bool {
        if !self.sounds.contains_key(&sound) {
            return false;
        }
        *self.pins.entry(sound).or_insert(0) += 1;
        true
    }

    fn close_sound(&mut self, sound: SoundId) {
        if let Some(pins) = self.pins.get_mut(&sound) {
            *pins = pins.saturating_sub(1);
        }
    }

    fn seek(&mut self, sound: SoundId, pos: SeekFrom, buf: BufferId) -> Option<usize> {
        let len = self.sounds.get(&sound)?.len();
        let cursor = self.cursors.entry((sound, buf)).or_insert(0);
        let new = match pos {
            SeekFrom::Start(off) => usize::try_from(off).ok()?,
            SeekFrom::End(off) => len.checked_add_signed(isize::try_from(off).ok()?)?,
            SeekFrom::Current(off) => cursor.checked_add_signed(isize::try_from(off).ok()?)?,
        };
        *cursor = new.min(len);
        Some(*cursor)
    }

    fn read(&mut self, sound: SoundId, dst: &mut [u8], buf: BufferId) -> usize {
        let Some(data) = self.sounds.get(&sound) else {
            return 0;
        };
        let cursor = self.cursors.entry((sound, buf)).or_insert(0);
        let src = data.get(*cursor..).unwrap_or_default();
        let amount = src.len().min(dst.len());
        dst[..amount].copy_from_slice(&src[..amount]);
        *cursor += amount;
        amount
    }

    fn sound_data(&self, sound: SoundId) -> Option<&[u8]> {
        self.sounds.get(&sound).map(Vec::as_slice)
    }

    fn buffer_info(&self, buf: BufferId) -> Option<BufferInfo> {
        self.buffers.get(&buf).copied()
    }
}

#[test]
fn test_memory_source_cursor() {
    let mut src = MemorySource::new();
    src.insert(3, (0..10).collect());
    assert_eq!(src.seek(3, SeekFrom::End(0), BUFFER_MUSIC), Some(10));
    assert_eq!(src.seek(3, SeekFrom::Start(4), BUFFER_MUSIC), Some(4));
    let mut dst = [0; 8];
    assert_eq!(src.read(3, &mut dst, BUFFER_MUSIC), 6);
    assert_eq!(&dst[..6], &[4, 5, 6, 7, 8, 9]);
    // Cursors are per buffer group
    assert_eq!(src.read(3, &mut dst[..2], BUFFER_SFX), 2);
    assert_eq!(&dst[..2], &[0, 1]);
    assert!(src.open_sound(3));
    assert!(!src.open_sound(4));
    assert_eq!(src.pin_count(3), 1);
    src.close_sound(3);
    assert_eq!(src.pin_count(3), 0);
}
