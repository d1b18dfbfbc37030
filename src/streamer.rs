//! Incremental resource-to-ring-buffer feeding for streamed sounds
use {
    crate::{
        SoundId,
        config::Flavor,
        result::{DimuseError, DimuseResult, Pool},
        source::{BufferId, SoundSource},
    },
    arrayvec::ArrayVec,
    ring::{LOAD_GUARD, Ring, RingError},
    std::io::SeekFrom,
};

pub mod ring;

/// Number of streams that can be active at the same time
pub const MAX_STREAMS: usize = 3;

/// Stream index
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub struct StreamIdx(pub u8);
impl StreamIdx {
    /// Get the index as a usize
    #[must_use]
    pub fn usize(self) -> usize {
        usize::from(self.0)
    }
}

/// A ring-buffered stream backed by a sound resource
#[derive(Default, Debug)]
pub struct Stream {
    /// Sound being streamed (0: free slot)
    pub sound: SoundId,
    /// Buffer group the stream reads through
    pub buf_id: BufferId,
    /// Resource offset of the next load
    pub cur_offset: usize,
    /// Size of the resource
    pub end_offset: usize,
    /// Allocated buffer size
    pub buf_size: usize,
    /// Largest single load
    pub load_size: usize,
    /// Buffered amount below which the stream is starved
    pub critical_size: usize,
    /// No more loads happen while paused
    pub paused: bool,
    /// Resource offset whose load ends a VOC loop iteration
    pub loop_trigger: Option<usize>,
    ring: Ring,
}

impl Stream {
    /// Buffered byte count
    #[must_use]
    pub const fn buffered(&self) -> usize {
        self.ring.buffered()
    }
    const fn is_starved(&self) -> bool {
        self.buffered() < self.critical_size
    }
}

/// Snapshot of a stream's state, as reported by [`Streamer::query`]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct StreamStatus {
    /// Allocated buffer size
    pub buf_size: usize,
    /// Starvation threshold
    pub critical_size: usize,
    /// Buffered bytes
    pub buffered: usize,
    /// Whether loading has stopped
    pub paused: bool,
}

/// Something the engine has to react to after a load
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FetchEvent {
    /// The loop trigger of this sound's stream was loaded
    LoopReached(SoundId),
}

/// Owner of the stream pool
#[derive(Default, Debug)]
pub struct Streamer {
    streams: [Stream; MAX_STREAMS],
    last_loaded: Option<StreamIdx>,
}

impl Streamer {
    /// Claim a stream for `sound` in buffer group `buf_id`.
    ///
    /// Fails if the group has no configuration, if its buffer is too small for
    /// reads of `max_read` bytes, if the group is already streaming, or if no
    /// stream slot is free.
    pub fn allocate<S: SoundSource + ?Sized>(
        &mut self,
        src: &mut S,
        sound: SoundId,
        buf_id: BufferId,
        max_read: usize,
        flavor: Flavor,
    ) -> DimuseResult<StreamIdx> {
        let info = src
            .buffer_info(buf_id)
            .ok_or(DimuseError::NoBufferInfo(buf_id))?;
        if info.size / 4 <= max_read {
            log::warn!(
                "Buffer {buf_id} ({} bytes) too small for reads of {max_read} bytes",
                info.size
            );
            return Err(DimuseError::ParamOutOfRange);
        }
        if self
            .streams
            .iter()
            .any(|s| s.sound != 0 && s.buf_id == buf_id)
        {
            log::warn!("Buffer {buf_id} is already streaming");
            return Err(DimuseError::PoolExhausted(Pool::Stream));
        }
        let Some(slot) = self.streams.iter().position(|s| s.sound == 0) else {
            log::warn!("No spare stream for sound {sound}");
            return Err(DimuseError::PoolExhausted(Pool::Stream));
        };
        let guard = if matches!(flavor, Flavor::Voc) {
            0
        } else {
            LOAD_GUARD
        };
        let stream = &mut self.streams[slot];
        stream.sound = sound;
        stream.buf_id = buf_id;
        stream.cur_offset = 0;
        stream.end_offset = src.seek(sound, SeekFrom::End(0), buf_id).unwrap_or(0);
        stream.buf_size = info.size;
        stream.load_size = info.load_size;
        stream.critical_size = info.critical_size;
        stream.paused = false;
        stream.loop_trigger = None;
        stream
            .ring
            .reset(info.size, info.size - max_read - guard, max_read);
        log::debug!("Stream {slot} allocated for sound {sound} in buffer {buf_id}");
        #[expect(clippy::cast_possible_truncation)]
        let idx = StreamIdx(slot as u8);
        Ok(idx)
    }
    /// Give a stream slot back
    pub fn release(&mut self, idx: StreamIdx) {
        self.streams[idx.usize()].sound = 0;
        self.forget_last_loaded(idx);
    }
    /// Release all streams
    pub fn reset(&mut self) {
        for stream in &mut self.streams {
            stream.sound = 0;
        }
        self.last_loaded = None;
    }
    fn forget_last_loaded(&mut self, idx: StreamIdx) {
        if self.last_loaded == Some(idx) {
            self.last_loaded = None;
        }
    }
    /// Access a stream
    #[must_use]
    pub fn stream(&self, idx: StreamIdx) -> &Stream {
        &self.streams[idx.usize()]
    }
    /// Buffered byte count of a stream
    #[must_use]
    pub fn buffered(&self, idx: StreamIdx) -> usize {
        self.streams[idx.usize()].buffered()
    }
    /// Take `len` bytes from the stream's ring
    pub fn get_buffer(&mut self, idx: StreamIdx, len: usize) -> Result<&[u8], RingError> {
        self.streams[idx.usize()].ring.take(len)
    }
    /// Look at `len` bytes `at` bytes past the stream's read position
    pub fn peek(&mut self, idx: StreamIdx, at: usize, len: usize) -> Result<&[u8], RingError> {
        self.streams[idx.usize()].ring.peek_contiguous(at, len)
    }
    /// Discard `amount` bytes at the read position
    pub fn set_read_index(&mut self, idx: StreamIdx, amount: usize) {
        self.streams[idx.usize()].ring.skip(amount);
        self.forget_last_loaded(idx);
    }
    /// Keep `amount` buffered bytes and discard the rest
    pub fn set_load_index(&mut self, idx: StreamIdx, amount: usize) {
        self.streams[idx.usize()].ring.set_load_relative(amount);
        self.forget_last_loaded(idx);
    }
    /// Continue loading `sound` from resource offset `offset`
    pub fn set_sound_from_offset<S: SoundSource + ?Sized>(
        &mut self,
        src: &mut S,
        idx: StreamIdx,
        sound: SoundId,
        offset: usize,
    ) {
        let stream = &mut self.streams[idx.usize()];
        stream.sound = sound;
        stream.cur_offset = offset;
        stream.end_offset = src
            .seek(sound, SeekFrom::End(0), stream.buf_id)
            .unwrap_or(0);
        stream.paused = false;
        self.forget_last_loaded(idx);
    }
    /// Report the loading of `offset` as a [`FetchEvent::LoopReached`]
    pub fn set_loop_flag(&mut self, idx: StreamIdx, offset: usize) {
        self.streams[idx.usize()].loop_trigger = Some(offset);
    }
    /// Stop reporting loop triggers
    pub fn remove_loop_flag(&mut self, idx: StreamIdx) {
        self.streams[idx.usize()].loop_trigger = None;
    }
    /// Status of a stream
    #[must_use]
    pub fn query(&self, idx: StreamIdx) -> StreamStatus {
        let stream = &self.streams[idx.usize()];
        StreamStatus {
            buf_size: stream.buf_size,
            critical_size: stream.critical_size,
            buffered: stream.buffered(),
            paused: stream.paused,
        }
    }
    /// Push externally produced data into a stream.
    ///
    /// If the data doesn't fit, the oldest buffered data is dropped in 12 byte steps.
    pub fn feed(&mut self, idx: StreamIdx, data: &[u8], paused: bool) {
        let stream = &mut self.streams[idx.usize()];
        let room = stream
            .ring
            .free_size()
            .saturating_sub(stream.buffered())
            .saturating_sub(LOAD_GUARD);
        let mut data = data;
        if data.len() > room {
            let overflow = data.len() - room;
            let drop = overflow - overflow % 12 + 12;
            log::warn!("Stream for sound {} overflowed by {overflow} bytes", stream.sound);
            if stream.buffered() >= drop {
                stream.ring.skip(drop);
            }
            let room = stream
                .ring
                .free_size()
                .saturating_sub(stream.buffered())
                .saturating_sub(LOAD_GUARD);
            data = &data[..data.len().min(room)];
        }
        stream.ring.push(data);
        stream.paused = paused;
    }
    /// Service the streams that need data most. Prediction must have run already.
    pub fn process<S: SoundSource + ?Sized>(&mut self, src: &mut S) -> Option<FetchEvent> {
        let mut active: ArrayVec<StreamIdx, MAX_STREAMS> = ArrayVec::new();
        for (i, stream) in self.streams.iter().enumerate() {
            if stream.sound != 0 && !stream.paused {
                #[expect(clippy::cast_possible_truncation)]
                active.push(StreamIdx(i as u8));
            }
        }
        let target = match active.as_slice() {
            [] => return None,
            [only] => *only,
            [a, b] => {
                let (a_starved, b_starved) = (
                    self.streams[a.usize()].is_starved(),
                    self.streams[b.usize()].is_starved(),
                );
                if a_starved != b_starved {
                    if a_starved { *a } else { *b }
                } else if self.last_loaded == Some(*a) {
                    *b
                } else {
                    *a
                }
            }
            [first, ..] => {
                log::warn!("{} streams active at once, servicing the first", active.len());
                *first
            }
        };
        self.fetch(src, target)
    }
    /// Load the next piece of a stream from its resource
    pub fn fetch<S: SoundSource + ?Sized>(
        &mut self,
        src: &mut S,
        idx: StreamIdx,
    ) -> Option<FetchEvent> {
        let stream = &mut self.streams[idx.usize()];
        if stream.cur_offset >= stream.end_offset {
            stream.paused = true;
            return None;
        }
        let mut size = stream
            .ring
            .load_space()
            .min(stream.end_offset - stream.cur_offset)
            .min(stream.load_size);
        if let Some(trigger) = stream.loop_trigger
            && trigger >= stream.cur_offset
        {
            size = size.min(trigger + 1 - stream.cur_offset);
        }
        if size == 0 {
            return None;
        }
        if self.last_loaded != Some(idx) {
            if src
                .seek(stream.sound, SeekFrom::Start(stream.cur_offset as u64), stream.buf_id)
                .is_none()
            {
                log::warn!("Couldn't seek sound {} to {}", stream.sound, stream.cur_offset);
                return None;
            }
            self.last_loaded = Some(idx);
        }
        let read = src.read(stream.sound, stream.ring.load_slice(size), stream.buf_id);
        if read != size {
            log::warn!(
                "Short read for sound {}: got {read} bytes, wanted {size}",
                stream.sound
            );
            self.last_loaded = None;
            return None;
        }
        stream.ring.advance_load(size);
        stream.cur_offset += size;
        if stream.cur_offset >= stream.end_offset {
            stream.paused = true;
        }
        match stream.loop_trigger {
            Some(trigger) if stream.cur_offset == trigger + 1 => {
                Some(FetchEvent::LoopReached(stream.sound))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::source::{BUFFER_MUSIC, BUFFER_SFX, BUFFER_SPEECH, BufferInfo, MemorySource},
    };

    fn source(len: usize) -> MemorySource {
        let mut src = MemorySource::new();
        for id in 1..=4 {
            src.insert(id, (0..=255).cycle().take(len).collect());
        }
        src
    }

    #[test]
    fn test_allocate_limits() {
        let mut src = source(1000);
        let mut streamer = Streamer::default();
        let max = Flavor::Map.stream_max_read();
        let a = streamer.allocate(&mut src, 1, BUFFER_SPEECH, max, Flavor::Map);
        assert!(a.is_ok());
        // Same buffer group twice
        assert_eq!(
            streamer.allocate(&mut src, 2, BUFFER_SPEECH, max, Flavor::Map),
            Err(DimuseError::PoolExhausted(Pool::Stream))
        );
        assert!(
            streamer
                .allocate(&mut src, 2, BUFFER_MUSIC, max, Flavor::Map)
                .is_ok()
        );
        assert_eq!(
            streamer.allocate(&mut src, 3, 9, max, Flavor::Map),
            Err(DimuseError::NoBufferInfo(9))
        );
        src.set_buffer(
            9,
            BufferInfo {
                size: max * 4,
                load_size: 1024,
                critical_size: 1024,
            },
        );
        assert_eq!(
            streamer.allocate(&mut src, 3, 9, max, Flavor::Map),
            Err(DimuseError::ParamOutOfRange)
        );
        assert!(
            streamer
                .allocate(&mut src, 3, BUFFER_SFX, max, Flavor::Map)
                .is_ok()
        );
        assert_eq!(streamer.stream(StreamIdx(1)).sound, 2);
    }

    #[test]
    fn test_fetch_until_end() {
        let mut src = source(10_000);
        src.set_buffer(
            BUFFER_MUSIC,
            BufferInfo {
                size: 8192,
                load_size: 1000,
                critical_size: 2000,
            },
        );
        let mut streamer = Streamer::default();
        let idx = streamer
            .allocate(&mut src, 1, BUFFER_MUSIC, 1024, Flavor::Map)
            .unwrap();
        let mut consumed = 0usize;
        for _ in 0..100 {
            streamer.process(&mut src);
            let buffered = streamer.buffered(idx);
            let take = buffered.min(700);
            let span = streamer.get_buffer(idx, take).unwrap();
            for (i, &b) in span.iter().enumerate() {
                assert_eq!(usize::from(b), (consumed + i) % 256);
            }
            consumed += take;
        }
        assert_eq!(consumed, 10_000);
        assert!(streamer.query(idx).paused);
    }

    #[test]
    fn test_starved_stream_wins() {
        let mut src = source(200_000);
        let mut streamer = Streamer::default();
        let max = 0x800;
        let a = streamer
            .allocate(&mut src, 1, BUFFER_SPEECH, max, Flavor::Map)
            .unwrap();
        let b = streamer
            .allocate(&mut src, 2, BUFFER_MUSIC, max, Flavor::Map)
            .unwrap();
        // Both starved: the first one goes, then the other one by round robin
        streamer.process(&mut src);
        assert!(streamer.buffered(a) > 0);
        assert_eq!(streamer.buffered(b), 0);
        streamer.process(&mut src);
        assert!(streamer.buffered(b) > 0);
        // a is still starved, b got the last load, so a goes again
        let before = streamer.buffered(a);
        streamer.process(&mut src);
        assert!(streamer.buffered(a) > before);
    }

    #[test]
    fn test_feed_overflow_drops_oldest() {
        let mut src = source(1000);
        src.set_buffer(
            BUFFER_SPEECH,
            BufferInfo {
                size: 200,
                load_size: 16,
                critical_size: 16,
            },
        );
        let mut streamer = Streamer::default();
        let idx = streamer
            .allocate(&mut src, 1, BUFFER_SPEECH, 16, Flavor::Map)
            .unwrap();
        // 200 - 16 - 4 = 180 byte ring, 176 usable
        streamer.feed(idx, &[1; 170], true);
        assert_eq!(streamer.buffered(idx), 170);
        streamer.feed(idx, &[2; 20], true);
        // 14 bytes too many: 24 dropped
        assert_eq!(streamer.buffered(idx), 166);
        assert!(streamer.query(idx).paused);
        assert_eq!(streamer.peek(idx, 145, 1).unwrap(), &[1]);
        assert_eq!(streamer.peek(idx, 146, 1).unwrap(), &[2]);
    }
}
