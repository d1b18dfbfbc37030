//! Fixed pools shared by all dispatches: stream zones and crossfade buffers
use std::ops::{Index, IndexMut};

/// Number of stream zones shared by all dispatches
pub const MAX_ZONES: usize = 50;
/// Number of large crossfade buffers
pub const LARGE_FADES: usize = 4;
/// Number of small crossfade buffers
pub const SMALL_FADES: usize = 16;
/// Size of a large crossfade buffer
pub const LARGE_FADE_SIZE: usize = 350_000;
/// Size of a small crossfade buffer
pub const SMALL_FADE_SIZE: usize = 44_100;

/// A contiguous span of a sound that sits in a stream's ring buffer
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct Zone {
    /// Resource offset the span starts at
    pub offset: usize,
    /// Buffered length
    pub size: usize,
    /// The span is pre-jump audio kept for a crossfade
    pub fade: bool,
}

/// Zone index
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ZoneIdx(u8);

/// Storage for every zone of every dispatch
pub struct ZonePool {
    zones: [Zone; MAX_ZONES],
    used: [bool; MAX_ZONES],
}

impl Default for ZonePool {
    fn default() -> Self {
        Self {
            zones: [Zone::default(); MAX_ZONES],
            used: [false; MAX_ZONES],
        }
    }
}

impl ZonePool {
    /// Claim a zone
    #[expect(clippy::cast_possible_truncation)]
    pub fn alloc(&mut self, zone: Zone) -> Option<ZoneIdx> {
        let Some(slot) = self.used.iter().position(|used| !used) else {
            log::warn!("Out of stream zones");
            return None;
        };
        self.used[slot] = true;
        self.zones[slot] = zone;
        Some(ZoneIdx(slot as u8))
    }
    /// Return zone `idx` to the pool
    pub fn free(&mut self, idx: ZoneIdx) {
        self.used[usize::from(idx.0)] = false;
    }
    /// Free zones left
    pub fn available(&self) -> usize {
        self.used.iter().filter(|used| !**used).count()
    }
    /// Forget every zone
    pub fn reset(&mut self) {
        self.used = [false; MAX_ZONES];
    }
}

impl Index<ZoneIdx> for ZonePool {
    type Output = Zone;

    fn index(&self, idx: ZoneIdx) -> &Zone {
        &self.zones[usize::from(idx.0)]
    }
}

impl IndexMut<ZoneIdx> for ZonePool {
    fn index_mut(&mut self, idx: ZoneIdx) -> &mut Zone {
        &mut self.zones[usize::from(idx.0)]
    }
}

/// Handle of a crossfade buffer
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FadeBufIdx {
    /// One of the [`LARGE_FADES`]
    Large(u8),
    /// One of the [`SMALL_FADES`]
    Small(u8),
}

/// Preallocated crossfade buffers
pub struct FadeBufPool {
    large: Vec<Vec<u8>>,
    small: Vec<Vec<u8>>,
    large_used: [bool; LARGE_FADES],
    small_used: [bool; SMALL_FADES],
}

impl Default for FadeBufPool {
    fn default() -> Self {
        Self {
            large: vec![vec![0; LARGE_FADE_SIZE]; LARGE_FADES],
            small: vec![vec![0; SMALL_FADE_SIZE]; SMALL_FADES],
            large_used: [false; LARGE_FADES],
            small_used: [false; SMALL_FADES],
        }
    }
}

impl FadeBufPool {
    /// Claim a buffer for a fade of `size` bytes.
    ///
    /// Returns the buffer along with the size it can actually hold.
    #[expect(clippy::cast_possible_truncation)]
    pub fn alloc(&mut self, size: usize) -> Option<(FadeBufIdx, usize)> {
        let mut size = size;
        if size > LARGE_FADE_SIZE {
            log::debug!("Requested fade too large ({size})");
            size = LARGE_FADE_SIZE;
        }
        if size > SMALL_FADE_SIZE
            && let Some(slot) = self.large_used.iter().position(|used| !used)
        {
            self.large_used[slot] = true;
            return Some((FadeBufIdx::Large(slot as u8), size));
        }
        let Some(slot) = self.small_used.iter().position(|used| !used) else {
            log::warn!("Couldn't allocate a fade buffer of {size} bytes");
            return None;
        };
        self.small_used[slot] = true;
        Some((FadeBufIdx::Small(slot as u8), size.min(SMALL_FADE_SIZE)))
    }
    pub fn release(&mut self, idx: FadeBufIdx) {
        let used = match idx {
            FadeBufIdx::Large(i) => &mut self.large_used[usize::from(i)],
            FadeBufIdx::Small(i) => &mut self.small_used[usize::from(i)],
        };
        if !*used {
            log::warn!("Redundant release of fade buffer {idx:?}");
        }
        *used = false;
    }
    pub fn data(&self, idx: FadeBufIdx) -> &[u8] {
        match idx {
            FadeBufIdx::Large(i) => &self.large[usize::from(i)],
            FadeBufIdx::Small(i) => &self.small[usize::from(i)],
        }
    }
    pub fn data_mut(&mut self, idx: FadeBufIdx) -> &mut [u8] {
        match idx {
            FadeBufIdx::Large(i) => &mut self.large[usize::from(i)],
            FadeBufIdx::Small(i) => &mut self.small[usize::from(i)],
        }
    }
    /// Forget every allocation
    pub fn reset(&mut self) {
        self.large_used = [false; LARGE_FADES];
        self.small_used = [false; SMALL_FADES];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fade_buffer_fallback() {
        let mut pool = FadeBufPool::default();
        assert_eq!(pool.alloc(100), Some((FadeBufIdx::Small(0), 100)));
        assert_eq!(
            pool.alloc(LARGE_FADE_SIZE + 1),
            Some((FadeBufIdx::Large(0), LARGE_FADE_SIZE))
        );
        for i in 1..LARGE_FADES {
            assert!(matches!(pool.alloc(50_000), Some((FadeBufIdx::Large(n), 50_000)) if usize::from(n) == i));
        }
        // Large buffers exhausted: a small one, clamped
        assert_eq!(
            pool.alloc(50_000),
            Some((FadeBufIdx::Small(1), SMALL_FADE_SIZE))
        );
        pool.release(FadeBufIdx::Large(2));
        assert_eq!(pool.alloc(50_000), Some((FadeBufIdx::Large(2), 50_000)));
        for _ in 2..SMALL_FADES {
            assert!(pool.alloc(10).is_some());
        }
        assert_eq!(pool.alloc(10), None);
    }

    #[test]
    fn test_zone_pool_exhaustion() {
        let mut pool = ZonePool::default();
        let zones: Vec<ZoneIdx> = (0..MAX_ZONES)
            .map(|i| {
                pool.alloc(Zone {
                    offset: i,
                    ..Zone::default()
                })
                .unwrap()
            })
            .collect();
        assert_eq!(pool.available(), 0);
        assert_eq!(pool.alloc(Zone::default()), None);
        pool.free(zones[7]);
        let again = pool.alloc(Zone {
            offset: 99,
            size: 3,
            fade: true,
        });
        assert_eq!(again, Some(zones[7]));
        assert_eq!(pool[zones[7]].offset, 99);
    }
}
