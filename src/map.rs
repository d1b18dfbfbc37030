//! The MAP metadata embedded in iMUS sound resources.
//!
//! A MAP is a big endian chunk:
//!
//! ```text
//! "MAP " | size | block | block | ...
//! ```
//!
//! where each block is `tag | size - 8 | offset | payload`. The offset is the
//! position in the sound resource at which the block takes effect.
use crate::{
    io::{be_u32_at, write_be_u32},
    result::NavError,
};

const fn tag(code: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*code)
}

const TAG_IMUS: u32 = tag(b"iMUS");
const TAG_MAP: u32 = tag(b"MAP ");
const TAG_DATA: u32 = tag(b"DATA");
const TAG_FRMT: u32 = tag(b"FRMT");
const TAG_REGN: u32 = tag(b"REGN");
const TAG_JUMP: u32 = tag(b"JUMP");
const TAG_SYNC: u32 = tag(b"SYNC");
const TAG_TEXT: u32 = tag(b"TEXT");
const TAG_STOP: u32 = tag(b"STOP");

/// Size of the `iMUS` header preceding the MAP, plus the `DATA` header following it
const RESOURCE_OVERHEAD: usize = 16;

/// A conditional seek to another offset
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Jump {
    /// Offset at which the jump is taken
    pub hook_pos: u32,
    /// Offset to continue at
    pub dest: u32,
    /// Hook the track must have armed for the jump to be taken (0: always)
    pub hook_id: i32,
    /// Crossfade length
    pub fade_ms: u32,
}

/// One MAP block
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Block {
    /// Audio format of the following regions
    Format {
        /// Block offset
        offset: u32,
        /// Unused field, preserved for round-tripping
        reserved: u32,
        /// 8, 12 or 16
        word_size: u32,
        /// Sample rate
        rate: u32,
        /// Channel count
        channels: u32,
    },
    /// A span of raw audio
    Region {
        /// Start of the audio
        offset: u32,
        /// Length of the audio in bytes
        length: u32,
    },
    /// Conditional seek
    Jump(Jump),
    /// Lip sync data
    Sync {
        /// Block offset
        offset: u32,
        /// Raw sync entries
        data: Vec<u8>,
    },
    /// Marker text
    Text {
        /// Block offset
        offset: u32,
        /// Raw payload (NUL terminated string, possibly padded)
        text: Vec<u8>,
    },
    /// End of the sound
    Stop {
        /// Block offset
        offset: u32,
    },
    /// Block the engine doesn't know. Navigating onto it is an error.
    Unknown {
        /// Block tag
        tag: u32,
        /// Block offset
        offset: u32,
        /// Raw payload
        payload: Vec<u8>,
    },
}

impl Block {
    /// The resource offset this block takes effect at
    #[must_use]
    pub const fn offset(&self) -> u32 {
        match self {
            Self::Format { offset, .. }
            | Self::Region { offset, .. }
            | Self::Sync { offset, .. }
            | Self::Text { offset, .. }
            | Self::Stop { offset }
            | Self::Unknown { offset, .. } => *offset,
            Self::Jump(jump) => jump.hook_pos,
        }
    }
    const fn tag(&self) -> u32 {
        match self {
            Self::Format { .. } => TAG_FRMT,
            Self::Region { .. } => TAG_REGN,
            Self::Jump(_) => TAG_JUMP,
            Self::Sync { .. } => TAG_SYNC,
            Self::Text { .. } => TAG_TEXT,
            Self::Stop { .. } => TAG_STOP,
            Self::Unknown { tag, .. } => *tag,
        }
    }
    /// Payload size following the offset field
    const fn payload_len(&self) -> usize {
        match self {
            Self::Format { .. } => 16,
            Self::Region { .. } => 4,
            Self::Jump(_) => 12,
            Self::Stop { .. } => 0,
            Self::Sync { data, .. } => data.len(),
            Self::Text { text, .. } => text.len(),
            Self::Unknown { payload, .. } => payload.len(),
        }
    }
    /// The marker string of a `TEXT` block, up to its terminator
    #[must_use]
    pub fn marker(&self) -> Option<&[u8]> {
        let Self::Text { text, .. } = self else {
            return None;
        };
        let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
        Some(&text[..end])
    }
    fn parse(tag: u32, offset: u32, payload: &[u8]) -> Result<Self, NavError> {
        let field = |idx: usize| be_u32_at(payload, idx * 4).ok_or(NavError::Inconsistent);
        let exact = |len: usize| {
            if payload.len() == len {
                Ok(())
            } else {
                Err(NavError::Inconsistent)
            }
        };
        Ok(match tag {
            TAG_FRMT => {
                exact(16)?;
                Self::Format {
                    offset,
                    reserved: field(0)?,
                    word_size: field(1)?,
                    rate: field(2)?,
                    channels: field(3)?,
                }
            }
            TAG_REGN => {
                exact(4)?;
                Self::Region {
                    offset,
                    length: field(0)?,
                }
            }
            TAG_JUMP => {
                exact(12)?;
                Self::Jump(Jump {
                    hook_pos: offset,
                    dest: field(0)?,
                    hook_id: field(1)?.cast_signed(),
                    fade_ms: field(2)?,
                })
            }
            TAG_STOP => {
                exact(0)?;
                Self::Stop { offset }
            }
            TAG_SYNC => Self::Sync {
                offset,
                data: payload.to_vec(),
            },
            TAG_TEXT => Self::Text {
                offset,
                text: payload.to_vec(),
            },
            _ => Self::Unknown {
                tag,
                offset,
                payload: payload.to_vec(),
            },
        })
    }
    #[expect(clippy::cast_possible_truncation)]
    fn write(&self, out: &mut Vec<u8>) {
        write_be_u32(out, self.tag());
        write_be_u32(out, (self.payload_len() + 4) as u32);
        write_be_u32(out, self.offset());
        match self {
            Self::Format {
                reserved,
                word_size,
                rate,
                channels,
                ..
            } => {
                for val in [*reserved, *word_size, *rate, *channels] {
                    write_be_u32(out, val);
                }
            }
            Self::Region { length, .. } => write_be_u32(out, *length),
            Self::Jump(jump) => {
                write_be_u32(out, jump.dest);
                write_be_u32(out, jump.hook_id.cast_unsigned());
                write_be_u32(out, jump.fade_ms);
            }
            Self::Stop { .. } => {}
            Self::Sync { data: raw, .. }
            | Self::Text { text: raw, .. }
            | Self::Unknown { payload: raw, .. } => out.extend_from_slice(raw),
        }
    }
}

/// A parsed MAP, in host representation
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct SoundMap {
    /// The blocks in resource order
    pub blocks: Vec<Block>,
}

impl SoundMap {
    /// Parse a MAP chunk starting at its `MAP ` tag.
    ///
    /// Maps larger than `max_size` bytes are rejected.
    pub fn parse(raw: &[u8], max_size: usize) -> Result<Self, NavError> {
        if be_u32_at(raw, 0) != Some(TAG_MAP) {
            return Err(NavError::BadHeader);
        }
        let size = be_u32_at(raw, 4).ok_or(NavError::BadHeader)? as usize + 8;
        if size > max_size {
            return Err(NavError::Oversized);
        }
        let raw = raw.get(..size).ok_or(NavError::Inconsistent)?;
        let mut blocks = Vec::new();
        let mut pos = 8;
        while pos < size {
            let (Some(tag), Some(len)) = (be_u32_at(raw, pos), be_u32_at(raw, pos + 4)) else {
                return Err(NavError::Inconsistent);
            };
            let end = pos + 8 + len as usize;
            if len < 4 || end > size {
                return Err(NavError::Inconsistent);
            }
            let offset = be_u32_at(raw, pos + 8).ok_or(NavError::Inconsistent)?;
            blocks.push(Block::parse(tag, offset, &raw[pos + 12..end])?);
            pos = end;
        }
        Ok(Self { blocks })
    }
    /// Parse the MAP of a whole iMUS resource (or a prefix of it).
    ///
    /// Returns the map along with the offset at which audio data starts.
    pub fn parse_resource(res: &[u8], max_size: usize) -> Result<(Self, usize), NavError> {
        let data_offset = resource_header_size(res).ok_or(NavError::BadHeader)?;
        let map = Self::parse(res.get(8..).ok_or(NavError::BadHeader)?, max_size)?;
        map.check_format(data_offset)?;
        Ok((map, data_offset))
    }
    /// The first block must be a `FRMT` block located where the audio data starts
    pub fn check_format(&self, data_offset: usize) -> Result<(), NavError> {
        match self.blocks.first() {
            Some(Block::Format { offset, .. }) if *offset as usize == data_offset => Ok(()),
            _ => Err(NavError::MissingFormat),
        }
    }
    /// Size of the serialized MAP chunk
    #[must_use]
    pub fn byte_size(&self) -> usize {
        8 + self
            .blocks
            .iter()
            .map(|blk| 12 + blk.payload_len())
            .sum::<usize>()
    }
    /// Offset at which audio starts in a resource built by [`Self::to_resource`]
    #[must_use]
    pub fn data_offset(&self) -> usize {
        self.byte_size() + RESOURCE_OVERHEAD
    }
    /// Serialize back to the big endian MAP chunk
    #[must_use]
    #[expect(clippy::cast_possible_truncation)]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.byte_size());
        write_be_u32(&mut out, TAG_MAP);
        write_be_u32(&mut out, (self.byte_size() - 8) as u32);
        for blk in &self.blocks {
            blk.write(&mut out);
        }
        out
    }
    /// Build a complete iMUS resource out of this MAP and the audio data
    #[must_use]
    #[expect(clippy::cast_possible_truncation)]
    pub fn to_resource(&self, audio: &[u8]) -> Vec<u8> {
        let map = self.to_bytes();
        let mut out = Vec::with_capacity(map.len() + RESOURCE_OVERHEAD + audio.len());
        write_be_u32(&mut out, TAG_IMUS);
        write_be_u32(&mut out, (map.len() + 8 + audio.len()) as u32);
        out.extend_from_slice(&map);
        write_be_u32(&mut out, TAG_DATA);
        write_be_u32(&mut out, audio.len() as u32);
        out.extend_from_slice(audio);
        out
    }
    /// Index of the first block at `offset`
    #[must_use]
    pub fn first_event_at(&self, offset: usize) -> Option<usize> {
        self.blocks
            .iter()
            .position(|blk| blk.offset() as usize == offset)
    }
    /// Index of the block following `idx`, if it is still at `offset`
    #[must_use]
    pub fn next_event_at(&self, idx: usize, offset: usize) -> Option<usize> {
        let next = idx + 1;
        let blk = self.blocks.get(next)?;
        (blk.offset() as usize == offset).then_some(next)
    }
    /// Find an eligible jump whose hook lies inside `(start, end]`.
    ///
    /// `hook` is the candidate hook id, consumed as by [`check_hook`].
    #[must_use]
    pub fn find_jump(&self, start: usize, end: usize, hook: &mut i32) -> Option<Jump> {
        self.blocks.iter().find_map(|blk| match blk {
            Block::Jump(jump)
                if (jump.hook_pos as usize) > start
                    && (jump.hook_pos as usize) <= end
                    && check_hook(hook, jump.hook_id) =>
            {
                Some(*jump)
            }
            _ => None,
        })
    }
}

/// Hook id that suppresses the next unconditional jump
pub const HOOK_SUPPRESS: i32 = 128;

/// Decide whether a jump with `jump_hook` is taken for a track armed with `track_hook`.
///
/// A matching nonzero hook is consumed. An unconditional jump (hook 0) is always taken,
/// unless the track hook is [`HOOK_SUPPRESS`], which is consumed instead.
pub fn check_hook(track_hook: &mut i32, jump_hook: i32) -> bool {
    if jump_hook != 0 {
        if *track_hook == jump_hook {
            *track_hook = 0;
            return true;
        }
        return false;
    }
    if *track_hook == HOOK_SUPPRESS {
        *track_hook = 0;
        return false;
    }
    true
}

/// If `res` starts with an iMUS/MAP header, the offset at which its audio data starts
#[must_use]
pub fn resource_header_size(res: &[u8]) -> Option<usize> {
    if be_u32_at(res, 0)? != TAG_IMUS || be_u32_at(res, 8)? != TAG_MAP {
        return None;
    }
    Some(be_u32_at(res, 12)? as usize + 24)
}

#[cfg(test)]
mod tests {
    use super::*;

    pub fn fmt(offset: u32, word_size: u32, rate: u32, channels: u32) -> Block {
        Block::Format {
            offset,
            reserved: 0,
            word_size,
            rate,
            channels,
        }
    }

    fn sample_map() -> SoundMap {
        SoundMap {
            blocks: vec![
                fmt(24, 16, 22_050, 2),
                Block::Text {
                    offset: 24,
                    text: b"intro\0\0\0".to_vec(),
                },
                Block::Region {
                    offset: 24,
                    length: 4096,
                },
                Block::Jump(Jump {
                    hook_pos: 4120,
                    dest: 24,
                    hook_id: 3,
                    fade_ms: 60,
                }),
                Block::Sync {
                    offset: 4120,
                    data: vec![0, 1, 2, 3],
                },
                Block::Region {
                    offset: 4120,
                    length: 100,
                },
                Block::Stop { offset: 4220 },
            ],
        }
    }

    #[test]
    fn test_map_round_trip() {
        let map = sample_map();
        let bytes = map.to_bytes();
        assert_eq!(bytes.len(), map.byte_size());
        let parsed = SoundMap::parse(&bytes, 0x400).unwrap();
        assert_eq!(parsed, map);
        assert_eq!(parsed.to_bytes(), bytes);
        assert_eq!(parsed.blocks[1].marker(), Some(&b"intro"[..]));
    }

    #[test]
    fn test_map_size_limit() {
        let bytes = sample_map().to_bytes();
        assert_eq!(
            SoundMap::parse(&bytes, bytes.len() - 1),
            Err(NavError::Oversized)
        );
        let mut truncated = bytes.clone();
        truncated[7] += 4;
        truncated.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(
            SoundMap::parse(&truncated, 0x400),
            Err(NavError::Inconsistent)
        );
        assert_eq!(SoundMap::parse(b"NOPE", 0x400), Err(NavError::BadHeader));
    }

    #[test]
    fn test_event_lookup() {
        let map = sample_map();
        // Every region offset is reachable, and the walk at that offset ends on the region
        for (idx, blk) in map.blocks.iter().enumerate() {
            let Block::Region { offset, .. } = blk else {
                continue;
            };
            let off = *offset as usize;
            let mut cur = map.first_event_at(off).unwrap();
            while cur != idx {
                cur = map.next_event_at(cur, off).unwrap();
            }
        }
        assert_eq!(map.first_event_at(25), None);
        assert_eq!(map.next_event_at(6, 4220), None);
    }

    #[test]
    fn test_hook_rules() {
        let mut hook = 0;
        assert!(check_hook(&mut hook, 0));
        assert!(!check_hook(&mut hook, 5));
        hook = 5;
        assert!(check_hook(&mut hook, 5));
        assert_eq!(hook, 0);
        hook = HOOK_SUPPRESS;
        assert!(!check_hook(&mut hook, 0));
        assert_eq!(hook, 0);
        assert!(check_hook(&mut hook, 0));
    }

    #[test]
    fn test_find_jump_window() {
        let map = sample_map();
        let mut hook = 3;
        assert_eq!(map.find_jump(4120, 5000, &mut hook), None);
        assert_eq!(hook, 3);
        let jump = map.find_jump(24, 4120, &mut hook).unwrap();
        assert_eq!(jump.dest, 24);
        assert_eq!(hook, 0);
    }

    #[test]
    fn test_resource_header() {
        let mut map = sample_map();
        let data_offset = map.data_offset() as u32;
        map.blocks[0] = fmt(data_offset, 8, 11_025, 1);
        let res = map.to_resource(&[0x80; 16]);
        assert_eq!(resource_header_size(&res), Some(data_offset as usize));
        let (parsed, off) = SoundMap::parse_resource(&res, 0x400).unwrap();
        assert_eq!(off, data_offset as usize);
        assert_eq!(parsed, map);
    }
}
