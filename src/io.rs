use crate::result::DimuseError;

pub struct Reader<'a> {
    pub data: &'a [u8],
    pub cur: usize,
}

#[derive(Debug)]
pub struct ReadError;

impl From<ReadError> for DimuseError {
    fn from(ReadError: ReadError) -> Self {
        Self::Data
    }
}

impl<'a> Reader<'a> {
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, cur: 0 }
    }
    /// Read a plain value in native (little endian) byte order
    pub fn next<T: bytemuck::AnyBitPattern>(&mut self) -> Result<T, ReadError> {
        let amount = size_of::<T>();
        let bytes = self.data.get(self.cur..self.cur + amount).ok_or(ReadError)?;
        self.cur += amount;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }
    pub fn next_be_u32(&mut self) -> Result<u32, ReadError> {
        self.next::<[u8; 4]>().map(u32::from_be_bytes)
    }
    pub fn next_usize(&mut self) -> Result<usize, ReadError> {
        usize::try_from(self.next::<u32>()?).map_err(|_| ReadError)
    }
    pub fn next_bool(&mut self) -> Result<bool, ReadError> {
        match self.next::<u8>()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(ReadError),
        }
    }
    pub fn next_slice(&mut self, amount: usize) -> Result<&'a [u8], ReadError> {
        let src = self.data.get(self.cur..self.cur + amount).ok_or(ReadError)?;
        self.cur += amount;
        Ok(src)
    }
    /// Length-prefixed byte blob, as written by [`write_blob`]
    pub fn next_blob(&mut self) -> Result<&'a [u8], ReadError> {
        let len = self.next_usize()?;
        self.next_slice(len)
    }
    pub const fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.cur)
    }
}

/// Read a big endian u32 at `at`, without a cursor
pub fn be_u32_at(data: &[u8], at: usize) -> Option<u32> {
    let bytes = data.get(at..at + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub fn write_i32(out: &mut Vec<u8>, val: i32) {
    out.extend_from_slice(&val.to_le_bytes());
}

pub fn write_u32(out: &mut Vec<u8>, val: u32) {
    out.extend_from_slice(&val.to_le_bytes());
}

pub fn write_be_u32(out: &mut Vec<u8>, val: u32) {
    out.extend_from_slice(&val.to_be_bytes());
}

/// Offsets and sizes are persisted as u32
pub fn write_usize(out: &mut Vec<u8>, val: usize) {
    write_u32(out, u32::try_from(val).unwrap_or(u32::MAX));
}

pub fn write_bool(out: &mut Vec<u8>, val: bool) {
    out.push(u8::from(val));
}

pub fn write_blob(out: &mut Vec<u8>, blob: &[u8]) {
    write_usize(out, blob.len());
    out.extend_from_slice(blob);
}

#[test]
fn test_reader_rejects_short_reads() {
    let mut out = Vec::new();
    write_u32(&mut out, 0xDEAD_BEEF);
    write_blob(&mut out, b"abc");
    write_bool(&mut out, true);
    let mut rd = Reader::new(&out);
    assert_eq!(rd.next::<u32>().unwrap(), 0xDEAD_BEEF);
    assert_eq!(rd.next_blob().unwrap(), b"abc");
    assert!(rd.next_bool().unwrap());
    assert_eq!(rd.remaining(), 0);
    assert!(rd.next::<u8>().is_err());
}
