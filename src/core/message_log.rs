//! Memory-mapped log of packed messages.
//!
//! File layout:
//! ┌──────────────────────────────────────────────┐
//! │ LogHeader (64 bytes)                         │
//! ├──────────────────────────────────────────────┤
//! │ varint len │ packed message │ varint len │ … │
//! └──────────────────────────────────────────────┘
//!
//! Records are appended until the data area is full; the log never wraps.

use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::io;
use std::path::Path;

use crate::codec::{pack_to_buffer, packed_size, wire, Message};

#[repr(C, align(64))]
struct LogHeader {
    magic: u64,
    version: u32,
    _reserved: u32,
    capacity: u64,
    write_pos: u64,
}

const MAGIC: u64 = 0x50524F544F4C4F47; // "PROTOLOG"
const VERSION: u32 = 1;
const HEADER_SIZE: usize = std::mem::size_of::<LogHeader>();

/// Append-only mmap-backed record log.
pub struct MessageLog {
    mmap: MmapMut,
    capacity: usize,
}

impl MessageLog {
    /// Open `path`, creating a log with `capacity` data bytes if the file
    /// does not hold one yet. An existing log keeps its own capacity.
    pub fn open<P: AsRef<Path>>(path: P, capacity: usize) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let existing = file.metadata()?.len() as usize;
        if existing >= HEADER_SIZE {
            // SAFETY: the file is open read/write and at least a header long.
            let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
            if let Some(log) = Self::from_existing(mmap)? {
                return Ok(log);
            }
        }

        let total_size = HEADER_SIZE + capacity;
        file.set_len(total_size as u64)?;

        // SAFETY: file opened with read/write permission and sized above.
        let mut mmap = unsafe { MmapOptions::new().len(total_size).map_mut(&file)? };
        // SAFETY: mmap is page aligned and at least HEADER_SIZE long.
        let header = unsafe { &mut *(mmap.as_mut_ptr() as *mut LogHeader) };
        header.magic = MAGIC;
        header.version = VERSION;
        header._reserved = 0;
        header.capacity = capacity as u64;
        header.write_pos = 0;

        Ok(Self { mmap, capacity })
    }

    /// Open a log that must already exist.
    pub fn open_existing<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        if (file.metadata()?.len() as usize) < HEADER_SIZE {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "file too short for a log"));
        }
        // SAFETY: the file is open read/write and at least a header long.
        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        Self::from_existing(mmap)?
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "not a message log"))
    }

    fn from_existing(mmap: MmapMut) -> io::Result<Option<Self>> {
        // SAFETY: mmap is page aligned and at least HEADER_SIZE long.
        let header = unsafe { &*(mmap.as_ptr() as *const LogHeader) };
        if header.magic != MAGIC {
            return Ok(None);
        }
        if header.version != VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported log version {}", header.version),
            ));
        }
        let corrupt = || io::Error::new(io::ErrorKind::InvalidData, "corrupt log header");
        let capacity = usize::try_from(header.capacity).map_err(|_| corrupt())?;
        let total = HEADER_SIZE.checked_add(capacity).ok_or_else(corrupt)?;
        if mmap.len() < total || header.write_pos > header.capacity {
            return Err(corrupt());
        }
        Ok(Some(Self { mmap, capacity }))
    }

    #[inline(always)]
    fn header(&self) -> &LogHeader {
        // SAFETY: header sits at the start of the mapping.
        unsafe { &*(self.mmap.as_ptr() as *const LogHeader) }
    }

    #[inline(always)]
    fn header_mut(&mut self) -> &mut LogHeader {
        // SAFETY: header sits at the start of the mapping.
        unsafe { &mut *(self.mmap.as_mut_ptr() as *mut LogHeader) }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes of the data area in use.
    pub fn len(&self) -> usize {
        self.header().write_pos as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append one packed message. Returns its record offset, or `None` when
    /// the log has no room left.
    pub fn append(&mut self, message: &Message) -> Option<usize> {
        let size = packed_size(message);
        let offset = self.reserve(size)?;
        let mut body = Vec::with_capacity(size);
        pack_to_buffer(message, &mut body);
        self.write_record(offset, &body);
        Some(offset)
    }

    /// Append an already packed record.
    pub fn append_bytes(&mut self, data: &[u8]) -> Option<usize> {
        let offset = self.reserve(data.len())?;
        self.write_record(offset, data);
        Some(offset)
    }

    fn reserve(&self, body_len: usize) -> Option<usize> {
        let offset = self.len();
        let total = wire::uint64_size(body_len as u64) + body_len;
        if total > self.capacity - offset {
            return None;
        }
        Some(offset)
    }

    fn write_record(&mut self, offset: usize, body: &[u8]) {
        let mut prefix = [0u8; wire::MAX_VARINT_LEN];
        let n = wire::encode_uint64(body.len() as u64, &mut prefix);
        let start = HEADER_SIZE + offset;
        self.mmap[start..start + n].copy_from_slice(&prefix[..n]);
        self.mmap[start + n..start + n + body.len()].copy_from_slice(body);
        self.header_mut().write_pos = (offset + n + body.len()) as u64;
    }

    /// Iterate record bodies in append order.
    pub fn records(&self) -> Records<'_> {
        Records {
            data: &self.mmap[HEADER_SIZE..HEADER_SIZE + self.len()],
            pos: 0,
        }
    }

    pub fn flush(&self) -> io::Result<()> {
        self.mmap.flush()
    }
}

/// Iterator over the records of a [`MessageLog`].
pub struct Records<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for Records<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }
        let (len, used) = wire::decode_varint(&self.data[self.pos..], self.pos).ok()?;
        let start = self.pos + used;
        let end = start.checked_add(len as usize)?;
        if end > self.data.len() {
            return None;
        }
        self.pos = end;
        Some(&self.data[start..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::test_schema::SIMPLE;
    use crate::codec::{unpack, Value};

    fn simple(v: i32) -> Message {
        let mut m = Message::new(&SIMPLE);
        m.set("value", v).unwrap();
        m
    }

    #[test]
    fn test_header_size() {
        assert_eq!(HEADER_SIZE, 64);
    }

    #[test]
    fn test_append_and_iterate() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = MessageLog::open(dir.path().join("a.log"), 4096).unwrap();
        assert!(log.is_empty());
        assert_eq!(log.append(&simple(1)), Some(0));
        assert_eq!(log.append(&simple(300)), Some(3));
        log.append_bytes(&[]).unwrap();

        let records: Vec<&[u8]> = log.records().collect();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1], &[0x08, 0xac, 0x02]);
        let m = unpack(&SIMPLE, records[1]).unwrap();
        assert_eq!(m.get("value").unwrap(), Some(&Value::Int32(300)));
        assert!(records[2].is_empty());
    }

    #[test]
    fn test_log_full() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = MessageLog::open(dir.path().join("small.log"), 8).unwrap();
        assert!(log.append(&simple(300)).is_some());
        assert!(log.append(&simple(300)).is_some());
        assert_eq!(log.append(&simple(300)), None);
        assert_eq!(log.len(), 8);
    }

    #[test]
    fn test_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.log");
        {
            let mut log = MessageLog::open(&path, 4096).unwrap();
            log.append(&simple(7)).unwrap();
            log.flush().unwrap();
        }
        let log = MessageLog::open_existing(&path).unwrap();
        assert_eq!(log.capacity(), 4096);
        assert_eq!(log.records().count(), 1);
        // Reopening with a different capacity keeps the stored one.
        drop(log);
        let log = MessageLog::open(&path, 64).unwrap();
        assert_eq!(log.capacity(), 4096);
    }

    #[test]
    fn test_huge_capacity_in_header_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.log");
        let mut raw = vec![0u8; 128];
        raw[0..8].copy_from_slice(&MAGIC.to_ne_bytes());
        raw[8..12].copy_from_slice(&VERSION.to_ne_bytes());
        raw[16..24].copy_from_slice(&u64::MAX.to_ne_bytes());
        std::fs::write(&path, raw).unwrap();

        let err = MessageLog::open_existing(&path).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(MessageLog::open(&path, 64).is_err());
    }

    #[test]
    fn test_open_existing_rejects_foreign_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk");
        std::fs::write(&path, vec![0u8; 128]).unwrap();
        assert!(MessageLog::open_existing(&path).is_err());
    }
}
