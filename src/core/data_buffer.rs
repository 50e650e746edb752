//! Fragmented byte queue for socket I/O.
//!
//! Bytes are appended at the tail and consumed from the head. Storage is a
//! chain of [`FRAGMENT_SIZE`] fragments, so appends never move existing
//! data and whole chains move between buffers in O(1).
//!
//! Invariant: `size` equals the sum of the fragment lengths.

use std::collections::LinkedList;
use std::io::{self, IoSlice, Read, Write};
#[cfg(unix)]
use std::os::unix::io::RawFd;

use crate::codec::Sink;

use super::fragment::{Fragment, FRAGMENT_SIZE};

/// Most fragments gathered into one vectored write.
pub const MAX_FRAGMENTS_PER_WRITE: usize = 16;

/// Result of one read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Bytes appended to the buffer.
    Data(usize),
    /// Peer closed its side.
    Eof,
    /// Nothing available right now.
    WouldBlock,
}

#[derive(Default)]
pub struct DataBuffer {
    fragments: LinkedList<Fragment>,
    size: usize,
}

impl DataBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.size
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    /// Check the size invariant.
    pub fn is_consistent(&self) -> bool {
        self.fragments.iter().map(Fragment::len).sum::<usize>() == self.size
            && self.fragments.iter().all(|f| !f.is_empty())
    }

    /// Tail fragment with spare room, allocating one when needed.
    #[inline]
    fn tail_with_room(&mut self) -> &mut Fragment {
        if self.fragments.back().map_or(true, |f| f.avail() == 0) {
            self.fragments.push_back(Fragment::new());
        }
        // A fragment was just ensured above.
        match self.fragments.back_mut() {
            Some(f) => f,
            None => unreachable!(),
        }
    }

    pub fn append(&mut self, mut data: &[u8]) {
        self.size += data.len();
        while !data.is_empty() {
            match self.fragments.back_mut() {
                Some(tail) if tail.avail() > 0 => {
                    let n = tail.fill(data);
                    data = &data[n..];
                }
                _ => self.fragments.push_back(Fragment::new()),
            }
        }
    }

    #[inline]
    pub fn append_byte(&mut self, byte: u8) {
        self.append(&[byte]);
    }

    pub fn append_repeated_byte(&mut self, byte: u8, count: usize) {
        let chunk = [byte; 256];
        let mut left = count;
        while left > 0 {
            let n = left.min(chunk.len());
            self.append(&chunk[..n]);
            left -= n;
        }
    }

    pub fn append_repeated_data(&mut self, data: &[u8], count: usize) {
        for _ in 0..count {
            self.append(data);
        }
    }

    pub fn append_str(&mut self, s: &str) {
        self.append(s.as_bytes());
    }

    /// Append `s` followed by a NUL byte.
    pub fn append_str0(&mut self, s: &str) {
        self.append(s.as_bytes());
        self.append_byte(0);
    }

    /// Copy up to `out.len()` bytes from the head without removing them.
    pub fn peek(&self, out: &mut [u8]) -> usize {
        let mut copied = 0;
        for f in &self.fragments {
            if copied == out.len() {
                break;
            }
            let bytes = f.bytes();
            let n = bytes.len().min(out.len() - copied);
            out[copied..copied + n].copy_from_slice(&bytes[..n]);
            copied += n;
        }
        copied
    }

    /// Move up to `out.len()` bytes from the head into `out`.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let n = self.peek(out);
        self.discard(n);
        n
    }

    /// Remove up to `max` bytes from the head.
    pub fn discard(&mut self, max: usize) -> usize {
        let mut left = max.min(self.size);
        let removed = left;
        while left > 0 {
            let Some(front) = self.fragments.front_mut() else {
                break;
            };
            if front.len() <= left {
                left -= front.len();
                if let Some(f) = self.fragments.pop_front() {
                    f.recycle();
                }
            } else {
                front.consume(left);
                left = 0;
            }
        }
        self.size -= removed;
        removed
    }

    pub fn peek_byte(&self) -> Option<u8> {
        self.fragments.front().map(|f| f.bytes()[0])
    }

    pub fn read_byte(&mut self) -> Option<u8> {
        let b = self.peek_byte()?;
        self.discard(1);
        Some(b)
    }

    /// Position of the first `byte`, scanning across fragments.
    pub fn index_of(&self, byte: u8) -> Option<usize> {
        let mut base = 0;
        for f in &self.fragments {
            if let Some(i) = f.bytes().iter().position(|&b| b == byte) {
                return Some(base + i);
            }
            base += f.len();
        }
        None
    }

    fn take_until(&mut self, delimiter: u8) -> Option<String> {
        let end = self.index_of(delimiter)?;
        let mut bytes = vec![0u8; end];
        self.read(&mut bytes);
        self.discard(1);
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Remove and return the next `\n`-terminated line, without the newline.
    pub fn read_line(&mut self) -> Option<String> {
        self.take_until(b'\n')
    }

    /// Remove and return the next NUL-terminated string.
    pub fn parse_nul_terminated(&mut self) -> Option<String> {
        self.take_until(0)
    }

    /// Move every byte to the tail of `dst`; `self` ends up empty.
    pub fn drain(&mut self, dst: &mut DataBuffer) -> usize {
        let moved = self.size;
        dst.fragments.append(&mut self.fragments);
        dst.size += moved;
        self.size = 0;
        moved
    }

    /// Move up to `max` bytes to the tail of `dst`.
    ///
    /// Whole fragments are relinked while they fit; the last partial
    /// fragment is split by copying its head.
    pub fn transfer(&mut self, dst: &mut DataBuffer, max: usize) -> usize {
        let mut moved = 0;
        while moved < max {
            let left = max - moved;
            let Some(front_len) = self.fragments.front().map(Fragment::len) else {
                break;
            };
            if front_len <= left {
                if let Some(f) = self.fragments.pop_front() {
                    dst.fragments.push_back(f);
                }
                dst.size += front_len;
                self.size -= front_len;
                moved += front_len;
            } else {
                if let Some(front) = self.fragments.front_mut() {
                    dst.append(&front.bytes()[..left]);
                    front.consume(left);
                }
                self.size -= left;
                moved += left;
            }
        }
        moved
    }

    /// Drop all contents.
    pub fn clear(&mut self) {
        while let Some(f) = self.fragments.pop_front() {
            f.recycle();
        }
        self.size = 0;
    }

    /// Contents as one contiguous vector (leaves the buffer unchanged).
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size);
        for f in &self.fragments {
            out.extend_from_slice(f.bytes());
        }
        out
    }

    /// Gather-write the head to `w`, discarding what was written.
    ///
    /// `WouldBlock` and `Interrupted` count as zero progress.
    pub fn write_to<W: Write>(&mut self, w: &mut W) -> io::Result<usize> {
        self.write_len_to(w, self.size)
    }

    /// Like [`write_to`](Self::write_to) but writes at most `max` bytes.
    pub fn write_len_to<W: Write>(&mut self, w: &mut W, max: usize) -> io::Result<usize> {
        let mut slices: [IoSlice<'_>; MAX_FRAGMENTS_PER_WRITE] =
            [IoSlice::new(&[]); MAX_FRAGMENTS_PER_WRITE];
        let mut count = 0;
        let mut budget = max.min(self.size);
        for f in self.fragments.iter().take(MAX_FRAGMENTS_PER_WRITE) {
            if budget == 0 {
                break;
            }
            let bytes = f.bytes();
            let n = bytes.len().min(budget);
            slices[count] = IoSlice::new(&bytes[..n]);
            count += 1;
            budget -= n;
        }
        if count == 0 {
            return Ok(0);
        }
        let written = match w.write_vectored(&slices[..count]) {
            Ok(n) => n,
            Err(e) if is_transient(&e) => 0,
            Err(e) => return Err(e),
        };
        self.discard(written);
        Ok(written)
    }

    /// One read from `r` into the tail.
    pub fn read_from<R: Read>(&mut self, r: &mut R) -> io::Result<ReadStatus> {
        let result = {
            let tail = self.tail_with_room();
            match r.read(tail.spare()) {
                Ok(n) => {
                    tail.commit(n);
                    Ok(n)
                }
                Err(e) => Err(e),
            }
        };
        let status = match result {
            Ok(0) => ReadStatus::Eof,
            Ok(n) => {
                self.size += n;
                ReadStatus::Data(n)
            }
            Err(e) if is_transient(&e) => ReadStatus::WouldBlock,
            Err(e) => {
                self.trim_empty_tail();
                return Err(e);
            }
        };
        self.trim_empty_tail();
        Ok(status)
    }

    fn trim_empty_tail(&mut self) {
        if self.fragments.back().map_or(false, Fragment::is_empty) {
            if let Some(f) = self.fragments.pop_back() {
                f.recycle();
            }
        }
    }

    #[cfg(unix)]
    pub fn write_to_fd(&mut self, fd: RawFd) -> io::Result<usize> {
        self.write_to(&mut FdIo(fd))
    }

    #[cfg(unix)]
    pub fn read_from_fd(&mut self, fd: RawFd) -> io::Result<ReadStatus> {
        self.read_from(&mut FdIo(fd))
    }
}

impl Drop for DataBuffer {
    fn drop(&mut self) {
        self.clear();
    }
}

impl Sink for DataBuffer {
    #[inline(always)]
    fn append(&mut self, data: &[u8]) {
        DataBuffer::append(self, data);
    }
}

impl std::fmt::Debug for DataBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataBuffer")
            .field("size", &self.size)
            .field("fragments", &self.fragments.len())
            .finish()
    }
}

#[inline(always)]
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Borrowed raw descriptor doing plain `read`/`writev` calls.
#[cfg(unix)]
struct FdIo(RawFd);

#[cfg(unix)]
impl Read for FdIo {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: buf is valid for buf.len() writable bytes.
        let rv = unsafe { libc::read(self.0, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if rv < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(rv as usize)
        }
    }
}

#[cfg(unix)]
impl Write for FdIo {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // SAFETY: buf is valid for buf.len() readable bytes.
        let rv = unsafe { libc::write(self.0, buf.as_ptr() as *const libc::c_void, buf.len()) };
        if rv < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(rv as usize)
        }
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        // SAFETY: IoSlice is ABI-compatible with iovec on unix, and the
        // count never exceeds MAX_FRAGMENTS_PER_WRITE.
        let rv = unsafe {
            libc::writev(
                self.0,
                bufs.as_ptr() as *const libc::iovec,
                bufs.len() as libc::c_int,
            )
        };
        if rv < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(rv as usize)
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(len: usize) -> (DataBuffer, Vec<u8>) {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let mut buf = DataBuffer::new();
        buf.append(&data);
        (buf, data)
    }

    #[test]
    fn test_append_spans_fragments() {
        let (buf, data) = filled(FRAGMENT_SIZE * 2 + 100);
        assert_eq!(buf.len(), data.len());
        assert_eq!(buf.fragment_count(), 3);
        assert_eq!(buf.to_vec(), data);
        assert!(buf.is_consistent());
    }

    #[test]
    fn test_read_peek_discard_across_boundaries() {
        let (mut buf, data) = filled(FRAGMENT_SIZE + 50);
        let mut out = vec![0u8; FRAGMENT_SIZE + 10];
        assert_eq!(buf.peek(&mut out), out.len());
        assert_eq!(&out[..], &data[..out.len()]);
        assert_eq!(buf.len(), data.len());

        assert_eq!(buf.discard(FRAGMENT_SIZE - 5), FRAGMENT_SIZE - 5);
        let mut ten = [0u8; 10];
        assert_eq!(buf.read(&mut ten), 10);
        assert_eq!(&ten[..], &data[FRAGMENT_SIZE - 5..FRAGMENT_SIZE + 5]);
        assert_eq!(buf.len(), 45);
        assert!(buf.is_consistent());

        assert_eq!(buf.discard(1000), 45);
        assert!(buf.is_empty());
        assert_eq!(buf.fragment_count(), 0);
    }

    #[test]
    fn test_drain_moves_everything() {
        let (mut src, data) = filled(FRAGMENT_SIZE * 3);
        let mut dst = DataBuffer::new();
        dst.append(b"head");
        assert_eq!(src.drain(&mut dst), data.len());
        assert!(src.is_empty());
        assert_eq!(dst.len(), data.len() + 4);
        assert_eq!(&dst.to_vec()[4..], &data[..]);
        assert!(src.is_consistent() && dst.is_consistent());
    }

    #[test]
    fn test_transfer_splits_last_fragment() {
        let (mut src, data) = filled(FRAGMENT_SIZE * 2);
        let mut dst = DataBuffer::new();
        let want = FRAGMENT_SIZE + 100;
        assert_eq!(src.transfer(&mut dst, want), want);
        assert_eq!(dst.to_vec(), &data[..want]);
        assert_eq!(src.to_vec(), &data[want..]);
        assert!(src.is_consistent() && dst.is_consistent());

        assert_eq!(src.transfer(&mut dst, usize::MAX), FRAGMENT_SIZE - 100);
        assert!(src.is_empty());
        assert_eq!(dst.to_vec(), data);
    }

    #[test]
    fn test_lines_and_nul_strings() {
        let mut buf = DataBuffer::new();
        buf.append_str("first\nsec");
        assert_eq!(buf.read_line().as_deref(), Some("first"));
        assert_eq!(buf.read_line(), None);
        buf.append_str("ond\n");
        assert_eq!(buf.read_line().as_deref(), Some("second"));

        buf.append_str0("abc");
        buf.append_str0("");
        assert_eq!(buf.parse_nul_terminated().as_deref(), Some("abc"));
        assert_eq!(buf.parse_nul_terminated().as_deref(), Some(""));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_delimiter_search_across_fragments() {
        let mut buf = DataBuffer::new();
        buf.append_repeated_byte(b'x', FRAGMENT_SIZE + 3);
        buf.append_byte(b'\n');
        assert_eq!(buf.index_of(b'\n'), Some(FRAGMENT_SIZE + 3));
        let line = buf.read_line().unwrap();
        assert_eq!(line.len(), FRAGMENT_SIZE + 3);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_byte_helpers() {
        let mut buf = DataBuffer::new();
        assert_eq!(buf.peek_byte(), None);
        buf.append_repeated_data(b"ab", 3);
        assert_eq!(buf.len(), 6);
        assert_eq!(buf.peek_byte(), Some(b'a'));
        assert_eq!(buf.read_byte(), Some(b'a'));
        assert_eq!(buf.read_byte(), Some(b'b'));
        assert_eq!(buf.len(), 4);
        buf.clear();
        assert!(buf.is_empty() && buf.is_consistent());
    }

    #[test]
    fn test_size_invariant_under_mixed_operations() {
        let mut a = DataBuffer::new();
        let mut b = DataBuffer::new();
        for round in 0..50usize {
            a.append_repeated_byte(round as u8, round * 397 % 9000);
            a.discard(round * 131 % 5000);
            a.transfer(&mut b, round * 733 % 12000);
            let mut tmp = [0u8; 300];
            b.read(&mut tmp);
            if round % 7 == 0 {
                b.drain(&mut a);
            }
            assert!(a.is_consistent(), "round {round}");
            assert!(b.is_consistent(), "round {round}");
        }
    }

    /// Writer accepting a fixed number of bytes per call.
    struct Trickle {
        out: Vec<u8>,
        per_call: usize,
        calls: usize,
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.calls += 1;
            if self.calls % 2 == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.per_call);
            self.out.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_partial_writes_and_would_block() {
        let (mut buf, data) = filled(FRAGMENT_SIZE + 10);
        let mut w = Trickle {
            out: Vec::new(),
            per_call: 1000,
            calls: 0,
        };
        let mut rounds = 0;
        while !buf.is_empty() {
            buf.write_to(&mut w).unwrap();
            rounds += 1;
            assert!(rounds < 100);
        }
        assert_eq!(w.out, data);
    }

    #[test]
    fn test_write_len_to_is_bounded() {
        let (mut buf, data) = filled(100);
        let mut out = Vec::new();
        assert_eq!(buf.write_len_to(&mut out, 30).unwrap(), 30);
        assert_eq!(out, &data[..30]);
        assert_eq!(buf.len(), 70);
    }

    #[test]
    fn test_read_from_reports_eof() {
        let mut buf = DataBuffer::new();
        let mut src: &[u8] = b"payload";
        assert_eq!(buf.read_from(&mut src).unwrap(), ReadStatus::Data(7));
        assert_eq!(buf.read_from(&mut src).unwrap(), ReadStatus::Eof);
        assert_eq!(buf.to_vec(), b"payload");
        assert!(buf.is_consistent());
    }

    #[cfg(unix)]
    #[test]
    fn test_fd_round_trip_through_pipe() {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let (mut buf, data) = filled(3000);
        assert_eq!(buf.write_to_fd(fds[1]).unwrap(), 3000);
        let mut back = DataBuffer::new();
        assert_eq!(back.read_from_fd(fds[0]).unwrap(), ReadStatus::Data(3000));
        assert_eq!(back.to_vec(), data);
        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
    }
}
