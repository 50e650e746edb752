//! Fixed-capacity buffer fragments and their recycling bin.
//!
//! Layout of one fragment:
//! ┌──────────────┬──────────────────────┬──────────────┐
//! │ consumed     │ valid (start..+len)  │ spare        │
//! └──────────────┴──────────────────────┴──────────────┘
//!
//! Freed fragment storage goes back to a small per-thread bin instead of the
//! allocator. The bin is bounded and can be flushed with
//! [`cleanup_recycling_bin`].

use std::cell::RefCell;

/// Capacity of every fragment.
pub const FRAGMENT_SIZE: usize = 8192;

/// Most fragments the bin keeps around.
pub const MAX_RECYCLED: usize = 16;

thread_local! {
    static RECYCLING_BIN: RefCell<Vec<Box<[u8]>>> = const { RefCell::new(Vec::new()) };
}

pub(crate) struct Fragment {
    data: Box<[u8]>,
    start: usize,
    len: usize,
}

impl Fragment {
    /// Empty fragment, reusing recycled storage when there is some.
    pub(crate) fn new() -> Self {
        let data = RECYCLING_BIN
            .with(|bin| bin.borrow_mut().pop())
            .unwrap_or_else(|| vec![0u8; FRAGMENT_SIZE].into_boxed_slice());
        Self {
            data,
            start: 0,
            len: 0,
        }
    }

    #[inline(always)]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Room left after the valid bytes.
    #[inline(always)]
    pub(crate) fn avail(&self) -> usize {
        self.data.len() - self.start - self.len
    }

    #[inline(always)]
    pub(crate) fn bytes(&self) -> &[u8] {
        &self.data[self.start..self.start + self.len]
    }

    #[inline(always)]
    pub(crate) fn spare(&mut self) -> &mut [u8] {
        let end = self.start + self.len;
        &mut self.data[end..]
    }

    /// Mark `n` spare bytes as valid.
    #[inline(always)]
    pub(crate) fn commit(&mut self, n: usize) {
        debug_assert!(n <= self.avail());
        self.len += n;
    }

    /// Drop `n` bytes from the front.
    #[inline(always)]
    pub(crate) fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.len);
        self.start += n;
        self.len -= n;
    }

    /// Copy as much of `src` as fits, returning the count copied.
    #[inline]
    pub(crate) fn fill(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.avail());
        self.spare()[..n].copy_from_slice(&src[..n]);
        self.len += n;
        n
    }

    /// Hand the storage to the recycling bin, or free it if the bin is full.
    pub(crate) fn recycle(self) {
        RECYCLING_BIN.with(|bin| {
            let mut bin = bin.borrow_mut();
            if bin.len() < MAX_RECYCLED {
                bin.push(self.data);
            }
        });
    }
}

/// Release every fragment held by this thread's recycling bin.
pub fn cleanup_recycling_bin() {
    RECYCLING_BIN.with(|bin| {
        let mut bin = bin.borrow_mut();
        bin.clear();
        bin.shrink_to_fit();
    });
}

/// Fragments currently waiting in this thread's bin.
pub fn recycled_fragments() -> usize {
    RECYCLING_BIN.with(|bin| bin.borrow().len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_commit_consume() {
        let mut f = Fragment::new();
        assert_eq!(f.avail(), FRAGMENT_SIZE);
        assert_eq!(f.fill(b"hello"), 5);
        f.consume(2);
        assert_eq!(f.bytes(), b"llo");
        assert_eq!(f.avail(), FRAGMENT_SIZE - 5);
        f.spare()[0] = b'!';
        f.commit(1);
        assert_eq!(f.bytes(), b"llo!");
    }

    #[test]
    fn test_fill_stops_at_capacity() {
        let mut f = Fragment::new();
        let big = vec![1u8; FRAGMENT_SIZE + 10];
        assert_eq!(f.fill(&big), FRAGMENT_SIZE);
        assert_eq!(f.avail(), 0);
    }

    #[test]
    fn test_recycling_bin_is_bounded() {
        cleanup_recycling_bin();
        for _ in 0..MAX_RECYCLED + 4 {
            Fragment::new_uncached().recycle();
        }
        assert_eq!(recycled_fragments(), MAX_RECYCLED);
        let _reused = Fragment::new();
        assert_eq!(recycled_fragments(), MAX_RECYCLED - 1);
        cleanup_recycling_bin();
        assert_eq!(recycled_fragments(), 0);
    }

    impl Fragment {
        fn new_uncached() -> Self {
            Self {
                data: vec![0u8; FRAGMENT_SIZE].into_boxed_slice(),
                start: 0,
                len: 0,
            }
        }
    }
}
