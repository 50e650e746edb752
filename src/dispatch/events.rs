//! Readiness masks.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
#[cfg(unix)]
use std::os::unix::io::RawFd;

use mio::Interest;

/// Set of readiness conditions for one descriptor.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Events(u8);

impl Events {
    pub const NONE: Events = Events(0);
    pub const READABLE: Events = Events(1);
    pub const WRITABLE: Events = Events(2);
    pub const BOTH: Events = Events(3);

    #[inline(always)]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline(always)]
    pub fn is_readable(self) -> bool {
        self.0 & Self::READABLE.0 != 0
    }

    #[inline(always)]
    pub fn is_writable(self) -> bool {
        self.0 & Self::WRITABLE.0 != 0
    }

    #[inline(always)]
    pub fn contains(self, other: Events) -> bool {
        self.0 & other.0 == other.0
    }

    /// The mio interest for this mask, `None` when empty.
    pub fn to_interest(self) -> Option<Interest> {
        match (self.is_readable(), self.is_writable()) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }

    /// Fold a mio event into a mask. Hang-ups and errors wake both sides so
    /// the owner sees the failure on its next read or write.
    pub fn from_mio(event: &mio::event::Event) -> Events {
        let mut ev = Events::NONE;
        if event.is_readable() || event.is_read_closed() || event.is_error() {
            ev |= Events::READABLE;
        }
        if event.is_writable() || event.is_write_closed() || event.is_error() {
            ev |= Events::WRITABLE;
        }
        ev
    }
}

impl BitOr for Events {
    type Output = Events;

    fn bitor(self, rhs: Events) -> Events {
        Events(self.0 | rhs.0)
    }
}

impl BitOrAssign for Events {
    fn bitor_assign(&mut self, rhs: Events) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Events {
    type Output = Events;

    fn bitand(self, rhs: Events) -> Events {
        Events(self.0 & rhs.0)
    }
}

impl fmt::Debug for Events {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.is_readable(), self.is_writable()) {
            (true, true) => f.write_str("READABLE|WRITABLE"),
            (true, false) => f.write_str("READABLE"),
            (false, true) => f.write_str("WRITABLE"),
            (false, false) => f.write_str("NONE"),
        }
    }
}

/// Readiness observed for one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdNotify {
    pub fd: RawFd,
    pub events: Events,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_ops() {
        let both = Events::READABLE | Events::WRITABLE;
        assert_eq!(both, Events::BOTH);
        assert!(both.contains(Events::READABLE));
        assert_eq!(both & Events::WRITABLE, Events::WRITABLE);
        assert!((Events::READABLE & Events::WRITABLE).is_empty());
        assert!(Events::NONE.to_interest().is_none());
        assert_eq!(Events::BOTH.to_interest(), Some(Interest::READABLE | Interest::WRITABLE));
    }
}
