//! Server-side request slab.
//!
//! A request is *alive* while linked into its connection's pending list,
//! *defunct* once the connection went away before the answer, and *free*
//! once answered. Free slots chain through `next`; alive slots form one
//! doubly linked list per connection.

/// Handle to a slot. Stable until the request is answered.
pub(crate) type RequestHandle = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Alive {
        conn: u64,
        prev: Option<RequestHandle>,
        next: Option<RequestHandle>,
    },
    Defunct,
    Free {
        next: Option<RequestHandle>,
    },
}

/// What a request was tied to when it is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestState {
    Alive { conn: u64 },
    Defunct,
}

/// Head, tail and length of a connection's pending requests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingList {
    head: Option<RequestHandle>,
    tail: Option<RequestHandle>,
    len: usize,
}

impl PendingList {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Debug, Default)]
pub(crate) struct RequestSlab {
    slots: Vec<Slot>,
    first_free: Option<RequestHandle>,
}

impl RequestSlab {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slots ever allocated (alive, defunct or free).
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Take a slot for `conn` and append it to `list`.
    pub fn alloc(&mut self, conn: u64, list: &mut PendingList) -> RequestHandle {
        let slot = Slot::Alive {
            conn,
            prev: list.tail,
            next: None,
        };
        let handle = match self.first_free {
            Some(h) => {
                self.first_free = match self.slots[h as usize] {
                    Slot::Free { next } => next,
                    _ => None,
                };
                self.slots[h as usize] = slot;
                h
            }
            None => {
                self.slots.push(slot);
                (self.slots.len() - 1) as RequestHandle
            }
        };
        match list.tail {
            Some(t) => self.set_next(t, Some(handle)),
            None => list.head = Some(handle),
        }
        list.tail = Some(handle);
        list.len += 1;
        handle
    }

    fn set_next(&mut self, h: RequestHandle, to: Option<RequestHandle>) {
        if let Some(Slot::Alive { next, .. }) = self.slots.get_mut(h as usize) {
            *next = to;
        }
    }

    fn set_prev(&mut self, h: RequestHandle, to: Option<RequestHandle>) {
        if let Some(Slot::Alive { prev, .. }) = self.slots.get_mut(h as usize) {
            *prev = to;
        }
    }

    pub fn state(&self, h: RequestHandle) -> Option<RequestState> {
        match self.slots.get(h as usize)? {
            Slot::Alive { conn, .. } => Some(RequestState::Alive { conn: *conn }),
            Slot::Defunct => Some(RequestState::Defunct),
            Slot::Free { .. } => None,
        }
    }

    /// Answer `h`: unlink it from `list` if alive, then free the slot.
    pub fn release(&mut self, h: RequestHandle, list: Option<&mut PendingList>) {
        let Some(&slot) = self.slots.get(h as usize) else {
            return;
        };
        match slot {
            Slot::Alive { prev, next, .. } => {
                if let Some(list) = list {
                    match prev {
                        Some(p) => self.set_next(p, next),
                        None => list.head = next,
                    }
                    match next {
                        Some(n) => self.set_prev(n, prev),
                        None => list.tail = prev,
                    }
                    list.len -= 1;
                }
            }
            Slot::Defunct => {}
            Slot::Free { .. } => return,
        }
        self.slots[h as usize] = Slot::Free {
            next: self.first_free,
        };
        self.first_free = Some(h);
    }

    /// Mark every request of `list` defunct and empty the list.
    pub fn orphan_all(&mut self, list: &mut PendingList) -> usize {
        let mut cursor = list.head;
        let mut count = 0;
        while let Some(h) = cursor {
            cursor = match self.slots[h as usize] {
                Slot::Alive { next, .. } => next,
                _ => None,
            };
            self.slots[h as usize] = Slot::Defunct;
            count += 1;
        }
        *list = PendingList::default();
        count
    }

    /// Handles of `list`, head first.
    pub fn iter<'a>(&'a self, list: &PendingList) -> impl Iterator<Item = RequestHandle> + 'a {
        let mut cursor = list.head;
        std::iter::from_fn(move || {
            let h = cursor?;
            cursor = match self.slots.get(h as usize) {
                Some(Slot::Alive { next, .. }) => *next,
                _ => None,
            };
            Some(h)
        })
    }
}
