//! Client-side table of outstanding calls, keyed by request id.
//!
//! Ids are 1-based slot positions. Idle slots form a free chain through
//! their `next` field (0 ends the chain); a released id goes to the head,
//! so it is the next one handed out. The table doubles when the chain runs
//! dry.

use crate::codec::{Message, MessageDescriptor};

/// Completion of one call. `None` means the call failed.
pub type ResponseCallback = Box<dyn FnOnce(Option<Message>)>;

enum Slot {
    Free { next: u32 },
    Pending {
        response_type: &'static MessageDescriptor,
        callback: ResponseCallback,
    },
}

pub(crate) struct ClosureTable {
    slots: Vec<Slot>,
    first_free: u32,
    pending: usize,
}

impl ClosureTable {
    pub fn new() -> Self {
        Self {
            slots: vec![Slot::Free { next: 0 }],
            first_free: 1,
            pending: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.pending
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn grow(&mut self) {
        let old = self.slots.len() as u32;
        let new = old * 2;
        for id in old + 1..new {
            self.slots.push(Slot::Free { next: id + 1 });
        }
        self.slots.push(Slot::Free {
            next: self.first_free,
        });
        self.first_free = old + 1;
    }

    /// The id the next [`insert`](Self::insert) will use.
    pub fn next_id(&mut self) -> u32 {
        if self.first_free == 0 {
            self.grow();
        }
        self.first_free
    }

    pub fn insert(
        &mut self,
        response_type: &'static MessageDescriptor,
        callback: ResponseCallback,
    ) -> u32 {
        let id = self.next_id();
        let slot = &mut self.slots[id as usize - 1];
        let next = match slot {
            Slot::Free { next } => *next,
            Slot::Pending { .. } => panic!("request id {id} on the free chain is in use"),
        };
        *slot = Slot::Pending {
            response_type,
            callback,
        };
        self.first_free = next;
        self.pending += 1;
        id
    }

    /// Expected response type of an outstanding id.
    pub fn response_type(&self, id: u32) -> Option<&'static MessageDescriptor> {
        match self.slots.get((id as usize).wrapping_sub(1))? {
            Slot::Pending { response_type, .. } => Some(response_type),
            Slot::Free { .. } => None,
        }
    }

    /// Release `id`, returning its callback.
    pub fn complete(&mut self, id: u32) -> Option<ResponseCallback> {
        let first_free = self.first_free;
        let slot = self.slots.get_mut((id as usize).wrapping_sub(1))?;
        if let Slot::Free { .. } = slot {
            return None;
        }
        let old = std::mem::replace(slot, Slot::Free { next: first_free });
        self.first_free = id;
        self.pending -= 1;
        match old {
            Slot::Pending { callback, .. } => Some(callback),
            Slot::Free { .. } => None,
        }
    }

    /// Every outstanding callback, in id order.
    pub fn into_callbacks(self) -> Vec<ResponseCallback> {
        self.slots
            .into_iter()
            .filter_map(|s| match s {
                Slot::Pending { callback, .. } => Some(callback),
                Slot::Free { .. } => None,
            })
            .collect()
    }
}

impl Default for ClosureTable {
    fn default() -> Self {
        Self::new()
    }
}
