//! Dispatch Reactor: single-threaded event loop
//!
//! Prinsip desain:
//! - One thread: every callback runs on the thread calling `run()`
//! - No borrow across callbacks: state is copied out before user code runs,
//!   so callbacks may freely watch, close, add and remove
//! - Level-triggered readiness: every fd delivered in a pass is re-armed
//!   before the next poll, so data a callback leaves unread fires again
//!
//! One pass of [`Dispatch::run`]:
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ flush watch  │ → │ poll (timeout│ → │ fd callbacks │ → │ due timers,  │
//! │ changes      │   │ from timers) │   │              │   │ then idles   │
//! └──────────────┘   └──────────────┘   └──────────────┘   └──────────────┘

mod events;
pub mod proxy;
mod timer;

pub use events::{Events, FdNotify};
pub use timer::TimerId;

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::io;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

use mio::unix::SourceFd;
use mio::{Poll, Token};
use tracing::{debug, trace, warn};

use timer::TimerQueue;

const EVENTS_CAPACITY: usize = 1024;

/// Readiness callback: `(dispatch, fd, observed ∩ desired events)`.
pub type FdCallback = Rc<dyn Fn(&Dispatch, RawFd, Events)>;

type OnceCallback = Box<dyn FnOnce(&Dispatch)>;

/// Handle returned by [`Dispatch::add_idle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdleId(u64);

struct Watch {
    events: Events,
    callback: FdCallback,
}

#[derive(Default)]
struct FdTable {
    /// What callers asked for.
    watches: HashMap<RawFd, Watch>,
    /// What the poller currently has.
    registered: HashMap<RawFd, Events>,
    /// Descriptors whose registration must be synced before the next poll.
    changes: BTreeSet<RawFd>,
    /// Closed during the current pass; their stale events are dropped.
    closed: HashSet<RawFd>,
}

struct State {
    fds: FdTable,
    timers: TimerQueue<OnceCallback>,
    idles: VecDeque<(u64, OnceCallback)>,
    next_idle: u64,
}

/// The reactor. Shared as `Rc<Dispatch>`; never crosses threads.
pub struct Dispatch {
    poll: RefCell<Poll>,
    events: RefCell<mio::Events>,
    state: RefCell<State>,
}

impl Dispatch {
    pub fn new() -> io::Result<Rc<Self>> {
        Ok(Rc::new(Self {
            poll: RefCell::new(Poll::new()?),
            events: RefCell::new(mio::Events::with_capacity(EVENTS_CAPACITY)),
            state: RefCell::new(State {
                fds: FdTable::default(),
                timers: TimerQueue::new(),
                idles: VecDeque::new(),
                next_idle: 0,
            }),
        }))
    }

    /// Watch `fd` for `events`, replacing any earlier watch. An empty mask
    /// removes the watch.
    pub fn watch_fd<F>(&self, fd: RawFd, events: Events, callback: F)
    where
        F: Fn(&Dispatch, RawFd, Events) + 'static,
    {
        if events.is_empty() {
            self.unwatch_fd(fd);
            return;
        }
        let old = {
            let mut state = self.state.borrow_mut();
            state.fds.changes.insert(fd);
            state.fds.watches.insert(
                fd,
                Watch {
                    events,
                    callback: Rc::new(callback),
                },
            )
        };
        drop(old);
    }

    /// Change the mask of an existing watch, keeping its callback.
    /// An empty mask removes the watch.
    pub fn modify_fd(&self, fd: RawFd, events: Events) {
        if events.is_empty() {
            self.unwatch_fd(fd);
            return;
        }
        let mut state = self.state.borrow_mut();
        if let Some(w) = state.fds.watches.get_mut(&fd) {
            w.events = events;
            state.fds.changes.insert(fd);
        }
    }

    /// Stop watching `fd`.
    pub fn unwatch_fd(&self, fd: RawFd) {
        let old = {
            let mut state = self.state.borrow_mut();
            state.fds.changes.insert(fd);
            state.fds.watches.remove(&fd)
        };
        drop(old);
    }

    /// Forget `fd` right before its owner closes it.
    ///
    /// Deregisters immediately and drops any event for `fd` still queued in
    /// the current pass.
    pub fn close_fd(&self, fd: RawFd) {
        let (old, was_registered) = self.forget(fd);
        if was_registered {
            let poll = self.poll.borrow();
            if let Err(e) = poll.registry().deregister(&mut SourceFd(&fd)) {
                debug!(fd, error = %e, "deregister failed");
            }
        }
        drop(old);
    }

    /// Forget `fd` that was already closed elsewhere (no syscall).
    pub fn fd_closed(&self, fd: RawFd) {
        let (old, _) = self.forget(fd);
        drop(old);
    }

    fn forget(&self, fd: RawFd) -> (Option<Watch>, bool) {
        let mut state = self.state.borrow_mut();
        let fds = &mut state.fds;
        fds.changes.remove(&fd);
        fds.closed.insert(fd);
        let was_registered = fds.registered.remove(&fd).is_some();
        (fds.watches.remove(&fd), was_registered)
    }

    /// Events currently requested for `fd`.
    pub fn watched_events(&self, fd: RawFd) -> Events {
        self.state
            .borrow()
            .fds
            .watches
            .get(&fd)
            .map_or(Events::NONE, |w| w.events)
    }

    pub fn watch_count(&self) -> usize {
        self.state.borrow().fds.watches.len()
    }

    /// Run `callback` once at `deadline`.
    pub fn add_timer<F>(&self, deadline: Instant, callback: F) -> TimerId
    where
        F: FnOnce(&Dispatch) + 'static,
    {
        self.state
            .borrow_mut()
            .timers
            .insert(deadline, Box::new(callback))
    }

    pub fn add_timer_after<F>(&self, delay: Duration, callback: F) -> TimerId
    where
        F: FnOnce(&Dispatch) + 'static,
    {
        self.add_timer(Instant::now() + delay, callback)
    }

    pub fn add_timer_millis<F>(&self, millis: u64, callback: F) -> TimerId
    where
        F: FnOnce(&Dispatch) + 'static,
    {
        self.add_timer_after(Duration::from_millis(millis), callback)
    }

    /// Cancel a timer. Returns `false` if it already fired (or is firing).
    pub fn remove_timer(&self, id: TimerId) -> bool {
        let old = self.state.borrow_mut().timers.remove(id);
        old.is_some()
    }

    pub fn timer_count(&self) -> usize {
        self.state.borrow().timers.len()
    }

    /// Run `callback` on the next pass. Idle callbacks run once; to run
    /// again, add it again.
    pub fn add_idle<F>(&self, callback: F) -> IdleId
    where
        F: FnOnce(&Dispatch) + 'static,
    {
        let mut state = self.state.borrow_mut();
        let id = state.next_idle;
        state.next_idle += 1;
        state.idles.push_back((id, Box::new(callback)));
        IdleId(id)
    }

    pub fn remove_idle(&self, id: IdleId) -> bool {
        let old = {
            let mut state = self.state.borrow_mut();
            let pos = state.idles.iter().position(|(i, _)| *i == id.0);
            pos.and_then(|p| state.idles.remove(p))
        };
        old.is_some()
    }

    /// Poll timeout the next `run()` will use: zero with idles pending,
    /// else the time to the earliest timer, else `None` (block).
    pub fn timeout(&self) -> Option<Duration> {
        let state = self.state.borrow();
        if !state.idles.is_empty() {
            return Some(Duration::ZERO);
        }
        state.timers.time_until_next(Instant::now())
    }

    /// Push pending watch changes to the poller.
    fn flush_changes(&self) {
        let changes: Vec<(RawFd, Events, Events)> = {
            let mut state = self.state.borrow_mut();
            let fds = &mut state.fds;
            let changed = std::mem::take(&mut fds.changes);
            changed
                .into_iter()
                .map(|fd| {
                    let want = fds.watches.get(&fd).map_or(Events::NONE, |w| w.events);
                    let have = fds.registered.get(&fd).copied().unwrap_or_default();
                    (fd, want, have)
                })
                .collect()
        };

        let poll = self.poll.borrow();
        let registry = poll.registry();
        for (fd, want, have) in changes {
            let token = Token(fd as usize);
            let result = match (want.to_interest(), have.is_empty()) {
                (Some(interest), true) => registry.register(&mut SourceFd(&fd), token, interest),
                // EPOLL_CTL_MOD reports readiness that is still pending.
                (Some(interest), false) => {
                    registry.reregister(&mut SourceFd(&fd), token, interest)
                }
                (None, false) => registry.deregister(&mut SourceFd(&fd)),
                (None, true) => Ok(()),
            };
            let mut state = self.state.borrow_mut();
            match result {
                Ok(()) if want.is_empty() => {
                    state.fds.registered.remove(&fd);
                }
                Ok(()) => {
                    state.fds.registered.insert(fd, want);
                }
                Err(e) => {
                    warn!(fd, error = %e, "failed to update fd registration");
                    state.fds.registered.remove(&fd);
                }
            }
        }
    }

    /// Queue a re-registration of `fd` if it is still watched and known to
    /// the poller.
    fn rearm(&self, fd: RawFd) {
        let mut state = self.state.borrow_mut();
        let fds = &mut state.fds;
        if !fds.closed.contains(&fd)
            && fds.watches.contains_key(&fd)
            && fds.registered.contains_key(&fd)
        {
            fds.changes.insert(fd);
        }
    }

    /// One iteration: poll for readiness, then dispatch.
    pub fn run(&self) -> io::Result<()> {
        self.flush_changes();
        let timeout = self.timeout();

        let notifies: Vec<FdNotify> = {
            let mut poll = self.poll.borrow_mut();
            let mut events = self.events.borrow_mut();
            match poll.poll(&mut events, timeout) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
                Err(e) => return Err(e),
            }
            events
                .iter()
                .map(|ev| FdNotify {
                    fd: ev.token().0 as RawFd,
                    events: Events::from_mio(ev),
                })
                .collect()
        };
        trace!(ready = notifies.len(), "poll returned");
        self.dispatch(&notifies);
        Ok(())
    }

    /// Deliver externally observed readiness, then fire due timers and
    /// queued idle callbacks.
    pub fn dispatch(&self, notifies: &[FdNotify]) {
        self.state.borrow_mut().fds.closed.clear();

        for n in notifies {
            let target = {
                let state = self.state.borrow();
                if state.fds.closed.contains(&n.fd) {
                    None
                } else {
                    state.fds.watches.get(&n.fd).and_then(|w| {
                        let ev = w.events & n.events;
                        (!ev.is_empty()).then(|| (Rc::clone(&w.callback), ev))
                    })
                }
            };
            if let Some((callback, ev)) = target {
                callback(self, n.fd, ev);
                self.rearm(n.fd);
            }
        }

        let now = Instant::now();
        loop {
            let due = self.state.borrow_mut().timers.pop_due(now);
            match due {
                Some((_, callback)) => callback(self),
                None => break,
            }
        }

        // Idles added while this pass runs wait for the next one.
        let watermark = self.state.borrow().next_idle;
        loop {
            let idle = {
                let mut state = self.state.borrow_mut();
                match state.idles.front() {
                    Some((id, _)) if *id < watermark => state.idles.pop_front(),
                    _ => None,
                }
            };
            match idle {
                Some((_, callback)) => callback(self),
                None => break,
            }
        }
    }

    /// Run until `done` returns true.
    pub fn run_until(&self, mut done: impl FnMut() -> bool) -> io::Result<()> {
        while !done() {
            self.run()?;
        }
        Ok(())
    }
}
