//! RPC client: a connection state machine over one service.
//!
//! ```text
//!  Init ─► NameLookup ─► Connecting ─► Connected
//!              ▲              │             │
//!              │              ▼             ▼
//!              └──── FailedWaiting ◄── (any failure) ──► Failed
//! ```
//!
//! Calls made before `Connected` are serialized into the outgoing buffer
//! right away and flushed once the socket connects. On failure every
//! outstanding call completes with `None`.

use std::cell::RefCell;
use std::fmt;
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tracing::{debug, info, trace};

use super::address::{Address, NameResolver, SystemResolver};
use super::closure::{ClosureTable, ResponseCallback};
use super::stream::Stream;
use super::{log_errors, ErrorHandler};
use crate::codec::{Message, ServiceDescriptor};
use crate::core::{DataBuffer, ReadStatus};
use crate::dispatch::{Dispatch, Events, IdleId, TimerId};
use crate::error::{ErrorCode, Result};
use crate::protocol::{DefaultClientProtocol, Deserialized, FrameInfo, PayloadRef, Protocol};

/// Reconnect behavior.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub autoreconnect: bool,
    pub autoreconnect_period: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            autoreconnect: true,
            autoreconnect_period: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    Init,
    NameLookup,
    Connecting,
    Connected,
    FailedWaiting,
    Failed,
    Destroyed,
}

/// Result of [`Client::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    /// Connected, or the connection is under way.
    Success,
    ErrorNameLookup,
    ErrorConnect,
}

enum Phase {
    Init { idle: IdleId },
    NameLookup,
    Connecting { stream: Stream },
    Connected { stream: Stream },
    FailedWaiting { timer: TimerId, code: ErrorCode },
    Failed { code: ErrorCode },
    Destroyed,
}

impl Phase {
    fn state(&self) -> ClientState {
        match self {
            Phase::Init { .. } => ClientState::Init,
            Phase::NameLookup => ClientState::NameLookup,
            Phase::Connecting { .. } => ClientState::Connecting,
            Phase::Connected { .. } => ClientState::Connected,
            Phase::FailedWaiting { .. } => ClientState::FailedWaiting,
            Phase::Failed { .. } => ClientState::Failed,
            Phase::Destroyed => ClientState::Destroyed,
        }
    }
}

enum ConnectTarget {
    Unix(PathBuf),
    Tcp(SocketAddr),
}

impl fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectTarget::Unix(p) => write!(f, "{}", p.display()),
            ConnectTarget::Tcp(a) => write!(f, "{a}"),
        }
    }
}

struct ClientInner {
    dispatch: Rc<Dispatch>,
    address: Address,
    descriptor: &'static ServiceDescriptor,
    phase: Phase,
    /// Bumped per lookup so a late answer to an abandoned lookup is ignored.
    lookup_generation: u64,
    incoming: DataBuffer,
    outgoing: DataBuffer,
    closures: ClosureTable,
    config: ClientConfig,
    protocol: Box<dyn Protocol>,
    resolver: Rc<dyn NameResolver>,
    error_handler: ErrorHandler,
}

type Shared = Rc<RefCell<ClientInner>>;

/// Client side of one service. Dropping it destroys it.
pub struct Client {
    inner: Shared,
}

impl Client {
    /// Create a client for `descriptor` at `address`. The first connection
    /// attempt starts on the next dispatch pass (or at [`connect`](Self::connect)).
    pub fn new(
        address: Address,
        descriptor: &'static ServiceDescriptor,
        dispatch: Option<Rc<Dispatch>>,
    ) -> Result<Self> {
        Self::with_config(address, descriptor, dispatch, ClientConfig::default())
    }

    pub fn with_config(
        address: Address,
        descriptor: &'static ServiceDescriptor,
        dispatch: Option<Rc<Dispatch>>,
        config: ClientConfig,
    ) -> Result<Self> {
        let dispatch = match dispatch {
            Some(d) => d,
            None => Dispatch::new()?,
        };
        let inner = Rc::new_cyclic(|weak: &Weak<RefCell<ClientInner>>| {
            let weak = weak.clone();
            let idle = dispatch.add_idle(move |_| {
                if let Some(shared) = weak.upgrade() {
                    let starting = matches!(shared.borrow().phase, Phase::Init { .. });
                    if starting {
                        begin_name_lookup(&shared);
                    }
                }
            });
            RefCell::new(ClientInner {
                dispatch: Rc::clone(&dispatch),
                address,
                descriptor,
                phase: Phase::Init { idle },
                lookup_generation: 0,
                incoming: DataBuffer::new(),
                outgoing: DataBuffer::new(),
                closures: ClosureTable::new(),
                config,
                protocol: Box::new(DefaultClientProtocol),
                resolver: Rc::new(SystemResolver),
                error_handler: log_errors("rpc client"),
            })
        });
        Ok(Self { inner })
    }

    pub fn descriptor(&self) -> &'static ServiceDescriptor {
        self.inner.borrow().descriptor
    }

    pub fn dispatch(&self) -> Rc<Dispatch> {
        Rc::clone(&self.inner.borrow().dispatch)
    }

    pub fn state(&self) -> ClientState {
        self.inner.borrow().phase.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ClientState::Connected
    }

    /// Calls waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.borrow().closures.len()
    }

    /// Start connecting now instead of on the next dispatch pass. Also
    /// retries at once from a failed state.
    pub fn connect(&self) -> ConnectStatus {
        let start = {
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;
            match inner.phase {
                Phase::Init { idle } => {
                    inner.dispatch.remove_idle(idle);
                    true
                }
                Phase::FailedWaiting { timer, .. } => {
                    inner.dispatch.remove_timer(timer);
                    true
                }
                Phase::Failed { .. } => true,
                _ => false,
            }
        };
        if start {
            begin_name_lookup(&self.inner);
        }
        match self.inner.borrow().phase {
            Phase::NameLookup | Phase::Connecting { .. } | Phase::Connected { .. } => {
                ConnectStatus::Success
            }
            Phase::FailedWaiting { code, .. } | Phase::Failed { code }
                if code == ErrorCode::HostNotFound =>
            {
                ConnectStatus::ErrorNameLookup
            }
            _ => ConnectStatus::ErrorConnect,
        }
    }

    /// Call method `method_index`; `callback` gets the response, or `None`
    /// if the call failed.
    ///
    /// # Panics
    /// If `method_index` is not a method of the service.
    pub fn invoke<F>(&self, method_index: u32, input: &Message, callback: F)
    where
        F: FnOnce(Option<Message>) + 'static,
    {
        let callback: ResponseCallback = Box::new(callback);
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        let Some(method) = inner.descriptor.method(method_index) else {
            panic!(
                "method index {method_index} out of range for {}",
                inner.descriptor.name
            );
        };
        if matches!(
            inner.phase,
            Phase::FailedWaiting { .. } | Phase::Failed { .. } | Phase::Destroyed
        ) {
            drop(guard);
            callback(None);
            return;
        }

        let request_id = inner.closures.next_id();
        let mut frame = DataBuffer::new();
        let payload = PayloadRef::request(method_index, request_id, input);
        if let Err(e) = inner.protocol.serialize(&mut frame, &payload) {
            let handler = Rc::clone(&inner.error_handler);
            drop(guard);
            handler(
                ErrorCode::BadRequest,
                &format!("serializing request for {}: {e}", method.name),
            );
            callback(None);
            return;
        }
        inner.closures.insert(method.output, callback);
        trace!(method = method.name, request_id, "request queued");

        let had_outgoing = !inner.outgoing.is_empty();
        frame.drain(&mut inner.outgoing);
        if let Phase::Connected { stream } = &inner.phase {
            if !had_outgoing {
                inner.dispatch.modify_fd(stream.as_raw_fd(), Events::BOTH);
            }
        }
    }

    /// Call a method by name. Returns `false` (without calling `callback`)
    /// if the service has no such method.
    pub fn invoke_by_name<F>(&self, method: &str, input: &Message, callback: F) -> bool
    where
        F: FnOnce(Option<Message>) + 'static,
    {
        match self.descriptor().method_index(method) {
            Some(index) => {
                self.invoke(index, input, callback);
                true
            }
            None => false,
        }
    }

    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(ErrorCode, &str) + 'static,
    {
        self.inner.borrow_mut().error_handler = Rc::new(handler);
    }

    pub fn set_name_resolver<R>(&self, resolver: R)
    where
        R: NameResolver + 'static,
    {
        self.inner.borrow_mut().resolver = Rc::new(resolver);
    }

    pub fn set_protocol<P>(&self, protocol: P)
    where
        P: Protocol + 'static,
    {
        self.inner.borrow_mut().protocol = Box::new(protocol);
    }

    pub fn disable_autoreconnect(&self) {
        self.inner.borrow_mut().config.autoreconnect = false;
    }

    /// Enable reconnecting, `period` after each failure.
    pub fn set_autoreconnect_period(&self, period: Duration) {
        let mut inner = self.inner.borrow_mut();
        inner.config.autoreconnect = true;
        inner.config.autoreconnect_period = period;
    }

    /// Close the connection and fail every outstanding call.
    pub fn destroy(self) {
        destroy(&self.inner);
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        destroy(&self.inner);
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Client")
            .field("address", &inner.address)
            .field("service", &inner.descriptor.name)
            .field("state", &inner.phase.state())
            .field("pending", &inner.closures.len())
            .finish()
    }
}

/// Release whatever the phase holds in the reactor.
fn release_phase(dispatch: &Dispatch, phase: &Phase) {
    match phase {
        Phase::Init { idle } => {
            dispatch.remove_idle(*idle);
        }
        Phase::Connecting { stream } | Phase::Connected { stream } => {
            dispatch.close_fd(stream.as_raw_fd());
        }
        Phase::FailedWaiting { timer, .. } => {
            dispatch.remove_timer(*timer);
        }
        Phase::NameLookup | Phase::Failed { .. } | Phase::Destroyed => {}
    }
}

fn destroy(shared: &Shared) {
    let (old, closures) = {
        let mut guard = shared.borrow_mut();
        let inner = &mut *guard;
        if matches!(inner.phase, Phase::Destroyed) {
            return;
        }
        let old = std::mem::replace(&mut inner.phase, Phase::Destroyed);
        release_phase(&inner.dispatch, &old);
        inner.incoming.clear();
        inner.outgoing.clear();
        (old, std::mem::take(&mut inner.closures))
    };
    drop(old);
    debug!("client destroyed");
    for callback in closures.into_callbacks() {
        callback(None);
    }
}

fn begin_name_lookup(shared: &Shared) {
    let (address, resolver, dispatch, generation) = {
        let mut inner = shared.borrow_mut();
        inner.phase = Phase::NameLookup;
        inner.lookup_generation += 1;
        (
            inner.address.clone(),
            Rc::clone(&inner.resolver),
            Rc::clone(&inner.dispatch),
            inner.lookup_generation,
        )
    };
    match address {
        Address::Local(path) => begin_connecting(shared, ConnectTarget::Unix(path)),
        Address::Tcp(name) => {
            let (host, port) = match Address::host_port(&name) {
                Ok((host, port)) => (host.to_string(), port),
                Err(_) => {
                    client_failed(
                        shared,
                        ErrorCode::HostNotFound,
                        format!("name '{name}' is not HOST:PORT"),
                    );
                    return;
                }
            };
            trace!(host = %host, port, "resolving");
            let weak = Rc::downgrade(shared);
            resolver.resolve(
                &dispatch,
                &host,
                Box::new(move |_, result| {
                    let Some(shared) = weak.upgrade() else {
                        return;
                    };
                    let current = {
                        let inner = shared.borrow();
                        matches!(inner.phase, Phase::NameLookup)
                            && inner.lookup_generation == generation
                    };
                    if !current {
                        return;
                    }
                    match result {
                        Ok(ip) => {
                            begin_connecting(&shared, ConnectTarget::Tcp(SocketAddr::new(ip, port)))
                        }
                        Err(message) => client_failed(
                            &shared,
                            ErrorCode::HostNotFound,
                            format!("name lookup failed for {name}: {message}"),
                        ),
                    }
                }),
            );
        }
    }
}

fn begin_connecting(shared: &Shared, target: ConnectTarget) {
    let connected = match &target {
        ConnectTarget::Unix(path) => Stream::connect_unix(path),
        ConnectTarget::Tcp(addr) => Stream::connect_tcp(*addr),
    };
    let stream = match connected {
        Ok(s) => s,
        Err(e) => {
            client_failed(
                shared,
                ErrorCode::ConnectionRefused,
                format!("error connecting to {target}: {e}"),
            );
            return;
        }
    };
    if let Err(e) = stream.set_nodelay() {
        debug!(error = %e, "set_nodelay failed");
    }
    let fd = stream.as_raw_fd();
    let dispatch = {
        let mut inner = shared.borrow_mut();
        inner.phase = Phase::Connecting { stream };
        Rc::clone(&inner.dispatch)
    };
    debug!(%target, fd, "connecting");

    let weak = Rc::downgrade(shared);
    dispatch.watch_fd(fd, Events::BOTH, move |_, _, _| {
        if let Some(shared) = weak.upgrade() {
            handle_connect_events(&shared);
        }
    });
}

fn handle_connect_events(shared: &Shared) {
    let status = {
        let inner = shared.borrow();
        match &inner.phase {
            Phase::Connecting { stream } => stream.finish_connect(),
            _ => return,
        }
    };
    match status {
        Ok(true) => set_connected(shared),
        Ok(false) => {}
        Err(e) => client_failed(
            shared,
            ErrorCode::ConnectionRefused,
            format!("failed connecting to server: {e}"),
        ),
    }
}

fn set_connected(shared: &Shared) {
    let (dispatch, fd, events) = {
        let mut guard = shared.borrow_mut();
        let inner = &mut *guard;
        let stream = match std::mem::replace(&mut inner.phase, Phase::NameLookup) {
            Phase::Connecting { stream } => stream,
            other => {
                inner.phase = other;
                return;
            }
        };
        let fd = stream.as_raw_fd();
        inner.phase = Phase::Connected { stream };
        let events = if inner.outgoing.is_empty() {
            Events::READABLE
        } else {
            Events::BOTH
        };
        info!(address = %inner.address, "connected");
        (Rc::clone(&inner.dispatch), fd, events)
    };

    let weak = Rc::downgrade(shared);
    dispatch.watch_fd(fd, events, move |_, _, events| {
        let Some(shared) = weak.upgrade() else {
            return;
        };
        if events.is_writable() && !flush_outgoing(&shared) {
            return;
        }
        if events.is_readable() {
            read_responses(&shared);
        }
    });
}

/// Returns `false` if the client failed.
fn flush_outgoing(shared: &Shared) -> bool {
    let result = {
        let mut guard = shared.borrow_mut();
        let inner = &mut *guard;
        let Phase::Connected { stream } = &mut inner.phase else {
            return false;
        };
        let mut result = Ok(());
        while !inner.outgoing.is_empty() {
            match inner.outgoing.write_to(stream) {
                Ok(0) => break,
                Ok(n) => trace!(n, "wrote"),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        let fd = stream.as_raw_fd();
        if result.is_ok()
            && inner.outgoing.is_empty()
            && inner.dispatch.watched_events(fd) != Events::READABLE
        {
            inner.dispatch.modify_fd(fd, Events::READABLE);
        }
        result
    };
    match result {
        Ok(()) => true,
        Err(e) => {
            client_failed(
                shared,
                ErrorCode::ClientTerminated,
                format!("writing to server: {e}"),
            );
            false
        }
    }
}

fn read_responses(shared: &Shared) {
    let mut eof = false;
    let failure = {
        let mut guard = shared.borrow_mut();
        let inner = &mut *guard;
        let Phase::Connected { stream } = &mut inner.phase else {
            return;
        };
        let mut failure = None;
        loop {
            match inner.incoming.read_from(stream) {
                Ok(ReadStatus::Data(n)) => trace!(n, "read"),
                Ok(ReadStatus::WouldBlock) => break,
                Ok(ReadStatus::Eof) => {
                    eof = true;
                    break;
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        failure
    };
    if let Some(e) = failure {
        client_failed(
            shared,
            ErrorCode::ClientTerminated,
            format!("reading from server: {e}"),
        );
        return;
    }

    process_responses(shared);

    if eof {
        let message = {
            let inner = shared.borrow();
            if !matches!(inner.phase, Phase::Connected { .. }) {
                return;
            }
            format!(
                "got end-of-file from server [{} bytes incoming, {} bytes outgoing]",
                inner.incoming.len(),
                inner.outgoing.len()
            )
        };
        client_failed(shared, ErrorCode::ClientTerminated, message);
    }
}

fn process_responses(shared: &Shared) {
    loop {
        let step = {
            let mut guard = shared.borrow_mut();
            let inner = &mut *guard;
            if !matches!(inner.phase, Phase::Connected { .. }) {
                return;
            }
            let closures = &inner.closures;
            let got = inner.protocol.deserialize(&mut inner.incoming, &mut |info: &FrameInfo| {
                closures.response_type(info.request_id)
            });
            match got {
                Deserialized::Incomplete => return,
                Deserialized::Failed(e) => Err(format!("error deserializing server response: {e}")),
                Deserialized::Complete(payload) => match inner.closures.complete(payload.request_id) {
                    Some(callback) => {
                        trace!(request_id = payload.request_id, status = ?payload.status, "response");
                        Ok((callback, payload.message))
                    }
                    None => Err(format!(
                        "bad request-id {} in response from server",
                        payload.request_id
                    )),
                },
            }
        };
        match step {
            Ok((callback, message)) => callback(message),
            Err(message) => {
                client_failed(shared, ErrorCode::BadRequest, message);
                return;
            }
        }
    }
}

/// Tear down the connection, schedule a reconnect if enabled, then report
/// `code` and fail every outstanding call.
fn client_failed(shared: &Shared, code: ErrorCode, message: String) {
    let (old, handler, closures) = {
        let mut guard = shared.borrow_mut();
        let inner = &mut *guard;
        if matches!(inner.phase, Phase::Destroyed) {
            return;
        }
        let old = std::mem::replace(&mut inner.phase, Phase::Failed { code });
        release_phase(&inner.dispatch, &old);
        inner.incoming.clear();
        inner.outgoing.clear();

        if inner.config.autoreconnect {
            let weak = Rc::downgrade(shared);
            let period = inner.config.autoreconnect_period;
            let timer = inner.dispatch.add_timer_after(period, move |_| {
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                let waiting = matches!(shared.borrow().phase, Phase::FailedWaiting { .. });
                if waiting {
                    begin_name_lookup(&shared);
                }
            });
            inner.phase = Phase::FailedWaiting { timer, code };
            debug!(address = %inner.address, ?period, "reconnect scheduled");
        }
        (
            old,
            Rc::clone(&inner.error_handler),
            std::mem::take(&mut inner.closures),
        )
    };
    drop(old);

    handler(code, &message);
    for callback in closures.into_callbacks() {
        callback(None);
    }
}
