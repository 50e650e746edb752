//! RPC server: listener, connections and pending requests.
//!
//! Every connection owns an incoming and an outgoing [`DataBuffer`] and a
//! list of requests the service has not answered yet. A connection that
//! closes first leaves its requests *defunct*: their answers are dropped.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use super::address::Address;
use super::request::{PendingList, RequestHandle, RequestSlab, RequestState};
use super::service::{Responder, Service};
use super::stream::{Listener, Stream};
use super::{log_errors, ErrorHandler};
use crate::codec::{Message, ServiceDescriptor};
use crate::core::{DataBuffer, ReadStatus};
use crate::dispatch::proxy::{self, ProxyReceiver, ProxySender};
use crate::dispatch::{Dispatch, Events};
use crate::error::{ErrorCode, Result, RpcError};
use crate::protocol::{
    DefaultServerProtocol, Deserialized, FrameInfo, PayloadRef, Protocol, StatusCode,
};

/// Server tuning.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Requests a connection may have outstanding; further requests are
    /// answered with `TooManyPending` without reaching the service.
    pub max_pending_requests_per_connection: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_pending_requests_per_connection: 32,
        }
    }
}

/// A response serialized off the reactor thread.
pub(crate) struct ProxiedResponse {
    pub handle: RequestHandle,
    pub frame: Vec<u8>,
}

pub(crate) enum Answer {
    Message {
        method_index: u32,
        request_id: u32,
        message: Option<Message>,
    },
    Frame(Vec<u8>),
}

struct Connection {
    stream: Stream,
    incoming: DataBuffer,
    outgoing: DataBuffer,
    pending: PendingList,
    write_armed: bool,
}

pub(crate) struct ServerInner {
    dispatch: Rc<Dispatch>,
    listener: Option<Listener>,
    bind_path: Option<PathBuf>,
    service: Rc<dyn Service>,
    descriptor: &'static ServiceDescriptor,
    protocol: Arc<dyn Protocol>,
    config: ServerConfig,
    connections: HashMap<u64, Connection>,
    next_connection: u64,
    requests: RequestSlab,
    error_handler: ErrorHandler,
    proxy: Option<(ProxySender<ProxiedResponse>, ProxyReceiver<ProxiedResponse>)>,
}

type Shared = Rc<RefCell<ServerInner>>;

/// A listening RPC server bound to one [`Service`].
pub struct Server {
    inner: Shared,
}

impl Server {
    /// Listen on `address` with the default configuration. Creates a
    /// dispatch if none is given.
    pub fn bind<S>(address: &Address, service: S, dispatch: Option<Rc<Dispatch>>) -> Result<Self>
    where
        S: Service + 'static,
    {
        Self::bind_with_config(address, service, dispatch, ServerConfig::default())
    }

    pub fn bind_with_config<S>(
        address: &Address,
        service: S,
        dispatch: Option<Rc<Dispatch>>,
        config: ServerConfig,
    ) -> Result<Self>
    where
        S: Service + 'static,
    {
        let dispatch = match dispatch {
            Some(d) => d,
            None => Dispatch::new()?,
        };
        let (listener, bind_path) = match address {
            Address::Local(path) => {
                remove_stale_socket(path);
                let l = Listener::bind_unix(path).map_err(|source| RpcError::Bind {
                    address: address.to_string(),
                    source,
                })?;
                (l, Some(path.clone()))
            }
            Address::Tcp(name) => {
                let addr = Address::listen_addr(name)?;
                let l = Listener::bind_tcp(addr).map_err(|source| RpcError::Bind {
                    address: address.to_string(),
                    source,
                })?;
                (l, None)
            }
        };
        info!(%address, "server listening");

        let descriptor = service.descriptor();
        let fd = listener.as_raw_fd();
        let inner = Rc::new(RefCell::new(ServerInner {
            dispatch: Rc::clone(&dispatch),
            listener: Some(listener),
            bind_path,
            service: Rc::new(service),
            descriptor,
            protocol: Arc::new(DefaultServerProtocol),
            config,
            connections: HashMap::new(),
            next_connection: 1,
            requests: RequestSlab::new(),
            error_handler: log_errors("rpc server"),
            proxy: None,
        }));

        let weak = Rc::downgrade(&inner);
        dispatch.watch_fd(fd, Events::READABLE, move |_, _, _| {
            if let Some(shared) = weak.upgrade() {
                accept_connections(&shared);
            }
        });
        Ok(Self { inner })
    }

    pub fn dispatch(&self) -> Rc<Dispatch> {
        Rc::clone(&self.inner.borrow().dispatch)
    }

    /// Bound TCP address (useful after binding port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.borrow().listener.as_ref()?.local_addr()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.borrow().connections.len()
    }

    /// Requests handed to the service and not yet answered, over all
    /// connections.
    pub fn pending_requests(&self) -> usize {
        let inner = self.inner.borrow();
        inner.connections.values().map(|c| c.pending.len()).sum()
    }

    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(ErrorCode, &str) + 'static,
    {
        self.inner.borrow_mut().error_handler = Rc::new(handler);
    }

    pub fn set_protocol<P>(&self, protocol: P)
    where
        P: Protocol + 'static,
    {
        self.inner.borrow_mut().protocol = Arc::new(protocol);
    }

    pub fn set_max_pending_requests(&self, max: usize) {
        self.inner.borrow_mut().config.max_pending_requests_per_connection = max;
    }

    /// Let responders be detached to other threads.
    pub fn configure_threading(&self) -> Result<()> {
        let dispatch = self.dispatch();
        let weak: Weak<RefCell<ServerInner>> = Rc::downgrade(&self.inner);
        let channel = proxy::channel(&dispatch, move |_, item: ProxiedResponse| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            if !deliver(&shared, item.handle, Answer::Frame(item.frame)) {
                let handler = Rc::clone(&shared.borrow().error_handler);
                handler(
                    ErrorCode::ProxyProblem,
                    &format!("proxied response for unknown request {}", item.handle),
                );
            }
        })?;
        let old = self.inner.borrow_mut().proxy.replace(channel);
        drop(old);
        Ok(())
    }

    /// Close the listener and every connection, then hand back the service.
    pub fn destroy(self) -> Rc<dyn Service> {
        teardown(&self.inner);
        let service = Rc::clone(&self.inner.borrow().service);
        service
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        teardown(&self.inner);
    }
}

fn teardown(shared: &Shared) {
    let (listener, connections, proxy) = {
        let mut guard = shared.borrow_mut();
        let inner = &mut *guard;
        let Some(listener) = inner.listener.take() else {
            return;
        };
        inner.dispatch.close_fd(listener.as_raw_fd());
        if let Some(path) = inner.bind_path.take() {
            if let Err(e) = fs::remove_file(&path) {
                debug!(path = %path.display(), error = %e, "could not unlink socket");
            }
        }
        let mut connections: Vec<Connection> = inner.connections.drain().map(|(_, c)| c).collect();
        for conn in &mut connections {
            inner.requests.orphan_all(&mut conn.pending);
            inner.dispatch.close_fd(conn.stream.as_raw_fd());
        }
        (listener, connections, inner.proxy.take())
    };
    debug!(connections = connections.len(), "server destroyed");
    drop(connections);
    drop(listener);
    drop(proxy);
}

/// Remove a UNIX socket file nobody is listening on.
fn remove_stale_socket(path: &Path) {
    let Ok(meta) = fs::symlink_metadata(path) else {
        return;
    };
    if !meta.file_type().is_socket() {
        warn!(path = %path.display(), "existing file is not a socket");
        return;
    }
    if std::os::unix::net::UnixStream::connect(path).is_ok() {
        return;
    }
    match fs::remove_file(path) {
        Ok(()) => info!(path = %path.display(), "removed stale socket"),
        Err(e) => warn!(path = %path.display(), error = %e, "unable to delete stale socket"),
    }
}

fn accept_connections(shared: &Shared) {
    loop {
        let accepted = {
            let inner = shared.borrow();
            match &inner.listener {
                Some(l) => l.accept(),
                None => return,
            }
        };
        match accepted {
            Ok(stream) => add_connection(shared, stream),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(error = %e, "accept failed");
                return;
            }
        }
    }
}

fn add_connection(shared: &Shared, stream: Stream) {
    if let Err(e) = stream.set_nodelay() {
        debug!(error = %e, "set_nodelay failed");
    }
    let fd = stream.as_raw_fd();
    let (dispatch, id) = {
        let mut inner = shared.borrow_mut();
        let id = inner.next_connection;
        inner.next_connection += 1;
        inner.connections.insert(
            id,
            Connection {
                stream,
                incoming: DataBuffer::new(),
                outgoing: DataBuffer::new(),
                pending: PendingList::default(),
                write_armed: false,
            },
        );
        (Rc::clone(&inner.dispatch), id)
    };
    debug!(conn = id, fd, "accepted connection");

    let weak = Rc::downgrade(shared);
    dispatch.watch_fd(fd, Events::READABLE, move |_, _, events| {
        let Some(shared) = weak.upgrade() else {
            return;
        };
        if events.is_writable() && !flush_connection(&shared, id) {
            return;
        }
        if events.is_readable() {
            read_connection(&shared, id);
        }
    });
}

/// Write what the socket takes and re-arm the watch. Returns `false` if the
/// connection is gone.
fn flush_connection(shared: &Shared, id: u64) -> bool {
    let result = {
        let mut guard = shared.borrow_mut();
        let inner = &mut *guard;
        let Some(conn) = inner.connections.get_mut(&id) else {
            return false;
        };
        let result = write_pending(conn);
        if result.is_ok() {
            let want_write = !conn.outgoing.is_empty();
            if want_write != conn.write_armed {
                conn.write_armed = want_write;
                let events = if want_write {
                    Events::BOTH
                } else {
                    Events::READABLE
                };
                inner.dispatch.modify_fd(conn.stream.as_raw_fd(), events);
            }
        }
        result
    };
    match result {
        Ok(()) => true,
        Err(e) => {
            close_connection(
                shared,
                id,
                Some((ErrorCode::ClientTerminated, format!("writing to client: {e}"))),
            );
            false
        }
    }
}

fn write_pending(conn: &mut Connection) -> io::Result<()> {
    while !conn.outgoing.is_empty() {
        if conn.outgoing.write_to(&mut conn.stream)? == 0 {
            break;
        }
    }
    Ok(())
}

fn read_connection(shared: &Shared, id: u64) {
    let mut eof = false;
    let failure = {
        let mut inner = shared.borrow_mut();
        let Some(conn) = inner.connections.get_mut(&id) else {
            return;
        };
        let mut failure = None;
        loop {
            match conn.incoming.read_from(&mut conn.stream) {
                Ok(ReadStatus::Data(n)) => trace!(conn = id, n, "read"),
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
        close_connection(
            shared,
            id,
            Some((ErrorCode::ClientTerminated, format!("reading from client: {e}"))),
        );
        return;
    }

    process_requests(shared, id);

    if eof {
        let pending = match shared.borrow().connections.get(&id) {
            Some(c) => c.pending.len(),
            None => return,
        };
        let reason = (pending > 0).then(|| {
            (
                ErrorCode::ClientTerminated,
                format!("client closed with {pending} requests pending"),
            )
        });
        close_connection(shared, id, reason);
    }
}

enum Step {
    Invoke(Rc<dyn Service>, RequestHandle, u32, u32, Message),
    Reject,
    Fail(String),
}

fn process_requests(shared: &Shared, id: u64) {
    loop {
        let step = {
            let mut guard = shared.borrow_mut();
            let inner = &mut *guard;
            let Some(conn) = inner.connections.get_mut(&id) else {
                return;
            };
            let descriptor = inner.descriptor;
            let got = inner.protocol.deserialize(&mut conn.incoming, &mut |info: &FrameInfo| {
                descriptor.method(info.method_index).map(|m| m.input)
            });
            match got {
                Deserialized::Incomplete => return,
                Deserialized::Failed(e) => Step::Fail(e.to_string()),
                Deserialized::Complete(payload) => {
                    let max = inner.config.max_pending_requests_per_connection;
                    if conn.pending.len() >= max {
                        warn!(
                            conn = id,
                            request_id = payload.request_id,
                            max,
                            "too many pending requests"
                        );
                        let refusal = PayloadRef {
                            status: StatusCode::TooManyPending,
                            method_index: payload.method_index,
                            request_id: payload.request_id,
                            message: None,
                        };
                        match inner.protocol.serialize(&mut conn.outgoing, &refusal) {
                            Ok(()) => Step::Reject,
                            Err(e) => Step::Fail(e.to_string()),
                        }
                    } else {
                        match payload.message {
                            Some(message) => {
                                let handle = inner.requests.alloc(id, &mut conn.pending);
                                Step::Invoke(
                                    Rc::clone(&inner.service),
                                    handle,
                                    payload.method_index,
                                    payload.request_id,
                                    message,
                                )
                            }
                            None => Step::Fail("request without a message".to_string()),
                        }
                    }
                }
            }
        };

        match step {
            Step::Invoke(service, handle, method_index, request_id, message) => {
                trace!(conn = id, method_index, request_id, "invoking service");
                let responder =
                    Responder::for_request(Rc::downgrade(shared), handle, method_index, request_id);
                service.invoke(method_index, message, responder);
            }
            Step::Reject => {
                if !flush_connection(shared, id) {
                    return;
                }
            }
            Step::Fail(message) => {
                close_connection(
                    shared,
                    id,
                    Some((ErrorCode::BadRequest, format!("bad request: {message}"))),
                );
                return;
            }
        }
    }
}

/// Route an answer to its connection, or drop it if the request is defunct.
/// Returns `false` if `handle` names no outstanding request.
pub(crate) fn deliver(shared: &Shared, handle: RequestHandle, answer: Answer) -> bool {
    let conn_id = {
        let mut guard = shared.borrow_mut();
        let inner = &mut *guard;
        match inner.requests.state(handle) {
            None => return false,
            Some(RequestState::Defunct) => {
                inner.requests.release(handle, None);
                debug!(handle, "dropping response for defunct request");
                return true;
            }
            Some(RequestState::Alive { conn }) => {
                let Some(c) = inner.connections.get_mut(&conn) else {
                    inner.requests.release(handle, None);
                    return true;
                };
                inner.requests.release(handle, Some(&mut c.pending));
                match answer {
                    Answer::Message {
                        method_index,
                        request_id,
                        message,
                    } => {
                        let payload = PayloadRef {
                            status: StatusCode::Success,
                            method_index,
                            request_id,
                            message: message.as_ref(),
                        };
                        if let Err(e) = inner.protocol.serialize(&mut c.outgoing, &payload) {
                            warn!(conn, request_id, error = %e, "response serialization failed");
                        }
                    }
                    Answer::Frame(frame) => c.outgoing.append(&frame),
                }
                conn
            }
        }
    };
    flush_connection(shared, conn_id);
    true
}

pub(crate) fn proxy_parts(shared: &Shared) -> Option<(ProxySender<ProxiedResponse>, Arc<dyn Protocol>)> {
    let inner = shared.borrow();
    let (sender, _) = inner.proxy.as_ref()?;
    Some((sender.clone(), Arc::clone(&inner.protocol)))
}

fn close_connection(shared: &Shared, id: u64, reason: Option<(ErrorCode, String)>) {
    let (conn, handler) = {
        let mut guard = shared.borrow_mut();
        let inner = &mut *guard;
        let Some(mut conn) = inner.connections.remove(&id) else {
            return;
        };
        let orphaned = inner.requests.orphan_all(&mut conn.pending);
        inner.dispatch.close_fd(conn.stream.as_raw_fd());
        debug!(conn = id, orphaned, "connection closed");
        (conn, Rc::clone(&inner.error_handler))
    };
    drop(conn);
    if let Some((code, message)) = reason {
        handler(code, &message);
    }
}
