//! Services and the handles they answer through.

use std::cell::RefCell;
use std::fmt;
use std::rc::Weak;
use std::sync::Arc;

use tracing::error;

use super::request::RequestHandle;
use super::server::{self, Answer, ProxiedResponse, ServerInner};
use crate::codec::{Message, ServiceDescriptor};
use crate::dispatch::proxy::ProxySender;
use crate::error::RpcError;
use crate::protocol::{PayloadRef, Protocol, StatusCode};

/// An RPC service implementation.
///
/// `invoke` may answer before returning or keep the [`Responder`] and answer
/// later from any reactor callback.
pub trait Service {
    fn descriptor(&self) -> &'static ServiceDescriptor;

    fn invoke(&self, method_index: u32, input: Message, responder: Responder);
}

enum Target {
    Server {
        server: Weak<RefCell<ServerInner>>,
        handle: RequestHandle,
    },
    Local(Box<dyn FnOnce(Option<Message>)>),
    Answered,
}

/// One-shot answer for one request. Dropping it unanswered answers with
/// failure.
pub struct Responder {
    target: Target,
    method_index: u32,
    request_id: u32,
}

impl Responder {
    /// A responder that hands the answer to `callback`, for calling a
    /// service in-process.
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(Option<Message>) + 'static,
    {
        Self {
            target: Target::Local(Box::new(callback)),
            method_index: 0,
            request_id: 0,
        }
    }

    pub(crate) fn for_request(
        server: Weak<RefCell<ServerInner>>,
        handle: RequestHandle,
        method_index: u32,
        request_id: u32,
    ) -> Self {
        Self {
            target: Target::Server { server, handle },
            method_index,
            request_id,
        }
    }

    pub fn method_index(&self) -> u32 {
        self.method_index
    }

    /// Id the client chose for this request (0 for in-process calls).
    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    pub fn respond(self, message: Message) {
        self.finish(Some(message));
    }

    pub fn fail(self) {
        self.finish(None);
    }

    /// Answer with `message`, or with failure for `None`.
    pub fn finish(mut self, message: Option<Message>) {
        self.answer(message);
    }

    fn answer(&mut self, message: Option<Message>) {
        match std::mem::replace(&mut self.target, Target::Answered) {
            Target::Server { server, handle } => {
                if let Some(server) = server.upgrade() {
                    server::deliver(
                        &server,
                        handle,
                        Answer::Message {
                            method_index: self.method_index,
                            request_id: self.request_id,
                            message,
                        },
                    );
                }
            }
            Target::Local(callback) => callback(message),
            Target::Answered => {}
        }
    }

    /// Move the answer to another thread. Requires
    /// [`Server::configure_threading`](super::Server::configure_threading).
    pub fn detach(mut self) -> Result<RemoteResponder, RpcError> {
        let (server, handle) = match &self.target {
            Target::Server { server, handle } => (server.clone(), *handle),
            _ => return Err(RpcError::ThreadingNotConfigured),
        };
        let shared = server.upgrade().ok_or(RpcError::ProxyClosed)?;
        let (sender, protocol) =
            server::proxy_parts(&shared).ok_or(RpcError::ThreadingNotConfigured)?;
        self.target = Target::Answered;
        Ok(RemoteResponder {
            sender,
            protocol,
            handle,
            method_index: self.method_index,
            request_id: self.request_id,
            answered: false,
        })
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        self.answer(None);
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = match self.target {
            Target::Server { handle, .. } => format!("request {handle}"),
            Target::Local(_) => "local".to_string(),
            Target::Answered => "answered".to_string(),
        };
        f.debug_struct("Responder")
            .field("target", &target)
            .field("method_index", &self.method_index)
            .field("request_id", &self.request_id)
            .finish()
    }
}

/// A detached [`Responder`]. The answer is serialized on the calling thread
/// and written to the socket by the reactor thread.
pub struct RemoteResponder {
    sender: ProxySender<ProxiedResponse>,
    protocol: Arc<dyn Protocol>,
    handle: RequestHandle,
    method_index: u32,
    request_id: u32,
    answered: bool,
}

impl RemoteResponder {
    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    pub fn respond(self, message: Message) -> Result<(), RpcError> {
        self.finish(Some(message))
    }

    pub fn fail(self) -> Result<(), RpcError> {
        self.finish(None)
    }

    pub fn finish(mut self, message: Option<Message>) -> Result<(), RpcError> {
        self.send(message.as_ref())
    }

    fn send(&mut self, message: Option<&Message>) -> Result<(), RpcError> {
        self.answered = true;
        let status = match message {
            Some(_) => StatusCode::Success,
            None => StatusCode::ServiceFailed,
        };
        let mut payload = PayloadRef {
            status,
            method_index: self.method_index,
            request_id: self.request_id,
            message,
        };
        let mut frame = Vec::new();
        if let Err(e) = self.protocol.serialize(&mut frame, &payload) {
            error!(request_id = self.request_id, error = %e, "response serialization failed");
            payload.status = StatusCode::ServiceFailed;
            payload.message = None;
            frame.clear();
            if self.protocol.serialize(&mut frame, &payload).is_err() {
                return Ok(());
            }
        }
        self.sender.send(ProxiedResponse {
            handle: self.handle,
            frame,
        })
    }
}

impl Drop for RemoteResponder {
    fn drop(&mut self) {
        if !self.answered {
            if let Err(e) = self.send(None) {
                error!(request_id = self.request_id, error = %e, "could not proxy failure response");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::test_schema::SIMPLE;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_local_responder_answers_once() {
        let got = Rc::new(RefCell::new(None));
        let g = Rc::clone(&got);
        let r = Responder::new(move |m| *g.borrow_mut() = Some(m));
        let mut m = Message::new(&SIMPLE);
        m.set("value", 3).unwrap();
        r.respond(m.clone());
        assert_eq!(*got.borrow(), Some(Some(m)));
    }

    #[test]
    fn test_dropped_responder_fails() {
        let calls = Rc::new(Cell::new(0));
        let failed = Rc::new(Cell::new(false));
        let (c, f) = (Rc::clone(&calls), Rc::clone(&failed));
        drop(Responder::new(move |m| {
            c.set(c.get() + 1);
            f.set(m.is_none());
        }));
        assert_eq!(calls.get(), 1);
        assert!(failed.get());
    }

    #[test]
    fn test_local_responder_cannot_detach() {
        let hit = Rc::new(Cell::new(false));
        let h = Rc::clone(&hit);
        let r = Responder::new(move |_| h.set(true));
        assert!(matches!(r.detach(), Err(RpcError::ThreadingNotConfigured)));
        // The failed detach dropped the responder, which answered.
        assert!(hit.get());
    }
}
