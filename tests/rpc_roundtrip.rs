//! End-to-end RPC tests: client and server share one dispatch in-process.

use std::cell::{Cell, RefCell};
use std::net::IpAddr;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use protolite::codec::ServiceDescriptor;
use protolite::directory::{
    name_query, Directory, BY_NAME, DIR_LOOKUP, LOOKUP_RESULT, NAME, PERSON,
};
use protolite::dispatch::Dispatch;
use protolite::network::{Address, Client, ClientState, ConnectStatus, Responder, Server, Service};
use protolite::{ErrorCode, Message, Value};
use tempfile::TempDir;

const DATABASE: &str = "\
dave
 id 666
 email who@cares.com
 mobile (123)123-1234
lou
 id 1
";

/// Run the loop until `done`, failing the test after ten seconds.
fn run_until(dispatch: &Dispatch, mut done: impl FnMut() -> bool) {
    let expired = Rc::new(Cell::new(false));
    let flag = Rc::clone(&expired);
    let guard = dispatch.add_timer_after(Duration::from_secs(10), move |_| flag.set(true));
    while !done() {
        assert!(!expired.get(), "timed out waiting for the reactor");
        dispatch.run().unwrap();
    }
    dispatch.remove_timer(guard);
}

type Results = Rc<RefCell<Vec<Option<Message>>>>;

fn call(client: &Client, name: &str, results: &Results) {
    let results = Rc::clone(results);
    client.invoke(BY_NAME, &name_query(name), move |m| results.borrow_mut().push(m));
}

fn person_id(result: &Message) -> Option<i32> {
    match result.get("person").unwrap()? {
        Value::Message(p) => p.get("id").unwrap()?.as_i32(),
        _ => None,
    }
}

/// Holds every responder until the test answers it.
#[derive(Clone, Default)]
struct Deferred {
    held: Rc<RefCell<Vec<Responder>>>,
}

impl Deferred {
    fn answer_all(&self) {
        let held: Vec<Responder> = self.held.borrow_mut().drain(..).collect();
        for r in held {
            let id = r.request_id() as i32;
            r.respond(answer_with_id(id));
        }
    }
}

impl Service for Deferred {
    fn descriptor(&self) -> &'static ServiceDescriptor {
        &DIR_LOOKUP
    }

    fn invoke(&self, _method_index: u32, _input: Message, responder: Responder) {
        self.held.borrow_mut().push(responder);
    }
}

/// Answers at once with the request id as the person's id.
struct EchoId;

impl Service for EchoId {
    fn descriptor(&self) -> &'static ServiceDescriptor {
        &DIR_LOOKUP
    }

    fn invoke(&self, _method_index: u32, _input: Message, responder: Responder) {
        let id = responder.request_id() as i32;
        responder.respond(answer_with_id(id));
    }
}

fn answer_with_id(id: i32) -> Message {
    let mut person = Message::new(&PERSON);
    person.set("name", "echo").unwrap();
    person.set("id", id).unwrap();
    let mut result = Message::new(&LOOKUP_RESULT);
    result.set("person", person).unwrap();
    result
}

fn unix_address(dir: &TempDir) -> Address {
    Address::local(dir.path().join("dir.sock"))
}

#[test]
fn test_lookup_over_unix_socket() {
    let tmp = TempDir::new().unwrap();
    let address = unix_address(&tmp);
    let dispatch = Dispatch::new().unwrap();
    let directory = Directory::parse(DATABASE).unwrap();
    let _server = Server::bind(&address, directory, Some(Rc::clone(&dispatch))).unwrap();
    let client = Client::new(address, &DIR_LOOKUP, Some(Rc::clone(&dispatch))).unwrap();
    assert_eq!(client.state(), ClientState::Init);

    run_until(&dispatch, || client.is_connected());

    let results: Results = Rc::default();
    call(&client, "dave", &results);
    call(&client, "nobody", &results);
    let r = Rc::clone(&results);
    client.invoke(BY_NAME, &Message::new(&NAME), move |m| r.borrow_mut().push(m));
    run_until(&dispatch, || results.borrow().len() == 3);

    let results = results.borrow();
    assert_eq!(person_id(results[0].as_ref().unwrap()), Some(666));
    assert!(!results[1].as_ref().unwrap().has("person").unwrap());
    // Service failure arrives as a message-less completion.
    assert!(results[2].is_none());
    assert_eq!(client.pending_calls(), 0);
}

#[test]
fn test_lookup_over_tcp() {
    let dispatch = Dispatch::new().unwrap();
    let directory = Directory::parse(DATABASE).unwrap();
    let server = Server::bind(
        &Address::tcp("127.0.0.1:0"),
        directory,
        Some(Rc::clone(&dispatch)),
    )
    .unwrap();
    let port = server.local_addr().unwrap().port();

    let client = Client::new(
        Address::tcp(format!("127.0.0.1:{port}")),
        &DIR_LOOKUP,
        Some(Rc::clone(&dispatch)),
    )
    .unwrap();

    // Queued before the connection exists.
    let results: Results = Rc::default();
    call(&client, "lou", &results);
    run_until(&dispatch, || !results.borrow().is_empty());
    assert_eq!(person_id(results.borrow()[0].as_ref().unwrap()), Some(1));
    assert_eq!(server.connection_count(), 1);
}

#[test]
fn test_out_of_order_answers_match_request_ids() {
    let tmp = TempDir::new().unwrap();
    let address = unix_address(&tmp);
    let dispatch = Dispatch::new().unwrap();
    let service = Deferred::default();
    let server = Server::bind(&address, service.clone(), Some(Rc::clone(&dispatch))).unwrap();
    let client = Client::new(address, &DIR_LOOKUP, Some(Rc::clone(&dispatch))).unwrap();

    let results: Results = Rc::default();
    for name in ["a", "b", "c"] {
        call(&client, name, &results);
    }
    run_until(&dispatch, || server.pending_requests() == 3);

    // Answer newest first.
    let mut held: Vec<Responder> = service.held.borrow_mut().drain(..).collect();
    held.reverse();
    for r in held {
        let id = r.request_id() as i32;
        r.respond(answer_with_id(id));
    }
    run_until(&dispatch, || results.borrow().len() == 3);

    let ids: Vec<_> = results
        .borrow()
        .iter()
        .map(|m| person_id(m.as_ref().unwrap()).unwrap())
        .collect();
    assert_eq!(ids, vec![3, 2, 1]);
    assert_eq!(server.pending_requests(), 0);
}

#[test]
fn test_request_ids_are_reused() {
    let tmp = TempDir::new().unwrap();
    let address = unix_address(&tmp);
    let dispatch = Dispatch::new().unwrap();
    let _server = Server::bind(&address, EchoId, Some(Rc::clone(&dispatch))).unwrap();
    let client = Client::new(address, &DIR_LOOKUP, Some(Rc::clone(&dispatch))).unwrap();

    let results: Results = Rc::default();
    call(&client, "x", &results);
    run_until(&dispatch, || results.borrow().len() == 1);
    call(&client, "y", &results);
    run_until(&dispatch, || results.borrow().len() == 2);

    let results = results.borrow();
    assert_eq!(person_id(results[0].as_ref().unwrap()), Some(1));
    assert_eq!(person_id(results[1].as_ref().unwrap()), Some(1));
}

#[test]
fn test_too_many_pending_requests() {
    let tmp = TempDir::new().unwrap();
    let address = unix_address(&tmp);
    let dispatch = Dispatch::new().unwrap();
    let service = Deferred::default();
    let server = Server::bind(&address, service.clone(), Some(Rc::clone(&dispatch))).unwrap();
    server.set_max_pending_requests(1);
    let client = Client::new(address, &DIR_LOOKUP, Some(Rc::clone(&dispatch))).unwrap();

    let results: Results = Rc::default();
    for name in ["a", "b", "c"] {
        call(&client, name, &results);
    }
    run_until(&dispatch, || results.borrow().len() == 2);
    assert!(results.borrow().iter().all(Option::is_none));
    assert_eq!(server.pending_requests(), 1);

    service.answer_all();
    run_until(&dispatch, || results.borrow().len() == 3);
    assert_eq!(person_id(results.borrow()[2].as_ref().unwrap()), Some(1));
    assert!(client.is_connected());
}

#[test]
fn test_answers_after_client_left_are_dropped() {
    let tmp = TempDir::new().unwrap();
    let address = unix_address(&tmp);
    let dispatch = Dispatch::new().unwrap();
    let service = Deferred::default();
    let server = Server::bind(&address, service.clone(), Some(Rc::clone(&dispatch))).unwrap();
    let errors = Rc::new(RefCell::new(Vec::new()));
    let e = Rc::clone(&errors);
    server.set_error_handler(move |code, _| e.borrow_mut().push(code));

    let client = Client::new(address, &DIR_LOOKUP, Some(Rc::clone(&dispatch))).unwrap();
    let results: Results = Rc::default();
    call(&client, "a", &results);
    call(&client, "b", &results);
    run_until(&dispatch, || server.pending_requests() == 2);

    client.destroy();
    assert_eq!(results.borrow().len(), 2);
    assert!(results.borrow().iter().all(Option::is_none));

    run_until(&dispatch, || server.connection_count() == 0);
    assert_eq!(errors.borrow().as_slice(), &[ErrorCode::ClientTerminated]);
    assert_eq!(service.held.borrow().len(), 2);

    service.answer_all();
    dispatch.dispatch(&[]);
    assert_eq!(server.pending_requests(), 0);
}

#[test]
fn test_client_reconnects_after_server_restart() {
    let tmp = TempDir::new().unwrap();
    let address = unix_address(&tmp);
    let dispatch = Dispatch::new().unwrap();
    let server = Server::bind(&address, EchoId, Some(Rc::clone(&dispatch))).unwrap();

    let client = Client::new(address.clone(), &DIR_LOOKUP, Some(Rc::clone(&dispatch))).unwrap();
    client.set_autoreconnect_period(Duration::from_millis(20));
    let errors = Rc::new(RefCell::new(Vec::new()));
    let e = Rc::clone(&errors);
    client.set_error_handler(move |code, _| e.borrow_mut().push(code));
    run_until(&dispatch, || client.is_connected());

    drop(server);
    run_until(&dispatch, || !client.is_connected());
    assert_eq!(errors.borrow()[0], ErrorCode::ClientTerminated);

    // Calls fail fast while the client waits to reconnect.
    let results: Results = Rc::default();
    if client.state() == ClientState::FailedWaiting {
        call(&client, "early", &results);
        assert_eq!(results.borrow().len(), 1);
        assert!(results.borrow()[0].is_none());
    }

    let _server = Server::bind(&address, EchoId, Some(Rc::clone(&dispatch))).unwrap();
    run_until(&dispatch, || client.is_connected());

    let before = results.borrow().len();
    call(&client, "again", &results);
    run_until(&dispatch, || results.borrow().len() == before + 1);
    assert!(results.borrow()[before].is_some());
}

#[test]
fn test_connect_failures() {
    let tmp = TempDir::new().unwrap();
    let dispatch = Dispatch::new().unwrap();

    let client = Client::new(
        Address::local(tmp.path().join("nobody-home.sock")),
        &DIR_LOOKUP,
        Some(Rc::clone(&dispatch)),
    )
    .unwrap();
    client.disable_autoreconnect();
    assert_eq!(client.connect(), ConnectStatus::ErrorConnect);
    assert_eq!(client.state(), ClientState::Failed);

    let results: Results = Rc::default();
    call(&client, "x", &results);
    assert!(results.borrow()[0].is_none());

    let named = Client::new(
        Address::tcp("no.such.host:80"),
        &DIR_LOOKUP,
        Some(Rc::clone(&dispatch)),
    )
    .unwrap();
    named.disable_autoreconnect();
    named.set_name_resolver(|_: &str| -> Result<IpAddr, String> { Err("no such host".into()) });
    let codes = Rc::new(RefCell::new(Vec::new()));
    let c = Rc::clone(&codes);
    named.set_error_handler(move |code, _| c.borrow_mut().push(code));
    assert_eq!(named.connect(), ConnectStatus::ErrorNameLookup);
    assert_eq!(codes.borrow().as_slice(), &[ErrorCode::HostNotFound]);
}

/// Detaches every responder and answers from a worker thread.
struct Threaded {
    directory: Directory,
}

impl Service for Threaded {
    fn descriptor(&self) -> &'static ServiceDescriptor {
        &DIR_LOOKUP
    }

    fn invoke(&self, _method_index: u32, input: Message, responder: Responder) {
        let name = input
            .get("name")
            .unwrap()
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let result = self.directory.lookup(&name);
        let remote = responder.detach().unwrap();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            remote.respond(result).unwrap();
        });
    }
}

#[test]
fn test_responses_from_another_thread() {
    let tmp = TempDir::new().unwrap();
    let address = unix_address(&tmp);
    let dispatch = Dispatch::new().unwrap();
    let service = Threaded {
        directory: Directory::parse(DATABASE).unwrap(),
    };
    let server = Server::bind(&address, service, Some(Rc::clone(&dispatch))).unwrap();
    server.configure_threading().unwrap();
    let client = Client::new(address, &DIR_LOOKUP, Some(Rc::clone(&dispatch))).unwrap();

    let results: Results = Rc::default();
    call(&client, "dave", &results);
    call(&client, "lou", &results);
    run_until(&dispatch, || results.borrow().len() == 2);

    let mut ids: Vec<_> = results
        .borrow()
        .iter()
        .map(|m| person_id(m.as_ref().unwrap()).unwrap())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 666]);
    assert_eq!(server.pending_requests(), 0);
}

#[test]
fn test_server_destroy_returns_service() {
    let tmp = TempDir::new().unwrap();
    let address = unix_address(&tmp);
    let path = tmp.path().join("dir.sock");
    let dispatch = Dispatch::new().unwrap();
    let server = Server::bind(&address, EchoId, Some(Rc::clone(&dispatch))).unwrap();
    assert!(path.exists());

    let service = server.destroy();
    assert_eq!(service.descriptor().name, "foo.DirLookup");
    assert!(!path.exists());
}
