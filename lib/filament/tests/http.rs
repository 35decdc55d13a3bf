mod common;

use filament::http::{
    HttpClient, HttpClientHandler, HttpRequest, HttpResponse, HttpServer, HttpServerHandler,
    HttpSession, HttpSessionHandler,
};
use filament::Reactor;
use std::sync::{Arc, Mutex};

use common::{loopback, wait_until};

/// Answers GET /x with "hello" and stores PUT bodies in the content cache
/// as ready-made 200 responses.
struct StorageSession;

impl HttpSessionHandler for StorageSession {
    fn on_request(&self, session: &Arc<HttpSession>, request: &HttpRequest) {
        match request.method() {
            "GET" => {
                let mut response = HttpResponse::new();
                response.set_begin(200);
                response.set_body(b"hello");
                session.send_response(&response);
            }
            "PUT" => {
                let mut cached = HttpResponse::new();
                cached.set_begin(200);
                cached.set_body(request.body());
                session.cache().insert(request.url_path(), cached.cache().to_vec());

                let mut response = HttpResponse::new();
                response.set_begin(201);
                response.set_body(b"");
                session.send_response(&response);
            }
            _ => {
                let mut response = HttpResponse::new();
                response.set_begin(405);
                response.set_body(b"");
                session.send_response(&response);
            }
        }
    }
}

struct StorageServer;

impl HttpServerHandler for StorageServer {
    fn create_session(&self) -> Arc<dyn HttpSessionHandler> {
        Arc::new(StorageSession)
    }
}

#[derive(Default)]
struct CollectingClient {
    responses: Mutex<Vec<(u16, Vec<u8>, Option<String>)>>,
}

impl HttpClientHandler for CollectingClient {
    fn on_response(&self, _client: &Arc<HttpClient>, response: &HttpResponse) {
        self.responses.lock().unwrap().push((
            response.status(),
            response.body().to_vec(),
            response.find_header("Content-Length").map(str::to_string),
        ));
    }
}

fn start_server(reactor: &Reactor) -> (HttpServer, u16) {
    let server = HttpServer::new(reactor, loopback(0, 2), Arc::new(StorageServer), None);
    assert!(server.start());

    let port = server.address().unwrap().port();
    (server, port)
}

#[test]
fn test_get_with_content_length() {
    let reactor = Reactor::new(None).unwrap();
    reactor.start_with(&loopback(0, 2));

    let (server, port) = start_server(&reactor);

    let handler = Arc::new(CollectingClient::default());
    let client = HttpClient::new(&reactor, loopback(port, 2), handler.clone(), None);

    assert!(client.connect());
    client.send(b"GET /x HTTP/1.1\r\nHost: h\r\n\r\n");

    assert!(wait_until(|| handler.responses.lock().unwrap().len() == 1));

    let responses = handler.responses.lock().unwrap();
    assert_eq!(responses[0].0, 200);
    assert_eq!(responses[0].1, b"hello");
    assert_eq!(responses[0].2.as_deref(), Some("5"));
    drop(responses);

    client.disconnect();
    assert!(wait_until(|| !client.is_connected()));

    assert!(server.stop());
    reactor.stop();
}

#[test]
fn test_put_then_get_cached() {
    let reactor = Reactor::new(None).unwrap();
    reactor.start(2, false);

    let (server, port) = start_server(&reactor);

    let handler = Arc::new(CollectingClient::default());
    let client = HttpClient::new(&reactor, loopback(port, 2), handler.clone(), None);

    assert!(client.connect());

    let mut put = HttpRequest::new();
    put.set_begin("PUT", "/storage/k");
    put.set_header("Host", "h");
    put.set_body(b"123");
    client.send_request(&put);

    assert!(wait_until(|| handler.responses.lock().unwrap().len() == 1));
    assert_eq!(handler.responses.lock().unwrap()[0].0, 201);
    assert_eq!(server.cache().len(), 1);

    // The GET is answered straight from the content cache
    let mut get = HttpRequest::new();
    get.set_begin("GET", "/storage/k");
    get.set_header("Host", "h");
    get.set_body(b"");
    client.send_request(&get);

    assert!(wait_until(|| handler.responses.lock().unwrap().len() == 2));

    let responses = handler.responses.lock().unwrap();
    assert_eq!(responses[1].0, 200);
    assert_eq!(responses[1].1, b"123");
    assert_eq!(responses[1].2.as_deref(), Some("3"));
    drop(responses);

    client.disconnect();
    assert!(wait_until(|| !client.is_connected()));

    assert!(server.stop());
    reactor.stop();
}

#[test]
fn test_query_string_stripped_for_cache_lookup() {
    let reactor = Reactor::new(None).unwrap();
    reactor.start(2, false);

    let (server, port) = start_server(&reactor);

    let handler = Arc::new(CollectingClient::default());
    let client = HttpClient::new(&reactor, loopback(port, 2), handler.clone(), None);

    assert!(client.connect());

    let mut put = HttpRequest::new();
    put.set_begin("PUT", "/storage/q");
    put.set_header("Host", "h");
    put.set_body(b"queried");
    client.send_request(&put);

    assert!(wait_until(|| handler.responses.lock().unwrap().len() == 1));

    let mut get = HttpRequest::new();
    get.set_begin("GET", "/storage/q?version=7");
    get.set_header("Host", "h");
    get.set_body(b"");
    client.send_request(&get);

    assert!(wait_until(|| handler.responses.lock().unwrap().len() == 2));
    assert_eq!(handler.responses.lock().unwrap()[1].1, b"queried");

    client.disconnect();
    assert!(wait_until(|| !client.is_connected()));

    assert!(server.stop());
    reactor.stop();
}

#[test]
fn test_malformed_request_closes_connection() {
    struct ErrorCounting {
        errors: Mutex<Vec<String>>,
    }

    impl HttpSessionHandler for ErrorCounting {
        fn on_request_error(&self, _session: &Arc<HttpSession>, _request: &HttpRequest, error: &str) {
            self.errors.lock().unwrap().push(error.to_string());
        }
    }

    struct ErrorServer {
        session: Arc<ErrorCounting>,
    }

    impl HttpServerHandler for ErrorServer {
        fn create_session(&self) -> Arc<dyn HttpSessionHandler> {
            self.session.clone()
        }
    }

    let reactor = Reactor::new(None).unwrap();
    reactor.start(2, false);

    let session = Arc::new(ErrorCounting {
        errors: Mutex::new(Vec::new()),
    });
    let server = HttpServer::new(
        &reactor,
        loopback(0, 2),
        Arc::new(ErrorServer { session: session.clone() }),
        None,
    );
    assert!(server.start());
    let port = server.address().unwrap().port();

    let handler = Arc::new(CollectingClient::default());
    let client = HttpClient::new(&reactor, loopback(port, 2), handler.clone(), None);

    assert!(client.connect());
    client.send(b"@@@ not http at all\r\n\r\n");

    // Garbage gets no response, the socket just closes
    assert!(wait_until(|| !client.is_connected()));
    assert_eq!(
        session.errors.lock().unwrap().as_slice(),
        &["Invalid HTTP request!".to_string()]
    );
    assert!(handler.responses.lock().unwrap().is_empty());

    assert!(server.stop());
    reactor.stop();
}
