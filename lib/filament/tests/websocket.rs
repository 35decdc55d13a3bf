mod common;

use filament::http::{HttpRequest, HttpResponse};
use filament::ws::{
    handshake, OpCode, WsClient, WsClientHandler, WsServer, WsServerHandler, WsSession,
    WsSessionHandler, CLOSE_STATUS_NORMAL,
};
use filament::Reactor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use common::{loopback, wait_until};

const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
const SAMPLE_ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

#[derive(Default)]
struct EchoSession {
    ws_disconnects: Arc<AtomicUsize>,
}

impl WsSessionHandler for EchoSession {
    fn on_ws_received(&self, session: &Arc<WsSession>, opcode: OpCode, data: &[u8]) {
        match opcode {
            OpCode::Text => session.send_text(data),
            _ => session.send_binary(data),
        };
    }

    fn on_ws_disconnected(&self, _session: &Arc<WsSession>) {
        self.ws_disconnects.fetch_add(1, Ordering::AcqRel);
    }
}

struct EchoServer {
    ws_disconnects: Arc<AtomicUsize>,
}

impl WsServerHandler for EchoServer {
    fn create_session(&self) -> Arc<dyn WsSessionHandler> {
        Arc::new(EchoSession {
            ws_disconnects: self.ws_disconnects.clone(),
        })
    }
}

#[derive(Default)]
struct RecordingClient {
    accept: Mutex<Option<String>>,
    messages: Mutex<Vec<(OpCode, Vec<u8>)>>,
    closes: Mutex<Vec<u16>>,
    ws_disconnects: AtomicUsize,
}

impl WsClientHandler for RecordingClient {
    fn on_ws_connecting(&self, client: &Arc<WsClient>, request: &mut HttpRequest) {
        handshake::fill_upgrade_request(request, &client.host(), "/chat", SAMPLE_KEY);
    }

    fn on_ws_connected(&self, _client: &Arc<WsClient>, response: &HttpResponse) {
        *self.accept.lock().unwrap() = response
            .find_header("Sec-WebSocket-Accept")
            .map(str::to_string);
    }

    fn on_ws_received(&self, _client: &Arc<WsClient>, opcode: OpCode, data: &[u8]) {
        self.messages.lock().unwrap().push((opcode, data.to_vec()));
    }

    fn on_ws_close(&self, _client: &Arc<WsClient>, status: u16, _reason: &[u8]) {
        self.closes.lock().unwrap().push(status);
    }

    fn on_ws_disconnected(&self, _client: &Arc<WsClient>) {
        self.ws_disconnects.fetch_add(1, Ordering::AcqRel);
    }
}

fn start_server(reactor: &Reactor) -> (WsServer, u16, Arc<AtomicUsize>) {
    let ws_disconnects = Arc::new(AtomicUsize::new(0));
    let server = WsServer::new(
        reactor,
        loopback(0, 2),
        Arc::new(EchoServer {
            ws_disconnects: ws_disconnects.clone(),
        }),
        None,
    );
    assert!(server.start());

    let port = server.address().unwrap().port();
    (server, port, ws_disconnects)
}

#[test]
fn test_upgrade_and_echo() {
    let reactor = Reactor::new(None).unwrap();
    reactor.start(2, false);

    let (server, port, _) = start_server(&reactor);

    let handler = Arc::new(RecordingClient::default());
    let client = WsClient::new(&reactor, loopback(port, 2), handler.clone(), None);

    assert!(client.connect());
    assert!(wait_until(|| client.is_handshaked()));

    // The accept key answers the sample nonce exactly as RFC 6455 computes
    assert_eq!(handler.accept.lock().unwrap().as_deref(), Some(SAMPLE_ACCEPT));

    assert!(client.send_text(b"test") > 0);
    assert!(wait_until(|| !handler.messages.lock().unwrap().is_empty()));

    let messages = handler.messages.lock().unwrap();
    assert_eq!(messages.as_slice(), &[(OpCode::Text, b"test".to_vec())]);
    drop(messages);

    client.disconnect();
    assert!(wait_until(|| !client.is_connected()));

    assert!(server.stop());
    reactor.stop();
}

#[test]
fn test_close_handshake() {
    let reactor = Reactor::new(None).unwrap();
    reactor.start(2, false);

    let (server, port, server_ws_disconnects) = start_server(&reactor);

    let handler = Arc::new(RecordingClient::default());
    let client = WsClient::new(&reactor, loopback(port, 2), handler.clone(), None);

    assert!(client.connect());
    assert!(wait_until(|| client.is_handshaked()));

    // Client initiates; the server echoes CLOSE(1000) and both ends drop
    assert!(client.close(CLOSE_STATUS_NORMAL) > 0);

    assert!(wait_until(|| !client.is_connected()));
    assert!(wait_until(|| server.session_count() == 0));

    assert_eq!(handler.closes.lock().unwrap().as_slice(), &[CLOSE_STATUS_NORMAL]);
    assert_eq!(handler.ws_disconnects.load(Ordering::Acquire), 1);
    assert!(wait_until(|| server_ws_disconnects.load(Ordering::Acquire) == 1));

    assert!(server.stop());
    reactor.stop();
}

#[test]
fn test_fragmented_message_echoed_whole() {
    use filament::ws::frame::prepare_frame;
    use filament::ws::{WS_CONTINUATION, WS_FIN, WS_TEXT};

    let reactor = Reactor::new(None).unwrap();
    reactor.start(2, false);

    let (server, port, _) = start_server(&reactor);

    let handler = Arc::new(RecordingClient::default());
    let client = WsClient::new(&reactor, loopback(port, 2), handler.clone(), None);

    assert!(client.connect());
    assert!(wait_until(|| client.is_handshaked()));

    // Hand-rolled fragments through the raw pipeline; the session must
    // reassemble before echoing
    let mut wire = prepare_frame(WS_TEXT, true, b"frag", None);
    wire.extend(prepare_frame(WS_FIN | WS_CONTINUATION, true, b"mented", None));
    client.http().send(&wire);

    assert!(wait_until(|| !handler.messages.lock().unwrap().is_empty()));
    assert_eq!(
        handler.messages.lock().unwrap().as_slice(),
        &[(OpCode::Text, b"fragmented".to_vec())]
    );

    client.disconnect();
    assert!(wait_until(|| !client.is_connected()));

    assert!(server.stop());
    reactor.stop();
}

#[test]
fn test_multicast_text() {
    let reactor = Reactor::new(None).unwrap();
    reactor.start(2, false);

    let (server, port, _) = start_server(&reactor);

    let first = Arc::new(RecordingClient::default());
    let second = Arc::new(RecordingClient::default());
    let clients: Vec<_> = [&first, &second]
        .iter()
        .map(|handler| WsClient::new(&reactor, loopback(port, 2), (*handler).clone(), None))
        .collect();

    for client in &clients {
        assert!(client.connect());
        assert!(wait_until(|| client.is_handshaked()));
    }

    assert!(server.multicast_text(b"fan-out"));

    assert!(wait_until(|| !first.messages.lock().unwrap().is_empty()
        && !second.messages.lock().unwrap().is_empty()));

    for handler in [&first, &second].iter() {
        assert_eq!(
            handler.messages.lock().unwrap().as_slice(),
            &[(OpCode::Text, b"fan-out".to_vec())]
        );
    }

    for client in &clients {
        client.disconnect();
        assert!(wait_until(|| !client.is_connected()));
    }

    assert!(server.stop());
    reactor.stop();
}
