mod common;

use filament::tcp::{
    TcpClient, TcpClientHandler, TcpServer, TcpServerHandler, TcpSession, TcpSessionHandler,
};
use filament::Reactor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use common::{loopback, wait_until};

struct EchoSession;

impl TcpSessionHandler for EchoSession {
    fn on_received(&self, session: &Arc<TcpSession>, data: &[u8]) {
        session.send(data);
    }
}

struct EchoServer;

impl TcpServerHandler for EchoServer {
    fn create_session(&self) -> Arc<dyn TcpSessionHandler> {
        Arc::new(EchoSession)
    }
}

#[derive(Default)]
struct CollectingClient {
    received: Mutex<Vec<u8>>,
    disconnects: AtomicUsize,
}

impl TcpClientHandler for CollectingClient {
    fn on_received(&self, _client: &Arc<TcpClient>, data: &[u8]) -> usize {
        self.received.lock().unwrap().extend_from_slice(data);
        data.len()
    }

    fn on_disconnected(&self, _client: &Arc<TcpClient>) {
        self.disconnects.fetch_add(1, Ordering::AcqRel);
    }
}

fn start_server(reactor: &Reactor, handler: Arc<dyn TcpServerHandler>) -> (TcpServer, u16) {
    let server = TcpServer::new(reactor, loopback(0, 2), handler, None);
    assert!(server.start());

    let port = server.address().unwrap().port();
    (server, port)
}

#[test]
fn test_echo() {
    let reactor = Reactor::new(None).unwrap();
    reactor.start(2, false);

    let (server, port) = start_server(&reactor, Arc::new(EchoServer));

    let handler = Arc::new(CollectingClient::default());
    let client = TcpClient::new(&reactor, loopback(port, 2), handler.clone(), None);

    assert!(client.connect());
    assert!(wait_until(|| server.session_count() == 1));

    assert!(client.send(b"test") > 0);
    assert!(wait_until(|| client.bytes_received() == 4));
    assert_eq!(handler.received.lock().unwrap().as_slice(), b"test");

    client.disconnect();
    assert!(wait_until(|| !client.is_connected()));

    assert!(server.stop());
    reactor.stop();
}

#[test]
fn test_multicast_to_three_clients() {
    let reactor = Reactor::new(None).unwrap();
    reactor.start(2, false);

    struct SilentSession;
    impl TcpSessionHandler for SilentSession {}

    struct SilentServer;
    impl TcpServerHandler for SilentServer {
        fn create_session(&self) -> Arc<dyn TcpSessionHandler> {
            Arc::new(SilentSession)
        }
    }

    let (server, port) = start_server(&reactor, Arc::new(SilentServer));

    let handlers: Vec<_> = (0..3).map(|_| Arc::new(CollectingClient::default())).collect();
    let clients: Vec<_> = handlers
        .iter()
        .map(|handler| TcpClient::new(&reactor, loopback(port, 2), handler.clone(), None))
        .collect();

    // Connect one client at a time and multicast after each join
    for (index, client) in clients.iter().enumerate() {
        assert!(client.connect());
        assert!(wait_until(|| server.session_count() == index + 1));

        assert!(server.multicast(b"test"));

        for joined in 0..=index {
            let expected = 4 * (index - joined + 1) as u64;
            assert!(wait_until(|| clients[joined].bytes_received() == expected));
        }
    }

    assert_eq!(clients[0].bytes_received(), 12);
    assert_eq!(clients[1].bytes_received(), 8);
    assert_eq!(clients[2].bytes_received(), 4);

    for client in &clients {
        client.disconnect();
        assert!(wait_until(|| !client.is_connected()));
    }

    assert!(server.stop());
    reactor.stop();
}

#[test]
fn test_echo_with_strands() {
    let reactor = Reactor::new(None).unwrap();
    reactor.start(4, false);

    let mut settings = loopback(0, 4);
    settings.strand_required = true;

    let server = TcpServer::new(&reactor, settings, Arc::new(EchoServer), None);
    assert!(server.start());
    let port = server.address().unwrap().port();

    let handler = Arc::new(CollectingClient::default());
    let mut client_settings = loopback(port, 4);
    client_settings.strand_required = true;
    let client = TcpClient::new(&reactor, client_settings, handler.clone(), None);

    assert!(client.connect());

    for chunk in [&b"one"[..], &b"two"[..], &b"three"[..]].iter() {
        client.send(chunk);
    }

    assert!(wait_until(|| client.bytes_received() == 11));
    assert_eq!(handler.received.lock().unwrap().as_slice(), b"onetwothree");

    client.disconnect();
    assert!(wait_until(|| !client.is_connected()));

    assert!(server.stop());
    reactor.stop();
}

#[test]
fn test_multicast_without_sessions_is_noop() {
    let reactor = Reactor::new(None).unwrap();
    reactor.start(1, false);

    let (server, _port) = start_server(&reactor, Arc::new(EchoServer));

    assert!(server.multicast(b"nobody home"));
    assert_eq!(server.bytes_sent(), 0);

    assert!(server.stop());
    reactor.stop();
}

#[test]
fn test_disconnect_fires_once() {
    let reactor = Reactor::new(None).unwrap();
    reactor.start(2, false);

    let (server, port) = start_server(&reactor, Arc::new(EchoServer));

    let handler = Arc::new(CollectingClient::default());
    let client = TcpClient::new(&reactor, loopback(port, 2), handler.clone(), None);

    assert!(client.connect());
    assert!(wait_until(|| server.session_count() == 1));

    // A racing explicit disconnect and server-side teardown must still
    // produce exactly one notification
    client.disconnect();
    client.disconnect();
    assert!(wait_until(|| !client.is_connected()));
    assert!(wait_until(|| server.session_count() == 0));

    assert_eq!(handler.disconnects.load(Ordering::Acquire), 1);

    assert!(server.stop());
    reactor.stop();
}

#[test]
fn test_reconnect() {
    let reactor = Reactor::new(None).unwrap();
    reactor.start(2, false);

    let (server, port) = start_server(&reactor, Arc::new(EchoServer));

    let handler = Arc::new(CollectingClient::default());
    let client = TcpClient::new(&reactor, loopback(port, 2), handler.clone(), None);

    assert!(client.connect());
    assert!(client.send(b"before") > 0);
    assert!(wait_until(|| client.bytes_received() == 6));

    assert!(client.reconnect());

    // Statistics reset on each successful connect
    assert_eq!(client.bytes_received(), 0);

    assert!(client.send(b"after") > 0);
    assert!(wait_until(|| client.bytes_received() == 5));

    client.disconnect();
    assert!(wait_until(|| !client.is_connected()));

    assert!(server.stop());
    reactor.stop();
}

#[test]
fn test_connect_async() {
    let reactor = Reactor::new(None).unwrap();
    reactor.start(2, false);

    let (server, port) = start_server(&reactor, Arc::new(EchoServer));

    let handler = Arc::new(CollectingClient::default());
    let client = TcpClient::new(&reactor, loopback(port, 2), handler.clone(), None);

    assert!(client.connect_async());
    assert!(!client.connect_async());
    assert!(wait_until(|| client.is_connected()));

    assert!(client.send(b"async") > 0);
    assert!(wait_until(|| client.bytes_received() == 5));

    client.disconnect();
    assert!(wait_until(|| !client.is_connected()));

    assert!(server.stop());
    reactor.stop();
}

#[test]
fn test_refused_connect_reports_disconnected_not_error() {
    struct Refused {
        errors: AtomicUsize,
        disconnects: AtomicUsize,
    }

    impl TcpClientHandler for Refused {
        fn on_error(&self, _client: &Arc<TcpClient>, _error: &filament::Error) {
            self.errors.fetch_add(1, Ordering::AcqRel);
        }
        fn on_disconnected(&self, _client: &Arc<TcpClient>) {
            self.disconnects.fetch_add(1, Ordering::AcqRel);
        }
    }

    let reactor = Reactor::new(None).unwrap();
    reactor.start(2, false);

    // Bind a listener and drop it so the port is known-dead
    let port = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().port()
    };

    let handler = Arc::new(Refused {
        errors: AtomicUsize::new(0),
        disconnects: AtomicUsize::new(0),
    });
    let client = TcpClient::new(&reactor, loopback(port, 2), handler.clone(), None);

    assert!(!client.connect());
    assert!(wait_until(|| handler.disconnects.load(Ordering::Acquire) == 1));
    assert_eq!(handler.errors.load(Ordering::Acquire), 0);

    reactor.stop();
}
