use ember::logging;
use ember::ConnectionId;
use hashbrown::HashMap;
use mio::net::TcpListener;
use mio::{Interest, Token};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;

use crate::config::Settings;
use crate::reactor::{EventSource, Reactor};
use crate::support::{lock, read_lock, write_lock, Error};
use crate::tcp::session::{TcpSession, TcpSessionHandler};

/// Callbacks and the session factory of a TCP server. `create_session`
/// supplies the handler for every accepted connection, the rest have no-op
/// defaults.
pub trait TcpServerHandler: Send + Sync + 'static {
    /// Supplies the handler of a freshly accepted session.
    fn create_session(&self) -> Arc<dyn TcpSessionHandler>;

    fn on_started(&self) {}
    fn on_stopped(&self) {}
    fn on_connected(&self, _session: &Arc<TcpSession>) {}
    fn on_disconnected(&self, _session: &Arc<TcpSession>) {}
    /// A non-fatal accept fault. The accept loop keeps going.
    fn on_error(&self, _error: &Error) {}
}

pub(crate) struct ServerCore {
    id: ConnectionId,
    reactor: Reactor,
    settings: Settings,
    handler: Arc<dyn TcpServerHandler>,

    listener: RwLock<Option<TcpListener>>,
    local_addr: Mutex<Option<SocketAddr>>,
    token: AtomicUsize,
    started: AtomicBool,

    sessions: Mutex<HashMap<ConnectionId, Arc<TcpSession>>>,
    multicast_buffer: Mutex<Vec<u8>>,

    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,

    accepting: AtomicBool,
    accept_ready: AtomicBool,

    log: logging::Logger,
}

impl ServerCore {
    #[inline]
    pub(crate) fn reactor(&self) -> &Reactor {
        &self.reactor
    }

    #[inline]
    pub(crate) fn settings(&self) -> &Settings {
        &self.settings
    }

    #[inline]
    pub(crate) fn handler(&self) -> &Arc<dyn TcpServerHandler> {
        &self.handler
    }

    #[inline]
    pub(crate) fn log(&self) -> &logging::Logger {
        &self.log
    }

    #[inline]
    pub(crate) fn add_bytes_sent(&self, count: u64) {
        self.bytes_sent.fetch_add(count, Ordering::AcqRel);
    }

    #[inline]
    pub(crate) fn add_bytes_received(&self, count: u64) {
        self.bytes_received.fetch_add(count, Ordering::AcqRel);
    }

    /// Drops the session from the registry. The session itself stays alive
    /// for as long as in-flight work holds a handle to it.
    pub(crate) fn unregister(&self, id: ConnectionId) {
        if lock(&self.sessions).remove(&id).is_some() {
            logging::debug!(self.log, "session unregistered";
                            "context" => "unregister",
                            "session_id" => id);
        }
    }

    fn schedule_accept(self: &Arc<Self>) {
        if self
            .accepting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let core = self.clone();
        self.reactor.post(move || core.process_accept());
    }

    /// Accepts connections until the listener pushes back. Runs as a
    /// single-flight task.
    fn process_accept(self: &Arc<Self>) {
        loop {
            self.accept_ready.store(false, Ordering::Release);

            loop {
                if !self.started.load(Ordering::Acquire) {
                    self.accepting.store(false, Ordering::Release);
                    return;
                }

                let result = {
                    let guard = read_lock(&self.listener);
                    match guard.as_ref() {
                        Some(listener) => listener.accept().map_err(Error::from),
                        None => {
                            drop(guard);
                            self.accepting.store(false, Ordering::Release);
                            return;
                        }
                    }
                };

                match result {
                    Ok((stream, peer)) => {
                        logging::debug!(self.log, "connection accepted";
                                        "context" => "accept",
                                        "peer" => %peer);

                        let session_handler = self.handler.create_session();
                        match TcpSession::accept(self, stream, session_handler) {
                            Ok(session) => {
                                lock(&self.sessions).insert(session.id(), session.clone());
                                session.open();
                            }
                            Err(error) => self.handler.on_error(&error),
                        }
                    }
                    Err(Error::Wait) => {
                        self.accepting.store(false, Ordering::Release);

                        if self.accept_ready.load(Ordering::Acquire)
                            && self
                                .accepting
                                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                                .is_ok()
                        {
                            break;
                        }

                        return;
                    }
                    Err(error) => {
                        // Transient accept faults are reported and skipped
                        self.handler.on_error(&error);
                    }
                }
            }
        }
    }
}

impl EventSource for ServerCore {
    fn on_ready(self: Arc<Self>, readable: bool, _writable: bool) {
        if readable {
            self.accept_ready.store(true, Ordering::Release);
            self.schedule_accept();
        }
    }
}

/// TCP server: accepts connections, manages the id to session registry and
/// fans multicast payloads out to every live session.
#[derive(Clone)]
pub struct TcpServer {
    core: Arc<ServerCore>,
}

impl TcpServer {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        reactor: &Reactor,
        settings: Settings,
        handler: Arc<dyn TcpServerHandler>,
        log: L,
    ) -> TcpServer {
        let id = ConnectionId::generate();

        TcpServer {
            core: Arc::new(ServerCore {
                id,
                reactor: reactor.clone(),
                settings,
                handler,
                listener: RwLock::new(None),
                local_addr: Mutex::new(None),
                token: AtomicUsize::new(0),
                started: AtomicBool::new(false),
                sessions: Mutex::new(HashMap::new()),
                multicast_buffer: Mutex::new(Vec::new()),
                bytes_sent: AtomicU64::new(0),
                bytes_received: AtomicU64::new(0),
                accepting: AtomicBool::new(false),
                accept_ready: AtomicBool::new(false),
                log: logging::child(log, logging::o!("unit" => "tcp_server", "server_id" => id)),
            }),
        }
    }

    pub(crate) fn from_core(core: Arc<ServerCore>) -> TcpServer {
        TcpServer { core }
    }

    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.core.id
    }

    #[inline]
    pub fn reactor(&self) -> &Reactor {
        &self.core.reactor
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.core.started.load(Ordering::Acquire)
    }

    /// The bound listen address, available while started. With port 0 in
    /// the settings this is where the ephemeral port shows up.
    #[inline]
    pub fn address(&self) -> Option<SocketAddr> {
        *lock(&self.core.local_addr)
    }

    /// Aggregate bytes sent across all sessions.
    #[inline]
    pub fn bytes_sent(&self) -> u64 {
        self.core.bytes_sent.load(Ordering::Acquire)
    }

    /// Aggregate bytes received across all sessions.
    #[inline]
    pub fn bytes_received(&self) -> u64 {
        self.core.bytes_received.load(Ordering::Acquire)
    }

    /// Number of currently registered sessions.
    pub fn session_count(&self) -> usize {
        lock(&self.core.sessions).len()
    }

    /// Looks a live session up by id.
    pub fn find_session(&self, id: ConnectionId) -> Option<Arc<TcpSession>> {
        lock(&self.core.sessions).get(&id).cloned()
    }

    /// Opens the listening socket and starts accepting. Returns false when
    /// already started or the listener cannot be bound.
    pub fn start(&self) -> bool {
        if self.is_started() {
            return false;
        }

        let addr = match self.core.settings.socket_addr() {
            Ok(addr) => addr,
            Err(error) => {
                self.core.handler.on_error(&error);
                return false;
            }
        };

        let mut listener = match crate::tcp::bind_listener(addr, &self.core.settings.options) {
            Ok(listener) => listener,
            Err(error) => {
                self.core.handler.on_error(&error.into());
                return false;
            }
        };

        *lock(&self.core.local_addr) = listener.local_addr().ok();

        let source: Arc<dyn EventSource> = self.core.clone();
        let token = match self.core.reactor.register(&mut listener, Interest::READABLE, source) {
            Ok(token) => token,
            Err(error) => {
                self.core.handler.on_error(&error);
                return false;
            }
        };

        self.core.token.store(token.0, Ordering::Release);
        *write_lock(&self.core.listener) = Some(listener);
        self.core.started.store(true, Ordering::Release);

        logging::info!(self.core.log, "server started";
                       "context" => "start",
                       "address" => %addr);

        self.core.handler.on_started();

        // Connections may be queued before registration
        self.core.schedule_accept();

        true
    }

    /// Stops accepting, disconnects every session and waits until the
    /// registry drains. Returns false when not started.
    pub fn stop(&self) -> bool {
        if !self.core.started.swap(false, Ordering::AcqRel) {
            return false;
        }

        {
            let mut guard = write_lock(&self.core.listener);
            if let Some(mut listener) = guard.take() {
                let token = Token(self.core.token.load(Ordering::Acquire));
                drop(self.core.reactor.deregister(&mut listener, token));
            }
        }

        // Keep disconnecting until the registry drains: an accept racing the
        // stop may still register a session after the first pass
        while self.session_count() > 0 {
            self.disconnect_sessions();
            thread::yield_now();
        }

        lock(&self.core.multicast_buffer).clear();
        *lock(&self.core.local_addr) = None;

        logging::info!(self.core.log, "server stopped"; "context" => "stop");

        self.core.handler.on_stopped();

        true
    }

    /// Sends one payload to every currently registered session. Delivery is
    /// best-effort per session; a multicast to zero sessions is a no-op.
    pub fn multicast(&self, buffer: &[u8]) -> bool {
        if !self.is_started() {
            return false;
        }

        if buffer.is_empty() {
            return true;
        }

        // The dedicated lock serializes producers against the fan-out
        let mut multicast = lock(&self.core.multicast_buffer);
        multicast.clear();
        multicast.extend_from_slice(buffer);

        let sessions: Vec<_> = lock(&self.core.sessions).values().cloned().collect();

        for session in sessions {
            session.send(&multicast);
        }

        true
    }

    /// Schedules a disconnect on every session. Returns false when not
    /// started.
    pub fn disconnect_all(&self) -> bool {
        if !self.is_started() {
            return false;
        }

        self.disconnect_sessions();
        true
    }

    fn disconnect_sessions(&self) {
        let sessions: Vec<_> = lock(&self.core.sessions).values().cloned().collect();

        for session in sessions {
            session.disconnect();
        }
    }
}
