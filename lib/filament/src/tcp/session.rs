use ember::logging;
use ember::ConnectionId;
use mio::net::TcpStream;
use mio::{Interest, Token};
use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use crate::buffer::{RecvBuffer, SendBuffer};
use crate::reactor::{EventSource, Reactor, Strand};
use crate::support::{lock, read_lock, write_lock, Error, Reason};
use crate::tcp::server::ServerCore;
use crate::tcp::ConnectionState;

/// Callbacks of a server side session. All methods have no-op defaults.
///
/// With `strand_required` set on the server the callbacks of one session
/// are totally ordered; without it receives are still serialized against
/// receives and sends against sends, but the two pipelines may overlap.
pub trait TcpSessionHandler: Send + Sync + 'static {
    fn on_connected(&self, _session: &Arc<TcpSession>) {}
    fn on_disconnected(&self, _session: &Arc<TcpSession>) {}
    /// A chunk of bytes arrived. The session owns the buffer; handlers
    /// wanting to keep the bytes must copy them out.
    fn on_received(&self, _session: &Arc<TcpSession>, _data: &[u8]) {}
    /// A chunk of bytes was handed to the socket.
    fn on_sent(&self, _session: &Arc<TcpSession>, _sent: usize, _pending: usize) {}
    /// The send pipeline drained completely.
    fn on_empty(&self, _session: &Arc<TcpSession>) {}
    fn on_error(&self, _session: &Arc<TcpSession>, _error: &Error) {}
}

/// Server side endpoint for one accepted connection.
pub struct TcpSession {
    id: ConnectionId,
    reactor: Reactor,
    server: Weak<ServerCore>,
    handler: Arc<dyn TcpSessionHandler>,
    strand: Option<Arc<Strand>>,

    stream: RwLock<Option<TcpStream>>,
    token: AtomicUsize,
    state: Mutex<ConnectionState>,
    connected: AtomicBool,

    send_buffer: SendBuffer,
    recv_buffer: Mutex<RecvBuffer>,

    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,

    // Single-flight guards: at most one receive and one send pass at a time
    receiving: AtomicBool,
    sending: AtomicBool,
    read_ready: AtomicBool,
    write_ready: AtomicBool,

    log: logging::Logger,
}

impl TcpSession {
    /// Wraps a socket accepted by the server and registers it on the
    /// reactor. The server puts the session into its registry and then
    /// calls [`open`](TcpSession::open) to fire the connected notifications.
    pub(crate) fn accept(
        server: &Arc<ServerCore>,
        mut stream: TcpStream,
        handler: Arc<dyn TcpSessionHandler>,
    ) -> Result<Arc<TcpSession>, Error> {
        let id = ConnectionId::generate();
        let reactor = server.reactor().clone();
        let settings = server.settings();

        crate::tcp::apply_stream_options(&stream, &settings.options);

        let strand = match settings.strand_required {
            true => Some(Strand::new(&reactor)),
            false => None,
        };

        let session = Arc::new(TcpSession {
            id,
            reactor: reactor.clone(),
            server: Arc::downgrade(server),
            handler,
            strand,
            stream: RwLock::new(None),
            token: AtomicUsize::new(0),
            state: Mutex::new(ConnectionState::Connected),
            connected: AtomicBool::new(true),
            send_buffer: SendBuffer::new(crate::tcp::DEFAULT_SEND_CAPACITY),
            recv_buffer: Mutex::new(RecvBuffer::new(crate::tcp::DEFAULT_RECV_CAPACITY)),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            receiving: AtomicBool::new(false),
            sending: AtomicBool::new(false),
            read_ready: AtomicBool::new(false),
            write_ready: AtomicBool::new(false),
            log: logging::child(server.log(), logging::o!("unit" => "session", "session_id" => id)),
        });

        let source: Arc<dyn EventSource> = session.clone();
        let token = reactor.register(
            &mut stream,
            Interest::READABLE | Interest::WRITABLE,
            source,
        )?;

        session.token.store(token.0, Ordering::Release);
        *write_lock(&session.stream) = Some(stream);

        Ok(session)
    }

    /// Fires the connected notifications and starts receiving.
    pub(crate) fn open(self: &Arc<Self>) {
        logging::debug!(self.log, "session connected"; "context" => "open");

        self.handler.on_connected(self);
        if let Some(server) = self.server.upgrade() {
            server.handler().on_connected(self);
        }
        self.handler.on_empty(self);

        // Bytes may have arrived before registration, kick off a receive
        self.schedule_receive();
    }

    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[inline]
    pub fn reactor(&self) -> &Reactor {
        &self.reactor
    }

    /// The owning server, while the session is registered.
    #[inline]
    pub fn server(&self) -> Option<crate::tcp::TcpServer> {
        self.server.upgrade().map(crate::tcp::TcpServer::from_core)
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    #[inline]
    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    #[inline]
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Acquire)
    }

    #[inline]
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Acquire)
    }

    /// Bytes accepted from the application but not yet handed to the writer.
    #[inline]
    pub fn bytes_pending(&self) -> usize {
        self.send_buffer.pending()
    }

    /// Bytes in flight towards the socket.
    #[inline]
    pub fn bytes_sending(&self) -> usize {
        self.send_buffer.sending()
    }

    /// Appends the buffer to the send pipeline. Returns the number of bytes
    /// now pending, including the just-appended, or 0 when disconnected or
    /// the buffer is empty.
    pub fn send(self: &Arc<Self>, buffer: &[u8]) -> usize {
        if buffer.is_empty() || !self.is_connected() {
            return 0;
        }

        let (pending, send_required) = self.send_buffer.append(buffer);

        if send_required {
            self.schedule_send();
        }

        pending
    }

    /// Schedules the session teardown. With `dispatch` the teardown runs
    /// inline when already on this session's execution context, otherwise
    /// it is deferred to the pool. Returns false when already disconnected.
    pub fn disconnect_with(self: &Arc<Self>, dispatch: bool) -> bool {
        if !self.is_connected() {
            return false;
        }

        let session = self.clone();
        let teardown = move || session.teardown();

        match (&self.strand, dispatch) {
            (Some(strand), true) => strand.dispatch(teardown),
            (Some(strand), false) => strand.post(teardown),
            (None, true) => drop(self.reactor.dispatch(teardown)),
            (None, false) => drop(self.reactor.post(teardown)),
        }

        true
    }

    /// Schedules the session teardown on the pool.
    #[inline]
    pub fn disconnect(self: &Arc<Self>) -> bool {
        self.disconnect_with(false)
    }

    /// Closes the socket, clears the send pipeline and fires the
    /// disconnected notifications exactly once.
    fn teardown(self: &Arc<Self>) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }

        *lock(&self.state) = ConnectionState::Disconnecting;

        logging::debug!(self.log, "session disconnecting";
                        "context" => "teardown",
                        "bytes_sent" => self.bytes_sent(),
                        "bytes_received" => self.bytes_received());

        // Attempt to push out anything still queued (a CLOSE notice for
        // instance), but ignore any failures
        {
            let guard = read_lock(&self.stream);
            if let Some(stream) = guard.as_ref() {
                while self.send_buffer.advance() > 0 {
                    match self.send_buffer.egress(stream) {
                        Ok(count) if count > 0 => continue,
                        _ => break,
                    }
                }
            }
        }

        {
            let mut guard = write_lock(&self.stream);
            if let Some(mut stream) = guard.take() {
                let token = Token(self.token.load(Ordering::Acquire));
                drop(self.reactor.deregister(&mut stream, token));
                drop(stream.shutdown(std::net::Shutdown::Both));
            }
        }

        self.send_buffer.clear();
        *lock(&self.state) = ConnectionState::Disconnected;

        self.handler.on_disconnected(self);

        if let Some(server) = self.server.upgrade() {
            server.handler().on_disconnected(self);
            server.unregister(self.id);
        }
    }

    /// Folds an I/O failure into the error taxonomy: disconnect-class
    /// conditions stay silent, everything else reaches the error handler.
    /// Both end in a teardown.
    fn fail(self: &Arc<Self>, error: Error) {
        match error {
            Error::Wait => return,
            Error::Disconnected(_) => (),
            error => self.handler.on_error(self, &error),
        }

        self.disconnect_with(true);
    }

    fn schedule_receive(self: &Arc<Self>) {
        if self
            .receiving
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let session = self.clone();
        self.submit(move || session.process_receive());
    }

    fn schedule_send(self: &Arc<Self>) {
        if self
            .sending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let session = self.clone();
        self.submit(move || session.process_send());
    }

    #[inline]
    fn submit<F: FnOnce() + Send + 'static>(&self, task: F) {
        match &self.strand {
            Some(strand) => strand.post(task),
            None => drop(self.reactor.post(task)),
        }
    }

    /// Drains the socket, handing each chunk to the receive handler. Runs
    /// as a single-flight task, which serializes all receives of a session.
    fn process_receive(self: &Arc<Self>) {
        loop {
            self.read_ready.store(false, Ordering::Release);

            let mut recv = lock(&self.recv_buffer);

            loop {
                if !self.is_connected() {
                    self.receiving.store(false, Ordering::Release);
                    return;
                }

                // The stream guard must not outlive the read: handlers run
                // below may legitimately dispatch an inline teardown
                let result = {
                    let guard = read_lock(&self.stream);
                    match guard.as_ref() {
                        Some(stream) => {
                            let mut stream = stream;
                            stream.read(recv.slice_mut()).map_err(Error::from)
                        }
                        None => Err(Error::Disconnected(Reason::Cancelled)),
                    }
                };

                match result {
                    Ok(0) => {
                        drop(recv);
                        self.receiving.store(false, Ordering::Release);
                        self.fail(Error::Disconnected(Reason::Closed));
                        return;
                    }
                    Ok(count) => {
                        self.bytes_received.fetch_add(count as u64, Ordering::AcqRel);
                        if let Some(server) = self.server.upgrade() {
                            server.add_bytes_received(count as u64);
                        }

                        self.handler.on_received(self, recv.slice(count));

                        // A read that filled the buffer doubles it for the next pass
                        recv.grow_if_filled(count);
                    }
                    Err(Error::Wait) => {
                        drop(recv);
                        self.receiving.store(false, Ordering::Release);

                        // Readiness that raced with the flag flip must not be lost
                        if self.read_ready.load(Ordering::Acquire)
                            && self
                                .receiving
                                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                                .is_ok()
                        {
                            break;
                        }

                        return;
                    }
                    Err(error) => {
                        drop(recv);
                        self.receiving.store(false, Ordering::Release);
                        self.fail(error);
                        return;
                    }
                }
            }
        }
    }

    /// Drives the dual buffer swap/egress cycle. Runs as a single-flight
    /// task, which guarantees at most one outstanding write.
    fn process_send(self: &Arc<Self>) {
        loop {
            self.write_ready.store(false, Ordering::Release);

            loop {
                if !self.is_connected() {
                    self.sending.store(false, Ordering::Release);
                    return;
                }

                if self.send_buffer.advance() == 0 {
                    self.sending.store(false, Ordering::Release);
                    self.handler.on_empty(self);

                    // A producer may have appended between the swap and the
                    // flag flip
                    if self.send_buffer.pending() > 0
                        && self
                            .sending
                            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                            .is_ok()
                    {
                        continue;
                    }

                    return;
                }

                let result = {
                    let guard = read_lock(&self.stream);
                    match guard.as_ref() {
                        Some(stream) => self.send_buffer.egress(stream).map_err(Error::from),
                        None => Err(Error::Disconnected(Reason::Cancelled)),
                    }
                };

                match result {
                    Ok(count) => {
                        if count > 0 {
                            self.bytes_sent.fetch_add(count as u64, Ordering::AcqRel);
                            if let Some(server) = self.server.upgrade() {
                                server.add_bytes_sent(count as u64);
                            }

                            self.handler.on_sent(self, count, self.bytes_pending());
                        }

                        if self.send_buffer.sending() > 0 {
                            // The socket pushed back mid-flush, wait for a
                            // writable edge
                            self.sending.store(false, Ordering::Release);

                            if self.write_ready.load(Ordering::Acquire)
                                && self
                                    .sending
                                    .compare_exchange(
                                        false,
                                        true,
                                        Ordering::AcqRel,
                                        Ordering::Acquire,
                                    )
                                    .is_ok()
                            {
                                break;
                            }

                            return;
                        }
                    }
                    Err(error) => {
                        self.sending.store(false, Ordering::Release);
                        self.fail(error);
                        return;
                    }
                }
            }
        }
    }
}

impl EventSource for TcpSession {
    // Runs on the poll thread: flag and hop to the pool
    fn on_ready(self: Arc<Self>, readable: bool, writable: bool) {
        if readable {
            self.read_ready.store(true, Ordering::Release);
            self.schedule_receive();
        }

        if writable {
            self.write_ready.store(true, Ordering::Release);
            self.schedule_send();
        }
    }
}
