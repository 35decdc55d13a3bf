use ember::logging;
use ember::ConnectionId;
use mio::net::TcpStream;
use mio::{Interest, Token};
use std::io::Read;
use std::net::Shutdown;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;

use crate::buffer::{RecvBuffer, SendBuffer};
use crate::config::Settings;
use crate::reactor::{EventSource, Reactor, Strand};
use crate::support::{lock, read_lock, write_lock, Error, Reason};
use crate::tcp::ConnectionState;

/// Callbacks of an outbound TCP client. All methods have no-op defaults.
pub trait TcpClientHandler: Send + Sync + 'static {
    fn on_connecting(&self, _client: &Arc<TcpClient>) {}
    fn on_connected(&self, _client: &Arc<TcpClient>) {}
    fn on_disconnected(&self, _client: &Arc<TcpClient>) {}
    /// Received bytes accumulated so far. Returns how many of them were
    /// handled; the rest stays in the receive buffer and is presented again
    /// together with the next chunk.
    fn on_received(&self, _client: &Arc<TcpClient>, data: &[u8]) -> usize {
        data.len()
    }
    fn on_sent(&self, _client: &Arc<TcpClient>, _sent: usize, _pending: usize) {}
    /// The send pipeline drained completely.
    fn on_empty(&self, _client: &Arc<TcpClient>) {}
    fn on_error(&self, _client: &Arc<TcpClient>, _error: &Error) {}
}

struct ClientRecv {
    staging: RecvBuffer,
    accumulated: Vec<u8>,
}

/// Connection oriented TCP client.
pub struct TcpClient {
    id: ConnectionId,
    reactor: Reactor,
    settings: Settings,
    handler: Arc<dyn TcpClientHandler>,
    strand: Option<Arc<Strand>>,

    stream: RwLock<Option<TcpStream>>,
    token: AtomicUsize,
    state: Mutex<ConnectionState>,
    connected: AtomicBool,
    connecting: AtomicBool,
    disconnecting: AtomicBool,

    send_buffer: SendBuffer,
    recv: Mutex<ClientRecv>,

    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,

    receiving: AtomicBool,
    sending: AtomicBool,
    read_ready: AtomicBool,
    write_ready: AtomicBool,

    log: logging::Logger,
}

impl TcpClient {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        reactor: &Reactor,
        settings: Settings,
        handler: Arc<dyn TcpClientHandler>,
        log: L,
    ) -> Arc<TcpClient> {
        let id = ConnectionId::generate();

        let strand = match settings.strand_required {
            true => Some(Strand::new(reactor)),
            false => None,
        };

        Arc::new(TcpClient {
            id,
            reactor: reactor.clone(),
            settings,
            handler,
            strand,
            stream: RwLock::new(None),
            token: AtomicUsize::new(0),
            state: Mutex::new(ConnectionState::Idle),
            connected: AtomicBool::new(false),
            connecting: AtomicBool::new(false),
            disconnecting: AtomicBool::new(false),
            send_buffer: SendBuffer::new(crate::tcp::DEFAULT_SEND_CAPACITY),
            recv: Mutex::new(ClientRecv {
                staging: RecvBuffer::new(crate::tcp::DEFAULT_RECV_CAPACITY),
                accumulated: Vec::new(),
            }),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            receiving: AtomicBool::new(false),
            sending: AtomicBool::new(false),
            read_ready: AtomicBool::new(false),
            write_ready: AtomicBool::new(false),
            log: logging::child(log, logging::o!("unit" => "tcp_client", "client_id" => id)),
        })
    }

    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[inline]
    pub fn reactor(&self) -> &Reactor {
        &self.reactor
    }

    #[inline]
    pub fn settings(&self) -> &Settings {
        &self.settings
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

    #[inline]
    pub fn bytes_pending(&self) -> usize {
        self.send_buffer.pending()
    }

    #[inline]
    pub fn bytes_sending(&self) -> usize {
        self.send_buffer.sending()
    }

    /// Connects synchronously on the calling thread. At most one connect
    /// attempt may be pending; a second call returns false.
    pub fn connect(self: &Arc<Self>) -> bool {
        if self.is_connected() || self.connecting.swap(true, Ordering::AcqRel) {
            return false;
        }

        *lock(&self.state) = ConnectionState::Connecting;
        self.handler.on_connecting(self);

        let addr = match self.settings.socket_addr() {
            Ok(addr) => addr,
            Err(error) => return self.fail_connect(error),
        };

        let stream = match std::net::TcpStream::connect(addr) {
            Ok(stream) => stream,
            Err(error) => return self.fail_connect(error.into()),
        };

        if let Err(error) = stream.set_nonblocking(true) {
            return self.fail_connect(error.into());
        }

        self.establish(TcpStream::from_std(stream))
    }

    /// Initiates a non-blocking connect; completion lands on the pool as
    /// `on_connected` or `on_disconnected`. At most one connect attempt may
    /// be pending; a second call returns false.
    pub fn connect_async(self: &Arc<Self>) -> bool {
        if self.is_connected() || self.connecting.swap(true, Ordering::AcqRel) {
            return false;
        }

        let client = self.clone();
        self.reactor.post(move || {
            *lock(&client.state) = ConnectionState::Connecting;
            client.handler.on_connecting(&client);

            let addr = match client.settings.socket_addr() {
                Ok(addr) => addr,
                Err(error) => {
                    client.fail_connect(error);
                    return;
                }
            };

            let mut stream = match TcpStream::connect(addr) {
                Ok(stream) => stream,
                Err(error) => {
                    client.fail_connect(error.into());
                    return;
                }
            };

            let source: Arc<dyn EventSource> = client.clone();
            let token = match client.reactor.register(
                &mut stream,
                Interest::READABLE | Interest::WRITABLE,
                source,
            ) {
                Ok(token) => token,
                Err(error) => {
                    client.fail_connect(error);
                    return;
                }
            };

            client.token.store(token.0, Ordering::Release);
            *write_lock(&client.stream) = Some(stream);

            logging::debug!(client.log, "connect initiated"; "context" => "connect", "peer" => %addr);
        });

        true
    }

    /// Completes a pending non-blocking connect once the socket turns
    /// writable.
    fn finish_connect(self: &Arc<Self>) {
        if !self.connecting.load(Ordering::Acquire) {
            return;
        }

        let verdict = {
            let guard = read_lock(&self.stream);
            match guard.as_ref() {
                Some(stream) => match stream.take_error() {
                    Ok(Some(error)) => Err(Error::from(error)),
                    Ok(None) => match stream.peer_addr() {
                        Ok(_) => Ok(()),
                        Err(ref e) if e.kind() == std::io::ErrorKind::NotConnected => return,
                        Err(error) => Err(Error::from(error)),
                    },
                    Err(error) => Err(Error::from(error)),
                },
                None => return,
            }
        };

        match verdict {
            Ok(()) => {
                let guard = read_lock(&self.stream);
                if let Some(stream) = guard.as_ref() {
                    crate::tcp::apply_stream_options(stream, &self.settings.options);
                }
                drop(guard);

                self.succeed_connect();
            }
            Err(error) => {
                // Drop the half-open socket before reporting
                let mut guard = write_lock(&self.stream);
                if let Some(mut stream) = guard.take() {
                    let token = Token(self.token.load(Ordering::Acquire));
                    drop(self.reactor.deregister(&mut stream, token));
                }
                drop(guard);

                self.fail_connect(error);
            }
        }
    }

    /// Registers an established stream and flips the client to connected.
    /// Used by the synchronous connect path.
    fn establish(self: &Arc<Self>, mut stream: TcpStream) -> bool {
        crate::tcp::apply_stream_options(&stream, &self.settings.options);

        let source: Arc<dyn EventSource> = self.clone();
        let token = match self.reactor.register(
            &mut stream,
            Interest::READABLE | Interest::WRITABLE,
            source,
        ) {
            Ok(token) => token,
            Err(error) => return self.fail_connect(error),
        };

        self.token.store(token.0, Ordering::Release);
        *write_lock(&self.stream) = Some(stream);

        self.succeed_connect();
        true
    }

    fn succeed_connect(self: &Arc<Self>) -> bool {
        // The sync path and an early writable completion may both get here;
        // whoever flips the connecting flag wins
        if !self.connecting.swap(false, Ordering::AcqRel) {
            return true;
        }

        // Statistics reset on each successful connect
        self.bytes_sent.store(0, Ordering::Release);
        self.bytes_received.store(0, Ordering::Release);

        {
            let mut recv = lock(&self.recv);
            recv.accumulated.clear();
        }

        *lock(&self.state) = ConnectionState::Connected;
        self.connected.store(true, Ordering::Release);

        logging::debug!(self.log, "client connected"; "context" => "connect");

        self.handler.on_connected(self);

        if self.send_buffer.pending() > 0 {
            self.schedule_send();
        }

        self.schedule_receive();
        true
    }

    /// Connect failures follow the error policy: disconnect-class codes go
    /// straight to `on_disconnected`, the rest through `on_error` first.
    fn fail_connect(self: &Arc<Self>, error: Error) -> bool {
        if !self.connecting.swap(false, Ordering::AcqRel) {
            return false;
        }

        *lock(&self.state) = ConnectionState::Disconnected;

        logging::debug!(self.log, "connect failed"; "context" => "connect", "error" => %error);

        if let Error::Io(_) | Error::Protocol(_) | Error::AddrParse = error {
            self.handler.on_error(self, &error);
        }

        self.handler.on_disconnected(self);
        false
    }

    /// Schedules the client teardown. With `dispatch` the teardown runs
    /// inline when already on this client's execution context. Returns
    /// false when not connected.
    pub fn disconnect_with(self: &Arc<Self>, dispatch: bool) -> bool {
        if !self.is_connected() {
            return false;
        }

        let client = self.clone();
        let teardown = move || client.teardown();

        match (&self.strand, dispatch) {
            (Some(strand), true) => strand.dispatch(teardown),
            (Some(strand), false) => strand.post(teardown),
            (None, true) => drop(self.reactor.dispatch(teardown)),
            (None, false) => drop(self.reactor.post(teardown)),
        }

        true
    }

    /// Schedules the client teardown on the pool.
    #[inline]
    pub fn disconnect(self: &Arc<Self>) -> bool {
        self.disconnect_with(false)
    }

    /// Disconnects, waits for the teardown to land and connects again.
    /// Must be called from outside the pool.
    pub fn reconnect(self: &Arc<Self>) -> bool {
        if !self.disconnect() {
            return false;
        }

        while self.is_connected() || self.disconnecting.load(Ordering::Acquire) {
            thread::yield_now();
        }

        self.connect()
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

    fn teardown(self: &Arc<Self>) {
        // Teardowns may be queued more than once (explicit disconnect plus
        // an I/O failure): only the first one proceeds
        if self.disconnecting.swap(true, Ordering::AcqRel) {
            return;
        }

        if !self.is_connected() {
            self.disconnecting.store(false, Ordering::Release);
            return;
        }

        *lock(&self.state) = ConnectionState::Disconnecting;

        logging::debug!(self.log, "client disconnecting";
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
                drop(stream.shutdown(Shutdown::Both));
            }
        }

        self.send_buffer.clear();
        *lock(&self.state) = ConnectionState::Disconnected;
        self.connected.store(false, Ordering::Release);

        self.handler.on_disconnected(self);
        self.disconnecting.store(false, Ordering::Release);
    }

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

        let client = self.clone();
        self.submit(move || client.process_receive());
    }

    fn schedule_send(self: &Arc<Self>) {
        if self
            .sending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let client = self.clone();
        self.submit(move || client.process_send());
    }

    #[inline]
    fn submit<F: FnOnce() + Send + 'static>(&self, task: F) {
        match &self.strand {
            Some(strand) => strand.post(task),
            None => drop(self.reactor.post(task)),
        }
    }

    /// Drains the socket into the accumulation buffer and hands it to the
    /// receive handler, dropping whatever the handler consumed. Runs as a
    /// single-flight task.
    fn process_receive(self: &Arc<Self>) {
        loop {
            self.read_ready.store(false, Ordering::Release);

            let mut recv = lock(&self.recv);

            loop {
                if !self.is_connected() {
                    self.receiving.store(false, Ordering::Release);
                    return;
                }

                let result = {
                    let guard = read_lock(&self.stream);
                    match guard.as_ref() {
                        Some(stream) => {
                            let mut stream = stream;
                            stream.read(recv.staging.slice_mut()).map_err(Error::from)
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

                        let inner = &mut *recv;
                        inner.accumulated.extend_from_slice(inner.staging.slice(count));
                        inner.staging.grow_if_filled(count);

                        let handled = self
                            .handler
                            .on_received(self, &inner.accumulated)
                            .min(inner.accumulated.len());

                        inner.accumulated.drain(..handled);
                    }
                    Err(Error::Wait) => {
                        drop(recv);
                        self.receiving.store(false, Ordering::Release);

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

    /// Drives the dual buffer swap/egress cycle, mirroring the session
    /// writer. Runs as a single-flight task.
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
                            self.handler.on_sent(self, count, self.bytes_pending());
                        }

                        if self.send_buffer.sending() > 0 {
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

impl EventSource for TcpClient {
    // Runs on the poll thread: flag and hop to the pool
    fn on_ready(self: Arc<Self>, readable: bool, writable: bool) {
        if writable {
            if self.connecting.load(Ordering::Acquire) && !self.is_connected() {
                let client = self.clone();
                self.reactor.post(move || client.finish_connect());
            } else {
                self.write_ready.store(true, Ordering::Release);
                self.schedule_send();
            }
        }

        if readable {
            if self.is_connected() {
                self.read_ready.store(true, Ordering::Release);
                self.schedule_receive();
            }
        }
    }
}
