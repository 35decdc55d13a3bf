use std::io;
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Double buffered send pipeline. Producers append to the `main` buffer
/// under a lock, the writer drains the `flush` buffer. At most one of the
/// two holds in-flight bytes at any moment: `main` is swapped into `flush`
/// only when `flush` has been fully drained, so a single producer observes
/// strict FIFO delivery and the writer never competes with producers.
pub struct SendBuffer {
    main: Mutex<Vec<u8>>,
    flush: Mutex<Flush>,
    pending: AtomicUsize,
    sending: AtomicUsize,
}

struct Flush {
    data: Vec<u8>,
    offset: usize,
}

impl SendBuffer {
    #[inline]
    pub fn new(capacity: usize) -> SendBuffer {
        SendBuffer {
            main: Mutex::new(Vec::with_capacity(capacity)),
            flush: Mutex::new(Flush {
                data: Vec::with_capacity(capacity),
                offset: 0,
            }),
            pending: AtomicUsize::new(0),
            sending: AtomicUsize::new(0),
        }
    }

    /// Bytes accepted from producers but not yet handed to the writer.
    #[inline]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Bytes in the flush buffer still to be written out.
    #[inline]
    pub fn sending(&self) -> usize {
        self.sending.load(Ordering::Acquire)
    }

    /// Appends producer bytes to the main buffer. Returns the pending byte
    /// count after the append and whether a writer pass must be scheduled
    /// (no send cycle is currently draining the pipeline).
    pub fn append(&self, buffer: &[u8]) -> (usize, bool) {
        let send_required = self.pending() == 0 || self.sending() == 0;

        let mut main = self.lock_main();
        main.extend_from_slice(buffer);

        let pending = main.len();
        self.pending.store(pending, Ordering::Release);

        (pending, send_required)
    }

    /// Hands the main buffer over to the writer. A swap only happens when
    /// the flush buffer is empty. Returns the number of flush bytes that
    /// are now available to write.
    pub fn advance(&self) -> usize {
        let mut flush = self.lock_flush();

        if flush.data.is_empty() {
            let mut main = self.lock_main();

            mem::swap(&mut *main, &mut flush.data);
            flush.offset = 0;

            self.pending.store(0, Ordering::Release);
            self.sending.store(flush.data.len(), Ordering::Release);
        }

        flush.data.len() - flush.offset
    }

    /// Writes the flush buffer out, advancing the offset past whatever the
    /// writer accepted. Stops at the first would-block and reports the
    /// bytes written so far; any other error is surfaced as-is.
    pub fn egress<W: io::Write>(&self, mut writer: W) -> io::Result<usize> {
        let mut flush = self.lock_flush();
        let mut total_count = 0usize;

        while flush.offset < flush.data.len() {
            let write_count = match writer.write(&flush.data[flush.offset..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(count) => count,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(total_count),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };

            flush.offset += write_count;
            total_count += write_count;
            self.sending.fetch_sub(write_count, Ordering::AcqRel);
        }

        // The flush buffer is drained, make it swappable again
        flush.data.clear();
        flush.offset = 0;

        Ok(total_count)
    }

    /// Drops all buffered bytes and resets the counters.
    pub fn clear(&self) {
        let mut flush = self.lock_flush();
        let mut main = self.lock_main();

        main.clear();
        flush.data.clear();
        flush.offset = 0;

        self.pending.store(0, Ordering::Release);
        self.sending.store(0, Ordering::Release);
    }

    #[inline]
    fn lock_main(&self) -> MutexGuard<Vec<u8>> {
        match self.main.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    #[inline]
    fn lock_flush(&self) -> MutexGuard<Flush> {
        match self.flush.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Receive staging buffer. The capacity doubles whenever a single read
/// fills the whole buffer, so a fast peer quickly reaches a read size that
/// drains the socket in one pass.
pub struct RecvBuffer {
    data: Vec<u8>,
}

impl RecvBuffer {
    #[inline]
    pub fn new(size: usize) -> RecvBuffer {
        RecvBuffer { data: vec![0; size] }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// The whole buffer as a read destination.
    #[inline]
    pub fn slice_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// The prefix that a read of `count` bytes filled.
    #[inline]
    pub fn slice(&self, count: usize) -> &[u8] {
        &self.data[..count]
    }

    /// Doubles the capacity in case the last read filled the buffer.
    #[inline]
    pub fn grow_if_filled(&mut self, read_count: usize) {
        if read_count == self.data.len() {
            self.data.resize(2 * read_count, 0);
        }
    }
}
