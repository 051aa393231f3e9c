#![forbid(unsafe_code)]
//! Single-writer gate between catalogue mutation and document matching.
//!
//! Every submitted document holds a [`ReaderGuard`] until its match
//! completes. Catalogue writers take a [`WriterGuard`], which waits for
//! all in-flight documents to drain and holds new submissions back until
//! the write is done.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// In-process reader/writer coordinator.
#[derive(Clone, Default)]
pub struct SingleWriter {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<LockState>,
    changed: Condvar,
}

#[derive(Default, Debug)]
struct LockState {
    readers: u32,
    writer: bool,
}

/// Snapshot of lock state for observability.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSnapshot {
    /// Number of documents currently in flight.
    pub readers: u32,
    /// Whether a catalogue writer holds the gate.
    pub writer: bool,
}

/// Guard representing one in-flight document.
pub struct ReaderGuard {
    inner: Arc<Inner>,
}

/// Guard representing exclusive catalogue access.
pub struct WriterGuard {
    inner: Arc<Inner>,
}

impl SingleWriter {
    /// Creates an idle gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an in-flight document, blocking while a writer holds the gate.
    pub fn acquire_reader(&self) -> ReaderGuard {
        let mut state = self.inner.state.lock();
        while state.writer {
            self.inner.changed.wait(&mut state);
        }
        state.readers += 1;
        ReaderGuard {
            inner: self.inner.clone(),
        }
    }

    /// Waits until no document is in flight and takes exclusive access.
    pub fn acquire_writer(&self) -> WriterGuard {
        let mut state = self.inner.state.lock();
        while state.writer || state.readers > 0 {
            self.inner.changed.wait(&mut state);
        }
        state.writer = true;
        WriterGuard {
            inner: self.inner.clone(),
        }
    }

    /// Returns the current lock state.
    pub fn snapshot(&self) -> LockSnapshot {
        let state = self.inner.state.lock();
        LockSnapshot {
            readers: state.readers,
            writer: state.writer,
        }
    }
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.readers = state.readers.saturating_sub(1);
        if state.readers == 0 {
            self.inner.changed.notify_all();
        }
    }
}

impl Drop for WriterGuard {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.writer = false;
        self.inner.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn writer_waits_for_readers() {
        let gate = SingleWriter::new();
        let reader = gate.acquire_reader();
        assert_eq!(gate.snapshot().readers, 1);

        let acquired = Arc::new(AtomicBool::new(false));
        let handle = {
            let gate = gate.clone();
            let acquired = acquired.clone();
            thread::spawn(move || {
                let _writer = gate.acquire_writer();
                acquired.store(true, Ordering::SeqCst);
            })
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!acquired.load(Ordering::SeqCst));
        drop(reader);
        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
        assert_eq!(gate.snapshot(), LockSnapshot::default());
    }
}
