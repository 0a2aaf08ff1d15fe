//! In-memory serial devices for tests and hardware-free runs.
//!
//! [`MockSerialOpener`] behaves like a host with exclusive-access serial
//! ports: opening a path that is still claimed by a live link fails with
//! [`OpenError::Busy`].  That makes "the old connection was released before
//! the new one was opened" directly observable.
//!
//! Clones share state, so a test keeps one clone for injecting bytes and
//! inspecting writes while the bridge owns another.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{SerialLink, SerialOpener};
use crate::domain::OpenError;

/// How long a mock read waits for injected input before timing out.
const MOCK_READ_TIMEOUT: Duration = Duration::from_millis(2);

enum Input {
    Bytes(Vec<u8>),
    Fail,
}

struct Device {
    input: Sender<Input>,
    alive: Arc<AtomicBool>,
}

#[derive(Default)]
struct State {
    opens: Vec<(String, u32)>,
    devices: HashMap<String, Device>,
    written: HashMap<String, Arc<Mutex<Vec<u8>>>>,
    missing: HashSet<String>,
    open_delay: Option<Duration>,
}

/// A [`SerialOpener`] backed by in-memory devices.
#[derive(Clone, Default)]
pub struct MockSerialOpener {
    state: Arc<Mutex<State>>,
}

impl MockSerialOpener {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes opens of `path` fail with [`OpenError::NotFound`].
    pub fn set_missing(&self, path: &str) {
        self.lock().missing.insert(path.to_string());
    }

    /// Makes every open block for `delay` before succeeding.
    pub fn set_open_delay(&self, delay: Duration) {
        self.lock().open_delay = Some(delay);
    }

    /// Every `(path, baud_rate)` passed to `open`, in call order.
    pub fn open_calls(&self) -> Vec<(String, u32)> {
        self.lock().opens.clone()
    }

    pub fn open_count(&self, path: &str) -> usize {
        self.lock().opens.iter().filter(|(p, _)| p == path).count()
    }

    /// Whether a live link currently holds `path`.
    pub fn is_claimed(&self, path: &str) -> bool {
        self.lock()
            .devices
            .get(path)
            .is_some_and(|d| d.alive.load(Ordering::Acquire))
    }

    /// Queues `bytes` to be read from the device currently open at `path`.
    ///
    /// Returns `false` if no live link holds `path`.
    pub fn inject(&self, path: &str, bytes: &[u8]) -> bool {
        self.send(path, Input::Bytes(bytes.to_vec()))
    }

    /// Makes the next read on `path` fail with an I/O error.
    pub fn inject_error(&self, path: &str) -> bool {
        self.send(path, Input::Fail)
    }

    fn send(&self, path: &str, input: Input) -> bool {
        let state = self.lock();
        match state.devices.get(path) {
            Some(d) if d.alive.load(Ordering::Acquire) => d.input.send(input).is_ok(),
            _ => false,
        }
    }

    /// All bytes written to `path`, across every link ever opened on it.
    pub fn written(&self, path: &str) -> Vec<u8> {
        self.lock()
            .written
            .get(path)
            .map(|w| w.lock().unwrap_or_else(|p| p.into_inner()).clone())
            .unwrap_or_default()
    }
}

impl SerialOpener for MockSerialOpener {
    fn open(&self, path: &str, baud_rate: u32) -> Result<Box<dyn SerialLink>, OpenError> {
        let delay = {
            let mut state = self.lock();
            state.opens.push((path.to_string(), baud_rate));
            if state.missing.contains(path) {
                return Err(OpenError::NotFound {
                    path: path.to_string(),
                });
            }
            state.open_delay
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut state = self.lock();
        if state
            .devices
            .get(path)
            .is_some_and(|d| d.alive.load(Ordering::Acquire))
        {
            return Err(OpenError::Busy {
                path: path.to_string(),
            });
        }

        let (tx, rx) = mpsc::channel();
        let alive = Arc::new(AtomicBool::new(true));
        let written = Arc::clone(state.written.entry(path.to_string()).or_default());
        state.devices.insert(
            path.to_string(),
            Device {
                input: tx,
                alive: Arc::clone(&alive),
            },
        );

        Ok(Box::new(MockLink {
            input: rx,
            pending: VecDeque::new(),
            written,
            alive,
        }))
    }
}

struct MockLink {
    input: Receiver<Input>,
    pending: VecDeque<u8>,
    written: Arc<Mutex<Vec<u8>>>,
    alive: Arc<AtomicBool>,
}

impl Read for MockLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.input.recv_timeout(MOCK_READ_TIMEOUT) {
                Ok(Input::Bytes(bytes)) => self.pending.extend(bytes),
                Ok(Input::Fail) => {
                    return Err(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "device unplugged",
                    ))
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::from(io::ErrorKind::TimedOut))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    std::thread::sleep(MOCK_READ_TIMEOUT);
                    return Err(io::Error::from(io::ErrorKind::TimedOut));
                }
            }
        }
        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
    }
}
