//! System processor.
//!
//! Singleton per partition: source of the dayclock, owner of the jump
//! keys, sink and source for the operator console, and collector of the
//! partition log. Instruction processors reach it through the SYSC
//! instruction; everything else through UPI signals.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use komodo_types::{Upi, Word36};
use tracing::debug;

use crate::consts::{LOG_RING_CAPACITY, SP_POLL_MSECS, SP_UPI};
use crate::upi::{UpiEndpoint, UpiFabric};

/// One record in the partition log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Monotonically increasing identifier.
    pub id: u64,
    pub timestamp_micros: u64,
    pub message: String,
}

/// Bounded ring of log records with monotonically increasing ids.
///
/// Consumers remember the last id they saw and fetch forward; records
/// displaced from the ring are simply gone.
#[derive(Debug)]
struct LogRing {
    records: VecDeque<LogRecord>,
    next_id: u64,
}

impl LogRing {
    fn new() -> Self {
        LogRing {
            records: VecDeque::new(),
            next_id: 1,
        }
    }

    fn append(&mut self, timestamp_micros: u64, message: String) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        if self.records.len() == LOG_RING_CAPACITY {
            self.records.pop_front();
        }
        self.records.push_back(LogRecord {
            id,
            timestamp_micros,
            message,
        });
        id
    }

    fn fetch_after(&self, last_seen: u64) -> Vec<LogRecord> {
        self.records.iter().filter(|r| r.id > last_seen).cloned().collect()
    }
}

#[derive(Debug, Default)]
struct SpState {
    /// Keys 1..=36, key 1 in bit 35.
    jump_keys: u64,
    /// Correction applied to the host clock, signed micros.
    dayclock_offset: i64,
    console_input: VecDeque<String>,
    console_output: VecDeque<String>,
}

pub struct SystemProcessor {
    name: String,
    endpoint: Arc<UpiEndpoint>,
    state: Mutex<SpState>,
    log: Mutex<LogRing>,
    terminate: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SystemProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemProcessor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl SystemProcessor {
    pub fn new(name: impl Into<String>, fabric: &UpiFabric) -> Self {
        SystemProcessor {
            name: name.into(),
            endpoint: fabric.register(SP_UPI),
            state: Mutex::new(SpState::default()),
            log: Mutex::new(LogRing::new()),
            terminate: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    pub const fn upi(&self) -> Upi {
        SP_UPI
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /* dayclock */

    /// Micros since the epoch, with the operator correction applied.
    pub fn dayclock_micros(&self) -> u64 {
        let host = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_micros() as i64;
        let offset = self.state.lock().expect("sp state poisoned").dayclock_offset;
        host.saturating_add(offset).max(0) as u64
    }

    /// Slew the dayclock so it reads `micros` now.
    pub fn set_dayclock_micros(&self, micros: u64) {
        let host = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_micros() as i64;
        self.state.lock().expect("sp state poisoned").dayclock_offset = micros as i64 - host;
    }

    /// The dayclock as a 72-bit word pair, high word first.
    pub fn dayclock_words(&self) -> [Word36; 2] {
        let micros = self.dayclock_micros();
        [Word36::new(micros >> 36), Word36::new(micros)]
    }

    /* jump keys */

    /// Jump keys are numbered 1..=36; key 1 is bit 35 of the composite
    /// word.
    pub fn jump_key(&self, key: u8) -> bool {
        debug_assert!((1..=36).contains(&key));
        let keys = self.state.lock().expect("sp state poisoned").jump_keys;
        keys & (1 << (36 - key)) != 0
    }

    pub fn set_jump_key(&self, key: u8, value: bool) {
        debug_assert!((1..=36).contains(&key));
        let mut state = self.state.lock().expect("sp state poisoned");
        let bit = 1 << (36 - key);
        if value {
            state.jump_keys |= bit;
        } else {
            state.jump_keys &= !bit;
        }
    }

    pub fn jump_keys_word(&self) -> Word36 {
        Word36::new(self.state.lock().expect("sp state poisoned").jump_keys)
    }

    pub fn set_jump_keys_word(&self, word: Word36) {
        self.state.lock().expect("sp state poisoned").jump_keys = word.bits();
    }

    /* console */

    /// Queue a line as operator input.
    pub fn inject_console_input(&self, line: impl Into<String>) {
        self.state
            .lock()
            .expect("sp state poisoned")
            .console_input
            .push_back(line.into());
    }

    /// Take the oldest unread operator input line.
    pub fn poll_console_input(&self) -> Option<String> {
        self.state.lock().expect("sp state poisoned").console_input.pop_front()
    }

    /// Emit a line toward the operator and log it.
    pub fn send_console_output(&self, line: impl Into<String>) {
        let line = line.into();
        self.append_log(&line);
        self.state
            .lock()
            .expect("sp state poisoned")
            .console_output
            .push_back(line);
    }

    /// Take the oldest undelivered console output line.
    pub fn poll_console_output(&self) -> Option<String> {
        self.state.lock().expect("sp state poisoned").console_output.pop_front()
    }

    /* log */

    /// Append to the partition log; returns the record id.
    pub fn append_log(&self, message: &str) -> u64 {
        let timestamp = self.dayclock_micros();
        self.log
            .lock()
            .expect("log ring poisoned")
            .append(timestamp, message.to_string())
    }

    /// Records newer than `last_seen`, oldest first.
    pub fn fetch_log_after(&self, last_seen: u64) -> Vec<LogRecord> {
        self.log.lock().expect("log ring poisoned").fetch_after(last_seen)
    }

    /* worker */

    pub fn start(self: Arc<Self>) {
        let sp = Arc::clone(&self);
        let handle = std::thread::Builder::new()
            .name(format!("sp-{}", self.name))
            .spawn(move || sp.run())
            .expect("sp worker spawn");
        *self.worker.lock().expect("worker handle poisoned") = Some(handle);
    }

    pub fn terminate(&self) {
        self.terminate.store(true, Ordering::SeqCst);
        self.endpoint.notify();
        let handle = self.worker.lock().expect("worker handle poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    fn run(self: Arc<Self>) {
        debug!(name = %self.name, "sp worker up");
        loop {
            if self.terminate.load(Ordering::SeqCst) {
                break;
            }
            // incoming signals carry no payload at this layer; the mail
            // slots hold the data and draining the set is the service
            self.endpoint.take_interrupts();
            self.endpoint.take_acknowledgements();
            self.endpoint.wait(Duration::from_millis(SP_POLL_MSECS));
        }
        debug!(name = %self.name, "sp worker down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sp() -> SystemProcessor {
        SystemProcessor::new("SP0", &UpiFabric::new())
    }

    #[test]
    fn dayclock_is_settable_and_monotonic_enough() {
        let sp = sp();
        sp.set_dayclock_micros(1_000_000);
        let read = sp.dayclock_micros();
        assert!((1_000_000..2_000_000).contains(&read), "read {read}");
    }

    #[test]
    fn jump_keys_round_trip() {
        let sp = sp();
        sp.set_jump_key(1, true);
        sp.set_jump_key(36, true);
        assert!(sp.jump_key(1));
        assert!(sp.jump_key(36));
        assert!(!sp.jump_key(2));
        assert_eq!(sp.jump_keys_word(), Word36::new(0o400000_000001));

        sp.set_jump_key(1, false);
        assert!(!sp.jump_key(1));
    }

    #[test]
    fn log_ids_increase_and_fetch_forward() {
        let sp = sp();
        let first = sp.append_log("one");
        let second = sp.append_log("two");
        assert!(second > first);

        let tail = sp.fetch_log_after(first);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].message, "two");
    }

    #[test]
    fn console_queues_are_fifo() {
        let sp = sp();
        sp.inject_console_input("first");
        sp.inject_console_input("second");
        assert_eq!(sp.poll_console_input().as_deref(), Some("first"));
        assert_eq!(sp.poll_console_input().as_deref(), Some("second"));
        assert_eq!(sp.poll_console_input(), None);

        sp.send_console_output("hello");
        assert_eq!(sp.poll_console_output().as_deref(), Some("hello"));
    }
}
