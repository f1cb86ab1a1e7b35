//! In-memory sensor board for testing
//!
//! [`MockDevice`] implements [`CommandSink`] and answers commands the way the
//! firmware does: it hands out processor, logger and event ids, replies to
//! table reads, reports its log length and clock, and plays back stored log
//! entries on readout. Replies are pushed straight into the link channel from
//! inside `send`, so a single-threaded engine sees them on its next receive.
//!
//! Tests drive and inspect the board through a cloned [`MockHandle`]:
//!
//! - drop the reply of the k-th create command to force a timeout
//! - pre-populate processor and logger tables (a board that kept its routes
//!   across a reconnect)
//! - queue log entries and set the on-board clock
//! - inject notifications or a disconnect

use super::transport::{CommandSink, LinkEvent};
use crate::config::DeviceInfo;
use crate::error::{Error, Result};
use crate::protocol::{event, logging, module, processor, read, LOG_ENTRY_SIZE};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Number of ids each on-board table can hand out
const TABLE_SIZE: u8 = 32;

/// One entry stored in the board's log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockLogEntry {
    pub log_id: u8,
    pub reset: u8,
    pub tick: u32,
    pub data: [u8; LOG_ENTRY_SIZE],
}

impl MockLogEntry {
    pub fn new(log_id: u8, reset: u8, tick: u32, data: [u8; LOG_ENTRY_SIZE]) -> Self {
        Self {
            log_id,
            reset,
            tick,
            data,
        }
    }

    fn encode(&self) -> [u8; 9] {
        let mut out = [0u8; 9];
        out[0] = (self.reset << 5) | (self.log_id & 0x1f);
        out[1..5].copy_from_slice(&self.tick.to_le_bytes());
        out[5..9].copy_from_slice(&self.data);
        out
    }
}

#[derive(Debug, Clone)]
struct MockProcessor {
    source: [u8; 4],
    config: Vec<u8>,
}

#[derive(Debug, Clone)]
struct MockEvent {
    entry: Vec<u8>,
    parameters: Vec<u8>,
}

#[derive(Debug)]
struct MockState {
    device: DeviceInfo,
    commands: Vec<Vec<u8>>,
    processors: BTreeMap<u8, MockProcessor>,
    loggers: BTreeMap<u8, [u8; 4]>,
    events: BTreeMap<u8, MockEvent>,
    pending_event: Option<Vec<u8>>,
    creates: usize,
    drop_reply_at: Option<usize>,
    log: Vec<MockLogEntry>,
    time: (u32, u8),
    page_every: Option<usize>,
    disconnect_after: Option<usize>,
    connected: bool,
}

impl MockState {
    fn new(device: DeviceInfo) -> Self {
        Self {
            device,
            commands: Vec::new(),
            processors: BTreeMap::new(),
            loggers: BTreeMap::new(),
            events: BTreeMap::new(),
            pending_event: None,
            creates: 0,
            drop_reply_at: None,
            log: Vec::new(),
            time: (0, 0),
            page_every: None,
            disconnect_after: None,
            connected: true,
        }
    }

    fn free_id<V>(table: &BTreeMap<u8, V>) -> Option<u8> {
        (0..TABLE_SIZE).find(|id| !table.contains_key(id))
    }

    /// Count a create command; false when its reply should be swallowed
    fn admit_create(&mut self) -> bool {
        self.creates += 1;
        if self.drop_reply_at == Some(self.creates) {
            tracing::debug!("Mock device dropping reply to create #{}", self.creates);
            return false;
        }
        true
    }

    fn counter_bytes(&self, value: u32) -> Vec<u8> {
        if self.device.has_extended_logging() {
            value.to_le_bytes().to_vec()
        } else {
            (value as u16).to_le_bytes().to_vec()
        }
    }

    fn handle(&mut self, command: &[u8], out: &mut Vec<LinkEvent>) {
        self.commands.push(command.to_vec());
        if command.len() < 2 {
            return;
        }
        let (m, r) = (command[0], command[1]);
        let body = &command[2..];

        match (m, r) {
            (module::DATA_PROCESSOR, processor::ADD) if body.len() >= 5 => {
                if !self.admit_create() {
                    return;
                }
                if let Some(id) = Self::free_id(&self.processors) {
                    self.processors.insert(
                        id,
                        MockProcessor {
                            source: [body[0], body[1], body[2], body[3]],
                            config: body[4..].to_vec(),
                        },
                    );
                    out.push(LinkEvent::Frame(vec![m, r, id]));
                }
            }
            (module::DATA_PROCESSOR, processor::REMOVE) if !body.is_empty() => {
                self.processors.remove(&body[0]);
            }
            (module::DATA_PROCESSOR, reg) if reg == read(processor::ADD) && !body.is_empty() => {
                let id = body[0];
                let mut reply = vec![m, r, id];
                if let Some(p) = self.processors.get(&id) {
                    reply.extend_from_slice(&p.source);
                    reply.extend_from_slice(&p.config);
                }
                out.push(LinkEvent::Frame(reply));
            }
            (module::LOGGING, logging::TRIGGER) if body.len() >= 4 => {
                if !self.admit_create() {
                    return;
                }
                if let Some(id) = Self::free_id(&self.loggers) {
                    self.loggers.insert(id, [body[0], body[1], body[2], body[3]]);
                    out.push(LinkEvent::Frame(vec![m, r, id]));
                }
            }
            (module::LOGGING, logging::REMOVE) if !body.is_empty() => {
                self.loggers.remove(&body[0]);
            }
            (module::LOGGING, reg) if reg == read(logging::TRIGGER) && !body.is_empty() => {
                // an unused slot answers without an id byte
                let mut reply = vec![m, r];
                if let Some(source) = self.loggers.get(&body[0]) {
                    reply.push(body[0]);
                    reply.extend_from_slice(source);
                }
                out.push(LinkEvent::Frame(reply));
            }
            (module::LOGGING, reg) if reg == read(logging::LENGTH) => {
                let mut reply = vec![m, r];
                reply.extend(self.counter_bytes(self.log.len() as u32));
                out.push(LinkEvent::Frame(reply));
            }
            (module::LOGGING, reg) if reg == read(logging::TIME) => {
                let mut reply = vec![m, r];
                reply.extend_from_slice(&self.time.0.to_le_bytes());
                reply.push(self.time.1);
                out.push(LinkEvent::Frame(reply));
            }
            (module::LOGGING, logging::READOUT) if body.len() >= 8 => {
                let requested = u32::from_le_bytes([body[0], body[1], body[2], body[3]]) as usize;
                let updates = u32::from_le_bytes([body[4], body[5], body[6], body[7]]) as usize;
                self.readout(requested, updates, out);
            }
            (module::LOGGING, logging::REMOVE_ENTRIES) => {
                self.log.clear();
            }
            (module::EVENT, event::ENTRY) => {
                self.pending_event = Some(body.to_vec());
            }
            (module::EVENT, event::CMD_PARAMETERS) => {
                let Some(entry) = self.pending_event.take() else {
                    return;
                };
                if !self.admit_create() {
                    return;
                }
                if let Some(id) = Self::free_id(&self.events) {
                    self.events.insert(
                        id,
                        MockEvent {
                            entry,
                            parameters: body.to_vec(),
                        },
                    );
                    out.push(LinkEvent::Frame(vec![m, event::ENTRY, id]));
                }
            }
            (module::EVENT, event::REMOVE) if !body.is_empty() => {
                self.events.remove(&body[0]);
            }
            _ => {}
        }
    }

    fn readout(&mut self, requested: usize, updates: usize, out: &mut Vec<LinkEvent>) {
        let count = requested.min(self.log.len());
        let entries: Vec<MockLogEntry> = self.log.drain(..count).collect();
        let total = entries.len();

        let mut sent = 0usize;
        for pair in entries.chunks(2) {
            if self.disconnect_after.is_some_and(|limit| sent >= limit) {
                // unconfirmed entries stay on the board and are replayed
                self.log.splice(0..0, entries.iter().copied());
                self.disconnect_after = None;
                self.connected = false;
                out.push(LinkEvent::Disconnected);
                return;
            }
            let mut frame = vec![module::LOGGING, logging::READOUT_NOTIFY];
            for entry in pair {
                frame.extend_from_slice(&entry.encode());
            }
            out.push(LinkEvent::Frame(frame));

            let before = sent;
            sent += pair.len();
            let left = (total - sent) as u32;
            if left > 0 && updates > 0 && sent / updates != before / updates {
                let mut progress = vec![module::LOGGING, logging::READOUT_PROGRESS];
                progress.extend(self.counter_bytes(left));
                out.push(LinkEvent::Frame(progress));
            }
            if self.device.has_extended_logging()
                && self.page_every.is_some_and(|page| page > 0 && sent / page != before / page)
            {
                out.push(LinkEvent::Frame(vec![
                    module::LOGGING,
                    logging::READOUT_PAGE_COMPLETED,
                ]));
            }
        }

        let mut done = vec![module::LOGGING, logging::READOUT_PROGRESS];
        done.extend(self.counter_bytes(0));
        out.push(LinkEvent::Frame(done));
    }
}

/// Board double implementing [`CommandSink`]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
    events: Sender<LinkEvent>,
}

/// Test-side handle onto a [`MockDevice`]
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
    events: Sender<LinkEvent>,
}

impl MockDevice {
    /// Create a board that pushes its replies into `events`
    pub fn new(events: Sender<LinkEvent>, device: DeviceInfo) -> (Self, MockHandle) {
        let state = Arc::new(Mutex::new(MockState::new(device)));
        let handle = MockHandle {
            state: state.clone(),
            events: events.clone(),
        };
        (Self { state, events }, handle)
    }
}

impl CommandSink for MockDevice {
    fn send(&mut self, command: &[u8]) -> Result<()> {
        let mut replies = Vec::new();
        {
            let mut state = self.state.lock();
            if !state.connected {
                return Err(Error::Transport("mock device is disconnected".into()));
            }
            state.handle(command, &mut replies);
        }
        for reply in replies {
            if self.events.try_send(reply).is_err() {
                tracing::warn!("Mock device reply dropped, link channel full");
            }
        }
        Ok(())
    }
}

impl MockHandle {
    /// Every command received so far, in order
    pub fn commands(&self) -> Vec<Vec<u8>> {
        self.state.lock().commands.clone()
    }

    /// Commands addressed to one `(module, register)`
    pub fn commands_for(&self, module: u8, register: u8) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .commands
            .iter()
            .filter(|c| c.len() >= 2 && c[0] == module && c[1] == register)
            .cloned()
            .collect()
    }

    pub fn clear_commands(&self) {
        self.state.lock().commands.clear();
    }

    /// Swallow the reply of the k-th create command (1-based, counted from now)
    pub fn drop_reply_at(&self, k: usize) {
        let mut state = self.state.lock();
        state.creates = 0;
        state.drop_reply_at = Some(k);
    }

    pub fn processor_ids(&self) -> Vec<u8> {
        self.state.lock().processors.keys().copied().collect()
    }

    pub fn logger_ids(&self) -> Vec<u8> {
        self.state.lock().loggers.keys().copied().collect()
    }

    pub fn event_ids(&self) -> Vec<u8> {
        self.state.lock().events.keys().copied().collect()
    }

    /// Encoded config of a processor
    pub fn processor_config(&self, id: u8) -> Option<Vec<u8>> {
        self.state.lock().processors.get(&id).map(|p| p.config.clone())
    }

    /// `[module, register, id, length/offset]` a processor reads from
    pub fn processor_source(&self, id: u8) -> Option<[u8; 4]> {
        self.state.lock().processors.get(&id).map(|p| p.source)
    }

    /// Trigger source of a logger
    pub fn logger_source(&self, id: u8) -> Option<[u8; 4]> {
        self.state.lock().loggers.get(&id).copied()
    }

    /// `(entry, parameters)` of an event
    pub fn event(&self, id: u8) -> Option<(Vec<u8>, Vec<u8>)> {
        self.state
            .lock()
            .events
            .get(&id)
            .map(|e| (e.entry.clone(), e.parameters.clone()))
    }

    /// Place a processor directly into the table
    pub fn install_processor(&self, id: u8, source: [u8; 4], config: Vec<u8>) {
        self.state
            .lock()
            .processors
            .insert(id, MockProcessor { source, config });
    }

    /// Place a logger directly into the table
    pub fn install_logger(&self, id: u8, source: [u8; 4]) {
        self.state.lock().loggers.insert(id, source);
    }

    pub fn push_log_entry(&self, entry: MockLogEntry) {
        self.state.lock().log.push(entry);
    }

    pub fn log_len(&self) -> usize {
        self.state.lock().log.len()
    }

    /// Set the clock reported by time reads
    pub fn set_time(&self, tick: u32, reset: u8) {
        self.state.lock().time = (tick, reset);
    }

    /// Emit a page-completed notification every `n` records during readout
    pub fn page_every(&self, n: usize) {
        self.state.lock().page_every = Some(n);
    }

    /// Disconnect after `n` records of the next readout
    pub fn disconnect_after_records(&self, n: usize) {
        self.state.lock().disconnect_after = Some(n);
    }

    /// Inject a notification frame
    pub fn notify(&self, frame: Vec<u8>) {
        if self.events.try_send(LinkEvent::Frame(frame)).is_err() {
            tracing::warn!("Injected frame dropped, link channel full");
        }
    }

    /// Drop the connection
    pub fn disconnect(&self) {
        self.state.lock().connected = false;
        let _ = self.events.try_send(LinkEvent::Disconnected);
    }

    /// Bring the connection back, keeping every table
    pub fn reconnect(&self) {
        let mut state = self.state.lock();
        state.connected = true;
        state.disconnect_after = None;
    }
}
