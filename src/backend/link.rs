//! Request/response plumbing over the transport
//!
//! [`DeviceLink`] pairs the shared command sink with the receiving end of the
//! link channel. Requests are strictly sequential: at most one reply is
//! awaited at a time, tracked by a single [`PendingSlot`]. Frames that arrive
//! while a request is armed but do not match it are parked in a backlog and
//! handed to the regular dispatch path later.

use super::transport::{write_command, LinkEvent, SharedSink};
use crate::error::{Error, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Prefix a reply frame must start with to satisfy a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyKey(Vec<u8>);

impl ReplyKey {
    /// Match on `(module, register)`
    pub fn register(module: u8, register: u8) -> Self {
        Self(vec![module, register])
    }

    /// Match on `(module, register, id)`
    pub fn indexed(module: u8, register: u8, id: u8) -> Self {
        Self(vec![module, register, id])
    }

    pub fn matches(&self, frame: &[u8]) -> bool {
        frame.starts_with(&self.0)
    }
}

/// The one reply currently awaited
///
/// Arming the slot replaces whatever was armed before.
#[derive(Debug, Default)]
pub struct PendingSlot {
    armed: Option<ReplyKey>,
}

impl PendingSlot {
    pub fn arm(&mut self, key: ReplyKey) {
        if let Some(previous) = self.armed.replace(key) {
            tracing::debug!("Pending slot overwritten, dropping wait for {:02x?}", previous.0);
        }
    }

    /// Take the frame if it satisfies the armed key, disarming the slot
    pub fn offer(&mut self, frame: &[u8]) -> bool {
        match &self.armed {
            Some(key) if key.matches(frame) => {
                self.armed = None;
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self) {
        self.armed = None;
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }
}

/// Sequential request/response channel to the board
pub struct DeviceLink {
    sink: SharedSink,
    events: Receiver<LinkEvent>,
    slot: PendingSlot,
    backlog: VecDeque<Vec<u8>>,
    timeout: Duration,
    connected: bool,
}

impl DeviceLink {
    pub fn new(sink: SharedSink, events: Receiver<LinkEvent>, timeout: Duration) -> Self {
        Self {
            sink,
            events,
            slot: PendingSlot::default(),
            backlog: VecDeque::new(),
            timeout,
            connected: true,
        }
    }

    /// Handle to the command sink, for editors
    pub fn sink(&self) -> SharedSink {
        self.sink.clone()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Fire-and-forget write
    pub fn send(&self, command: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::ConnectionLost(format!(
                "cannot send {:02x?} while disconnected",
                command
            )));
        }
        write_command(&self.sink, command)
    }

    /// Send `command` and wait for the first frame matching `key`
    ///
    /// Times out after the configured response timeout with
    /// [`Error::DeviceTimeout`]. A disconnect while waiting yields
    /// [`Error::ConnectionLost`].
    pub fn request(&mut self, command: &[u8], key: ReplyKey, what: &str) -> Result<Vec<u8>> {
        self.slot.arm(key);
        if let Err(e) = self.send(command) {
            self.slot.clear();
            return Err(e);
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(remaining) {
                Ok(LinkEvent::Frame(frame)) => {
                    if self.slot.offer(&frame) {
                        tracing::trace!("<- {:02x?} ({})", frame, what);
                        return Ok(frame);
                    }
                    self.backlog.push_back(frame);
                }
                Ok(LinkEvent::Disconnected) => {
                    self.slot.clear();
                    self.connected = false;
                    return Err(Error::ConnectionLost(format!("while waiting for {}", what)));
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.slot.clear();
                    tracing::warn!("No reply for {} within {:?}", what, self.timeout);
                    return Err(Error::DeviceTimeout {
                        request: what.to_string(),
                        timeout_ms: self.timeout.as_millis() as u64,
                    });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.slot.clear();
                    self.connected = false;
                    return Err(Error::ConnectionLost("link channel closed".into()));
                }
            }
        }
    }

    /// Wait up to `timeout` for the next frame from the channel
    ///
    /// Returns `Ok(None)` on timeout. The backlog is not consulted.
    pub fn recv(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        match self.events.recv_timeout(timeout) {
            Ok(LinkEvent::Frame(frame)) => Ok(Some(frame)),
            Ok(LinkEvent::Disconnected) => {
                self.connected = false;
                Err(Error::ConnectionLost("transport disconnected".into()))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                self.connected = false;
                Err(Error::ConnectionLost("link channel closed".into()))
            }
        }
    }

    /// Next frame without blocking: backlog first, then the channel
    pub fn try_next(&mut self) -> Result<Option<Vec<u8>>> {
        if let Some(frame) = self.backlog.pop_front() {
            return Ok(Some(frame));
        }
        match self.events.try_recv() {
            Ok(LinkEvent::Frame(frame)) => Ok(Some(frame)),
            Ok(LinkEvent::Disconnected) => {
                self.connected = false;
                Err(Error::ConnectionLost("transport disconnected".into()))
            }
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => {
                self.connected = false;
                Err(Error::ConnectionLost("link channel closed".into()))
            }
        }
    }

    /// Park a frame for the regular dispatch path
    pub fn defer(&mut self, frame: Vec<u8>) {
        self.backlog.push_back(frame);
    }

    /// Mark the link as usable again after the transport reconnected
    pub fn reconnected(&mut self) {
        self.connected = true;
        self.slot.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::transport::{link_channel, shared_sink, MockCommandSink};

    fn link_with(sink: MockCommandSink) -> (DeviceLink, crossbeam_channel::Sender<LinkEvent>) {
        let (tx, rx) = link_channel(16);
        let link = DeviceLink::new(shared_sink(sink), rx, Duration::from_millis(20));
        (link, tx)
    }

    #[test]
    fn test_request_parks_unrelated_frames() {
        let mut sink = MockCommandSink::new();
        sink.expect_send().returning(|_| Ok(()));
        let (mut link, tx) = link_with(sink);

        tx.send(LinkEvent::Frame(vec![0x01, 0x01, 0x01])).unwrap();
        tx.send(LinkEvent::Frame(vec![0x09, 0x02, 0x05])).unwrap();

        let reply = link
            .request(&[0x09, 0x02], ReplyKey::register(0x09, 0x02), "create")
            .unwrap();
        assert_eq!(reply, vec![0x09, 0x02, 0x05]);
        assert_eq!(link.try_next().unwrap(), Some(vec![0x01, 0x01, 0x01]));
        assert_eq!(link.try_next().unwrap(), None);
    }

    #[test]
    fn test_request_times_out() {
        let mut sink = MockCommandSink::new();
        sink.expect_send().returning(|_| Ok(()));
        let (mut link, _tx) = link_with(sink);

        let err = link
            .request(&[0x0b, 0x85], ReplyKey::register(0x0b, 0x85), "log length")
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_disconnect_while_waiting() {
        let mut sink = MockCommandSink::new();
        sink.expect_send().returning(|_| Ok(()));
        let (mut link, tx) = link_with(sink);

        tx.send(LinkEvent::Disconnected).unwrap();
        let err = link
            .request(&[0x0b, 0x84], ReplyKey::register(0x0b, 0x84), "time")
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionLost(_)));
        assert!(!link.is_connected());
        assert!(link.send(&[0x01]).is_err());
    }

    #[test]
    fn test_pending_slot_overwrite() {
        let mut slot = PendingSlot::default();
        slot.arm(ReplyKey::register(0x09, 0x02));
        slot.arm(ReplyKey::indexed(0x0b, 0x82, 3));
        assert!(!slot.offer(&[0x09, 0x02, 0x00]));
        assert!(slot.offer(&[0x0b, 0x82, 0x03, 0x01]));
        assert!(!slot.is_armed());
    }
}
