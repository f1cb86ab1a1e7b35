//! Command sink abstraction
//!
//! The physical transport (BLE, serial, a test double) is outside this crate.
//! The engine only needs two things from it: an ordered way to write command
//! bytes, implemented by [`CommandSink`], and a stream of incoming frames,
//! delivered as [`LinkEvent`]s through a crossbeam channel.

use crate::error::Result;
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;

/// Ordered, single-outstanding command writer
///
/// Implementations must deliver commands in call order. A failed write is
/// reported as [`Error::Transport`](crate::error::Error::Transport) and is
/// never retried by the engine.
#[cfg_attr(test, mockall::automock)]
pub trait CommandSink: Send {
    /// Write one command frame
    fn send(&mut self, command: &[u8]) -> Result<()>;
}

/// Command sink shared between the engine and processor editors
pub type SharedSink = Arc<Mutex<Box<dyn CommandSink>>>;

/// Wrap a sink so it can be shared
pub fn shared_sink(sink: impl CommandSink + 'static) -> SharedSink {
    Arc::new(Mutex::new(Box::new(sink)))
}

/// Event delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A raw notification `[module, register, (id), payload...]`
    Frame(Vec<u8>),
    /// The transport lost its connection
    Disconnected,
}

/// Create the bounded channel carrying transport events to the engine
pub fn link_channel(capacity: usize) -> (Sender<LinkEvent>, Receiver<LinkEvent>) {
    bounded(capacity)
}

/// Write through a shared sink, logging the bytes
pub fn write_command(sink: &SharedSink, command: &[u8]) -> Result<()> {
    tracing::trace!("-> {:02x?}", command);
    sink.lock().send(command)
}
