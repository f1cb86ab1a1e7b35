//! Log download and reconciliation
//!
//! The board logs 4-byte entries tagged with a logger id, a reset epoch and a
//! tick counter. This module turns them back into timestamped samples:
//!
//! - [`LogRecord`] parses the 9-byte wire form
//! - [`merge::MergeQueue`] reassembles signals wider than one entry
//! - [`timestamp::TickClock`] converts ticks into wall-clock time
//! - [`download`] drives a readout from the board
//! - [`anonymous`] rebuilds consumers for loggers this host never created
//!
//! Problems with single records are reported through [`DownloadHandler`] and
//! never abort a download.

pub mod anonymous;
pub mod download;
pub mod merge;
pub mod timestamp;

pub use anonymous::AnonymousRoute;
pub use timestamp::{LogReference, TickClock};

use crate::backend::{DeviceLink, ReplyKey};
use crate::config::DeviceInfo;
use crate::error::{Error, Result};
use crate::pipeline::processor::hex;
use crate::pipeline::state::GraphState;
use crate::protocol::{logging, module, read, LOG_ENTRY_SIZE};
use chrono::{DateTime, Utc};

/// Wire size of one record inside a readout notification
pub const RECORD_SIZE: usize = 1 + 4 + LOG_ENTRY_SIZE;

/// Callbacks for a log download
///
/// Every method has an empty default body.
pub trait DownloadHandler {
    /// Called for each progress notification with the entries left
    fn on_progress(&mut self, _entries_left: u32, _total: u32) {}

    /// A record carried a logger id nothing on this host knows
    fn on_unknown_entry(&mut self, _log_id: u8, _timestamp: DateTime<Utc>, _data: [u8; LOG_ENTRY_SIZE]) {}

    /// A record belongs to a consumer whose subscriber is gone
    fn on_unhandled_entry(&mut self, _log_id: u8, _timestamp: DateTime<Utc>, _data: &[u8]) {}

    /// A readout frame held bytes that do not form a whole record
    fn on_malformed_record(&mut self, _bytes: &[u8]) {}
}

impl DownloadHandler for () {}

/// One stored log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRecord {
    pub log_id: u8,
    pub reset_id: u8,
    pub tick: u32,
    pub data: [u8; LOG_ENTRY_SIZE],
}

impl LogRecord {
    /// Parse `[reset<<5 | log_id, tick u32, data 4]`
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < RECORD_SIZE {
            return Err(Error::Protocol(format!(
                "log record needs {} bytes, got {}",
                RECORD_SIZE,
                hex(bytes)
            )));
        }
        let mut data = [0u8; LOG_ENTRY_SIZE];
        data.copy_from_slice(&bytes[5..RECORD_SIZE]);
        Ok(Self {
            log_id: bytes[0] & 0x1f,
            reset_id: (bytes[0] >> 5) & 0x7,
            tick: u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]),
            data,
        })
    }

    /// Every record in a readout notification payload
    pub fn parse_all(payload: &[u8]) -> Result<Vec<Self>> {
        payload.chunks(RECORD_SIZE).map(Self::parse).collect()
    }
}

/// Turns log records into samples for the registered consumers
#[derive(Debug, Clone)]
pub struct LogReconciler {
    device: DeviceInfo,
    clock: TickClock,
    progress_updates: u32,
}

impl LogReconciler {
    pub fn new(device: DeviceInfo, tick_ms: f64, progress_updates: u32) -> Self {
        Self {
            device,
            clock: TickClock::new(tick_ms),
            progress_updates,
        }
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    pub fn clock(&self) -> &TickClock {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut TickClock {
        &mut self.clock
    }

    pub fn progress_updates(&self) -> u32 {
        self.progress_updates
    }

    /// Little-endian counter as sent by this logging revision
    pub(crate) fn read_counter(&self, bytes: &[u8]) -> Result<u32> {
        let width = if self.device.has_extended_logging() { 4 } else { 2 };
        let raw = bytes.get(..width).ok_or_else(|| {
            Error::Protocol(format!("counter needs {} bytes, got {}", width, hex(bytes)))
        })?;
        Ok(raw
            .iter()
            .enumerate()
            .fold(0u32, |acc, (i, b)| acc | (u32::from(*b) << (8 * i))))
    }

    /// Read the board clock and store it as the reference of its reset epoch
    ///
    /// While a download is running the reference is returned but not stored.
    pub fn query_time(&mut self, link: &mut DeviceLink) -> Result<LogReference> {
        let register = read(logging::TIME);
        let reply = link.request(
            &[module::LOGGING, register],
            ReplyKey::register(module::LOGGING, register),
            "log time",
        )?;
        if reply.len() < 7 {
            return Err(Error::Protocol(format!("short time reply: {}", hex(&reply))));
        }
        let tick = u32::from_le_bytes([reply[2], reply[3], reply[4], reply[5]]);
        let reference = LogReference::new(reply[6], tick, Utc::now());
        tracing::debug!("Board time: reset {} tick {}", reference.reset_id, tick);
        self.clock.update_reference(reference);
        Ok(reference)
    }

    /// Number of entries stored on the board
    pub fn entry_count(&self, link: &mut DeviceLink) -> Result<u32> {
        let register = read(logging::LENGTH);
        let reply = link.request(
            &[module::LOGGING, register],
            ReplyKey::register(module::LOGGING, register),
            "log length",
        )?;
        self.read_counter(&reply[2..])
    }

    /// Erase every stored entry
    pub fn clear_entries(&self, link: &DeviceLink) -> Result<()> {
        link.send(&[module::LOGGING, logging::REMOVE_ENTRIES, 0xff, 0xff, 0xff, 0xff])
    }

    /// Route one record to its consumer
    ///
    /// Replayed records are dropped silently. Records nobody consumes are
    /// reported to `handler` and returned as errors for the caller to log.
    pub fn handle_record(
        &mut self,
        state: &mut GraphState,
        record: LogRecord,
        handler: &mut dyn DownloadHandler,
    ) -> Result<()> {
        let Some(timestamp) = self.clock.timestamp(record.reset_id, record.tick) else {
            return Ok(());
        };
        let Some(consumer) = state.logger_for_mut(record.log_id) else {
            handler.on_unknown_entry(record.log_id, timestamp, record.data);
            return Err(Error::UnknownLogEntry(record.log_id));
        };
        let Some((timestamp, bytes)) = consumer.merge.push(record.log_id, timestamp, record.data)
        else {
            return Ok(());
        };

        for sample in consumer.node.decode_all(&bytes, timestamp)? {
            if consumer.sender.send(sample).is_err() {
                handler.on_unhandled_entry(record.log_id, timestamp, &bytes);
                return Err(Error::UnhandledLogData(record.log_id));
            }
        }
        Ok(())
    }
}
