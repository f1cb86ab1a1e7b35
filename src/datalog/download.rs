//! Log readout
//!
//! ```text
//! host                              board
//!  │ [LOGGING, LENGTH|R]        ──►   │
//!  │   ◄── [LOGGING, LENGTH|R, n]     │
//!  │ enable notify/progress/page ──►  │
//!  │ [LOGGING, READOUT, n, every]──►  │
//!  │   ◄── [LOGGING, READOUT_NOTIFY, record, (record)]
//!  │   ◄── [LOGGING, READOUT_PROGRESS, left]
//!  │   ◄── [LOGGING, PAGE_COMPLETED]  │
//!  │ [LOGGING, PAGE_CONFIRM]     ──►  │
//!  │   ◄── [LOGGING, READOUT_PROGRESS, 0]
//! ```
//!
//! Frames unrelated to the readout are parked and handed back to the link
//! once the download ends.

use super::{DownloadHandler, LogReconciler, LogRecord, RECORD_SIZE};
use crate::backend::DeviceLink;
use crate::error::{Error, Result};
use crate::pipeline::state::GraphState;
use crate::protocol::{logging, module};

fn readout_command(entries: u32, notify_every: u32) -> Vec<u8> {
    let mut command = vec![module::LOGGING, logging::READOUT];
    command.extend_from_slice(&entries.to_le_bytes());
    command.extend_from_slice(&notify_every.to_le_bytes());
    command
}

/// Entries between two progress notifications
fn progress_interval(entries: u32, updates: u32) -> u32 {
    if updates == 0 {
        0
    } else {
        (entries / updates).max(1)
    }
}

fn set_notifications(link: &DeviceLink, extended: bool, enable: bool) -> Result<()> {
    let flag = enable as u8;
    link.send(&[module::LOGGING, logging::READOUT_NOTIFY, flag])?;
    link.send(&[module::LOGGING, logging::READOUT_PROGRESS, flag])?;
    if extended {
        link.send(&[module::LOGGING, logging::READOUT_PAGE_COMPLETED, flag])?;
    }
    Ok(())
}

fn next_frame(link: &mut DeviceLink) -> Result<Vec<u8>> {
    if let Some(frame) = link.try_next()? {
        return Ok(frame);
    }
    match link.recv(link.timeout())? {
        Some(frame) => Ok(frame),
        None => Err(Error::DeviceTimeout {
            request: "log readout".to_string(),
            timeout_ms: link.timeout().as_millis() as u64,
        }),
    }
}

/// Download every stored entry into the registered consumers
///
/// A disconnect ends the download with [`Error::ConnectionLost`]; the ticks
/// delivered so far are kept as rollback marks so a later download skips the
/// entries the board replays.
pub fn download(
    link: &mut DeviceLink,
    state: &mut GraphState,
    reconciler: &mut LogReconciler,
    handler: &mut dyn DownloadHandler,
) -> Result<()> {
    let total = reconciler.entry_count(link)?;
    tracing::info!("Downloading {} log entries", total);
    if total == 0 {
        handler.on_progress(0, 0);
        return Ok(());
    }

    reconciler.clock_mut().freeze();
    let extended = reconciler.device().has_extended_logging();
    let mut parked = Vec::new();
    let mut result = run(link, state, reconciler, handler, total, &mut parked);
    // readout notifications go off on every exit path
    if link.is_connected() {
        if let Err(e) = set_notifications(link, extended, false) {
            if result.is_ok() {
                result = Err(e);
            } else {
                tracing::debug!("Disabling readout notifications: {}", e);
            }
        }
    }
    reconciler.clock_mut().thaw();
    for frame in parked {
        link.defer(frame);
    }

    match &result {
        Ok(()) => {
            reconciler.clock_mut().clear_rollback();
            tracing::info!("Log download complete");
        }
        Err(Error::ConnectionLost(reason)) => {
            reconciler.clock_mut().mark_rollback();
            tracing::warn!("Log download interrupted: {}", reason);
        }
        Err(e) => tracing::warn!("Log download failed: {}", e),
    }
    result
}

fn run(
    link: &mut DeviceLink,
    state: &mut GraphState,
    reconciler: &mut LogReconciler,
    handler: &mut dyn DownloadHandler,
    total: u32,
    parked: &mut Vec<Vec<u8>>,
) -> Result<()> {
    let extended = reconciler.device().has_extended_logging();
    set_notifications(link, extended, true)?;
    let every = progress_interval(total, reconciler.progress_updates());
    link.send(&readout_command(total, every))?;

    loop {
        let frame = next_frame(link)?;
        if frame.len() < 2 || frame[0] != module::LOGGING {
            parked.push(frame);
            continue;
        }
        match frame[1] {
            logging::READOUT_NOTIFY => {
                for chunk in frame[2..].chunks(RECORD_SIZE) {
                    let record = match LogRecord::parse(chunk) {
                        Ok(record) => record,
                        Err(e) => {
                            tracing::warn!("Skipping log record: {}", e);
                            handler.on_malformed_record(chunk);
                            continue;
                        }
                    };
                    if let Err(e) = reconciler.handle_record(state, record, handler) {
                        tracing::debug!("Log record {:?}: {}", record, e);
                    }
                }
            }
            logging::READOUT_PROGRESS => {
                let left = reconciler.read_counter(&frame[2..])?;
                tracing::trace!("Log readout: {} of {} left", left, total);
                handler.on_progress(left, total);
                if left == 0 {
                    break;
                }
            }
            logging::READOUT_PAGE_COMPLETED if extended => {
                link.send(&[module::LOGGING, logging::READOUT_PAGE_CONFIRM])?;
            }
            _ => parked.push(frame),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readout_command() {
        assert_eq!(
            readout_command(3, 1),
            vec![0x0b, 0x06, 3, 0, 0, 0, 1, 0, 0, 0]
        );
    }

    #[test]
    fn test_progress_interval() {
        assert_eq!(progress_interval(1000, 100), 10);
        assert_eq!(progress_interval(5, 100), 1);
        assert_eq!(progress_interval(5, 0), 0);
    }
}
