//! Mock construction helpers

use sensorgraph::backend::{MockHandle, MockLogEntry};

/// Queue `values` as 4-byte entries of `log_id`, one tick apart from `tick`
pub fn push_entries(handle: &MockHandle, log_id: u8, tick: u32, values: &[u32]) {
    for (i, value) in values.iter().enumerate() {
        handle.push_log_entry(MockLogEntry::new(
            log_id,
            0,
            tick + i as u32,
            value.to_le_bytes(),
        ));
    }
}

/// Notification frame of a processor output
pub fn processor_frame(id: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0x09, 0x03, id];
    frame.extend_from_slice(payload);
    frame
}

/// Acceleration notification with raw little-endian axes
pub fn acceleration_frame(x: i16, y: i16, z: i16) -> Vec<u8> {
    let mut frame = vec![0x03, 0x04];
    for axis in [x, y, z] {
        frame.extend_from_slice(&axis.to_le_bytes());
    }
    frame
}
