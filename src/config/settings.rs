//! Device capability settings
//!
//! The board advertises a firmware version and a revision number per module.
//! Several processor and logging features only exist from a given revision
//! on, and a few wire encodings differ between revisions. [`DeviceInfo`]
//! collects those values and answers the capability questions the builder,
//! codec and reconciler ask.

use crate::protocol::FirmwareVersion;
use serde::{Deserialize, Serialize};

/// Processor revision adding high-pass averaging
pub const HPF_REVISION: u8 = 2;

/// Processor revision adding delays of up to 16 bytes
pub const EXPANDED_DELAY_REVISION: u8 = 2;

/// Processor revision adding the channel count byte to math configs
pub const MULTI_CHANNEL_MATH_REVISION: u8 = 2;

/// Processor revision adding the fuser
pub const FUSE_REVISION: u8 = 3;

/// Logging revision with 32-bit entry counters and page confirmations
pub const EXTENDED_LOGGING_REVISION: u8 = 2;

/// Firmware and module revisions of the connected board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Firmware version reported by the board
    pub firmware: FirmwareVersion,

    /// Data processor module revision
    #[serde(default = "default_processor_revision")]
    pub processor_revision: u8,

    /// Logging module revision
    #[serde(default = "default_logging_revision")]
    pub logging_revision: u8,
}

fn default_processor_revision() -> u8 {
    FUSE_REVISION
}

fn default_logging_revision() -> u8 {
    EXTENDED_LOGGING_REVISION
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            firmware: FirmwareVersion::new(1, 5, 0),
            processor_revision: default_processor_revision(),
            logging_revision: default_logging_revision(),
        }
    }
}

impl DeviceInfo {
    /// Create device info for the given firmware and revisions
    pub fn new(firmware: FirmwareVersion, processor_revision: u8, logging_revision: u8) -> Self {
        Self {
            firmware,
            processor_revision,
            logging_revision,
        }
    }

    /// Board running legacy firmware with revision 0 modules
    pub fn legacy() -> Self {
        Self::new(FirmwareVersion::new(1, 1, 0), 0, 0)
    }

    pub fn supports_multi_comparison(&self) -> bool {
        self.firmware.supports_multi_comparison()
    }

    pub fn supports_high_pass(&self) -> bool {
        self.processor_revision >= HPF_REVISION
    }

    pub fn supports_expanded_delay(&self) -> bool {
        self.processor_revision >= EXPANDED_DELAY_REVISION
    }

    pub fn supports_multi_channel_math(&self) -> bool {
        self.processor_revision >= MULTI_CHANNEL_MATH_REVISION
    }

    pub fn supports_fuser(&self) -> bool {
        self.processor_revision >= FUSE_REVISION
    }

    /// Whether readout counters are 32-bit and pages must be confirmed
    pub fn has_extended_logging(&self) -> bool {
        self.logging_revision >= EXTENDED_LOGGING_REVISION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_capabilities() {
        let info = DeviceInfo::default();
        assert!(info.supports_multi_comparison());
        assert!(info.supports_high_pass());
        assert!(info.supports_fuser());
        assert!(info.has_extended_logging());
    }

    #[test]
    fn test_legacy_capabilities() {
        let info = DeviceInfo::legacy();
        assert!(!info.supports_multi_comparison());
        assert!(!info.supports_high_pass());
        assert!(!info.supports_expanded_delay());
        assert!(!info.supports_multi_channel_math());
        assert!(!info.has_extended_logging());
    }
}
