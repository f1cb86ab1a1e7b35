//! Wire protocol constants for the sensor board
//!
//! Every command and notification starts with a `(module, register)` pair.
//! Addressable outputs carry a third byte, the processor/data id, which is
//! [`NO_ID`] for outputs that are not instanced.
//!
//! Reading a register sets bit 7 of the register byte; the reply echoes the
//! same byte so it can be matched against the pending request.

/// Placeholder id for outputs without an instance id
pub const NO_ID: u8 = 0xff;

/// Bit set on a register byte to turn a write into a read
pub const READ_BIT: u8 = 0x80;

/// Duration of one logging tick in milliseconds (48 / 32768 s)
pub const TICK_TIME_STEP_MS: f64 = 48.0 / 32768.0 * 1000.0;

/// Largest payload one notification can carry after the 3-byte header
pub const MAX_NOTIFY_PAYLOAD: usize = 17;

/// Width of one on-board log entry
pub const LOG_ENTRY_SIZE: usize = 4;

/// Module ids
pub mod module {
    pub const SWITCH: u8 = 0x01;
    pub const ACCELEROMETER: u8 = 0x03;
    pub const TEMPERATURE: u8 = 0x04;
    pub const GPIO: u8 = 0x05;
    pub const DATA_PROCESSOR: u8 = 0x09;
    pub const EVENT: u8 = 0x0a;
    pub const LOGGING: u8 = 0x0b;
    pub const TIMER: u8 = 0x0c;
    pub const SETTINGS: u8 = 0x11;
    pub const BAROMETER: u8 = 0x12;
    pub const GYRO: u8 = 0x13;
    pub const AMBIENT_LIGHT: u8 = 0x14;
    pub const MAGNETOMETER: u8 = 0x15;
    pub const HUMIDITY: u8 = 0x16;
    pub const SENSOR_FUSION: u8 = 0x19;
}

/// Data processor registers
pub mod processor {
    pub const ADD: u8 = 0x02;
    pub const NOTIFY: u8 = 0x03;
    pub const STATE: u8 = 0x04;
    pub const PARAMETER: u8 = 0x05;
    pub const REMOVE: u8 = 0x06;
    pub const NOTIFY_ENABLE: u8 = 0x07;
    pub const REMOVE_ALL: u8 = 0x08;
}

/// Logging registers
pub mod logging {
    pub const ENABLE: u8 = 0x01;
    pub const TRIGGER: u8 = 0x02;
    pub const REMOVE: u8 = 0x03;
    pub const TIME: u8 = 0x04;
    pub const LENGTH: u8 = 0x05;
    pub const READOUT: u8 = 0x06;
    pub const READOUT_NOTIFY: u8 = 0x07;
    pub const READOUT_PROGRESS: u8 = 0x08;
    pub const REMOVE_ENTRIES: u8 = 0x09;
    pub const REMOVE_ALL: u8 = 0x0a;
    pub const READOUT_PAGE_COMPLETED: u8 = 0x0d;
    pub const READOUT_PAGE_CONFIRM: u8 = 0x0e;

    /// Highest logger id the board hands out
    pub const MAX_LOGGERS: u8 = 32;
}

/// Event registers
pub mod event {
    pub const ENTRY: u8 = 0x02;
    pub const CMD_PARAMETERS: u8 = 0x03;
    pub const REMOVE: u8 = 0x04;
}

/// Turn a register into its read form
#[inline]
pub const fn read(register: u8) -> u8 {
    register | READ_BIT
}

/// Pack a byte length and offset into the `(len-1)<<5 | offset` form used by
/// processor sources and log triggers
#[inline]
pub fn pack_length_offset(length: u8, offset: u8) -> u8 {
    (length.saturating_sub(1).min(7) << 5) | (offset & 0x1f)
}

/// Inverse of [`pack_length_offset`]: `(length, offset)`
#[inline]
pub fn unpack_length_offset(packed: u8) -> (u8, u8) {
    (((packed >> 5) & 0x7) + 1, packed & 0x1f)
}

/// Three-byte address of an addressable output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub module: u8,
    pub register: u8,
    pub id: u8,
}

impl Address {
    pub const fn new(module: u8, register: u8, id: u8) -> Self {
        Self {
            module,
            register,
            id,
        }
    }

    /// Address of an output that is not instanced
    pub const fn unindexed(module: u8, register: u8) -> Self {
        Self::new(module, register, NO_ID)
    }

    /// Address of a processor's notify output
    pub const fn processor(id: u8) -> Self {
        Self::new(module::DATA_PROCESSOR, processor::NOTIFY, id)
    }

    pub fn has_id(&self) -> bool {
        self.id != NO_ID
    }

    pub fn is_processor(&self) -> bool {
        self.module == module::DATA_PROCESSOR
    }

    pub fn with_id(self, id: u8) -> Self {
        Self { id, ..self }
    }

    /// The address as the three bytes sent in create/trigger commands
    pub fn to_bytes(&self) -> [u8; 3] {
        [self.module, self.register, self.id]
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{:#04x}, {:#04x}, {:#04x}]",
            self.module, self.register, self.id
        )
    }
}

/// Firmware version reported by the board
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl FirmwareVersion {
    /// First firmware accepting multi-reference comparisons
    pub const MULTI_COMPARISON: FirmwareVersion = FirmwareVersion::new(1, 2, 3);

    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub fn supports_multi_comparison(&self) -> bool {
        *self >= Self::MULTI_COMPARISON
    }
}

impl std::fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl std::str::FromStr for FirmwareVersion {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() != 3 {
            return Err(crate::error::Error::Config(format!(
                "Invalid firmware version '{}'",
                s
            )));
        }
        let mut nums = [0u8; 3];
        for (slot, part) in nums.iter_mut().zip(&parts) {
            *slot = part.parse().map_err(|_| {
                crate::error::Error::Config(format!("Invalid firmware version '{}'", s))
            })?;
        }
        Ok(Self::new(nums[0], nums[1], nums[2]))
    }
}
