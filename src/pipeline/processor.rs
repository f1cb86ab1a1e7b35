//! Processor configuration codec.
//!
//! Every on-board processing stage is described by one [`ProcessorConfig`]
//! variant. The first byte of the encoded form is the processor tag; the rest
//! is a fixed-width, little-endian, bit-packed payload.
//!
//! Two axes change the wire layout without changing the tag:
//!
//! - **Firmware version**: comparisons use a single-reference layout before
//!   1.2.3 and a multi-reference layout from then on.
//! - **Processor revision**: averages gain a 4th byte (high-pass flag and
//!   channel count), delays widen their length field and math configs gain a
//!   trailing channel-count byte.
//!
//! The codec trusts its inputs. Range checks live in the route builder.

use crate::config::DeviceInfo;
use crate::error::{Error, Result};
use crate::types::{read_signed, read_unsigned};

/// Processor tags
pub mod tag {
    pub const PASSTHROUGH: u8 = 0x01;
    pub const ACCUMULATOR: u8 = 0x02;
    pub const AVERAGE: u8 = 0x03;
    pub const COMPARISON: u8 = 0x06;
    pub const COMBINER: u8 = 0x07;
    pub const TIME: u8 = 0x08;
    pub const MATH: u8 = 0x09;
    pub const DELAY: u8 = 0x0a;
    pub const PULSE: u8 = 0x0b;
    pub const DIFFERENTIAL: u8 = 0x0c;
    pub const THRESHOLD: u8 = 0x0d;
    pub const BUFFER: u8 = 0x0f;
    pub const PACKER: u8 = 0x10;
    pub const ACCOUNTER: u8 = 0x11;
    pub const FUSER: u8 = 0x1b;
}

macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $value:expr),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name {
            $($variant = $value),+
        }

        impl $name {
            pub fn from_u8(value: u8) -> Result<Self> {
                match value {
                    $($value => Ok(Self::$variant),)+
                    other => Err(Error::Protocol(format!(
                        "Invalid {} value {}",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

wire_enum!(
    /// Which samples a passthrough lets through
    PassthroughMode { All = 0, Conditional = 1, Count = 2 }
);

wire_enum!(
    /// Comparison operator
    ComparisonOp { Eq = 0, Neq = 1, Lt = 2, Lte = 3, Gt = 4, Gte = 5 }
);

wire_enum!(
    /// What a multi-reference comparison emits
    ComparisonMode { Absolute = 0, Reference = 1, Zone = 2, Binary = 3 }
);

wire_enum!(
    /// Root-mean-square or root-sum-square
    CombinerMode { Rms = 0, Rss = 1 }
);

wire_enum!(
    /// Time limiter output
    TimeMode { Absolute = 0, Differential = 1 }
);

wire_enum!(
    /// Math operation
    MathOp {
        Add = 1,
        Multiply = 2,
        Divide = 3,
        Modulus = 4,
        Exponent = 5,
        Sqrt = 6,
        LeftShift = 7,
        RightShift = 8,
        Subtract = 9,
        AbsValue = 10,
        Constant = 11,
    }
);

wire_enum!(
    /// What a pulse detector reports
    PulseMode { Width = 0, Area = 1, Peak = 2, OnDetect = 3 }
);

wire_enum!(
    /// Differential detector output
    DifferentialMode { Absolute = 0, Differential = 1, Binary = 2 }
);

wire_enum!(
    /// Threshold detector output
    ThresholdMode { Absolute = 0, Binary = 1 }
);

wire_enum!(
    /// Accounter prefix
    AccountMode { Count = 0, Time = 1 }
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassthroughConfig {
    pub mode: PassthroughMode,
    pub value: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccumulatorConfig {
    pub counter: bool,
    pub output: u8,
    pub input: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AverageConfig {
    pub size: u8,
    pub samples: u8,
    pub high_pass: bool,
    /// Channel count; `None` on boards without the 4th config byte
    pub channels: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SingleComparisonConfig {
    pub signed: bool,
    pub op: ComparisonOp,
    pub reference: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiComparisonConfig {
    pub signed: bool,
    pub size: u8,
    pub op: ComparisonOp,
    pub mode: ComparisonMode,
    pub references: Vec<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CombinerConfig {
    pub output: u8,
    pub input: u8,
    pub channels: u8,
    pub signed: bool,
    pub mode: CombinerMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeConfig {
    pub size: u8,
    pub mode: TimeMode,
    pub period: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MathConfig {
    pub output: u8,
    pub input: u8,
    pub signed: bool,
    pub op: MathOp,
    pub rhs: i32,
    /// Channel count; `None` on boards without multi-channel math
    pub channels: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayConfig {
    pub size: u8,
    pub samples: u8,
    pub expanded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseConfig {
    pub size: u8,
    pub mode: PulseMode,
    pub threshold: i32,
    pub width: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DifferentialConfig {
    pub size: u8,
    pub signed: bool,
    pub mode: DifferentialMode,
    pub distance: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdConfig {
    pub size: u8,
    pub signed: bool,
    pub mode: ThresholdMode,
    pub boundary: i32,
    pub hysteresis: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferConfig {
    pub size: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackerConfig {
    pub size: u8,
    pub count: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccounterConfig {
    pub mode: AccountMode,
    /// Width of the accounter prefix
    pub size: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuserConfig {
    /// Processor ids of the fused buffers
    pub ids: Vec<u8>,
}

/// Configuration of one on-board processor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessorConfig {
    Passthrough(PassthroughConfig),
    Accumulator(AccumulatorConfig),
    Average(AverageConfig),
    SingleComparison(SingleComparisonConfig),
    MultiComparison(MultiComparisonConfig),
    Combiner(CombinerConfig),
    Time(TimeConfig),
    Math(MathConfig),
    Delay(DelayConfig),
    Pulse(PulseConfig),
    Differential(DifferentialConfig),
    Threshold(ThresholdConfig),
    Buffer(BufferConfig),
    Packer(PackerConfig),
    Accounter(AccounterConfig),
    Fuser(FuserConfig),
}

#[inline]
fn size_bits(size: u8) -> u8 {
    size.saturating_sub(1) & 0x3
}

/// Decode a field stored as `value - 1`
fn widen(stored: u8, what: &str) -> Result<u8> {
    stored
        .checked_add(1)
        .ok_or_else(|| Error::Protocol(format!("{} out of range: {:#04x}", what, stored)))
}

fn require(bytes: &[u8], len: usize, what: &str) -> Result<()> {
    if bytes.len() < len {
        return Err(Error::Protocol(format!(
            "{} config needs {} bytes, got {}",
            what,
            len,
            bytes.len()
        )));
    }
    Ok(())
}

fn le_i32(bytes: &[u8]) -> i32 {
    i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn le_u16(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

impl ProcessorConfig {
    /// Processor tag (first encoded byte)
    pub fn tag(&self) -> u8 {
        match self {
            ProcessorConfig::Passthrough(_) => tag::PASSTHROUGH,
            ProcessorConfig::Accumulator(_) => tag::ACCUMULATOR,
            ProcessorConfig::Average(_) => tag::AVERAGE,
            ProcessorConfig::SingleComparison(_) | ProcessorConfig::MultiComparison(_) => {
                tag::COMPARISON
            }
            ProcessorConfig::Combiner(_) => tag::COMBINER,
            ProcessorConfig::Time(_) => tag::TIME,
            ProcessorConfig::Math(_) => tag::MATH,
            ProcessorConfig::Delay(_) => tag::DELAY,
            ProcessorConfig::Pulse(_) => tag::PULSE,
            ProcessorConfig::Differential(_) => tag::DIFFERENTIAL,
            ProcessorConfig::Threshold(_) => tag::THRESHOLD,
            ProcessorConfig::Buffer(_) => tag::BUFFER,
            ProcessorConfig::Packer(_) => tag::PACKER,
            ProcessorConfig::Accounter(_) => tag::ACCOUNTER,
            ProcessorConfig::Fuser(_) => tag::FUSER,
        }
    }

    /// Name used in signal identifiers
    pub fn name(&self) -> &'static str {
        match self {
            ProcessorConfig::Passthrough(_) => "passthrough",
            ProcessorConfig::Accumulator(c) if c.counter => "count",
            ProcessorConfig::Accumulator(_) => "accumulate",
            ProcessorConfig::Average(c) if c.high_pass => "high-pass",
            ProcessorConfig::Average(_) => "low-pass",
            ProcessorConfig::SingleComparison(_) | ProcessorConfig::MultiComparison(_) => {
                "comparison"
            }
            ProcessorConfig::Combiner(c) => match c.mode {
                CombinerMode::Rms => "rms",
                CombinerMode::Rss => "rss",
            },
            ProcessorConfig::Time(_) => "time",
            ProcessorConfig::Math(_) => "math",
            ProcessorConfig::Delay(_) => "delay",
            ProcessorConfig::Pulse(_) => "pulse",
            ProcessorConfig::Differential(_) => "differential",
            ProcessorConfig::Threshold(_) => "threshold",
            ProcessorConfig::Buffer(_) => "buffer",
            ProcessorConfig::Packer(_) => "packer",
            ProcessorConfig::Accounter(_) => "account",
            ProcessorConfig::Fuser(_) => "fuser",
        }
    }

    /// Encode to the payload appended to a processor create command
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.tag()];
        match self {
            ProcessorConfig::Passthrough(c) => {
                out.push(c.mode as u8);
                out.extend_from_slice(&c.value.to_le_bytes());
            }
            ProcessorConfig::Accumulator(c) => {
                out.push(
                    size_bits(c.output) | (size_bits(c.input) << 2) | if c.counter { 0x10 } else { 0 },
                );
            }
            ProcessorConfig::Average(c) => {
                out.push(size_bits(c.size) | (size_bits(c.size) << 2));
                out.push(c.samples);
                if let Some(channels) = c.channels {
                    out.push(c.high_pass as u8 | ((channels.saturating_sub(1) & 0x7) << 1));
                }
            }
            ProcessorConfig::SingleComparison(c) => {
                out.push(c.signed as u8);
                out.push(c.op as u8);
                out.push(0);
                out.extend_from_slice(&(c.reference as u32).to_le_bytes());
            }
            ProcessorConfig::MultiComparison(c) => {
                out.push(
                    c.signed as u8
                        | (size_bits(c.size) << 1)
                        | ((c.op as u8) << 3)
                        | ((c.mode as u8) << 6),
                );
                for reference in &c.references {
                    out.extend_from_slice(&reference.to_le_bytes()[..c.size as usize]);
                }
            }
            ProcessorConfig::Combiner(c) => {
                out.push(
                    size_bits(c.output)
                        | (size_bits(c.input) << 2)
                        | (size_bits(c.channels) << 4)
                        | if c.signed { 0x80 } else { 0 },
                );
                out.push(c.mode as u8);
            }
            ProcessorConfig::Time(c) => {
                out.push((c.size.saturating_sub(1) & 0x7) | ((c.mode as u8) << 3));
                out.extend_from_slice(&c.period.to_le_bytes());
            }
            ProcessorConfig::Math(c) => {
                out.push(
                    size_bits(c.output) | (size_bits(c.input) << 2) | if c.signed { 0x10 } else { 0 },
                );
                out.push(c.op as u8);
                out.extend_from_slice(&c.rhs.to_le_bytes());
                if let Some(channels) = c.channels {
                    out.push(channels.saturating_sub(1));
                }
            }
            ProcessorConfig::Delay(c) => {
                let mask = if c.expanded { 0xf } else { 0x3 };
                out.push(c.size.saturating_sub(1) & mask);
                out.push(c.samples);
            }
            ProcessorConfig::Pulse(c) => {
                out.push(c.size.saturating_sub(1));
                out.push(0);
                out.push(c.mode as u8);
                out.extend_from_slice(&c.threshold.to_le_bytes());
                out.extend_from_slice(&c.width.to_le_bytes());
            }
            ProcessorConfig::Differential(c) => {
                out.push(size_bits(c.size) | ((c.signed as u8) << 2) | ((c.mode as u8) << 3));
                out.extend_from_slice(&c.distance.to_le_bytes());
            }
            ProcessorConfig::Threshold(c) => {
                out.push(size_bits(c.size) | ((c.signed as u8) << 2) | ((c.mode as u8) << 3));
                out.extend_from_slice(&c.boundary.to_le_bytes());
                out.extend_from_slice(&c.hysteresis.to_le_bytes());
            }
            ProcessorConfig::Buffer(c) => {
                out.push(c.size.saturating_sub(1) & 0x1f);
            }
            ProcessorConfig::Packer(c) => {
                out.push(c.size.saturating_sub(1) & 0x1f);
                out.push(c.count.saturating_sub(1) & 0x1f);
            }
            ProcessorConfig::Accounter(c) => {
                out.push(c.mode as u8 | (c.size.saturating_sub(1) << 4));
                out.push(3);
            }
            ProcessorConfig::Fuser(c) => {
                out.push(c.ids.len() as u8);
                out.extend_from_slice(&c.ids);
            }
        }
        out
    }

    /// Decode a config read back from the board
    pub fn decode(device: &DeviceInfo, bytes: &[u8]) -> Result<Self> {
        require(bytes, 1, "processor")?;
        let config = match bytes[0] {
            tag::PASSTHROUGH => {
                require(bytes, 4, "passthrough")?;
                ProcessorConfig::Passthrough(PassthroughConfig {
                    mode: PassthroughMode::from_u8(bytes[1])?,
                    value: le_u16(&bytes[2..]),
                })
            }
            tag::ACCUMULATOR => {
                require(bytes, 2, "accumulator")?;
                ProcessorConfig::Accumulator(AccumulatorConfig {
                    counter: bytes[1] & 0x10 == 0x10,
                    output: (bytes[1] & 0x3) + 1,
                    input: ((bytes[1] >> 2) & 0x3) + 1,
                })
            }
            tag::AVERAGE => {
                require(bytes, 3, "average")?;
                let extension = if device.supports_high_pass() && bytes.len() >= 4 {
                    Some(bytes[3])
                } else {
                    None
                };
                ProcessorConfig::Average(AverageConfig {
                    size: (bytes[1] & 0x3) + 1,
                    samples: bytes[2],
                    high_pass: extension.is_some_and(|b| b & 0x1 == 0x1),
                    channels: extension.map(|b| ((b >> 1) & 0x7) + 1),
                })
            }
            tag::COMPARISON if !device.supports_multi_comparison() => {
                require(bytes, 8, "comparison")?;
                let signed = bytes[1] == 1;
                let reference = if signed {
                    i64::from(le_i32(&bytes[4..]))
                } else {
                    i64::from(le_u32(&bytes[4..]))
                };
                ProcessorConfig::SingleComparison(SingleComparisonConfig {
                    signed,
                    op: ComparisonOp::from_u8(bytes[2])?,
                    reference,
                })
            }
            tag::COMPARISON => {
                require(bytes, 2, "comparison")?;
                let signed = bytes[1] & 0x1 == 0x1;
                let size = ((bytes[1] >> 1) & 0x3) + 1;
                let references = bytes[2..]
                    .chunks_exact(size as usize)
                    .map(|chunk| {
                        if signed {
                            read_signed(chunk)
                        } else {
                            read_unsigned(chunk) as i64
                        }
                    })
                    .collect();
                ProcessorConfig::MultiComparison(MultiComparisonConfig {
                    signed,
                    size,
                    op: ComparisonOp::from_u8((bytes[1] >> 3) & 0x7)?,
                    mode: ComparisonMode::from_u8((bytes[1] >> 6) & 0x3)?,
                    references,
                })
            }
            tag::COMBINER => {
                require(bytes, 3, "combiner")?;
                ProcessorConfig::Combiner(CombinerConfig {
                    output: (bytes[1] & 0x3) + 1,
                    input: ((bytes[1] >> 2) & 0x3) + 1,
                    channels: ((bytes[1] >> 4) & 0x3) + 1,
                    signed: bytes[1] & 0x80 == 0x80,
                    mode: CombinerMode::from_u8(bytes[2])?,
                })
            }
            tag::TIME => {
                require(bytes, 6, "time")?;
                ProcessorConfig::Time(TimeConfig {
                    size: (bytes[1] & 0x7) + 1,
                    mode: TimeMode::from_u8((bytes[1] >> 3) & 0x7)?,
                    period: le_u32(&bytes[2..]),
                })
            }
            tag::MATH => {
                require(bytes, 7, "math")?;
                let channels = if device.supports_multi_channel_math() && bytes.len() >= 8 {
                    Some(widen(bytes[7], "math channel count")?)
                } else {
                    None
                };
                ProcessorConfig::Math(MathConfig {
                    output: (bytes[1] & 0x3) + 1,
                    input: ((bytes[1] >> 2) & 0x3) + 1,
                    signed: bytes[1] & 0x10 == 0x10,
                    op: MathOp::from_u8(bytes[2])?,
                    rhs: le_i32(&bytes[3..]),
                    channels,
                })
            }
            tag::DELAY => {
                require(bytes, 3, "delay")?;
                let expanded = device.supports_expanded_delay();
                let mask = if expanded { 0xf } else { 0x3 };
                ProcessorConfig::Delay(DelayConfig {
                    size: (bytes[1] & mask) + 1,
                    samples: bytes[2],
                    expanded,
                })
            }
            tag::PULSE => {
                require(bytes, 10, "pulse")?;
                ProcessorConfig::Pulse(PulseConfig {
                    size: widen(bytes[1], "pulse size")?,
                    mode: PulseMode::from_u8(bytes[3])?,
                    threshold: le_i32(&bytes[4..]),
                    width: le_u16(&bytes[8..]),
                })
            }
            tag::DIFFERENTIAL => {
                require(bytes, 6, "differential")?;
                ProcessorConfig::Differential(DifferentialConfig {
                    size: (bytes[1] & 0x3) + 1,
                    signed: bytes[1] & 0x4 == 0x4,
                    mode: DifferentialMode::from_u8((bytes[1] >> 3) & 0x7)?,
                    distance: le_u32(&bytes[2..]),
                })
            }
            tag::THRESHOLD => {
                require(bytes, 8, "threshold")?;
                ProcessorConfig::Threshold(ThresholdConfig {
                    size: (bytes[1] & 0x3) + 1,
                    signed: bytes[1] & 0x4 == 0x4,
                    mode: ThresholdMode::from_u8((bytes[1] >> 3) & 0x7)?,
                    boundary: le_i32(&bytes[2..]),
                    hysteresis: le_u16(&bytes[6..]),
                })
            }
            tag::BUFFER => {
                require(bytes, 2, "buffer")?;
                ProcessorConfig::Buffer(BufferConfig {
                    size: (bytes[1] & 0x1f) + 1,
                })
            }
            tag::PACKER => {
                require(bytes, 3, "packer")?;
                ProcessorConfig::Packer(PackerConfig {
                    size: (bytes[1] & 0x1f) + 1,
                    count: (bytes[2] & 0x1f) + 1,
                })
            }
            tag::ACCOUNTER => {
                require(bytes, 2, "accounter")?;
                ProcessorConfig::Accounter(AccounterConfig {
                    mode: AccountMode::from_u8(bytes[1] & 0xf)?,
                    size: (bytes[1] >> 4) + 1,
                })
            }
            tag::FUSER => {
                require(bytes, 2, "fuser")?;
                let count = bytes[1] as usize;
                require(bytes, 2 + count, "fuser")?;
                ProcessorConfig::Fuser(FuserConfig {
                    ids: bytes[2..2 + count].to_vec(),
                })
            }
            _ => {
                return Err(Error::UnsupportedTransform {
                    config: hex(bytes),
                })
            }
        };
        Ok(config)
    }

    /// Offset of the live operand (math rhs, comparison references) within
    /// the encoded config, used as a data token destination
    pub fn operand_offset(&self) -> Option<usize> {
        match self {
            ProcessorConfig::Math(_) => Some(3),
            ProcessorConfig::SingleComparison(_) => Some(4),
            ProcessorConfig::MultiComparison(_) => Some(2),
            _ => None,
        }
    }
}

impl AverageConfig {
    pub fn with_samples(self, samples: u8) -> Self {
        Self { samples, ..self }
    }
}

impl SingleComparisonConfig {
    pub fn with_reference(self, op: ComparisonOp, reference: i64) -> Self {
        Self {
            op,
            reference,
            ..self
        }
    }
}

impl MultiComparisonConfig {
    pub fn with_references(&self, op: ComparisonOp, references: Vec<i64>) -> Self {
        Self {
            op,
            references,
            ..self.clone()
        }
    }
}

impl TimeConfig {
    pub fn with_period(self, period: u32) -> Self {
        Self { period, ..self }
    }
}

impl MathConfig {
    pub fn with_rhs(self, rhs: i32) -> Self {
        Self { rhs, ..self }
    }
}

impl DelayConfig {
    pub fn with_samples(self, samples: u8) -> Self {
        Self { samples, ..self }
    }
}

impl PulseConfig {
    pub fn with_threshold(self, threshold: i32, width: u16) -> Self {
        Self {
            threshold,
            width,
            ..self
        }
    }
}

impl DifferentialConfig {
    pub fn with_distance(self, distance: u32) -> Self {
        Self { distance, ..self }
    }
}

impl ThresholdConfig {
    pub fn with_boundary(self, boundary: i32, hysteresis: u16) -> Self {
        Self {
            boundary,
            hysteresis,
            ..self
        }
    }
}

impl PassthroughConfig {
    pub fn with_value(self, mode: PassthroughMode, value: u16) -> Self {
        Self { mode, value }
    }
}

/// Hex dump used in log lines and error messages
pub fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FirmwareVersion;
    use proptest::prelude::*;

    fn round_trip(device: &DeviceInfo, config: ProcessorConfig) {
        let bytes = config.encode();
        let decoded = ProcessorConfig::decode(device, &bytes).unwrap();
        assert_eq!(decoded, config, "bytes: {}", hex(&bytes));
    }

    #[test]
    fn test_low_pass_layout() {
        let config = ProcessorConfig::Average(AverageConfig {
            size: 2,
            samples: 4,
            high_pass: false,
            channels: None,
        });
        assert_eq!(config.encode(), vec![0x03, 0x05, 0x04]);
    }

    #[test]
    fn test_average_fourth_byte_gated_by_revision() {
        let config = ProcessorConfig::Average(AverageConfig {
            size: 2,
            samples: 8,
            high_pass: true,
            channels: Some(3),
        });
        let bytes = config.encode();
        assert_eq!(bytes, vec![0x03, 0x05, 0x08, 0x05]);
        round_trip(&DeviceInfo::default(), config);

        // an old revision ignores the extension
        let legacy = ProcessorConfig::decode(&DeviceInfo::legacy(), &bytes).unwrap();
        assert_eq!(
            legacy,
            ProcessorConfig::Average(AverageConfig {
                size: 2,
                samples: 8,
                high_pass: false,
                channels: None,
            })
        );
    }

    #[test]
    fn test_comparison_dispatch_on_firmware() {
        let legacy = DeviceInfo::legacy();
        let single = ProcessorConfig::SingleComparison(SingleComparisonConfig {
            signed: true,
            op: ComparisonOp::Gt,
            reference: -1024,
        });
        assert_eq!(single.encode().len(), 8);
        round_trip(&legacy, single);

        let modern = DeviceInfo::default();
        let multi = ProcessorConfig::MultiComparison(MultiComparisonConfig {
            signed: true,
            size: 2,
            op: ComparisonOp::Lt,
            mode: ComparisonMode::Zone,
            references: vec![-100, 0, 100],
        });
        assert_eq!(multi.encode().len(), 2 + 3 * 2);
        round_trip(&modern, multi);
    }

    #[test]
    fn test_math_channel_byte() {
        let with_channels = ProcessorConfig::Math(MathConfig {
            output: 4,
            input: 2,
            signed: true,
            op: MathOp::Add,
            rhs: -8192,
            channels: Some(3),
        });
        assert_eq!(with_channels.encode().len(), 8);
        round_trip(&DeviceInfo::default(), with_channels);

        let without = ProcessorConfig::Math(MathConfig {
            output: 2,
            input: 2,
            signed: false,
            op: MathOp::Sqrt,
            rhs: 0,
            channels: None,
        });
        assert_eq!(without.encode().len(), 7);
        round_trip(&DeviceInfo::legacy(), without);
    }

    #[test]
    fn test_every_variant_round_trips() {
        let device = DeviceInfo::default();
        let configs = vec![
            ProcessorConfig::Passthrough(PassthroughConfig {
                mode: PassthroughMode::Count,
                value: 10,
            }),
            ProcessorConfig::Accumulator(AccumulatorConfig {
                counter: true,
                output: 4,
                input: 1,
            }),
            ProcessorConfig::Combiner(CombinerConfig {
                output: 2,
                input: 2,
                channels: 3,
                signed: true,
                mode: CombinerMode::Rss,
            }),
            ProcessorConfig::Time(TimeConfig {
                size: 6,
                mode: TimeMode::Differential,
                period: 1000,
            }),
            ProcessorConfig::Delay(DelayConfig {
                size: 12,
                samples: 5,
                expanded: true,
            }),
            ProcessorConfig::Pulse(PulseConfig {
                size: 2,
                mode: PulseMode::Area,
                threshold: 2048,
                width: 16,
            }),
            ProcessorConfig::Differential(DifferentialConfig {
                size: 4,
                signed: true,
                mode: DifferentialMode::Binary,
                distance: 500,
            }),
            ProcessorConfig::Threshold(ThresholdConfig {
                size: 2,
                signed: false,
                mode: ThresholdMode::Binary,
                boundary: 1000,
                hysteresis: 20,
            }),
            ProcessorConfig::Buffer(BufferConfig { size: 6 }),
            ProcessorConfig::Packer(PackerConfig { size: 2, count: 4 }),
            ProcessorConfig::Accounter(AccounterConfig {
                mode: AccountMode::Time,
                size: 4,
            }),
            ProcessorConfig::Fuser(FuserConfig { ids: vec![3, 7] }),
        ];
        for config in configs {
            round_trip(&device, config);
        }
    }

    #[test]
    fn test_unknown_tag_is_unsupported() {
        let err = ProcessorConfig::decode(&DeviceInfo::default(), &[0x42, 0x00]).unwrap_err();
        assert!(matches!(err, Error::UnsupportedTransform { .. }));
    }

    #[test]
    fn test_short_config_is_protocol_error() {
        let err = ProcessorConfig::decode(&DeviceInfo::default(), &[tag::MATH, 0x00]).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_saturated_length_fields_are_rejected() {
        let device = DeviceInfo::default();
        let pulse = [tag::PULSE, 0xff, 0, 0, 0, 0, 0, 0, 0, 0];
        let err = ProcessorConfig::decode(&device, &pulse).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)), "{:?}", err);

        let math = [tag::MATH, 0x05, 0x01, 0, 0, 0, 0, 0xff];
        let err = ProcessorConfig::decode(&device, &math).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)), "{:?}", err);
    }

    #[test]
    fn test_operand_offsets_point_at_operand() {
        let math = ProcessorConfig::Math(MathConfig {
            output: 4,
            input: 2,
            signed: true,
            op: MathOp::Subtract,
            rhs: 0x01020304,
            channels: None,
        });
        let bytes = math.encode();
        let offset = math.operand_offset().unwrap();
        assert_eq!(&bytes[offset..offset + 4], &[0x04, 0x03, 0x02, 0x01]);
    }

    fn math_op() -> impl Strategy<Value = MathOp> {
        (1u8..=11).prop_map(|v| MathOp::from_u8(v).unwrap())
    }

    proptest! {
        #[test]
        fn prop_math_round_trip(
            output in 1u8..=4,
            input in 1u8..=4,
            signed in any::<bool>(),
            op in math_op(),
            rhs in any::<i32>(),
            channels in proptest::option::of(1u8..=4),
        ) {
            let config = ProcessorConfig::Math(MathConfig { output, input, signed, op, rhs, channels });
            let decoded = ProcessorConfig::decode(&DeviceInfo::default(), &config.encode()).unwrap();
            prop_assert_eq!(decoded, config);
        }

        #[test]
        fn prop_multi_comparison_round_trip(
            size in 1u8..=4,
            op in 0u8..=5,
            mode in 0u8..=3,
            raw in proptest::collection::vec(any::<i16>(), 1..4),
        ) {
            // signed references that fit every width
            let references: Vec<i64> = raw.iter().map(|v| i64::from(*v as i8)).collect();
            let config = ProcessorConfig::MultiComparison(MultiComparisonConfig {
                signed: true,
                size,
                op: ComparisonOp::from_u8(op).unwrap(),
                mode: ComparisonMode::from_u8(mode).unwrap(),
                references,
            });
            let device = DeviceInfo::new(FirmwareVersion::new(1, 3, 0), 3, 2);
            let decoded = ProcessorConfig::decode(&device, &config.encode()).unwrap();
            prop_assert_eq!(decoded, config);
        }

        #[test]
        fn prop_threshold_round_trip(
            size in 1u8..=4,
            signed in any::<bool>(),
            binary in any::<bool>(),
            boundary in any::<i32>(),
            hysteresis in any::<u16>(),
        ) {
            let mode = if binary { ThresholdMode::Binary } else { ThresholdMode::Absolute };
            let config = ProcessorConfig::Threshold(ThresholdConfig { size, signed, mode, boundary, hysteresis });
            let decoded = ProcessorConfig::decode(&DeviceInfo::default(), &config.encode()).unwrap();
            prop_assert_eq!(decoded, config);
        }
    }
}
