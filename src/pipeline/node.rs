//! Signal nodes
//!
//! A [`SignalNode`] names one addressable data output on the board (a sensor
//! register or a processor's notify/state output) and knows how to decode the
//! bytes it produces. Nodes are plain values: a processor output keeps a copy
//! of its input in `input`, and structured outputs (vectors, fused or
//! accounted data) list their parts in `components`.

use super::processor::ProcessorConfig;
use crate::catalog::ProducerCatalog;
use crate::error::{Error, Result};
use crate::protocol::{module, processor, Address, NO_ID};
use crate::types::{read_signed, read_unsigned, DataAttributes, Sample, Value};
use chrono::{DateTime, Utc};

/// How a node's bytes are interpreted
#[derive(Debug, Clone, PartialEq)]
pub enum SignalKind {
    /// Integer, signedness from the attributes
    Integer,
    /// Integer in firmware units, divided by `scale`
    Float { scale: f32 },
    /// One scaled float per channel
    Vector { scale: f32 },
    /// Opaque bytes
    Bytes,
    /// Concatenated parts described by `components`
    Fused,
    /// Accounter prefix followed by the wrapped value (`components[0..2]`)
    Accounted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalNode {
    pub address: Address,
    pub attributes: DataAttributes,
    pub kind: SignalKind,
    /// Config of the processor producing this node, if any
    pub config: Option<ProcessorConfig>,
    /// Node feeding the producing processor
    pub input: Option<Box<SignalNode>>,
    pub components: Vec<SignalNode>,
    /// Position within the parent when this node is a component
    pub component_index: Option<usize>,
}

impl SignalNode {
    /// Root node read straight from a sensor register
    pub fn root(address: Address, attributes: DataAttributes, kind: SignalKind) -> Self {
        let mut node = Self {
            address,
            attributes,
            kind,
            config: None,
            input: None,
            components: Vec::new(),
            component_index: None,
        };
        node.components = node.vector_components();
        node
    }

    /// Output of a processor fed by `input`
    pub fn processed(
        input: &SignalNode,
        config: &ProcessorConfig,
        register: u8,
        attributes: DataAttributes,
        kind: SignalKind,
    ) -> Self {
        let mut node = Self {
            address: Address::new(module::DATA_PROCESSOR, register, NO_ID),
            attributes,
            kind,
            config: Some(config.clone()),
            input: Some(Box::new(input.clone())),
            components: Vec::new(),
            component_index: None,
        };
        node.components = node.vector_components();
        node
    }

    fn vector_components(&self) -> Vec<SignalNode> {
        let SignalKind::Vector { scale } = self.kind else {
            return Vec::new();
        };
        (0..self.attributes.channels())
            .filter_map(|i| {
                let attributes = self.attributes.channel(i)?;
                Some(SignalNode {
                    address: self.address,
                    attributes,
                    kind: SignalKind::Float { scale },
                    config: self.config.clone(),
                    input: self.input.clone(),
                    components: Vec::new(),
                    component_index: Some(i),
                })
            })
            .collect()
    }

    /// Whether both nodes describe the same wire signal
    pub fn same_signal(&self, other: &SignalNode) -> bool {
        self.address == other.address && self.attributes == other.attributes
    }

    pub fn is_processor_output(&self) -> bool {
        self.address.is_processor() && self.address.register == processor::NOTIFY
    }

    pub fn is_state(&self) -> bool {
        self.address.is_processor() && self.address.register == processor::STATE
    }

    /// Patch the processor id into this node and its components
    pub fn with_id(mut self, id: u8) -> Self {
        self.set_id(id);
        self
    }

    fn set_id(&mut self, id: u8) {
        self.address.id = id;
        for component in &mut self.components {
            component.set_id(id);
        }
    }

    /// Replace the node feeding the producing processor
    ///
    /// Root nodes have no input and are returned unchanged.
    pub fn with_input(mut self, input: SignalNode) -> Self {
        self.set_input(&input);
        self
    }

    fn set_input(&mut self, input: &SignalNode) {
        if self.input.is_some() {
            self.input = Some(Box::new(input.clone()));
        }
        for component in &mut self.components {
            component.set_input(input);
        }
    }

    /// Copy of this node with its bytes starting at `offset`
    pub fn at_offset(&self, offset: u8) -> Self {
        let mut node = self.clone();
        let shift = offset as i16 - self.attributes.offset as i16;
        node.shift_offsets(shift);
        node
    }

    fn shift_offsets(&mut self, shift: i16) {
        self.attributes.offset = (self.attributes.offset as i16 + shift).max(0) as u8;
        for component in &mut self.components {
            component.shift_offsets(shift);
        }
    }

    /// Factor from firmware units to physical units
    pub fn scale(&self) -> f32 {
        match self.kind {
            SignalKind::Float { scale } | SignalKind::Vector { scale } => scale,
            SignalKind::Integer => 1.0,
            _ => self.input.as_ref().map(|i| i.scale()).unwrap_or(1.0),
        }
    }

    /// Root of the `input` chain
    pub fn origin(&self) -> &SignalNode {
        let mut node = self;
        while let Some(input) = node.input.as_deref() {
            node = input;
        }
        node
    }

    /// Human readable path, e.g. `acceleration:low-pass?id=3`
    pub fn identifier(&self, catalog: &ProducerCatalog) -> Result<String> {
        let mut out = match (&self.input, &self.config) {
            (Some(input), Some(config)) => {
                let mut upstream = input.identifier(catalog)?;
                upstream.push(':');
                upstream.push_str(config.name());
                if self.is_state() {
                    upstream.push_str("-state");
                }
                upstream.push_str(&format!("?id={}", self.address.id));
                upstream
            }
            _ => catalog
                .name_of(self.address.module, self.address.register)
                .map(str::to_string)
                .ok_or(Error::UnidentifiableSignal {
                    module: self.address.module,
                    register: self.address.register,
                })?,
        };
        if let Some(index) = self.component_index {
            out.push_str(&format!("[{}]", index));
        }
        Ok(out)
    }

    /// Decode one sample from a notification payload
    pub fn decode(&self, raw: &[u8], timestamp: DateTime<Utc>) -> Result<Sample> {
        Ok(Sample {
            timestamp,
            value: self.decode_value(raw)?,
        })
    }

    /// Decode every packed copy in a payload
    pub fn decode_all(&self, raw: &[u8], timestamp: DateTime<Utc>) -> Result<Vec<Sample>> {
        let copies = self.attributes.copies.max(1);
        if copies == 1 {
            return Ok(vec![self.decode(raw, timestamp)?]);
        }
        let single = DataAttributes {
            copies: 1,
            ..self.attributes.clone()
        };
        let length = self.attributes.length();
        (0..copies)
            .map(|copy| {
                let mut node = self.clone();
                node.attributes = DataAttributes {
                    offset: single.offset + copy * length,
                    ..single.clone()
                };
                node.decode(raw, timestamp)
            })
            .collect()
    }

    fn slice<'a>(&self, raw: &'a [u8]) -> Result<&'a [u8]> {
        let start = self.attributes.offset as usize;
        let end = start + self.attributes.length() as usize;
        raw.get(start..end).ok_or(Error::DecodeError {
            expected: end,
            actual: raw.len(),
        })
    }

    fn decode_value(&self, raw: &[u8]) -> Result<Value> {
        if self.attributes.is_empty() {
            return Ok(Value::Empty);
        }
        let bytes = self.slice(raw)?;
        let attrs = &self.attributes;
        let integer = |chunk: &[u8]| -> i64 {
            if attrs.signed {
                read_signed(chunk)
            } else {
                read_unsigned(chunk) as i64
            }
        };

        let value = match &self.kind {
            SignalKind::Integer if attrs.channels() <= 1 => {
                if attrs.signed {
                    Value::Signed(read_signed(bytes))
                } else {
                    Value::Unsigned(read_unsigned(bytes))
                }
            }
            SignalKind::Integer => Value::Vector(
                channel_slices(attrs, bytes)
                    .map(|chunk| integer(chunk) as f32)
                    .collect(),
            ),
            SignalKind::Float { scale } => Value::Float(integer(bytes) as f32 / scale),
            SignalKind::Vector { scale } => Value::Vector(
                channel_slices(attrs, bytes)
                    .map(|chunk| integer(chunk) as f32 / scale)
                    .collect(),
            ),
            SignalKind::Bytes => Value::Bytes(bytes.to_vec()),
            SignalKind::Fused => Value::Fused(
                self.components
                    .iter()
                    .map(|c| c.decode_value(raw))
                    .collect::<Result<Vec<_>>>()?,
            ),
            SignalKind::Accounted => {
                let (Some(prefix), Some(inner)) = (self.components.first(), self.components.get(1))
                else {
                    return Ok(Value::Bytes(bytes.to_vec()));
                };
                let prefix = read_unsigned(prefix.slice(raw)?) as u32;
                Value::Accounted {
                    prefix,
                    value: Box::new(inner.decode_value(raw)?),
                }
            }
        };
        Ok(value)
    }
}

fn channel_slices<'a>(
    attrs: &'a DataAttributes,
    bytes: &'a [u8],
) -> impl Iterator<Item = &'a [u8]> + 'a {
    attrs.sizes.iter().scan(0usize, move |start, size| {
        let chunk = bytes.get(*start..*start + *size as usize);
        *start += *size as usize;
        chunk
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acceleration() -> SignalNode {
        SignalNode::root(
            Address::unindexed(module::ACCELEROMETER, 0x04),
            DataAttributes::new(vec![2, 2, 2], 1, 0, true),
            SignalKind::Vector { scale: 16384.0 },
        )
    }

    #[test]
    fn test_vector_decode() {
        let node = acceleration();
        let raw = [0x00, 0x40, 0x00, 0xc0, 0x00, 0x20];
        let sample = node.decode(&raw, Utc::now()).unwrap();
        assert_eq!(sample.value, Value::Vector(vec![1.0, -1.0, 0.5]));
    }

    #[test]
    fn test_components_carry_offsets() {
        let node = acceleration();
        assert_eq!(node.components.len(), 3);
        let z = &node.components[2];
        assert_eq!(z.attributes.offset, 4);
        let sample = z.decode(&[0, 0, 0, 0, 0x00, 0x40], Utc::now()).unwrap();
        assert_eq!(sample.value, Value::Float(1.0));
    }

    #[test]
    fn test_short_payload_is_decode_error() {
        let node = acceleration();
        let err = node.decode(&[0x00, 0x40], Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            Error::DecodeError {
                expected: 6,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_decode_all_packed_copies() {
        let node = SignalNode::root(
            Address::unindexed(module::SWITCH, 0x01),
            DataAttributes::new(vec![1], 3, 0, false),
            SignalKind::Integer,
        );
        let samples = node.decode_all(&[1, 0, 1], Utc::now()).unwrap();
        let values: Vec<_> = samples.into_iter().map(|s| s.value).collect();
        assert_eq!(
            values,
            vec![Value::Unsigned(1), Value::Unsigned(0), Value::Unsigned(1)]
        );
    }

    #[test]
    fn test_with_id_patches_components() {
        let node = acceleration();
        let mut output = node.clone();
        output.address = Address::processor(NO_ID);
        let output = output.with_id(7);
        assert!(output.components.iter().all(|c| c.address.id == 7));
    }

    #[test]
    fn test_with_input_reaches_components() {
        use crate::pipeline::processor::{BufferConfig, ProcessorConfig};

        let config = ProcessorConfig::Buffer(BufferConfig { size: 6 });
        let pending = acceleration().with_id(NO_ID);
        let output = SignalNode::processed(
            &pending,
            &config,
            processor::NOTIFY,
            pending.attributes.derive_same_shape(),
            pending.kind.clone(),
        );
        let upstream = acceleration().with_id(2);
        let output = output.with_input(upstream.clone());
        assert_eq!(output.input.as_deref(), Some(&upstream));
        assert!(output
            .components
            .iter()
            .all(|c| c.input.as_deref() == Some(&upstream)));

        // roots stay roots
        assert!(acceleration().with_input(upstream).input.is_none());
    }

    #[test]
    fn test_integer_scale_is_one() {
        let node = SignalNode::root(
            Address::unindexed(module::SWITCH, 0x01),
            DataAttributes::scalar(1, false),
            SignalKind::Integer,
        );
        assert_eq!(node.scale(), 1.0);
        assert_eq!(acceleration().scale(), 16384.0);
    }
}
