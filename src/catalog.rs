//! Catalog of named data producers
//!
//! Routes start from a producer name such as `"acceleration"` or `"switch"`.
//! The catalog maps those names to root [`SignalNode`]s and answers the
//! reverse question (which producer lives at a module/register pair) when
//! identifiers are built or anonymous routes are reconstructed.

use crate::pipeline::node::{SignalKind, SignalNode};
use crate::protocol::{module, Address};
use crate::types::DataAttributes;

#[derive(Debug, Clone)]
struct ProducerEntry {
    name: String,
    node: SignalNode,
}

/// Best match for a `(address, offset, length)` triple read back from the board
#[derive(Debug, Clone, PartialEq)]
pub enum RootMatch {
    /// The whole producer output
    Whole(SignalNode),
    /// One component of a multi-channel producer
    Component(SignalNode),
    /// Nothing fits; a raw node covering exactly the requested bytes
    Placeholder(SignalNode),
}

impl RootMatch {
    pub fn into_node(self) -> SignalNode {
        match self {
            RootMatch::Whole(n) | RootMatch::Component(n) | RootMatch::Placeholder(n) => n,
        }
    }
}

/// Named root producers
#[derive(Debug, Clone, Default)]
pub struct ProducerCatalog {
    entries: Vec<ProducerEntry>,
}

impl ProducerCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Catalog with the board's built-in sensors in their default ranges
    pub fn standard() -> Self {
        let vector = |m: u8, r: u8, scale: f32| {
            SignalNode::root(
                Address::unindexed(m, r),
                DataAttributes::new(vec![2, 2, 2], 1, 0, true),
                SignalKind::Vector { scale },
            )
        };
        let mut catalog = Self::empty();
        catalog.register(
            "switch",
            SignalNode::root(
                Address::unindexed(module::SWITCH, 0x01),
                DataAttributes::scalar(1, false),
                SignalKind::Integer,
            ),
        );
        catalog.register("acceleration", vector(module::ACCELEROMETER, 0x04, 16384.0));
        catalog.register(
            "temperature",
            SignalNode::root(
                Address::new(module::TEMPERATURE, 0x01, 0x00),
                DataAttributes::scalar(2, true),
                SignalKind::Float { scale: 8.0 },
            ),
        );
        catalog.register(
            "gpio-adc",
            SignalNode::root(
                Address::new(module::GPIO, 0x07, 0x00),
                DataAttributes::scalar(2, false),
                SignalKind::Integer,
            ),
        );
        catalog.register(
            "pressure",
            SignalNode::root(
                Address::unindexed(module::BAROMETER, 0x01),
                DataAttributes::scalar(4, false),
                SignalKind::Float { scale: 256.0 },
            ),
        );
        catalog.register("angular-velocity", vector(module::GYRO, 0x05, 16.4));
        catalog.register(
            "illuminance",
            SignalNode::root(
                Address::unindexed(module::AMBIENT_LIGHT, 0x03),
                DataAttributes::scalar(4, false),
                SignalKind::Float { scale: 1000.0 },
            ),
        );
        catalog.register("magnetic-field", vector(module::MAGNETOMETER, 0x05, 16.0));
        catalog.register(
            "relative-humidity",
            SignalNode::root(
                Address::unindexed(module::HUMIDITY, 0x01),
                DataAttributes::scalar(4, false),
                SignalKind::Float { scale: 1024.0 },
            ),
        );
        catalog
    }

    /// Add or replace a producer
    pub fn register(&mut self, name: impl Into<String>, node: SignalNode) {
        let name = name.into();
        self.entries.retain(|e| e.name != name);
        self.entries.push(ProducerEntry { name, node });
    }

    pub fn get(&self, name: &str) -> Option<&SignalNode> {
        self.entries.iter().find(|e| e.name == name).map(|e| &e.node)
    }

    /// Producer name registered for a module/register pair
    pub fn name_of(&self, module: u8, register: u8) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.node.address.module == module && e.node.address.register == register)
            .map(|e| e.name.as_str())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Guess the root behind bytes `[offset, offset + length)` of `address`
    ///
    /// A producer whose whole output covers the range wins over one of its
    /// components; with neither, a raw byte node is returned so the chain can
    /// still be decoded.
    pub fn find_root(&self, address: Address, offset: u8, length: u8) -> RootMatch {
        let candidates = self.entries.iter().filter(|e| {
            e.node.address.module == address.module
                && e.node.address.register == address.register
                && (!e.node.address.has_id() || e.node.address.id == address.id)
        });

        let mut component = None;
        for entry in candidates {
            let node = &entry.node;
            if node.attributes.offset == offset && node.attributes.length() == length {
                tracing::debug!("Root {} matched as whole signal", entry.name);
                return RootMatch::Whole(node.clone().with_id(address.id));
            }
            if component.is_none() {
                component = node
                    .components
                    .iter()
                    .find(|c| c.attributes.offset == offset && c.attributes.length() == length)
                    .cloned();
            }
        }

        if let Some(c) = component {
            tracing::debug!("Root at {} matched component {:?}", address, c.component_index);
            return RootMatch::Component(c);
        }

        tracing::debug!(
            "No producer at {} covers offset {} length {}, using placeholder",
            address,
            offset,
            length
        );
        RootMatch::Placeholder(SignalNode::root(
            address,
            DataAttributes::new(vec![length], 1, offset, false),
            SignalKind::Bytes,
        ))
    }
}
