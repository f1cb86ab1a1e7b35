//! Consumers for loggers created by someone else
//!
//! A board keeps its loggers and processors across host restarts. To read
//! such logs the host rebuilds each logged signal from the board's own
//! tables:
//!
//! 1. read the logger table and group entries logging consecutive 4-byte
//!    chunks of one output
//! 2. for a processor output, read the processor table entry, recurse into
//!    its source and re-run type inference on the decoded config
//! 3. for a sensor output, ask the producer catalog for the best matching
//!    root (whole signal, one component, or a raw placeholder)
//!
//! When two producers share a module/register pair and byte range the
//! catalog picks the first registered one.

use crate::backend::{DeviceLink, ReplyKey};
use crate::catalog::ProducerCatalog;
use crate::config::DeviceInfo;
use crate::datalog::merge::MergeQueue;
use crate::error::{Error, Result};
use crate::pipeline::id::RouteId;
use crate::pipeline::infer::{infer, Inferred};
use crate::pipeline::node::{SignalKind, SignalNode};
use crate::pipeline::processor::{hex, ProcessorConfig};
use crate::pipeline::state::{GraphState, LoggerEntry, ProcessorEntry};
use crate::protocol::{logging, module, processor, read, unpack_length_offset, Address, LOG_ENTRY_SIZE};
use crate::types::{DataAttributes, Sample};
use crossbeam_channel::{unbounded, Receiver, TryIter};
use std::collections::HashMap;

/// Consumer of a log nobody on this host registered
#[derive(Debug)]
pub struct AnonymousRoute {
    identifier: String,
    log_ids: Vec<u8>,
    node: SignalNode,
    receiver: Receiver<Sample>,
}

impl AnonymousRoute {
    /// Identifier of the rebuilt signal, e.g. `acceleration[0]:low-pass?id=0`
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn log_ids(&self) -> &[u8] {
        &self.log_ids
    }

    /// Rebuilt node, bytes starting at offset 0
    pub fn node(&self) -> &SignalNode {
        &self.node
    }

    pub fn receiver(&self) -> &Receiver<Sample> {
        &self.receiver
    }

    pub fn try_iter(&self) -> TryIter<'_, Sample> {
        self.receiver.try_iter()
    }
}

/// Longest processor chain followed before giving up
const MAX_CHAIN_DEPTH: usize = 32;

/// One logger table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LoggerSource {
    id: u8,
    address: Address,
    length: u8,
    offset: u8,
}

/// Loggers covering one contiguous byte range of an output
#[derive(Debug, Clone)]
struct LoggedSignal {
    address: Address,
    offset: u8,
    length: u8,
    ids: Vec<u8>,
}

/// Reply to a logger table read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoggerSlot {
    /// No id byte: the table ends here
    End,
    Empty,
    Used(LoggerSource),
}

fn read_logger(link: &mut DeviceLink, id: u8) -> Result<LoggerSlot> {
    let register = read(logging::TRIGGER);
    let reply = link.request(
        &[module::LOGGING, register, id],
        ReplyKey::register(module::LOGGING, register),
        "logger read",
    )?;
    Ok(parse_logger_slot(id, &reply))
}

fn parse_logger_slot(id: u8, reply: &[u8]) -> LoggerSlot {
    match reply.get(2) {
        None => LoggerSlot::End,
        Some(&replied) if replied != id || reply.len() < 7 => LoggerSlot::Empty,
        Some(_) => {
            let (length, offset) = unpack_length_offset(reply[6]);
            LoggerSlot::Used(LoggerSource {
                id,
                address: Address::new(reply[3], reply[4], reply[5]),
                length,
                offset,
            })
        }
    }
}

/// Group loggers whose ranges continue each other on the same output
fn group(sources: Vec<LoggerSource>) -> Vec<LoggedSignal> {
    let mut signals: Vec<LoggedSignal> = Vec::new();
    for source in sources {
        if let Some(last) = signals.last_mut() {
            let chunk_full = last.length as usize % LOG_ENTRY_SIZE == 0;
            if last.address == source.address
                && chunk_full
                && last.offset + last.length == source.offset
            {
                last.length += source.length;
                last.ids.push(source.id);
                continue;
            }
        }
        signals.push(LoggedSignal {
            address: source.address,
            offset: source.offset,
            length: source.length,
            ids: vec![source.id],
        });
    }
    signals
}

/// Part of `node` covering `[offset, offset + length)`
fn select(node: &SignalNode, offset: u8, length: u8) -> SignalNode {
    let attrs = &node.attributes;
    if attrs.offset == offset && attrs.unit_length() == length {
        return node.clone();
    }
    if let Some(component) = node
        .components
        .iter()
        .find(|c| c.attributes.offset == offset && c.attributes.unit_length() == length)
    {
        return component.clone();
    }
    tracing::debug!(
        "No part of {} covers offset {} length {}, decoding as bytes",
        node.address,
        offset,
        length
    );
    let mut part = SignalNode::root(
        node.address,
        DataAttributes::new(vec![length], 1, offset, attrs.signed),
        SignalKind::Bytes,
    );
    part.config = node.config.clone();
    part.input = node.input.clone();
    part
}

/// Walks the board's processor table, memoizing every processor it rebuilt
struct Reconstructor<'a> {
    link: &'a mut DeviceLink,
    catalog: &'a ProducerCatalog,
    device: DeviceInfo,
    rebuilt: HashMap<u8, (Address, ProcessorConfig, Inferred)>,
}

impl Reconstructor<'_> {
    fn source_node(&mut self, address: Address, offset: u8, length: u8, depth: usize) -> Result<SignalNode> {
        if address.is_processor() && address.register == processor::NOTIFY {
            let inferred = self.processor(address.id, depth + 1)?;
            return Ok(select(&inferred.output, offset, length));
        }
        if address.is_processor() && address.register == processor::STATE {
            let inferred = self.processor(address.id, depth + 1)?;
            let state = inferred.state.unwrap_or(inferred.output);
            return Ok(select(&state, offset, length));
        }
        Ok(self.catalog.find_root(address, offset, length).into_node())
    }

    fn processor(&mut self, id: u8, depth: usize) -> Result<Inferred> {
        if let Some((_, _, inferred)) = self.rebuilt.get(&id) {
            return Ok(inferred.clone());
        }
        if depth > MAX_CHAIN_DEPTH {
            return Err(Error::Protocol(format!(
                "processor chain through {} does not end at a sensor",
                id
            )));
        }

        let register = read(processor::ADD);
        let reply = self.link.request(
            &[module::DATA_PROCESSOR, register, id],
            ReplyKey::indexed(module::DATA_PROCESSOR, register, id),
            "processor read",
        )?;
        if reply.len() < 8 {
            return Err(Error::Protocol(format!(
                "processor {} is not on the board ({})",
                id,
                hex(&reply)
            )));
        }
        let source = Address::new(reply[3], reply[4], reply[5]);
        let (length, offset) = unpack_length_offset(reply[6]);
        let config = ProcessorConfig::decode(&self.device, &reply[7..])?;
        tracing::debug!("Processor {} is {} reading {}", id, config.name(), source);

        let input = self.source_node(source, offset, length, depth)?;
        let fused = match &config {
            ProcessorConfig::Fuser(fuser) => fuser
                .ids
                .iter()
                .map(|buffer| {
                    let inferred = self.processor(*buffer, depth + 1)?;
                    inferred.state.ok_or_else(|| {
                        Error::Protocol(format!("fused processor {} has no state", buffer))
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            _ => Vec::new(),
        };

        let inferred = infer(&input, &config, &fused)?;
        let inferred = Inferred {
            output: inferred.output.with_id(id),
            state: inferred.state.map(|s| s.with_id(id)),
        };
        self.rebuilt.insert(id, (source, config, inferred.clone()));
        Ok(inferred)
    }
}

/// Register a consumer for every logger on the board this host does not know
///
/// Processors rebuilt on the way are added to `state` under
/// [`RouteId::INVALID`] unless already present.
pub fn reconstruct(
    link: &mut DeviceLink,
    state: &mut GraphState,
    catalog: &ProducerCatalog,
    device: DeviceInfo,
) -> Result<Vec<AnonymousRoute>> {
    let mut sources = Vec::new();
    for id in 0..logging::MAX_LOGGERS {
        if state.has_logger(id) {
            continue;
        }
        match read_logger(link, id)? {
            LoggerSlot::Used(source) => sources.push(source),
            LoggerSlot::Empty => {}
            LoggerSlot::End => break,
        }
    }
    let signals = group(sources);
    tracing::info!("Found {} unregistered logged signals", signals.len());

    let mut reconstructor = Reconstructor {
        link,
        catalog,
        device,
        rebuilt: HashMap::new(),
    };
    let mut routes = Vec::new();
    for signal in signals {
        let node = reconstructor.source_node(signal.address, signal.offset, signal.length, 0)?;
        let identifier = node
            .identifier(catalog)
            .unwrap_or_else(|_| signal.address.to_string());
        tracing::debug!("Loggers {:?} log {}", signal.ids, identifier);

        let node = node.at_offset(0);
        let (tx, rx) = unbounded();
        state.add_logger(LoggerEntry {
            route: RouteId::INVALID,
            node: node.clone(),
            merge: MergeQueue::new(signal.ids.clone()),
            sender: tx,
        });
        routes.push(AnonymousRoute {
            identifier,
            log_ids: signal.ids,
            node,
            receiver: rx,
        });
    }

    for (id, (source, config, inferred)) in reconstructor.rebuilt {
        if state.processor(id).is_none() {
            state.insert_processor(ProcessorEntry {
                id,
                source,
                config,
                output: inferred.output,
                state: inferred.state,
                name: None,
                route: RouteId::INVALID,
            });
        }
    }
    Ok(routes)
}
