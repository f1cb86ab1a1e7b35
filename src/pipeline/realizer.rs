//! Programming pending routes onto the board
//!
//! Realization is strictly sequential: one create command in flight, each
//! awaited with the link's response timeout. The order is
//!
//! 1. processors, in declaration order (each id patched into later stages)
//! 2. log triggers, one per 4-byte chunk of every logged signal
//! 3. events for reactions, then feedback events
//! 4. notification enables for streamed processor outputs
//!
//! Any failure removes everything this call created, in creation order, and
//! the board-wide [`GraphState`] is only updated once every step succeeded.

use super::builder::{Cursor, NamedRef, Origin, PendingRoute, PendingStage};
use super::id::RouteId;
use super::node::SignalNode;
use super::processor::{hex, ProcessorConfig};
use super::route::{Route, Subscription};
use super::state::{GraphState, LoggerEntry, ProcessorEntry, StreamEntry};
use crate::backend::{DeviceLink, ReplyKey};
use crate::catalog::ProducerCatalog;
use crate::datalog::merge::MergeQueue;
use crate::error::{Error, Result};
use crate::protocol::{event, logging, module, pack_length_offset, processor, LOG_ENTRY_SIZE};
use crossbeam_channel::unbounded;

/// Ids created so far by one realize call
#[derive(Debug, Default)]
struct Created {
    processors: Vec<u8>,
    loggers: Vec<u8>,
    events: Vec<u8>,
}

impl Created {
    fn rollback(&self, link: &DeviceLink) {
        tracing::info!(
            "Rolling back {} processors, {} loggers, {} events",
            self.processors.len(),
            self.loggers.len(),
            self.events.len()
        );
        for id in &self.processors {
            if let Err(e) = link.send(&remove_processor_command(*id)) {
                tracing::warn!("Failed to remove processor {}: {}", id, e);
            }
        }
        for id in &self.loggers {
            if let Err(e) = link.send(&remove_logger_command(*id)) {
                tracing::warn!("Failed to remove logger {}: {}", id, e);
            }
        }
        for id in &self.events {
            if let Err(e) = link.send(&remove_event_command(*id)) {
                tracing::warn!("Failed to remove event {}: {}", id, e);
            }
        }
    }
}

pub fn remove_processor_command(id: u8) -> [u8; 3] {
    [module::DATA_PROCESSOR, processor::REMOVE, id]
}

pub fn remove_logger_command(id: u8) -> [u8; 3] {
    [module::LOGGING, logging::REMOVE, id]
}

pub fn remove_event_command(id: u8) -> [u8; 3] {
    [module::EVENT, event::REMOVE, id]
}

/// `(length, offset)` byte field for a source node
fn packed_source(node: &SignalNode) -> u8 {
    pack_length_offset(node.attributes.unit_length(), node.attributes.offset)
}

/// Id byte of a create/entry reply
fn reply_id(reply: &[u8], what: &str) -> Result<u8> {
    reply
        .get(2)
        .copied()
        .ok_or_else(|| Error::Protocol(format!("{} reply too short: {}", what, hex(reply))))
}

/// Node under `cursor` with every pending id in its input chain patched
fn resolve(cursor: &Cursor, stages: &[PendingStage], ids: &[u8]) -> SignalNode {
    match cursor.origin {
        Origin::Existing => cursor.node.clone(),
        Origin::Stage(index) => {
            let stage = &stages[index.index()];
            let input = resolve(&stage.source, stages, ids);
            cursor.node.clone().with_id(ids[index.index()]).with_input(input)
        }
    }
}

fn resolve_ref(named: &NamedRef, ids: &[u8]) -> u8 {
    match named {
        NamedRef::Realized(id) => *id,
        NamedRef::Pending(index) => ids[index.index()],
    }
}

/// Device-side results of a successful programming pass
#[derive(Debug, Default)]
struct Programmed {
    processor_ids: Vec<u8>,
    configs: Vec<ProcessorConfig>,
    logger_ids: Vec<Vec<u8>>,
    event_ids: Vec<u8>,
}

/// Create every processor, logger and event of `pending` on the board
pub fn realize(
    link: &mut DeviceLink,
    state: &mut GraphState,
    catalog: &ProducerCatalog,
    route_id: RouteId,
    pending: PendingRoute,
) -> Result<Route> {
    let mut created = Created::default();
    match program(link, &pending, &mut created) {
        Ok(programmed) => {
            tracing::debug!(
                "Route {} realized: processors {:?}, loggers {:?}, events {:?}",
                route_id,
                created.processors,
                created.loggers,
                created.events
            );
            Ok(commit(state, catalog, route_id, pending, programmed))
        }
        Err(e) => {
            tracing::warn!("Realizing route {} failed: {}", route_id, e);
            created.rollback(link);
            Err(e)
        }
    }
}

fn program(link: &mut DeviceLink, pending: &PendingRoute, created: &mut Created) -> Result<Programmed> {
    let mut out = Programmed::default();

    for stage in &pending.stages {
        let source = resolve(&stage.source, &pending.stages, &out.processor_ids);
        let config = match &stage.config {
            ProcessorConfig::Fuser(fuser) => {
                let mut fuser = fuser.clone();
                fuser.ids = stage
                    .fuse
                    .iter()
                    .map(|r| resolve_ref(r, &out.processor_ids))
                    .collect();
                ProcessorConfig::Fuser(fuser)
            }
            other => other.clone(),
        };

        let mut command = vec![module::DATA_PROCESSOR, processor::ADD];
        command.extend_from_slice(&source.address.to_bytes());
        command.push(packed_source(&source));
        command.extend(config.encode());

        let reply = link.request(
            &command,
            ReplyKey::register(module::DATA_PROCESSOR, processor::ADD),
            "processor create",
        )?;
        let id = reply_id(&reply, "processor create")?;
        tracing::debug!("Created processor {} ({}) from {}", id, config.name(), source.address);
        created.processors.push(id);
        out.processor_ids.push(id);
        out.configs.push(config);
    }

    for cursor in &pending.logs {
        let node = resolve(cursor, &pending.stages, &out.processor_ids);
        let length = node.attributes.unit_length();
        let offset = node.attributes.offset;
        let mut ids = Vec::new();
        for chunk in (0..length).step_by(LOG_ENTRY_SIZE) {
            let width = (length - chunk).min(LOG_ENTRY_SIZE as u8);
            let mut command = vec![module::LOGGING, logging::TRIGGER];
            command.extend_from_slice(&node.address.to_bytes());
            command.push(pack_length_offset(width, offset + chunk));
            let reply = link.request(
                &command,
                ReplyKey::register(module::LOGGING, logging::TRIGGER),
                "log trigger create",
            )?;
            let id = reply_id(&reply, "log trigger create")?;
            tracing::debug!("Created logger {} for {}", id, node.address);
            created.loggers.push(id);
            ids.push(id);
        }
        out.logger_ids.push(ids);
    }

    for reaction in &pending.reactions {
        let source = resolve(&reaction.source, &pending.stages, &out.processor_ids);
        for command in &reaction.commands {
            let mut entry = vec![module::EVENT, event::ENTRY];
            entry.extend_from_slice(&source.address.to_bytes());
            entry.extend_from_slice(&command[..2]);
            entry.push((command.len() - 2) as u8);
            let id = program_event(link, &entry, &command[2..])?;
            created.events.push(id);
            out.event_ids.push(id);
        }
    }

    for feedback in &pending.feedback {
        let producer_id = resolve_ref(&feedback.producer, &out.processor_ids);
        let producer = feedback.producer_node.clone().with_id(producer_id);
        let destination = feedback.destination.index();
        let destination_id = out.processor_ids[destination];
        let config = out.configs[destination].encode();

        let mut entry = vec![module::EVENT, event::ENTRY];
        entry.extend_from_slice(&producer.address.to_bytes());
        entry.extend_from_slice(&[module::DATA_PROCESSOR, processor::PARAMETER]);
        entry.push((config.len() + 1) as u8);
        entry.push(data_token(
            producer.attributes.length(),
            producer.attributes.offset,
        ));
        entry.push(feedback.destination_offset);

        let mut parameters = vec![destination_id];
        parameters.extend(config);
        let id = program_event(link, &entry, &parameters)?;
        tracing::debug!(
            "Feedback event {}: processor {} -> processor {} @{}",
            id,
            producer_id,
            destination_id,
            feedback.destination_offset
        );
        created.events.push(id);
        out.event_ids.push(id);
    }

    for cursor in &pending.streams {
        let node = resolve(cursor, &pending.stages, &out.processor_ids);
        if node.is_processor_output() {
            link.send(&[
                module::DATA_PROCESSOR,
                processor::NOTIFY_ENABLE,
                node.address.id,
                1,
            ])?;
        }
    }

    Ok(out)
}

/// Copy `length` bytes from `offset` of the triggering payload
fn data_token(length: u8, offset: u8) -> u8 {
    0x01 | ((length.saturating_sub(1) & 0x7) << 1) | (offset << 4)
}

fn program_event(link: &mut DeviceLink, entry: &[u8], parameters: &[u8]) -> Result<u8> {
    link.send(entry)?;
    let mut command = vec![module::EVENT, event::CMD_PARAMETERS];
    command.extend_from_slice(parameters);
    let reply = link.request(
        &command,
        ReplyKey::register(module::EVENT, event::ENTRY),
        "event create",
    )?;
    reply_id(&reply, "event create")
}

fn identifier(node: &SignalNode, catalog: &ProducerCatalog) -> String {
    node.identifier(catalog)
        .unwrap_or_else(|_| node.address.to_string())
}

/// Record a successfully programmed route in the board-wide state
fn commit(
    state: &mut GraphState,
    catalog: &ProducerCatalog,
    route_id: RouteId,
    pending: PendingRoute,
    programmed: Programmed,
) -> Route {
    let ids = &programmed.processor_ids;
    let mut names = Vec::new();

    for ((stage, id), config) in pending.stages.iter().zip(ids).zip(&programmed.configs) {
        let source = resolve(&stage.source, &pending.stages, ids);
        let mut output = stage.output.clone().with_id(*id).with_input(source.clone());
        output.config = Some(config.clone());
        if let Some(name) = &stage.name {
            names.push(name.clone());
        }
        state.insert_processor(ProcessorEntry {
            id: *id,
            source: source.address,
            config: config.clone(),
            output,
            state: stage.state.clone().map(|s| s.with_id(*id).with_input(source.clone())),
            name: stage.name.clone(),
            route: route_id,
        });
    }

    let mut streams = Vec::new();
    for cursor in &pending.streams {
        let node = resolve(cursor, &pending.stages, ids);
        let (tx, rx) = unbounded();
        streams.push(Subscription::new(identifier(&node, catalog), rx));
        state.add_stream(StreamEntry {
            route: route_id,
            node,
            sender: tx,
        });
    }

    let mut logs = Vec::new();
    for (cursor, logger_ids) in pending.logs.iter().zip(&programmed.logger_ids) {
        let node = resolve(cursor, &pending.stages, ids);
        let (tx, rx) = unbounded();
        logs.push(Subscription::new(identifier(&node, catalog), rx));
        state.add_logger(LoggerEntry {
            route: route_id,
            node: node.at_offset(0),
            merge: MergeQueue::new(logger_ids.clone()),
            sender: tx,
        });
    }

    for id in &programmed.event_ids {
        state.insert_event(*id, route_id);
    }

    Route {
        id: route_id,
        processors: programmed.processor_ids,
        loggers: programmed.logger_ids.into_iter().flatten().collect(),
        events: programmed.event_ids,
        names,
        streams,
        logs,
    }
}

/// Remove a route's board objects and forget them
///
/// Ids already gone from `state` are skipped, so tearing a route down twice
/// is harmless. Bookkeeping is dropped even when a remove command fails; the
/// first failure is returned.
pub fn teardown(link: &DeviceLink, state: &mut GraphState, route: &Route) -> Result<()> {
    let mut first_error = None;
    let mut record = |result: Result<()>| {
        if let Err(e) = result {
            tracing::warn!("Teardown of route {}: {}", route.id, e);
            first_error.get_or_insert(e);
        }
    };

    for id in &route.processors {
        if state.remove_processor(*id).is_some() {
            record(link.send(&remove_processor_command(*id)));
        }
    }
    for id in &route.loggers {
        if state.has_logger(*id) {
            record(link.send(&remove_logger_command(*id)));
        }
    }
    for id in &route.loggers {
        state.remove_logger(*id);
    }
    for id in &route.events {
        if state.remove_event(*id) {
            record(link.send(&remove_event_command(*id)));
        }
    }
    state.remove_streams(route.id);

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_token() {
        assert_eq!(data_token(4, 0), 0x07);
        assert_eq!(data_token(2, 2), 0x23);
        assert_eq!(data_token(1, 0), 0x01);
    }

    #[test]
    fn test_remove_commands() {
        assert_eq!(remove_processor_command(3), [0x09, 0x06, 0x03]);
        assert_eq!(remove_logger_command(1), [0x0b, 0x03, 0x01]);
        assert_eq!(remove_event_command(0), [0x0a, 0x04, 0x00]);
    }
}
