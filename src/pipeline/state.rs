//! Registries shared by every route on one board
//!
//! [`GraphState`] is owned by the [`Board`](crate::engine::Board) and only
//! mutated on its command path: realization inserts, teardown removes, frame
//! dispatch and log download look entries up. Builders read it to resolve
//! named producers.

use super::id::RouteId;
use super::node::SignalNode;
use super::processor::ProcessorConfig;
use crate::datalog::merge::MergeQueue;
use crate::protocol::Address;
use crate::types::Sample;
use crossbeam_channel::Sender;
use std::collections::{BTreeMap, HashMap};

/// One processor living on the board
#[derive(Debug, Clone)]
pub struct ProcessorEntry {
    pub id: u8,
    /// Output it reads from
    pub source: Address,
    pub config: ProcessorConfig,
    pub output: SignalNode,
    pub state: Option<SignalNode>,
    pub name: Option<String>,
    pub route: RouteId,
}

/// Live notification subscription
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub route: RouteId,
    pub node: SignalNode,
    pub sender: Sender<Sample>,
}

/// Consumer of one logged signal (one or more loggers)
#[derive(Debug, Clone)]
pub struct LoggerEntry {
    pub route: RouteId,
    /// Logged node, its bytes starting at offset 0
    pub node: SignalNode,
    pub merge: MergeQueue,
    pub sender: Sender<Sample>,
}

impl LoggerEntry {
    pub fn ids(&self) -> &[u8] {
        self.merge.ids()
    }
}

#[derive(Debug, Default)]
pub struct GraphState {
    processors: BTreeMap<u8, ProcessorEntry>,
    names: HashMap<String, u8>,
    loggers: Vec<LoggerEntry>,
    streams: Vec<StreamEntry>,
    events: BTreeMap<u8, RouteId>,
}

impl GraphState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_processor(&mut self, entry: ProcessorEntry) {
        if let Some(name) = &entry.name {
            self.names.insert(name.clone(), entry.id);
        }
        self.processors.insert(entry.id, entry);
    }

    /// Forget a processor and its name
    pub fn remove_processor(&mut self, id: u8) -> Option<ProcessorEntry> {
        let entry = self.processors.remove(&id)?;
        if let Some(name) = &entry.name {
            self.names.remove(name);
        }
        Some(entry)
    }

    pub fn processor(&self, id: u8) -> Option<&ProcessorEntry> {
        self.processors.get(&id)
    }

    pub fn processors(&self) -> impl Iterator<Item = &ProcessorEntry> {
        self.processors.values()
    }

    /// Processor registered under `name`
    pub fn named(&self, name: &str) -> Option<&ProcessorEntry> {
        self.names.get(name).and_then(|id| self.processors.get(id))
    }

    pub fn named_mut(&mut self, name: &str) -> Option<&mut ProcessorEntry> {
        let id = *self.names.get(name)?;
        self.processors.get_mut(&id)
    }

    pub fn is_name_taken(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    pub fn add_logger(&mut self, entry: LoggerEntry) {
        self.loggers.push(entry);
    }

    /// Drop the consumer owning `log_id`
    pub fn remove_logger(&mut self, log_id: u8) -> bool {
        let before = self.loggers.len();
        self.loggers.retain(|l| !l.merge.contains(log_id));
        self.loggers.len() != before
    }

    pub fn logger_for_mut(&mut self, log_id: u8) -> Option<&mut LoggerEntry> {
        self.loggers.iter_mut().find(|l| l.merge.contains(log_id))
    }

    pub fn has_logger(&self, log_id: u8) -> bool {
        self.loggers.iter().any(|l| l.merge.contains(log_id))
    }

    pub fn loggers(&self) -> &[LoggerEntry] {
        &self.loggers
    }

    pub fn add_stream(&mut self, entry: StreamEntry) {
        self.streams.push(entry);
    }

    pub fn remove_streams(&mut self, route: RouteId) {
        self.streams.retain(|s| s.route != route);
    }

    pub fn streams(&self) -> &[StreamEntry] {
        &self.streams
    }

    pub fn insert_event(&mut self, id: u8, route: RouteId) {
        self.events.insert(id, route);
    }

    pub fn remove_event(&mut self, id: u8) -> bool {
        self.events.remove(&id).is_some()
    }

    pub fn has_event(&self, id: u8) -> bool {
        self.events.contains_key(&id)
    }

    /// Forget everything, e.g. after the board was reset
    pub fn clear(&mut self) {
        self.processors.clear();
        self.names.clear();
        self.loggers.clear();
        self.streams.clear();
        self.events.clear();
    }
}

/// Payload of `frame` if it is a notification from `address`
pub fn notification_payload(address: Address, frame: &[u8]) -> Option<&[u8]> {
    let header = if address.has_id() { 3 } else { 2 };
    let prefix = &address.to_bytes()[..header];
    if frame.len() >= header && &frame[..header] == prefix {
        Some(&frame[header..])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::processor::{BufferConfig, ProcessorConfig};
    use crate::protocol::module;
    use crate::types::DataAttributes;
    use crossbeam_channel::unbounded;

    fn entry(id: u8, name: Option<&str>) -> ProcessorEntry {
        let output = SignalNode::root(
            Address::processor(id),
            DataAttributes::empty(),
            crate::pipeline::node::SignalKind::Integer,
        );
        ProcessorEntry {
            id,
            source: Address::unindexed(module::SWITCH, 0x01),
            config: ProcessorConfig::Buffer(BufferConfig { size: 1 }),
            output,
            state: None,
            name: name.map(str::to_string),
            route: RouteId(0),
        }
    }

    #[test]
    fn test_names_follow_processors() {
        let mut state = GraphState::new();
        state.insert_processor(entry(3, Some("buf")));
        assert_eq!(state.named("buf").map(|e| e.id), Some(3));
        assert!(state.is_name_taken("buf"));

        state.remove_processor(3);
        assert!(state.named("buf").is_none());
        assert!(state.remove_processor(3).is_none());
    }

    #[test]
    fn test_logger_lookup_by_any_id() {
        let mut state = GraphState::new();
        let (tx, _rx) = unbounded();
        state.add_logger(LoggerEntry {
            route: RouteId(1),
            node: entry(0, None).output,
            merge: MergeQueue::new(vec![4, 5, 6]),
            sender: tx,
        });
        assert!(state.logger_for_mut(5).is_some());
        assert!(state.remove_logger(6));
        assert!(!state.has_logger(4));
    }

    #[test]
    fn test_notification_payload() {
        let processor = Address::processor(2);
        assert_eq!(
            notification_payload(processor, &[0x09, 0x03, 0x02, 0xaa]),
            Some(&[0xaa][..])
        );
        assert_eq!(notification_payload(processor, &[0x09, 0x03, 0x01, 0xaa]), None);

        let switch = Address::unindexed(module::SWITCH, 0x01);
        assert_eq!(notification_payload(switch, &[0x01, 0x01, 0x01]), Some(&[0x01][..]));
    }
}
