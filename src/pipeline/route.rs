//! Realized routes

use super::id::RouteId;
use crate::types::Sample;
use crossbeam_channel::{Receiver, TryIter};

/// Receiving end of one stream or log subscription
#[derive(Debug)]
pub struct Subscription {
    identifier: String,
    receiver: Receiver<Sample>,
}

impl Subscription {
    pub fn new(identifier: String, receiver: Receiver<Sample>) -> Self {
        Self {
            identifier,
            receiver,
        }
    }

    /// Identifier of the subscribed signal, e.g. `temperature:low-pass?id=0`
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn receiver(&self) -> &Receiver<Sample> {
        &self.receiver
    }

    /// Samples delivered so far, without blocking
    pub fn try_iter(&self) -> TryIter<'_, Sample> {
        self.receiver.try_iter()
    }

    pub fn into_receiver(self) -> Receiver<Sample> {
        self.receiver
    }
}

/// Handle to a route whose processors, loggers and events exist on the board
///
/// Dropping a `Route` does not touch the board; call
/// [`Board::remove_route`](crate::engine::Board::remove_route) to tear it
/// down.
#[derive(Debug)]
pub struct Route {
    pub(crate) id: RouteId,
    pub(crate) processors: Vec<u8>,
    pub(crate) loggers: Vec<u8>,
    pub(crate) events: Vec<u8>,
    pub(crate) names: Vec<String>,
    pub(crate) streams: Vec<Subscription>,
    pub(crate) logs: Vec<Subscription>,
}

impl Route {
    pub fn id(&self) -> RouteId {
        self.id
    }

    /// Processor ids in creation order
    pub fn processor_ids(&self) -> &[u8] {
        &self.processors
    }

    /// Logger ids in creation order
    pub fn logger_ids(&self) -> &[u8] {
        &self.loggers
    }

    pub fn event_ids(&self) -> &[u8] {
        &self.events
    }

    /// Names given to this route's processors
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// `i`-th `stream()` of the builder expression
    pub fn stream(&self, i: usize) -> Option<&Subscription> {
        self.streams.get(i)
    }

    /// `i`-th `log()` of the builder expression
    pub fn log(&self, i: usize) -> Option<&Subscription> {
        self.logs.get(i)
    }

    pub fn streams(&self) -> &[Subscription] {
        &self.streams
    }

    pub fn logs(&self) -> &[Subscription] {
        &self.logs
    }
}
