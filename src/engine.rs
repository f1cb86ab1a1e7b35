//! Board facade
//!
//! [`Board`] owns everything a connected sensor board needs on the host:
//! the device link, the registries of realized routes, the producer catalog
//! and the log reconciler. All board mutations go through it, one command at
//! a time.
//!
//! # Example
//!
//! ```ignore
//! use sensorgraph::backend::{link_channel, shared_sink};
//! use sensorgraph::config::EngineConfig;
//! use sensorgraph::engine::Board;
//!
//! let config = EngineConfig::default();
//! let (events_tx, events_rx) = link_channel(config.link_queue_capacity);
//! let board_sink = shared_sink(MyTransport::new(events_tx));
//! let mut board = Board::new(config, board_sink, events_rx)?;
//!
//! let route = board.build_route("temperature", |r| r.low_pass(4)?.stream())?;
//! loop {
//!     board.poll()?;
//!     for sample in route.stream(0).unwrap().try_iter() {
//!         println!("{} {:?}", sample.timestamp, sample.value);
//!     }
//! }
//! ```

use crate::backend::{DeviceLink, LinkEvent, SharedSink};
use crate::catalog::ProducerCatalog;
use crate::config::{DeviceInfo, EngineConfig};
use crate::datalog::{anonymous, download, AnonymousRoute, DownloadHandler, LogReconciler, LogReference};
use crate::error::{Error, Result};
use crate::pipeline::builder::{BuildContext, RouteBuilder};
use crate::pipeline::editor::StageEditor;
use crate::pipeline::id::RouteId;
use crate::pipeline::realizer::{realize, teardown};
use crate::pipeline::route::Route;
use crate::pipeline::state::{notification_payload, GraphState};
use chrono::Utc;
use crossbeam_channel::Receiver;

pub struct Board {
    config: EngineConfig,
    link: DeviceLink,
    state: GraphState,
    catalog: ProducerCatalog,
    reconciler: LogReconciler,
    next_route: RouteId,
}

impl Board {
    /// Board talking through `sink`, receiving frames from `events`
    pub fn new(config: EngineConfig, sink: SharedSink, events: Receiver<LinkEvent>) -> Result<Self> {
        config.validate()?;
        let link = DeviceLink::new(sink, events, config.response_timeout());
        let reconciler = LogReconciler::new(config.device, config.tick_duration_ms, config.progress_updates);
        tracing::debug!(
            "Board created: firmware {}, processor rev {}, logging rev {}",
            config.device.firmware,
            config.device.processor_revision,
            config.device.logging_revision
        );
        Ok(Self {
            config,
            link,
            state: GraphState::new(),
            catalog: ProducerCatalog::standard(),
            reconciler,
            next_route: RouteId(0),
        })
    }

    /// Replace the producer catalog
    pub fn with_catalog(mut self, catalog: ProducerCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.config.device
    }

    pub fn catalog(&self) -> &ProducerCatalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut ProducerCatalog {
        &mut self.catalog
    }

    pub fn state(&self) -> &GraphState {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Build a route from `producer` and program it onto the board
    ///
    /// Builder errors leave the board untouched. A failed realization removes
    /// whatever it created before returning the error.
    pub fn build_route<F>(&mut self, producer: &str, build: F) -> Result<Route>
    where
        F: FnOnce(RouteBuilder<'_>) -> Result<RouteBuilder<'_>>,
    {
        let root = self
            .catalog
            .get(producer)
            .cloned()
            .ok_or_else(|| Error::illegal(format!("unknown producer '{}'", producer)))?;

        let mut ctx = BuildContext::new(&self.state, self.config.device);
        build(ctx.builder(root))?;
        let pending = ctx.finish();

        let id = self.next_route;
        self.next_route = id.next();
        tracing::debug!(
            "Realizing route {} from {}: {} stages",
            id,
            producer,
            pending.stages.len()
        );
        realize(&mut self.link, &mut self.state, &self.catalog, id, pending)
    }

    /// Remove every processor, logger and event of `route`
    pub fn remove_route(&mut self, route: &Route) -> Result<()> {
        tracing::debug!("Removing route {}", route.id());
        teardown(&self.link, &mut self.state, route)
    }

    /// Editor for the processor named `name`
    ///
    /// Successful edits also update the config held in [`Board::state`].
    pub fn editor(&mut self, name: &str) -> Result<StageEditor<'_>> {
        let sink = self.link.sink();
        let entry = self
            .state
            .named_mut(name)
            .ok_or_else(|| Error::illegal(format!("no processor named '{}'", name)))?;
        StageEditor::for_entry(entry, sink)
    }

    /// Deliver every frame received so far; returns the samples delivered
    pub fn poll(&mut self) -> Result<usize> {
        let mut delivered = 0;
        while let Some(frame) = self.link.try_next()? {
            delivered += self.dispatch(&frame);
        }
        Ok(delivered)
    }

    /// Decode a notification for every stream subscribed to it
    pub fn dispatch(&self, frame: &[u8]) -> usize {
        let timestamp = Utc::now();
        let mut delivered = 0;
        for stream in self.state.streams() {
            let Some(payload) = notification_payload(stream.node.address, frame) else {
                continue;
            };
            match stream.node.decode_all(payload, timestamp) {
                Ok(samples) => {
                    for sample in samples {
                        if stream.sender.send(sample).is_ok() {
                            delivered += 1;
                        }
                    }
                }
                Err(e) => tracing::warn!("Dropping notification from {}: {}", stream.node.address, e),
            }
        }
        if delivered == 0 {
            tracing::trace!("No subscriber for frame {:02x?}", frame);
        }
        delivered
    }

    /// Read the board clock as the time reference for its reset epoch
    pub fn query_time(&mut self) -> Result<LogReference> {
        self.reconciler.query_time(&mut self.link)
    }

    /// Number of entries waiting in the board's log
    pub fn log_entry_count(&mut self) -> Result<u32> {
        self.reconciler.entry_count(&mut self.link)
    }

    /// Download the board's log into the registered log subscriptions
    pub fn download_log(&mut self, handler: &mut dyn DownloadHandler) -> Result<()> {
        download::download(&mut self.link, &mut self.state, &mut self.reconciler, handler)
    }

    /// Erase the board's stored log entries
    pub fn clear_log_entries(&self) -> Result<()> {
        self.reconciler.clear_entries(&self.link)
    }

    /// Subscribe to every logger on the board this host did not create
    pub fn create_anonymous_routes(&mut self) -> Result<Vec<AnonymousRoute>> {
        anonymous::reconstruct(&mut self.link, &mut self.state, &self.catalog, self.config.device)
    }

    /// The transport is back; routes on the board are assumed intact
    pub fn handle_reconnect(&mut self) {
        tracing::info!("Link reconnected");
        self.link.reconnected();
    }

    /// Forget every route, e.g. after the board was reset
    pub fn forget_routes(&mut self) {
        tracing::info!("Forgetting all routes");
        self.state.clear();
    }
}
