//! Test data builders for creating boards backed by a mock device

use super::test_timeout;
use sensorgraph::backend::{link_channel, shared_sink, MockDevice, MockHandle};
use sensorgraph::{Board, DeviceInfo, EngineConfig, ProducerCatalog};
use std::time::Duration;

/// Builder for a [`Board`] wired to a [`MockDevice`]
pub struct BoardBuilder {
    config: EngineConfig,
    catalog: Option<ProducerCatalog>,
}

impl BoardBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default().with_response_timeout(test_timeout()),
            catalog: None,
        }
    }

    pub fn device(mut self, device: DeviceInfo) -> Self {
        self.config.device = device;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.response_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn progress_updates(mut self, updates: u32) -> Self {
        self.config.progress_updates = updates;
        self
    }

    pub fn catalog(mut self, catalog: ProducerCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn build(self) -> (Board, MockHandle) {
        let (tx, rx) = link_channel(self.config.link_queue_capacity);
        let (device, handle) = MockDevice::new(tx, self.config.device);
        let board = Board::new(self.config, shared_sink(device), rx).expect("valid test config");
        let board = match self.catalog {
            Some(catalog) => board.with_catalog(catalog),
            None => board,
        };
        (board, handle)
    }
}

impl Default for BoardBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Board with default capabilities and its mock handle
pub fn test_board() -> (Board, MockHandle) {
    BoardBuilder::new().build()
}
