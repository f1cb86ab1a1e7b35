//! # sensorgraph: on-board processing graphs for sensor boards
//!
//! A host-side engine that compiles declarative data routes into the byte
//! commands a sensor board's data processor, logger and event modules
//! understand, programs them with bounded-time handshakes and atomic
//! rollback, and turns the board's notifications and stored logs back into
//! timestamped samples.
//!
//! ## Architecture
//!
//! - **Pipeline**: signal nodes, processor config codec, type inference, the
//!   fluent route builder, realization and live editors
//! - **Datalog**: log download, multi-entry merge, tick to wall-clock
//!   reconciliation and reconstruction of routes created elsewhere
//! - **Backend**: the command sink / notification channel pair, the
//!   single-outstanding-request link and an in-memory mock board
//! - **Engine**: the [`Board`] facade tying them together
//!
//! ## Example
//!
//! ```ignore
//! use sensorgraph::backend::{link_channel, shared_sink, MockDevice};
//! use sensorgraph::config::EngineConfig;
//! use sensorgraph::pipeline::ComparisonOp;
//! use sensorgraph::Board;
//!
//! let config = EngineConfig::default();
//! let (tx, rx) = link_channel(config.link_queue_capacity);
//! let (device, _handle) = MockDevice::new(tx, config.device);
//! let mut board = Board::new(config, shared_sink(device), rx)?;
//!
//! let route = board.build_route("acceleration", |r| {
//!     r.split()?
//!         .index(2)?
//!         .filter(ComparisonOp::Gt, &[0.5])?
//!         .count()?
//!         .name("z-events")?
//!         .log()
//! })?;
//! ```

pub mod backend;
pub mod catalog;
pub mod config;
pub mod datalog;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod protocol;
pub mod types;

// Re-export commonly used types
pub use catalog::ProducerCatalog;
pub use config::{DeviceInfo, EngineConfig};
pub use engine::Board;
pub use error::{Error, Result, ResultExt};
pub use pipeline::{Route, RouteBuilder, SignalNode, StageEditor};
pub use types::{DataAttributes, Sample, Value};
