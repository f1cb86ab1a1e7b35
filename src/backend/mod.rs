//! Backend module: the link between the engine and the transport
//!
//! The transport itself lives outside the crate. It writes commands through a
//! [`CommandSink`] and pushes incoming notifications into a crossbeam channel
//! as [`LinkEvent`]s. [`DeviceLink`] turns that pair into sequential,
//! time-bounded request/response round-trips.
//!
//! # Components
//!
//! - [`CommandSink`] - Ordered command writer implemented by the transport
//! - [`DeviceLink`] - Single-outstanding request handling with a reply backlog
//! - [`MockDevice`] - In-memory board used by tests and benches
//!
//! # Example
//!
//! ```ignore
//! use sensorgraph::backend::{link_channel, MockDevice};
//! use sensorgraph::config::DeviceInfo;
//!
//! let (tx, rx) = link_channel(4096);
//! let (device, handle) = MockDevice::new(tx, DeviceInfo::default());
//! // hand `device` to the engine as its command sink, `rx` as its event source
//! ```

pub mod link;
pub mod mock_device;
pub mod transport;

pub use link::{DeviceLink, PendingSlot, ReplyKey};
pub use mock_device::{MockDevice, MockHandle, MockLogEntry};
pub use transport::{link_channel, shared_sink, write_command, CommandSink, LinkEvent, SharedSink};

#[cfg(test)]
pub use transport::MockCommandSink;
