//! On-board processing graphs.
//!
//! A route is a chain (or tree) of data processors running on the sensor
//! board, fed by a sensor output and ending in live streams, log triggers or
//! programmed reactions. Routes are described host-side with a fluent
//! builder and then realized, one create command at a time.
//!
//! # Architecture
//!
//! ```text
//! RouteBuilder ──► PendingRoute ──► realize() ──► Route
//!      │                                │            │
//!      └── infer() per stage            │            └── Subscription (stream/log)
//!                                       └──► GraphState (processors, loggers, streams)
//! ```
//!
//! # Design
//!
//! - **Values, not handles**: a [`SignalNode`] carries its own shape, kind and
//!   upstream chain, so decoding and identifiers need no registry lookups.
//! - **Nothing sent while building**: validation, capability gates and type
//!   inference all run before the first command.
//! - **All or nothing**: a failed realization removes what it created.
//! - **Explicit state**: the board-wide registries live in [`GraphState`],
//!   passed by reference into builder and realizer.

pub mod builder;
pub mod editor;
pub mod id;
pub mod infer;
pub mod node;
pub mod processor;
pub mod realizer;
pub mod route;
pub mod state;

pub use builder::{BuildContext, PendingRoute, Reactions, RouteBuilder};
pub use editor::{Editor, StageEditor};
pub use id::{RouteId, StageIndex};
pub use infer::{infer, Inferred};
pub use node::{SignalKind, SignalNode};
pub use processor::{
    AccountMode, ComparisonMode, ComparisonOp, DifferentialMode, MathOp, PassthroughMode,
    ProcessorConfig, PulseMode, ThresholdMode,
};
pub use route::{Route, Subscription};
pub use state::GraphState;
