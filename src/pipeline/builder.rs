//! Fluent route construction
//!
//! A [`RouteBuilder`] is a cursor over one [`BuildContext`]. Every processing
//! operation validates the cursor's node against the board's capabilities,
//! builds a [`ProcessorConfig`], infers the stage's output and appends a
//! [`PendingStage`]. Nothing is sent to the board while building; the
//! finished [`PendingRoute`] is handed to the realizer.
//!
//! Branching uses an explicit stack:
//!
//! ```text
//! multicast() ─┬─ to() ... ─┐
//!              └─ to() ... ─┴─ end()
//! split() ─┬─ index(0) ... ─┐
//!          └─ index(2) ... ─┴─ end()
//! ```
//!
//! # Example
//!
//! ```ignore
//! let route = board.build_route("acceleration", |r| {
//!     r.multicast()?
//!         .to()?.rss()?.low_pass(4)?.stream()?
//!         .to()?.split()?.index(2)?.filter(ComparisonOp::Gt, &[0.5])?.log()?
//!         .end()
//! })?;
//! ```

use super::id::StageIndex;
use super::infer::{infer, math_output_size};
use super::node::SignalNode;
use super::processor::*;
use super::state::GraphState;
use crate::config::DeviceInfo;
use crate::error::{Error, Result};
use crate::protocol::MAX_NOTIFY_PAYLOAD;
use std::collections::HashMap;

/// Where the node under a cursor comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A root producer or a processor already on the board
    Existing,
    /// Output (or a component of the output) of a stage pending in this build
    Stage(StageIndex),
}

#[derive(Debug, Clone)]
pub struct Cursor {
    pub node: SignalNode,
    pub origin: Origin,
}

/// A producer referenced by name
#[derive(Debug, Clone)]
pub enum NamedRef {
    /// Processor already on the board
    Realized(u8),
    /// Stage declared earlier in this build
    Pending(StageIndex),
}

#[derive(Debug, Clone)]
pub struct PendingStage {
    pub source: Cursor,
    pub config: ProcessorConfig,
    pub output: SignalNode,
    pub state: Option<SignalNode>,
    pub name: Option<String>,
    /// Buffers read by a fuser, in config order
    pub fuse: Vec<NamedRef>,
}

/// Command programmed to run whenever a node emits
#[derive(Debug, Clone)]
pub struct Reaction {
    pub source: Cursor,
    /// `[module, register, payload...]` per command
    pub commands: Vec<Vec<u8>>,
}

/// A named producer's output written into a stage's live operand
#[derive(Debug, Clone)]
pub struct Feedback {
    pub producer: NamedRef,
    pub producer_node: SignalNode,
    pub destination: StageIndex,
    /// Offset of the operand within `[id, config...]`
    pub destination_offset: u8,
}

/// Recorded commands of a `react` block
#[derive(Debug, Default)]
pub struct Reactions {
    commands: Vec<Vec<u8>>,
}

impl Reactions {
    /// Record `[module, register, payload...]`
    pub fn command(&mut self, module: u8, register: u8, payload: &[u8]) -> &mut Self {
        let mut cmd = vec![module, register];
        cmd.extend_from_slice(payload);
        self.commands.push(cmd);
        self
    }
}

#[derive(Debug, Clone)]
struct NamedProducer {
    id: u8,
    output: SignalNode,
    state: Option<SignalNode>,
    is_buffer: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BranchKind {
    Multicast,
    Split,
}

#[derive(Debug, Clone)]
struct Branch {
    kind: BranchKind,
    anchor: Cursor,
}

/// Everything a route needs realized, in declaration order
#[derive(Debug, Clone, Default)]
pub struct PendingRoute {
    pub stages: Vec<PendingStage>,
    pub reactions: Vec<Reaction>,
    pub feedback: Vec<Feedback>,
    pub streams: Vec<Cursor>,
    pub logs: Vec<Cursor>,
}

/// Mutable state of one builder invocation
#[derive(Debug)]
pub struct BuildContext {
    device: DeviceInfo,
    existing: HashMap<String, NamedProducer>,
    names: HashMap<String, StageIndex>,
    branches: Vec<Branch>,
    route: PendingRoute,
}

impl BuildContext {
    /// Context resolving names against the processors already on the board
    pub fn new(state: &GraphState, device: DeviceInfo) -> Self {
        let existing = state
            .processors()
            .filter_map(|p| {
                let name = p.name.clone()?;
                Some((
                    name,
                    NamedProducer {
                        id: p.id,
                        output: p.output.clone(),
                        state: p.state.clone(),
                        is_buffer: matches!(p.config, ProcessorConfig::Buffer(_)),
                    },
                ))
            })
            .collect();
        Self {
            device,
            existing,
            names: HashMap::new(),
            branches: Vec::new(),
            route: PendingRoute::default(),
        }
    }

    /// Start a builder at `root`
    pub fn builder(&mut self, root: SignalNode) -> RouteBuilder<'_> {
        RouteBuilder {
            ctx: self,
            cursor: Cursor {
                node: root,
                origin: Origin::Existing,
            },
        }
    }

    pub fn finish(self) -> PendingRoute {
        self.route
    }

    fn lookup(&self, name: &str) -> Result<(NamedRef, SignalNode)> {
        if let Some(index) = self.names.get(name) {
            let stage = &self.route.stages[index.index()];
            return Ok((NamedRef::Pending(*index), stage.output.clone()));
        }
        if let Some(p) = self.existing.get(name) {
            return Ok((NamedRef::Realized(p.id), p.output.clone()));
        }
        Err(Error::illegal(format!("no producer named '{}'", name)))
    }

    /// State node of a named buffer
    fn lookup_buffer(&self, name: &str) -> Result<(NamedRef, SignalNode)> {
        if let Some(index) = self.names.get(name) {
            let stage = &self.route.stages[index.index()];
            return match (&stage.config, &stage.state) {
                (ProcessorConfig::Buffer(_), Some(state)) => {
                    Ok((NamedRef::Pending(*index), state.clone()))
                }
                _ => Err(Error::illegal(format!("'{}' is not a buffer", name))),
            };
        }
        match self.existing.get(name) {
            Some(NamedProducer {
                id,
                state: Some(state),
                is_buffer: true,
                ..
            }) => Ok((NamedRef::Realized(*id), state.clone())),
            Some(_) => Err(Error::illegal(format!("'{}' is not a buffer", name))),
            None => Err(Error::illegal(format!("no producer named '{}'", name))),
        }
    }
}

/// Cursor over a [`BuildContext`]
pub struct RouteBuilder<'c> {
    ctx: &'c mut BuildContext,
    cursor: Cursor,
}

impl<'c> RouteBuilder<'c> {
    /// Node under the cursor
    pub fn node(&self) -> &SignalNode {
        &self.cursor.node
    }

    fn attrs(&self) -> &crate::types::DataAttributes {
        &self.cursor.node.attributes
    }

    fn device(&self) -> &DeviceInfo {
        &self.ctx.device
    }

    fn require_data(&self, what: &str) -> Result<()> {
        if self.attrs().is_empty() {
            return Err(Error::illegal(format!(
                "cannot apply {} to a null-length signal",
                what
            )));
        }
        Ok(())
    }

    fn require_scalar(&self, what: &str) -> Result<u8> {
        self.require_data(what)?;
        let attrs = self.attrs();
        if attrs.channels() != 1 || attrs.length() > 4 {
            return Err(Error::illegal(format!(
                "{} needs a single channel of at most 4 bytes, got {:?}",
                what, attrs.sizes
            )));
        }
        Ok(attrs.length())
    }

    /// Operand in firmware units
    fn scaled(&self, value: f32) -> i32 {
        (value * self.cursor.node.scale()).round() as i32
    }

    fn push_stage(
        mut self,
        config: ProcessorConfig,
        fused: Vec<SignalNode>,
        fuse: Vec<NamedRef>,
    ) -> Result<Self> {
        let inferred = infer(&self.cursor.node, &config, &fused)?;
        let index = StageIndex(self.ctx.route.stages.len());
        tracing::trace!(
            "Stage {} {} -> {:?}",
            index.index(),
            config.name(),
            inferred.output.attributes
        );
        self.ctx.route.stages.push(PendingStage {
            source: self.cursor.clone(),
            config,
            output: inferred.output.clone(),
            state: inferred.state,
            name: None,
            fuse,
        });
        self.cursor = Cursor {
            node: inferred.output,
            origin: Origin::Stage(index),
        };
        Ok(self)
    }

    fn push(self, config: ProcessorConfig) -> Result<Self> {
        self.push_stage(config, Vec::new(), Vec::new())
    }

    /// Running average over `samples` samples
    pub fn average(self, samples: u8) -> Result<Self> {
        self.averaging(samples, false)
    }

    pub fn low_pass(self, samples: u8) -> Result<Self> {
        self.averaging(samples, false)
    }

    pub fn high_pass(self, samples: u8) -> Result<Self> {
        if !self.device().supports_high_pass() {
            return Err(Error::illegal(
                "high-pass filtering requires processor revision 2",
            ));
        }
        self.averaging(samples, true)
    }

    fn averaging(self, samples: u8, high_pass: bool) -> Result<Self> {
        self.require_data("an average")?;
        let attrs = self.attrs();
        let extended = self.device().supports_high_pass();
        let config = if extended {
            let size = attrs.sizes[0];
            if size > 4 || attrs.sizes.iter().any(|s| *s != size) || attrs.channels() > 8 {
                return Err(Error::illegal(format!(
                    "cannot average channels of sizes {:?}",
                    attrs.sizes
                )));
            }
            AverageConfig {
                size,
                samples,
                high_pass,
                channels: Some(attrs.channels() as u8),
            }
        } else {
            if attrs.length() > 4 {
                return Err(Error::illegal(
                    "averaging more than 4 bytes requires processor revision 2",
                ));
            }
            AverageConfig {
                size: attrs.length(),
                samples,
                high_pass: false,
                channels: None,
            }
        };
        self.push(ProcessorConfig::Average(config))
    }

    /// Running sum
    pub fn accumulate(self) -> Result<Self> {
        let size = self.require_scalar("accumulate")?;
        self.push(ProcessorConfig::Accumulator(AccumulatorConfig {
            counter: false,
            output: 4,
            input: size,
        }))
    }

    /// Count of emitted samples, always a 4-byte unsigned integer
    pub fn count(self) -> Result<Self> {
        let input = self.attrs().length().clamp(1, 4);
        self.push(ProcessorConfig::Accumulator(AccumulatorConfig {
            counter: true,
            output: 4,
            input,
        }))
    }

    /// Let through samples satisfying `op` against the references
    pub fn filter(self, op: ComparisonOp, references: &[f32]) -> Result<Self> {
        self.filter_mode(op, ComparisonMode::Absolute, references)
    }

    /// Comparison with an explicit output mode
    pub fn filter_mode(
        self,
        op: ComparisonOp,
        mode: ComparisonMode,
        references: &[f32],
    ) -> Result<Self> {
        let scaled: Vec<i64> = references.iter().map(|r| i64::from(self.scaled(*r))).collect();
        let config = self.comparison(op, mode, scaled)?;
        self.push(config)
    }

    /// Comparison whose references are fed from named producers
    pub fn filter_named(self, op: ComparisonOp, names: &[&str]) -> Result<Self> {
        if names.is_empty() {
            return Err(Error::illegal("filter needs at least one reference"));
        }
        let producers = names
            .iter()
            .map(|n| self.ctx.lookup(n))
            .collect::<Result<Vec<_>>>()?;
        let config = self.comparison(op, ComparisonMode::Absolute, vec![0; names.len()])?;
        let (base, width) = match &config {
            ProcessorConfig::MultiComparison(c) => (2u8, c.size),
            _ => (4u8, 4u8),
        };

        let builder = self.push(config)?;
        let Origin::Stage(destination) = builder.cursor.origin else {
            return Err(Error::illegal("comparison stage missing"));
        };
        for (i, (producer, producer_node)) in producers.into_iter().enumerate() {
            builder.ctx.route.feedback.push(Feedback {
                producer,
                producer_node,
                destination,
                destination_offset: 1 + base + i as u8 * width,
            });
        }
        Ok(builder)
    }

    fn comparison(
        &self,
        op: ComparisonOp,
        mode: ComparisonMode,
        references: Vec<i64>,
    ) -> Result<ProcessorConfig> {
        let size = self.require_scalar("a comparison")?;
        if references.is_empty() {
            return Err(Error::illegal("filter needs at least one reference"));
        }
        let signed = self.attrs().signed;
        if self.device().supports_multi_comparison() {
            return Ok(ProcessorConfig::MultiComparison(MultiComparisonConfig {
                signed,
                size,
                op,
                mode,
                references,
            }));
        }
        if references.len() > 1 || mode != ComparisonMode::Absolute {
            return Err(Error::illegal(
                "multi-reference and zone/binary comparisons require firmware 1.2.3",
            ));
        }
        Ok(ProcessorConfig::SingleComparison(SingleComparisonConfig {
            signed,
            op,
            reference: references[0],
        }))
    }

    /// Apply a math operation with a constant right-hand side
    pub fn map(self, op: MathOp, rhs: f32) -> Result<Self> {
        let (op, rhs) = match op {
            MathOp::Multiply if rhs != 0.0 && rhs.abs() < 1.0 => {
                (MathOp::Divide, (1.0 / rhs).round() as i32)
            }
            MathOp::Divide if rhs != 0.0 && rhs.abs() < 1.0 => {
                (MathOp::Multiply, (1.0 / rhs).round() as i32)
            }
            MathOp::Add | MathOp::Subtract | MathOp::Modulus | MathOp::Constant => {
                (op, self.scaled(rhs))
            }
            _ => (op, rhs.round() as i32),
        };
        let config = self.math(op, rhs)?;
        self.push(config)
    }

    /// Math operation whose right-hand side is fed from a named producer
    pub fn map_named(self, op: MathOp, name: &str) -> Result<Self> {
        let (producer, producer_node) = self.ctx.lookup(name)?;
        let config = self.math(op, 0)?;
        let offset = config.operand_offset().unwrap_or(3) as u8;
        let builder = self.push(config)?;
        let Origin::Stage(destination) = builder.cursor.origin else {
            return Err(Error::illegal("math stage missing"));
        };
        builder.ctx.route.feedback.push(Feedback {
            producer,
            producer_node,
            destination,
            destination_offset: 1 + offset,
        });
        Ok(builder)
    }

    fn math(&self, op: MathOp, rhs: i32) -> Result<ProcessorConfig> {
        if self.attrs().is_empty() {
            return Err(Error::illegal("cannot apply math to a null-length signal"));
        }
        let attrs = self.attrs();
        let channels = attrs.channels();
        let multi = self.device().supports_multi_channel_math();
        if channels > 1 && !multi {
            return Err(Error::illegal(
                "math on multi-channel signals requires processor revision 2",
            ));
        }
        let size = attrs.sizes[0];
        if size > 4 || attrs.sizes.iter().any(|s| *s != size) {
            return Err(Error::illegal(format!(
                "math needs channels of at most 4 bytes, got {:?}",
                attrs.sizes
            )));
        }
        Ok(ProcessorConfig::Math(MathConfig {
            output: math_output_size(op, size, rhs),
            input: size,
            signed: attrs.signed,
            op,
            rhs,
            channels: multi.then_some(channels as u8),
        }))
    }

    /// Root mean square of a multi-channel signal
    pub fn rms(self) -> Result<Self> {
        self.combine(CombinerMode::Rms)
    }

    /// Root sum square of a multi-channel signal
    pub fn rss(self) -> Result<Self> {
        self.combine(CombinerMode::Rss)
    }

    fn combine(self, mode: CombinerMode) -> Result<Self> {
        self.require_data("rms/rss")?;
        let attrs = self.attrs();
        if attrs.channels() < 2 {
            return Err(Error::illegal("rms/rss requires a multi-channel signal"));
        }
        let size = attrs.sizes[0];
        let config = CombinerConfig {
            output: size,
            input: size,
            channels: attrs.channels() as u8,
            signed: attrs.signed,
            mode,
        };
        self.push(ProcessorConfig::Combiner(config))
    }

    /// Hold samples back by `samples` positions
    pub fn delay(self, samples: u8) -> Result<Self> {
        self.require_data("a delay")?;
        let length = self.attrs().length();
        let expanded = self.device().supports_expanded_delay();
        let limit = if expanded { 16 } else { 4 };
        if length > limit {
            return Err(Error::illegal(format!(
                "cannot delay {} bytes, limit is {}",
                length, limit
            )));
        }
        self.push(ProcessorConfig::Delay(DelayConfig {
            size: length,
            samples,
            expanded,
        }))
    }

    /// Detect pulses above `threshold` lasting at least `width` samples
    pub fn find_pulse(self, mode: PulseMode, threshold: f32, width: u16) -> Result<Self> {
        let size = self.require_scalar("pulse detection")?;
        let threshold = self.scaled(threshold);
        self.push(ProcessorConfig::Pulse(PulseConfig {
            size,
            mode,
            threshold,
            width,
        }))
    }

    /// Detect crossings of `boundary`
    pub fn find_threshold(self, mode: ThresholdMode, boundary: f32, hysteresis: f32) -> Result<Self> {
        let size = self.require_scalar("threshold detection")?;
        let config = ThresholdConfig {
            size,
            signed: self.attrs().signed,
            mode,
            boundary: self.scaled(boundary),
            hysteresis: self.scaled(hysteresis).clamp(0, u16::MAX as i32) as u16,
        };
        self.push(ProcessorConfig::Threshold(config))
    }

    /// Detect changes of at least `distance` from the last reported value
    pub fn find_differential(self, mode: DifferentialMode, distance: f32) -> Result<Self> {
        self.require_data("differential detection")?;
        let size = self.attrs().length();
        if size > 4 {
            return Err(Error::illegal(format!(
                "differential detection needs at most 4 bytes, got {}",
                size
            )));
        }
        let config = DifferentialConfig {
            size,
            signed: self.attrs().signed,
            mode,
            distance: self.scaled(distance).max(0) as u32,
        };
        self.push(ProcessorConfig::Differential(config))
    }

    /// Pack `count` samples into one notification
    pub fn pack(self, count: u8) -> Result<Self> {
        self.require_data("packing")?;
        let unit = self.attrs().unit_length() as usize;
        if count == 0 || unit * count as usize > MAX_NOTIFY_PAYLOAD {
            return Err(Error::illegal(format!(
                "cannot pack {} samples of {} bytes",
                count, unit
            )));
        }
        let size = self.attrs().length();
        self.push(ProcessorConfig::Packer(PackerConfig { size, count }))
    }

    /// Prefix samples with a sample count or tick time
    pub fn account(self, mode: AccountMode) -> Result<Self> {
        self.require_data("an accounter")?;
        let length = self.attrs().length() as usize;
        if length + 4 > MAX_NOTIFY_PAYLOAD {
            return Err(Error::illegal(format!(
                "cannot account a {}-byte signal",
                length
            )));
        }
        self.push(ProcessorConfig::Accounter(AccounterConfig { mode, size: 4 }))
    }

    /// Keep the latest sample in the stage's state
    pub fn buffer(self) -> Result<Self> {
        self.require_data("a buffer")?;
        let size = self.attrs().length();
        if size > 16 {
            return Err(Error::illegal(format!("cannot buffer {} bytes", size)));
        }
        self.push(ProcessorConfig::Buffer(BufferConfig { size }))
    }

    /// Join the cursor's samples with the contents of named buffers
    pub fn fuse(self, names: &[&str]) -> Result<Self> {
        if !self.device().supports_fuser() {
            return Err(Error::illegal("fuse requires processor revision 3"));
        }
        self.require_data("fuse")?;
        if names.is_empty() {
            return Err(Error::illegal("fuse needs at least one buffer"));
        }
        let buffers = names
            .iter()
            .map(|n| self.ctx.lookup_buffer(n))
            .collect::<Result<Vec<_>>>()?;
        let total = self.attrs().length() as usize
            + buffers
                .iter()
                .map(|(_, s)| s.attributes.length() as usize)
                .sum::<usize>();
        if total > MAX_NOTIFY_PAYLOAD {
            return Err(Error::illegal(format!(
                "fused signal would be {} bytes",
                total
            )));
        }
        let ids = buffers
            .iter()
            .map(|(r, _)| match r {
                NamedRef::Realized(id) => *id,
                NamedRef::Pending(_) => crate::protocol::NO_ID,
            })
            .collect();
        let (refs, states): (Vec<_>, Vec<_>) = buffers.into_iter().unzip();
        self.push_stage(ProcessorConfig::Fuser(FuserConfig { ids }), states, refs)
    }

    /// Let samples through per `mode`: all, while `value` is non-zero, or
    /// the next `value` samples
    pub fn limit(self, mode: PassthroughMode, value: u16) -> Result<Self> {
        self.push(ProcessorConfig::Passthrough(PassthroughConfig { mode, value }))
    }

    /// At most one sample every `period_ms` milliseconds
    pub fn limit_period(self, period_ms: u32) -> Result<Self> {
        self.require_data("a time limiter")?;
        let size = self.attrs().length();
        if size > 8 {
            return Err(Error::illegal(format!("cannot time-limit {} bytes", size)));
        }
        self.push(ProcessorConfig::Time(TimeConfig {
            size,
            mode: TimeMode::Absolute,
            period: period_ms,
        }))
    }

    /// Name the stage under the cursor
    pub fn name(self, name: &str) -> Result<Self> {
        let Origin::Stage(index) = self.cursor.origin else {
            return Err(Error::illegal(format!(
                "'{}' can only name a processing stage",
                name
            )));
        };
        if self.ctx.names.contains_key(name) || self.ctx.existing.contains_key(name) {
            return Err(Error::illegal(format!("name '{}' is already in use", name)));
        }
        let stage = &mut self.ctx.route.stages[index.index()];
        if let Some(previous) = &stage.name {
            return Err(Error::illegal(format!(
                "stage is already named '{}'",
                previous
            )));
        }
        stage.name = Some(name.to_string());
        self.ctx.names.insert(name.to_string(), index);
        Ok(self)
    }

    /// Program board commands to run on every sample
    pub fn react<F>(self, f: F) -> Result<Self>
    where
        F: FnOnce(&mut Reactions),
    {
        let mut reactions = Reactions::default();
        f(&mut reactions);
        if reactions.commands.is_empty() {
            return Err(Error::illegal("react block recorded no commands"));
        }
        self.ctx.route.reactions.push(Reaction {
            source: self.cursor.clone(),
            commands: reactions.commands,
        });
        Ok(self)
    }

    /// Subscribe to live notifications of the cursor's node
    pub fn stream(self) -> Result<Self> {
        self.ctx.route.streams.push(self.cursor.clone());
        Ok(self)
    }

    /// Record the cursor's node to on-board flash
    pub fn log(self) -> Result<Self> {
        if self.attrs().is_empty() {
            return Err(Error::illegal("cannot log a null-length signal"));
        }
        self.ctx.route.logs.push(self.cursor.clone());
        Ok(self)
    }

    /// Open a fan-out; each branch starts with [`to`](Self::to)
    pub fn multicast(self) -> Result<Self> {
        self.ctx.branches.push(Branch {
            kind: BranchKind::Multicast,
            anchor: self.cursor.clone(),
        });
        Ok(self)
    }

    /// Start a branch at the innermost multicast's source
    pub fn to(mut self) -> Result<Self> {
        match self.ctx.branches.last() {
            Some(Branch {
                kind: BranchKind::Multicast,
                anchor,
            }) => {
                self.cursor = anchor.clone();
                Ok(self)
            }
            _ => Err(Error::illegal("to() without a matching multicast()")),
        }
    }

    /// Open a split into the cursor node's components
    pub fn split(self) -> Result<Self> {
        if self.cursor.node.components.is_empty() {
            return Err(Error::illegal(
                "cannot split a signal without components",
            ));
        }
        self.ctx.branches.push(Branch {
            kind: BranchKind::Split,
            anchor: self.cursor.clone(),
        });
        Ok(self)
    }

    /// Continue with component `i` of the innermost split
    pub fn index(mut self, i: usize) -> Result<Self> {
        let Some(Branch {
            kind: BranchKind::Split,
            anchor,
        }) = self.ctx.branches.last()
        else {
            return Err(Error::illegal("index() without a matching split()"));
        };
        let Some(component) = anchor.node.components.get(i) else {
            return Err(Error::illegal(format!(
                "index {} out of range, signal has {} components",
                i,
                anchor.node.components.len()
            )));
        };
        self.cursor = Cursor {
            node: component.clone(),
            origin: anchor.origin,
        };
        Ok(self)
    }

    /// Close the innermost multicast or split
    pub fn end(mut self) -> Result<Self> {
        let Some(branch) = self.ctx.branches.pop() else {
            return Err(Error::illegal("end() without an open multicast or split"));
        };
        self.cursor = branch.anchor;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ProducerCatalog;
    use crate::protocol::FirmwareVersion;

    fn context(device: DeviceInfo) -> BuildContext {
        BuildContext::new(&GraphState::new(), device)
    }

    fn root(name: &str) -> SignalNode {
        ProducerCatalog::standard().get(name).cloned().unwrap()
    }

    fn assert_illegal<T>(result: Result<T>) {
        match result {
            Err(Error::IllegalRouteOperation(_)) => {}
            Err(other) => panic!("expected IllegalRouteOperation, got {:?}", other),
            Ok(_) => panic!("expected IllegalRouteOperation, got Ok"),
        }
    }

    #[test]
    fn test_low_pass_on_signed_word() {
        let device = DeviceInfo::new(FirmwareVersion::new(1, 3, 0), 1, 2);
        let mut ctx = context(device);
        let builder = ctx.builder(root("temperature")).low_pass(4).unwrap();
        assert_eq!(builder.node().attributes.length(), 2);
        assert!(builder.node().attributes.signed);

        let route = ctx.finish();
        assert_eq!(route.stages[0].config.encode(), vec![0x03, 0x05, 0x04]);
    }

    #[test]
    fn test_counter_output() {
        let mut ctx = context(DeviceInfo::default());
        let builder = ctx.builder(root("switch")).count().unwrap();
        assert_eq!(builder.node().attributes.sizes, vec![4]);
        assert!(!builder.node().attributes.signed);
    }

    #[test]
    fn test_math_on_buffer_output_rejected() {
        let mut ctx = context(DeviceInfo::default());
        let result = ctx
            .builder(root("temperature"))
            .buffer()
            .and_then(|b| b.map(MathOp::Add, 1.0));
        assert_illegal(result);
        assert_eq!(ctx.finish().stages.len(), 1);
    }

    #[test]
    fn test_branch_stack_errors() {
        let mut ctx = context(DeviceInfo::default());
        assert_illegal(ctx.builder(root("acceleration")).to());
        assert_illegal(ctx.builder(root("acceleration")).index(0));
        assert_illegal(ctx.builder(root("switch")).split());
        assert_illegal(ctx.builder(root("switch")).end());
        assert_illegal(
            ctx.builder(root("acceleration"))
                .split()
                .and_then(|b| b.index(3)),
        );
    }

    #[test]
    fn test_split_index_targets_component() {
        let mut ctx = context(DeviceInfo::default());
        ctx.builder(root("acceleration"))
            .split()
            .and_then(|b| b.index(2))
            .and_then(|b| b.filter(ComparisonOp::Gt, &[0.5]))
            .unwrap();
        let route = ctx.finish();
        let stage = &route.stages[0];
        assert_eq!(stage.source.node.attributes.offset, 4);
        match &stage.config {
            ProcessorConfig::MultiComparison(c) => {
                assert_eq!(c.size, 2);
                assert_eq!(c.references, vec![8192]);
            }
            other => panic!("unexpected config {:?}", other),
        }
    }

    #[test]
    fn test_multicast_branches_share_source() {
        let mut ctx = context(DeviceInfo::default());
        ctx.builder(root("acceleration"))
            .multicast()
            .and_then(|b| b.to())
            .and_then(|b| b.rss())
            .and_then(|b| b.stream())
            .and_then(|b| b.to())
            .and_then(|b| b.low_pass(8))
            .and_then(|b| b.log())
            .and_then(|b| b.end())
            .unwrap();
        let route = ctx.finish();
        assert_eq!(route.stages.len(), 2);
        assert_eq!(route.stages[0].source.origin, Origin::Existing);
        assert_eq!(route.stages[1].source.origin, Origin::Existing);
        assert_eq!(route.streams.len(), 1);
        assert_eq!(route.logs.len(), 1);
    }

    #[test]
    fn test_capability_gates() {
        let legacy = DeviceInfo::legacy();
        let mut ctx = context(legacy);
        assert_illegal(ctx.builder(root("temperature")).high_pass(4));
        assert_illegal(ctx.builder(root("acceleration")).map(MathOp::Add, 1.0));
        assert_illegal(ctx.builder(root("acceleration")).delay(2));
        assert_illegal(
            ctx.builder(root("temperature"))
                .filter(ComparisonOp::Gt, &[1.0, 2.0]),
        );
        assert_illegal(
            ctx.builder(root("temperature"))
                .buffer()
                .and_then(|b| b.name("b"))
                .and_then(|b| b.fuse(&["b"])),
        );

        let mut ctx = context(DeviceInfo::default());
        assert_illegal(ctx.builder(root("acceleration")).pack(3));
        assert!(ctx.builder(root("acceleration")).pack(2).is_ok());
        assert_illegal(ctx.builder(root("acceleration")).find_differential(
            DifferentialMode::Absolute,
            1.0,
        ));
    }

    #[test]
    fn test_multiply_by_fraction_becomes_divide() {
        let mut ctx = context(DeviceInfo::default());
        ctx.builder(root("temperature")).map(MathOp::Multiply, 0.25).unwrap();
        match &ctx.finish().stages[0].config {
            ProcessorConfig::Math(c) => {
                assert_eq!(c.op, MathOp::Divide);
                assert_eq!(c.rhs, 4);
                assert_eq!(c.output, 2);
            }
            other => panic!("unexpected config {:?}", other),
        }
    }

    #[test]
    fn test_zero_operand_sizes() {
        let mut ctx = context(DeviceInfo::default());
        ctx.builder(root("temperature")).map(MathOp::Multiply, 0.0).unwrap();
        ctx.builder(root("temperature")).map(MathOp::Divide, 0.0).unwrap();
        let stages = ctx.finish().stages;
        let outputs: Vec<_> = stages
            .iter()
            .map(|stage| match &stage.config {
                ProcessorConfig::Math(c) => (c.op, c.output),
                other => panic!("unexpected config {:?}", other),
            })
            .collect();
        assert_eq!(outputs, vec![(MathOp::Multiply, 2), (MathOp::Divide, 4)]);
    }

    #[test]
    fn test_add_operand_is_scaled() {
        let mut ctx = context(DeviceInfo::default());
        ctx.builder(root("temperature")).map(MathOp::Add, 1.5).unwrap();
        match &ctx.finish().stages[0].config {
            ProcessorConfig::Math(c) => assert_eq!(c.rhs, 12),
            other => panic!("unexpected config {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut ctx = context(DeviceInfo::default());
        let result = ctx
            .builder(root("temperature"))
            .low_pass(2)
            .and_then(|b| b.name("smooth"))
            .and_then(|b| b.delay(1))
            .and_then(|b| b.name("smooth"));
        assert_illegal(result);
        assert_illegal(ctx.builder(root("switch")).name("raw"));
    }

    #[test]
    fn test_feedback_offsets() {
        let mut ctx = context(DeviceInfo::default());
        ctx.builder(root("temperature"))
            .accumulate()
            .and_then(|b| b.name("sum"))
            .unwrap();
        ctx.builder(root("temperature"))
            .map_named(MathOp::Subtract, "sum")
            .unwrap();
        let route = ctx.finish();
        assert_eq!(route.feedback.len(), 1);
        let feedback = &route.feedback[0];
        assert_eq!(feedback.destination, StageIndex(1));
        assert_eq!(feedback.destination_offset, 4);
        assert!(matches!(feedback.producer, NamedRef::Pending(StageIndex(0))));
    }

    #[test]
    fn test_fuse_pending_buffer() {
        let mut ctx = context(DeviceInfo::default());
        ctx.builder(root("temperature"))
            .buffer()
            .and_then(|b| b.name("temp"))
            .unwrap();
        let builder = ctx.builder(root("acceleration")).fuse(&["temp"]).unwrap();
        assert_eq!(builder.node().attributes.length(), 8);
        assert_eq!(ctx.finish().stages[1].fuse.len(), 1);
    }

    #[test]
    fn test_react_records_commands() {
        let mut ctx = context(DeviceInfo::default());
        ctx.builder(root("switch"))
            .react(|r| {
                r.command(0x02, 0x03, &[0x01, 0x02]);
            })
            .unwrap();
        let route = ctx.finish();
        assert_eq!(route.reactions[0].commands, vec![vec![0x02, 0x03, 0x01, 0x02]]);
    }
}
