//! Live reconfiguration of realized processors
//!
//! An [`Editor`] borrows the stored entry of one processor and writes changes
//! straight to the board through the shared command sink:
//!
//! - config changes: `[PROCESSOR, PARAMETER, id, config...]`
//! - state changes: `[PROCESSOR, STATE, id, bytes...]`
//!
//! Every edit builds a new config with the pure `with_*` constructors of the
//! config type and re-encodes it, so an editor never sends a partial config.
//! The stored config is replaced only once the write went out.

use super::node::SignalNode;
use super::processor::*;
use super::state::ProcessorEntry;
use crate::backend::{write_command, SharedSink};
use crate::error::{Error, Result};
use crate::protocol::{module, processor};

/// Editor for a processor configured with `C`
pub struct Editor<'a, C> {
    id: u8,
    config: C,
    stored: &'a mut ProcessorConfig,
    node: SignalNode,
    sink: SharedSink,
}

impl<C> std::fmt::Debug for Editor<'_, C>
where
    C: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Editor")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish()
    }
}

impl<C: Clone> Editor<'_, C> {
    /// Processor id on the board
    pub fn id(&self) -> u8 {
        self.id
    }

    /// Config as last written
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Scale of the node feeding the processor
    fn input_scale(&self) -> f32 {
        self.node.input.as_ref().map(|i| i.scale()).unwrap_or(1.0)
    }

    fn scaled(&self, value: f32) -> i32 {
        (value * self.input_scale()).round() as i32
    }

    fn write_config(&mut self, config: C, wrap: fn(C) -> ProcessorConfig) -> Result<()> {
        let encoded = wrap(config.clone());
        let mut command = vec![module::DATA_PROCESSOR, processor::PARAMETER, self.id];
        command.extend(encoded.encode());
        write_command(&self.sink, &command)?;
        *self.stored = encoded;
        self.config = config;
        Ok(())
    }

    fn write_state(&self, bytes: &[u8]) -> Result<()> {
        let mut command = vec![module::DATA_PROCESSOR, processor::STATE, self.id];
        command.extend_from_slice(bytes);
        write_command(&self.sink, &command)
    }
}

impl Editor<'_, AccumulatorConfig> {
    /// Zero the running sum or count
    pub fn reset(&self) -> Result<()> {
        self.write_state(&vec![0; self.config.output as usize])
    }

    /// Overwrite the running sum or count
    pub fn set(&self, value: f32) -> Result<()> {
        let raw = (value * self.node.scale()).round() as i64;
        self.write_state(&raw.to_le_bytes()[..self.config.output as usize])
    }
}

impl Editor<'_, AverageConfig> {
    pub fn modify(&mut self, samples: u8) -> Result<()> {
        let config = self.config.clone().with_samples(samples);
        self.write_config(config, ProcessorConfig::Average)
    }

    /// Drop the samples collected so far
    pub fn reset(&self) -> Result<()> {
        self.write_state(&[])
    }
}

impl Editor<'_, SingleComparisonConfig> {
    pub fn modify(&mut self, op: ComparisonOp, references: &[f32]) -> Result<()> {
        let [reference] = references else {
            return Err(Error::illegal(
                "this firmware compares against exactly one reference",
            ));
        };
        let config = self
            .config
            .clone()
            .with_reference(op, i64::from(self.scaled(*reference)));
        self.write_config(config, ProcessorConfig::SingleComparison)
    }
}

impl Editor<'_, MultiComparisonConfig> {
    pub fn modify(&mut self, op: ComparisonOp, references: &[f32]) -> Result<()> {
        if references.is_empty() {
            return Err(Error::illegal("a comparison needs at least one reference"));
        }
        let scaled = references
            .iter()
            .map(|r| i64::from(self.scaled(*r)))
            .collect();
        let config = self.config.with_references(op, scaled);
        self.write_config(config, ProcessorConfig::MultiComparison)
    }
}

impl Editor<'_, MathConfig> {
    /// Replace the right-hand operand
    pub fn modify_rhs(&mut self, rhs: f32) -> Result<()> {
        let rhs = match self.config.op {
            MathOp::Add | MathOp::Subtract | MathOp::Modulus | MathOp::Constant => {
                self.scaled(rhs)
            }
            _ => rhs.round() as i32,
        };
        let config = self.config.clone().with_rhs(rhs);
        self.write_config(config, ProcessorConfig::Math)
    }
}

impl Editor<'_, DelayConfig> {
    pub fn modify(&mut self, samples: u8) -> Result<()> {
        let config = self.config.clone().with_samples(samples);
        self.write_config(config, ProcessorConfig::Delay)
    }
}

impl Editor<'_, TimeConfig> {
    pub fn modify(&mut self, period_ms: u32) -> Result<()> {
        let config = self.config.clone().with_period(period_ms);
        self.write_config(config, ProcessorConfig::Time)
    }
}

impl Editor<'_, PassthroughConfig> {
    pub fn modify(&mut self, mode: PassthroughMode, value: u16) -> Result<()> {
        let config = self.config.clone().with_value(mode, value);
        self.write_config(config, ProcessorConfig::Passthrough)
    }

    /// Overwrite the pass counter or condition
    pub fn set(&self, value: u16) -> Result<()> {
        self.write_state(&value.to_le_bytes())
    }
}

impl Editor<'_, PulseConfig> {
    pub fn modify(&mut self, threshold: f32, width: u16) -> Result<()> {
        let config = self
            .config
            .clone()
            .with_threshold(self.scaled(threshold), width);
        self.write_config(config, ProcessorConfig::Pulse)
    }
}

impl Editor<'_, ThresholdConfig> {
    pub fn modify(&mut self, boundary: f32, hysteresis: f32) -> Result<()> {
        let hysteresis = self.scaled(hysteresis).clamp(0, u16::MAX as i32) as u16;
        let config = self
            .config
            .clone()
            .with_boundary(self.scaled(boundary), hysteresis);
        self.write_config(config, ProcessorConfig::Threshold)
    }
}

impl Editor<'_, DifferentialConfig> {
    pub fn modify(&mut self, distance: f32) -> Result<()> {
        let config = self
            .config
            .clone()
            .with_distance(self.scaled(distance).max(0) as u32);
        self.write_config(config, ProcessorConfig::Differential)
    }
}

impl Editor<'_, PackerConfig> {
    /// Discard partially packed samples
    pub fn clear(&self) -> Result<()> {
        self.write_state(&[])
    }
}

/// Editor of any reconfigurable processor
#[derive(Debug)]
pub enum StageEditor<'a> {
    Accumulator(Editor<'a, AccumulatorConfig>),
    Average(Editor<'a, AverageConfig>),
    SingleComparison(Editor<'a, SingleComparisonConfig>),
    MultiComparison(Editor<'a, MultiComparisonConfig>),
    Math(Editor<'a, MathConfig>),
    Delay(Editor<'a, DelayConfig>),
    Time(Editor<'a, TimeConfig>),
    Passthrough(Editor<'a, PassthroughConfig>),
    Pulse(Editor<'a, PulseConfig>),
    Threshold(Editor<'a, ThresholdConfig>),
    Differential(Editor<'a, DifferentialConfig>),
    Packer(Editor<'a, PackerConfig>),
}

impl<'a> StageEditor<'a> {
    /// Editor for a processor entry, if its kind can be edited
    pub fn for_entry(entry: &'a mut ProcessorEntry, sink: SharedSink) -> Result<Self> {
        let id = entry.id;
        let node = entry.output.clone();
        let config = entry.config.clone();
        let stored = &mut entry.config;
        macro_rules! editor {
            ($variant:ident, $config:expr) => {
                StageEditor::$variant(Editor {
                    id,
                    config: $config,
                    stored,
                    node,
                    sink,
                })
            };
        }
        let editor = match config {
            ProcessorConfig::Accumulator(c) => editor!(Accumulator, c),
            ProcessorConfig::Average(c) => editor!(Average, c),
            ProcessorConfig::SingleComparison(c) => editor!(SingleComparison, c),
            ProcessorConfig::MultiComparison(c) => editor!(MultiComparison, c),
            ProcessorConfig::Math(c) => editor!(Math, c),
            ProcessorConfig::Delay(c) => editor!(Delay, c),
            ProcessorConfig::Time(c) => editor!(Time, c),
            ProcessorConfig::Passthrough(c) => editor!(Passthrough, c),
            ProcessorConfig::Pulse(c) => editor!(Pulse, c),
            ProcessorConfig::Threshold(c) => editor!(Threshold, c),
            ProcessorConfig::Differential(c) => editor!(Differential, c),
            ProcessorConfig::Packer(c) => editor!(Packer, c),
            other => {
                return Err(Error::illegal(format!(
                    "{} processor {} has no editor",
                    other.name(),
                    id
                )))
            }
        };
        Ok(editor)
    }

    pub fn id(&self) -> u8 {
        match self {
            StageEditor::Accumulator(e) => e.id(),
            StageEditor::Average(e) => e.id(),
            StageEditor::SingleComparison(e) => e.id(),
            StageEditor::MultiComparison(e) => e.id(),
            StageEditor::Math(e) => e.id(),
            StageEditor::Delay(e) => e.id(),
            StageEditor::Time(e) => e.id(),
            StageEditor::Passthrough(e) => e.id(),
            StageEditor::Pulse(e) => e.id(),
            StageEditor::Threshold(e) => e.id(),
            StageEditor::Differential(e) => e.id(),
            StageEditor::Packer(e) => e.id(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{shared_sink, MockCommandSink};
    use crate::catalog::ProducerCatalog;
    use crate::pipeline::id::RouteId;
    use crate::pipeline::infer::infer;

    fn entry(root: &str, config: ProcessorConfig) -> ProcessorEntry {
        let input = ProducerCatalog::standard().get(root).cloned().unwrap();
        let output = infer(&input, &config, &[]).unwrap().output.with_id(5);
        ProcessorEntry {
            id: 5,
            source: input.address,
            config,
            output,
            state: None,
            name: Some("edited".into()),
            route: RouteId(0),
        }
    }

    fn expecting(commands: Vec<Vec<u8>>) -> SharedSink {
        let mut sink = MockCommandSink::new();
        let mut seq = mockall::Sequence::new();
        for expected in commands {
            sink.expect_send()
                .times(1)
                .in_sequence(&mut seq)
                .withf(move |command: &[u8]| command == expected.as_slice())
                .returning(|_| Ok(()));
        }
        shared_sink(sink)
    }

    #[test]
    fn test_counter_reset_and_set() {
        let config = ProcessorConfig::Accumulator(AccumulatorConfig {
            counter: true,
            output: 4,
            input: 1,
        });
        let sink = expecting(vec![
            vec![0x09, 0x04, 0x05, 0, 0, 0, 0],
            vec![0x09, 0x04, 0x05, 10, 0, 0, 0],
        ]);
        let mut entry = entry("switch", config);
        let StageEditor::Accumulator(editor) = StageEditor::for_entry(&mut entry, sink).unwrap()
        else {
            panic!("expected an accumulator editor");
        };
        editor.reset().unwrap();
        editor.set(10.0).unwrap();
    }

    #[test]
    fn test_comparator_modify_scales_references() {
        let config = ProcessorConfig::MultiComparison(MultiComparisonConfig {
            signed: true,
            size: 2,
            op: ComparisonOp::Gt,
            mode: ComparisonMode::Absolute,
            references: vec![0],
        });
        let expected = ProcessorConfig::MultiComparison(MultiComparisonConfig {
            signed: true,
            size: 2,
            op: ComparisonOp::Lt,
            mode: ComparisonMode::Absolute,
            references: vec![200, 240],
        });
        let mut command = vec![0x09, 0x05, 0x05];
        command.extend(expected.encode());

        let mut entry = entry("temperature", config);
        let StageEditor::MultiComparison(mut editor) =
            StageEditor::for_entry(&mut entry, expecting(vec![command])).unwrap()
        else {
            panic!("expected a comparison editor");
        };
        editor.modify(ComparisonOp::Lt, &[25.0, 30.0]).unwrap();
        assert_eq!(editor.config().references, vec![200, 240]);
        assert_eq!(entry.config, expected);
    }

    #[test]
    fn test_single_comparison_rejects_many_references() {
        let config = ProcessorConfig::SingleComparison(SingleComparisonConfig {
            signed: false,
            op: ComparisonOp::Eq,
            reference: 1,
        });
        let sink = shared_sink(MockCommandSink::new());
        let mut entry = entry("switch", config.clone());
        let StageEditor::SingleComparison(mut editor) =
            StageEditor::for_entry(&mut entry, sink).unwrap()
        else {
            panic!("expected a comparison editor");
        };
        assert!(editor.modify(ComparisonOp::Eq, &[1.0, 2.0]).is_err());
        assert_eq!(editor.config().reference, 1);
        assert_eq!(entry.config, config);
    }

    #[test]
    fn test_math_modify_rhs() {
        let config = ProcessorConfig::Math(MathConfig {
            output: 4,
            input: 2,
            signed: true,
            op: MathOp::Add,
            rhs: 0,
            channels: Some(1),
        });
        let expected = ProcessorConfig::Math(MathConfig {
            output: 4,
            input: 2,
            signed: true,
            op: MathOp::Add,
            rhs: 16,
            channels: Some(1),
        });
        let mut command = vec![0x09, 0x05, 0x05];
        command.extend(expected.encode());

        let mut entry = entry("temperature", config);
        let StageEditor::Math(mut editor) =
            StageEditor::for_entry(&mut entry, expecting(vec![command])).unwrap()
        else {
            panic!("expected a math editor");
        };
        editor.modify_rhs(2.0).unwrap();
        assert_eq!(editor.config().rhs, 16);
        assert_eq!(entry.config, expected);
    }

    #[test]
    fn test_failed_write_keeps_stored_config() {
        let config = ProcessorConfig::Delay(DelayConfig {
            size: 2,
            samples: 4,
            expanded: true,
        });
        let mut sink = MockCommandSink::new();
        sink.expect_send()
            .times(1)
            .returning(|_| Err(Error::Transport("link down".into())));
        let mut entry = entry("temperature", config.clone());
        let StageEditor::Delay(mut editor) =
            StageEditor::for_entry(&mut entry, shared_sink(sink)).unwrap()
        else {
            panic!("expected a delay editor");
        };
        assert!(matches!(editor.modify(8), Err(Error::Transport(_))));
        assert_eq!(editor.config().samples, 4);
        assert_eq!(entry.config, config);
    }

    #[test]
    fn test_packer_clear_and_failed_write() {
        let config = ProcessorConfig::Packer(PackerConfig { size: 2, count: 4 });
        let mut sink = MockCommandSink::new();
        sink.expect_send()
            .times(1)
            .withf(|command: &[u8]| command == [0x09, 0x04, 0x05])
            .returning(|_| Err(Error::Transport("link down".into())));
        let mut entry = entry("temperature", config);
        let StageEditor::Packer(editor) =
            StageEditor::for_entry(&mut entry, shared_sink(sink)).unwrap()
        else {
            panic!("expected a packer editor");
        };
        assert!(matches!(editor.clear(), Err(Error::Transport(_))));
    }

    #[test]
    fn test_buffer_has_no_editor() {
        let config = ProcessorConfig::Buffer(BufferConfig { size: 2 });
        let sink = shared_sink(MockCommandSink::new());
        let mut entry = entry("temperature", config);
        let result = StageEditor::for_entry(&mut entry, sink);
        assert!(matches!(result, Err(Error::IllegalRouteOperation(_))));
    }
}
