//! Type inference for processor outputs
//!
//! Given the node feeding a processor and the processor's config, [`infer`]
//! derives the processor's notify output and, for stateful processors, its
//! state node. Inference reads only the config and the input, so the same
//! function serves the route builder and the reconstruction of routes read
//! back from the board.

use super::node::{SignalKind, SignalNode};
use super::processor::*;
use crate::error::{Error, Result};
use crate::protocol::processor::{NOTIFY, STATE};
use crate::types::DataAttributes;

/// Output and optional state node of a processor
#[derive(Debug, Clone, PartialEq)]
pub struct Inferred {
    pub output: SignalNode,
    pub state: Option<SignalNode>,
}

/// Output width of a math stage on `input_size`-byte channels
///
/// A zero operand shrinks a multiply back to the input width and widens a
/// divide to four bytes.
pub fn math_output_size(op: MathOp, input_size: u8, rhs: i32) -> u8 {
    match op {
        MathOp::Multiply if rhs == 0 => input_size,
        MathOp::Divide if rhs == 0 => 4,
        MathOp::Add | MathOp::Multiply | MathOp::Exponent | MathOp::Constant => 4,
        MathOp::LeftShift => (input_size as i32 + rhs / 8).clamp(1, 4) as u8,
        MathOp::RightShift => (input_size as i32 - rhs / 8).clamp(1, 4) as u8,
        MathOp::Divide
        | MathOp::Modulus
        | MathOp::Sqrt
        | MathOp::Subtract
        | MathOp::AbsValue => input_size,
    }
}

/// Signedness of a math stage's output
pub fn math_output_signed(op: MathOp, input_signed: bool, rhs: i32) -> bool {
    match op {
        MathOp::Subtract => true,
        MathOp::AbsValue | MathOp::Sqrt => false,
        MathOp::Constant => rhs < 0,
        _ => input_signed || rhs < 0,
    }
}

fn scalar_kind(input: &SignalNode) -> SignalKind {
    match input.kind {
        SignalKind::Vector { scale } | SignalKind::Float { scale } => SignalKind::Float { scale },
        _ => SignalKind::Integer,
    }
}

/// Infer the outputs of `config` applied to `input`
///
/// `fused` holds the state nodes of the buffers a fuser reads, in config
/// order; it is ignored for every other kind.
pub fn infer(input: &SignalNode, config: &ProcessorConfig, fused: &[SignalNode]) -> Result<Inferred> {
    let attrs = &input.attributes;
    let same = |kind: SignalKind| -> SignalNode {
        SignalNode::processed(input, config, NOTIFY, attrs.derive_same_shape(), kind)
    };
    let output_with = |a: DataAttributes, kind: SignalKind| -> SignalNode {
        SignalNode::processed(input, config, NOTIFY, a, kind)
    };
    let small = |signed: bool| -> SignalNode {
        output_with(DataAttributes::scalar(1, signed), SignalKind::Integer)
    };

    let inferred = match config {
        ProcessorConfig::Passthrough(_) => Inferred {
            output: same(input.kind.clone()),
            state: Some(SignalNode::processed(
                input,
                config,
                STATE,
                DataAttributes::scalar(2, false),
                SignalKind::Integer,
            )),
        },
        ProcessorConfig::Accumulator(c) => {
            let (signed, kind) = if c.counter {
                (false, SignalKind::Integer)
            } else {
                (attrs.signed, input.kind.clone())
            };
            let shape = DataAttributes::new(vec![c.output], 1, 0, signed);
            Inferred {
                output: output_with(shape.clone(), kind.clone()),
                state: Some(SignalNode::processed(input, config, STATE, shape, kind)),
            }
        }
        ProcessorConfig::Average(_) | ProcessorConfig::Delay(_) | ProcessorConfig::Time(_) => {
            Inferred {
                output: same(input.kind.clone()),
                state: None,
            }
        }
        ProcessorConfig::SingleComparison(_) => Inferred {
            output: same(input.kind.clone()),
            state: None,
        },
        ProcessorConfig::MultiComparison(c) => {
            let output = match c.mode {
                ComparisonMode::Absolute | ComparisonMode::Reference => same(input.kind.clone()),
                ComparisonMode::Zone | ComparisonMode::Binary => output_with(
                    attrs.derive_with_size(1).derive_signed(false),
                    SignalKind::Integer,
                ),
            };
            Inferred {
                output,
                state: None,
            }
        }
        ProcessorConfig::Combiner(_) => {
            let size = attrs.sizes.first().copied().unwrap_or(0);
            Inferred {
                output: output_with(DataAttributes::scalar(size, false), scalar_kind(input)),
                state: None,
            }
        }
        ProcessorConfig::Math(c) => {
            let shape = DataAttributes::new(
                vec![c.output; attrs.channels().max(1)],
                attrs.copies,
                0,
                math_output_signed(c.op, attrs.signed, c.rhs),
            );
            let kind = match c.op {
                MathOp::Exponent => SignalKind::Bytes,
                _ => input.kind.clone(),
            };
            Inferred {
                output: output_with(shape, kind),
                state: None,
            }
        }
        ProcessorConfig::Pulse(c) => {
            let output = match c.mode {
                PulseMode::Width => {
                    output_with(DataAttributes::scalar(2, false), SignalKind::Integer)
                }
                PulseMode::Area => output_with(attrs.derive_with_size(4), input.kind.clone()),
                PulseMode::Peak => same(input.kind.clone()),
                PulseMode::OnDetect => small(false),
            };
            Inferred {
                output,
                state: None,
            }
        }
        ProcessorConfig::Differential(c) => {
            let output = match c.mode {
                DifferentialMode::Absolute => same(input.kind.clone()),
                DifferentialMode::Differential => {
                    output_with(attrs.derive_signed(true), input.kind.clone())
                }
                DifferentialMode::Binary => small(true),
            };
            Inferred {
                output,
                state: None,
            }
        }
        ProcessorConfig::Threshold(c) => {
            let output = match c.mode {
                ThresholdMode::Absolute => same(input.kind.clone()),
                ThresholdMode::Binary => small(true),
            };
            Inferred {
                output,
                state: None,
            }
        }
        ProcessorConfig::Buffer(_) => Inferred {
            output: output_with(DataAttributes::empty(), SignalKind::Integer),
            state: Some(SignalNode::processed(
                input,
                config,
                STATE,
                attrs.derive_same_shape(),
                input.kind.clone(),
            )),
        },
        ProcessorConfig::Packer(c) => Inferred {
            output: output_with(attrs.derive_copies(c.count), input.kind.clone()),
            state: None,
        },
        ProcessorConfig::Accounter(c) => {
            let shape = DataAttributes::new(vec![c.size, attrs.length()], 1, 0, false);
            let mut output = output_with(shape, SignalKind::Accounted);
            let prefix = SignalNode::processed(
                input,
                config,
                NOTIFY,
                DataAttributes::scalar(c.size, false),
                SignalKind::Integer,
            );
            let wrapped = input.at_offset(c.size);
            output.components = vec![prefix, wrapped];
            Inferred {
                output,
                state: None,
            }
        }
        ProcessorConfig::Fuser(c) => {
            if fused.len() != c.ids.len() {
                return Err(Error::UnsupportedTransform {
                    config: format!(
                        "{} (fuses {} buffers, {} known)",
                        hex(&config.encode()),
                        c.ids.len(),
                        fused.len()
                    ),
                });
            }
            let mut components = vec![input.at_offset(0)];
            let mut offset = attrs.length();
            for state in fused {
                components.push(state.at_offset(offset));
                offset = offset.saturating_add(state.attributes.length());
            }
            let mut output =
                output_with(DataAttributes::new(vec![offset], 1, 0, false), SignalKind::Fused);
            output.components = components;
            Inferred {
                output,
                state: None,
            }
        }
    };
    Ok(inferred)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{module, Address};

    fn signed_word() -> SignalNode {
        SignalNode::root(
            Address::new(module::TEMPERATURE, 0x01, 0),
            DataAttributes::scalar(2, true),
            SignalKind::Float { scale: 8.0 },
        )
    }

    fn acceleration() -> SignalNode {
        SignalNode::root(
            Address::unindexed(module::ACCELEROMETER, 0x04),
            DataAttributes::new(vec![2, 2, 2], 1, 0, true),
            SignalKind::Vector { scale: 16384.0 },
        )
    }

    #[test]
    fn test_low_pass_keeps_shape() {
        let input = signed_word();
        let config = ProcessorConfig::Average(AverageConfig {
            size: 2,
            samples: 4,
            high_pass: false,
            channels: None,
        });
        let inferred = infer(&input, &config, &[]).unwrap();
        assert_eq!(inferred.output.attributes.length(), 2);
        assert!(inferred.output.attributes.signed);
        assert!(inferred.output.is_processor_output());
        assert!(inferred.state.is_none());
    }

    #[test]
    fn test_counter_is_four_byte_unsigned() {
        let config = ProcessorConfig::Accumulator(AccumulatorConfig {
            counter: true,
            output: 4,
            input: 2,
        });
        let inferred = infer(&signed_word(), &config, &[]).unwrap();
        assert_eq!(inferred.output.attributes.sizes, vec![4]);
        assert!(!inferred.output.attributes.signed);
        assert_eq!(inferred.output.kind, SignalKind::Integer);
        assert!(inferred.state.unwrap().is_state());
    }

    #[test]
    fn test_math_sizes() {
        assert_eq!(math_output_size(MathOp::Add, 2, 10), 4);
        assert_eq!(math_output_size(MathOp::Divide, 2, 10), 2);
        assert_eq!(math_output_size(MathOp::Multiply, 2, 3), 4);
        assert_eq!(math_output_size(MathOp::Multiply, 2, 0), 2);
        assert_eq!(math_output_size(MathOp::Divide, 2, 0), 4);
        assert_eq!(math_output_size(MathOp::LeftShift, 2, 8), 3);
        assert_eq!(math_output_size(MathOp::LeftShift, 4, 16), 4);
        assert_eq!(math_output_size(MathOp::RightShift, 2, 16), 1);
        assert!(math_output_signed(MathOp::Subtract, false, 1));
        assert!(!math_output_signed(MathOp::AbsValue, true, 0));
        assert!(math_output_signed(MathOp::Constant, false, -1));
    }

    #[test]
    fn test_math_on_vector_applies_per_channel() {
        let config = ProcessorConfig::Math(MathConfig {
            output: 4,
            input: 2,
            signed: true,
            op: MathOp::Add,
            rhs: 16384,
            channels: Some(3),
        });
        let inferred = infer(&acceleration(), &config, &[]).unwrap();
        assert_eq!(inferred.output.attributes.sizes, vec![4, 4, 4]);
        assert_eq!(inferred.output.components.len(), 3);
    }

    #[test]
    fn test_rss_is_unsigned_scalar() {
        let config = ProcessorConfig::Combiner(CombinerConfig {
            output: 2,
            input: 2,
            channels: 3,
            signed: true,
            mode: CombinerMode::Rss,
        });
        let output = infer(&acceleration(), &config, &[]).unwrap().output;
        assert_eq!(output.attributes.sizes, vec![2]);
        assert!(!output.attributes.signed);
        assert_eq!(output.kind, SignalKind::Float { scale: 16384.0 });
    }

    #[test]
    fn test_buffer_output_is_empty() {
        let config = ProcessorConfig::Buffer(BufferConfig { size: 6 });
        let inferred = infer(&acceleration(), &config, &[]).unwrap();
        assert!(inferred.output.attributes.is_empty());
        assert_eq!(inferred.state.unwrap().attributes.length(), 6);
    }

    #[test]
    fn test_fuser_length_and_components() {
        let buffer = infer(
            &signed_word(),
            &ProcessorConfig::Buffer(BufferConfig { size: 2 }),
            &[],
        )
        .unwrap()
        .state
        .unwrap();
        let config = ProcessorConfig::Fuser(FuserConfig { ids: vec![4] });
        let output = infer(&acceleration(), &config, &[buffer]).unwrap().output;
        assert_eq!(output.attributes.length(), 8);
        assert_eq!(output.components.len(), 2);
        assert_eq!(output.components[1].attributes.offset, 6);

        let err = infer(&acceleration(), &config, &[]).unwrap_err();
        assert!(matches!(err, Error::UnsupportedTransform { .. }));
    }

    #[test]
    fn test_accounter_prefix() {
        let config = ProcessorConfig::Accounter(AccounterConfig {
            mode: AccountMode::Count,
            size: 4,
        });
        let output = infer(&signed_word(), &config, &[]).unwrap().output;
        assert_eq!(output.attributes.sizes, vec![4, 2]);
        assert_eq!(output.components[1].attributes.offset, 4);
    }

    #[test]
    fn test_every_variant_has_nonzero_output_except_buffer() {
        let input = signed_word();
        let configs = vec![
            ProcessorConfig::Passthrough(PassthroughConfig {
                mode: PassthroughMode::All,
                value: 0,
            }),
            ProcessorConfig::Time(TimeConfig {
                size: 2,
                mode: TimeMode::Absolute,
                period: 100,
            }),
            ProcessorConfig::Delay(DelayConfig {
                size: 2,
                samples: 3,
                expanded: true,
            }),
            ProcessorConfig::SingleComparison(SingleComparisonConfig {
                signed: true,
                op: ComparisonOp::Gt,
                reference: 0,
            }),
            ProcessorConfig::MultiComparison(MultiComparisonConfig {
                signed: true,
                size: 2,
                op: ComparisonOp::Gt,
                mode: ComparisonMode::Binary,
                references: vec![0],
            }),
            ProcessorConfig::Pulse(PulseConfig {
                size: 2,
                mode: PulseMode::Width,
                threshold: 1,
                width: 2,
            }),
            ProcessorConfig::Differential(DifferentialConfig {
                size: 2,
                signed: true,
                mode: DifferentialMode::Binary,
                distance: 8,
            }),
            ProcessorConfig::Threshold(ThresholdConfig {
                size: 2,
                signed: true,
                mode: ThresholdMode::Binary,
                boundary: 8,
                hysteresis: 1,
            }),
            ProcessorConfig::Packer(PackerConfig { size: 2, count: 2 }),
        ];
        for config in configs {
            let inferred = infer(&input, &config, &[]).unwrap();
            assert!(inferred.output.attributes.length() > 0, "{:?}", config);
        }
    }
}
