//! Weight quantization rewrite.
//!
//! Rewrites float constant payloads feeding quantization-aware operators
//! into affine u8: values are mapped linearly from `[min, max]` onto
//! `0..=255` and the range is recorded on the output tensor, so emitters
//! can register the weight with its dequantization parameters.
//! Activations are untouched.

use std::collections::BTreeSet;

use super::{PassConfig, Transform};
use crate::error::CompileResult;
use crate::ir::{AttrValue, ElementType, Graph, NodeId, Payload, TensorRef, VALUE_ATTR};

/// Tensor attributes carrying the affine range of a quantized payload.
pub const QUANT_MIN_ATTR: &str = "quant_min";
pub const QUANT_MAX_ATTR: &str = "quant_max";

/// Operators with quantized kernels in the target runtime.
const QUANT_AWARE_OPS: &[&str] = &["MatMul", "Conv2D", "FullyConnected"];

pub struct Quantize;

impl Transform for Quantize {
    fn name(&self) -> &'static str {
        "quantize"
    }

    fn describe(&self) -> &'static str {
        "rewrite float weights of quantization-aware operators to affine u8"
    }

    fn apply(&self, graph: Graph, _cfg: &PassConfig) -> CompileResult<Graph> {
        let mut aware_consumers = 0usize;
        for (_, node) in graph.nodes() {
            if QUANT_AWARE_OPS.contains(&node.op_type.as_str()) {
                aware_consumers += 1;
            }
        }

        let mut eligible: BTreeSet<NodeId> = BTreeSet::new();
        for (id, node) in graph.nodes() {
            if node.op_type != "Const" && node.op_type != "Inline" {
                continue;
            }
            if node.outputs.len() != 1 {
                continue;
            }
            let is_float = matches!(node.const_payload(), Some(Payload::F32(v)) if !v.is_empty());
            if !is_float {
                continue;
            }
            let feeds_aware = graph
                .consumers(TensorRef::new(id, 0))
                .iter()
                .any(|(cid, _)| QUANT_AWARE_OPS.contains(&graph.node(*cid).op_type.as_str()));
            if feeds_aware {
                eligible.insert(id);
            }
        }

        if eligible.is_empty() {
            if aware_consumers > 0 {
                log::warn!(
                    "quantize: {aware_consumers} quantization-aware node(s) but no eligible \
                     float weights; output will use float kernels"
                );
            }
            return Ok(graph);
        }
        log::debug!("quantize: rewriting {} weight(s)", eligible.len());

        Ok(graph.map_nodes(|id, node| {
            if !eligible.contains(&id) {
                return;
            }
            let values = match node.const_payload().and_then(Payload::as_f32) {
                Some(v) => v,
                None => return,
            };
            let (min, max) = values.iter().fold(
                (f32::INFINITY, f32::NEG_INFINITY),
                |(lo, hi), v| (lo.min(*v), hi.max(*v)),
            );
            let range = max - min;
            let quantized: Vec<u8> = values
                .iter()
                .map(|v| {
                    if range == 0.0 {
                        0
                    } else {
                        ((v - min) * 255.0 / range).round().clamp(0.0, 255.0) as u8
                    }
                })
                .collect();

            node.attrs
                .insert(VALUE_ATTR.to_string(), AttrValue::Data(Payload::U8(quantized)));
            let out = &mut node.outputs[0];
            out.dtype = ElementType::U8;
            out.attrs
                .insert(QUANT_MIN_ATTR.to_string(), AttrValue::Float(min as f64));
            out.attrs
                .insert(QUANT_MAX_ATTR.to_string(), AttrValue::Float(max as f64));
        }))
    }
}

// ─── Tests ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{GraphBuilder, TensorInfo};

    fn t(shape: &[usize]) -> TensorInfo {
        TensorInfo::new(ElementType::F32, Some(shape.to_vec()))
    }

    #[test]
    fn test_quantizes_matmul_weight() {
        let mut b = GraphBuilder::new("m");
        b.input("x", ElementType::F32, &[1, 4]);
        b.constant("w", Payload::F32(vec![-1.0, 0.5, 2.0, 1.0]), &[4, 1]);
        b.node("fc", "MatMul", &["x", "w"], vec![t(&[1, 1])]);
        let g = b.build(&["fc"]).unwrap();

        let g = Quantize.apply(g, &PassConfig::empty()).unwrap();
        let (_, w) = g.node_by_name("w").unwrap();
        assert_eq!(w.outputs[0].dtype, ElementType::U8);
        assert_eq!(w.outputs[0].attr_float(QUANT_MIN_ATTR), Some(-1.0));
        assert_eq!(w.outputs[0].attr_float(QUANT_MAX_ATTR), Some(2.0));
        match w.const_payload() {
            Some(Payload::U8(q)) => assert_eq!(q, &vec![0, 128, 255, 170]),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_weight_without_aware_consumer_is_left_alone() {
        let mut b = GraphBuilder::new("m");
        b.input("x", ElementType::F32, &[2]);
        b.constant("bias", Payload::F32(vec![0.1, 0.2]), &[2]);
        b.node("sum", "Add", &["x", "bias"], vec![t(&[2])]);
        let g = b.build(&["sum"]).unwrap();

        let g = Quantize.apply(g, &PassConfig::empty()).unwrap();
        let (_, bias) = g.node_by_name("bias").unwrap();
        assert_eq!(bias.outputs[0].dtype, ElementType::F32);
        assert!(bias.outputs[0].attr_float(QUANT_MIN_ATTR).is_none());
    }

    #[test]
    fn test_degenerate_range_maps_to_zero() {
        let mut b = GraphBuilder::new("m");
        b.input("x", ElementType::F32, &[1, 2]);
        b.constant("w", Payload::F32(vec![3.0, 3.0]), &[2, 1]);
        b.node("fc", "MatMul", &["x", "w"], vec![t(&[1, 1])]);
        let g = b.build(&["fc"]).unwrap();

        let g = Quantize.apply(g, &PassConfig::empty()).unwrap();
        let (_, w) = g.node_by_name("w").unwrap();
        match w.const_payload() {
            Some(Payload::U8(q)) => assert_eq!(q, &vec![0, 0]),
            other => panic!("unexpected payload: {other:?}"),
        }
        assert_eq!(w.outputs[0].attr_float(QUANT_MIN_ATTR), Some(3.0));
        assert_eq!(w.outputs[0].attr_float(QUANT_MAX_ATTR), Some(3.0));
    }

    #[test]
    fn test_inline_weights_are_also_eligible() {
        let mut b = GraphBuilder::new("m");
        b.input("x", ElementType::F32, &[1, 2]);
        b.constant("w", Payload::F32(vec![0.0, 1.0]), &[2, 1]);
        b.node("fc", "MatMul", &["x", "w"], vec![t(&[1, 1])]);
        let g = b.build(&["fc"]).unwrap();

        let g = crate::transform::Inline.apply(g, &PassConfig::empty()).unwrap();
        let g = Quantize.apply(g, &PassConfig::empty()).unwrap();
        let (_, w) = g.node_by_name("w").unwrap();
        assert_eq!(w.op_type, "Inline");
        assert_eq!(w.outputs[0].dtype, ElementType::U8);
    }
}
