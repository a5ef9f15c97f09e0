//! Built-in operator emitters.
//!
//! The generated dialect follows the embedded runtime's context API:
//! tensors are registered under their canonical names with `ctx.add`,
//! operators are queued with `ctx.push`, and quantized tensors carry
//! their affine range so quantized kernels need no side tensors.

use super::{add_statement, join_dims, sanitize_identifier, EmitContext, OpEmitter, Snippet};
use crate::error::{CompileError, CompileResult};
use crate::ir::{ElementType, Payload, TensorInfo};
use crate::transform::quantize::{QUANT_MAX_ATTR, QUANT_MIN_ATTR};

/// Every built-in emitter, for registry construction.
pub(crate) fn builtins() -> Vec<Box<dyn OpEmitter>> {
    vec![
        Box::new(InputEmitter),
        Box::new(ConstEmitter),
        Box::new(InlineEmitter),
        Box::new(MatMulEmitter),
        Box::new(AddEmitter),
        Box::new(ReluEmitter),
        Box::new(SoftmaxEmitter),
        Box::new(MaxPoolEmitter),
        Box::new(ReshapeEmitter),
        Box::new(ArgMaxEmitter),
        Box::new(DequantizeEmitter),
        Box::new(QuantizedMatMulEmitter),
    ]
}

// ─── Rendering Helpers ─────────────────────────────────────────────

fn render_literals(payload: &Payload) -> String {
    fn join<T: ToString>(values: &[T]) -> String {
        values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
    match payload {
        Payload::F32(v) => v
            .iter()
            .map(|x| format!("{x:?}f"))
            .collect::<Vec<_>>()
            .join(", "),
        Payload::I32(v) => join(v),
        Payload::I8(v) => join(v),
        Payload::U8(v) => join(v),
    }
}

/// `static const float w_0_data[8] = { 0.5f, ... };`
fn weight_array(ident: &str, payload: &Payload) -> String {
    format!(
        "static const {} {ident}[{}] = {{ {} }};",
        payload.element_type().c_name(),
        payload.len(),
        render_literals(payload)
    )
}

/// Registration of a baked payload tensor. Quantized payloads carry
/// their affine range into the tensor itself.
fn rom_registration(tensor: &TensorInfo, dims: &[usize], ident: &str) -> String {
    let shape = join_dims(dims);
    let quant = (
        tensor.attr_float(QUANT_MIN_ATTR),
        tensor.attr_float(QUANT_MAX_ATTR),
    );
    let expr = match (tensor.dtype, quant) {
        (ElementType::U8, (Some(min), Some(max))) => format!(
            "new QuantizedRomTensor<uint8_t>({{ {shape} }}, {ident}, {min:?}f, {max:?}f)"
        ),
        _ => format!(
            "new RomTensor<{}>({{ {shape} }}, {ident})",
            tensor.dtype.c_name()
        ),
    };
    add_statement(&expr, &tensor.name, tensor.ref_count())
}

fn payload_of<'a>(cx: &EmitContext<'a>) -> CompileResult<&'a Payload> {
    let node = cx.node();
    node.const_payload()
        .ok_or_else(|| CompileError::MissingConstantData {
            node: node.name.clone(),
        })
}

/// Output registration plus `ctx.push` for a fixed-arity operator.
fn op_snippet(
    cx: &EmitContext,
    arity: usize,
    header: &str,
    op_expr: String,
) -> CompileResult<Snippet> {
    if arity > 0 {
        cx.input(arity - 1)?;
    }
    let register = cx.register_output(0)?;
    let push = cx.push_statement(&op_expr);
    Ok(Snippet::statement(format!("{register}\n{push}")).with_header(header))
}

// ─── Source Emitters ───────────────────────────────────────────────

/// Graph inputs become function parameters bound under their canonical
/// tensor names.
struct InputEmitter;

impl OpEmitter for InputEmitter {
    fn op_type(&self) -> &'static str {
        "Input"
    }

    fn emit(&self, cx: &EmitContext) -> CompileResult<Snippet> {
        let tensor = cx.output(0)?;
        let param = sanitize_identifier(&cx.node().name);
        Ok(Snippet::statement(add_statement(
            &param,
            &tensor.name,
            tensor.ref_count(),
        )))
    }
}

/// Constants not claimed by the inline pass stay function-local.
struct ConstEmitter;

impl OpEmitter for ConstEmitter {
    fn op_type(&self) -> &'static str {
        "Const"
    }

    fn emit(&self, cx: &EmitContext) -> CompileResult<Snippet> {
        let payload = payload_of(cx)?;
        let dims = cx.require_shape(0)?;
        let tensor = cx.output(0)?;
        let ident = format!("{}_data", sanitize_identifier(&tensor.name));
        let array = weight_array(&ident, payload);
        let registration = rom_registration(tensor, dims, &ident);
        Ok(Snippet::statement(format!("{array}\n{registration}")))
    }
}

/// Inlined constants: the array moves to the weight section, only the
/// registration stays in the body.
struct InlineEmitter;

impl OpEmitter for InlineEmitter {
    fn op_type(&self) -> &'static str {
        "Inline"
    }

    fn emit(&self, cx: &EmitContext) -> CompileResult<Snippet> {
        let payload = payload_of(cx)?;
        let dims = cx.require_shape(0)?;
        let tensor = cx.output(0)?;
        let ident = format!("{}_data", sanitize_identifier(&tensor.name));
        let registration = rom_registration(tensor, dims, &ident);
        Ok(Snippet::statement(registration).with_weight(weight_array(&ident, payload)))
    }
}

struct MatMulEmitter;

impl OpEmitter for MatMulEmitter {
    fn op_type(&self) -> &'static str {
        "MatMul"
    }

    fn emit(&self, cx: &EmitContext) -> CompileResult<Snippet> {
        let ty = cx.output(0)?.dtype.c_name();
        op_snippet(
            cx,
            2,
            "uTensor/ops/MatrixOps.hpp",
            format!("new MatMulOp<{ty}>()"),
        )
    }
}

struct AddEmitter;

impl OpEmitter for AddEmitter {
    fn op_type(&self) -> &'static str {
        "Add"
    }

    fn emit(&self, cx: &EmitContext) -> CompileResult<Snippet> {
        let ty = cx.output(0)?.dtype.c_name();
        op_snippet(cx, 2, "uTensor/ops/MathOps.hpp", format!("new AddOp<{ty}>()"))
    }
}

struct ReluEmitter;

impl OpEmitter for ReluEmitter {
    fn op_type(&self) -> &'static str {
        "Relu"
    }

    fn emit(&self, cx: &EmitContext) -> CompileResult<Snippet> {
        let ty = cx.output(0)?.dtype.c_name();
        op_snippet(cx, 1, "uTensor/ops/NnOps.hpp", format!("new ReluOp<{ty}>()"))
    }
}

struct SoftmaxEmitter;

impl OpEmitter for SoftmaxEmitter {
    fn op_type(&self) -> &'static str {
        "Softmax"
    }

    fn emit(&self, cx: &EmitContext) -> CompileResult<Snippet> {
        let ty = cx.output(0)?.dtype.c_name();
        op_snippet(
            cx,
            1,
            "uTensor/ops/NnOps.hpp",
            format!("new SoftmaxOp<{ty}>()"),
        )
    }
}

struct MaxPoolEmitter;

impl OpEmitter for MaxPoolEmitter {
    fn op_type(&self) -> &'static str {
        "MaxPool"
    }

    fn emit(&self, cx: &EmitContext) -> CompileResult<Snippet> {
        let ty = cx.output(0)?.dtype.c_name();
        let node = cx.node();
        let op_expr = match (node.attr_ints("ksize"), node.attr_ints("strides")) {
            (Some(k), Some(s)) => format!(
                "new MaxPoolOp<{ty}>({{ {} }}, {{ {} }})",
                join_i64(k),
                join_i64(s)
            ),
            _ => format!("new MaxPoolOp<{ty}>()"),
        };
        op_snippet(cx, 1, "uTensor/ops/NnOps.hpp", op_expr)
    }
}

struct ReshapeEmitter;

impl OpEmitter for ReshapeEmitter {
    fn op_type(&self) -> &'static str {
        "Reshape"
    }

    fn emit(&self, cx: &EmitContext) -> CompileResult<Snippet> {
        let ty = cx.output(0)?.dtype.c_name();
        // Target shape from the `shape` attr, else the static output shape.
        let dims = match cx.node().attr_ints("shape") {
            Some(dims) => join_i64(dims),
            None => join_dims(cx.require_shape(0)?),
        };
        op_snippet(
            cx,
            1,
            "uTensor/ops/ArrayOps.hpp",
            format!("new ReshapeOp<{ty}>({{ {dims} }})"),
        )
    }
}

struct ArgMaxEmitter;

impl OpEmitter for ArgMaxEmitter {
    fn op_type(&self) -> &'static str {
        "ArgMax"
    }

    fn emit(&self, cx: &EmitContext) -> CompileResult<Snippet> {
        let in_ty = cx.input(0)?.dtype.c_name();
        let out_ty = cx.output(0)?.dtype.c_name();
        let axis = cx.node().attr_int("axis").unwrap_or(0);
        op_snippet(
            cx,
            1,
            "uTensor/ops/MathOps.hpp",
            format!("new ArgMaxOp<{in_ty}, {out_ty}>({axis})"),
        )
    }
}

struct DequantizeEmitter;

impl OpEmitter for DequantizeEmitter {
    fn op_type(&self) -> &'static str {
        "Dequantize"
    }

    fn emit(&self, cx: &EmitContext) -> CompileResult<Snippet> {
        let in_ty = cx.input(0)?.dtype.c_name();
        let out_ty = cx.output(0)?.dtype.c_name();
        op_snippet(
            cx,
            1,
            "uTensor/ops/QuantOps.hpp",
            format!("new DequantizeOp<{in_ty}, {out_ty}>()"),
        )
    }
}

struct QuantizedMatMulEmitter;

impl OpEmitter for QuantizedMatMulEmitter {
    fn op_type(&self) -> &'static str {
        "QuantizedMatMul"
    }

    fn emit(&self, cx: &EmitContext) -> CompileResult<Snippet> {
        op_snippet(
            cx,
            2,
            "uTensor/ops/QuantOps.hpp",
            "new QuantizedMatMulOp<uint8_t>()".to_string(),
        )
    }
}

fn join_i64(values: &[i64]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

// ─── Tests ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::EmitterRegistry;
    use crate::ir::{AttrValue, Graph, GraphBuilder, TensorInfo};
    use crate::transform::{PassConfig, Transform};

    fn t(shape: &[usize]) -> TensorInfo {
        TensorInfo::new(ElementType::F32, Some(shape.to_vec()))
    }

    fn emit_node(graph: &Graph, name: &str) -> Snippet {
        let registry = EmitterRegistry::with_builtins();
        let (id, _) = graph.node_by_name(name).unwrap();
        let emitter = registry.require(graph, id).unwrap();
        emitter.emit(&EmitContext::new(graph, id)).unwrap()
    }

    #[test]
    fn test_input_binds_parameter() {
        let mut b = GraphBuilder::new("m");
        b.input("image/raw", ElementType::F32, &[1, 784]);
        let g = b.build(&["image/raw"]).unwrap();

        let snippet = emit_node(&g, "image/raw");
        assert_eq!(snippet.exec, "ctx.add(image_raw, \"image/raw:0\");");
        assert!(snippet.weight.is_none());
    }

    #[test]
    fn test_const_stays_local() {
        let mut b = GraphBuilder::new("m");
        b.constant("w", Payload::F32(vec![0.5, -1.25]), &[2]);
        let g = b.build(&["w"]).unwrap();

        let snippet = emit_node(&g, "w");
        assert!(snippet.exec.contains("static const float w_0_data[2] = { 0.5f, -1.25f };"));
        assert!(snippet
            .exec
            .contains("ctx.add(new RomTensor<float>({ 2 }, w_0_data), \"w:0\");"));
        assert!(snippet.weight.is_none());
    }

    #[test]
    fn test_inline_moves_array_to_weights() {
        let mut b = GraphBuilder::new("m");
        b.constant("w", Payload::F32(vec![1.0]), &[1]);
        let g = b.build(&["w"]).unwrap();
        let g = crate::transform::Inline
            .apply(g, &PassConfig::empty())
            .unwrap();

        let snippet = emit_node(&g, "w");
        assert!(!snippet.exec.contains("static const"));
        assert!(snippet.exec.contains("RomTensor<float>({ 1 }, w_0_data)"));
        assert_eq!(
            snippet.weight.as_deref(),
            Some("static const float w_0_data[1] = { 1.0f };")
        );
    }

    #[test]
    fn test_quantized_weight_registers_with_range() {
        let mut b = GraphBuilder::new("m");
        b.input("x", ElementType::F32, &[1, 2]);
        b.constant("w", Payload::F32(vec![-1.0, 2.0]), &[2, 1]);
        b.node("fc", "MatMul", &["x", "w"], vec![t(&[1, 1])]);
        let g = b.build(&["fc"]).unwrap();
        let g = crate::transform::Quantize
            .apply(g, &PassConfig::empty())
            .unwrap();

        let snippet = emit_node(&g, "w");
        assert!(snippet.exec.contains(
            "new QuantizedRomTensor<uint8_t>({ 2, 1 }, w_0_data, -1.0f, 2.0f)"
        ));
        assert!(snippet.exec.contains("static const uint8_t w_0_data[2] = { 0, 255 };"));
    }

    #[test]
    fn test_matmul_registers_output_then_pushes() {
        let mut b = GraphBuilder::new("m");
        b.input("x", ElementType::F32, &[1, 4]);
        b.constant("w", Payload::F32(vec![0.0; 8]), &[4, 2]);
        b.node("fc", "MatMul", &["x", "w"], vec![t(&[1, 2])]);
        let g = b.build(&["fc"]).unwrap();

        let snippet = emit_node(&g, "fc");
        assert_eq!(snippet.headers, vec!["uTensor/ops/MatrixOps.hpp"]);
        let lines: Vec<&str> = snippet.exec.lines().collect();
        assert_eq!(
            lines,
            vec![
                "ctx.add(new RamTensor<float>({ 1, 2 }), \"fc:0\");",
                "ctx.push(new MatMulOp<float>(), { \"x:0\", \"w:0\" }, { \"fc:0\" });",
            ]
        );
    }

    #[test]
    fn test_maxpool_renders_window_attrs() {
        let mut b = GraphBuilder::new("m");
        b.input("x", ElementType::F32, &[1, 28, 28, 1]);
        let draft = b.node("pool", "MaxPool", &["x"], vec![t(&[1, 14, 14, 1])]);
        draft.attr("ksize", AttrValue::Ints(vec![2, 2]));
        draft.attr("strides", AttrValue::Ints(vec![2, 2]));
        let g = b.build(&["pool"]).unwrap();

        let snippet = emit_node(&g, "pool");
        assert!(snippet
            .exec
            .contains("new MaxPoolOp<float>({ 2, 2 }, { 2, 2 })"));
    }

    #[test]
    fn test_argmax_uses_axis_and_output_type() {
        let mut b = GraphBuilder::new("m");
        b.input("logits", ElementType::F32, &[1, 10]);
        let draft = b.node(
            "pred",
            "ArgMax",
            &["logits"],
            vec![TensorInfo::new(ElementType::I32, Some(vec![1]))],
        );
        draft.attr("axis", AttrValue::Int(1));
        let g = b.build(&["pred"]).unwrap();

        let snippet = emit_node(&g, "pred");
        assert!(snippet.exec.contains("new ArgMaxOp<float, int32_t>(1)"));
        assert_eq!(snippet.headers, vec!["uTensor/ops/MathOps.hpp"]);
    }

    #[test]
    fn test_planned_counts_reach_registrations() {
        let mut b = GraphBuilder::new("m");
        b.input("x", ElementType::F32, &[4]);
        b.node("a", "Relu", &["x"], vec![t(&[4])]);
        b.node("b", "Relu", &["x"], vec![t(&[4])]);
        b.node("c", "Add", &["a", "b"], vec![t(&[4])]);
        let g = b.build(&["c"]).unwrap();
        let g = crate::transform::RefCount
            .apply(g, &PassConfig::empty())
            .unwrap();

        let snippet = emit_node(&g, "x");
        assert_eq!(snippet.exec, "ctx.add(x, \"x:0\", 2);");
        let snippet = emit_node(&g, "c");
        assert!(snippet.exec.contains("ctx.add(new RamTensor<float>({ 4 }), \"c:0\", 0);"));
    }

    #[test]
    fn test_const_without_shape_is_rejected() {
        let mut b = GraphBuilder::new("m");
        let draft = b.node(
            "w",
            "Const",
            &[],
            vec![TensorInfo::new(ElementType::F32, None)],
        );
        draft.attr(
            crate::ir::VALUE_ATTR,
            AttrValue::Data(Payload::F32(vec![1.0])),
        );
        let g = b.build(&["w"]).unwrap();

        let registry = EmitterRegistry::with_builtins();
        let (id, _) = g.node_by_name("w").unwrap();
        let err = registry
            .require(&g, id)
            .unwrap()
            .emit(&EmitContext::new(&g, id))
            .unwrap_err();
        match err {
            CompileError::MissingTensorShape { tensor } => assert_eq!(tensor, "w:0"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
