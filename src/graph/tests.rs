use std::collections::BTreeMap;

use super::builder::Expr;
use super::{unique_name, Block, Node, NodeId, OpInput, OperatorNode, ScopeEnv};
use crate::op_registry::OpRegistry;
use crate::program::{OpCall, ProgramBuilder};
use crate::target::TargetVersion;
use crate::types::{DataType, TensorType};
use crate::value::Tensor;

fn f32_type(shape: &[usize]) -> TensorType {
    TensorType::fixed(DataType::Float32, shape)
}

fn make_op(
    kind: &str,
    name: &str,
    inputs: &[(&'static str, NodeId)],
    outputs: &[NodeId],
) -> OperatorNode {
    let op = OpRegistry::global()
        .get(kind)
        .cloned()
        .expect("op should be registered");
    OperatorNode::new(
        name,
        op,
        inputs
            .iter()
            .map(|&(param, id)| OpInput { param, id })
            .collect(),
        BTreeMap::new(),
        outputs.to_vec(),
        Vec::new(),
    )
}

/// Build a block whose single op, a `cond`, has a `then` branch that
/// captures `x` from the enclosing block.
fn block_with_capture() -> Block {
    let mut pb = ProgramBuilder::new(TargetVersion::Ios17);
    let outer = pb
        .begin_block(&[
            ("x", f32_type(&[2])),
            ("pred", TensorType::scalar(DataType::Bool)),
        ])
        .unwrap();
    let x = outer.input(0).unwrap().clone();
    let pred = outer.input(1).unwrap().clone();

    let then_handle = pb.begin_block(&[]).unwrap();
    let then_out = pb
        .add_op(OpCall::new("relu").input("x", &x).output_names(&["then_out"]))
        .unwrap();
    let then_block = pb.end_block(then_handle, &then_out).unwrap();

    let else_handle = pb.begin_block(&[]).unwrap();
    let else_out = pb
        .add_op(OpCall::new("exp").input("x", &x).output_names(&["else_out"]))
        .unwrap();
    let else_block = pb.end_block(else_handle, &else_out).unwrap();

    let out = pb
        .add_op(
            OpCall::new("cond")
                .input("pred", &pred)
                .block(then_block)
                .block(else_block)
                .output_names(&["y"]),
        )
        .unwrap();
    pb.end_block(outer, &out).unwrap()
}

#[test]
fn test_add_nodes() {
    let mut block = Block::new();
    let x = block.add_input("x", f32_type(&[3]));
    let c = block.add_constant("c", Tensor::from(2.0f32));
    let y = block.add_value("y", f32_type(&[3]));
    let op = block.add_op(make_op("mul", "y", &[("x", x), ("y", c)], &[y]));
    block.set_outputs(vec![y], vec!["y".to_string()]);

    assert_eq!(block.node_id("x"), Some(x));
    assert_eq!(block.node_id("c"), Some(c));
    assert_eq!(block.producer(y), Some(op));
    assert_eq!(block.producer(x), None);
    assert_eq!(block.constant(c), Some(&Tensor::from(2.0f32)));
    assert_eq!(block.value_type(c), Some(TensorType::scalar(DataType::Float32)));
    assert_eq!(block.op_order(), &[op]);
    assert_eq!(block.num_ops(), 1);
    assert!(matches!(block.node(op), Some(Node::Operator(_))));
    assert!(block.check_invariants().is_ok());

    let sig = block.signature();
    assert_eq!(sig.inputs.len(), 1);
    assert_eq!(sig.inputs[0].name, "x");
    assert_eq!(sig.outputs[0].name, "y");
    assert_eq!(sig.outputs[0].ty, f32_type(&[3]));
}

#[test]
fn test_check_invariants_detects_use_before_def() {
    let mut block = Block::new();
    let x = block.add_input("x", f32_type(&[3]));
    let y = block.add_value("y", f32_type(&[3]));
    let z = block.add_value("z", f32_type(&[3]));
    block.add_op(make_op("add", "y", &[("x", x), ("y", z)], &[y]));
    block.add_op(make_op("relu", "z", &[("x", x)], &[z]));
    block.set_outputs(vec![y], vec!["y".to_string()]);

    let err = block.check_invariants().unwrap_err();
    assert_eq!(err, "operator \"y\" uses \"z\" before it is defined");
}

#[test]
fn test_check_invariants_detects_undefined_output() {
    let mut block = Block::new();
    block.add_input("x", f32_type(&[3]));
    let y = block.add_value("y", f32_type(&[3]));
    block.set_outputs(vec![y], vec!["y".to_string()]);
    assert_eq!(
        block.check_invariants(),
        Err("block output \"y\" is not defined".to_string())
    );
}

#[test]
fn test_remove_op_and_convert_to_constant() {
    let x = Expr::value("x", f32_type(&[2]));
    let mut block = x.unary("relu").build_block(&[x]);
    let (op_id, op) = block.operators().next().map(|(id, op)| (id, op.clone())).unwrap();
    let out_id = op.output_ids()[0];

    let removed = block.remove_op(op_id).unwrap();
    assert_eq!(removed.kind(), "relu");
    assert_eq!(block.num_ops(), 0);
    assert_eq!(block.producer(out_id), None);
    assert!(block.check_invariants().is_err());

    let value = Tensor::from_vec(&[2], vec![1.0f32, 2.0]).unwrap();
    block.convert_to_constant(out_id, value.clone());
    assert_eq!(block.constant(out_id), Some(&value));
    assert_eq!(block.node_id(op.name()), Some(out_id));
    assert!(block.check_invariants().is_ok());
}

#[test]
fn test_replace_uses() {
    let x = Expr::value("x", f32_type(&[2]));
    let relu = x.unary("relu");
    let mut block = (relu.clone() + relu).build_block(&[x]);
    let x_id = block.input_ids()[0];
    let relu_out = block.operators().next().unwrap().1.output_ids()[0];

    block.replace_uses(relu_out, x_id);
    let (_, add) = block.operators().nth(1).unwrap();
    assert!(add.input_ids().all(|id| id == x_id));
}

#[test]
fn test_captures() {
    let block = block_with_capture();
    assert!(block.check_invariants().is_ok());
    assert_eq!(block.captures().len(), 0);

    let (_, cond) = block.operators().next().unwrap();
    assert_eq!(cond.capture_names(), vec!["x"]);
    let then_block = &cond.blocks()[0];
    assert_eq!(then_block.capture_names().collect::<Vec<_>>(), vec!["x"]);
    let capture_id = then_block.node_id("x").unwrap();
    assert!(then_block.is_capture(capture_id));
    assert!(block.uses_name("then_out"));
}

#[test]
fn test_rename_capture() {
    let mut block = block_with_capture();
    let cond_id = block.op_order()[0];
    let cond = block.op_mut(cond_id).unwrap();
    let mut blocks = cond.take_blocks();
    for child in blocks.iter_mut() {
        child.rename_capture("x", "x_renamed");
    }
    assert_eq!(blocks[0].capture_names().collect::<Vec<_>>(), vec!["x_renamed"]);
    assert_eq!(blocks[0].node_id("x"), None);
    assert!(blocks[0].check_invariants().is_ok());

    // Renaming to an existing capture merges the two.
    let mut merged = blocks[0].clone();
    let extra = merged.add_capture("x2", f32_type(&[2]));
    merged.rename_capture("x2", "x_renamed");
    assert_eq!(merged.captures().len(), 1);
    assert!(merged.node(extra).is_none());
}

#[test]
fn test_scope_env() {
    let block = block_with_capture();
    let (_, cond) = block.operators().next().unwrap();
    let then_block = &cond.blocks()[0];

    let root = ScopeEnv::new(&block);
    let env = root.child(then_block);

    // `x` is a capture placeholder in the child, so lookup skips to the
    // parent's input.
    let node = env.get_node("x").unwrap();
    assert!(node.as_value().is_some());
    assert_eq!(
        block.node_id("x").and_then(|id| block.node(id)).map(|n| n.name()),
        Some(node.name())
    );
    assert!(env.get_node("then_out").is_some());
    assert!(env.get_node("missing").is_none());
    assert!(env.contains_name("pred"));
}

#[test]
fn test_unique_name() {
    let used = ["add", "add_1", "mul"];
    assert_eq!(unique_name("add", |n| used.contains(&n)), "add_2");
    assert_eq!(unique_name("sub", |n| used.contains(&n)), "sub");

    let block = block_with_capture();
    let root = ScopeEnv::new(&block);
    assert_eq!(block.unique_name("then_out", Some(&root)), "then_out_1");
}

#[test]
fn test_op_counts_include_nested_blocks() {
    let block = block_with_capture();
    let counts = block.op_counts();
    assert_eq!(counts.get("cond"), Some(&1));
    assert_eq!(counts.get("relu"), Some(&1));
    assert_eq!(counts.get("exp"), Some(&1));
    assert_eq!(counts.get("const"), None);
}

#[test]
fn test_display() {
    let x = Expr::value("x", f32_type(&[3]));
    let block = x.unary("relu").build_block(&[x]);
    assert_eq!(
        block.to_string(),
        "(x: fp32[3]) {\n  relu_0: fp32[3] = relu(x=x)\n} -> (relu_0)"
    );
}

#[test]
fn test_infer_and_eval_op() {
    let mut block = Block::new();
    let a = block.add_constant("a", Tensor::from(5i32));
    let b = block.add_constant("b", Tensor::from(3i32));
    let c = block.add_value("c", TensorType::scalar(DataType::Int32));
    let op = make_op("add", "c", &[("x", a), ("y", b)], &[c]);

    let types = block
        .infer_op(op.operator(), op.inputs(), op.attrs(), &[], TargetVersion::Ios15)
        .unwrap();
    assert_eq!(types, vec![TensorType::scalar(DataType::Int32)]);

    let op_id = block.add_op(op);
    let values = block.eval_op(op_id, TargetVersion::Ios15).unwrap();
    assert_eq!(values, Some(vec![Tensor::from(8i32)]));
}
