use std::collections::BTreeMap;

use milc_model_file::header::Header;
use milc_model_file::schema as sg;
use milc_model_file::Message;
use milc_testing::{init_logging, TestCases};
use proptest::prelude::*;

use super::{LoadErrorKind, Model};
use crate::model_builder::serialize_program;
use crate::optimize::GraphOptimizer;
use crate::program::{FlexibleShape, OpCall, Program, ProgramBuilder, RangeDim};
use crate::target::TargetVersion;
use crate::types::{DataType, TensorType};
use crate::value::Tensor;

fn f32_type(shape: Vec<crate::Dimension>) -> TensorType {
    TensorType::new(DataType::Float32, shape)
}

/// Build a program which exercises flexible shapes, variadic inputs,
/// attributes of several kinds, constants and control flow.
fn build_program() -> Program {
    let mut pb = ProgramBuilder::new(TargetVersion::Ios17);

    let main = pb
        .begin_block(&[
            ("x", f32_type(dims!["batch", 4])),
            ("pred", TensorType::scalar(DataType::Bool)),
        ])
        .unwrap();
    let x = main.input(0).unwrap().clone();
    let pred = main.input(1).unwrap().clone();

    let two = pb.add_const(2.0f32).unwrap();
    let w = pb
        .constant("w", Tensor::from_vec(&[4], vec![0.5f32, 1., 1.5, 2.]).unwrap())
        .unwrap();
    let scaled = pb
        .add_op(OpCall::new("mul").input("x", &x).input("y", &two))
        .unwrap();
    let a = pb
        .add_op(OpCall::new("add").input("x", &scaled[0]).input("y", &w))
        .unwrap();
    let b = pb
        .add_op(OpCall::new("add").input("x", &x).input("y", &w))
        .unwrap();
    let joined = pb
        .add_op(
            OpCall::new("concat")
                .inputs("values", [&a[0], &b[0]])
                .attr("axis", -1i64),
        )
        .unwrap();

    let then_handle = pb.begin_block(&[]).unwrap();
    let then_out = pb
        .add_op(OpCall::new("relu").input("x", &joined[0]))
        .unwrap();
    let then_block = pb.end_block(then_handle, &then_out).unwrap();
    let else_handle = pb.begin_block(&[]).unwrap();
    let else_out = pb
        .add_op(OpCall::new("exp").input("x", &joined[0]))
        .unwrap();
    let else_block = pb.end_block(else_handle, &else_out).unwrap();

    let selected = pb
        .add_op(
            OpCall::new("cond")
                .input("pred", &pred)
                .block(then_block)
                .block(else_block)
                .output_names(&["selected"]),
        )
        .unwrap();
    let total = pb
        .add_op(
            OpCall::new("reduce_sum")
                .input("x", &selected[0])
                .attr("axes", vec![-1i64])
                .attr("keep_dims", false)
                .output_names(&["total"]),
        )
        .unwrap();
    let outputs = [selected[0].clone(), total[0].clone()];
    let main = pb.end_block(main, &outputs).unwrap();

    let shapes = BTreeMap::from([(
        "x".to_string(),
        FlexibleShape::Ranges(BTreeMap::from([(0, RangeDim::new(1, None, 1))])),
    )]);
    pb.add_function_with_shapes("main", main, shapes).unwrap();

    let helper = pb
        .begin_block(&[("h", TensorType::fixed(DataType::Float32, &[3]))])
        .unwrap();
    let h = helper.input(0).unwrap().clone();
    let gelu = pb
        .add_op(OpCall::new("gelu").input("x", &h).attr("mode", "TANH_APPROXIMATION"))
        .unwrap();
    let helper = pb.end_block(helper, &gelu).unwrap();
    let shapes = BTreeMap::from([(
        "h".to_string(),
        FlexibleShape::Enumerated {
            shapes: vec![vec![3]],
            default: 0,
        },
    )]);
    pb.add_function_with_shapes("helper", helper, shapes).unwrap();

    pb.finish().unwrap()
}

fn decode(data: &[u8]) -> sg::Program {
    let header = Header::from_buf(data).unwrap();
    sg::Program::decode(header.payload(data)).unwrap()
}

fn encode(program: &sg::Program) -> Vec<u8> {
    let payload = program.encode_to_vec();
    let mut buf = Header::new(program.spec_version, payload.len() as u64).to_buf();
    buf.extend(payload);
    buf
}

fn main_block(program: &mut sg::Program) -> &mut sg::Block {
    program
        .functions
        .iter_mut()
        .find(|f| f.name == "main")
        .and_then(|f| f.block.as_mut())
        .unwrap()
}

#[test]
fn test_round_trip() {
    init_logging();
    let program = build_program();
    let data = serialize_program(&program);

    let model = Model::load(&data).unwrap();
    assert_eq!(model.spec_version(), TargetVersion::Ios17.spec_version());
    let loaded = model.program();
    assert_eq!(loaded.target(), TargetVersion::Ios17);
    assert_eq!(loaded.op_counts(), program.op_counts());

    for (name, function) in program.functions() {
        let loaded_fn = loaded.function(name).unwrap();
        assert_eq!(loaded_fn.block().signature(), function.block().signature());
        assert_eq!(loaded_fn.input_shapes(), function.input_shapes());
    }

    assert_eq!(serialize_program(loaded), data);
}

#[test]
fn test_round_trip_optimized_program() {
    let program = GraphOptimizer::new().optimize(build_program()).unwrap();
    let data = serialize_program(&program);
    let loaded = Model::load(&data).unwrap().into_program();
    assert_eq!(serialize_program(&loaded), data);
}

#[test]
fn test_serialized_layout() {
    let program = build_program();
    let data = serialize_program(&program);
    let header = Header::from_buf(&data).unwrap();
    assert_eq!(header.spec_version, 8);
    assert_eq!(header.model_offset, Header::LEN as u64);

    let mut proto = decode(&data);
    let names: Vec<&str> = proto.functions.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["helper", "main"]);

    let block = main_block(&mut proto);

    // `w` has two consumers so it is written as an operation. The scalar
    // `2.0` is inlined into the `mul`.
    let consts: Vec<&str> = block
        .operations
        .iter()
        .filter(|op| op.kind == "const")
        .map(|op| op.name.as_str())
        .collect();
    assert_eq!(consts, ["w"]);
    let mul = block.operations.iter().find(|op| op.kind == "mul").unwrap();
    assert!(matches!(
        mul.inputs[1].bindings[0].value,
        Some(sg::binding::Value::Constant(_))
    ));

    let concat = block.operations.iter().find(|op| op.kind == "concat").unwrap();
    assert_eq!(concat.inputs.len(), 1);
    assert_eq!(concat.inputs[0].bindings.len(), 2);

    let cond = block.operations.iter().find(|op| op.kind == "cond").unwrap();
    assert_eq!(cond.blocks.len(), 2);
    assert_eq!(cond.min_spec_version, TargetVersion::Ios15.spec_version());

    let outputs: Vec<(&str, &str)> = block
        .outputs
        .iter()
        .map(|o| (o.name.as_str(), o.value.as_str()))
        .collect();
    assert_eq!(outputs, [("selected", "selected"), ("total", "total")]);
}

#[test]
fn test_generated_names_avoid_declared_names() {
    let mut pb = ProgramBuilder::new(TargetVersion::Ios16);
    let handle = pb
        .begin_block(&[("x", TensorType::fixed(DataType::Float32, &[2]))])
        .unwrap();
    let x = handle.input(0).unwrap().clone();
    let k = pb.constant("k", 3.0f32).unwrap();
    let m = pb
        .add_op(OpCall::new("mul").input("x", &x).input("y", &k).output_names(&["m"]))
        .unwrap();
    let out = pb
        .add_op(OpCall::new("relu").input("x", &m[0]).output_names(&["const_0"]))
        .unwrap();
    let block = pb.end_block(handle, &out).unwrap();
    pb.add_function("main", block).unwrap();
    let program = pb.finish().unwrap();

    let data = serialize_program(&program);
    let loaded = Model::load(&data).unwrap().into_program();
    let block = loaded.function("main").unwrap().block();
    assert!(block.node_id("const_0").is_some());
    assert_eq!(serialize_program(&loaded), data);
}

#[test]
fn test_load_errors() {
    #[derive(Debug)]
    struct Case {
        data: Vec<u8>,
        expected: LoadErrorKind,
        node: Option<&'static str>,
    }

    let valid = serialize_program(&build_program());

    let mut version_mismatch = valid.clone();
    version_mismatch[8..12].copy_from_slice(&7u32.to_le_bytes());

    let unsupported = encode(&sg::Program {
        spec_version: 99,
        functions: Vec::new(),
    });

    let mut wrong_type = decode(&valid);
    let total = main_block(&mut wrong_type)
        .operations
        .iter_mut()
        .find(|op| op.name == "total")
        .unwrap();
    if let Some(ty) = total.outputs[0].r#type.as_mut() {
        ty.dtype = sg::DataType::Int32 as i32;
    }

    let mut unknown_op = decode(&valid);
    let total = main_block(&mut unknown_op)
        .operations
        .iter_mut()
        .find(|op| op.name == "total")
        .unwrap();
    total.kind = "frobnicate".to_string();

    let mut wrong_version = decode(&valid);
    let cond = main_block(&mut wrong_version)
        .operations
        .iter_mut()
        .find(|op| op.kind == "cond")
        .unwrap();
    cond.min_spec_version = 10;

    let mut truncated = valid.clone();
    truncated.truncate(Header::LEN + 4);
    let mut bad_payload = Header::new(8, 4).to_buf();
    bad_payload.extend([0xff; 4]);

    let cases = [
        Case {
            data: b"not a program".to_vec(),
            expected: LoadErrorKind::ParseError,
            node: None,
        },
        Case {
            data: truncated,
            expected: LoadErrorKind::ParseError,
            node: None,
        },
        Case {
            data: bad_payload,
            expected: LoadErrorKind::ParseError,
            node: None,
        },
        Case {
            data: version_mismatch,
            expected: LoadErrorKind::VersionError,
            node: None,
        },
        Case {
            data: unsupported,
            expected: LoadErrorKind::VersionError,
            node: None,
        },
        Case {
            data: encode(&wrong_type),
            expected: LoadErrorKind::GraphError,
            node: Some("total"),
        },
        Case {
            data: encode(&unknown_op),
            expected: LoadErrorKind::OperatorInvalid,
            node: Some("total"),
        },
        Case {
            data: encode(&wrong_version),
            expected: LoadErrorKind::OperatorInvalid,
            node: Some("selected"),
        },
    ];

    cases.test_each(|case| {
        let err = Model::load(&case.data).err().expect("load should fail");
        assert_eq!(err.kind(), case.expected, "error: {}", err);
        assert_eq!(err.node(), case.node);
    })
}

#[test]
fn test_load_file_missing() {
    let err = Model::load_file("/nonexistent/program.milc").err().unwrap();
    assert_eq!(err.kind(), LoadErrorKind::IoError);
}

/// Op applied in a generated elementwise chain.
#[derive(Clone, Debug)]
enum ChainOp {
    Unary(&'static str),
    Binary(&'static str, f32),
}

fn chain_op() -> impl Strategy<Value = ChainOp> {
    prop_oneof![
        prop::sample::select(vec!["relu", "exp", "tanh", "sigmoid", "abs", "neg"])
            .prop_map(ChainOp::Unary),
        (
            prop::sample::select(vec!["add", "mul", "sub"]),
            -4.0f32..4.0
        )
            .prop_map(|(kind, scalar)| ChainOp::Binary(kind, scalar)),
    ]
}

fn build_chain(ops: &[ChainOp], target: TargetVersion) -> Program {
    let mut pb = ProgramBuilder::new(target);
    let handle = pb
        .begin_block(&[("x", TensorType::fixed(DataType::Float32, &[2, 3]))])
        .unwrap();
    let mut value = handle.input(0).unwrap().clone();
    for op in ops {
        let call = match op {
            ChainOp::Unary(kind) => OpCall::new(kind).input("x", &value),
            ChainOp::Binary(kind, scalar) => {
                let rhs = pb.add_const(*scalar).unwrap();
                OpCall::new(kind).input("x", &value).input("y", &rhs)
            }
        };
        value = pb.add_op(call).unwrap().remove(0);
    }
    let block = pb.end_block(handle, &[value]).unwrap();
    pb.add_function("main", block).unwrap();
    pb.finish().unwrap()
}

proptest! {
    #[test]
    fn test_round_trip_chains(
        ops in proptest::collection::vec(chain_op(), 1..8),
        target in prop::sample::select(TargetVersion::ALL.to_vec()),
    ) {
        let program = build_chain(&ops, target);
        let data = serialize_program(&program);
        let loaded = Model::load(&data).unwrap().into_program();

        prop_assert_eq!(loaded.target(), target);
        prop_assert_eq!(loaded.op_counts(), program.op_counts());
        prop_assert_eq!(serialize_program(&loaded), data);
    }
}
