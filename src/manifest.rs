//! Human-readable summary of a compiled program.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::graph::NamedType;
use crate::program::{FlexibleShape, Function, Program};
use crate::types::Dimension;

/// JSON manifest listing the interface of each function in a program.
///
/// The manifest accompanies a serialized program. It records the declared
/// inputs and outputs of each function with their types, plus the number of
/// operations of each kind, which tests use to check which fusions were
/// applied.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub spec_version: u32,

    /// Name of the target runtime, eg. "iOS17".
    pub target: String,
    pub functions: BTreeMap<String, FunctionManifest>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionManifest {
    pub inputs: Vec<ValueManifest>,
    pub outputs: Vec<ValueManifest>,

    /// Count of operations by kind, including nested blocks. Constants are
    /// counted as `const`.
    pub op_counts: BTreeMap<String, usize>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValueManifest {
    pub name: String,

    /// Element type name, eg. "fp32".
    pub dtype: String,
    pub shape: Vec<DimManifest>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flexible_shape: Option<FlexibleShapeManifest>,
}

/// A fixed size or a symbol name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DimManifest {
    Fixed(usize),
    Symbolic(String),
}

impl From<&Dimension> for DimManifest {
    fn from(dim: &Dimension) -> Self {
        match dim {
            Dimension::Fixed(size) => DimManifest::Fixed(*size),
            Dimension::Symbolic(name) => DimManifest::Symbolic(name.clone()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RangeManifest {
    pub dim: usize,
    pub lower: usize,

    /// Upper bound, or `None` if unbounded.
    pub upper: Option<usize>,
    pub default: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlexibleShapeManifest {
    Ranges { ranges: Vec<RangeManifest> },
    Enumerated { shapes: Vec<Vec<usize>>, default: usize },
}

impl From<&FlexibleShape> for FlexibleShapeManifest {
    fn from(shape: &FlexibleShape) -> Self {
        match shape {
            FlexibleShape::Ranges(ranges) => FlexibleShapeManifest::Ranges {
                ranges: ranges
                    .iter()
                    .map(|(&dim, range)| RangeManifest {
                        dim,
                        lower: range.lower,
                        upper: range.upper,
                        default: range.default,
                    })
                    .collect(),
            },
            FlexibleShape::Enumerated { shapes, default } => FlexibleShapeManifest::Enumerated {
                shapes: shapes.clone(),
                default: *default,
            },
        }
    }
}

fn value_manifest(value: &NamedType, flexible_shape: Option<&FlexibleShape>) -> ValueManifest {
    ValueManifest {
        name: value.name.clone(),
        dtype: value.ty.dtype().name().to_string(),
        shape: value.ty.shape().iter().map(DimManifest::from).collect(),
        flexible_shape: flexible_shape.map(FlexibleShapeManifest::from),
    }
}

impl FunctionManifest {
    fn new(function: &Function) -> Self {
        let block = function.block();
        let signature = block.signature();
        FunctionManifest {
            inputs: signature
                .inputs
                .iter()
                .map(|input| value_manifest(input, function.input_shapes().get(&input.name)))
                .collect(),
            outputs: signature
                .outputs
                .iter()
                .map(|output| value_manifest(output, None))
                .collect(),
            op_counts: block
                .op_counts()
                .into_iter()
                .map(|(kind, count)| (kind.to_string(), count))
                .collect(),
        }
    }
}

impl Manifest {
    pub fn new(program: &Program) -> Manifest {
        Manifest {
            spec_version: program.target().spec_version(),
            target: program.target().name().to_string(),
            functions: program
                .functions()
                .map(|(name, function)| (name.to_string(), FunctionManifest::new(function)))
                .collect(),
        }
    }

    /// Return the number of operations of a given kind in a function.
    pub fn op_count(&self, function: &str, kind: &str) -> usize {
        self.functions
            .get(function)
            .and_then(|f| f.op_counts.get(kind))
            .copied()
            .unwrap_or(0)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("manifest should be serializable")
    }

    pub fn from_json(json: &str) -> Result<Manifest, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::Value;

    use super::{DimManifest, FlexibleShapeManifest, Manifest};
    use crate::optimize::GraphOptimizer;
    use crate::program::{FlexibleShape, OpCall, ProgramBuilder, RangeDim};
    use crate::target::TargetVersion;
    use crate::types::{DataType, TensorType};

    fn silu_program() -> crate::program::Program {
        let mut pb = ProgramBuilder::new(TargetVersion::Ios18);
        let handle = pb
            .begin_block(&[(
                "x",
                TensorType::new(DataType::Float32, dims!["batch", 8]),
            )])
            .unwrap();
        let x = handle.input(0).unwrap().clone();
        let sigmoid = pb.add_op(OpCall::new("sigmoid").input("x", &x)).unwrap();
        let out = pb
            .add_op(
                OpCall::new("mul")
                    .input("x", &x)
                    .input("y", &sigmoid[0])
                    .output_names(&["y"]),
            )
            .unwrap();
        let block = pb.end_block(handle, &out).unwrap();
        let shapes = BTreeMap::from([(
            "x".to_string(),
            FlexibleShape::Ranges(BTreeMap::from([(0, RangeDim::new(1, Some(64), 1))])),
        )]);
        pb.add_function_with_shapes("main", block, shapes).unwrap();
        pb.finish().unwrap()
    }

    #[test]
    fn test_manifest() {
        let program = GraphOptimizer::new().optimize(silu_program()).unwrap();
        let manifest = Manifest::new(&program);

        assert_eq!(manifest.spec_version, 9);
        assert_eq!(manifest.target, "iOS18");
        assert_eq!(manifest.op_count("main", "silu"), 1);
        assert_eq!(manifest.op_count("main", "sigmoid"), 0);
        assert_eq!(manifest.op_count("missing", "silu"), 0);

        let main = &manifest.functions["main"];
        assert_eq!(main.inputs[0].name, "x");
        assert_eq!(main.inputs[0].dtype, "fp32");
        assert_eq!(
            main.inputs[0].shape,
            [DimManifest::Symbolic("batch".into()), DimManifest::Fixed(8)]
        );
        match &main.inputs[0].flexible_shape {
            Some(FlexibleShapeManifest::Ranges { ranges }) => {
                assert_eq!(ranges.len(), 1);
                assert_eq!(ranges[0].upper, Some(64));
            }
            other => panic!("unexpected flexible shape {:?}", other),
        }
        assert_eq!(main.outputs[0].name, "y");
        assert!(main.outputs[0].flexible_shape.is_none());
    }

    #[test]
    fn test_manifest_json() {
        let manifest = Manifest::new(&silu_program());
        let json = manifest.to_json();

        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["spec_version"], 9);
        let input = &value["functions"]["main"]["inputs"][0];
        assert_eq!(input["shape"], serde_json::json!(["batch", 8]));
        assert_eq!(input["flexible_shape"]["kind"], "ranges");
        assert_eq!(value["functions"]["main"]["op_counts"]["sigmoid"], 1);
        assert!(value["functions"]["main"]["outputs"][0]
            .get("flexible_shape")
            .is_none());

        assert_eq!(Manifest::from_json(&json).unwrap(), manifest);
    }
}
