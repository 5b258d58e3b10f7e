#![allow(dead_code)]

use std::sync::Arc;

use anyhow::{anyhow, bail};
use onnxsim::proto::{
    data_type, GraphProto, ModelProto, NodeProto, OperatorSetIdProto, TensorProto, ValueInfoProto,
};
use onnxsim::{ExecutorRegistry, FoldingLog, ModelExecutor, Simplifier};

pub fn model(graph: GraphProto) -> ModelProto {
    ModelProto {
        ir_version: 8,
        opset_import: vec![OperatorSetIdProto {
            domain: String::new(),
            version: 17,
        }],
        producer_name: "onnxsim-tests".to_string(),
        graph: Some(graph),
        ..Default::default()
    }
}

/// `C = A + B; Y = C + X` with `A` and `B` as `[2, 2]` initializers and `X` a runtime input.
pub fn add_chain() -> ModelProto {
    model(GraphProto {
        name: "add_chain".to_string(),
        node: vec![
            NodeProto::new("Add", ["A", "B"], ["C"]).with_name("add_const"),
            NodeProto::new("Add", ["C", "X"], ["Y"]).with_name("add_input"),
        ],
        initializer: vec![
            TensorProto::from_f32("A", vec![2, 2], &[1.0, 2.0, 3.0, 4.0]),
            TensorProto::from_f32("B", vec![2, 2], &[4.0, 3.0, 2.0, 1.0]),
        ],
        input: vec![ValueInfoProto::tensor("X", data_type::FLOAT, &[2, 2])],
        output: vec![ValueInfoProto::tensor("Y", data_type::FLOAT, &[2, 2])],
        ..Default::default()
    })
}

/// Returns a zero tensor shaped like the first input for every graph output.
pub fn zeros_executor() -> Arc<dyn ModelExecutor> {
    Arc::new(
        |model: &ModelProto, inputs: &[TensorProto]| -> anyhow::Result<Vec<TensorProto>> {
            let first = inputs.first().ok_or_else(|| anyhow!("no inputs"))?;
            let graph = model.graph.as_ref().ok_or_else(|| anyhow!("no graph"))?;
            graph
                .output
                .iter()
                .map(|out| {
                    TensorProto::zeros(out.name.clone(), first.data_type, first.dims.clone())
                        .ok_or_else(|| anyhow!("unsupported data type {}", first.data_type))
                })
                .collect()
        },
    )
}

pub fn failing_executor(message: &'static str) -> Arc<dyn ModelExecutor> {
    Arc::new(
        move |_: &ModelProto, _: &[TensorProto]| -> anyhow::Result<Vec<TensorProto>> {
            bail!("{message}")
        },
    )
}

/// Simplifier with private collaborators so tests never share global state.
pub fn simplifier(executor: Option<Arc<dyn ModelExecutor>>) -> Simplifier {
    let registry = match executor {
        Some(executor) => ExecutorRegistry::with_executor(executor),
        None => ExecutorRegistry::new(),
    };
    Simplifier::new(Arc::new(registry), Arc::new(FoldingLog::new()))
}

pub fn op_types(model: &ModelProto) -> Vec<String> {
    model
        .graph
        .as_ref()
        .map(|g| g.node.iter().map(|n| n.op_type.clone()).collect())
        .unwrap_or_default()
}

/// Protobuf writer that builds model bytes without going through `prost`.
#[derive(Default)]
pub struct Wire(Vec<u8>);

impl Wire {
    pub fn new() -> Self {
        Self::default()
    }

    fn varint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.0.push((value as u8) | 0x80);
            value >>= 7;
        }
        self.0.push(value as u8);
    }

    pub fn uint(mut self, field: u64, value: u64) -> Self {
        self.varint(field << 3);
        self.varint(value);
        self
    }

    pub fn bytes(mut self, field: u64, data: &[u8]) -> Self {
        self.varint((field << 3) | 2);
        self.varint(data.len() as u64);
        self.0.extend_from_slice(data);
        self
    }

    pub fn str(self, field: u64, value: &str) -> Self {
        self.bytes(field, value.as_bytes())
    }

    pub fn message(self, field: u64, inner: Wire) -> Self {
        self.bytes(field, &inner.0)
    }

    pub fn finish(self) -> Vec<u8> {
        self.0
    }
}

fn tensor_type(elem_type: u64) -> Wire {
    Wire::new().message(1, Wire::new().uint(1, elem_type))
}

/// `y = Relu(Identity(x))` carrying local functions, training info, a sparse initializer,
/// a quantization annotation, graph metadata, and a sequence-typed input.
pub fn model_with_extensions() -> Vec<u8> {
    let sequence_of_float = Wire::new().message(4, Wire::new().message(1, tensor_type(1)));
    let graph = Wire::new()
        .message(1, Wire::new().str(1, "x").str(2, "a").str(4, "Identity"))
        .message(1, Wire::new().str(1, "a").str(2, "y").str(4, "Relu"))
        .str(2, "extended")
        .message(11, Wire::new().str(1, "x").message(2, tensor_type(1)))
        .message(11, Wire::new().str(1, "s").message(2, sequence_of_float))
        .message(12, Wire::new().str(1, "y"))
        .message(
            14,
            Wire::new()
                .str(1, "y")
                .message(2, Wire::new().str(1, "SCALE_TENSOR").str(2, "y_scale")),
        )
        .message(
            15,
            Wire::new()
                .message(1, Wire::new().uint(2, 1).str(8, "sparse_w"))
                .uint(3, 4),
        )
        .message(16, Wire::new().str(1, "origin").str(2, "wire"));
    let function = Wire::new()
        .str(1, "MyFn")
        .str(4, "in")
        .str(5, "out")
        .message(7, Wire::new().str(1, "in").str(2, "out").str(4, "Neg"))
        .str(10, "local");

    Wire::new()
        .uint(1, 8)
        .message(7, graph)
        .message(8, Wire::new().uint(2, 17))
        .message(20, Wire::new().message(4, Wire::new().str(1, "w").str(2, "w_next")))
        .message(25, function)
        .finish()
}
