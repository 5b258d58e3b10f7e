use std::collections::HashMap;

use crate::error::{Result, SimplifyError};
use crate::executor::ExecutorError;
use crate::folding::FoldedOp;
use crate::graph::prune_value_info;
use crate::optimizer::{GraphPass, PassResult, SimplifyContext};
use crate::options::SimplifyOptions;
use crate::proto::{
    data_type, element_count, GraphProto, ModelProto, NodeProto, TensorProto, ValueInfoProto,
};

/// Ops whose results differ between runs; folding them would freeze one sample.
const NON_DETERMINISTIC_OPS: &[&str] = &[
    "RandomNormal",
    "RandomNormalLike",
    "RandomUniform",
    "RandomUniformLike",
    "Multinomial",
    "Bernoulli",
];

const CONTROL_FLOW_OPS: &[&str] = &["If", "Loop", "Scan"];

/// Replaces nodes whose inputs are all initializers with the tensors the registered
/// executor computes for them.
///
/// Every executor call is recorded in the folding log. `Constant` nodes become initializers
/// directly without going through the executor. A node whose declared output shape is above
/// `tensor_size_threshold` is recorded as skipped and never executed.
#[derive(Default)]
pub struct ConstantFoldingPass;

impl ConstantFoldingPass {
    const NAME: &'static str = "constant_folding";
}

enum FoldOutcome {
    Folded(Vec<TensorProto>),
    Failed(String),
}

impl GraphPass for ConstantFoldingPass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut GraphProto, cx: &mut SimplifyContext<'_>) -> Result<PassResult> {
        let lowered = lower_constant_nodes(graph);

        // Initializers redeclared as graph inputs can be overridden at runtime.
        let mut constants: HashMap<String, usize> = HashMap::new();
        for (idx, tensor) in graph.initializer.iter().enumerate() {
            if !graph.input.iter().any(|info| info.name == tensor.name) {
                constants.insert(tensor.name.clone(), idx);
            }
        }

        let mut folded = 0usize;
        let mut idx = 0usize;
        while idx < graph.node.len() {
            let node = &graph.node[idx];
            if !is_foldable(node, &constants) {
                idx += 1;
                continue;
            }
            let key = fold_key(node);
            if cx.is_failed_fold(&key) {
                idx += 1;
                continue;
            }

            match fold_node(graph, node, &constants, cx)? {
                FoldOutcome::Folded(tensors) => {
                    let node = graph.node.remove(idx);
                    tracing::debug!(
                        op_type = %node.op_type,
                        name = %node.name,
                        outputs = tensors.len(),
                        "folded node"
                    );
                    cx.record_fold(FoldedOp::succeeded(
                        node.op_type,
                        node.name,
                        node.input,
                        node.output,
                    ));
                    for tensor in tensors {
                        constants.insert(tensor.name.clone(), graph.initializer.len());
                        graph.initializer.push(tensor);
                    }
                    folded += 1;
                }
                FoldOutcome::Failed(message) => {
                    tracing::debug!(
                        op_type = %node.op_type,
                        name = %node.name,
                        error = %message,
                        "constant folding failed"
                    );
                    cx.record_fold(FoldedOp::failed(
                        node.op_type.clone(),
                        node.name.clone(),
                        node.input.clone(),
                        node.output.clone(),
                        message,
                    ));
                    cx.mark_failed_fold(key);
                    idx += 1;
                }
            }
        }

        if folded > 0 || lowered > 0 {
            prune_value_info(graph);
        }
        Ok(PassResult {
            changed: folded + lowered > 0,
            rewrites_applied: folded + lowered,
            erased_nodes: folded + lowered,
            folded_nodes: folded,
        })
    }
}

fn fold_key(node: &NodeProto) -> String {
    node.output
        .iter()
        .find(|name| !name.is_empty())
        .cloned()
        .unwrap_or_else(|| node.name.clone())
}

fn is_foldable(node: &NodeProto, constants: &HashMap<String, usize>) -> bool {
    node.is_default_domain()
        && node.op_type != "Constant"
        && !NON_DETERMINISTIC_OPS.contains(&node.op_type.as_str())
        && !CONTROL_FLOW_OPS.contains(&node.op_type.as_str())
        && !node.attribute.iter().any(|attr| attr.has_subgraph())
        && node.output.iter().any(|name| !name.is_empty())
        && node
            .input
            .iter()
            .filter(|name| !name.is_empty())
            .all(|name| constants.contains_key(name))
}

fn fold_node(
    graph: &GraphProto,
    node: &NodeProto,
    constants: &HashMap<String, usize>,
    cx: &SimplifyContext<'_>,
) -> Result<FoldOutcome> {
    let mut input_names: Vec<&str> = Vec::new();
    for name in node.input.iter().filter(|name| !name.is_empty()) {
        if !input_names.contains(&name.as_str()) {
            input_names.push(name);
        }
    }
    let inputs: Vec<TensorProto> = input_names
        .iter()
        .map(|name| graph.initializer[constants[*name]].clone())
        .collect();
    let output_names: Vec<&String> = node.output.iter().filter(|n| !n.is_empty()).collect();

    let options = cx.options();
    for name in &output_names {
        let declared = declared_output(graph, name).and_then(ValueInfoProto::static_shape);
        let Some(elements) = declared.and_then(|(_, dims)| element_count(&dims)) else {
            continue;
        };
        if !options.within_size_threshold(elements) {
            return Ok(FoldOutcome::Failed(oversized_message(name, elements, options)));
        }
    }

    let model = single_node_model(graph, node, &inputs, &output_names, cx);
    let mut tensors = match cx.executor().run(&model, &inputs) {
        Ok(tensors) => tensors,
        Err(ExecutorError::NoExecutorBound) => return Err(SimplifyError::NoExecutorBound),
        Err(ExecutorError::Execution(err)) => return Ok(FoldOutcome::Failed(format!("{err:#}"))),
    };

    if tensors.len() != output_names.len() {
        return Ok(FoldOutcome::Failed(format!(
            "executor returned {} tensors for {} outputs",
            tensors.len(),
            output_names.len()
        )));
    }

    for (tensor, name) in tensors.iter_mut().zip(output_names) {
        tensor.name = name.clone();
        let Some(elements) = tensor.element_count() else {
            return Ok(FoldOutcome::Failed(format!(
                "executor produced invalid dims {:?} for '{name}'",
                tensor.dims
            )));
        };
        if !options.within_size_threshold(elements) {
            return Ok(FoldOutcome::Failed(oversized_message(name, elements, options)));
        }
    }
    Ok(FoldOutcome::Folded(tensors))
}

fn oversized_message(name: &str, elements: usize, options: &SimplifyOptions) -> String {
    format!(
        "skipped: '{name}' has {elements} elements, above tensor_size_threshold {}",
        options.tensor_size_threshold
    )
}

fn declared_output<'g>(graph: &'g GraphProto, name: &str) -> Option<&'g ValueInfoProto> {
    graph
        .value_info
        .iter()
        .chain(graph.output.iter())
        .find(|info| info.name == name)
}

fn single_node_model(
    graph: &GraphProto,
    node: &NodeProto,
    inputs: &[TensorProto],
    output_names: &[&String],
    cx: &SimplifyContext<'_>,
) -> ModelProto {
    let outputs = output_names
        .iter()
        .map(|name| {
            declared_output(graph, name)
                .cloned()
                .unwrap_or_else(|| ValueInfoProto::named(name.as_str()))
        })
        .collect();

    ModelProto {
        ir_version: cx.ir_version(),
        opset_import: cx.opset_import().to_vec(),
        producer_name: "onnxsim".to_string(),
        graph: Some(GraphProto {
            name: "constant_folding".to_string(),
            node: vec![node.clone()],
            input: inputs.iter().map(TensorProto::value_info).collect(),
            output: outputs,
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Turns `Constant` nodes into initializers. Returns the number of nodes lowered.
fn lower_constant_nodes(graph: &mut GraphProto) -> usize {
    let mut lowered = 0usize;
    let mut idx = 0usize;
    while idx < graph.node.len() {
        let node = &graph.node[idx];
        let tensor = (node.op_type == "Constant"
            && node.is_default_domain()
            && node.output.len() == 1)
            .then(|| constant_value(node))
            .flatten();
        match tensor {
            Some(tensor) => {
                graph.node.remove(idx);
                graph.initializer.push(tensor);
                lowered += 1;
            }
            None => idx += 1,
        }
    }
    lowered
}

fn constant_value(node: &NodeProto) -> Option<TensorProto> {
    let name = node.output[0].clone();
    let attr = node.attribute.first()?;
    let tensor = match attr.name.as_str() {
        "value" => {
            let mut tensor = attr.t.clone()?;
            tensor.name = name;
            tensor
        }
        "value_float" => TensorProto::from_f32(name, vec![], &[attr.f]),
        "value_floats" => TensorProto::from_f32(name, vec![attr.floats.len() as i64], &attr.floats),
        "value_int" => int64_tensor(name, vec![], &[attr.i]),
        "value_ints" => int64_tensor(name, vec![attr.ints.len() as i64], &attr.ints),
        _ => return None,
    };
    Some(tensor)
}

fn int64_tensor(name: String, dims: Vec<i64>, values: &[i64]) -> TensorProto {
    TensorProto {
        name,
        dims,
        data_type: data_type::INT64,
        raw_data: values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        ..Default::default()
    }
}
