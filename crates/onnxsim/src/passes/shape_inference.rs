use std::collections::{HashMap, HashSet};

use crate::error::Result;
use crate::optimizer::{GraphPass, PassResult, SimplifyContext};
use crate::proto::{data_type, GraphProto, NodeProto, ValueInfoProto};

/// Ops whose single output matches the first input's type and shape.
const SAME_SHAPE_OPS: &[&str] = &[
    "Identity", "Relu", "LeakyRelu", "Elu", "Selu", "Gelu", "Sigmoid", "HardSigmoid",
    "HardSwish", "Tanh", "Softplus", "Softsign", "Neg", "Abs", "Exp", "Log", "Sqrt",
    "Reciprocal", "Floor", "Ceil", "Round", "Erf", "Sin", "Cos", "Sign", "Not", "Softmax",
    "LogSoftmax", "Clip", "Dropout",
];

const BROADCAST_OPS: &[&str] = &[
    "Add", "Sub", "Mul", "Div", "Pow", "Mod", "Max", "Min", "Sum", "Mean", "PRelu", "BitShift",
];

const COMPARISON_OPS: &[&str] = &[
    "Equal", "Less", "Greater", "LessOrEqual", "GreaterOrEqual", "And", "Or", "Xor",
];

type TypedShape = (i32, Vec<i64>);

/// Propagates static tensor shapes and records them in `graph.value_info`.
///
/// Graph outputs declared without a type receive the inferred one in place.
///
/// Covers elementwise, broadcasting, comparison, `Cast`, `Where`, `Transpose`, and `MatMul`
/// nodes. Values whose shape cannot be derived are left untouched.
#[derive(Default)]
pub struct ShapeInferencePass;

impl ShapeInferencePass {
    const NAME: &'static str = "shape_inference";
}

impl GraphPass for ShapeInferencePass {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(&self, graph: &mut GraphProto, _cx: &mut SimplifyContext<'_>) -> Result<PassResult> {
        let mut known: HashMap<String, TypedShape> = HashMap::new();
        for info in graph.input.iter().chain(&graph.value_info).chain(&graph.output) {
            if let Some(shape) = info.static_shape() {
                known.insert(info.name.clone(), shape);
            }
        }
        for tensor in &graph.initializer {
            known.insert(tensor.name.clone(), (tensor.data_type, tensor.dims.clone()));
        }

        let mut annotated: HashSet<String> = graph
            .value_info
            .iter()
            .chain(&graph.output)
            .map(|info| info.name.clone())
            .collect();

        let mut added = Vec::new();
        for node in &graph.node {
            let Some(output) = node.output.first().filter(|o| !o.is_empty()) else {
                continue;
            };
            if known.contains_key(output) {
                continue;
            }
            let Some(shape) = infer_node(node, &known) else {
                continue;
            };
            known.insert(output.clone(), shape.clone());
            if annotated.insert(output.clone()) {
                added.push(ValueInfoProto::tensor(output.clone(), shape.0, &shape.1));
            }
        }

        let mut count = added.len();
        graph.value_info.extend(added);
        for output in graph.output.iter_mut().filter(|info| info.r#type.is_none()) {
            if let Some((elem_type, dims)) = known.get(&output.name) {
                output.r#type = ValueInfoProto::tensor(String::new(), *elem_type, dims).r#type;
                count += 1;
            }
        }
        Ok(PassResult {
            changed: count > 0,
            rewrites_applied: count,
            erased_nodes: 0,
            folded_nodes: 0,
        })
    }
}

fn input_shape<'a>(
    node: &NodeProto,
    idx: usize,
    known: &'a HashMap<String, TypedShape>,
) -> Option<&'a TypedShape> {
    let name = node.input.get(idx).filter(|n| !n.is_empty())?;
    known.get(name)
}

fn infer_node(node: &NodeProto, known: &HashMap<String, TypedShape>) -> Option<TypedShape> {
    if !node.is_default_domain() {
        return None;
    }
    let op = node.op_type.as_str();
    if SAME_SHAPE_OPS.contains(&op) {
        return input_shape(node, 0, known).cloned();
    }
    if BROADCAST_OPS.contains(&op) || COMPARISON_OPS.contains(&op) {
        let elem_type = if COMPARISON_OPS.contains(&op) {
            data_type::BOOL
        } else {
            input_shape(node, 0, known)?.0
        };
        let dims = broadcast_all((0..node.input.len()).map(|i| input_shape(node, i, known)))?;
        return Some((elem_type, dims));
    }
    match op {
        "Cast" => {
            let (_, dims) = input_shape(node, 0, known)?;
            let to = node.attribute("to")?.i;
            Some((i32::try_from(to).ok()?, dims.clone()))
        }
        "Where" => {
            let elem_type = input_shape(node, 1, known)?.0;
            let dims = broadcast_all((0..3).map(|i| input_shape(node, i, known)))?;
            Some((elem_type, dims))
        }
        "Transpose" => {
            let (elem_type, dims) = input_shape(node, 0, known)?;
            let perm: Vec<i64> = match node.attribute("perm") {
                Some(attr) => attr.ints.clone(),
                None => (0..dims.len() as i64).rev().collect(),
            };
            if perm.len() != dims.len() {
                return None;
            }
            let permuted = perm
                .iter()
                .map(|p| usize::try_from(*p).ok().and_then(|p| dims.get(p).copied()))
                .collect::<Option<Vec<_>>>()?;
            Some((*elem_type, permuted))
        }
        "MatMul" => {
            let (elem_type, a) = input_shape(node, 0, known)?;
            let (_, b) = input_shape(node, 1, known)?;
            Some((*elem_type, matmul_dims(a, b)?))
        }
        _ => None,
    }
}

fn broadcast_all<'a, I>(shapes: I) -> Option<Vec<i64>>
where
    I: IntoIterator<Item = Option<&'a TypedShape>>,
{
    let mut result: Vec<i64> = Vec::new();
    for shape in shapes {
        result = broadcast(&result, &shape?.1)?;
    }
    Some(result)
}

/// Multidirectional (numpy-style) broadcast of two static shapes.
fn broadcast(a: &[i64], b: &[i64]) -> Option<Vec<i64>> {
    let rank = a.len().max(b.len());
    let mut out = vec![0i64; rank];
    for i in 0..rank {
        let da = if i < rank - a.len() { 1 } else { a[i - (rank - a.len())] };
        let db = if i < rank - b.len() { 1 } else { b[i - (rank - b.len())] };
        out[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return None,
        };
    }
    Some(out)
}

fn matmul_dims(a: &[i64], b: &[i64]) -> Option<Vec<i64>> {
    if a.is_empty() || b.is_empty() {
        return None;
    }
    let a2: Vec<i64> = if a.len() == 1 { vec![1, a[0]] } else { a.to_vec() };
    let b2: Vec<i64> = if b.len() == 1 { vec![b[0], 1] } else { b.to_vec() };
    let (m, k) = (a2[a2.len() - 2], a2[a2.len() - 1]);
    let (kb, n) = (b2[b2.len() - 2], b2[b2.len() - 1]);
    if k != kb {
        return None;
    }
    let mut dims = broadcast(&a2[..a2.len() - 2], &b2[..b2.len() - 2])?;
    if a.len() > 1 {
        dims.push(m);
    }
    if b.len() > 1 {
        dims.push(n);
    }
    Some(dims)
}
