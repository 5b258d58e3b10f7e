use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;
use std::slice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;

use onnxsim::proto::{
    data_type, encode_model, GraphProto, ModelProto, NodeProto, OperatorSetIdProto, TensorProto,
    ValueInfoProto,
};
use onnxsim_ffi::*;
use prost::Message;

// Serializes tests that touch the process-wide executor or folding log.
static GLOBAL_STATE: Mutex<()> = Mutex::new(());

fn lock_globals() -> MutexGuard<'static, ()> {
    GLOBAL_STATE.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn last_error() -> Option<String> {
    let message = onnxsim_get_last_error();
    if message.is_null() {
        None
    } else {
        Some(unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned())
    }
}

fn model(graph: GraphProto) -> ModelProto {
    ModelProto {
        ir_version: 8,
        opset_import: vec![OperatorSetIdProto {
            domain: String::new(),
            version: 17,
        }],
        graph: Some(graph),
        ..Default::default()
    }
}

fn identity_model() -> Vec<u8> {
    encode_model(&model(GraphProto {
        node: vec![
            NodeProto::new("Identity", ["x"], ["a"]),
            NodeProto::new("Relu", ["a"], ["y"]),
        ],
        input: vec![ValueInfoProto::tensor("x", data_type::FLOAT, &[4])],
        output: vec![ValueInfoProto::named("y")],
        ..Default::default()
    }))
    .unwrap()
}

fn add_chain() -> Vec<u8> {
    encode_model(&model(GraphProto {
        node: vec![
            NodeProto::new("Add", ["A", "B"], ["C"]).with_name("add_const"),
            NodeProto::new("Add", ["C", "X"], ["Y"]).with_name("add_input"),
        ],
        initializer: vec![
            TensorProto::from_f32("A", vec![2, 2], &[1.0; 4]),
            TensorProto::from_f32("B", vec![2, 2], &[2.0; 4]),
        ],
        input: vec![ValueInfoProto::tensor("X", data_type::FLOAT, &[2, 2])],
        output: vec![ValueInfoProto::named("Y")],
        ..Default::default()
    }))
    .unwrap()
}

/// Calls `onnxsim_simplify_bytes` with no skip list and copies out the result.
fn simplify(bytes: &[u8], constant_folding: c_int) -> Result<Vec<u8>, OnnxSimStatus> {
    let mut out: *mut u8 = ptr::null_mut();
    let mut out_len = 0usize;
    let status = unsafe {
        onnxsim_simplify_bytes(
            bytes.as_ptr(),
            bytes.len(),
            ptr::null(),
            0,
            constant_folding,
            0,
            0,
            &mut out,
            &mut out_len,
        )
    };
    if status != OnnxSimStatus::Success {
        return Err(status);
    }
    let output = unsafe { slice::from_raw_parts(out, out_len) }.to_vec();
    unsafe { onnxsim_release_buffer(out) };
    Ok(output)
}

fn op_types(bytes: &[u8]) -> Vec<String> {
    let model = ModelProto::decode(bytes).unwrap();
    model
        .graph
        .unwrap()
        .node
        .into_iter()
        .map(|node| node.op_type)
        .collect()
}

#[test]
fn null_model_is_invalid_argument_and_leaves_log_untouched() {
    let _globals = lock_globals();
    let before = onnxsim::folding_record();
    let mut out: *mut u8 = ptr::null_mut();
    let mut out_len = 0usize;
    let status = unsafe {
        onnxsim_simplify_bytes(
            ptr::null(),
            16,
            ptr::null(),
            0,
            1,
            1,
            0,
            &mut out,
            &mut out_len,
        )
    };
    assert_eq!(status, OnnxSimStatus::InvalidArgument);
    assert!(out.is_null());
    assert!(last_error().unwrap().contains("model_bytes cannot be NULL"));
    assert_eq!(onnxsim::folding_record(), before);
}

#[test]
fn null_out_pointers_are_invalid_argument() {
    let bytes = identity_model();
    let status = unsafe {
        onnxsim_simplify_bytes(
            bytes.as_ptr(),
            bytes.len(),
            ptr::null(),
            0,
            0,
            0,
            0,
            ptr::null_mut(),
            ptr::null_mut(),
        )
    };
    assert_eq!(status, OnnxSimStatus::InvalidArgument);
}

#[test]
fn garbage_bytes_fail_to_parse() {
    let status = simplify(b"\x0a\xff\xff\xff\xff\x0f", 0).unwrap_err();
    assert_eq!(status, OnnxSimStatus::ParseFailed);
    assert!(last_error().unwrap().contains("parse"));
}

#[test]
fn model_without_graph_is_simplification_failure() {
    let bytes = encode_model(&ModelProto {
        ir_version: 8,
        ..Default::default()
    })
    .unwrap();
    assert_eq!(
        simplify(&bytes, 0).unwrap_err(),
        OnnxSimStatus::SimplificationFailed
    );
}

#[test]
fn simplifies_and_releases_buffer() {
    let output = simplify(&identity_model(), 0).unwrap();
    assert_eq!(op_types(&output), vec!["Relu"]);
    unsafe { onnxsim_release_buffer(ptr::null_mut()) };
    unsafe { onnxsim_free_string(ptr::null_mut()) };
}

#[test]
fn passthrough_is_byte_exact() {
    let names: Vec<CString> = [
        "eliminate_identity",
        "eliminate_nop_transpose",
        "eliminate_nop_dropout",
        "eliminate_deadend",
        "eliminate_unused_initializer",
    ]
    .iter()
    .map(|name| CString::new(*name).unwrap())
    .collect();
    let mut skip: Vec<*const c_char> = names.iter().map(|name| name.as_ptr()).collect();
    skip.push(ptr::null());

    let bytes = identity_model();
    let mut out: *mut u8 = ptr::null_mut();
    let mut out_len = 0usize;
    let status = unsafe {
        onnxsim_simplify_bytes(
            bytes.as_ptr(),
            bytes.len(),
            skip.as_ptr(),
            skip.len(),
            0,
            0,
            0,
            &mut out,
            &mut out_len,
        )
    };
    assert_eq!(status, OnnxSimStatus::Success);
    assert_eq!(unsafe { slice::from_raw_parts(out, out_len) }, &bytes[..]);
    unsafe { onnxsim_release_buffer(out) };
}

#[test]
fn last_error_is_per_thread() {
    let parse = thread::spawn(|| {
        assert_eq!(simplify(b"\xff\xff\xff", 0).unwrap_err(), OnnxSimStatus::ParseFailed);
        last_error().unwrap()
    });
    let invalid = thread::spawn(|| {
        let status = unsafe {
            onnxsim_simplify_file(ptr::null(), ptr::null(), ptr::null(), 0, 0, 0, 0)
        };
        assert_eq!(status, OnnxSimStatus::InvalidArgument);
        last_error().unwrap()
    });
    let parse = parse.join().unwrap();
    let invalid = invalid.join().unwrap();
    assert!(parse.contains("parse"), "{parse}");
    assert!(invalid.contains("in_path and out_path cannot be NULL"), "{invalid}");

    let fresh = thread::spawn(last_error).join().unwrap();
    assert!(fresh.is_none());
}

#[test]
fn last_error_survives_success() {
    assert!(simplify(b"\xff", 0).is_err());
    let message = last_error().unwrap();
    simplify(&identity_model(), 0).unwrap();
    assert_eq!(last_error().unwrap(), message);
}

#[test]
fn simplify_file_round_trip() {
    let dir = std::env::temp_dir().join(format!("onnxsim-ffi-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let input = dir.join("in.onnx");
    let output = dir.join("out.onnx");
    std::fs::write(&input, identity_model()).unwrap();

    let in_path = CString::new(input.to_str().unwrap()).unwrap();
    let out_path = CString::new(output.to_str().unwrap()).unwrap();
    let status = unsafe {
        onnxsim_simplify_file(
            in_path.as_ptr(),
            out_path.as_ptr(),
            ptr::null(),
            0,
            0,
            0,
            0,
        )
    };
    assert_eq!(status, OnnxSimStatus::Success);
    assert_eq!(op_types(&std::fs::read(&output).unwrap()), vec!["Relu"]);

    let missing = CString::new(dir.join("missing.onnx").to_str().unwrap()).unwrap();
    let status = unsafe {
        onnxsim_simplify_file(missing.as_ptr(), out_path.as_ptr(), ptr::null(), 0, 0, 0, 0)
    };
    assert_eq!(status, OnnxSimStatus::Internal);
    std::fs::remove_dir_all(&dir).ok();
}

unsafe extern "C" fn zeros_executor(
    user_data: *mut c_void,
    model_bytes: *const u8,
    model_bytes_len: usize,
    inputs: *const OnnxSimBytes,
    input_count: usize,
    sink: *mut OnnxSimOutputSink,
) -> c_int {
    let calls = unsafe { &*(user_data as *const AtomicUsize) };
    calls.fetch_add(1, Ordering::SeqCst);

    let model_bytes = unsafe { slice::from_raw_parts(model_bytes, model_bytes_len) };
    let Ok(model) = ModelProto::decode(model_bytes) else {
        return 1;
    };
    let inputs = unsafe { slice::from_raw_parts(inputs, input_count) };
    let Some(first) = inputs.first() else {
        return 1;
    };
    let Ok(first) = TensorProto::decode(unsafe { slice::from_raw_parts(first.data, first.len) })
    else {
        return 1;
    };
    for output in model.graph.unwrap_or_default().output {
        let Some(tensor) = TensorProto::zeros(output.name, first.data_type, first.dims.clone())
        else {
            return 1;
        };
        let bytes = tensor.encode_to_vec();
        if unsafe { onnxsim_output_sink_push(sink, bytes.as_ptr(), bytes.len()) }
            != OnnxSimStatus::Success
        {
            return 1;
        }
    }
    0
}

unsafe extern "C" fn failing_executor(
    _user_data: *mut c_void,
    _model_bytes: *const u8,
    _model_bytes_len: usize,
    _inputs: *const OnnxSimBytes,
    _input_count: usize,
    sink: *mut OnnxSimOutputSink,
) -> c_int {
    let message = CString::new("unsupported operator Add").unwrap();
    unsafe { onnxsim_output_sink_fail(sink, message.as_ptr()) };
    1
}

fn folding_record_json() -> serde_json::Value {
    let mut json: *mut c_char = ptr::null_mut();
    assert_eq!(
        unsafe { onnxsim_folding_record_json(&mut json) },
        OnnxSimStatus::Success
    );
    let text = unsafe { CStr::from_ptr(json) }.to_str().unwrap().to_owned();
    unsafe { onnxsim_free_string(json as *mut c_void) };
    serde_json::from_str(&text).unwrap()
}

#[test]
fn folds_through_host_executor() {
    let _globals = lock_globals();
    static CALLS: AtomicUsize = AtomicUsize::new(0);
    onnxsim_init_env();
    onnxsim_clear_folding_record();
    let status = unsafe {
        onnxsim_set_executor(
            Some(zeros_executor),
            &CALLS as *const AtomicUsize as *mut c_void,
        )
    };
    assert_eq!(status, OnnxSimStatus::Success);

    let output = simplify(&add_chain(), 1).unwrap();
    onnxsim_clear_executor();

    assert_eq!(op_types(&output), vec!["Add"]);
    assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    let record = onnxsim::folding_record();
    assert_eq!(record.folded_ops.len(), 1);
    assert_eq!(record.total_attempted, 1);
    assert_eq!(record.total_succeeded, 1);
    assert_eq!(record.total_failed, 0);

    let json = folding_record_json();
    assert_eq!(json["total_succeeded"], 1);
    assert_eq!(json["folded_ops"][0]["op_name"], "add_const");

    onnxsim_clear_folding_record();
    assert_eq!(folding_record_json()["total_attempted"], 0);
}

#[test]
fn host_executor_failure_is_recorded() {
    let _globals = lock_globals();
    onnxsim_clear_folding_record();
    let status = unsafe { onnxsim_set_executor(Some(failing_executor), ptr::null_mut()) };
    assert_eq!(status, OnnxSimStatus::Success);

    let output = simplify(&add_chain(), 1).unwrap();
    onnxsim_clear_executor();

    assert_eq!(op_types(&output), vec!["Add", "Add"]);
    let record = onnxsim::folding_record();
    assert_eq!(record.total_failed, 1);
    assert_eq!(record.folded_ops[0].error_msg, "unsupported operator Add");
    onnxsim_clear_folding_record();
}

#[test]
fn folding_without_executor_is_internal() {
    let _globals = lock_globals();
    onnxsim_clear_executor();
    assert_eq!(simplify(&add_chain(), 1).unwrap_err(), OnnxSimStatus::Internal);
    assert!(last_error().unwrap().contains("no executor bound"));
}

#[test]
fn null_callback_is_rejected() {
    let status = unsafe { onnxsim_set_executor(None, ptr::null_mut()) };
    assert_eq!(status, OnnxSimStatus::InvalidArgument);
}

/// Length-delimited protobuf field, written by hand so the bytes do not come from `prost`.
fn len_field(field: u8, payload: &[u8]) -> Vec<u8> {
    assert!(field < 16 && payload.len() < 128);
    let mut out = vec![(field << 3) | 2, payload.len() as u8];
    out.extend_from_slice(payload);
    out
}

/// `y = Relu(x)` followed by `functions = [FunctionProto { name: "MyFn", domain: "local" }]`.
fn model_with_local_function() -> Vec<u8> {
    let node = [len_field(1, b"x"), len_field(2, b"y"), len_field(4, b"Relu")].concat();
    let graph = [
        len_field(1, &node),
        len_field(11, &len_field(1, b"x")),
        len_field(12, &len_field(1, b"y")),
    ]
    .concat();
    let function = [len_field(1, b"MyFn"), len_field(10, b"local")].concat();

    let mut bytes = vec![0x08, 0x08];
    bytes.extend(len_field(7, &graph));
    // Field 25 needs a two-byte key.
    bytes.extend([0xCA, 0x01, function.len() as u8]);
    bytes.extend(function);
    bytes
}

#[test]
fn passthrough_keeps_local_functions() {
    let bytes = model_with_local_function();
    let names: Vec<CString> = [
        "eliminate_identity",
        "eliminate_nop_transpose",
        "eliminate_nop_dropout",
        "eliminate_deadend",
        "eliminate_unused_initializer",
    ]
    .iter()
    .map(|name| CString::new(*name).unwrap())
    .collect();
    let skip: Vec<*const c_char> = names.iter().map(|name| name.as_ptr()).collect();

    let mut out: *mut u8 = ptr::null_mut();
    let mut out_len = 0usize;
    let status = unsafe {
        onnxsim_simplify_bytes(
            bytes.as_ptr(),
            bytes.len(),
            skip.as_ptr(),
            skip.len(),
            0,
            0,
            0,
            &mut out,
            &mut out_len,
        )
    };
    assert_eq!(status, OnnxSimStatus::Success);
    let output = unsafe { slice::from_raw_parts(out, out_len) }.to_vec();
    unsafe { onnxsim_release_buffer(out) };
    assert_eq!(output, bytes);

    let default_run = simplify(&bytes, 0).unwrap();
    let model = ModelProto::decode(&default_run[..]).unwrap();
    assert_eq!(model.functions.len(), 1);
    assert_eq!(model.functions[0].name, "MyFn");
    assert_eq!(model.functions[0].domain, "local");
}

#[cfg(unix)]
#[test]
fn simplify_file_accepts_non_utf8_paths() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let dir = std::env::temp_dir().join(format!("onnxsim-ffi-bytes-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let input = dir.join(OsStr::from_bytes(b"model-\xff.onnx"));
    let output = dir.join(OsStr::from_bytes(b"simplified-\xfe.onnx"));
    std::fs::write(&input, identity_model()).unwrap();

    let in_path = CString::new(input.as_os_str().as_bytes()).unwrap();
    let out_path = CString::new(output.as_os_str().as_bytes()).unwrap();
    let status = unsafe {
        onnxsim_simplify_file(
            in_path.as_ptr(),
            out_path.as_ptr(),
            ptr::null(),
            0,
            0,
            0,
            0,
        )
    };
    assert_eq!(status, OnnxSimStatus::Success, "{:?}", last_error());
    assert_eq!(op_types(&std::fs::read(&output).unwrap()), vec!["Relu"]);
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn clear_entry_points_reset_state_without_reporting_errors() {
    let _globals = lock_globals();
    static CALLS: AtomicUsize = AtomicUsize::new(0);
    let status = unsafe {
        onnxsim_set_executor(
            Some(zeros_executor),
            &CALLS as *const AtomicUsize as *mut c_void,
        )
    };
    assert_eq!(status, OnnxSimStatus::Success);
    simplify(&add_chain(), 1).unwrap();
    assert!(!onnxsim::folding_record().is_empty());

    let before = last_error();
    onnxsim_clear_executor();
    onnxsim_clear_folding_record();
    assert_eq!(last_error(), before);
    assert!(onnxsim::folding_record().is_empty());
    assert!(!onnxsim::executor::global().is_bound());
}
