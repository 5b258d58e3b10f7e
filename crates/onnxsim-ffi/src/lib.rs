//! C ABI for the onnxsim simplifier.
//!
//! Every entry point returns an [`OnnxSimStatus`]; the matching message is kept per thread and
//! read back through [`onnxsim_get_last_error`]. Panics never cross the boundary.

use std::any::Any;
use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::mem::size_of;
use std::os::raw::{c_char, c_int, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::ptr;
use std::slice;
use std::sync::Arc;

use anyhow::bail;
use onnxsim::proto::{ModelProto, TensorProto};
use onnxsim::{ModelExecutor, Simplifier, SimplifyError, SimplifyOptions};
use prost::Message;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnnxSimStatus {
    Success = 0,
    InvalidArgument = 1,
    ParseFailed = 2,
    SerializeFailed = 3,
    SimplificationFailed = 4,
    Internal = 5,
}

impl From<&SimplifyError> for OnnxSimStatus {
    fn from(err: &SimplifyError) -> Self {
        match err {
            SimplifyError::InvalidArgument(_) => OnnxSimStatus::InvalidArgument,
            SimplifyError::ParseFailed(_) => OnnxSimStatus::ParseFailed,
            SimplifyError::SerializeFailed(_) => OnnxSimStatus::SerializeFailed,
            SimplifyError::SimplificationFailed(_) => OnnxSimStatus::SimplificationFailed,
            SimplifyError::NoExecutorBound
            | SimplifyError::Io { .. }
            | SimplifyError::Internal(_) => OnnxSimStatus::Internal,
        }
    }
}

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(message: impl Into<String>) {
    let message = message.into().replace('\0', "\u{FFFD}");
    let message = CString::new(message).unwrap_or_default();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(message));
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panic: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panic: {message}")
    } else {
        "panic: unknown payload".to_string()
    }
}

/// Runs `body`, translating errors and panics into a status plus the thread's last error.
fn guard<F>(entry: &'static str, body: F) -> OnnxSimStatus
where
    F: FnOnce() -> Result<(), SimplifyError>,
{
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => OnnxSimStatus::Success,
        Ok(Err(err)) => {
            let status = OnnxSimStatus::from(&err);
            tracing::debug!(entry, ?status, error = %err, "boundary call failed");
            set_last_error(format!("{err:#}"));
            status
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::warn!(entry, error = %message, "panic caught at boundary");
            set_last_error(message);
            OnnxSimStatus::Internal
        }
    }
}

fn invalid_argument(message: &str) -> SimplifyError {
    SimplifyError::InvalidArgument(message.to_string())
}

/// Builds the option bag from the flat C argument list.
///
/// # Safety
/// When `skip_optimizers` is non-null it must point to `skip_optimizers_len` entries, each
/// either null or a NUL-terminated string.
unsafe fn options_from_raw(
    skip_optimizers: *const *const c_char,
    skip_optimizers_len: usize,
    constant_folding: c_int,
    shape_inference: c_int,
    tensor_size_threshold: usize,
) -> SimplifyOptions {
    let skip_optimizers = if skip_optimizers.is_null() || skip_optimizers_len == 0 {
        None
    } else {
        let entries = unsafe { slice::from_raw_parts(skip_optimizers, skip_optimizers_len) };
        Some(
            entries
                .iter()
                .filter(|entry| !entry.is_null())
                .map(|entry| unsafe { CStr::from_ptr(*entry) }.to_string_lossy().into_owned())
                .collect(),
        )
    };
    SimplifyOptions {
        skip_optimizers,
        constant_folding: constant_folding != 0,
        shape_inference: shape_inference != 0,
        tensor_size_threshold,
    }
}

/// # Safety
/// `path` must be a non-null, NUL-terminated string.
#[cfg(unix)]
unsafe fn path_from_raw(path: *const c_char) -> Result<PathBuf, SimplifyError> {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let bytes = unsafe { CStr::from_ptr(path) }.to_bytes();
    Ok(PathBuf::from(OsStr::from_bytes(bytes)))
}

/// # Safety
/// `path` must be a non-null, NUL-terminated string.
#[cfg(not(unix))]
unsafe fn path_from_raw(path: *const c_char) -> Result<PathBuf, SimplifyError> {
    unsafe { CStr::from_ptr(path) }
        .to_str()
        .map(PathBuf::from)
        .map_err(|_| invalid_argument("path is not valid UTF-8"))
}

// Output buffers are prefixed with their length so release needs only the data pointer.
const HEADER_LEN: usize = size_of::<usize>();

fn into_raw_buffer(bytes: &[u8]) -> Result<(*mut u8, usize), SimplifyError> {
    let len = bytes.len();
    let mut buffer: Vec<u8> = Vec::new();
    buffer
        .try_reserve_exact(HEADER_LEN + len)
        .map_err(|_| anyhow::anyhow!("failed to allocate {len} bytes for output"))?;
    buffer.extend_from_slice(&len.to_ne_bytes());
    buffer.extend_from_slice(bytes);
    let base = Box::into_raw(buffer.into_boxed_slice()) as *mut u8;
    Ok((unsafe { base.add(HEADER_LEN) }, len))
}

/// # Safety
/// `data` must be null or a pointer returned by [`into_raw_buffer`] that was not released yet.
unsafe fn release_raw_buffer(data: *mut u8) {
    if data.is_null() {
        return;
    }
    unsafe {
        let base = data.sub(HEADER_LEN);
        let len = ptr::read_unaligned(base as *const usize);
        drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
            base,
            HEADER_LEN + len,
        )));
    }
}

#[no_mangle]
/// Prepares process-wide state. Idempotent.
pub extern "C" fn onnxsim_init_env() {
    let _ = guard("onnxsim_init_env", || {
        onnxsim::init_env();
        Ok(())
    });
}

#[no_mangle]
/// Simplifies a serialized model.
///
/// On success `*out_bytes` receives a buffer of `*out_bytes_len` bytes owned by the caller,
/// to be released exactly once with [`onnxsim_release_buffer`].
///
/// # Safety
/// `model_bytes` must be readable for `model_bytes_len` bytes. `skip_optimizers`, when
/// non-null, must hold `skip_optimizers_len` entries that are null or NUL-terminated.
/// `out_bytes` and `out_bytes_len` must be writable.
pub unsafe extern "C" fn onnxsim_simplify_bytes(
    model_bytes: *const u8,
    model_bytes_len: usize,
    skip_optimizers: *const *const c_char,
    skip_optimizers_len: usize,
    constant_folding: c_int,
    shape_inference: c_int,
    tensor_size_threshold: usize,
    out_bytes: *mut *mut u8,
    out_bytes_len: *mut usize,
) -> OnnxSimStatus {
    guard("onnxsim_simplify_bytes", || {
        if model_bytes.is_null() {
            return Err(invalid_argument("model_bytes cannot be NULL"));
        }
        if out_bytes.is_null() || out_bytes_len.is_null() {
            return Err(invalid_argument("out_bytes or out_bytes_len cannot be NULL"));
        }
        unsafe {
            *out_bytes = ptr::null_mut();
            *out_bytes_len = 0;
        }

        let input = unsafe { slice::from_raw_parts(model_bytes, model_bytes_len) };
        let options = unsafe {
            options_from_raw(
                skip_optimizers,
                skip_optimizers_len,
                constant_folding,
                shape_inference,
                tensor_size_threshold,
            )
        };
        let output = Simplifier::global().simplify_bytes(input, &options)?;
        let (data, len) = into_raw_buffer(&output)?;
        unsafe {
            *out_bytes = data;
            *out_bytes_len = len;
        }
        Ok(())
    })
}

#[no_mangle]
/// Simplifies the model at `in_path` and writes the result to `out_path`.
///
/// # Safety
/// Both paths must be null or NUL-terminated. `skip_optimizers` follows the rules of
/// [`onnxsim_simplify_bytes`].
pub unsafe extern "C" fn onnxsim_simplify_file(
    in_path: *const c_char,
    out_path: *const c_char,
    skip_optimizers: *const *const c_char,
    skip_optimizers_len: usize,
    constant_folding: c_int,
    shape_inference: c_int,
    tensor_size_threshold: usize,
) -> OnnxSimStatus {
    guard("onnxsim_simplify_file", || {
        if in_path.is_null() || out_path.is_null() {
            return Err(invalid_argument("in_path and out_path cannot be NULL"));
        }
        let in_path = unsafe { path_from_raw(in_path)? };
        let out_path = unsafe { path_from_raw(out_path)? };
        let options = unsafe {
            options_from_raw(
                skip_optimizers,
                skip_optimizers_len,
                constant_folding,
                shape_inference,
                tensor_size_threshold,
            )
        };
        Simplifier::global().simplify_path(in_path, out_path, &options)
    })
}

#[no_mangle]
/// Releases a buffer returned by this library. Null is a no-op.
///
/// # Safety
/// `data` must come from [`onnxsim_simplify_bytes`] or [`onnxsim_folding_record_json`] and must
/// be released at most once. Other pointers are undefined behavior.
pub unsafe extern "C" fn onnxsim_release_buffer(data: *mut u8) {
    unsafe { release_raw_buffer(data) }
}

#[no_mangle]
/// Alias of [`onnxsim_release_buffer`] kept for hosts built against the older header.
///
/// # Safety
/// Same contract as [`onnxsim_release_buffer`].
pub unsafe extern "C" fn onnxsim_free_string(data: *mut c_void) {
    unsafe { release_raw_buffer(data as *mut u8) }
}

#[no_mangle]
/// Last failure message recorded on the calling thread, or null when none was recorded.
///
/// The pointer stays valid until the next failing call on the same thread.
pub extern "C" fn onnxsim_get_last_error() -> *const c_char {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map_or(ptr::null(), |message| message.as_ptr())
    })
}

/// Borrowed view of a serialized protobuf message.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct OnnxSimBytes {
    pub data: *const u8,
    pub len: usize,
}

/// Collects the tensors a host executor produces for one call.
#[derive(Debug, Default)]
pub struct OnnxSimOutputSink {
    tensors: Vec<TensorProto>,
    error: Option<String>,
}

/// Host executor callback.
///
/// Receives the serialized single-node `ModelProto` and one serialized `TensorProto` per
/// graph input, pushes one serialized `TensorProto` per graph output into `sink`, and returns
/// zero on success.
pub type OnnxSimExecuteFn = unsafe extern "C" fn(
    user_data: *mut c_void,
    model_bytes: *const u8,
    model_bytes_len: usize,
    inputs: *const OnnxSimBytes,
    input_count: usize,
    sink: *mut OnnxSimOutputSink,
) -> c_int;

struct CallbackExecutor {
    callback: OnnxSimExecuteFn,
    user_data: *mut c_void,
}

// The host guarantees `user_data` may be used from any thread that calls into the library.
unsafe impl Send for CallbackExecutor {}
unsafe impl Sync for CallbackExecutor {}

impl ModelExecutor for CallbackExecutor {
    fn run(&self, model: &ModelProto, inputs: &[TensorProto]) -> anyhow::Result<Vec<TensorProto>> {
        let model_bytes = model.encode_to_vec();
        let encoded: Vec<Vec<u8>> = inputs.iter().map(Message::encode_to_vec).collect();
        let views: Vec<OnnxSimBytes> = encoded
            .iter()
            .map(|bytes| OnnxSimBytes {
                data: bytes.as_ptr(),
                len: bytes.len(),
            })
            .collect();

        let mut sink = OnnxSimOutputSink::default();
        let code = unsafe {
            (self.callback)(
                self.user_data,
                model_bytes.as_ptr(),
                model_bytes.len(),
                views.as_ptr(),
                views.len(),
                &mut sink,
            )
        };
        if let Some(error) = sink.error {
            bail!("{error}");
        }
        if code != 0 {
            bail!("executor callback returned {code}");
        }
        Ok(sink.tensors)
    }
}

#[no_mangle]
/// Registers `callback` as the process-wide executor, replacing any previous one.
///
/// # Safety
/// `callback` must stay callable and `user_data` valid until the executor is replaced or
/// cleared, from any thread that simplifies models.
pub unsafe extern "C" fn onnxsim_set_executor(
    callback: Option<OnnxSimExecuteFn>,
    user_data: *mut c_void,
) -> OnnxSimStatus {
    guard("onnxsim_set_executor", || {
        let callback = callback.ok_or_else(|| invalid_argument("callback cannot be NULL"))?;
        onnxsim::executor::set_executor(Arc::new(CallbackExecutor {
            callback,
            user_data,
        }));
        Ok(())
    })
}

#[no_mangle]
/// Unregisters the process-wide executor. Later folding requests fail until a new one is set.
pub extern "C" fn onnxsim_clear_executor() {
    let _ = guard("onnxsim_clear_executor", || {
        onnxsim::executor::global().clear_executor();
        Ok(())
    });
}

#[no_mangle]
/// Appends one serialized output tensor to `sink`.
///
/// # Safety
/// `sink` must be the pointer passed to the running executor callback. `data` must be
/// readable for `len` bytes.
pub unsafe extern "C" fn onnxsim_output_sink_push(
    sink: *mut OnnxSimOutputSink,
    data: *const u8,
    len: usize,
) -> OnnxSimStatus {
    guard("onnxsim_output_sink_push", || {
        if sink.is_null() {
            return Err(invalid_argument("sink cannot be NULL"));
        }
        if data.is_null() && len > 0 {
            return Err(invalid_argument("data cannot be NULL"));
        }
        let sink = unsafe { &mut *sink };
        let bytes = if len == 0 {
            &[][..]
        } else {
            unsafe { slice::from_raw_parts(data, len) }
        };
        match TensorProto::decode(bytes) {
            Ok(tensor) => {
                sink.tensors.push(tensor);
                Ok(())
            }
            Err(err) => {
                let message = format!(
                    "output tensor {} is not a valid TensorProto: {err}",
                    sink.tensors.len()
                );
                sink.error.get_or_insert_with(|| message.clone());
                Err(SimplifyError::ParseFailed(message))
            }
        }
    })
}

#[no_mangle]
/// Records `message` as the failure of the running executor call.
///
/// # Safety
/// `sink` must be the pointer passed to the running executor callback; `message` must be null
/// or NUL-terminated.
pub unsafe extern "C" fn onnxsim_output_sink_fail(
    sink: *mut OnnxSimOutputSink,
    message: *const c_char,
) -> OnnxSimStatus {
    guard("onnxsim_output_sink_fail", || {
        if sink.is_null() {
            return Err(invalid_argument("sink cannot be NULL"));
        }
        let sink = unsafe { &mut *sink };
        let message = if message.is_null() {
            "executor reported failure".to_string()
        } else {
            unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned()
        };
        sink.error = Some(message);
        Ok(())
    })
}

#[no_mangle]
/// Writes the process-wide folding audit log as NUL-terminated JSON into `*out_json`.
///
/// # Safety
/// `out_json` must be writable. The returned string is released with
/// [`onnxsim_release_buffer`] or [`onnxsim_free_string`].
pub unsafe extern "C" fn onnxsim_folding_record_json(out_json: *mut *mut c_char) -> OnnxSimStatus {
    guard("onnxsim_folding_record_json", || {
        if out_json.is_null() {
            return Err(invalid_argument("out_json cannot be NULL"));
        }
        let json = onnxsim::folding_record()
            .to_json()
            .map_err(|err| SimplifyError::SerializeFailed(err.to_string()))?;
        let mut bytes = json.into_bytes();
        bytes.push(0);
        let (data, _) = into_raw_buffer(&bytes)?;
        unsafe { *out_json = data as *mut c_char };
        Ok(())
    })
}

#[no_mangle]
/// Empties the process-wide folding audit log.
pub extern "C" fn onnxsim_clear_folding_record() {
    let _ = guard("onnxsim_clear_folding_record", || {
        onnxsim::clear_folding_record();
        Ok(())
    });
}
