use std::env;
use std::sync::{Once, OnceLock};

static MAX_ITERS: OnceLock<usize> = OnceLock::new();
static PASS_STATS: OnceLock<bool> = OnceLock::new();
static INIT: Once = Once::new();

const DEFAULT_MAX_ITERS: usize = 8;

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

/// Upper bound on simplify fixed-point rounds (`ONNXSIM_MAX_ITERS`).
pub(crate) fn max_iters() -> usize {
    *MAX_ITERS.get_or_init(|| match env::var("ONNXSIM_MAX_ITERS") {
        Ok(value) => match value.trim().parse::<usize>() {
            Ok(parsed) if parsed > 0 => parsed,
            _ => {
                tracing::warn!(value = %value, "ignoring invalid ONNXSIM_MAX_ITERS");
                DEFAULT_MAX_ITERS
            }
        },
        Err(_) => DEFAULT_MAX_ITERS,
    })
}

/// Whether per-pass statistics are logged (`ONNXSIM_PASS_STATS`).
pub(crate) fn pass_stats_enabled() -> bool {
    *PASS_STATS.get_or_init(|| match env::var("ONNXSIM_PASS_STATS") {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}

/// Prepares process-wide state. Safe to call any number of times from any thread.
pub fn init_env() {
    INIT.call_once(|| {
        let max_iters = max_iters();
        let pass_stats = pass_stats_enabled();
        let known_passes = crate::optimizer::pipeline::known_pass_names().len();
        tracing::debug!(max_iters, pass_stats, known_passes, "onnxsim environment initialized");
    });
}
