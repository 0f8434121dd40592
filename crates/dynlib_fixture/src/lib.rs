//! Shared library loaded by the dynlib integration tests.
//!
//! Exports `test` (no arguments, bumps a call counter), `test_call_count` and `average`.

use std::sync::atomic::{AtomicU32, Ordering};

static TEST_CALLS: AtomicU32 = AtomicU32::new(0);

#[unsafe(no_mangle)]
pub extern "C" fn test() {
    TEST_CALLS.fetch_add(1, Ordering::SeqCst);
}

#[unsafe(no_mangle)]
pub extern "C" fn test_call_count() -> u32 {
    TEST_CALLS.load(Ordering::SeqCst)
}

/// Arithmetic mean of `len` integers starting at `values`; 0.0 for an empty sequence.
///
/// # Safety
///
/// `values` must point to `len` readable `i32`s, or `len` must be 0.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn average(values: *const i32, len: usize) -> f64 {
    if values.is_null() || len == 0 {
        return 0.0;
    }
    let values = unsafe { std::slice::from_raw_parts(values, len) };
    values.iter().map(|&v| f64::from(v)).sum::<f64>() / len as f64
}
