//! Fuzz target for pickle decoding.
//!
//! This fuzzer feeds arbitrary byte sequences to the unpickler and then
//! normalizes whatever it produced, checking for panics, crashes, or hangs.

#![no_main]

use libfuzzer_sys::fuzz_target;
use ml_datasets::formats::pickle::from_pickle_slice;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    if let Ok(value) = from_pickle_slice(data) {
        let _ = value.normalize_text();
    }
});
