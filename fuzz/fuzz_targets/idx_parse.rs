//! Fuzz target for IDX tensor parsing.
//!
//! This fuzzer feeds arbitrary byte sequences to the IDX parser,
//! checking for panics, crashes, or hangs.

#![no_main]

use libfuzzer_sys::fuzz_target;
use ml_datasets::formats::idx::from_idx_slice;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    let _ = from_idx_slice(data);
});
