//! Fuzz target for R data parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;
use ml_datasets::formats::rdata::from_rdata_slice;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    let _ = from_rdata_slice(data);
});
