//! Fuzz target for whitespace-separated numeric tables.
//!
//! This fuzzer feeds arbitrary UTF-8 text to the matrix parser,
//! checking for panics, crashes, or hangs.

#![no_main]

use libfuzzer_sys::fuzz_target;
use ml_datasets::formats::table::fuzz_parse_whitespace_matrix;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let _ = fuzz_parse_whitespace_matrix(text);
});
