#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Split arbitrary input into payload and header halves; verification
    // must reject garbage without panicking.
    let mid = data.len() / 2;
    if let Ok(signature) = std::str::from_utf8(&data[mid..]) {
        let _ = quay::webhook::verify_signature(&data[..mid], signature, "fuzz-secret");
    }
});
