#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Payload parsing should never panic on malformed JSON
    if let Ok(event) = quay::webhook::PushEvent::parse(data) {
        let _ = event.branch();
    }
});
