//! Fuzz target for upload state file parsing.
//!
//! Feeds arbitrary text to the state parser, checking for panics, crashes,
//! or hangs. Parsed states must describe a usable upload.

#![no_main]

use datacollective::upload::parse_upload_state;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 1024 * 1024 {
        return;
    }
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(Some(state)) = parse_upload_state(text) {
        assert!(state.file_size > 0);
        assert!(state.part_size > 0);
        assert!(state.parts.iter().all(|part| part.part_number >= 1));
    }
});
