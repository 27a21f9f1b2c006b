//! Fuzz target for `Repr-Digest` header parsing.

#![no_main]

use datacollective::download::parse_repr_digest;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(header) = std::str::from_utf8(data) else {
        return;
    };

    if let Some(digest) = parse_repr_digest(header) {
        assert!(digest.len() % 2 == 0);
        assert!(digest.bytes().all(|b| b.is_ascii_hexdigit()));
    }
});
