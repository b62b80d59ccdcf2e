//! Fuzz target for Codec::decode
//!
//! Every inbound stream is handed to a codec, so arbitrary bytes from the
//! network end up here.
//!
//! # Invariants
//!
//! - NEVER panic on malformed input. Invalid bytes return an error.
//! - A decoded envelope re-encodes and decodes to the same envelope.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tickframe_proto::{CborCodec, Codec, JsonCodec};

fn check(codec: &dyn Codec, data: &[u8]) {
    let Ok(envelope) = codec.decode(data) else {
        return;
    };

    // Oversized re-encodings are rejected, not a bug
    if let Ok(bytes) = codec.encode(&envelope) {
        let again = codec.decode(&bytes).expect("re-encoded envelope must decode");
        assert_eq!(again.kind(), envelope.kind());
        if codec.name() == "cbor" {
            assert_eq!(again.payload(), envelope.payload());
        }
    }
}

fuzz_target!(|data: &[u8]| {
    check(&JsonCodec, data);
    check(&CborCodec, data);
});
