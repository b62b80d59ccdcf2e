//! Fuzz target for envelope encoding with arbitrary kinds and payloads
//!
//! # Invariants
//!
//! - CBOR carries any payload bytes unchanged.
//! - JSON either rejects a non-JSON payload or round-trips the kind.

#![no_main]

use arbitrary::Arbitrary;
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use tickframe_proto::{CborCodec, Codec, Envelope, JsonCodec};

#[derive(Debug, Arbitrary)]
struct Input {
    kind: String,
    payload: Vec<u8>,
}

fuzz_target!(|input: Input| {
    let envelope = Envelope::new(input.kind, Bytes::from(input.payload));

    if let Ok(bytes) = CborCodec.encode(&envelope) {
        let decoded = CborCodec.decode(&bytes).expect("CBOR output must decode");
        assert_eq!(decoded, envelope);
    }

    if let Ok(bytes) = JsonCodec.encode(&envelope) {
        let decoded = JsonCodec.decode(&bytes).expect("JSON output must decode");
        assert_eq!(decoded.kind(), envelope.kind());
    }
});
