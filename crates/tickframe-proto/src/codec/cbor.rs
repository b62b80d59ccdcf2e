//! Compact binary codec (CBOR).
//!
//! Wire shape: a CBOR map `{"type": text, "data": bytes}`. Unknown keys are
//! ignored so peers can add fields without breaking older servers.

use bytes::Bytes;
use ciborium::Value;

use super::{Codec, check_size};
use crate::{
    envelope::Envelope,
    errors::{ProtocolError, Result},
};

/// CBOR codec. Carries the payload as an opaque byte string.
#[derive(Debug, Clone, Copy, Default)]
pub struct CborCodec;

impl Codec for CborCodec {
    fn name(&self) -> &'static str {
        "cbor"
    }

    fn encode(&self, envelope: &Envelope) -> Result<Bytes> {
        let value = Value::Map(vec![
            (Value::Text("type".to_string()), Value::Text(envelope.kind().to_string())),
            (Value::Text("data".to_string()), Value::Bytes(envelope.payload().to_vec())),
        ]);

        let mut buf = Vec::new();
        ciborium::into_writer(&value, &mut buf)
            .map_err(|e| ProtocolError::Encode(e.to_string()))?;
        check_size(buf)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Envelope> {
        let value: Value =
            ciborium::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))?;

        let Value::Map(entries) = value else {
            return Err(ProtocolError::Decode("expected a CBOR map".to_string()));
        };

        let mut kind = None;
        let mut payload = Bytes::new();

        for (key, value) in entries {
            match (key.as_text(), value) {
                (Some("type"), Value::Text(text)) => kind = Some(text),
                (Some("data"), Value::Bytes(data)) => payload = Bytes::from(data),
                (Some("data"), Value::Null) => {},
                (Some(field @ ("type" | "data")), other) => {
                    return Err(ProtocolError::Decode(format!(
                        "unexpected value for {field:?}: {other:?}"
                    )));
                },
                _ => {},
            }
        }

        let kind = kind.ok_or(ProtocolError::MissingField("type"))?;
        Ok(Envelope::new(kind, payload))
    }
}
