//! JSON text codec.
//!
//! Wire shape: `{"type": "<kind>", "data": <payload>}` where the payload is
//! embedded verbatim as a JSON value. Envelopes without a payload omit `data`.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use super::{Codec, check_size};
use crate::{
    envelope::Envelope,
    errors::{ProtocolError, Result},
};

#[derive(Serialize)]
struct WireOut<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a RawValue>,
}

#[derive(Deserialize)]
struct WireIn<'a> {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default, borrow)]
    data: Option<&'a RawValue>,
}

/// JSON codec. The payload of every envelope must itself be valid JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, envelope: &Envelope) -> Result<Bytes> {
        let data = if envelope.is_empty() {
            None
        } else {
            let text = std::str::from_utf8(envelope.payload()).map_err(|e| {
                ProtocolError::Encode(format!("payload of {:?} is not UTF-8: {e}", envelope.kind()))
            })?;
            let raw: &RawValue = serde_json::from_str(text).map_err(|e| {
                ProtocolError::Encode(format!("payload of {:?} is not JSON: {e}", envelope.kind()))
            })?;
            Some(raw)
        };

        let buf = serde_json::to_vec(&WireOut { kind: envelope.kind(), data })
            .map_err(|e| ProtocolError::Encode(e.to_string()))?;
        check_size(buf)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Envelope> {
        let wire: WireIn<'_> =
            serde_json::from_slice(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))?;
        let kind = wire.kind.ok_or(ProtocolError::MissingField("type"))?;
        let payload = wire.data.map_or_else(Bytes::new, |raw| Bytes::copy_from_slice(raw.get().as_bytes()));
        Ok(Envelope::new(kind, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_type_and_data_fields() {
        let env = JsonCodec.decode(br#"{"type":"ping","data":{}}"#).unwrap();
        assert_eq!(env.kind(), "ping");
        assert_eq!(env.payload().as_ref(), b"{}");
    }

    #[test]
    fn missing_or_null_data_is_empty_payload() {
        let env = JsonCodec.decode(br#"{"type":"tick"}"#).unwrap();
        assert!(env.is_empty());

        let env = JsonCodec.decode(br#"{"type":"tick","data":null}"#).unwrap();
        assert!(env.is_empty());
    }

    #[test]
    fn empty_payload_omits_data() {
        let bytes = JsonCodec.encode(&Envelope::empty("tick")).unwrap();
        assert_eq!(bytes.as_ref(), br#"{"type":"tick"}"#);
    }

    #[test]
    fn payload_is_embedded_verbatim() {
        let env = Envelope::new("chat", Bytes::from_static(br#""hi""#));
        let bytes = JsonCodec.encode(&env).unwrap();
        assert_eq!(bytes.as_ref(), br#"{"type":"chat","data":"hi"}"#);
    }

    #[test]
    fn non_json_payload_fails_to_encode() {
        let env = Envelope::new("chat", Bytes::from_static(b"not json"));
        assert!(matches!(JsonCodec.encode(&env), Err(ProtocolError::Encode(_))));
    }

    #[test]
    fn missing_type_is_rejected() {
        let err = JsonCodec.decode(br#"{"data":1}"#).unwrap_err();
        assert_eq!(err, ProtocolError::MissingField("type"));
    }

    #[test]
    fn garbage_is_decode_error() {
        assert!(matches!(JsonCodec.decode(b"\x00\x01"), Err(ProtocolError::Decode(_))));
        assert!(matches!(JsonCodec.decode(b""), Err(ProtocolError::Decode(_))));
    }
}
