use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use zbx_metrics::{FlushBatch, FlushPoint};

/// The magic bytes starting every frame.
pub const MAGIC: &[u8; 4] = b"ZBXD";

/// The protocol version byte following the magic.
pub const VERSION: u8 = 0x01;

/// Size of the frame header: magic, version and the payload length.
pub const HEADER_SIZE: usize = 13;

/// The request type for pushing item values.
const SENDER_DATA: &str = "sender data";

/// The response value signalling that the trapper accepted the request.
const SUCCESS: &str = "success";

/// An error in the framing or payload of a message exchanged with the trapper.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The header does not start with the expected magic and version.
    #[error("invalid frame header {0:02x?}")]
    InvalidHeader([u8; 5]),

    /// The peer sent fewer bytes than required.
    #[error("frame truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// The number of bytes required.
        expected: usize,
        /// The number of bytes received before the end of the stream.
        actual: usize,
    },

    /// The declared payload length exceeds the configured maximum.
    #[error("payload of {size} bytes exceeds the limit of {limit} bytes")]
    PayloadTooLarge {
        /// The declared payload length.
        size: u64,
        /// The configured maximum.
        limit: u64,
    },

    /// The payload is not the expected JSON document.
    #[error("invalid JSON payload")]
    Json(#[source] serde_json::Error),
}

/// Wraps a payload into a frame.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(MAGIC);
    frame.push(VERSION);
    frame.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Validates a frame header and returns the declared payload length.
pub fn decode_header(header: &[u8; HEADER_SIZE]) -> Result<u64, ProtocolError> {
    let (prefix, length) = header.split_at(5);
    if prefix[..4] != MAGIC[..] || prefix[4] != VERSION {
        let mut bytes = [0; 5];
        bytes.copy_from_slice(prefix);
        return Err(ProtocolError::InvalidHeader(bytes));
    }

    let mut length_bytes = [0; 8];
    length_bytes.copy_from_slice(length);
    Ok(u64::from_le_bytes(length_bytes))
}

/// Decodes a complete frame and returns its payload.
///
/// Bytes following the declared payload are ignored.
pub fn decode_frame(frame: &[u8]) -> Result<&[u8], ProtocolError> {
    let Some((header, rest)) = frame.split_first_chunk::<HEADER_SIZE>() else {
        return Err(ProtocolError::Truncated {
            expected: HEADER_SIZE,
            actual: frame.len(),
        });
    };

    let length = decode_header(header)?;
    match usize::try_from(length) {
        Ok(length) if length <= rest.len() => Ok(&rest[..length]),
        _ => Err(ProtocolError::Truncated {
            expected: HEADER_SIZE.saturating_add(usize::try_from(length).unwrap_or(usize::MAX)),
            actual: frame.len(),
        }),
    }
}

/// An item of a [`SenderRequest`].
///
/// Items have the same shape as the points produced by a flush: `host`, `key`, a string `value`
/// and the unix `clock`.
pub type SenderItem = FlushPoint;

/// The JSON payload sent to the trapper.
///
/// ```json
/// {"request":"sender data","data":[{"host":"web1","key":"app.hits","value":"0.5","clock":1700000000}]}
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SenderRequest<'a> {
    /// The request type, always `"sender data"`.
    pub request: Cow<'a, str>,
    /// The item values.
    pub data: Cow<'a, [SenderItem]>,
}

impl<'a> SenderRequest<'a> {
    /// Creates a request borrowing the points of a batch.
    pub fn new(batch: &'a FlushBatch) -> Self {
        Self {
            request: Cow::Borrowed(SENDER_DATA),
            data: Cow::Borrowed(batch.points()),
        }
    }

    /// Serializes the request into a JSON payload.
    pub fn to_payload(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(ProtocolError::Json)
    }
}

/// Statistics reported by the trapper in [`SenderResponse::info`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResponseSummary {
    /// Items stored by the trapper.
    pub processed: u64,
    /// Items rejected by the trapper, for example because the host or item does not exist.
    pub failed: u64,
    /// All items in the request.
    pub total: u64,
    /// Time spent by the trapper on the request.
    pub seconds_spent: f64,
}

/// The JSON payload returned by the trapper.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SenderResponse {
    /// `"success"` if the request was accepted.
    pub response: String,
    /// Human readable processing statistics.
    #[serde(default)]
    pub info: String,
}

impl SenderResponse {
    /// Returns `true` if the trapper accepted the request.
    pub fn is_success(&self) -> bool {
        self.response == SUCCESS
    }

    /// Parses the statistics in the `info` field.
    ///
    /// The trapper reports them as `processed: 2; failed: 0; total: 2; seconds spent: 0.000055`.
    /// Returns `None` if any of the fields is missing or malformed.
    pub fn summary(&self) -> Option<ResponseSummary> {
        let mut processed = None;
        let mut failed = None;
        let mut total = None;
        let mut seconds_spent = None;

        for part in self.info.split(';') {
            let (name, value) = part.split_once(':')?;
            let value = value.trim();
            match name.trim() {
                "processed" => processed = Some(value.parse().ok()?),
                "failed" => failed = Some(value.parse().ok()?),
                "total" => total = Some(value.parse().ok()?),
                "seconds spent" => seconds_spent = Some(value.parse().ok()?),
                _ => (),
            }
        }

        Some(ResponseSummary {
            processed: processed?,
            failed: failed?,
            total: total?,
            seconds_spent: seconds_spent?,
        })
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use zbx_common::UnixTimestamp;

    use super::*;

    fn batch() -> FlushBatch {
        let clock = UnixTimestamp::from_secs(1_700_000_000);
        FlushBatch::from(vec![
            FlushPoint::new("web1", "app.hits", 0.5, clock),
            FlushPoint::new("web1", "app.latency[upper_90]", 200, clock),
        ])
    }

    #[test]
    fn test_request_payload() {
        let batch = batch();
        let payload = SenderRequest::new(&batch).to_payload().unwrap();

        insta::assert_snapshot!(String::from_utf8(payload).unwrap(), @r###"{"request":"sender data","data":[{"host":"web1","key":"app.hits","value":"0.5","clock":1700000000},{"host":"web1","key":"app.latency[upper_90]","value":"200","clock":1700000000}]}"###);
    }

    #[test]
    fn test_encode_frame_layout() {
        let frame = encode_frame(b"{}");
        assert_eq!(
            frame,
            [b'Z', b'B', b'X', b'D', 1, 2, 0, 0, 0, 0, 0, 0, 0, b'{', b'}']
        );
    }

    #[test]
    fn test_request_survives_framing() {
        let batch = batch();
        let frame = encode_frame(&SenderRequest::new(&batch).to_payload().unwrap());

        let payload = decode_frame(&frame).unwrap();
        let request: SenderRequest<'_> = serde_json::from_slice(payload).unwrap();

        assert_eq!(request.request, "sender data");
        assert_eq!(&*request.data, batch.points());
    }

    #[test]
    fn test_decode_header_wrong_magic() {
        let mut header = [0; HEADER_SIZE];
        header[..5].copy_from_slice(b"HTTP/");

        let error = decode_header(&header).unwrap_err();
        assert!(matches!(error, ProtocolError::InvalidHeader(bytes) if &bytes == b"HTTP/"));
    }

    #[test]
    fn test_decode_header_wrong_version() {
        let mut frame = encode_frame(b"{}");
        frame[4] = 0x03;

        let header: &[u8; HEADER_SIZE] = frame[..HEADER_SIZE].try_into().unwrap();
        assert!(matches!(
            decode_header(header),
            Err(ProtocolError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_decode_frame_truncated_header() {
        let frame = encode_frame(b"{}");
        assert!(matches!(
            decode_frame(&frame[..7]),
            Err(ProtocolError::Truncated {
                expected: 13,
                actual: 7
            })
        ));
    }

    #[test]
    fn test_decode_frame_truncated_payload() {
        let frame = encode_frame(b"{\"response\":\"success\"}");
        assert!(matches!(
            decode_frame(&frame[..20]),
            Err(ProtocolError::Truncated {
                expected: 35,
                actual: 20
            })
        ));
    }

    #[test]
    fn test_response_summary() {
        let response: SenderResponse = serde_json::from_str(
            r#"{"response":"success","info":"processed: 5; failed: 1; total: 6; seconds spent: 0.000055"}"#,
        )
        .unwrap();

        assert!(response.is_success());
        assert_eq!(
            response.summary(),
            Some(ResponseSummary {
                processed: 5,
                failed: 1,
                total: 6,
                seconds_spent: 0.000055,
            })
        );
    }

    #[test]
    fn test_response_without_info() {
        let response: SenderResponse = serde_json::from_str(r#"{"response":"failed"}"#).unwrap();

        assert!(!response.is_success());
        assert_eq!(response.summary(), None);
    }

    #[test]
    fn test_response_summary_malformed() {
        let response = SenderResponse {
            response: "success".to_owned(),
            info: "processed: many; failed: 0; total: 2; seconds spent: 0.1".to_owned(),
        };
        assert_eq!(response.summary(), None);
    }
}
