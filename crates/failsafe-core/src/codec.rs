//! Value codecs.
//!
//! A codec turns the JSON value form of one attachment into the bytes stored
//! in a snapshot and back. The snapshot records the codec name so a context
//! never decodes bytes written by a different codec.

use serde_json::Value;

use crate::domain::error::CodecError;

/// Serializer capability consumed by `FailSafeState`.
///
/// Implementations must round-trip every value they accept and report
/// failures instead of truncating.
pub trait Codec: Send + Sync {
    /// Stable name recorded in every snapshot this codec writes.
    fn name(&self) -> &'static str;

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError>;
}

/// JSON codec backed by `serde_json`. Compact by default; pretty output
/// decodes identically.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec {
    pretty: bool,
}

impl JsonCodec {
    pub const NAME: &'static str = "json";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn pretty() -> Self {
        Self { pretty: true }
    }

    pub fn is_pretty(&self) -> bool {
        self.pretty
    }
}

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        let encoded = if self.pretty {
            serde_json::to_vec_pretty(value)
        } else {
            serde_json::to_vec(value)
        };
        encoded.map_err(|e| CodecError::Encode {
            codec: Self::NAME,
            source: Box::new(e),
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode {
            codec: Self::NAME,
            source: Box::new(e),
        })
    }
}
