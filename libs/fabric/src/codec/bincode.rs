use serde::{Deserialize, Serialize};

use crate::codec::Codec;
use crate::error::{Error, Result};

/// Bincode codec for compact binary payloads
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        bincode::serialize(value).map_err(|e| Error::Codec(e.to_string()))
    }

    fn decode<T: for<'de> Deserialize<'de>>(&self, bytes: &[u8]) -> Result<T> {
        bincode::deserialize(bytes).map_err(|e| Error::Codec(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Reading {
        sensor: u16,
        value: f64,
    }

    #[test]
    fn payload_is_fixed_width_binary() {
        let bytes = BincodeCodec
            .encode(&Reading {
                sensor: 7,
                value: 1.5,
            })
            .unwrap();
        assert_eq!(bytes.len(), 10);

        let decoded: Reading = BincodeCodec.decode(&bytes).unwrap();
        assert_eq!(decoded.sensor, 7);
    }

    #[test]
    fn truncated_payload_is_codec_error() {
        let result: Result<Reading> = BincodeCodec.decode(&[7, 0]);
        assert!(matches!(result, Err(Error::Codec(_))));
    }
}
