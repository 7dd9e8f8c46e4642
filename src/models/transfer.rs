use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length of a content fingerprint in bytes
pub const FINGERPRINT_LEN: usize = 20;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FingerprintError {
    #[error("Invalid fingerprint hex: {0}")]
    InvalidHex(String),

    #[error("Invalid fingerprint length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Stable content identifier of a transfer, the primary key everywhere
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub [u8; FINGERPRINT_LEN]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = FingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| FingerprintError::InvalidHex(e.to_string()))?;

        if bytes.len() != FINGERPRINT_LEN {
            return Err(FingerprintError::InvalidLength {
                expected: FINGERPRINT_LEN,
                actual: bytes.len(),
            });
        }

        let mut fingerprint = [0u8; FINGERPRINT_LEN];
        fingerprint.copy_from_slice(&bytes);
        Ok(Fingerprint(fingerprint))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Serializable metadata sufficient to re-add a transfer to the engine
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Descriptor {
    pub fingerprint: Fingerprint,
    /// Display name, when known
    pub name: Option<String>,
    /// Raw metadata bytes; absent when built from a bare identifier
    pub metadata: Option<Vec<u8>>,
}

impl Descriptor {
    pub fn from_fingerprint(fingerprint: Fingerprint) -> Self {
        Self {
            fingerprint,
            name: None,
            metadata: None,
        }
    }
}

/// Input accepted by the engine's descriptor parser
#[derive(Clone, Copy, Debug)]
pub enum DescriptorSource<'a> {
    /// Magnet URI or hex fingerprint
    Identifier(&'a str),
    /// Contents of a persisted descriptor file
    Bytes(&'a [u8]),
}

/// Point-in-time view of an engine-owned transfer
#[derive(Clone, Debug)]
pub struct TransferSnapshot {
    pub fingerprint: Fingerprint,
    /// Fraction complete, in [0, 1]
    pub progress: f64,
    /// Bytes per second
    pub download_speed: f64,
    /// Bytes per second
    pub upload_speed: f64,
    pub num_peers: u32,
    pub downloaded: u64,
    pub uploaded: u64,
    pub done: bool,
    pub piece_count: u32,
    pub magnet_uri: String,
    pub descriptor: Descriptor,
}

/// Engine-wide totals
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub progress: f64,
    pub down: f64,
    pub up: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_parse() {
        let hex = "0123456789abcdef0123456789abcdef01234567";
        let fp: Fingerprint = hex.parse().unwrap();
        assert_eq!(fp.as_bytes()[0], 0x01);
        assert_eq!(fp.to_string(), hex);
    }

    #[test]
    fn test_fingerprint_parse_uppercase() {
        let fp: Fingerprint = "0123456789ABCDEF0123456789ABCDEF01234567".parse().unwrap();
        assert_eq!(fp.to_string(), "0123456789abcdef0123456789abcdef01234567");
    }

    #[test]
    fn test_fingerprint_invalid_length() {
        let err = "deadbeef".parse::<Fingerprint>().unwrap_err();
        assert_eq!(
            err,
            FingerprintError::InvalidLength {
                expected: 20,
                actual: 4
            }
        );
    }

    #[test]
    fn test_fingerprint_invalid_hex() {
        assert!(matches!(
            "zz23456789abcdef0123456789abcdef01234567".parse::<Fingerprint>(),
            Err(FingerprintError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_fingerprint_serde_as_hex_string() {
        let fp = Fingerprint([0xab; 20]);
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(20)));

        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fp);
    }
}
