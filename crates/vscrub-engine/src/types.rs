//! Payloads exchanged with engines and persisted as stage artifacts.

use serde::{Deserialize, Serialize};

/// Decoded frames. Each frame is an opaque raster buffer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frames {
    #[serde(with = "b64_list")]
    pub frames: Vec<Vec<u8>>,
}

impl Frames {
    pub fn new(frames: Vec<Vec<u8>>) -> Self {
        Self { frames }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Per-frame masks of the tracked object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaskSequence {
    #[serde(with = "b64_list")]
    pub masks: Vec<Vec<u8>>,
    /// Tracker confidence (0.0-1.0)
    pub confidence: f32,
}

/// Tunables passed with every engine call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingParams {
    /// Frames per engine batch
    pub batch_size: u32,
}

/// Binary buffers as base64 strings on the wire.
mod b64_list {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(items: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(items.iter().map(|item| STANDARD.encode(item)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Vec<u8>>, D::Error> {
        let encoded = Vec::<String>::deserialize(deserializer)?;
        encoded
            .into_iter()
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_wire_format_is_base64() {
        let frames = Frames::new(vec![vec![0, 1, 2], vec![255]]);
        let json = serde_json::to_value(&frames).unwrap();
        assert_eq!(json, serde_json::json!({ "frames": ["AAEC", "/w=="] }));
        let back: Frames = serde_json::from_value(json).unwrap();
        assert_eq!(back, frames);
    }

    #[test]
    fn test_invalid_base64_rejected() {
        let err = serde_json::from_str::<Frames>(r#"{"frames":["***"]}"#);
        assert!(err.is_err());
    }
}
