//! Image records returned to the orchestration layer.

use serde::{Deserialize, Serialize};

/// Type tag reported for every image managed by this sub-agent.
pub const CONTAINER_IMAGE_TYPE: &str = "container";

/// An image available in the local runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// Image id as known to the orchestration layer.
    pub id: String,
    /// Logical type tag.
    #[serde(rename = "type")]
    pub kind: String,
    /// Size in MiB.
    pub size: u64,
}

impl Image {
    /// Build a container image record from a size in bytes.
    pub fn from_bytes(id: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            id: id.into(),
            kind: CONTAINER_IMAGE_TYPE.to_string(),
            size: size_bytes / 1024 / 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_is_truncated_to_mib() {
        let image = Image::from_bytes("imgA", 5 * 1024 * 1024 + 1023);
        assert_eq!(image.size, 5);
        assert_eq!(image.kind, "container");
    }

    #[test]
    fn wire_format() {
        let json = serde_json::to_string(&Image::from_bytes("imgA", 0)).unwrap();
        insta::assert_snapshot!(json, @r#"{"id":"imgA","type":"container","size":0}"#);
    }
}
