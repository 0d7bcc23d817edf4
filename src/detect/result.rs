use serde::{Deserialize, Serialize};

use crate::geometry::BoundingBox;

/// Number of landmarks in the 17-point COCO body layout.
pub const COCO_KEYPOINT_COUNT: usize = 17;
/// Left hip landmark index in the COCO body layout.
pub const LEFT_HIP: usize = 11;
/// Right hip landmark index in the COCO body layout.
pub const RIGHT_HIP: usize = 12;

/// One body landmark in frame pixels. (0, 0) means "not detected".
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 2]", into = "[f32; 2]")]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
}

impl Keypoint {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub const fn missing() -> Self {
        Self { x: 0.0, y: 0.0 }
    }

    /// Both coordinates strictly positive.
    pub fn is_detected(&self) -> bool {
        self.x > 0.0 && self.y > 0.0
    }
}

impl From<[f32; 2]> for Keypoint {
    fn from([x, y]: [f32; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Keypoint> for [f32; 2] {
    fn from(kp: Keypoint) -> Self {
        [kp.x, kp.y]
    }
}

/// One detected person.
///
/// `keypoints` is `None` when the backend has no pose head or produced no
/// landmark row for this detection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(with = "bbox_array")]
    pub bbox: BoundingBox,
    #[serde(default = "full_confidence")]
    pub confidence: f32,
    #[serde(default)]
    pub keypoints: Option<Vec<Keypoint>>,
}

impl Detection {
    pub fn new(bbox: BoundingBox, confidence: f32) -> Self {
        Self {
            bbox,
            confidence,
            keypoints: None,
        }
    }

    pub fn with_keypoints(mut self, keypoints: Vec<Keypoint>) -> Self {
        self.keypoints = Some(keypoints);
        self
    }

    pub fn keypoint(&self, index: usize) -> Option<Keypoint> {
        self.keypoints.as_ref()?.get(index).copied()
    }
}

fn full_confidence() -> f32 {
    1.0
}

/// Boxes travel as `[x1, y1, x2, y2]` in replay files.
mod bbox_array {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::geometry::BoundingBox;

    pub fn serialize<S: Serializer>(bbox: &BoundingBox, s: S) -> Result<S::Ok, S::Error> {
        [bbox.x1, bbox.y1, bbox.x2, bbox.y2].serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BoundingBox, D::Error> {
        let [x1, y1, x2, y2] = <[f32; 4]>::deserialize(d)?;
        Ok(BoundingBox::new(x1, y1, x2, y2))
    }
}
