//! Seat identities and seat geometry.
//!
//! Seat geometry is authored once against a reference resolution and stored as
//! either a flat `{ "<seat>": [[x, y], ...] }` document or a wrapped
//! `{ "meta": { "ref_w", "ref_h" }, "rois": { ... } }` document. `SeatGeometry`
//! is the parsed, unscaled document; `SeatLayout` is that geometry fitted to a
//! live frame size, with seat centers cached.
//!
//! Every seat key is normalized to a `SeatId` at ingestion, so `"05"`, `"5"`
//! and `5` all name the same seat everywhere downstream.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::geometry::{centroid, rescale_polygons, FrameSize, Point, Polygon};

/// Canonical seat identity: the seat number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeatId(u32);

impl SeatId {
    pub const fn new(number: u32) -> Self {
        Self(number)
    }

    pub fn number(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SeatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SeatId {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        trimmed
            .parse::<u32>()
            .map(SeatId)
            .map_err(|_| anyhow!("seat id {:?} is not a seat number", raw))
    }
}

impl From<u32> for SeatId {
    fn from(number: u32) -> Self {
        Self(number)
    }
}

impl Serialize for SeatId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SeatId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct SeatIdVisitor;

        impl serde::de::Visitor<'_> for SeatIdVisitor {
            type Value = SeatId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a seat number or numeric string")
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> std::result::Result<SeatId, E> {
                u32::try_from(v)
                    .map(SeatId)
                    .map_err(|_| E::custom(format!("seat number {} out of range", v)))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> std::result::Result<SeatId, E> {
                u32::try_from(v)
                    .map(SeatId)
                    .map_err(|_| E::custom(format!("seat number {} out of range", v)))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> std::result::Result<SeatId, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(SeatIdVisitor)
    }
}

// ----------------------------------------------------------------------------
// Geometry document
// ----------------------------------------------------------------------------

type RawPolygons = BTreeMap<String, Vec<[f64; 2]>>;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeometryDocument {
    Wrapped {
        #[serde(default)]
        meta: GeometryMeta,
        rois: RawPolygons,
    },
    Flat(RawPolygons),
}

#[derive(Debug, Default, Deserialize)]
struct GeometryMeta {
    ref_w: Option<u32>,
    ref_h: Option<u32>,
}

/// Parsed seat geometry at its authoring resolution.
///
/// Vertices are kept as authored, fractions included, and only truncated to
/// pixels once they are scaled to a live frame.
#[derive(Clone, Debug, PartialEq)]
pub struct SeatGeometry {
    vertices: BTreeMap<SeatId, Vec<[f64; 2]>>,
    ref_width: Option<u32>,
    ref_height: Option<u32>,
}

impl SeatGeometry {
    pub fn new(polygons: BTreeMap<SeatId, Polygon>, reference: Option<FrameSize>) -> Self {
        let vertices = polygons
            .into_iter()
            .map(|(seat, polygon)| {
                let points = polygon
                    .points()
                    .iter()
                    .map(|p| [f64::from(p.x), f64::from(p.y)])
                    .collect();
                (seat, points)
            })
            .collect();
        Self {
            vertices,
            ref_width: reference.map(|r| r.width),
            ref_height: reference.map(|r| r.height),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read seat geometry {}", path.display()))?;
        Self::from_json_str(&raw)
            .with_context(|| format!("invalid seat geometry {}", path.display()))
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let doc: GeometryDocument =
            serde_json::from_str(raw).context("expected a seat map or a meta/rois document")?;
        let (meta, rois) = match doc {
            GeometryDocument::Wrapped { meta, rois } => (meta, rois),
            GeometryDocument::Flat(rois) => (GeometryMeta::default(), rois),
        };

        let mut vertices = BTreeMap::new();
        for (key, points) in rois {
            let seat: SeatId = key.parse()?;
            if points.is_empty() {
                return Err(anyhow!("seat {} has an empty polygon", seat));
            }
            if vertices.insert(seat, points).is_some() {
                return Err(anyhow!("seat {} is defined more than once", seat));
            }
        }
        if vertices.is_empty() {
            return Err(anyhow!("seat geometry defines no seats"));
        }
        if meta.ref_w == Some(0) || meta.ref_h == Some(0) {
            return Err(anyhow!("reference dimensions must be non-zero"));
        }

        Ok(Self {
            vertices,
            ref_width: meta.ref_w,
            ref_height: meta.ref_h,
        })
    }

    pub fn seat_count(&self) -> usize {
        self.vertices.len()
    }

    /// Fit the geometry to a live frame. A missing reference dimension takes
    /// the target's value, so that axis is left unscaled.
    pub fn fit(&self, target: FrameSize) -> SeatLayout {
        let reference = FrameSize::new(
            self.ref_width.unwrap_or(target.width),
            self.ref_height.unwrap_or(target.height),
        );
        SeatLayout::new(rescale_polygons(&self.vertices, Some(reference), target))
    }
}

// ----------------------------------------------------------------------------
// Fitted layout
// ----------------------------------------------------------------------------

/// Seat polygons in live-frame pixels plus their cached centers.
#[derive(Clone, Debug)]
pub struct SeatLayout {
    polygons: BTreeMap<SeatId, Polygon>,
    centers: BTreeMap<SeatId, Point>,
}

impl SeatLayout {
    pub fn new(polygons: BTreeMap<SeatId, Polygon>) -> Self {
        let centers = polygons
            .iter()
            .map(|(seat, polygon)| (*seat, centroid(polygon)))
            .collect();
        Self { polygons, centers }
    }

    pub fn seat_ids(&self) -> impl Iterator<Item = SeatId> + '_ {
        self.polygons.keys().copied()
    }

    pub fn polygon(&self, seat: SeatId) -> Option<&Polygon> {
        self.polygons.get(&seat)
    }

    pub fn center(&self, seat: SeatId) -> Option<Point> {
        self.centers.get(&seat).copied()
    }

    /// Seats in id order with their polygon and center.
    pub fn seats(&self) -> impl Iterator<Item = (SeatId, &Polygon, Point)> + '_ {
        self.polygons
            .iter()
            .map(|(seat, polygon)| (*seat, polygon, self.centers[seat]))
    }

    pub fn len(&self) -> usize {
        self.polygons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seat_ids_normalize_zero_padding() {
        assert_eq!("05".parse::<SeatId>().unwrap(), SeatId::new(5));
        assert_eq!(" 12 ".parse::<SeatId>().unwrap(), SeatId::new(12));
        assert!("A1".parse::<SeatId>().is_err());
        assert!("-3".parse::<SeatId>().is_err());
    }

    #[test]
    fn seat_id_serde_accepts_numbers_and_strings() {
        let from_num: SeatId = serde_json::from_str("7").unwrap();
        let from_str: SeatId = serde_json::from_str("\"007\"").unwrap();
        assert_eq!(from_num, from_str);
        assert_eq!(serde_json::to_string(&from_num).unwrap(), "\"7\"");

        let map: BTreeMap<SeatId, bool> = serde_json::from_str(r#"{"02": true}"#).unwrap();
        assert_eq!(map.get(&SeatId::new(2)), Some(&true));
    }

    #[test]
    fn parses_flat_document_without_scaling() {
        let geometry =
            SeatGeometry::from_json_str(r#"{"1": [[0,0],[10,0],[10,10],[0,10]]}"#).unwrap();
        let layout = geometry.fit(FrameSize::new(1920, 1080));
        assert_eq!(layout.len(), 1);
        assert_eq!(layout.center(SeatId::new(1)), Some(Point::new(5, 5)));
        assert_eq!(
            layout.polygon(SeatId::new(1)).unwrap().points()[2],
            Point::new(10, 10)
        );
    }

    #[test]
    fn parses_wrapped_document_and_rescales() {
        let raw = r#"{
            "meta": {"ref_w": 640, "ref_h": 360},
            "rois": {
                "01": [[0,0],[64,0],[64,36],[0,36]],
                "2":  [[100,100],[200,100],[200,200],[100,200]]
            }
        }"#;
        let layout = SeatGeometry::from_json_str(raw)
            .unwrap()
            .fit(FrameSize::new(1280, 720));
        let ids: Vec<_> = layout.seat_ids().collect();
        assert_eq!(ids, vec![SeatId::new(1), SeatId::new(2)]);
        assert_eq!(
            layout.polygon(SeatId::new(1)).unwrap().points()[2],
            Point::new(128, 72)
        );
        assert_eq!(layout.center(SeatId::new(2)), Some(Point::new(300, 300)));
    }

    #[test]
    fn fractional_vertices_are_scaled_before_truncation() {
        let raw = r#"{
            "meta": {"ref_w": 100, "ref_h": 100},
            "rois": {"1": [[10.6, 0.5], [20.0, 0.5], [20.0, 10.7]]}
        }"#;
        let layout = SeatGeometry::from_json_str(raw)
            .unwrap()
            .fit(FrameSize::new(200, 200));
        assert_eq!(
            layout.polygon(SeatId::new(1)).unwrap().points(),
            &[Point::new(21, 1), Point::new(40, 1), Point::new(40, 21)]
        );

        let unscaled = SeatGeometry::from_json_str(raw)
            .unwrap()
            .fit(FrameSize::new(100, 100));
        assert_eq!(
            unscaled.polygon(SeatId::new(1)).unwrap().points()[0],
            Point::new(10, 0)
        );
    }

    #[test]
    fn wrapped_document_without_reference_is_unscaled() {
        let raw = r#"{"meta": {}, "rois": {"3": [[10,10],[20,10],[20,20]]}}"#;
        let layout = SeatGeometry::from_json_str(raw)
            .unwrap()
            .fit(FrameSize::new(800, 600));
        assert_eq!(
            layout.polygon(SeatId::new(3)).unwrap().points()[1],
            Point::new(20, 10)
        );
    }

    #[test]
    fn rejects_malformed_documents() {
        assert!(SeatGeometry::from_json_str(r#"{"window": [[0,0],[1,1],[0,1]]}"#).is_err());
        assert!(SeatGeometry::from_json_str(r#"{"1": []}"#).is_err());
        assert!(SeatGeometry::from_json_str(r#"{}"#).is_err());
        assert!(SeatGeometry::from_json_str(r#"{"1": [[0,0]], "01": [[1,1]]}"#).is_err());
        assert!(SeatGeometry::from_json_str("[1, 2]").is_err());
    }
}
