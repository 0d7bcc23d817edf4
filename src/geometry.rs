//! Pixel-space geometry for seat polygons and detection boxes.
//!
//! Polygons use integer pixel vertices. Boxes use `f32` corners as produced by
//! detectors. All functions are pure and allocation-light; they run once per
//! anchor per seat per frame.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Area magnitude below which a polygon is treated as degenerate.
const DEGENERATE_AREA_EPS: f64 = 1e-6;

/// Added to the IoU denominator so empty boxes never divide by zero.
const IOU_EPS: f32 = 1e-6;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance, exact in integer arithmetic.
    pub fn distance_sq(self, other: Point) -> i64 {
        let dx = i64::from(self.x) - i64::from(other.x);
        let dy = i64::from(self.y) - i64::from(other.y);
        dx * dx + dy * dy
    }

    pub fn distance(self, other: Point) -> f64 {
        (self.distance_sq(other) as f64).sqrt()
    }
}

/// Frame dimensions in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn longest_side(self) -> u32 {
        self.width.max(self.height)
    }
}

/// Axis-aligned box in corner form (x1, y1, x2, y2).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub const fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Build from center form (cx, cy, w, h).
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
        }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Midpoint of the bottom edge, truncated to whole pixels.
    pub fn bottom_mid(&self) -> Point {
        Point::new(((self.x1 + self.x2) / 2.0) as i32, self.y2 as i32)
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        iou(self, other)
    }
}

/// Simple polygon in pixel coordinates. Vertex order is preserved as authored.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Polygon {
    points: Vec<Point>,
}

impl Polygon {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    /// Scale authored vertices, truncating to whole pixels only after scaling.
    pub fn from_scaled_vertices(vertices: &[[f64; 2]], sx: f64, sy: f64) -> Self {
        Self::new(
            vertices
                .iter()
                .map(|[x, y]| Point::new((x * sx) as i32, (y * sy) as i32))
                .collect(),
        )
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Iterate the closed edge loop as (start, end) pairs.
    fn edges(&self) -> impl Iterator<Item = (Point, Point)> + '_ {
        let n = self.points.len();
        (0..n).map(move |i| (self.points[i], self.points[(i + 1) % n]))
    }
}

impl From<Vec<(i32, i32)>> for Polygon {
    fn from(points: Vec<(i32, i32)>) -> Self {
        Self::new(points.into_iter().map(|(x, y)| Point::new(x, y)).collect())
    }
}

/// Area centroid from the polygon moments.
///
/// Falls back to the vertex mean when the signed area is (near) zero, which
/// covers collinear and single-point polygons. Coordinates truncate toward zero.
pub fn centroid(polygon: &Polygon) -> Point {
    let mut m00 = 0.0f64;
    let mut m10 = 0.0f64;
    let mut m01 = 0.0f64;

    for (a, b) in polygon.edges() {
        let (ax, ay) = (f64::from(a.x), f64::from(a.y));
        let (bx, by) = (f64::from(b.x), f64::from(b.y));
        let cross = ax * by - bx * ay;
        m00 += cross;
        m10 += (ax + bx) * cross;
        m01 += (ay + by) * cross;
    }
    m00 /= 2.0;

    if m00.abs() < DEGENERATE_AREA_EPS {
        return vertex_mean(polygon);
    }

    let cx = m10 / (6.0 * m00);
    let cy = m01 / (6.0 * m00);
    Point::new(cx as i32, cy as i32)
}

fn vertex_mean(polygon: &Polygon) -> Point {
    if polygon.is_empty() {
        return Point::default();
    }
    let n = polygon.len() as f64;
    let (sx, sy) = polygon.points().iter().fold((0.0f64, 0.0f64), |(sx, sy), p| {
        (sx + f64::from(p.x), sy + f64::from(p.y))
    });
    Point::new((sx / n) as i32, (sy / n) as i32)
}

/// Inclusive containment: points on an edge or vertex count as inside.
pub fn point_in_polygon(point: Point, polygon: &Polygon) -> bool {
    if polygon.is_empty() {
        return false;
    }
    if polygon.edges().any(|(a, b)| on_segment(point, a, b)) {
        return true;
    }

    let (px, py) = (f64::from(point.x), f64::from(point.y));
    let mut inside = false;
    for (a, b) in polygon.edges() {
        if (a.y > point.y) != (b.y > point.y) {
            let (ax, ay) = (f64::from(a.x), f64::from(a.y));
            let (bx, by) = (f64::from(b.x), f64::from(b.y));
            let x_cross = ax + (py - ay) * (bx - ax) / (by - ay);
            if px < x_cross {
                inside = !inside;
            }
        }
    }
    inside
}

fn on_segment(p: Point, a: Point, b: Point) -> bool {
    let (px, py) = (i64::from(p.x), i64::from(p.y));
    let (ax, ay) = (i64::from(a.x), i64::from(a.y));
    let (bx, by) = (i64::from(b.x), i64::from(b.y));
    let cross = (bx - ax) * (py - ay) - (by - ay) * (px - ax);
    cross == 0 && px >= ax.min(bx) && px <= ax.max(bx) && py >= ay.min(by) && py <= ay.max(by)
}

/// Intersection over union of two boxes. Zero when they do not overlap.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let ix1 = a.x1.max(b.x1);
    let iy1 = a.y1.max(b.y1);
    let ix2 = a.x2.min(b.x2);
    let iy2 = a.y2.min(b.y2);

    let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
    if inter <= 0.0 {
        return 0.0;
    }
    inter / (a.area() + b.area() - inter + IOU_EPS)
}

/// Pixel-inclusive bounding rectangle: a polygon spanning columns 0..=10
/// yields x2 = 11, so the rectangle covers every vertex pixel.
pub fn bounding_rect(polygon: &Polygon) -> BoundingBox {
    let Some(first) = polygon.points().first() else {
        return BoundingBox::default();
    };
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in polygon.points() {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    BoundingBox::new(
        min_x as f32,
        min_y as f32,
        (max_x + 1) as f32,
        (max_y + 1) as f32,
    )
}

/// Rescale authored seat vertices from the authoring resolution to the live
/// frame size.
///
/// X and Y scale independently, and vertices are truncated to whole pixels only
/// after scaling. Without a reference size the target doubles as the reference
/// and vertices are only truncated.
pub fn rescale_polygons<K: Ord + Clone>(
    polygons: &BTreeMap<K, Vec<[f64; 2]>>,
    reference: Option<FrameSize>,
    target: FrameSize,
) -> BTreeMap<K, Polygon> {
    let reference = reference.unwrap_or(target);
    let sx = f64::from(target.width) / f64::from(reference.width);
    let sy = f64::from(target.height) / f64::from(reference.height);

    polygons
        .iter()
        .map(|(key, vertices)| (key.clone(), Polygon::from_scaled_vertices(vertices, sx, sy)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x0: i32, y0: i32, x1: i32, y1: i32) -> Polygon {
        Polygon::from(vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1)])
    }

    #[test]
    fn centroid_of_square_is_its_center() {
        assert_eq!(centroid(&square(0, 0, 10, 10)), Point::new(5, 5));
        assert_eq!(centroid(&square(20, 40, 60, 100)), Point::new(40, 70));
    }

    #[test]
    fn centroid_ignores_winding_direction() {
        let cw = Polygon::from(vec![(0, 0), (0, 10), (10, 10), (10, 0)]);
        assert_eq!(centroid(&cw), Point::new(5, 5));
    }

    #[test]
    fn centroid_is_area_weighted_not_vertex_mean() {
        // Extra collinear vertex on the bottom edge shifts the vertex mean but not the area centroid.
        let poly = Polygon::from(vec![(0, 0), (2, 0), (10, 0), (10, 10), (0, 10)]);
        assert_eq!(centroid(&poly), Point::new(5, 5));
    }

    #[test]
    fn degenerate_polygon_falls_back_to_vertex_mean() {
        let line = Polygon::from(vec![(0, 0), (4, 0), (8, 0)]);
        assert_eq!(centroid(&line), Point::new(4, 0));
        assert_eq!(centroid(&Polygon::default()), Point::new(0, 0));
    }

    #[test]
    fn point_in_polygon_is_inclusive() {
        let poly = square(0, 0, 10, 10);
        assert!(point_in_polygon(Point::new(5, 5), &poly));
        assert!(point_in_polygon(Point::new(0, 0), &poly));
        assert!(point_in_polygon(Point::new(10, 4), &poly));
        assert!(!point_in_polygon(Point::new(11, 5), &poly));
        assert!(!point_in_polygon(Point::new(-1, -1), &poly));
    }

    #[test]
    fn point_in_concave_polygon() {
        // U shape with the notch open at the top between x=4..6.
        let u = Polygon::from(vec![
            (0, 0),
            (4, 0),
            (4, 6),
            (6, 6),
            (6, 0),
            (10, 0),
            (10, 10),
            (0, 10),
        ]);
        assert!(point_in_polygon(Point::new(2, 2), &u));
        assert!(!point_in_polygon(Point::new(5, 2), &u));
        assert!(point_in_polygon(Point::new(5, 8), &u));
    }

    #[test]
    fn iou_matches_hand_computation() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 5.0, 15.0, 15.0);
        assert!((iou(&a, &b) - 25.0 / 175.0).abs() < 1e-4);
        assert!((a.iou(&a) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn iou_is_zero_without_overlap() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let touching = BoundingBox::new(10.0, 0.0, 20.0, 10.0);
        let far = BoundingBox::new(50.0, 50.0, 60.0, 60.0);
        assert_eq!(iou(&a, &touching), 0.0);
        assert_eq!(iou(&a, &far), 0.0);
        assert_eq!(iou(&BoundingBox::default(), &BoundingBox::default()), 0.0);
    }

    #[test]
    fn center_form_converts_to_corners() {
        let bbox = BoundingBox::from_center(50.0, 40.0, 20.0, 10.0);
        assert_eq!(bbox, BoundingBox::new(40.0, 35.0, 60.0, 45.0));
    }

    #[test]
    fn bounding_rect_is_pixel_inclusive() {
        let rect = bounding_rect(&square(2, 3, 10, 12));
        assert_eq!(rect, BoundingBox::new(2.0, 3.0, 11.0, 13.0));
    }

    #[test]
    fn rescale_applies_independent_axes() {
        let mut polys = BTreeMap::new();
        polys.insert(1u32, vec![[0.0, 0.0], [100.0, 0.0], [100.0, 50.0], [0.0, 50.0]]);
        let scaled = rescale_polygons(
            &polys,
            Some(FrameSize::new(640, 480)),
            FrameSize::new(1280, 720),
        );
        assert_eq!(scaled[&1], square(0, 0, 200, 75));
    }

    #[test]
    fn fractional_vertices_truncate_after_scaling() {
        let mut polys = BTreeMap::new();
        polys.insert(1u32, vec![[10.6, 3.3], [0.4, 7.9]]);
        let scaled = rescale_polygons(
            &polys,
            Some(FrameSize::new(100, 200)),
            FrameSize::new(200, 300),
        );
        assert_eq!(scaled[&1].points(), &[Point::new(21, 4), Point::new(0, 11)]);
    }

    #[test]
    fn rescale_without_reference_only_truncates() {
        let mut polys = BTreeMap::new();
        polys.insert("a", vec![[3.0, 7.0], [33.9, 7.0], [33.9, 77.2], [3.0, 77.2]]);
        let scaled = rescale_polygons(&polys, None, FrameSize::new(1920, 1080));
        assert_eq!(scaled["a"], square(3, 7, 33, 77));
    }
}
