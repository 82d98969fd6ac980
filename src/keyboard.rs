// src/keyboard.rs - key region index: calibrated keycap polygons and depth ranges
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::ConfigError;

pub const POINTS_PER_KEY: usize = 4;

/// Half-open depth band `[min, max)` in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthRange {
    pub min: f32,
    pub max: f32,
}

impl DepthRange {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, depth: f32) -> bool {
        self.min <= depth && depth < self.max
    }
}

/// A calibrated keycap. Immutable once the layout is loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRegion {
    pub name: String,
    pub corners: [Point2<i32>; POINTS_PER_KEY],
    pub depth: DepthRange,
}

impl KeyRegion {
    pub fn new(name: impl Into<String>, corners: [Point2<i32>; POINTS_PER_KEY], depth: DepthRange) -> Self {
        Self {
            name: name.into(),
            corners,
            depth,
        }
    }

    /// Axis-aligned key spanning `(x0, y0)`..`(x1, y1)`, handy for tests and demos.
    pub fn rect(name: impl Into<String>, x0: i32, y0: i32, x1: i32, y1: i32, depth: DepthRange) -> Self {
        Self::new(
            name,
            [
                Point2::new(x0, y0),
                Point2::new(x1, y0),
                Point2::new(x1, y1),
                Point2::new(x0, y1),
            ],
            depth,
        )
    }
}

/// Point-in-polygon over the region's corners; points on an edge count as inside.
pub fn contains(point: Point2<i32>, region: &KeyRegion) -> bool {
    let (px, py) = (point.x as i64, point.y as i64);
    let corners = &region.corners;

    for i in 0..corners.len() {
        let a = corners[i];
        let b = corners[(i + 1) % corners.len()];
        if on_segment(px, py, a, b) {
            return true;
        }
    }

    let mut inside = false;
    let mut j = corners.len() - 1;
    for i in 0..corners.len() {
        let (xi, yi) = (corners[i].x as f64, corners[i].y as f64);
        let (xj, yj) = (corners[j].x as f64, corners[j].y as f64);
        let (fx, fy) = (px as f64, py as f64);
        if (yi > fy) != (yj > fy) && fx < (xj - xi) * (fy - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

fn on_segment(px: i64, py: i64, a: Point2<i32>, b: Point2<i32>) -> bool {
    let (ax, ay, bx, by) = (a.x as i64, a.y as i64, b.x as i64, b.y as i64);
    let cross = (bx - ax) * (py - ay) - (by - ay) * (px - ax);
    cross == 0 && px >= ax.min(bx) && px <= ax.max(bx) && py >= ay.min(by) && py <= ay.max(by)
}

pub fn depth_in_range(depth: f32, region: &KeyRegion) -> bool {
    region.depth.contains(depth)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct PointRecord {
    x: i32,
    y: i32,
}

/// One entry of the region calibration file: `{ "key": "a", "points": [{x, y} x4] }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionRecord {
    key: String,
    points: Vec<PointRecord>,
}

impl RegionRecord {
    pub fn key(&self) -> &str {
        &self.key
    }

    fn corners(&self) -> Result<[Point2<i32>; POINTS_PER_KEY], ConfigError> {
        if self.points.len() != POINTS_PER_KEY {
            return Err(ConfigError::BadPointCount {
                key: self.key.clone(),
                count: self.points.len(),
            });
        }
        Ok(std::array::from_fn(|i| {
            Point2::new(self.points[i].x, self.points[i].y)
        }))
    }
}

fn read_json(path: &Path) -> Result<serde_json::Value, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_region_record(value: serde_json::Value) -> Result<RegionRecord, ConfigError> {
    let shown = value.to_string();
    let record: RegionRecord =
        serde_json::from_value(value).map_err(|e| ConfigError::MalformedRegion(format!("{shown}: {e}")))?;
    record.corners()?;
    Ok(record)
}

/// Loads keycap polygons in file order.
///
/// A missing file yields no regions. Malformed records are skipped with a warning.
pub fn load_regions(path: impl AsRef<Path>) -> Result<Vec<RegionRecord>, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        tracing::warn!(
            "key region file '{}' not found, no keys will be detected",
            path.display()
        );
        return Ok(Vec::new());
    }

    let entries = match read_json(path)? {
        serde_json::Value::Array(entries) => entries,
        other => {
            return Err(ConfigError::MalformedRegion(format!(
                "{}: expected a list of key records, got {}",
                path.display(),
                other
            )))
        }
    };

    let mut records = Vec::with_capacity(entries.len());
    for entry in entries {
        match parse_region_record(entry) {
            Ok(record) => records.push(record),
            Err(e) => tracing::warn!("skipping key region in {}: {e}", path.display()),
        }
    }
    tracing::info!("loaded {} key region(s) from {}", records.len(), path.display());
    Ok(records)
}

#[derive(Debug, Clone, Deserialize)]
struct RowThreshold {
    keys: Vec<String>,
    range: [f32; 2],
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ThresholdFile {
    PerKey(HashMap<String, [f32; 2]>),
    Rows(Vec<RowThreshold>),
}

/// Per-key touch depth bands.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DepthThresholds {
    ranges: HashMap<String, DepthRange>,
}

impl DepthThresholds {
    pub fn insert(&mut self, key: impl Into<String>, min: f32, max: f32) -> Result<(), ConfigError> {
        let key = key.into();
        if !(min < max) {
            return Err(ConfigError::BadRange { key, min, max });
        }
        self.ranges.insert(key, DepthRange::new(min, max));
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<DepthRange> {
        self.ranges.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Loads the depth threshold file: either `{ "key": [min, max] }` or a list of
/// `{ "keys": [...], "range": [min, max] }` rows. A missing file is fatal.
pub fn load_thresholds(path: impl AsRef<Path>) -> Result<DepthThresholds, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ConfigError::MissingThresholds(path.to_path_buf()));
    }

    let file: ThresholdFile =
        serde_json::from_value(read_json(path)?).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    let mut thresholds = DepthThresholds::default();
    let mut add = |key: String, [min, max]: [f32; 2]| {
        if let Err(e) = thresholds.insert(key, min, max) {
            tracing::warn!("ignoring threshold in {}: {e}", path.display());
        }
    };
    match file {
        ThresholdFile::PerKey(map) => {
            for (key, range) in map {
                add(key, range);
            }
        }
        ThresholdFile::Rows(rows) => {
            for row in rows {
                for key in row.keys {
                    add(key, row.range);
                }
            }
        }
    }
    Ok(thresholds)
}

/// Every usable key region in calibration order.
#[derive(Debug, Clone, Default)]
pub struct KeyboardLayout {
    regions: Vec<KeyRegion>,
}

impl KeyboardLayout {
    pub fn new(regions: Vec<KeyRegion>) -> Self {
        Self { regions }
    }

    /// Joins polygons with their depth bands. Keys without a band are skipped.
    pub fn from_parts(records: &[RegionRecord], thresholds: &DepthThresholds) -> Self {
        let mut regions = Vec::with_capacity(records.len());
        for record in records {
            let Some(depth) = thresholds.get(&record.key) else {
                tracing::warn!("key '{}' has no depth threshold, skipped", record.key);
                continue;
            };
            match record.corners() {
                Ok(corners) => regions.push(KeyRegion::new(record.key.clone(), corners, depth)),
                Err(e) => tracing::warn!("{e}"),
            }
        }
        Self { regions }
    }

    pub fn load(regions: impl AsRef<Path>, thresholds: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let thresholds = load_thresholds(thresholds)?;
        let records = load_regions(regions)?;
        Ok(Self::from_parts(&records, &thresholds))
    }

    pub fn regions(&self) -> &[KeyRegion] {
        &self.regions
    }

    pub fn region(&self, name: &str) -> Option<&KeyRegion> {
        self.regions.iter().find(|r| r.name == name)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Index of the first region, in load order, containing both the point and the depth.
    pub fn hit_index(&self, point: Point2<i32>, depth: f32) -> Option<usize> {
        self.regions
            .iter()
            .position(|r| contains(point, r) && depth_in_range(depth, r))
    }

    pub fn hit_test(&self, point: Point2<i32>, depth: f32) -> Option<&KeyRegion> {
        self.hit_index(point, depth).map(|i| &self.regions[i])
    }

    /// Whether the region at `index` still accepts the point and depth.
    ///
    /// Regions are addressed by index since names repeat (left and right SHIFT).
    pub fn still_touching(&self, index: usize, point: Point2<i32>, depth: f32) -> bool {
        self.regions
            .get(index)
            .is_some_and(|r| contains(point, r) && depth_in_range(depth, r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn key_a() -> KeyRegion {
        KeyRegion::rect("a", 100, 100, 150, 150, DepthRange::new(0.20, 0.23))
    }

    #[test]
    fn test_depth_range_is_half_open() {
        let a = key_a();
        assert!(depth_in_range(0.20, &a));
        assert!(depth_in_range(0.229999, &a));
        assert!(!depth_in_range(0.23, &a));
        assert!(!depth_in_range(0.199999, &a));
    }

    #[test]
    fn test_contiguous_rows_have_one_owner() {
        let upper = KeyRegion::rect("q", 0, 0, 10, 10, DepthRange::new(0.211, 0.229));
        let lower = KeyRegion::rect("a", 0, 0, 10, 10, DepthRange::new(0.229, 0.240));
        let layout = KeyboardLayout::new(vec![upper, lower]);
        assert_eq!(layout.hit_test(Point2::new(5, 5), 0.229).unwrap().name, "a");
        assert_eq!(layout.hit_test(Point2::new(5, 5), 0.2289).unwrap().name, "q");
    }

    #[test]
    fn test_boundary_counts_as_inside() {
        let a = key_a();
        assert!(contains(Point2::new(100, 100), &a));
        assert!(contains(Point2::new(150, 125), &a));
        assert!(contains(Point2::new(125, 150), &a));
        assert!(contains(Point2::new(120, 120), &a));
        assert!(!contains(Point2::new(151, 120), &a));
        assert!(!contains(Point2::new(99, 99), &a));
    }

    #[test]
    fn test_skewed_quad() {
        // keycaps seen at an angle are general quadrilaterals
        let key = KeyRegion::new(
            "k",
            [
                Point2::new(10, 0),
                Point2::new(30, 5),
                Point2::new(25, 25),
                Point2::new(0, 20),
            ],
            DepthRange::new(0.2, 0.3),
        );
        assert!(contains(Point2::new(15, 12), &key));
        assert!(contains(Point2::new(14, 1), &key)); // on the top edge
        assert!(!contains(Point2::new(2, 2), &key));
        assert!(!contains(Point2::new(29, 24), &key));
    }

    #[test]
    fn test_hit_test_first_match_wins() {
        let first = KeyRegion::rect("x", 0, 0, 20, 20, DepthRange::new(0.2, 0.3));
        let second = KeyRegion::rect("y", 10, 10, 30, 30, DepthRange::new(0.2, 0.3));
        let layout = KeyboardLayout::new(vec![first, second]);
        assert_eq!(layout.hit_test(Point2::new(15, 15), 0.25).unwrap().name, "x");
        assert_eq!(layout.hit_test(Point2::new(25, 25), 0.25).unwrap().name, "y");
        assert!(layout.hit_test(Point2::new(25, 25), 0.35).is_none());
    }

    #[test]
    fn test_repeated_names_are_distinct_regions() {
        let left = KeyRegion::rect("SHIFT", 0, 100, 80, 140, DepthRange::new(0.2, 0.23));
        let right = KeyRegion::rect("SHIFT", 300, 100, 380, 140, DepthRange::new(0.2, 0.23));
        let layout = KeyboardLayout::new(vec![left, right]);

        let index = layout.hit_index(Point2::new(320, 120), 0.21);
        assert_eq!(index, Some(1));
        assert!(layout.still_touching(1, Point2::new(320, 120), 0.21));
        assert!(!layout.still_touching(0, Point2::new(320, 120), 0.21));
        assert!(!layout.still_touching(2, Point2::new(320, 120), 0.21));
    }

    #[test]
    fn test_load_regions_skips_malformed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keyboard_annotations.json");
        fs::write(
            &path,
            r#"[
                {"key": "a", "points": [{"x":100,"y":100},{"x":150,"y":100},{"x":150,"y":150},{"x":100,"y":150}]},
                {"key": "b", "points": [{"x":1,"y":1},{"x":2,"y":2},{"x":3,"y":3}]},
                {"points": [{"x":1,"y":1},{"x":2,"y":1},{"x":2,"y":2},{"x":1,"y":2}]},
                {"key": "c", "points": [{"x":"left","y":1},{"x":2,"y":1},{"x":2,"y":2},{"x":1,"y":2}]},
                {"key": "SPACE", "points": [{"x":0,"y":200},{"x":300,"y":200},{"x":300,"y":230},{"x":0,"y":230}]}
            ]"#,
        )
        .unwrap();

        let records = load_regions(&path).unwrap();
        let keys: Vec<&str> = records.iter().map(|r| r.key()).collect();
        assert_eq!(keys, vec!["a", "SPACE"]);
    }

    #[test]
    fn test_point_count_error() {
        let value = serde_json::json!({"key": "b", "points": [{"x": 1, "y": 1}]});
        match parse_region_record(value) {
            Err(ConfigError::BadPointCount { key, count }) => {
                assert_eq!(key, "b");
                assert_eq!(count, 1);
            }
            other => panic!("expected BadPointCount, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_region_file_is_empty() {
        let dir = tempdir().unwrap();
        assert!(load_regions(dir.path().join("none.json")).unwrap().is_empty());
    }

    #[test]
    fn test_missing_threshold_file_is_fatal() {
        let dir = tempdir().unwrap();
        let err = load_thresholds(dir.path().join("none.json")).unwrap_err();
        assert!(matches!(err, ConfigError::MissingThresholds(_)));
    }

    #[test]
    fn test_thresholds_per_key_and_rows() {
        let dir = tempdir().unwrap();
        let flat = dir.path().join("flat.json");
        fs::write(&flat, r#"{"a": [0.20, 0.23], "b": [0.3, 0.2]}"#).unwrap();
        let thresholds = load_thresholds(&flat).unwrap();
        assert_eq!(thresholds.get("a"), Some(DepthRange::new(0.20, 0.23)));
        assert_eq!(thresholds.get("b"), None);

        let rows = dir.path().join("rows.json");
        fs::write(
            &rows,
            r#"[
                {"keys": ["q", "w", "e"], "range": [0.211, 0.229]},
                {"keys": ["SPACE", "ENTER", "e"], "range": [0.211, 0.230]}
            ]"#,
        )
        .unwrap();
        let thresholds = load_thresholds(&rows).unwrap();
        assert_eq!(thresholds.len(), 5);
        assert_eq!(thresholds.get("w"), Some(DepthRange::new(0.211, 0.229)));
        assert_eq!(thresholds.get("e"), Some(DepthRange::new(0.211, 0.230)));
    }

    #[test]
    fn test_layout_skips_keys_without_threshold() {
        let dir = tempdir().unwrap();
        let regions = dir.path().join("regions.json");
        let thresholds = dir.path().join("thresholds.json");
        fs::write(
            &regions,
            r#"[
                {"key": "a", "points": [{"x":100,"y":100},{"x":150,"y":100},{"x":150,"y":150},{"x":100,"y":150}]},
                {"key": "z", "points": [{"x":0,"y":0},{"x":10,"y":0},{"x":10,"y":10},{"x":0,"y":10}]}
            ]"#,
        )
        .unwrap();
        fs::write(&thresholds, r#"{"a": [0.20, 0.23]}"#).unwrap();

        let layout = KeyboardLayout::load(&regions, &thresholds).unwrap();
        assert_eq!(layout.len(), 1);
        assert_eq!(layout.region("a"), Some(&key_a()));
        assert!(layout.still_touching(0, Point2::new(120, 120), 0.21));
        assert!(!layout.still_touching(0, Point2::new(120, 120), 0.24));
        assert!(!layout.still_touching(1, Point2::new(5, 5), 0.21));
    }

    proptest! {
        #[test]
        fn rect_contains_matches_bounds(
            x0 in -200i32..200, y0 in -200i32..200,
            w in 1i32..200, h in 1i32..200,
            px in -500i32..500, py in -500i32..500
        ) {
            let key = KeyRegion::rect("k", x0, y0, x0 + w, y0 + h, DepthRange::new(0.1, 0.2));
            let expected = px >= x0 && px <= x0 + w && py >= y0 && py <= y0 + h;
            prop_assert_eq!(contains(Point2::new(px, py), &key), expected);
        }
    }
}
