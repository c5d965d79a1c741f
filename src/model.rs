use std::cmp::Ordering;
use std::fmt;

use geo::{Centroid, MultiPolygon, Point};
use serde_json::Value as JsonValue;

use crate::crs::Crs;

/// Identity of a region, e.g. a comuna number.
///
/// Ids are kept as text so numeric and named regions share one type. Ordering
/// is numeric when both sides parse as integers, so `2` sorts before `10`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegionId(String);

impl RegionId {
    pub fn new(id: impl Into<String>) -> Self {
        RegionId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Read an id out of a GeoJSON property value. Whole floats such as `7.0`
    /// are normalised to `7`.
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::String(s) => RegionId::parse(s),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(RegionId(i.to_string()))
                } else {
                    let f = n.as_f64()?;
                    if f.fract() == 0.0 && f.is_finite() {
                        Some(RegionId(format!("{}", f as i64)))
                    } else {
                        Some(RegionId(f.to_string()))
                    }
                }
            }
            _ => None,
        }
    }

    /// Read an id typed by a user or stored as text. Surrounding whitespace is
    /// dropped and integers lose sign and padding, so `" 07"` and `"7.0"` both
    /// name region `7`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if let Ok(n) = text.parse::<i64>() {
            return Some(RegionId(n.to_string()));
        }
        if let Some((whole, fraction)) = text.split_once('.') {
            if !fraction.is_empty() && fraction.bytes().all(|b| b == b'0') {
                if let Ok(n) = whole.parse::<i64>() {
                    return Some(RegionId(n.to_string()));
                }
            }
        }
        Some(RegionId(text.to_string()))
    }

    /// File-name-safe rendering of the id. Bytes outside `[A-Za-z0-9-]` are
    /// percent-encoded, so distinct ids never share a stem.
    pub fn file_stem(&self) -> String {
        let mut stem = String::with_capacity(self.0.len());
        for b in self.0.bytes() {
            if b.is_ascii_alphanumeric() || b == b'-' {
                stem.push(char::from(b));
            } else {
                stem.push_str(&format!("%{b:02X}"));
            }
        }
        stem
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RegionId {
    fn from(s: &str) -> Self {
        RegionId::new(s)
    }
}

impl From<String> for RegionId {
    fn from(s: String) -> Self {
        RegionId(s)
    }
}

impl From<u32> for RegionId {
    fn from(n: u32) -> Self {
        RegionId(n.to_string())
    }
}

impl Ord for RegionId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.0.parse::<i64>(), other.0.parse::<i64>()) {
            (Ok(a), Ok(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for RegionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// An administrative area to subdivide.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub id: RegionId,
    pub geometry: MultiPolygon<f64>,
    pub crs: Crs,
}

/// One urban block, the atomic unit of assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub geometry: MultiPolygon<f64>,
}

impl Block {
    pub fn new(geometry: impl Into<MultiPolygon<f64>>) -> Self {
        Block { geometry: geometry.into() }
    }

    /// Planar centroid, `None` for an empty geometry.
    pub fn centroid(&self) -> Option<Point<f64>> {
        self.geometry.centroid()
    }
}

/// One produced sub-region: the merged blocks of a single cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub region_id: RegionId,
    pub group: usize,
    pub label: String,
    pub geometry: MultiPolygon<f64>,
}

impl Partition {
    pub fn new(region_id: RegionId, group: usize, geometry: MultiPolygon<f64>) -> Self {
        let label = Partition::label_for(&region_id, group);
        Partition { region_id, group, label, geometry }
    }

    /// Display label, numbered from 1 even though group indices start at 0.
    pub fn label_for(region_id: &RegionId, group: usize) -> String {
        format!("{} - Part {}", region_id, group + 1)
    }
}

/// All partitions of one region together with the CRS they are expressed in.
/// This is the unit the cache stores.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionSet {
    pub region_id: RegionId,
    pub crs: Crs,
    pub partitions: Vec<Partition>,
}

impl PartitionSet {
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.partitions.iter().map(|p| p.label.as_str()).collect()
    }
}
