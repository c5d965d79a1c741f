use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use geo::{MultiPolygon, SimplifyVwPreserve};
use geojson::{GeoJson, JsonObject};
use tracing::{debug, info};

use crate::codec::{crs_from_members, multi_polygon_from_value};
use crate::crs::{Crs, Reprojector};
use crate::error::{PartitionError, Result};
use crate::filter::BlockIndex;
use crate::merge::union_all;
use crate::model::{Block, Region, RegionId};

/// How source files are interpreted on load.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceOptions {
    /// Reference of the input files when they do not declare one.
    pub source_crs: Crs,
    /// Planar reference every geometry is reprojected into.
    pub working_crs: Crs,
    /// Topology-preserving (Visvalingam-Whyatt) simplification applied to
    /// blocks after reprojection. The threshold is an area in squared working
    /// CRS units.
    pub simplify_tolerance: Option<f64>,
}

impl Default for SourceOptions {
    fn default() -> Self {
        SourceOptions {
            source_crs: Crs::WGS84,
            working_crs: Crs::POSGAR94_AR5,
            simplify_tolerance: None,
        }
    }
}

/// Immutable view of all regions and blocks of one load, in one planar CRS.
#[derive(Debug, Clone)]
pub struct Snapshot {
    crs: Crs,
    regions: Vec<Region>,
    blocks: BlockIndex,
}

impl Snapshot {
    pub fn new(crs: Crs, regions: Vec<Region>, blocks: Vec<Block>) -> Result<Self> {
        if let Some(region) = regions.iter().find(|r| r.crs != crs) {
            return Err(PartitionError::data(format!(
                "region {} is in {} but the snapshot is in {crs}",
                region.id, region.crs
            )));
        }
        Ok(Snapshot { crs, regions, blocks: BlockIndex::new(blocks) })
    }

    #[inline] pub fn crs(&self) -> Crs { self.crs }

    #[inline] pub fn regions(&self) -> &[Region] { &self.regions }

    #[inline] pub fn blocks(&self) -> &BlockIndex { &self.blocks }

    pub fn region(&self, id: &RegionId) -> Option<&Region> {
        self.regions.iter().find(|r| &r.id == id)
    }

    pub fn region_ids(&self) -> Vec<RegionId> {
        self.regions.iter().map(|r| r.id.clone()).collect()
    }
}

/// A polygonal feature: its properties and geometry in the file's own CRS.
pub struct SourceFeature {
    pub properties: JsonObject,
    pub geometry: MultiPolygon<f64>,
}

/// Read every polygonal feature of a GeoJSON FeatureCollection, along with
/// the CRS the file declares, if any.
pub fn load_features(path: &Path) -> Result<(Vec<SourceFeature>, Option<Crs>)> {
    info!(path = %path.display(), "loading features");
    let file = File::open(path)
        .map_err(|e| PartitionError::data(format!("open {}: {e}", path.display())))?;
    let geojson = GeoJson::from_reader(BufReader::new(file))
        .map_err(|e| PartitionError::data(format!("parse {}: {e}", path.display())))?;

    let GeoJson::FeatureCollection(fc) = geojson else {
        return Err(PartitionError::data(format!("{} is not a FeatureCollection", path.display())));
    };
    let declared = crs_from_members(fc.foreign_members.as_ref())?;

    let total = fc.features.len();
    let mut features = Vec::with_capacity(total);
    for (n, feature) in fc.features.into_iter().enumerate() {
        if (n + 1) % 1000 == 0 {
            debug!("processing feature {}/{}", n + 1, total);
        }
        let geometry = feature.geometry
            .ok_or_else(|| PartitionError::data(format!("feature {n} of {} has no geometry", path.display())))?;
        match multi_polygon_from_value(&geometry.value) {
            Some(shape) => features.push(SourceFeature {
                properties: feature.properties.unwrap_or_default(),
                geometry: shape.map_err(|e| PartitionError::data(format!("feature {n} of {}: {e}", path.display())))?,
            }),
            None => debug!(feature = n, "skipping non-polygonal feature"),
        }
    }

    info!(loaded = features.len(), total, "loaded features");
    Ok((features, declared))
}

fn property_ci<'a>(properties: &'a JsonObject, name: &str) -> Option<&'a serde_json::Value> {
    properties.iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value)
}

fn reprojector(declared: Option<Crs>, options: &SourceOptions) -> Result<Reprojector> {
    Reprojector::new(declared.unwrap_or(options.source_crs), options.working_crs)
}

/// Load regions, dissolving features that share the same `id_field` value
/// into one region each. Regions come back sorted by id.
pub fn load_regions(path: &Path, id_field: &str, options: &SourceOptions) -> Result<Vec<Region>> {
    let (features, declared) = load_features(path)?;
    let project = reprojector(declared, options)?;

    let mut pieces: BTreeMap<RegionId, Vec<MultiPolygon<f64>>> = BTreeMap::new();
    for feature in features {
        let id = property_ci(&feature.properties, id_field)
            .and_then(RegionId::from_json)
            .ok_or_else(|| PartitionError::data(format!("feature without a usable '{id_field}' property")))?;
        pieces.entry(id).or_default().push(project.multi_polygon(&feature.geometry)?);
    }

    let regions: Vec<Region> = pieces.into_iter()
        .map(|(id, shapes)| {
            debug!(region = %id, pieces = shapes.len(), "dissolving region");
            Region { id, geometry: union_all(shapes), crs: options.working_crs }
        })
        .collect();
    info!(regions = regions.len(), "regions ready");
    Ok(regions)
}

/// Load blocks, keeping geometry only.
pub fn load_blocks(path: &Path, options: &SourceOptions) -> Result<Vec<Block>> {
    let (features, declared) = load_features(path)?;
    let project = reprojector(declared, options)?;

    features.into_iter()
        .map(|feature| {
            let mut shape = project.multi_polygon(&feature.geometry)?;
            if let Some(tolerance) = options.simplify_tolerance {
                shape = shape.simplify_vw_preserve(&tolerance);
            }
            Ok(Block { geometry: shape })
        })
        .collect()
}

/// Load both collections into a snapshot in `options.working_crs`.
pub fn load_snapshot(regions: &Path, blocks: &Path, id_field: &str, options: &SourceOptions) -> Result<Snapshot> {
    let regions = load_regions(regions, id_field, options)?;
    let blocks = load_blocks(blocks, options)?;
    Snapshot::new(options.working_crs, regions, blocks)
}
