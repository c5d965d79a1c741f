use geo::{Coord, LineString, MultiPolygon, Polygon};
use geojson::{Feature, FeatureCollection, GeoJson, Geometry as GeoJsonGeometry, JsonObject, Value as GeoJsonValue};
use serde_json::{json, Value as JsonValue};

use crate::crs::Crs;
use crate::error::{PartitionError, Result};
use crate::model::{Partition, PartitionSet, RegionId};

const REGION_ID: &str = "region_id";
const LABEL: &str = "label";
const GROUP: &str = "group";

// Convert one GeoJSON ring into a geo ring; Polygon::new closes it if needed
fn ring_from_positions(ring: &[Vec<f64>]) -> Result<LineString<f64>> {
    ring.iter()
        .map(|position| match position.as_slice() {
            [x, y, ..] => Ok(Coord { x: *x, y: *y }),
            _ => Err(PartitionError::data("position with fewer than two ordinates")),
        })
        .collect::<Result<Vec<_>>>()
        .map(LineString::new)
}

fn polygon_from_rings(rings: &[Vec<Vec<f64>>]) -> Result<Polygon<f64>> {
    let (exterior, holes) = rings
        .split_first()
        .ok_or_else(|| PartitionError::data("polygon without an exterior ring"))?;
    let holes = holes
        .iter()
        .map(|ring| ring_from_positions(ring))
        .collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(ring_from_positions(exterior)?, holes))
}

/// Read a polygonal GeoJSON geometry. Returns `None` for non-polygonal types.
pub(crate) fn multi_polygon_from_value(value: &GeoJsonValue) -> Option<Result<MultiPolygon<f64>>> {
    match value {
        GeoJsonValue::Polygon(rings) => Some(polygon_from_rings(rings).map(|p| MultiPolygon::new(vec![p]))),
        GeoJsonValue::MultiPolygon(polygons) => Some(
            polygons
                .iter()
                .map(|rings| polygon_from_rings(rings))
                .collect::<Result<Vec<_>>>()
                .map(MultiPolygon::new),
        ),
        _ => None,
    }
}

fn ring_to_positions(ring: &LineString<f64>) -> Vec<Vec<f64>> {
    ring.coords().map(|c| vec![c.x, c.y]).collect()
}

pub(crate) fn multi_polygon_to_value(shape: &MultiPolygon<f64>) -> GeoJsonValue {
    let polygons = shape
        .0
        .iter()
        .map(|polygon| {
            let mut rings = vec![ring_to_positions(polygon.exterior())];
            rings.extend(polygon.interiors().iter().map(ring_to_positions));
            rings
        })
        .collect();
    GeoJsonValue::MultiPolygon(polygons)
}

fn crs_member(crs: Crs) -> JsonValue {
    json!({ "type": "name", "properties": { "name": crs.urn() } })
}

/// Read the legacy `crs` member of a collection, if present.
pub(crate) fn crs_from_members(members: Option<&JsonObject>) -> Result<Option<Crs>> {
    let Some(crs) = members.and_then(|m| m.get("crs")) else {
        return Ok(None);
    };
    let name = crs
        .pointer("/properties/name")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| PartitionError::data("crs member without properties.name"))?;
    Crs::parse(name).map(Some)
}

/// Encode a partition set as a self-describing FeatureCollection.
pub fn encode(set: &PartitionSet) -> FeatureCollection {
    let features = set
        .partitions
        .iter()
        .map(|partition| {
            let mut properties = JsonObject::new();
            properties.insert(REGION_ID.to_string(), json!(partition.region_id.as_str()));
            properties.insert(LABEL.to_string(), json!(partition.label));
            properties.insert(GROUP.to_string(), json!(partition.group));
            Feature {
                bbox: None,
                geometry: Some(GeoJsonGeometry::new(multi_polygon_to_value(&partition.geometry))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    let mut members = JsonObject::new();
    members.insert("crs".to_string(), crs_member(set.crs));
    members.insert(REGION_ID.to_string(), json!(set.region_id.as_str()));

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: Some(members),
    }
}

fn string_property<'a>(properties: &'a JsonObject, key: &str) -> Result<&'a str> {
    properties
        .get(key)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| PartitionError::data(format!("feature property '{key}' missing or not a string")))
}

/// Decode a FeatureCollection written by [`encode`].
pub fn decode(collection: &FeatureCollection) -> Result<PartitionSet> {
    let members = collection.foreign_members.as_ref();
    let region_id = members
        .and_then(|m| m.get(REGION_ID))
        .and_then(RegionId::from_json)
        .ok_or_else(|| PartitionError::data("collection without region_id"))?;
    let crs = crs_from_members(members)?.ok_or_else(|| PartitionError::data("collection without crs"))?;

    let mut partitions = Vec::with_capacity(collection.features.len());
    for feature in &collection.features {
        let properties = feature
            .properties
            .as_ref()
            .ok_or_else(|| PartitionError::data("partition feature without properties"))?;
        let feature_region = RegionId::new(string_property(properties, REGION_ID)?);
        if feature_region != region_id {
            return Err(PartitionError::data(format!(
                "partition of region {feature_region} stored under region {region_id}"
            )));
        }
        let group = properties
            .get(GROUP)
            .and_then(JsonValue::as_u64)
            .ok_or_else(|| PartitionError::data("feature property 'group' missing"))? as usize;
        let label = string_property(properties, LABEL)?.to_string();
        let geometry = feature
            .geometry
            .as_ref()
            .and_then(|g| multi_polygon_from_value(&g.value))
            .ok_or_else(|| PartitionError::data(format!("partition '{label}' has no polygonal geometry")))??;

        partitions.push(Partition {
            region_id: feature_region,
            group,
            label,
            geometry,
        });
    }

    Ok(PartitionSet { region_id, crs, partitions })
}

pub fn to_bytes(set: &PartitionSet) -> Result<Vec<u8>> {
    serde_json::to_vec(&encode(set)).map_err(|e| PartitionError::cache(&set.region_id, e))
}

pub fn from_bytes(bytes: &[u8]) -> Result<PartitionSet> {
    let text = std::str::from_utf8(bytes).map_err(|e| PartitionError::data(format!("entry is not UTF-8: {e}")))?;
    match text.parse::<GeoJson>() {
        Ok(GeoJson::FeatureCollection(fc)) => decode(&fc),
        Ok(_) => Err(PartitionError::data("entry is not a FeatureCollection")),
        Err(e) => Err(PartitionError::data(format!("entry is not valid GeoJSON: {e}"))),
    }
}
