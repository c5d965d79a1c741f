use geojson::FeatureCollection;

use crate::codec;
use crate::crs::{Crs, Reprojector};
use crate::error::Result;
use crate::model::{Partition, PartitionSet};

/// Which partitions of a region to show.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selection {
    #[default]
    All,
    /// A single partition, by label.
    Part(String),
}

impl Selection {
    /// `None` or the literal "All"/"Todas" select everything.
    pub fn from_label(label: Option<&str>) -> Self {
        match label.map(str::trim) {
            None | Some("") => Selection::All,
            Some(l) if l.eq_ignore_ascii_case("all") || l.eq_ignore_ascii_case("todas") => Selection::All,
            Some(l) => Selection::Part(l.to_string()),
        }
    }

    pub fn apply<'a>(&self, partitions: &'a [Partition]) -> Vec<&'a Partition> {
        match self {
            Selection::All => partitions.iter().collect(),
            Selection::Part(label) => partitions.iter().filter(|p| &p.label == label).collect(),
        }
    }

    /// Copy of `set` restricted to the selection.
    pub fn restrict(&self, set: &PartitionSet) -> PartitionSet {
        PartitionSet {
            region_id: set.region_id.clone(),
            crs: set.crs,
            partitions: self.apply(&set.partitions).into_iter().cloned().collect(),
        }
    }
}

/// Labels in display order, for selection menus.
pub fn labels(partitions: &[Partition]) -> Vec<&str> {
    partitions.iter().map(|p| p.label.as_str()).collect()
}

/// Reproject a partition set to WGS84 longitude/latitude.
pub fn to_geographic(set: &PartitionSet) -> Result<PartitionSet> {
    let project = Reprojector::new(set.crs, Crs::WGS84)?;
    let partitions = set.partitions.iter()
        .map(|p| Ok(Partition { geometry: project.multi_polygon(&p.geometry)?, ..p.clone() }))
        .collect::<Result<Vec<_>>>()?;
    Ok(PartitionSet { region_id: set.region_id.clone(), crs: Crs::WGS84, partitions })
}

/// Display-ready GeoJSON of the selected partitions in lon/lat.
pub fn export(set: &PartitionSet, selection: &Selection) -> Result<FeatureCollection> {
    let geographic = to_geographic(&selection.restrict(set))?;
    Ok(codec::encode(&geographic))
}
