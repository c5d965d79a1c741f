use std::fmt;

use geo::{Coord, MapCoords, MultiPolygon};
use proj4rs::{proj::Proj as Proj4, transform::transform};

use crate::error::{PartitionError, Result};

/// Coordinate reference, identified by EPSG code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Crs(u32);

impl Crs {
    /// WGS84 longitude/latitude, used for display.
    pub const WGS84: Crs = Crs(4326);
    /// Spherical web mercator.
    pub const WEB_MERCATOR: Crs = Crs(3857);
    /// POSGAR 94 / Argentina 5, the planar reference of the Buenos Aires data.
    pub const POSGAR94_AR5: Crs = Crs(22185);

    pub fn from_epsg(code: u32) -> Result<Self> {
        let crs = Crs(code);
        crs.proj4()?;
        Ok(crs)
    }

    #[inline]
    pub fn epsg(&self) -> u32 {
        self.0
    }

    /// Angular (degree) coordinates rather than planar units.
    #[inline]
    pub fn is_geographic(&self) -> bool {
        self.0 == 4326
    }

    /// OGC URN as written in the legacy GeoJSON `crs` member.
    pub fn urn(&self) -> String {
        format!("urn:ogc:def:crs:EPSG::{}", self.0)
    }

    /// Parse `EPSG:22185`, `urn:ogc:def:crs:EPSG::22185` or the OGC CRS84 alias.
    pub fn parse(name: &str) -> Result<Self> {
        let name = name.trim();
        if name.ends_with("CRS84") {
            return Ok(Crs::WGS84);
        }
        let code = name
            .rsplit(':')
            .next()
            .and_then(|c| c.parse::<u32>().ok())
            .ok_or_else(|| PartitionError::Projection(format!("unrecognised CRS name: {name}")))?;
        Crs::from_epsg(code)
    }

    fn proj4(&self) -> Result<&'static str> {
        match self.0 {
            4326 => Ok("+proj=longlat +datum=WGS84 +no_defs +type=crs"),
            3857 => Ok("+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +no_defs +type=crs"),
            22185 => Ok("+proj=tmerc +lat_0=-90 +lon_0=-60 +k=1 +x_0=5500000 +y_0=0 +ellps=WGS84 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs +type=crs"),
            code => Err(PartitionError::Projection(format!("no projection definition for EPSG:{code}"))),
        }
    }

    fn build(&self) -> Result<Proj4> {
        let proj_string = self.proj4()?;
        Proj4::from_proj_string(proj_string)
            .map_err(|e| PartitionError::Projection(format!("failed to build PROJ.4 {proj_string}: {e}")))
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.0)
    }
}

/// Reusable transform between two references.
pub struct Reprojector {
    from: Crs,
    to: Crs,
    projs: Option<(Proj4, Proj4)>,
}

impl Reprojector {
    pub fn new(from: Crs, to: Crs) -> Result<Self> {
        let projs = if from == to { None } else { Some((from.build()?, to.build()?)) };
        Ok(Reprojector { from, to, projs })
    }

    pub fn is_identity(&self) -> bool {
        self.projs.is_none()
    }

    pub fn coord(&self, coord: Coord<f64>) -> Result<Coord<f64>> {
        let Some((src, dst)) = &self.projs else {
            return Ok(coord);
        };
        // Geographic input and output are in radians.
        let mut point = if self.from.is_geographic() {
            (coord.x.to_radians(), coord.y.to_radians(), 0.0)
        } else {
            (coord.x, coord.y, 0.0)
        };
        transform(src, dst, &mut point)
            .map_err(|e| PartitionError::Projection(format!("{} -> {}: {e}", self.from, self.to)))?;
        Ok(if self.to.is_geographic() {
            Coord { x: point.0.to_degrees(), y: point.1.to_degrees() }
        } else {
            Coord { x: point.0, y: point.1 }
        })
    }

    pub fn multi_polygon(&self, shape: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>> {
        if self.is_identity() {
            return Ok(shape.clone());
        }
        shape.try_map_coords(|coord| self.coord(coord))
    }
}
