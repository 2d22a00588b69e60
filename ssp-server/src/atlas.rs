//! # atlas
//!
//! Oceanographic atlases that supply a synthetic cast for a position and
//! time. The distribution loop only sees the `Atlas` trait; which concrete
//! model backs it (RTOFS forecast, WOA09 climatology) is a deployment choice.
//!
//! `FileAtlas` serves casts from a JSON grid exported ahead of time. The
//! grid is a regular lat/lon lattice; lookups are nearest-neighbour.

use std::path::Path;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use ssp_types::{Position, Profile};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum AtlasError {
    #[error("{atlas}: no cast near ({lat:.4}, {lon:.4})")]
    NotFound { atlas: String, lat: f64, lon: f64 },
    #[error("{0} is unavailable")]
    Unavailable(String),
    #[error("failed to read atlas file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse atlas file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Grid node a position snaps to. Two positions in the same cell get the
/// same atlas cast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct GridCell {
    pub lat_index: i64,
    pub lon_index: i64,
}

/// Atlas answer: the cast plus optional min/max envelopes.
#[derive(Debug, Clone)]
pub struct AtlasCast {
    pub profile: Profile,
    pub min: Option<Profile>,
    pub max: Option<Profile>,
}

pub trait Atlas: Send + Sync {
    fn name(&self) -> &str;
    fn grid_coords(&self, lat: f64, lon: f64) -> Result<GridCell, AtlasError>;
    fn query(&self, lat: f64, lon: f64, time: NaiveDateTime) -> Result<AtlasCast, AtlasError>;
}

// ── File-backed grid ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridNode {
    pub lat: f64,
    pub lon: f64,
    pub profile: Profile,
    #[serde(default)]
    pub min: Option<Profile>,
    #[serde(default)]
    pub max: Option<Profile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAtlas {
    pub name: String,
    /// Coordinates of grid index (0, 0).
    pub lat_origin: f64,
    pub lon_origin: f64,
    pub lat_step: f64,
    pub lon_step: f64,
    /// How many cells away a node may be and still answer a query.
    #[serde(default = "default_search_cells")]
    pub search_cells: i64,
    pub nodes: Vec<GridNode>,
}

fn default_search_cells() -> i64 {
    1
}

impl FileAtlas {
    pub async fn load(path: &Path) -> Result<Self, AtlasError> {
        let data = fs::read_to_string(path).await?;
        let atlas: FileAtlas = serde_json::from_str(&data)?;
        if atlas.lat_step <= 0.0 || atlas.lon_step <= 0.0 {
            return Err(AtlasError::Unavailable(format!("{} (non-positive grid step)", atlas.name)));
        }
        info!(
            "Atlas: loaded {} from {} ({} nodes, step {}°×{}°)",
            atlas.name,
            path.display(),
            atlas.nodes.len(),
            atlas.lat_step,
            atlas.lon_step
        );
        Ok(atlas)
    }

    fn wrap_lon(&self, mut lon: f64) -> f64 {
        while lon < self.lon_origin {
            lon += 360.0;
        }
        lon
    }

    fn cell(&self, lat: f64, lon: f64) -> GridCell {
        let lon = self.wrap_lon(lon);
        GridCell {
            lat_index: ((lat - self.lat_origin) / self.lat_step).round() as i64,
            lon_index: ((lon - self.lon_origin) / self.lon_step).round() as i64,
        }
    }
}

impl Atlas for FileAtlas {
    fn name(&self) -> &str {
        &self.name
    }

    fn grid_coords(&self, lat: f64, lon: f64) -> Result<GridCell, AtlasError> {
        if !lat.is_finite() || !lon.is_finite() || lat.abs() > 90.0 {
            return Err(AtlasError::NotFound { atlas: self.name.clone(), lat, lon });
        }
        Ok(self.cell(lat, lon))
    }

    fn query(&self, lat: f64, lon: f64, time: NaiveDateTime) -> Result<AtlasCast, AtlasError> {
        let target = self.grid_coords(lat, lon)?;
        let nearest = self
            .nodes
            .iter()
            .map(|n| {
                let c = self.cell(n.lat, n.lon);
                let d = (c.lat_index - target.lat_index).abs().max((c.lon_index - target.lon_index).abs());
                (d, n)
            })
            .filter(|(d, _)| *d <= self.search_cells)
            .min_by_key(|(d, _)| *d);

        let Some((d, node)) = nearest else {
            return Err(AtlasError::NotFound { atlas: self.name.clone(), lat, lon });
        };
        debug!("Atlas: {} node ({:.3}, {:.3}) is {d} cells from query", self.name, node.lat, node.lon);

        let stamp = |p: &Profile| {
            let mut p = p.clone();
            p.position = Some(Position { lat, lon });
            p.timestamp = Some(time);
            p.source_info = self.name.clone();
            p
        };
        Ok(AtlasCast {
            profile: stamp(&node.profile),
            min: node.min.as_ref().map(stamp),
            max: node.max.as_ref().map(stamp),
        })
    }
}
