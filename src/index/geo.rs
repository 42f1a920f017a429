use std::collections::HashMap;

use serde_json::Value;

use crate::core::error::{Error, Result};
use crate::core::types::IndexId;
use crate::index::key::lookup_path;
use crate::storage::headers::{HeaderId, MasterPointers};

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Attribute binding of a geo index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeoVariant {
    /// One attribute holding `[lat, lon]` (or `[lon, lat]` with `geo_json`).
    Location { location: String, geo_json: bool },
    /// A separate latitude and longitude attribute pair.
    LatLon { latitude: String, longitude: String },
}

/// Spatial point index. Documents without usable coordinates are skipped,
/// so the index is implicitly sparse.
#[derive(Debug)]
pub struct GeoIndex {
    id: IndexId,
    variant: GeoVariant,
    points: HashMap<HeaderId, (f64, f64)>,
}

impl GeoIndex {
    pub fn new(id: IndexId, variant: GeoVariant) -> GeoIndex {
        GeoIndex {
            id,
            variant,
            points: HashMap::new(),
        }
    }

    pub fn id(&self) -> IndexId {
        self.id
    }

    pub fn variant(&self) -> &GeoVariant {
        &self.variant
    }

    pub fn fields(&self) -> Vec<String> {
        match &self.variant {
            GeoVariant::Location { location, .. } => vec![location.clone()],
            GeoVariant::LatLon {
                latitude,
                longitude,
            } => vec![latitude.clone(), longitude.clone()],
        }
    }

    pub fn geo_json(&self) -> bool {
        matches!(
            self.variant,
            GeoVariant::Location { geo_json: true, .. }
        )
    }

    /// Equality of the attribute binding: same variant, same attributes in
    /// the same roles, same coordinate order flag.
    pub fn is_same(&self, other: &GeoVariant) -> bool {
        self.variant == *other
    }

    fn coordinates(&self, document: &Value) -> Option<(f64, f64)> {
        match &self.variant {
            GeoVariant::Location { location, geo_json } => {
                let list = lookup_path(document, location)?.as_array()?;
                if list.len() != 2 {
                    return None;
                }
                let first = list[0].as_f64()?;
                let second = list[1].as_f64()?;
                if *geo_json {
                    // GeoJSON stores [longitude, latitude].
                    Some((second, first))
                } else {
                    Some((first, second))
                }
            }
            GeoVariant::LatLon {
                latitude,
                longitude,
            } => {
                let lat = lookup_path(document, latitude)?.as_f64()?;
                let lon = lookup_path(document, longitude)?.as_f64()?;
                Some((lat, lon))
            }
        }
    }

    pub fn insert(
        &mut self,
        pool: &MasterPointers,
        header_id: HeaderId,
        _is_rollback: bool,
    ) -> Result<()> {
        let header = pool
            .get(header_id)
            .ok_or_else(|| Error::Internal("geo index fed an unallocated header".into()))?;
        if let Some(point) = self.coordinates(&header.data) {
            if point.0.abs() <= 90.0 && point.1.abs() <= 180.0 {
                self.points.insert(header_id, point);
            }
        }
        Ok(())
    }

    pub fn remove(
        &mut self,
        _pool: &MasterPointers,
        header_id: HeaderId,
        _is_rollback: bool,
    ) -> Result<()> {
        self.points.remove(&header_id);
        Ok(())
    }

    /// Headers within `radius_meters` of the given point, nearest first.
    pub fn within_radius(&self, lat: f64, lon: f64, radius_meters: f64) -> Vec<(HeaderId, f64)> {
        let mut hits: Vec<(HeaderId, f64)> = self
            .points
            .iter()
            .map(|(&id, &(plat, plon))| (id, haversine(lat, lon, plat, plon)))
            .filter(|(_, distance)| *distance <= radius_meters)
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        hits
    }

    /// The `limit` nearest headers to the given point.
    pub fn nearest(&self, lat: f64, lon: f64, limit: usize) -> Vec<(HeaderId, f64)> {
        let mut hits: Vec<(HeaderId, f64)> = self
            .points
            .iter()
            .map(|(&id, &(plat, plon))| (id, haversine(lat, lon, plat, plon)))
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        hits.truncate(limit);
        hits
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn memory(&self) -> usize {
        self.points.len() * std::mem::size_of::<(HeaderId, (f64, f64))>()
    }
}

fn haversine(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * a.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Fid, Tick};
    use crate::storage::headers::Header;
    use serde_json::json;
    use std::sync::Arc;

    fn put(pool: &mut MasterPointers, value: Value) -> HeaderId {
        pool.request(Header {
            fid: Fid(1),
            revision: Tick(1),
            key_hash: 0,
            marker_size: 64,
            data: Arc::new(value),
        })
        .unwrap()
    }

    #[test]
    fn location_variant_indexes_pairs() {
        let mut pool = MasterPointers::new();
        let mut index = GeoIndex::new(
            IndexId(4),
            GeoVariant::Location {
                location: "pos".into(),
                geo_json: false,
            },
        );

        let rome = put(&mut pool, json!({ "_key": "rome", "pos": [41.9, 12.5] }));
        let paris = put(&mut pool, json!({ "_key": "paris", "pos": [48.9, 2.3] }));
        let nowhere = put(&mut pool, json!({ "_key": "x", "pos": "not coordinates" }));

        index.insert(&pool, rome, false).unwrap();
        index.insert(&pool, paris, false).unwrap();
        index.insert(&pool, nowhere, false).unwrap();
        assert_eq!(index.len(), 2);

        let nearest = index.nearest(41.8, 12.4, 1);
        assert_eq!(nearest[0].0, rome);

        // Paris is ~1100 km from Rome.
        let hits = index.within_radius(41.9, 12.5, 50_000.0);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn geo_json_swaps_coordinate_order() {
        let mut pool = MasterPointers::new();
        let mut index = GeoIndex::new(
            IndexId(4),
            GeoVariant::Location {
                location: "pos".into(),
                geo_json: true,
            },
        );

        let doc = put(&mut pool, json!({ "_key": "d", "pos": [12.5, 41.9] }));
        index.insert(&pool, doc, false).unwrap();
        let nearest = index.nearest(41.9, 12.5, 1);
        assert!(nearest[0].1 < 1.0);
    }

    #[test]
    fn is_same_distinguishes_attribute_roles() {
        let index = GeoIndex::new(
            IndexId(4),
            GeoVariant::LatLon {
                latitude: "lat".into(),
                longitude: "lon".into(),
            },
        );

        assert!(index.is_same(&GeoVariant::LatLon {
            latitude: "lat".into(),
            longitude: "lon".into(),
        }));
        // Swapped roles are a different index.
        assert!(!index.is_same(&GeoVariant::LatLon {
            latitude: "lon".into(),
            longitude: "lat".into(),
        }));
        assert!(!index.is_same(&GeoVariant::Location {
            location: "lat".into(),
            geo_json: false,
        }));
    }
}
