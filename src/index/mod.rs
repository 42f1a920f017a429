pub mod edge;
pub mod fill;
pub mod fulltext;
pub mod geo;
pub mod hash;
pub mod key;
pub mod primary;
pub mod skiplist;

use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};
use crate::core::types::IndexId;
use crate::storage::headers::{HeaderId, MasterPointers};

use edge::EdgeIndex;
use fulltext::{FulltextIndex, DEFAULT_MIN_WORD_LENGTH};
use geo::{GeoIndex, GeoVariant};
use hash::HashIndex;
use primary::PrimaryIndex;
use skiplist::SkiplistIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexType {
    Primary,
    Edge,
    Hash,
    Skiplist,
    Geo1,
    Geo2,
    Fulltext,
}

/// Persistent description of an index, serialized into the sidecar file
/// `index-<id>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub id: String,
    #[serde(rename = "type")]
    pub index_type: IndexType,
    pub fields: Vec<String>,
    #[serde(default)]
    pub unique: bool,
    /// Absent in old sidecars; resolved by `resolved_sparse`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sparse: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "geoJson")]
    pub geo_json: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "minLength")]
    pub min_length: Option<u32>,
}

impl IndexDefinition {
    pub fn index_id(&self) -> Result<IndexId> {
        self.id
            .parse::<u64>()
            .map(IndexId)
            .map_err(|_| Error::BadParameter(format!("invalid index id '{}'", self.id)))
    }

    /// Definitions without a sparsity flag default to non-sparse, except
    /// unique hash indexes which historically defaulted to sparse.
    pub fn resolved_sparse(&self) -> bool {
        match self.sparse {
            Some(sparse) => sparse,
            None => self.index_type == IndexType::Hash && self.unique,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.index_type {
            IndexType::Primary | IndexType::Edge => Ok(()),
            IndexType::Hash | IndexType::Skiplist => {
                if self.fields.is_empty() {
                    return Err(Error::BadParameter(
                        "index needs at least one attribute path".into(),
                    ));
                }
                Ok(())
            }
            IndexType::Geo1 => {
                if self.fields.len() != 1 {
                    return Err(Error::BadParameter(
                        "geo1 index needs exactly one attribute path".into(),
                    ));
                }
                Ok(())
            }
            IndexType::Geo2 => {
                if self.fields.len() != 2 {
                    return Err(Error::BadParameter(
                        "geo2 index needs exactly two attribute paths".into(),
                    ));
                }
                Ok(())
            }
            IndexType::Fulltext => {
                if self.fields.len() != 1 {
                    return Err(Error::BadParameter(
                        "fulltext index needs exactly one attribute path".into(),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// The closed set of index variants. All of them expose the same capability
/// set so the write path can treat them uniformly.
#[derive(Debug)]
pub enum Index {
    Primary(PrimaryIndex),
    Edge(EdgeIndex),
    Hash(HashIndex),
    Skiplist(SkiplistIndex),
    Geo(GeoIndex),
    Fulltext(FulltextIndex),
}

impl Index {
    /// Build an empty secondary index from a sidecar definition. Primary and
    /// edge definitions are rejected: those indexes are created with the
    /// collection, never from sidecars.
    pub fn from_definition(definition: &IndexDefinition) -> Result<Index> {
        definition.validate()?;
        let id = definition.index_id()?;
        let sparse = definition.resolved_sparse();

        match definition.index_type {
            IndexType::Primary | IndexType::Edge => Err(Error::BadParameter(
                "primary and edge indexes have no sidecar definition".into(),
            )),
            IndexType::Hash => Ok(Index::Hash(HashIndex::new(
                id,
                definition.fields.clone(),
                definition.unique,
                sparse,
            ))),
            IndexType::Skiplist => Ok(Index::Skiplist(SkiplistIndex::new(
                id,
                definition.fields.clone(),
                definition.unique,
                sparse,
            ))),
            IndexType::Geo1 => Ok(Index::Geo(GeoIndex::new(
                id,
                GeoVariant::Location {
                    location: definition.fields[0].clone(),
                    geo_json: definition.geo_json.unwrap_or(false),
                },
            ))),
            IndexType::Geo2 => Ok(Index::Geo(GeoIndex::new(
                id,
                GeoVariant::LatLon {
                    latitude: definition.fields[0].clone(),
                    longitude: definition.fields[1].clone(),
                },
            ))),
            IndexType::Fulltext => Ok(Index::Fulltext(FulltextIndex::new(
                id,
                definition.fields[0].clone(),
                definition.min_length.unwrap_or(DEFAULT_MIN_WORD_LENGTH as u32) as usize,
            ))),
        }
    }

    pub fn id(&self) -> IndexId {
        match self {
            Index::Primary(_) => IndexId(0),
            Index::Edge(index) => index.id(),
            Index::Hash(index) => index.id(),
            Index::Skiplist(index) => index.id(),
            Index::Geo(index) => index.id(),
            Index::Fulltext(index) => index.id(),
        }
    }

    pub fn index_type(&self) -> IndexType {
        match self {
            Index::Primary(_) => IndexType::Primary,
            Index::Edge(_) => IndexType::Edge,
            Index::Hash(_) => IndexType::Hash,
            Index::Skiplist(_) => IndexType::Skiplist,
            Index::Geo(index) => match index.variant() {
                GeoVariant::Location { .. } => IndexType::Geo1,
                GeoVariant::LatLon { .. } => IndexType::Geo2,
            },
            Index::Fulltext(_) => IndexType::Fulltext,
        }
    }

    /// Insert a header. The primary index is not driven through this path;
    /// the write path addresses it directly.
    pub fn insert(
        &mut self,
        pool: &MasterPointers,
        header_id: HeaderId,
        is_rollback: bool,
    ) -> Result<()> {
        match self {
            Index::Primary(_) => Err(Error::Internal(
                "primary index is not driven through the secondary capability set".into(),
            )),
            Index::Edge(index) => index.insert(pool, header_id, is_rollback),
            Index::Hash(index) => index.insert(pool, header_id, is_rollback),
            Index::Skiplist(index) => index.insert(pool, header_id, is_rollback),
            Index::Geo(index) => index.insert(pool, header_id, is_rollback),
            Index::Fulltext(index) => index.insert(pool, header_id, is_rollback),
        }
    }

    pub fn remove(
        &mut self,
        pool: &MasterPointers,
        header_id: HeaderId,
        is_rollback: bool,
    ) -> Result<()> {
        match self {
            Index::Primary(_) => Err(Error::Internal(
                "primary index is not driven through the secondary capability set".into(),
            )),
            Index::Edge(index) => index.remove(pool, header_id, is_rollback),
            Index::Hash(index) => index.remove(pool, header_id, is_rollback),
            Index::Skiplist(index) => index.remove(pool, header_id, is_rollback),
            Index::Geo(index) => index.remove(pool, header_id, is_rollback),
            Index::Fulltext(index) => index.remove(pool, header_id, is_rollback),
        }
    }

    /// Whether the variant supports block-wise loading.
    pub fn supports_batch_insert(&self) -> bool {
        matches!(self, Index::Hash(_) | Index::Skiplist(_))
    }

    pub fn batch_insert(
        &mut self,
        pool: &MasterPointers,
        header_ids: &[HeaderId],
        threads: usize,
    ) -> Result<()> {
        match self {
            Index::Hash(index) => index.batch_insert(pool, header_ids, threads),
            Index::Skiplist(index) => index.batch_insert(pool, header_ids, threads),
            _ => {
                for &header_id in header_ids {
                    self.insert(pool, header_id, false)?;
                }
                Ok(())
            }
        }
    }

    pub fn size_hint(&mut self, expected: usize) {
        if let Index::Hash(index) = self {
            index.size_hint(expected);
        }
    }

    /// `None` for variants without a meaningful estimate (geo, fulltext).
    pub fn selectivity_estimate(&self) -> Option<f64> {
        match self {
            Index::Primary(_) => Some(1.0),
            Index::Edge(index) => Some(index.selectivity_estimate()),
            Index::Hash(index) => Some(index.selectivity_estimate()),
            Index::Skiplist(index) => Some(index.selectivity_estimate()),
            Index::Geo(_) | Index::Fulltext(_) => None,
        }
    }

    pub fn memory(&self) -> usize {
        match self {
            Index::Primary(index) => index.memory(),
            Index::Edge(index) => index.memory(),
            Index::Hash(index) => index.memory(),
            Index::Skiplist(index) => index.memory(),
            Index::Geo(index) => index.memory(),
            Index::Fulltext(index) => index.memory(),
        }
    }

    /// Compaction hook; only fulltext indexes do real work here.
    pub fn cleanup(&mut self) -> Result<()> {
        match self {
            Index::Fulltext(index) => index.cleanup(),
            _ => Ok(()),
        }
    }

    /// Short description for log lines.
    pub fn context(&self) -> String {
        match self {
            Index::Primary(_) => "primary".to_string(),
            Index::Edge(_) => "edge".to_string(),
            Index::Hash(index) => format!(
                "hash on [{}], unique: {}, sparse: {}",
                index.fields().join(", "),
                index.unique(),
                index.sparse()
            ),
            Index::Skiplist(index) => format!(
                "skiplist on [{}], unique: {}, sparse: {}",
                index.fields().join(", "),
                index.unique(),
                index.sparse()
            ),
            Index::Geo(index) => format!("geo on [{}]", index.fields().join(", ")),
            Index::Fulltext(index) => format!(
                "fulltext on [{}], minLength: {}",
                index.field(),
                index.min_word_length()
            ),
        }
    }

    pub fn definition(&self) -> IndexDefinition {
        let (fields, unique, sparse, geo_json, min_length) = match self {
            Index::Primary(_) => (vec!["_key".to_string()], true, None, None, None),
            Index::Edge(_) => (
                vec!["_from".to_string(), "_to".to_string()],
                false,
                None,
                None,
                None,
            ),
            Index::Hash(index) => (
                index.fields().to_vec(),
                index.unique(),
                Some(index.sparse()),
                None,
                None,
            ),
            Index::Skiplist(index) => (
                index.fields().to_vec(),
                index.unique(),
                Some(index.sparse()),
                None,
                None,
            ),
            Index::Geo(index) => (
                index.fields(),
                false,
                Some(true),
                match index.variant() {
                    GeoVariant::Location { geo_json, .. } => Some(*geo_json),
                    GeoVariant::LatLon { .. } => None,
                },
                None,
            ),
            Index::Fulltext(index) => (
                vec![index.field().to_string()],
                false,
                Some(true),
                None,
                Some(index.min_word_length() as u32),
            ),
        };

        IndexDefinition {
            id: self.id().value().to_string(),
            index_type: self.index_type(),
            fields,
            unique,
            sparse,
            geo_json,
            min_length,
        }
    }

    /// Dedupe-first equivalence: does this index already cover `candidate`?
    /// The comparison checks type, attribute paths in order, and the
    /// type-specific axes (uniqueness, sparsity, geo flags, fulltext
    /// parameters).
    pub fn matches(&self, candidate: &IndexDefinition) -> bool {
        if self.index_type() != candidate.index_type {
            return false;
        }
        match self {
            Index::Primary(_) | Index::Edge(_) => true,
            Index::Hash(index) => {
                index.unique() == candidate.unique
                    && index.sparse() == candidate.resolved_sparse()
                    && index.fields() == candidate.fields.as_slice()
            }
            Index::Skiplist(index) => {
                index.unique() == candidate.unique
                    && index.sparse() == candidate.resolved_sparse()
                    && index.fields() == candidate.fields.as_slice()
            }
            Index::Geo(index) => {
                let variant = match (candidate.index_type, candidate.fields.as_slice()) {
                    (IndexType::Geo1, [location]) => GeoVariant::Location {
                        location: location.clone(),
                        geo_json: candidate.geo_json.unwrap_or(false),
                    },
                    (IndexType::Geo2, [latitude, longitude]) => GeoVariant::LatLon {
                        latitude: latitude.clone(),
                        longitude: longitude.clone(),
                    },
                    _ => return false,
                };
                index.is_same(&variant)
            }
            Index::Fulltext(index) => match candidate.fields.as_slice() {
                [field] => {
                    index.field() == field
                        && index.min_word_length()
                            == candidate.min_length.unwrap_or(DEFAULT_MIN_WORD_LENGTH as u32) as usize
                }
                _ => false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hash_definition(fields: &[&str], unique: bool, sparse: Option<bool>) -> IndexDefinition {
        IndexDefinition {
            id: "7".into(),
            index_type: IndexType::Hash,
            fields: fields.iter().map(|s| s.to_string()).collect(),
            unique,
            sparse,
            geo_json: None,
            min_length: None,
        }
    }

    #[test]
    fn definition_roundtrips_through_json() {
        let definition = hash_definition(&["a", "b.c"], true, Some(false));
        let encoded = serde_json::to_string(&definition).unwrap();
        let decoded: IndexDefinition = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, definition);
        assert_eq!(decoded.index_id().unwrap(), IndexId(7));
    }

    #[test]
    fn sparse_default_follows_unique_hash_rule() {
        assert!(hash_definition(&["a"], true, None).resolved_sparse());
        assert!(!hash_definition(&["a"], false, None).resolved_sparse());

        let skiplist = IndexDefinition {
            index_type: IndexType::Skiplist,
            ..hash_definition(&["a"], true, None)
        };
        assert!(!skiplist.resolved_sparse());
    }

    #[test]
    fn matches_checks_type_specific_axes() {
        let definition = hash_definition(&["a"], false, Some(false));
        let index = Index::from_definition(&definition).unwrap();

        assert!(index.matches(&definition));
        assert!(!index.matches(&hash_definition(&["a"], true, Some(false))));
        assert!(!index.matches(&hash_definition(&["b"], false, Some(false))));

        let as_skiplist = IndexDefinition {
            index_type: IndexType::Skiplist,
            ..definition
        };
        assert!(!index.matches(&as_skiplist));
    }

    #[test]
    fn geo_matching_uses_attribute_roles() {
        let geo2 = IndexDefinition {
            id: "9".into(),
            index_type: IndexType::Geo2,
            fields: vec!["lat".into(), "lon".into()],
            unique: false,
            sparse: None,
            geo_json: None,
            min_length: None,
        };
        let index = Index::from_definition(&geo2).unwrap();
        assert!(index.matches(&geo2));

        let swapped = IndexDefinition {
            fields: vec!["lon".into(), "lat".into()],
            ..geo2.clone()
        };
        assert!(!index.matches(&swapped));
    }

    #[test]
    fn bad_definitions_are_rejected() {
        let empty_fields = hash_definition(&[], false, None);
        assert!(Index::from_definition(&empty_fields).is_err());

        let bad_id = IndexDefinition {
            id: "not-a-number".into(),
            ..hash_definition(&["a"], false, None)
        };
        assert!(Index::from_definition(&bad_id).is_err());

        let geo_wrong_arity = IndexDefinition {
            id: "3".into(),
            index_type: IndexType::Geo2,
            fields: vec!["only-one".into()],
            unique: false,
            sparse: None,
            geo_json: None,
            min_length: None,
        };
        assert!(Index::from_definition(&geo_wrong_arity).is_err());
    }

    #[test]
    fn unknown_index_type_fails_closed() {
        let raw = json!({ "id": "4", "type": "mystery", "fields": ["a"] });
        let parsed: std::result::Result<IndexDefinition, _> = serde_json::from_value(raw);
        assert!(parsed.is_err());
    }
}
