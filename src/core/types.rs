use serde::{Deserialize, Serialize};

/// System attribute names carried inside every document payload.
pub const ATTR_KEY: &str = "_key";
pub const ATTR_REV: &str = "_rev";
pub const ATTR_ID: &str = "_id";
pub const ATTR_FROM: &str = "_from";
pub const ATTR_TO: &str = "_to";

/// Datafile id, assigned from the global tick sequence.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Fid(pub u64);

impl Fid {
    pub fn value(self) -> u64 {
        self.0
    }
}

/// Monotonic sequence number assigned by the log manager. Doubles as the
/// revision id of a document version.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Tick(pub u64);

impl Tick {
    pub const ZERO: Tick = Tick(0);

    pub fn value(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for Tick {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Persistent index id.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct IndexId(pub u64);

impl IndexId {
    pub fn value(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionType {
    Document,
    Edge,
}

impl Default for CollectionType {
    fn default() -> Self {
        CollectionType::Document
    }
}
