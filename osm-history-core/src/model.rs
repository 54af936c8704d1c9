//! Versioned feature records and the rows derived from them.
//!
//! Records arrive from a feed fully typed. Coordinates are fixed-point
//! degrees scaled by 10^7 (`lon`, `lat`), matching the encoding used by OSM
//! PBF files and by [`crate::ZoneBoundary`].

use std::fmt;

use chrono::{DateTime, Utc};

/// Identity of a single feature version. Unique and immutable once written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeatureKey {
    /// Feature identifier shared by every version.
    pub id: i64,
    /// Version number, starting at 1.
    pub version: i64,
}

impl FeatureKey {
    /// Build a key from an identifier and version.
    pub const fn new(id: i64, version: i64) -> Self {
        Self { id, version }
    }
}

impl fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.id, self.version)
    }
}

/// The three record families delivered by a history feed.
///
/// The import order is points, then paths, then relations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// Point features (OSM nodes).
    Points,
    /// Path features (OSM ways).
    Paths,
    /// Relation features.
    Relations,
}

impl EntityKind {
    /// Every kind in import order.
    pub const ALL: [Self; 3] = [Self::Points, Self::Paths, Self::Relations];

    /// Lower-case plural label used in logs and reports.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Points => "points",
            Self::Paths => "paths",
            Self::Relations => "relations",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

/// Kind of a relation member reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    /// Reference to a point.
    Point,
    /// Reference to a path.
    Path,
    /// Reference to another relation.
    Relation,
}

impl MemberKind {
    /// Single-letter storage code (`n`, `w`, `r`) used by OSM tooling.
    pub const fn code(self) -> &'static str {
        match self {
            Self::Point => "n",
            Self::Path => "w",
            Self::Relation => "r",
        }
    }

    /// Parse a storage code produced by [`MemberKind::code`].
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "n" => Some(Self::Point),
            "w" => Some(Self::Path),
            "r" => Some(Self::Relation),
            _ => None,
        }
    }
}

impl fmt::Display for MemberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Point => "point",
            Self::Path => "path",
            Self::Relation => "relation",
        })
    }
}

/// Metadata shared by every feature version.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMeta {
    /// Feature identifier.
    pub id: i64,
    /// Version number, starting at 1.
    pub version: i64,
    /// Whether this version deletes the feature.
    pub deleted: bool,
    /// Whether this version is visible.
    pub visible: bool,
    /// Changeset that produced this version.
    pub changeset: i64,
    /// Numeric identifier of the author (0 for anonymous edits).
    pub uid: i64,
    /// Display name of the author.
    pub author: String,
    /// Instant the version was created.
    pub created_at: DateTime<Utc>,
    /// Key/value tags in feed order.
    pub tags: Vec<(String, String)>,
}

impl EntityMeta {
    /// Metadata for a visible version with no author and no tags.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::{TimeZone, Utc};
    /// use osm_history_core::{EntityMeta, FeatureKey};
    ///
    /// let created = Utc.with_ymd_and_hms(2012, 5, 1, 12, 0, 0).single().expect("valid date");
    /// let meta = EntityMeta::new(42, 3, created).with_tags([("highway", "residential")]);
    /// assert_eq!(meta.key(), FeatureKey::new(42, 3));
    /// assert_eq!(meta.tags.len(), 1);
    /// ```
    pub fn new(id: i64, version: i64, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            version,
            deleted: false,
            visible: true,
            changeset: 0,
            uid: 0,
            author: String::new(),
            created_at,
            tags: Vec::new(),
        }
    }

    /// Replace the tag list.
    #[must_use]
    pub fn with_tags<I, K, V>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.tags = tags
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        self
    }

    /// Set the changeset and author.
    #[must_use]
    pub fn with_author(mut self, changeset: i64, uid: i64, author: impl Into<String>) -> Self {
        self.changeset = changeset;
        self.uid = uid;
        self.author = author.into();
        self
    }

    /// Mark the version as a deletion.
    #[must_use]
    pub fn deleted(mut self) -> Self {
        self.deleted = true;
        self.visible = false;
        self
    }

    /// Identity key of this version.
    pub const fn key(&self) -> FeatureKey {
        FeatureKey::new(self.id, self.version)
    }
}

/// A point version with fixed-point coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct PointFeature {
    /// Version metadata.
    pub meta: EntityMeta,
    /// Longitude in degrees scaled by 10^7.
    pub lon: i32,
    /// Latitude in degrees scaled by 10^7.
    pub lat: i32,
}

impl PointFeature {
    /// Build a point version.
    pub fn new(meta: EntityMeta, lon: i32, lat: i32) -> Self {
        Self { meta, lon, lat }
    }
}

/// A path version referencing an ordered list of point identifiers.
#[derive(Debug, Clone, PartialEq)]
pub struct PathFeature {
    /// Version metadata.
    pub meta: EntityMeta,
    /// Referenced point identifiers in path order.
    pub nodes: Vec<i64>,
}

impl PathFeature {
    /// Build a path version.
    pub fn new(meta: EntityMeta, nodes: Vec<i64>) -> Self {
        Self { meta, nodes }
    }
}

/// One typed, optionally roled reference held by a relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationMember {
    /// Identifier of the referenced feature.
    pub member_id: i64,
    /// Kind of the referenced feature.
    pub kind: MemberKind,
    /// Role string; `None` when the feed supplies an empty role.
    pub role: Option<String>,
}

impl RelationMember {
    /// Build a member reference.
    pub fn new(member_id: i64, kind: MemberKind, role: Option<&str>) -> Self {
        Self {
            member_id,
            kind,
            role: role.map(str::to_owned),
        }
    }
}

/// A relation version referencing an ordered list of members.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationFeature {
    /// Version metadata.
    pub meta: EntityMeta,
    /// Members in relation order.
    pub members: Vec<RelationMember>,
}

impl RelationFeature {
    /// Build a relation version.
    pub fn new(meta: EntityMeta, members: Vec<RelationMember>) -> Self {
        Self { meta, members }
    }
}

/// Owner columns shared by the point, path and relation tables.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    /// Identity of the stored version.
    pub key: FeatureKey,
    /// Deletion flag.
    pub deleted: bool,
    /// Visibility flag.
    pub visible: bool,
    /// Changeset identifier.
    pub changeset: i64,
    /// Author identifier.
    pub uid: i64,
    /// Author display name.
    pub author: String,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Tags serialised by [`crate::TagCodec`].
    pub tags_json: String,
}

impl FeatureRow {
    /// Combine version metadata with its encoded tags.
    pub fn from_meta(meta: &EntityMeta, tags_json: String) -> Self {
        Self {
            key: meta.key(),
            deleted: meta.deleted,
            visible: meta.visible,
            changeset: meta.changeset,
            uid: meta.uid,
            author: meta.author.clone(),
            created_at: meta.created_at,
            tags_json,
        }
    }
}

/// Row written for a point that passed the zone filter.
#[derive(Debug, Clone, PartialEq)]
pub struct PointRow {
    /// Owner columns.
    pub feature: FeatureRow,
    /// Longitude in degrees scaled by 10^7.
    pub lon: i32,
    /// Latitude in degrees scaled by 10^7.
    pub lat: i32,
}

/// Resolved membership of a point in a path version.
///
/// `sequence` is dense and zero-based over surviving members only; it is not
/// the index of the reference in the original node list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathMemberRow {
    /// Owning path version.
    pub path: FeatureKey,
    /// Referenced point identifier.
    pub point_id: i64,
    /// Point version the reference resolved to.
    pub point_version: i64,
    /// Position among surviving members.
    pub sequence: i64,
    /// Longitude of the resolved point version.
    pub lon: i32,
    /// Latitude of the resolved point version.
    pub lat: i32,
}

/// Resolved membership of a feature in a relation version.
///
/// `sequence` follows the same dense numbering as [`PathMemberRow`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationMemberRow {
    /// Owning relation version.
    pub relation: FeatureKey,
    /// Referenced feature identifier.
    pub member_id: i64,
    /// Kind of the referenced feature.
    pub kind: MemberKind,
    /// Role of the member, if any.
    pub role: Option<String>,
    /// Position among surviving members.
    pub sequence: i64,
}
