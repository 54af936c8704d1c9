//! History feed reading OSM PBF files with `osmpbf`.

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use osm_history_core::{
    EntityKind, EntityMeta, FeedError, MemberKind, PathFeature, PointFeature, RecordFeed,
    RelationFeature, RelationMember, Visitor,
};
use osmpbf::{BlobDecode, BlobReader, Element, RelMemberType};
use thiserror::Error;

/// Errors raised while decoding a PBF history file.
#[derive(Debug, Error)]
pub enum PbfFeedError {
    /// The file could not be opened.
    #[error("failed to open OSM PBF file at {path:?}")]
    Open {
        /// Location of the file.
        path: Utf8PathBuf,
        /// Source error returned by `osmpbf`.
        #[source]
        source: osmpbf::Error,
    },
    /// A blob could not be read or decompressed.
    #[error("failed to decode OSM PBF data")]
    Decode {
        /// Source error returned by `osmpbf`.
        #[source]
        source: osmpbf::Error,
    },
    /// A record lacks metadata a history import needs.
    #[error("{kind} {id} has no {field}; is this a history file?")]
    MissingMetadata {
        /// Kind of the record.
        kind: EntityKind,
        /// Record identifier.
        id: i64,
        /// Missing field.
        field: &'static str,
    },
    /// A record carries a timestamp outside the representable range.
    #[error("{kind} {id} has out-of-range timestamp {millis}")]
    InvalidTimestamp {
        /// Kind of the record.
        kind: EntityKind,
        /// Record identifier.
        id: i64,
        /// Raw milliseconds since the Unix epoch.
        millis: i64,
    },
    /// A string table entry was not valid UTF-8.
    #[error("{kind} {id} holds undecodable text")]
    Text {
        /// Kind of the record.
        kind: EntityKind,
        /// Record identifier.
        id: i64,
        /// Source error returned by `osmpbf`.
        #[source]
        source: osmpbf::Error,
    },
}

/// Record feed over an OSM full-history PBF file.
///
/// Each scan re-opens the file and streams it block by block, handing over
/// only the records of the requested kind.
#[derive(Debug, Clone)]
pub struct PbfHistoryFeed {
    path: Utf8PathBuf,
}

impl PbfHistoryFeed {
    /// Feed reading `path`. The file is opened lazily on each scan.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the PBF file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn scan<T>(
        &self,
        kind: EntityKind,
        visit: &mut Visitor<'_, T>,
        mut extract: impl FnMut(Element<'_>) -> Option<Result<T, PbfFeedError>>,
    ) -> Result<(), FeedError> {
        let decode_error = |err: PbfFeedError| FeedError::Decode {
            kind,
            source: Box::new(err),
        };
        let reader = BlobReader::from_path(&self.path).map_err(|source| FeedError::Open {
            kind,
            source: Box::new(PbfFeedError::Open {
                path: self.path.clone(),
                source,
            }),
        })?;
        for blob in reader {
            let blob = blob.map_err(|source| decode_error(PbfFeedError::Decode { source }))?;
            let decoded = blob
                .decode()
                .map_err(|source| decode_error(PbfFeedError::Decode { source }))?;
            let BlobDecode::OsmData(block) = decoded else {
                continue;
            };
            for element in block.elements() {
                let Some(record) = extract(element) else {
                    continue;
                };
                if visit(record.map_err(decode_error)?).is_break() {
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

impl RecordFeed for PbfHistoryFeed {
    fn scan_points(&self, visit: &mut Visitor<'_, PointFeature>) -> Result<(), FeedError> {
        self.scan(EntityKind::Points, visit, |element| match element {
            Element::Node(node) => Some(
                RawInfo::from_info(&node.info())
                    .into_meta(EntityKind::Points, node.id(), node.tags())
                    .map(|meta| {
                        PointFeature::new(meta, node.decimicro_lon(), node.decimicro_lat())
                    }),
            ),
            Element::DenseNode(node) => Some(
                RawInfo::from_dense(node.info())
                    .into_meta(EntityKind::Points, node.id(), node.tags())
                    .map(|meta| {
                        PointFeature::new(meta, node.decimicro_lon(), node.decimicro_lat())
                    }),
            ),
            Element::Way(_) | Element::Relation(_) => None,
        })
    }

    fn scan_paths(&self, visit: &mut Visitor<'_, PathFeature>) -> Result<(), FeedError> {
        self.scan(EntityKind::Paths, visit, |element| match element {
            Element::Way(way) => Some(
                RawInfo::from_info(&way.info())
                    .into_meta(EntityKind::Paths, way.id(), way.tags())
                    .map(|meta| PathFeature::new(meta, way.refs().collect())),
            ),
            _ => None,
        })
    }

    fn scan_relations(&self, visit: &mut Visitor<'_, RelationFeature>) -> Result<(), FeedError> {
        self.scan(EntityKind::Relations, visit, |element| match element {
            Element::Relation(relation) => {
                let id = relation.id();
                let meta = RawInfo::from_info(&relation.info()).into_meta(
                    EntityKind::Relations,
                    id,
                    relation.tags(),
                );
                Some(meta.and_then(|meta| {
                    let members = relation
                        .members()
                        .map(|member| {
                            let role = member.role().map_err(|source| PbfFeedError::Text {
                                kind: EntityKind::Relations,
                                id,
                                source,
                            })?;
                            let kind = match member.member_type {
                                RelMemberType::Node => MemberKind::Point,
                                RelMemberType::Way => MemberKind::Path,
                                RelMemberType::Relation => MemberKind::Relation,
                            };
                            let role = (!role.is_empty()).then_some(role);
                            Ok(RelationMember::new(member.member_id, kind, role))
                        })
                        .collect::<Result<Vec<_>, PbfFeedError>>()?;
                    Ok(RelationFeature::new(meta, members))
                }))
            }
            _ => None,
        })
    }
}

/// Metadata common to plain and dense elements, before validation.
struct RawInfo<'a> {
    version: Option<i32>,
    millis: Option<i64>,
    changeset: Option<i64>,
    uid: Option<i32>,
    user: Option<Result<&'a str, osmpbf::Error>>,
    visible: bool,
}

impl<'a> RawInfo<'a> {
    fn from_info(info: &osmpbf::Info<'a>) -> Self {
        Self {
            version: info.version(),
            millis: info.milli_timestamp(),
            changeset: info.changeset(),
            uid: info.uid(),
            user: info.user(),
            visible: info.visible(),
        }
    }

    fn from_dense(info: Option<&osmpbf::DenseNodeInfo<'a>>) -> Self {
        match info {
            Some(info) => Self {
                version: Some(info.version()),
                millis: Some(info.milli_timestamp()),
                changeset: Some(info.changeset()),
                uid: Some(info.uid()),
                user: Some(info.user()),
                visible: info.visible(),
            },
            None => Self {
                version: None,
                millis: None,
                changeset: None,
                uid: None,
                user: None,
                visible: true,
            },
        }
    }

    fn into_meta<'t>(
        self,
        kind: EntityKind,
        id: i64,
        tags: impl Iterator<Item = (&'t str, &'t str)>,
    ) -> Result<EntityMeta, PbfFeedError> {
        let missing = |field| PbfFeedError::MissingMetadata { kind, id, field };
        let version = self.version.ok_or_else(|| missing("version"))?;
        let millis = self.millis.ok_or_else(|| missing("timestamp"))?;
        let created_at = DateTime::<Utc>::from_timestamp_millis(millis)
            .ok_or(PbfFeedError::InvalidTimestamp { kind, id, millis })?;
        let author = match self.user {
            Some(user) => user.map_err(|source| PbfFeedError::Text { kind, id, source })?,
            None => "",
        };
        let mut meta = EntityMeta::new(id, i64::from(version), created_at)
            .with_author(
                self.changeset.unwrap_or_default(),
                self.uid.map(i64::from).unwrap_or_default(),
                author,
            )
            .with_tags(tags);
        if !self.visible {
            meta = meta.deleted();
        }
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use std::{fs, ops::ControlFlow};
    use tempfile::TempDir;

    struct Workspace {
        _dir: TempDir,
        root: Utf8PathBuf,
    }

    #[fixture]
    fn workspace() -> Workspace {
        let dir = TempDir::new().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 tempdir");
        Workspace { _dir: dir, root }
    }

    fn count_points(feed: &PbfHistoryFeed) -> Result<usize, FeedError> {
        let mut seen = 0;
        feed.scan_points(&mut |_| {
            seen += 1;
            ControlFlow::Continue(())
        })?;
        Ok(seen)
    }

    #[rstest]
    fn missing_file_fails_to_open(workspace: Workspace) {
        let feed = PbfHistoryFeed::new(workspace.root.join("missing.osm.pbf"));
        let err = count_points(&feed).expect_err("missing file fails");
        assert!(
            matches!(
                err,
                FeedError::Open {
                    kind: EntityKind::Points,
                    ..
                }
            ),
            "got {err:?}"
        );
    }

    #[rstest]
    fn garbage_fails_to_decode(workspace: Workspace) {
        let path = workspace.root.join("garbage.osm.pbf");
        fs::write(&path, [0x00, 0x00, 0x00, 0x05, 0xde, 0xad, 0xbe, 0xef, 0x01])
            .expect("write garbage");
        let err = count_points(&PbfHistoryFeed::new(path)).expect_err("garbage fails");
        assert!(matches!(err, FeedError::Decode { .. }), "got {err:?}");
    }

    #[rstest]
    fn empty_file_yields_nothing(workspace: Workspace) {
        let path = workspace.root.join("empty.osm.pbf");
        fs::write(&path, []).expect("write empty file");
        assert_eq!(count_points(&PbfHistoryFeed::new(path)).expect("scan"), 0);
    }

    #[rstest]
    fn rejects_records_without_version() {
        let raw = RawInfo {
            version: None,
            millis: Some(0),
            changeset: None,
            uid: None,
            user: None,
            visible: true,
        };
        let err = raw
            .into_meta(EntityKind::Paths, 12, std::iter::empty())
            .expect_err("version is required");
        assert!(
            matches!(
                err,
                PbfFeedError::MissingMetadata {
                    field: "version",
                    id: 12,
                    ..
                }
            ),
            "got {err:?}"
        );
    }

    #[rstest]
    fn invisible_versions_are_deletions() {
        let raw = RawInfo {
            version: Some(4),
            millis: Some(1_300_000_000_000),
            changeset: Some(99),
            uid: Some(7),
            user: Some(Ok("mapper")),
            visible: false,
        };
        let meta = raw
            .into_meta(EntityKind::Points, 3, [("amenity", "cafe")].into_iter())
            .expect("valid metadata");
        assert!(meta.deleted);
        assert_eq!((meta.version, meta.changeset, meta.uid), (4, 99, 7));
        assert_eq!(meta.author, "mapper");
        assert_eq!(meta.tags, [("amenity".to_owned(), "cafe".to_owned())]);
    }
}
