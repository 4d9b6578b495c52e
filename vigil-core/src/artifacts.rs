//! Artifact model and the staged-file naming grammar.
//!
//! Every motion event produces up to four artifacts, each a single file named
//! `{event_id}_{YYYYMMDD}_{HHMMSS}_{tag}.{ext}`. The name is the only
//! persisted binding between a staged file and its server-side event, so the
//! grammar must round-trip exactly: the processor formats it, the transfer
//! manager parses it back to decide the destination subdirectory and the
//! `file_type` reported to the central server.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

/// Suffix of the sentinel marker that signals an artifact is complete and
/// safe to transfer. A companion file without its sentinel is either still
/// being written or abandoned, and must be ignored.
pub const SENTINEL_SUFFIX: &str = ".READY";

/// The four artifacts of a motion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// Full-resolution still captured at the moment of motion.
    ImageA,
    /// Full-resolution still captured four seconds later.
    ImageB,
    /// Downscaled copy of picture A.
    Thumbnail,
    /// Pre/post-motion H.264 elementary stream.
    Video,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 4] = [
        ArtifactKind::ImageA,
        ArtifactKind::ImageB,
        ArtifactKind::Thumbnail,
        ArtifactKind::Video,
    ];

    /// Short tag used inside filenames.
    pub fn tag(self) -> &'static str {
        match self {
            ArtifactKind::ImageA => "a",
            ArtifactKind::ImageB => "b",
            ArtifactKind::Thumbnail => "thumb",
            ArtifactKind::Video => "video",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "a" => Some(ArtifactKind::ImageA),
            "b" => Some(ArtifactKind::ImageB),
            "thumb" => Some(ArtifactKind::Thumbnail),
            "video" => Some(ArtifactKind::Video),
            _ => None,
        }
    }

    /// `file_type` value expected by `PATCH /events/{id}/files`.
    pub fn file_type(self) -> &'static str {
        match self {
            ArtifactKind::ImageA => "image_a",
            ArtifactKind::ImageB => "image_b",
            ArtifactKind::Thumbnail => "thumbnail",
            ArtifactKind::Video => "video",
        }
    }

    /// Destination subdirectory on network storage.
    pub fn dest_subdir(self) -> &'static str {
        match self {
            ArtifactKind::ImageA | ArtifactKind::ImageB => "pictures",
            ArtifactKind::Thumbnail => "thumbs",
            ArtifactKind::Video => "videos",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::Video => "h264",
            _ => "jpg",
        }
    }
}

/// Format the filename timestamp component (`YYYYMMDD_HHMMSS`).
pub fn filename_timestamp(timestamp: &DateTime<Local>) -> String {
    timestamp.format("%Y%m%d_%H%M%S").to_string()
}

/// ISO-8601 with microsecond precision, as the event API expects
/// (`2025-10-30T14:30:22.186476`).
pub fn iso_timestamp(timestamp: &DateTime<Local>) -> String {
    timestamp.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// Format an artifact filename from its components.
pub fn artifact_filename(event_id: i64, timestamp: &str, kind: ArtifactKind) -> String {
    format!(
        "{}_{}_{}.{}",
        event_id,
        timestamp,
        kind.tag(),
        kind.extension()
    )
}

/// Sentinel path for a staged artifact (`{path}.READY`).
pub fn sentinel_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(SENTINEL_SUFFIX);
    PathBuf::from(name)
}

/// Companion artifact path for a sentinel, or `None` when the path does not
/// carry the sentinel suffix.
pub fn companion_path(sentinel: &Path) -> Option<PathBuf> {
    let name = sentinel.to_str()?;
    let stripped = name.strip_suffix(SENTINEL_SUFFIX)?;
    Some(PathBuf::from(stripped))
}

/// Components recovered from a staged artifact filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedArtifact {
    pub event_id: i64,
    /// `YYYYMMDD_HHMMSS`, kept as written.
    pub timestamp: String,
    pub kind: ArtifactKind,
    pub extension: String,
}

/// Parse a staged artifact filename.
///
/// Grammar: split once on `.` from the right for the extension, then split
/// the stem on `_` and require at least four fields; field 0 is the base-10
/// event id, fields 1-2 rejoin into the timestamp, field 3 is the type tag.
pub fn parse_artifact_filename(filename: &str) -> Option<ParsedArtifact> {
    let (stem, extension) = filename.rsplit_once('.')?;
    let parts: Vec<&str> = stem.split('_').collect();
    if parts.len() < 4 {
        return None;
    }

    let event_id: i64 = parts[0].parse().ok()?;
    let timestamp = format!("{}_{}", parts[1], parts[2]);
    let kind = ArtifactKind::from_tag(parts[3])?;

    Some(ParsedArtifact {
        event_id,
        timestamp,
        kind,
        extension: extension.to_string(),
    })
}

/// A staged artifact awaiting transfer: the companion/sentinel pair plus the
/// metadata recovered from the filename.
#[derive(Debug, Clone)]
pub struct PendingFile {
    pub path: PathBuf,
    pub sentinel_path: PathBuf,
    pub event_id: i64,
    pub local_timestamp: String,
    pub kind: ArtifactKind,
    pub extension: String,
}

impl PendingFile {
    /// Build a pending file record from its sentinel path. Returns `None`
    /// when the companion filename does not parse (malformed names are left
    /// in place for operator inspection, never deleted).
    pub fn from_sentinel(sentinel: &Path) -> Option<Self> {
        let path = companion_path(sentinel)?;
        let parsed = parse_artifact_filename(path.file_name()?.to_str()?)?;
        Some(PendingFile {
            path,
            sentinel_path: sentinel.to_path_buf(),
            event_id: parsed.event_id,
            local_timestamp: parsed.timestamp,
            kind: parsed.kind,
            extension: parsed.extension,
        })
    }

    pub fn file_name(&self) -> &str {
        // Invariant: constructed from a parsed UTF-8 filename.
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn timestamps_format_for_api_and_filenames() {
        let ts = Local
            .with_ymd_and_hms(2025, 10, 30, 14, 30, 22)
            .unwrap()
            .with_nanosecond(186_476_000)
            .unwrap();
        assert_eq!(iso_timestamp(&ts), "2025-10-30T14:30:22.186476");
        assert_eq!(filename_timestamp(&ts), "20251030_143022");
    }

    #[test]
    fn filename_round_trips_for_every_kind() {
        for kind in ArtifactKind::ALL {
            let name = artifact_filename(42, "20251030_143022", kind);
            let parsed = parse_artifact_filename(&name).expect("legal name must parse");
            assert_eq!(parsed.event_id, 42);
            assert_eq!(parsed.timestamp, "20251030_143022");
            assert_eq!(parsed.kind, kind);
            assert_eq!(parsed.extension, kind.extension());
            assert_eq!(
                artifact_filename(parsed.event_id, &parsed.timestamp, parsed.kind),
                name
            );
        }
    }

    #[test]
    fn parses_known_corpus() {
        let cases = [
            ("42_20251030_143022_a.jpg", 42, ArtifactKind::ImageA, "pictures"),
            ("42_20251030_143022_b.jpg", 42, ArtifactKind::ImageB, "pictures"),
            (
                "42_20251030_143022_thumb.jpg",
                42,
                ArtifactKind::Thumbnail,
                "thumbs",
            ),
            (
                "42_20251030_143022_video.h264",
                42,
                ArtifactKind::Video,
                "videos",
            ),
            ("100_20251101_120000_a.jpg", 100, ArtifactKind::ImageA, "pictures"),
        ];
        for (name, id, kind, subdir) in cases {
            let parsed = parse_artifact_filename(name).expect(name);
            assert_eq!(parsed.event_id, id);
            assert_eq!(parsed.kind, kind);
            assert_eq!(parsed.kind.dest_subdir(), subdir);
        }
    }

    #[test]
    fn rejects_malformed_names() {
        for name in [
            "invalid_filename.jpg",
            "42_a.jpg",
            "not_enough_parts.jpg",
            "42_20251030_143022_poster.jpg", // unknown tag
            "x_20251030_143022_a.jpg",       // non-numeric id
            "no_extension_at_all",
        ] {
            assert!(parse_artifact_filename(name).is_none(), "{name}");
        }
    }

    #[test]
    fn sentinel_paths_pair_up() {
        let path = Path::new("/tmp/pending/7_20251030_143022_a.jpg");
        let sentinel = sentinel_path(path);
        assert_eq!(
            sentinel,
            Path::new("/tmp/pending/7_20251030_143022_a.jpg.READY")
        );
        assert_eq!(companion_path(&sentinel).as_deref(), Some(path));
        assert!(companion_path(path).is_none());
    }

    #[test]
    fn pending_file_from_sentinel() {
        let sentinel = Path::new("/tmp/pending/7_20251030_143022_video.h264.READY");
        let pending = PendingFile::from_sentinel(sentinel).expect("parses");
        assert_eq!(pending.event_id, 7);
        assert_eq!(pending.kind, ArtifactKind::Video);
        assert_eq!(pending.file_name(), "7_20251030_143022_video.h264");

        let garbage = Path::new("/tmp/pending/garbage.jpg.READY");
        assert!(PendingFile::from_sentinel(garbage).is_none());
    }
}
