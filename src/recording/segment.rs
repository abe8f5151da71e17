use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::path::{Component, Path, PathBuf};
use tokio::time::Instant;

/// Wall clock that never runs backwards
///
/// One wall reading is taken when the clock is created; later readings add
/// the monotonic time elapsed since then. Segment boundaries derived from it
/// stay contiguous even if the system clock is adjusted mid-session.
#[derive(Debug, Clone, Copy)]
pub struct SegmentClock {
    wall_origin: DateTime<Utc>,
    mono_origin: Instant,
}

impl SegmentClock {
    pub fn start() -> Self {
        Self {
            wall_origin: Utc::now(),
            mono_origin: Instant::now(),
        }
    }

    /// Clock anchored to an explicit wall time, for reproducible captions
    pub fn anchored_at(wall_origin: DateTime<Utc>) -> Self {
        Self {
            wall_origin,
            mono_origin: Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.mono_origin.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.wall_origin + elapsed
    }
}

/// One speaker's isolated recording within a segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakerFile {
    pub speaker_id: String,
    pub path: PathBuf,
}

/// A closed recording window, ready for delivery
#[derive(Debug, Clone)]
pub struct Segment {
    pub channel_id: String,
    /// Position within the session, starting at 0
    pub index: u64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub time_zone: Tz,
    /// Mixed recording; `None` if the encoder could not be started
    pub composite: Option<PathBuf>,
    /// Isolated recordings, ordered by speaker id. A speaker who rejoined
    /// during the window has more than one file.
    pub speakers: Vec<SpeakerFile>,
}

impl Segment {
    /// Caption used for the composite artifact
    pub fn caption(&self) -> String {
        let start = self.start.with_timezone(&self.time_zone);
        let end = self.end.with_timezone(&self.time_zone);
        format!(
            "{} -> {}\n#{} #{}",
            start.format("%Y-%m-%d %H:%M:%S"),
            end.format("%Y-%m-%d %H:%M:%S"),
            start.format("%Y%m%d"),
            start.format("%Y")
        )
    }

    /// Caption used for one speaker's artifact
    pub fn speaker_caption(&self, speaker_id: &str) -> String {
        format!("Speaker {}\n{}", speaker_id, self.caption())
    }

    /// Every file this segment owns on disk
    pub fn files(&self) -> Vec<&Path> {
        self.composite
            .iter()
            .map(PathBuf::as_path)
            .chain(self.speakers.iter().map(|s| s.path.as_path()))
            .collect()
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }
}

fn stamp(start: &DateTime<Utc>) -> String {
    start.format("%Y-%m-%dT%H-%M-%S%.3fZ").to_string()
}

/// Whether `name` joins onto a directory as exactly one child entry
pub(crate) fn is_path_component(name: &str) -> bool {
    if name.contains(['/', '\\', '\0']) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(part)), None) if part == name
    )
}

/// Keep speaker ids usable as file name components
fn sanitize(component: &str) -> String {
    let cleaned: String = component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

/// First free path for `{stem}.{ext}` in `dir`, suffixing `-1`, `-2`, ...
fn unique_path(dir: &Path, stem: &str, extension: &str) -> PathBuf {
    let candidate = dir.join(format!("{}.{}", stem, extension));
    if !candidate.exists() {
        return candidate;
    }
    (1..)
        .map(|n| dir.join(format!("{}-{}.{}", stem, n, extension)))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

/// `{segmentStart}.{ext}`
pub fn composite_path(dir: &Path, start: &DateTime<Utc>, extension: &str) -> PathBuf {
    unique_path(dir, &stamp(start), extension)
}

/// `{speakerId}-{segmentStart}.{ext}`
pub fn speaker_path(
    dir: &Path,
    speaker_id: &str,
    start: &DateTime<Utc>,
    extension: &str,
) -> PathBuf {
    unique_path(
        dir,
        &format!("{}-{}", sanitize(speaker_id), stamp(start)),
        extension,
    )
}
