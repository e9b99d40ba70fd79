//! Rotation policy, backup naming and the retention sweep.
//!
//! Backups live next to the active file and are named
//! `{filename}-{YYYY-MM-DDTHH-MM-SS.mmm}.{sequence}`. The timestamp is the
//! moment of rotation; the sequence number breaks ties between rotations that
//! land in the same millisecond.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Duration, OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::Error;

const TIMESTAMP_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]-[minute]-[second].[subsecond digits:3]");

const MEGABYTE: u64 = 1024 * 1024;

/// Default size limit of the active file (100 MB).
pub const DEFAULT_MAX_SIZE: u64 = 100 * MEGABYTE;

/// Parse a size string with optional units (B/K/M/G, case-insensitive, optional
/// trailing `B` after K/M/G), defaulting to MB if no unit.
pub(crate) fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let s = match s.strip_suffix(['b', 'B']) {
        Some(rest) if rest.ends_with(|c: char| c.is_ascii_alphabetic()) => rest,
        _ => s,
    };
    let Some(last) = s.chars().last() else {
        return Err("empty size string".to_string());
    };

    let (num_str, unit) = if last.is_ascii_alphabetic() {
        (&s[..s.len() - 1], last.to_ascii_uppercase())
    } else {
        (s, 'M')
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("invalid number: {}", num_str))?;

    let multiplier = match unit {
        'B' => 1,
        'K' => 1024,
        'M' => MEGABYTE,
        'G' => 1024 * MEGABYTE,
        _ => return Err(format!("invalid unit: {}, supported: B/K/M/G", unit)),
    };

    num.checked_mul(multiplier)
        .ok_or_else(|| "size too large".to_string())
}

/// Size value that can be a number (MB) or a string with units.
#[derive(Deserialize)]
#[serde(untagged)]
enum SizeValue {
    Number(u64),
    String(String),
}

/// Deserialize a byte size given as MB or as a unit-bearing string.
pub(crate) fn deserialize_size<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match SizeValue::deserialize(deserializer)? {
        SizeValue::Number(mb) => mb
            .checked_mul(MEGABYTE)
            .ok_or_else(|| de::Error::custom("size too large")),
        SizeValue::String(s) => parse_size(&s).map_err(de::Error::custom),
    }
}

/// Serialize a byte size so that [`deserialize_size`] reads it back unchanged.
pub(crate) fn serialize_size<S>(size: &u64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    if size % MEGABYTE == 0 {
        serializer.serialize_u64(size / MEGABYTE)
    } else if size % 1024 == 0 {
        serializer.collect_str(&format_args!("{}K", size / 1024))
    } else {
        serializer.collect_str(&format_args!("{}B", size))
    }
}

fn default_max_size() -> u64 {
    DEFAULT_MAX_SIZE
}

/// Calendar periods after which the active file is rotated regardless of size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationPeriod {
    /// Never rotate on time.
    #[default]
    Never,
    /// Rotate at the top of every hour.
    Hourly,
    /// Rotate at midnight.
    Daily,
    /// Rotate at midnight between Sunday and Monday.
    Weekly,
}

impl RotationPeriod {
    /// Index of the period that contains `at`, evaluated in `at`'s own offset.
    ///
    /// Two instants belong to the same period iff their buckets are equal.
    pub fn bucket(&self, at: OffsetDateTime) -> Option<i64> {
        let local_secs = at.unix_timestamp() + i64::from(at.offset().whole_seconds());
        match self {
            Self::Never => None,
            Self::Hourly => Some(local_secs.div_euclid(3600)),
            Self::Daily => Some(local_secs.div_euclid(86_400)),
            // 1970-01-01 was a Thursday; shift so weeks start on Monday.
            Self::Weekly => Some((local_secs.div_euclid(86_400) + 3).div_euclid(7)),
        }
    }

    /// Whether `now` falls into a later period than `opened_at`.
    pub fn elapsed(&self, opened_at: OffsetDateTime, now: OffsetDateTime) -> bool {
        match (self.bucket(opened_at), self.bucket(now)) {
            (Some(opened), Some(current)) => current != opened,
            _ => false,
        }
    }
}

/// When to rotate the active file and which backups to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationPolicy {
    /// Size limit of the active file in bytes; 0 disables size rotation.
    #[serde(
        default = "default_max_size",
        serialize_with = "serialize_size",
        deserialize_with = "deserialize_size"
    )]
    pub max_size: u64,
    /// Number of backups to keep; 0 keeps all of them.
    #[serde(default)]
    pub max_backups: u32,
    /// Days to keep backups; 0 keeps them forever.
    #[serde(default)]
    pub max_age_days: u32,
    /// Time based rotation of the active file, checked on write.
    #[serde(default)]
    pub period: RotationPeriod,
    /// Stamp backups with local time instead of UTC.
    ///
    /// Falls back to UTC when the local offset cannot be determined (on Unix,
    /// once the process runs more than one thread); the writer then reports
    /// it through `take_warnings`.
    #[serde(default)]
    pub local_time: bool,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            max_backups: 0,
            max_age_days: 0,
            period: RotationPeriod::Never,
            local_time: false,
        }
    }
}

impl RotationPolicy {
    /// Size based rotation keeping at most `max_backups` backups.
    pub fn size(max_size: u64, max_backups: u32) -> Self {
        Self {
            max_size,
            max_backups,
            ..Self::default()
        }
    }

    /// Never rotate and never delete anything.
    pub fn unlimited() -> Self {
        Self {
            max_size: 0,
            ..Self::default()
        }
    }

    /// Set the size limit in bytes.
    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the backup count limit.
    pub fn with_max_backups(mut self, max_backups: u32) -> Self {
        self.max_backups = max_backups;
        self
    }

    /// Set the backup age limit in days.
    pub fn with_max_age_days(mut self, max_age_days: u32) -> Self {
        self.max_age_days = max_age_days;
        self
    }

    /// Set the time based rotation period.
    pub fn with_period(mut self, period: RotationPeriod) -> Self {
        self.period = period;
        self
    }

    /// Stamp backups with local time, or UTC if the local offset is unknown.
    pub fn with_local_time(mut self, local_time: bool) -> Self {
        self.local_time = local_time;
        self
    }

    /// Whether appending `incoming` bytes to a file of `current` bytes must
    /// rotate first. An empty file always takes the record, however large.
    pub fn size_exceeded(&self, current: u64, incoming: u64) -> bool {
        self.max_size > 0 && current > 0 && current.saturating_add(incoming) > self.max_size
    }

    /// Whether this policy ever deletes backups.
    pub fn retains_all(&self) -> bool {
        self.max_backups == 0 && self.max_age_days == 0
    }
}

/// A rotated log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupFile {
    pub path: PathBuf,
    pub created_at: OffsetDateTime,
    pub sequence: u64,
    pub size: u64,
}

impl BackupFile {
    fn order_key(&self) -> (OffsetDateTime, u64) {
        (self.created_at, self.sequence)
    }
}

/// Sort backups newest first.
pub fn sort_newest_first(backups: &mut [BackupFile]) {
    backups.sort_by(|a, b| b.order_key().cmp(&a.order_key()));
}

/// File name of the backup created at `created_at` with `sequence`.
pub fn backup_name(filename: &str, created_at: OffsetDateTime, sequence: u64) -> crate::Result<String> {
    let stamp = created_at
        .format(TIMESTAMP_FORMAT)
        .map_err(|e| Error::Io(io::Error::other(e)))?;
    Ok(format!("{}-{}.{}", filename, stamp, sequence))
}

/// Recover the creation time and sequence number from a backup file name.
///
/// The stamp carries no offset; it is read back in `offset`.
pub fn parse_backup_name(
    filename: &str,
    name: &str,
    offset: UtcOffset,
) -> Option<(OffsetDateTime, u64)> {
    let rest = name.strip_prefix(filename)?.strip_prefix('-')?;
    let (stamp, sequence) = rest.rsplit_once('.')?;
    let sequence = sequence.parse().ok()?;
    let stamp = PrimitiveDateTime::parse(stamp, TIMESTAMP_FORMAT).ok()?;
    Some((stamp.assume_offset(offset), sequence))
}

/// List the backups of `filename` found in `dir`, newest first.
pub fn list_backups(dir: &Path, filename: &str, offset: UtcOffset) -> io::Result<Vec<BackupFile>> {
    let mut backups = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some((created_at, sequence)) = parse_backup_name(filename, name, offset) else {
            continue;
        };
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        backups.push(BackupFile {
            path: entry.path(),
            created_at,
            sequence,
            size,
        });
    }
    sort_newest_first(&mut backups);
    Ok(backups)
}

/// Outcome of a retention sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Number of backups removed for exceeding the age limit.
    pub removed_by_age: usize,
    /// Number of backups removed for exceeding the count limit.
    pub removed_by_count: usize,
    /// Paths of all removed backups.
    pub removed_paths: Vec<PathBuf>,
    /// Deletions that failed. The files are still on disk.
    pub failures: Vec<Error>,
}

impl SweepReport {
    /// Total number of backups removed.
    pub fn total_removed(&self) -> usize {
        self.removed_by_age + self.removed_by_count
    }
}

fn remove_backup(backup: &BackupFile) -> Result<(), Error> {
    match std::fs::remove_file(&backup.path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(Error::Delete {
            path: backup.path.clone(),
            source,
        }),
    }
}

/// Delete the backups that violate `policy` at `now`.
///
/// Age is applied first, then the count limit to the survivors. A failed
/// deletion is recorded in the report and the file stays in the returned
/// list; it never aborts the sweep.
pub fn sweep_backups(
    mut backups: Vec<BackupFile>,
    policy: &RotationPolicy,
    now: OffsetDateTime,
) -> (Vec<BackupFile>, SweepReport) {
    let mut report = SweepReport::default();
    if policy.retains_all() {
        return (backups, report);
    }
    sort_newest_first(&mut backups);

    let mut kept = Vec::with_capacity(backups.len());
    let mut stuck = Vec::new();

    let cutoff = (policy.max_age_days > 0)
        .then(|| now - Duration::days(i64::from(policy.max_age_days)));
    for backup in backups {
        if cutoff.is_some_and(|cutoff| backup.created_at < cutoff) {
            match remove_backup(&backup) {
                Ok(()) => {
                    report.removed_by_age += 1;
                    report.removed_paths.push(backup.path);
                }
                Err(e) => {
                    report.failures.push(e);
                    stuck.push(backup);
                }
            }
        } else {
            kept.push(backup);
        }
    }

    let max_backups = policy.max_backups as usize;
    if max_backups > 0 && kept.len() > max_backups {
        for backup in kept.split_off(max_backups) {
            match remove_backup(&backup) {
                Ok(()) => {
                    report.removed_by_count += 1;
                    report.removed_paths.push(backup.path);
                }
                Err(e) => {
                    report.failures.push(e);
                    stuck.push(backup);
                }
            }
        }
    }

    kept.extend(stuck);
    sort_newest_first(&mut kept);
    (kept, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"x").unwrap();
        path
    }

    fn backup_at(dir: &Path, created_at: OffsetDateTime, sequence: u64) -> BackupFile {
        let name = backup_name("app.log", created_at, sequence).unwrap();
        BackupFile {
            path: touch(dir, &name),
            created_at,
            sequence,
            size: 1,
        }
    }

    #[test]
    fn test_parse_size_units() {
        assert_eq!(parse_size("10"), Ok(10 * MEGABYTE));
        assert_eq!(parse_size("5K"), Ok(5 * 1024));
        assert_eq!(parse_size("3m"), Ok(3 * MEGABYTE));
        assert_eq!(parse_size("2g"), Ok(2 * 1024 * MEGABYTE));
        assert_eq!(parse_size("512KB"), Ok(512 * 1024));
        assert_eq!(parse_size(" 7 mb "), Ok(7 * MEGABYTE));
        assert_eq!(parse_size("100B"), Ok(100));
    }

    #[test]
    fn test_policy_serialize_reads_back() {
        for max_size in [3 * MEGABYTE, 5 * 1024, 1000, 0] {
            let policy = RotationPolicy::size(max_size, 2);
            let yaml = serde_yaml::to_string(&policy).unwrap();
            let back: RotationPolicy = serde_yaml::from_str(&yaml).unwrap();
            assert_eq!(back, policy, "{yaml}");
        }
    }

    #[test]
    fn test_parse_size_errors() {
        assert!(parse_size("").is_err());
        assert!(parse_size("abcM").is_err());
        assert!(parse_size("10T").is_err());
        assert!(parse_size("B").is_err());
        assert!(parse_size("99999999999999G").is_err());
    }

    #[test]
    fn test_policy_deserialize() {
        let yaml = r#"
max_size: "512K"
max_backups: 3
max_age_days: 7
period: daily
"#;
        let policy: RotationPolicy = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            policy,
            RotationPolicy::size(512 * 1024, 3)
                .with_max_age_days(7)
                .with_period(RotationPeriod::Daily)
        );

        let policy: RotationPolicy = serde_yaml::from_str("max_size: 2").unwrap();
        assert_eq!(policy.max_size, 2 * MEGABYTE);
        assert_eq!(policy.max_backups, 0);
        assert!(policy.retains_all());

        let policy: RotationPolicy = serde_yaml::from_str("max_backups: 1").unwrap();
        assert_eq!(policy.max_size, DEFAULT_MAX_SIZE);
    }

    #[test]
    fn test_size_exceeded() {
        let policy = RotationPolicy::size(100, 0);
        assert!(!policy.size_exceeded(0, 500), "empty file takes any record");
        assert!(!policy.size_exceeded(60, 40));
        assert!(policy.size_exceeded(60, 41));
        assert!(!RotationPolicy::unlimited().size_exceeded(u64::MAX - 1, 10));
    }

    #[test]
    fn test_period_buckets() {
        let period = RotationPeriod::Hourly;
        assert!(!period.elapsed(
            datetime!(2024-05-01 10:00 UTC),
            datetime!(2024-05-01 10:59:59 UTC)
        ));
        assert!(period.elapsed(
            datetime!(2024-05-01 10:59 UTC),
            datetime!(2024-05-01 11:00 UTC)
        ));

        // 2024-05-05 is a Sunday, 2024-05-06 a Monday.
        let weekly = RotationPeriod::Weekly;
        assert!(!weekly.elapsed(
            datetime!(2024-04-29 00:00 UTC),
            datetime!(2024-05-05 23:59 UTC)
        ));
        assert!(weekly.elapsed(
            datetime!(2024-05-05 23:59 UTC),
            datetime!(2024-05-06 00:00 UTC)
        ));

        assert!(!RotationPeriod::Never.elapsed(
            datetime!(2000-01-01 00:00 UTC),
            datetime!(2024-01-01 00:00 UTC)
        ));
    }

    #[test]
    fn test_daily_bucket_uses_offset() {
        let daily = RotationPeriod::Daily;
        // Same UTC day, but different local days at +02:00.
        assert!(daily.elapsed(
            datetime!(2024-05-01 21:00 +02:00),
            datetime!(2024-05-02 01:00 +02:00)
        ));
    }

    #[test]
    fn test_backup_name_roundtrip() {
        let at = datetime!(2024-02-29 23:59:58.123 UTC);
        let name = backup_name("app.log", at, 42).unwrap();
        assert_eq!(name, "app.log-2024-02-29T23-59-58.123.42");
        assert_eq!(
            parse_backup_name("app.log", &name, UtcOffset::UTC),
            Some((at, 42))
        );
    }

    #[test]
    fn test_parse_backup_name_rejects_foreign_files() {
        let utc = UtcOffset::UTC;
        assert_eq!(parse_backup_name("app.log", "app.log", utc), None);
        assert_eq!(parse_backup_name("app.log", "app.log.1", utc), None);
        assert_eq!(parse_backup_name("app.log", "other.log-2024-01-01T00-00-00.000.1", utc), None);
        assert_eq!(parse_backup_name("app.log", "app.log-yesterday.1", utc), None);
        assert_eq!(parse_backup_name("app.log", "app.log-2024-01-01T00-00-00.000.x", utc), None);
    }

    #[test]
    fn test_list_backups_sorted_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let t = datetime!(2024-01-01 00:00 UTC);
        backup_at(dir.path(), t, 1);
        backup_at(dir.path(), t + Duration::hours(1), 2);
        backup_at(dir.path(), t, 3);
        touch(dir.path(), "app.log");
        touch(dir.path(), "unrelated.txt");

        let backups = list_backups(dir.path(), "app.log", UtcOffset::UTC).unwrap();
        let order: Vec<u64> = backups.iter().map(|b| b.sequence).collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn test_sweep_by_count_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let t = datetime!(2024-01-01 00:00 UTC);
        let backups: Vec<_> = (0..5)
            .map(|i| backup_at(dir.path(), t + Duration::minutes(i), i as u64))
            .collect();

        let (kept, report) = sweep_backups(backups, &RotationPolicy::size(10, 2), t);

        assert_eq!(report.removed_by_count, 3);
        assert_eq!(report.removed_by_age, 0);
        assert!(report.failures.is_empty());
        let order: Vec<u64> = kept.iter().map(|b| b.sequence).collect();
        assert_eq!(order, vec![4, 3]);
        for path in &report.removed_paths {
            assert!(!path.exists());
        }
    }

    #[test]
    fn test_sweep_by_age() {
        let dir = tempfile::tempdir().unwrap();
        let now = datetime!(2024-01-10 00:00 UTC);
        let old = backup_at(dir.path(), now - Duration::days(4), 1);
        let recent = backup_at(dir.path(), now - Duration::days(2), 2);

        let policy = RotationPolicy::size(10, 0).with_max_age_days(3);
        let (kept, report) = sweep_backups(vec![old.clone(), recent.clone()], &policy, now);

        assert_eq!(report.removed_by_age, 1);
        assert_eq!(kept, vec![recent]);
        assert!(!old.path.exists());
    }

    #[test]
    fn test_sweep_age_then_count() {
        let dir = tempfile::tempdir().unwrap();
        let now = datetime!(2024-01-10 00:00 UTC);
        let backups = vec![
            backup_at(dir.path(), now - Duration::days(10), 1),
            backup_at(dir.path(), now - Duration::days(3), 2),
            backup_at(dir.path(), now - Duration::days(2), 3),
            backup_at(dir.path(), now - Duration::days(1), 4),
        ];

        let policy = RotationPolicy::size(10, 2).with_max_age_days(5);
        let (kept, report) = sweep_backups(backups, &policy, now);

        assert_eq!(report.removed_by_age, 1);
        assert_eq!(report.removed_by_count, 1);
        assert_eq!(report.total_removed(), 2);
        let order: Vec<u64> = kept.iter().map(|b| b.sequence).collect();
        assert_eq!(order, vec![4, 3]);
    }

    #[test]
    fn test_sweep_unlimited_deletes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let now = datetime!(2024-01-10 00:00 UTC);
        let backups: Vec<_> = (0..20)
            .map(|i| backup_at(dir.path(), now - Duration::days(365 + i), i as u64))
            .collect();

        let (kept, report) = sweep_backups(backups, &RotationPolicy::unlimited(), now);

        assert_eq!(kept.len(), 20);
        assert_eq!(report.total_removed(), 0);
        assert!(kept.iter().all(|b| b.path.exists()));
    }

    #[test]
    fn test_sweep_failed_delete_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let now = datetime!(2024-01-10 00:00 UTC);
        // A non-empty directory with a backup name cannot be removed as a file.
        let stuck_name = backup_name("app.log", now - Duration::days(1), 1).unwrap();
        let stuck_path = dir.path().join(&stuck_name);
        std::fs::create_dir(&stuck_path).unwrap();
        touch(&stuck_path, "inner");
        let stuck = BackupFile {
            path: stuck_path.clone(),
            created_at: now - Duration::days(1),
            sequence: 1,
            size: 0,
        };
        let newest = backup_at(dir.path(), now, 2);

        let (kept, report) = sweep_backups(vec![stuck, newest], &RotationPolicy::size(10, 1), now);

        assert_eq!(report.removed_by_count, 0);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(&report.failures[0], Error::Delete { path, .. } if *path == stuck_path));
        assert_eq!(kept.len(), 2);
        assert!(stuck_path.exists());
    }
}
