//! Flat-file tracked-entity store.
//!
//! One entity per line, comma separated. Two row shapes share the format:
//!
//!   simple:    {name},{uuid}
//!   extended:  {name},{class},{uuid},{character_id},combat:{lvl},{profession}:{lvl},...
//!
//! Fields after the fourth in an extended row are an unordered set of
//! `key:value` pairs. Pairs with a numeric value are profession levels;
//! anything else is carried through verbatim on rewrite.
//!
//! The leading field is the lookup key and is matched case-insensitively.
//! Each file operation holds a per-file async lock, but a poll cycle's
//! read-all ... write-all spans many operations, so a concurrent append can
//! still be overwritten by a cycle that read the file before it (last
//! writer wins).

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("tracker file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A simple-form row: a player tracked by name and uuid.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedPlayer {
    pub name: String,
    pub uuid: String,
}

impl TrackedPlayer {
    pub fn parse(line: &str) -> Option<Self> {
        let (name, uuid) = line.trim().split_once(',')?;
        if name.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            uuid: uuid.to_string(),
        })
    }

    pub fn to_line(&self) -> String {
        format!("{},{}", self.name, self.uuid)
    }
}

/// An extended-form row: one character of a player plus its last observed
/// combat and profession levels.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedEntity {
    pub display_name: String,
    pub class_tag: String,
    pub entity_id: String,
    pub character_id: String,
    pub combat_level: f64,
    pub profession_levels: BTreeMap<String, f64>,
    /// Trailing fields that are not `profession:level` pairs, in file order.
    pub extra_fields: Vec<String>,
}

const COMBAT_KEY: &str = "combat";

impl TrackedEntity {
    /// Parse an extended row. The combat pair may sit anywhere after the
    /// fourth field. `None` when the row has fewer than five fields or no
    /// readable combat level; callers pass such rows through untouched.
    pub fn parse(line: &str) -> Option<Self> {
        let parts: Vec<&str> = line.trim().split(',').collect();
        if parts.len() < 5 {
            return None;
        }

        let mut combat_level = None;
        let mut profession_levels = BTreeMap::new();
        let mut extra_fields = Vec::new();
        for field in &parts[4..] {
            match field
                .split_once(':')
                .and_then(|(k, v)| v.trim().parse::<f64>().ok().map(|v| (k, v)))
            {
                Some((COMBAT_KEY, level)) if combat_level.is_none() => combat_level = Some(level),
                Some((name, level)) if name != COMBAT_KEY => {
                    profession_levels.insert(name.to_string(), level);
                }
                _ => extra_fields.push(field.to_string()),
            }
        }
        let combat_level = combat_level?;

        Some(Self {
            display_name: parts[0].to_string(),
            class_tag: parts[1].to_string(),
            entity_id: parts[2].to_string(),
            character_id: parts[3].to_string(),
            combat_level,
            profession_levels,
            extra_fields,
        })
    }

    pub fn to_line(&self) -> String {
        let mut line = format!(
            "{},{},{},{},{}:{:.2}",
            self.display_name,
            self.class_tag,
            self.entity_id,
            self.character_id,
            COMBAT_KEY,
            self.combat_level
        );
        for (name, level) in &self.profession_levels {
            line.push_str(&format!(",{}:{:.2}", name, level));
        }
        for extra in &self.extra_fields {
            line.push(',');
            line.push_str(extra);
        }
        line
    }

    /// Level of a profession, 0 when never observed.
    pub fn profession(&self, name: &str) -> f64 {
        self.profession_levels.get(name).copied().unwrap_or(0.0)
    }
}

/// Leading field of a row, used as the case-insensitive lookup key.
pub fn row_key(line: &str) -> &str {
    line.split(',').next().unwrap_or("").trim()
}

fn key_matches(line: &str, name: &str) -> bool {
    line.contains(',') && row_key(line).to_lowercase() == name.trim().to_lowercase()
}

/// A line-oriented tracker file. Clones share the same lock.
#[derive(Debug, Clone)]
pub struct TrackerFile {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl TrackerFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }

    /// Create the file if it does not exist yet.
    pub async fn ensure_exists(&self) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_err(e))?;
        Ok(())
    }

    async fn read_lines(&self) -> Result<Vec<String>, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(contents
                .lines()
                .map(|l| l.trim_end().to_string())
                .filter(|l| !l.trim().is_empty())
                .collect()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(self.io_err(e)),
        }
    }

    async fn write_lines(&self, lines: &[String]) -> Result<(), StoreError> {
        let mut contents = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
        for line in lines {
            contents.push_str(line);
            contents.push('\n');
        }
        // Sibling file, then rename: readers never see a partial rewrite.
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, contents)
            .await
            .map_err(|e| self.io_err(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_err(e))
    }

    /// Every non-blank row in file order, raw. A missing file is empty.
    pub async fn list_all(&self) -> Result<Vec<String>, StoreError> {
        let _guard = self.lock.lock().await;
        self.read_lines().await
    }

    /// Append one row. No duplicate check: callers use [`contains`](Self::contains) first.
    pub async fn append(&self, line: &str) -> Result<(), StoreError> {
        self.append_many(&[line.to_string()]).await
    }

    pub async fn append_many(&self, lines: &[String]) -> Result<(), StoreError> {
        if lines.is_empty() {
            return Ok(());
        }
        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_err(e))?;
        let mut buf = String::new();
        for line in lines {
            buf.push_str(line.trim_end());
            buf.push('\n');
        }
        file.write_all(buf.as_bytes())
            .await
            .map_err(|e| self.io_err(e))?;
        file.flush().await.map_err(|e| self.io_err(e))?;
        debug!(path = %self.path.display(), rows = lines.len(), "appended rows");
        Ok(())
    }

    /// Rewrite the whole file with `lines`.
    pub async fn replace_all(&self, lines: &[String]) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        self.write_lines(lines).await
    }

    /// Drop every row whose key matches `name`. Returns whether any did.
    pub async fn remove_by_key(&self, name: &str) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().await;
        let lines = self.read_lines().await?;
        let before = lines.len();
        let kept: Vec<String> = lines
            .into_iter()
            .filter(|l| !key_matches(l, name))
            .collect();
        let removed = kept.len() != before;
        self.write_lines(&kept).await?;
        Ok(removed)
    }

    /// Whether any row's key matches `name`.
    pub async fn contains(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.list_all().await?.iter().any(|l| key_matches(l, name)))
    }

    /// Simple-form rows; rows without a comma are skipped.
    pub async fn players(&self) -> Result<Vec<TrackedPlayer>, StoreError> {
        Ok(self
            .list_all()
            .await?
            .iter()
            .filter_map(|l| TrackedPlayer::parse(l))
            .collect())
    }

    /// Lowercased keys of every row.
    pub async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .list_all()
            .await?
            .iter()
            .filter(|l| l.contains(','))
            .map(|l| row_key(l).to_lowercase())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extended_row_roundtrip_keeps_unknown_fields() {
        let line = "Alice,MAGE,uuid-1,char-1,combat:50.45,mining:12.03,note,fishing:1.00,tag:x";
        let e = TrackedEntity::parse(line).unwrap();
        assert_eq!(e.display_name, "Alice");
        assert_eq!(e.character_id, "char-1");
        assert_eq!(e.combat_level, 50.45);
        assert_eq!(e.profession("mining"), 12.03);
        assert_eq!(e.profession("woodcutting"), 0.0);
        assert_eq!(e.extra_fields, vec!["note", "tag:x"]);
        assert_eq!(
            e.to_line(),
            "Alice,MAGE,uuid-1,char-1,combat:50.45,fishing:1.00,mining:12.03,note,tag:x"
        );
    }

    #[test]
    fn test_combat_pair_found_after_professions() {
        let e = TrackedEntity::parse("Alice,MAGE,uuid-1,char-1,mining:12.03,combat:50.45").unwrap();
        assert_eq!(e.combat_level, 50.45);
        assert_eq!(e.profession("mining"), 12.03);
        assert!(e.extra_fields.is_empty());
        assert_eq!(e.to_line(), "Alice,MAGE,uuid-1,char-1,combat:50.45,mining:12.03");

        // Only the first readable combat pair counts; later ones are kept verbatim.
        let e = TrackedEntity::parse("Bob,ARCHER,uuid-2,char-2,note,combat:x,combat:7,combat:9").unwrap();
        assert_eq!(e.combat_level, 7.0);
        assert_eq!(e.extra_fields, vec!["note", "combat:x", "combat:9"]);
    }

    #[test]
    fn test_short_or_bad_extended_rows_rejected() {
        assert!(TrackedEntity::parse("Alice,uuid-1").is_none());
        assert!(TrackedEntity::parse("Alice,MAGE,uuid-1,char-1").is_none());
        assert!(TrackedEntity::parse("Alice,MAGE,uuid-1,char-1,combat:abc").is_none());
        assert!(TrackedEntity::parse("Alice,MAGE,uuid-1,char-1,mining:3").is_none());
    }

    #[test]
    fn test_simple_row() {
        let p = TrackedPlayer::parse("Alice,uuid-1\n").unwrap();
        assert_eq!(p, TrackedPlayer { name: "Alice".into(), uuid: "uuid-1".into() });
        assert_eq!(p.to_line(), "Alice,uuid-1");
        assert!(TrackedPlayer::parse("no separator").is_none());
        assert!(TrackedPlayer::parse(",uuid").is_none());
    }

    #[tokio::test]
    async fn test_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrackerFile::new(dir.path().join("tracker.txt"));
        assert!(store.list_all().await.unwrap().is_empty());
        assert!(!store.contains("alice").await.unwrap());
    }

    #[tokio::test]
    async fn test_append_list_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrackerFile::new(dir.path().join("tracker.txt"));

        store.append("Alice,uuid-1").await.unwrap();
        store.append("Bob,uuid-2").await.unwrap();
        store.append("alice,uuid-3").await.unwrap();
        assert!(store.contains("ALICE").await.unwrap());

        assert!(store.remove_by_key("Alice").await.unwrap());
        assert_eq!(store.list_all().await.unwrap(), vec!["Bob,uuid-2"]);
        assert!(!store.remove_by_key("Carol").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_on_missing_file_creates_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.txt");
        let store = TrackerFile::new(&path);
        assert!(!store.remove_by_key("Alice").await.unwrap());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_malformed_rows_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.txt");
        tokio::fs::write(&path, "Alice,uuid-1\n\ngarbage\nBob,uuid-2\n")
            .await
            .unwrap();
        let store = TrackerFile::new(&path);

        assert_eq!(store.list_all().await.unwrap().len(), 3);
        let players = store.players().await.unwrap();
        assert_eq!(players.len(), 2);
        assert_eq!(players[1].name, "Bob");
        assert_eq!(store.keys().await.unwrap(), vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_replace_all_rewrites_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("advanced.txt");
        let store = TrackerFile::new(&path);
        store.append("a,b").await.unwrap();
        store
            .replace_all(&["x,y".to_string(), "z,w".to_string()])
            .await
            .unwrap();
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents, "x,y\nz,w\n");
    }
}
