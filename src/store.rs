use std::{
    collections::BTreeMap,
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::{
    error::IssuerError,
    model::{InviteToken, User},
};

pub const USERS_FILE: &str = "users.json";
pub const INVITE_TOKENS_FILE: &str = "invite-tokens.json";

/// Something stored in a collection keyed by id.
pub trait Record: Serialize + DeserializeOwned + Clone {
    fn id(&self) -> &str;
    fn created_at(&self) -> Option<i64>;
}

impl Record for User {
    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> Option<i64> {
        self.created_at
    }
}

impl Record for InviteToken {
    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> Option<i64> {
        Some(self.created_at)
    }
}

/// A whole collection held in memory between `load` and `persist`.
///
/// Iteration order is ascending `createdAt`, then ascending id. Records
/// without a `createdAt` come first. Every scan the issuer does goes through
/// `records`, so "first match" always means the oldest match.
pub trait Collection<T: Record> {
    fn load(&mut self) -> Result<(), IssuerError>;
    fn persist(&mut self) -> Result<(), IssuerError>;

    fn entries(&self) -> &BTreeMap<String, T>;
    fn entries_mut(&mut self) -> &mut BTreeMap<String, T>;

    fn records(&self) -> Vec<&T> {
        // BTreeMap already yields ids in order, the stable sort keeps it for ties
        let mut out: Vec<&T> = self.entries().values().collect();
        out.sort_by_key(|r| r.created_at().unwrap_or(i64::MIN));
        out
    }

    fn find(&self, predicate: &dyn Fn(&T) -> bool) -> Option<&T> {
        self.records().into_iter().find(|r| predicate(*r))
    }

    fn get(&self, id: &str) -> Option<&T> {
        self.entries().get(id)
    }

    fn upsert(&mut self, record: T) {
        self.entries_mut().insert(record.id().to_string(), record);
    }

    /// Applies `f` to every record matching `predicate` and returns the ids
    /// it touched, in iteration order.
    fn update_where(
        &mut self,
        predicate: &dyn Fn(&T) -> bool,
        f: &mut dyn FnMut(&mut T),
    ) -> Vec<String> {
        let ids: Vec<String> = self
            .records()
            .into_iter()
            .filter(|r| predicate(*r))
            .map(|r| r.id().to_string())
            .collect();

        for id in ids.iter() {
            if let Some(record) = self.entries_mut().get_mut(id) {
                f(record);
            }
        }

        ids
    }
}

/// A collection stored as one pretty-printed JSON object, `{ "<id>": record }`.
#[derive(Clone, Debug)]
pub struct JsonFileCollection<T> {
    path: PathBuf,
    entries: BTreeMap<String, T>,
}

impl<T: Record> JsonFileCollection<T> {
    pub fn new(path: PathBuf) -> JsonFileCollection<T> {
        JsonFileCollection {
            path,
            entries: BTreeMap::new(),
        }
    }
}

pub fn users_collection(data_dir: &Path) -> JsonFileCollection<User> {
    JsonFileCollection::new(data_dir.join(USERS_FILE))
}

pub fn invite_tokens_collection(data_dir: &Path) -> JsonFileCollection<InviteToken> {
    JsonFileCollection::new(data_dir.join(INVITE_TOKENS_FILE))
}

impl<T: Record> Collection<T> for JsonFileCollection<T> {
    fn load(&mut self) -> Result<(), IssuerError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(IssuerError::MissingDataFile {
                    path: self.path.clone(),
                })
            }
            Err(e) => {
                return Err(IssuerError::Io {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        let parsed: BTreeMap<String, T> =
            serde_json::from_str(&raw).map_err(|e| IssuerError::MalformedDataFile {
                path: self.path.clone(),
                source: e,
            })?;

        debug!("loaded {} records from {:?}", parsed.len(), self.path);
        self.entries = parsed;

        Ok(())
    }

    fn persist(&mut self) -> Result<(), IssuerError> {
        let body = serde_json::to_string_pretty(&self.entries).map_err(IssuerError::Serialize)?;
        write_atomic(&self.path, body.as_bytes())?;

        debug!("wrote {} records to {:?}", self.entries.len(), self.path);

        Ok(())
    }

    fn entries(&self) -> &BTreeMap<String, T> {
        &self.entries
    }

    fn entries_mut(&mut self) -> &mut BTreeMap<String, T> {
        &mut self.entries
    }
}

/// Writes next to the target and renames over it, so a crash mid-write
/// leaves the previous file intact. The target's permissions carry over to
/// the new file. There is no locking against other writers.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), IssuerError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "collection".to_string());
    let tmp = path.with_file_name(format!(".{}.tmp-{}", file_name, std::process::id()));

    let io_err = |p: &Path| {
        let p = p.to_path_buf();
        move |source| IssuerError::Io { path: p, source }
    };

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp)
        .map_err(io_err(&tmp))?;
    file.write_all(bytes).map_err(io_err(&tmp))?;
    file.sync_all().map_err(io_err(&tmp))?;
    drop(file);

    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(&tmp, meta.permissions()).map_err(io_err(&tmp))?;
    }

    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(path)(e));
    }

    Ok(())
}

/// In-memory stand-in for a JSON file, for tests and embedding.
#[derive(Clone, Debug)]
pub struct MemoryCollection<T> {
    entries: BTreeMap<String, T>,
    missing: bool,
    pub loads: usize,
    pub persists: usize,
}

impl<T: Record> MemoryCollection<T> {
    pub fn new(records: Vec<T>) -> MemoryCollection<T> {
        MemoryCollection {
            entries: records
                .into_iter()
                .map(|r| (r.id().to_string(), r))
                .collect(),
            missing: false,
            loads: 0,
            persists: 0,
        }
    }

    /// Behaves like a file that doesn't exist: `load` fails.
    pub fn missing() -> MemoryCollection<T> {
        MemoryCollection {
            missing: true,
            ..MemoryCollection::new(vec![])
        }
    }
}

impl<T: Record> Collection<T> for MemoryCollection<T> {
    fn load(&mut self) -> Result<(), IssuerError> {
        self.loads += 1;
        if self.missing {
            return Err(IssuerError::MissingDataFile {
                path: PathBuf::from("<memory>"),
            });
        }
        Ok(())
    }

    fn persist(&mut self) -> Result<(), IssuerError> {
        self.persists += 1;
        Ok(())
    }

    fn entries(&self) -> &BTreeMap<String, T> {
        &self.entries
    }

    fn entries_mut(&mut self) -> &mut BTreeMap<String, T> {
        &mut self.entries
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use anyhow::Context;
    use serde_json::{Map, Value};
    use tempdir::TempDir;

    use super::*;

    fn token(id: &str, created_at: i64) -> InviteToken {
        InviteToken {
            id: id.to_string(),
            agency_id: "a1".to_string(),
            user_id: "u1".to_string(),
            token_hash: "ff".to_string(),
            expires_at: created_at + 10,
            used_at: None,
            created_at,
            extra: Map::new(),
        }
    }

    #[test]
    fn test_records_are_ordered_by_created_at_then_id() {
        let c = MemoryCollection::new(vec![
            token("c", 5),
            token("b", 1),
            token("a", 5),
            token("z", 0),
        ]);

        let ids: Vec<&str> = c.records().into_iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["z", "b", "a", "c"]);
    }

    #[test]
    fn test_users_without_created_at_come_first() {
        let raw = r#"{
            "u2": {"id":"u2","agencyId":"a","role":"OWNER","status":"INVITED","createdAt":3},
            "u9": {"id":"u9","agencyId":"a","role":"OWNER","status":"INVITED"}
        }"#;
        let tmp = TempDir::new(".store").context("Can't create a tmp dir").unwrap();
        fs::write(tmp.path().join(USERS_FILE), raw).unwrap();

        let mut users = users_collection(tmp.path());
        users.load().unwrap();

        let first = users.find(&|u: &User| u.is_pending_owner()).unwrap();
        assert_eq!(first.id, "u9");
    }

    #[test]
    fn test_update_where_reports_touched_ids() {
        let mut c = MemoryCollection::new(vec![token("x", 2), token("y", 1), token("w", 3)]);

        let touched = c.update_where(&|t: &InviteToken| t.id != "w", &mut |t: &mut InviteToken| {
            t.mark_used(99)
        });

        assert_eq!(touched, vec!["y".to_string(), "x".to_string()]);
        assert_eq!(c.get("x").unwrap().used_at, Some(99));
        assert_eq!(c.get("w").unwrap().used_at, None);
    }

    #[test]
    fn test_missing_file_is_reported_as_missing() {
        let tmp = TempDir::new(".store").context("Can't create a tmp dir").unwrap();
        let mut tokens = invite_tokens_collection(tmp.path());

        match tokens.load() {
            Err(IssuerError::MissingDataFile { path }) => {
                assert_eq!(path, tmp.path().join(INVITE_TOKENS_FILE))
            }
            other => panic!("expected MissingDataFile, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_file_is_not_missing() {
        let tmp = TempDir::new(".store").context("Can't create a tmp dir").unwrap();
        fs::write(tmp.path().join(INVITE_TOKENS_FILE), "[1, 2").unwrap();

        let mut tokens = invite_tokens_collection(tmp.path());
        assert!(matches!(
            tokens.load(),
            Err(IssuerError::MalformedDataFile { .. })
        ));
    }

    #[test]
    fn test_persist_writes_pretty_json_and_leaves_no_temp_file() {
        let tmp = TempDir::new(".store").context("Can't create a tmp dir").unwrap();
        let path = tmp.path().join(INVITE_TOKENS_FILE);
        fs::write(&path, "{}").unwrap();

        let mut tokens = invite_tokens_collection(tmp.path());
        tokens.load().unwrap();
        tokens.upsert(token("invite_1_a", 1));
        tokens.persist().unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("{\n  \"invite_1_a\": {\n    \""));

        let parsed: Value = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed["invite_1_a"]["userId"], "u1");
        assert_eq!(parsed["invite_1_a"]["usedAt"], Value::Null);

        let leftovers: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_missing_memory_collection_fails_to_load() {
        let mut c: MemoryCollection<User> = MemoryCollection::missing();

        assert!(c.load().is_err());
        assert_eq!(c.loads, 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_persist_keeps_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new(".store").context("Can't create a tmp dir").unwrap();
        let path = tmp.path().join(INVITE_TOKENS_FILE);
        fs::write(&path, "{}").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();

        let mut tokens = invite_tokens_collection(tmp.path());
        tokens.load().unwrap();
        tokens.upsert(token("invite_1_a", 1));
        tokens.persist().unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
