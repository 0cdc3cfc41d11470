//! Named, TTL-bounded mutual exclusion for background work.
//!
//! A lease is acquired by name and expires on its own if the holder dies.
//! Not getting a lease is a normal outcome ("someone else owns this cycle"),
//! so `try_acquire` returns `Ok(None)` rather than an error.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use mg_domain::error::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockLease {
    pub name: String,
    pub token: Uuid,
    pub expires_at: DateTime<Utc>,
}

impl LockLease {
    fn new(name: &str, ttl: Duration) -> Result<Self> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|_| Error::Validation(format!("lock ttl {ttl:?} is out of range")))?;
        Ok(Self {
            name: name.to_string(),
            token: Uuid::new_v4(),
            expires_at: Utc::now() + ttl,
        })
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

#[async_trait]
pub trait LockManager: Send + Sync {
    /// Try to take the lock `name` for `ttl`. `Ok(None)` means another holder
    /// has an unexpired lease.
    async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<Option<LockLease>>;

    /// Release `lease` if it is still the current holder. Releasing a lease
    /// that expired and was taken over is a no-op.
    async fn release(&self, lease: &LockLease) -> Result<()>;
}

// ── In-process ─────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryLockManager {
    leases: Mutex<HashMap<String, LockLease>>,
}

impl MemoryLockManager {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockManager for MemoryLockManager {
    async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<Option<LockLease>> {
        let mut leases = self.leases.lock();
        if leases.get(name).is_some_and(|held| !held.is_expired()) {
            return Ok(None);
        }
        let lease = LockLease::new(name, ttl)?;
        leases.insert(name.to_string(), lease.clone());
        Ok(Some(lease))
    }

    async fn release(&self, lease: &LockLease) -> Result<()> {
        let mut leases = self.leases.lock();
        if leases.get(&lease.name).is_some_and(|held| held.token == lease.token) {
            leases.remove(&lease.name);
        }
        Ok(())
    }
}

// ── Cross-process ──────────────────────────────────────────────────

/// Lease records stored as `{dir}/{name}.lock`.
///
/// Each read-modify-write of a record happens under an `fs2` exclusive lock
/// on the record file, so two processes can never both win the same lease.
/// The lease itself lives in the file contents, which lets it outlive the
/// advisory lock and expire by time.
pub struct FileLockManager {
    dir: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct LeaseRecord {
    #[serde(flatten)]
    lease: LockLease,
    pid: u32,
}

impl FileLockManager {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(Error::Validation(format!("invalid lock name '{name}'")));
        }
        Ok(self.dir.join(format!("{name}.lock")))
    }
}

fn open_record(path: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)?;
    file.lock_exclusive()?;
    Ok(file)
}

/// Current lease in the record, if any. Unparsable contents count as free.
fn read_record(file: &mut File) -> Result<Option<LeaseRecord>> {
    let mut data = String::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_string(&mut data)?;
    if data.trim().is_empty() {
        return Ok(None);
    }
    Ok(serde_json::from_str(&data).ok())
}

fn write_record(file: &mut File, record: Option<&LeaseRecord>) -> Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    if let Some(record) = record {
        serde_json::to_writer(&mut *file, record)?;
    }
    file.flush()?;
    Ok(())
}

fn acquire_blocking(path: PathBuf, lease: LockLease) -> Result<Option<LockLease>> {
    let mut file = open_record(&path)?;
    let result = acquire_locked(&mut file, lease);
    let _ = FileExt::unlock(&file);
    result
}

fn acquire_locked(file: &mut File, lease: LockLease) -> Result<Option<LockLease>> {
    if let Some(current) = read_record(file)? {
        if !current.lease.is_expired() {
            return Ok(None);
        }
        tracing::info!(
            lock = %lease.name,
            previous_pid = current.pid,
            "taking over expired lock"
        );
    }
    let record = LeaseRecord {
        lease,
        pid: std::process::id(),
    };
    write_record(file, Some(&record))?;
    Ok(Some(record.lease))
}

fn release_blocking(path: PathBuf, lease: LockLease) -> Result<()> {
    let mut file = open_record(&path)?;
    let result = match read_record(&mut file) {
        Ok(Some(current)) if current.lease.token == lease.token => write_record(&mut file, None),
        Ok(_) => Ok(()),
        Err(e) => Err(e),
    };
    let _ = FileExt::unlock(&file);
    result
}

#[async_trait]
impl LockManager for FileLockManager {
    async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<Option<LockLease>> {
        let path = self.path_for(name)?;
        let lease = LockLease::new(name, ttl)?;
        tokio::task::spawn_blocking(move || acquire_blocking(path, lease))
            .await
            .map_err(|e| Error::Other(format!("lock task panicked: {e}")))?
    }

    async fn release(&self, lease: &LockLease) -> Result<()> {
        let path = self.path_for(&lease.name)?;
        let lease = lease.clone();
        tokio::task::spawn_blocking(move || release_blocking(path, lease))
            .await
            .map_err(|e| Error::Other(format!("lock task panicked: {e}")))?
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn memory_lock_is_exclusive_until_released() {
        let locks = MemoryLockManager::new();
        let lease = locks.try_acquire("refresh", MINUTE).await.unwrap().unwrap();
        assert!(locks.try_acquire("refresh", MINUTE).await.unwrap().is_none());
        assert!(locks.try_acquire("other", MINUTE).await.unwrap().is_some());

        locks.release(&lease).await.unwrap();
        assert!(locks.try_acquire("refresh", MINUTE).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn memory_lock_expires() {
        let locks = MemoryLockManager::new();
        let stale = locks
            .try_acquire("refresh", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let fresh = locks.try_acquire("refresh", MINUTE).await.unwrap().unwrap();

        // The stale holder cannot release the new lease.
        locks.release(&stale).await.unwrap();
        assert!(locks.try_acquire("refresh", MINUTE).await.unwrap().is_none());
        locks.release(&fresh).await.unwrap();
    }

    #[tokio::test]
    async fn file_lock_is_shared_across_managers() {
        let dir = tempfile::tempdir().unwrap();
        let a = FileLockManager::new(dir.path()).unwrap();
        let b = FileLockManager::new(dir.path()).unwrap();

        let lease = a.try_acquire("catalog-refresh", MINUTE).await.unwrap().unwrap();
        assert!(b.try_acquire("catalog-refresh", MINUTE).await.unwrap().is_none());

        a.release(&lease).await.unwrap();
        assert!(b.try_acquire("catalog-refresh", MINUTE).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn file_lock_takes_over_expired_and_corrupt_records() {
        let dir = tempfile::tempdir().unwrap();
        let locks = FileLockManager::new(dir.path()).unwrap();

        locks
            .try_acquire("job", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(locks.try_acquire("job", MINUTE).await.unwrap().is_some());

        std::fs::write(dir.path().join("broken.lock"), "garbage").unwrap();
        assert!(locks.try_acquire("broken", MINUTE).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn file_lock_rejects_path_like_names() {
        let dir = tempfile::tempdir().unwrap();
        let locks = FileLockManager::new(dir.path()).unwrap();
        assert!(locks.try_acquire("../etc", MINUTE).await.is_err());
    }
}
