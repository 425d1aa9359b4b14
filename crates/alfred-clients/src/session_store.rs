//! Sidecar session blobs: `{source}.db.user_{user_id}` files on a
//! persistent volume. These carry protocol keys and must never leak
//! across users — the filename *is* the isolation boundary.

use std::path::{Path, PathBuf};

use alfred_core::types::{Source, UserId};
use tracing::{info, warn};

use crate::error::Result;

pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    fn path(&self, source: Source, user_id: &UserId) -> PathBuf {
        self.dir
            .join(format!("{}.db.user_{}", source.as_str(), user_id))
    }

    pub fn save(&self, source: Source, user_id: &UserId, blob: &[u8]) -> Result<()> {
        let path = self.path(source, user_id);
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, blob)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn load(&self, source: Source, user_id: &UserId) -> Result<Option<Vec<u8>>> {
        match std::fs::read(self.path(source, user_id)) {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn delete(&self, source: Source, user_id: &UserId) -> Result<()> {
        match std::fs::remove_file(self.path(source, user_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// One-time migration: delete legacy shared session files
    /// (`whatsapp.db`, `telegram.db`) from the single-user era. Users
    /// re-pair on the provider side; splitting the old state is not
    /// possible.
    pub fn cleanup_legacy_shared_files(&self) {
        for source in [Source::Whatsapp, Source::Telegram] {
            let legacy = self.dir.join(format!("{}.db", source.as_str()));
            if legacy.exists() {
                match std::fs::remove_file(&legacy) {
                    Ok(()) => info!(path = %legacy.display(), "removed legacy shared session file"),
                    Err(e) => warn!(path = %legacy.display(), error = %e,
                        "failed to remove legacy session file"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blobs_are_isolated_per_user_and_source() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");

        store.save(Source::Whatsapp, &alice, b"alice-keys").unwrap();
        store.save(Source::Whatsapp, &bob, b"bob-keys").unwrap();
        store.save(Source::Telegram, &alice, b"alice-tg").unwrap();

        assert_eq!(
            store.load(Source::Whatsapp, &alice).unwrap().unwrap(),
            b"alice-keys"
        );
        assert_eq!(
            store.load(Source::Whatsapp, &bob).unwrap().unwrap(),
            b"bob-keys"
        );
        assert!(dir.path().join("whatsapp.db.user_alice").exists());
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        let uid = UserId::from("u1");
        store.save(Source::Whatsapp, &uid, b"x").unwrap();
        store.delete(Source::Whatsapp, &uid).unwrap();
        store.delete(Source::Whatsapp, &uid).unwrap();
        assert!(store.load(Source::Whatsapp, &uid).unwrap().is_none());
    }

    #[test]
    fn legacy_shared_files_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("whatsapp.db"), b"legacy").unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        store.cleanup_legacy_shared_files();
        assert!(!dir.path().join("whatsapp.db").exists());
    }
}
