pub mod paths;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::model::{Album, AlbumKind, Asset};
use paths::{
    create_relative_symlink, find_parent_dir, is_safe_file_name, uuid_from_dir_name,
    ARCHIVE_DIR_NAME, ASSET_DIR_NAME, STASH_DIR_NAME,
};

/// What `load_assets` can actually recover from the filesystem: uuid,
/// extension and file stat. Remote-only fields (content hash, display
/// name, media kind) aren't recoverable from disk alone and live only in
/// the remote-derived `Asset` the Differ compares against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAsset {
    pub uuid: String,
    pub extension: String,
    pub size_bytes: u64,
    pub modified_time: DateTime<Utc>,
}

/// Sole mutator of the on-disk tree (spec.md §4.1).
///
/// Owns all path arithmetic and enforces the invariants in spec.md §3.
/// Every method here is operation-local: a failure on one item never
/// corrupts the rest of the tree, and re-running an operation against
/// already-applied state is safe except where explicitly noted
/// (`write_album`/`write_asset` are not idempotent by design — the Differ
/// is responsible for not re-scheduling settled work).
pub struct LibraryStore {
    data_dir: PathBuf,
}

impl LibraryStore {
    /// Opens (creating if absent) the fixed top-level layout: the asset
    /// directory, the archive directory, and its stash subdirectory.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        let store = Self { data_dir };
        fs::create_dir_all(store.asset_dir())?;
        fs::create_dir_all(store.stash_dir())?;
        Ok(store)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn asset_dir(&self) -> PathBuf {
        self.data_dir.join(ASSET_DIR_NAME)
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.data_dir.join(ARCHIVE_DIR_NAME)
    }

    pub fn stash_dir(&self) -> PathBuf {
        self.archive_dir().join(STASH_DIR_NAME)
    }

    pub fn asset_path_for(&self, uuid: &str, extension: &str) -> PathBuf {
        self.asset_dir().join(format!("{uuid}.{extension}"))
    }

    fn asset_path(&self, asset: &Asset) -> PathBuf {
        self.asset_dir().join(asset.file_name())
    }

    // ---- asset directory ------------------------------------------------

    /// Enumerates the asset directory. Fails-soft on individual files: a
    /// name that doesn't parse as `<uuid>.<ext>` is logged and skipped, it
    /// never aborts the rest of the enumeration (spec.md §4.1).
    pub fn load_assets(&self) -> Result<HashMap<String, LocalAsset>> {
        let mut out = HashMap::new();
        let dir = self.asset_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("skipping unreadable asset directory entry: {e}");
                    continue;
                }
            };

            let file_type = match entry.file_type() {
                Ok(ft) => ft,
                Err(e) => {
                    warn!("skipping {:?}, could not stat: {e}", entry.path());
                    continue;
                }
            };
            if !file_type.is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            let Some((uuid, extension)) = Asset::parse_file_name(&name) else {
                warn!("skipping asset file with unrecognized name: {name}");
                continue;
            };

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    warn!("skipping {name}, could not stat: {e}");
                    continue;
                }
            };
            let modified_time: DateTime<Utc> = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            out.insert(
                uuid.clone(),
                LocalAsset {
                    uuid,
                    extension,
                    size_bytes: metadata.len(),
                    modified_time,
                },
            );
        }

        Ok(out)
    }

    /// Streams `reader` to `<asset_dir>/<uuid>.<ext>`, verifies it, and
    /// sets the file's mtime to `asset.modified_time`.
    ///
    /// Copies in fixed-size chunks rather than via `tokio::io::copy` so the
    /// transfer can observe `cancel` between chunks, not just before the
    /// whole write starts (spec.md §5, "in-flight asset downloads observe
    /// cancellation between chunks and at retry points"). A partial file
    /// left behind by either an interrupted transfer or a mid-copy
    /// cancellation is tolerated: the post-write `verify_asset` call below
    /// will reject it and the caller (the sync engine) treats that as a
    /// retryable `VerificationFailed`, or it's caught on the next run via
    /// verification mismatch (spec.md §4.1, §5, §7).
    pub async fn write_asset(
        &self,
        asset: &Asset,
        mut reader: impl AsyncRead + Unpin,
        cancel: &tokio::sync::watch::Receiver<bool>,
    ) -> Result<()> {
        let path = self.asset_path(asset);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::File::create(&path).await?;
        let mut buf = [0u8; 64 * 1024];
        loop {
            if *cancel.borrow() {
                file.flush().await?;
                return Err(EngineError::DownloadFailed {
                    uuid: asset.uuid.clone(),
                    source: anyhow::anyhow!("run cancelled"),
                });
            }
            let n = tokio::io::AsyncReadExt::read(&mut reader, &mut buf).await?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).await?;
        }
        file.flush().await?;
        drop(file);

        if !self.verify_asset(asset).await? {
            return Err(EngineError::VerificationFailed {
                uuid: asset.uuid.clone(),
                reason: "size or content hash mismatch after write".to_string(),
            });
        }

        let mtime = filetime::FileTime::from_system_time(asset.modified_time.into());
        filetime::set_file_mtime(&path, mtime)?;

        debug!("wrote asset {} to {:?}", asset.uuid, path);
        Ok(())
    }

    /// True iff the file exists, its size matches, and its content digest
    /// matches (spec.md §4.1). Rejects truncations and size mismatches.
    pub async fn verify_asset(&self, asset: &Asset) -> Result<bool> {
        let path = self.asset_path(asset);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        Ok(asset.verify_bytes(&bytes))
    }

    /// Idempotent removal of the asset file. Never touches symlinks that
    /// reference it; dangling links left behind are the Differ's problem
    /// to schedule a re-add for (spec.md §4.1, I1).
    pub async fn delete_asset(&self, uuid: &str, extension: &str) -> Result<()> {
        let path = self.asset_path_for(uuid, extension);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    // ---- album tree -------------------------------------------------

    /// Recursive walk from the data directory, following the dual-path
    /// scheme. Only symlinks denote named albums; their target's basename
    /// (stripped of its leading dot) is the UUID. Recursion stops at
    /// `archived` nodes; the stash and the synthetic root are never
    /// emitted (spec.md §4.1).
    pub fn load_albums(&self) -> Result<HashMap<String, Album>> {
        let mut out = HashMap::new();
        self.load_albums_under(&self.data_dir, "", &mut out)?;
        Ok(out)
    }

    fn load_albums_under(
        &self,
        dir: &Path,
        parent_uuid: &str,
        out: &mut HashMap<String, Album>,
    ) -> Result<()> {
        let stash_dir = self.stash_dir();
        let archive_dir = self.archive_dir();

        let mut entries: Vec<_> = fs::read_dir(dir)?.filter_map(|e| e.ok()).collect();
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let path = entry.path();
            if path == archive_dir {
                // Archived orphans live directly under the archive root;
                // they have no dual-path pair of their own, so they are
                // not walked as ordinary albums. `clean_archived_orphans`
                // is the only thing that touches them.
                continue;
            }
            if path == stash_dir {
                continue;
            }

            let file_type = match entry.file_type() {
                Ok(ft) => ft,
                Err(e) => {
                    warn!("skipping unreadable entry {:?}: {e}", path);
                    continue;
                }
            };
            if !file_type.is_symlink() {
                continue;
            }

            let Ok(target) = fs::read_link(&path) else {
                warn!("skipping unreadable symlink {:?}", path);
                continue;
            };
            let uuid_dir = if target.is_absolute() {
                target
            } else {
                dir.join(&target)
            };
            let target_name = uuid_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let Some(uuid) = uuid_from_dir_name(&target_name) else {
                warn!("skipping symlink {:?} with non-uuid target {:?}", path, uuid_dir);
                continue;
            };

            if out.contains_key(uuid) {
                warn!("duplicate album uuid {uuid} encountered, keeping first");
                continue;
            }

            let display_name = entry.file_name().to_string_lossy().into_owned();
            let kind = self.read_album_kind(&uuid_dir)?;

            let mut album = Album::new(uuid, kind, display_name, parent_uuid);

            match kind {
                AlbumKind::Album => {
                    self.load_album_assets(&uuid_dir, &mut album)?;
                }
                AlbumKind::Folder => {
                    self.load_albums_under(&uuid_dir, uuid, out)?;
                }
                AlbumKind::Archived | AlbumKind::Root => {}
            }

            out.insert(uuid.to_string(), album);
        }

        Ok(())
    }

    fn load_album_assets(&self, uuid_dir: &Path, album: &mut Album) -> Result<()> {
        let mut entries: Vec<_> = fs::read_dir(uuid_dir)?.filter_map(|e| e.ok()).collect();
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let file_type = match entry.file_type() {
                Ok(ft) => ft,
                Err(_) => continue,
            };
            if !file_type.is_symlink() {
                continue;
            }
            let linked_filename = entry.file_name().to_string_lossy().into_owned();
            let Ok(target) = fs::read_link(entry.path()) else {
                continue;
            };
            let Some(target_name) = target.file_name().map(|n| n.to_string_lossy().into_owned())
            else {
                continue;
            };
            let Some((asset_uuid, _ext)) = Asset::parse_file_name(&target_name) else {
                continue;
            };
            album.assets.insert(asset_uuid, linked_filename);
        }
        Ok(())
    }

    /// Classifies a UUID directory's on-disk kind (spec.md §4.1):
    /// contains a subdirectory => folder (warns if real files are also
    /// present but still classifies as folder); only non-safe regular
    /// files => archived; otherwise => album.
    pub fn read_album_kind(&self, uuid_dir: &Path) -> Result<AlbumKind> {
        let mut has_subdir = false;
        let mut has_real_file = false;

        for entry in fs::read_dir(uuid_dir)?.filter_map(|e| e.ok()) {
            let file_type = match entry.file_type() {
                Ok(ft) => ft,
                Err(_) => continue,
            };
            if file_type.is_dir() {
                has_subdir = true;
            } else if file_type.is_file() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if !is_safe_file_name(&name) {
                    has_real_file = true;
                }
            }
        }

        if has_subdir {
            if has_real_file {
                warn!(
                    "{:?} contains both subdirectories and real files; classifying as folder",
                    uuid_dir
                );
            }
            Ok(AlbumKind::Folder)
        } else if has_real_file {
            Ok(AlbumKind::Archived)
        } else {
            Ok(AlbumKind::Album)
        }
    }

    /// Resolves `(name_path, uuid_path)` for `album` by locating its
    /// parent's UUID directory (spec.md §4.1, `find_album_paths`).
    pub fn find_album_paths(&self, album: &Album) -> Result<(PathBuf, PathBuf)> {
        let parent_dir = find_parent_dir(&self.data_dir, &album.parent_uuid)?;
        let uuid_path = parent_dir.join(album.uuid_dir_name());
        let name_path = parent_dir.join(crate::model::sanitize_display_name(&album.display_name));
        Ok((name_path, uuid_path))
    }

    /// Creates the dual-path pair for `album` and, for `kind = album`,
    /// links its asset members. Fails with `AlreadyExists` if either side
    /// is already present (spec.md §4.1).
    pub fn write_album(&self, album: &Album) -> Result<()> {
        let (name_path, uuid_path) = self.find_album_paths(album)?;

        if uuid_path.exists() || name_path.symlink_metadata().is_ok() {
            return Err(EngineError::AlreadyExists(uuid_path));
        }

        fs::create_dir_all(&uuid_path)?;
        create_relative_symlink(&name_path, &uuid_path)?;

        if album.kind == AlbumKind::Album {
            self.link_album_assets(album, &uuid_path)?;
        }

        info!("wrote album {} ({:?}) at {:?}", album.uuid, album.kind, uuid_path);
        Ok(())
    }

    /// Links every `(asset_uuid -> linked_filename)` member of `album`
    /// into `uuid_path`, setting each symlink's own mtime to the target
    /// asset's mtime. Per-link failures are logged and skipped, they do
    /// not abort the album write — this tolerates pre-existing links on
    /// re-run (spec.md §4.1).
    pub fn link_album_assets(&self, album: &Album, uuid_path: &Path) -> Result<()> {
        let assets = self.load_assets()?;
        for (asset_uuid, linked_filename) in album.assets.iter() {
            if let Err(e) = self.link_one_asset(&assets, uuid_path, asset_uuid, linked_filename) {
                warn!(
                    "failed to link asset {asset_uuid} as {linked_filename} in {:?}: {e}",
                    uuid_path
                );
            }
        }
        Ok(())
    }

    fn link_one_asset(
        &self,
        assets: &HashMap<String, LocalAsset>,
        uuid_path: &Path,
        asset_uuid: &str,
        linked_filename: &str,
    ) -> Result<()> {
        let local = assets.get(asset_uuid).ok_or_else(|| EngineError::VerificationFailed {
            uuid: asset_uuid.to_string(),
            reason: "asset not present in the asset directory".to_string(),
        })?;
        let asset_path = self.asset_path_for(asset_uuid, &local.extension);
        let link_path = uuid_path.join(linked_filename);

        if link_path.symlink_metadata().is_ok() {
            return Ok(());
        }
        create_relative_symlink(&link_path, &asset_path)?;

        let mtime = filetime::FileTime::from_system_time(local.modified_time.into());
        filetime::set_symlink_file_times(&link_path, mtime, mtime)?;
        Ok(())
    }

    /// Removes symlinks in `uuid_path` whose target asset is no longer a
    /// member of `album`. A companion to `link_album_assets` for albums
    /// that survive a run but lose individual asset members (spec.md
    /// §4.1 doesn't name this as a distinct Differ operation; it's the
    /// other half of `link_album_assets` tolerating re-runs on
    /// already-written albums).
    pub fn prune_stale_asset_links(&self, album: &Album, uuid_path: &Path) -> Result<()> {
        for entry in fs::read_dir(uuid_path)?.filter_map(|e| e.ok()) {
            let file_type = match entry.file_type() {
                Ok(ft) => ft,
                Err(_) => continue,
            };
            if !file_type.is_symlink() {
                continue;
            }
            let Ok(target) = fs::read_link(entry.path()) else {
                continue;
            };
            let Some(target_name) = target.file_name().map(|n| n.to_string_lossy().into_owned())
            else {
                continue;
            };
            let Some((asset_uuid, _ext)) = Asset::parse_file_name(&target_name) else {
                continue;
            };
            if !album.assets.contains_asset(&asset_uuid) {
                fs::remove_file(entry.path())?;
                debug!("pruned stale asset link {:?}", entry.path());
            }
        }
        Ok(())
    }

    /// Swaps the name symlink for a same-UUID, same-parent rename: unlinks
    /// the old display name and relinks the new one at the same UUID
    /// directory, without touching the directory or its asset links
    /// (spec.md §9, explicit same-UUID swap).
    pub fn rename_album(&self, previous: &Album, renamed: &Album) -> Result<()> {
        let (old_name_path, uuid_path) = self.find_album_paths(previous)?;
        let (new_name_path, new_uuid_path) = self.find_album_paths(renamed)?;
        debug_assert_eq!(uuid_path, new_uuid_path, "rename must not change the uuid directory");

        if old_name_path.symlink_metadata().is_ok() {
            fs::remove_file(&old_name_path)?;
        }
        create_relative_symlink(&new_name_path, &uuid_path)?;
        info!("renamed album {} to {:?}", renamed.uuid, new_name_path);
        Ok(())
    }

    /// Removes the dual-path pair for `album`. Fails if either side is
    /// missing. Before deleting, enumerates `uuid_path`: any entry that
    /// isn't a symlink or a safe-named file aborts with `NotEmpty` — the
    /// caller should archive instead (spec.md §4.1).
    pub fn delete_album(&self, album: &Album) -> Result<()> {
        let (name_path, uuid_path) = self.find_album_paths(album)?;

        if !uuid_path.exists() || name_path.symlink_metadata().is_err() {
            // Spec.md's filesystem error taxonomy has no dedicated kind for
            // "the album being deleted is already gone"; it's the same
            // precondition `move_path_tuple` enforces on its source pair.
            return Err(EngineError::MoveSourceMissing(uuid_path));
        }

        for entry in fs::read_dir(&uuid_path)?.filter_map(|e| e.ok()) {
            let file_type = entry.file_type()?;
            if file_type.is_symlink() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if file_type.is_file() && is_safe_file_name(&name) {
                continue;
            }
            return Err(EngineError::NotEmpty(uuid_path));
        }

        fs::remove_dir_all(&uuid_path)?;
        fs::remove_file(&name_path)?;
        info!("deleted album {} at {:?}", album.uuid, uuid_path);
        Ok(())
    }

    /// Moves the dual-path pair from `src_parent` to `dst_parent`,
    /// renaming the UUID directory first, then unlinking the old name
    /// symlink, then creating a fresh relative name symlink at the
    /// destination (spec.md §4.1, `move_path_tuple`). The symlink is
    /// recreated rather than moved because its relative target basename
    /// changes with the parent.
    fn move_path_tuple(
        &self,
        uuid_dir_name: &str,
        display_name: &str,
        src_parent: &Path,
        dst_parent: &Path,
    ) -> Result<()> {
        let src_uuid_path = src_parent.join(uuid_dir_name);
        let src_name_path = src_parent.join(display_name);
        let dst_uuid_path = dst_parent.join(uuid_dir_name);
        let dst_name_path = dst_parent.join(display_name);

        if !src_uuid_path.exists() {
            return Err(EngineError::MoveSourceMissing(src_uuid_path));
        }
        if src_name_path.symlink_metadata().is_err() {
            return Err(EngineError::MoveSourceMissing(src_name_path));
        }
        if dst_uuid_path.exists() || dst_name_path.symlink_metadata().is_ok() {
            return Err(EngineError::MoveDestinationExists(dst_uuid_path));
        }

        fs::create_dir_all(dst_parent)?;
        fs::rename(&src_uuid_path, &dst_uuid_path)?;
        fs::remove_file(&src_name_path)?;
        create_relative_symlink(&dst_name_path, &dst_uuid_path)?;

        Ok(())
    }

    /// Moves an archived album's pair under the stash (spec.md §4.1).
    pub fn stash_archived_album(&self, album: &Album) -> Result<()> {
        let (name_path, uuid_path) = self.find_album_paths(album)?;
        let src_parent = uuid_path
            .parent()
            .ok_or_else(|| EngineError::ParentNotFound(album.parent_uuid.clone()))?;
        let display_name = name_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| album.display_name.clone());

        self.move_path_tuple(
            &album.uuid_dir_name(),
            &display_name,
            src_parent,
            &self.stash_dir(),
        )?;
        info!("stashed archived album {}", album.uuid);
        Ok(())
    }

    /// Moves a stashed album's pair back to its computed parent path
    /// (spec.md §4.1).
    pub fn retrieve_stashed_album(&self, album: &Album) -> Result<()> {
        let stash_dir = self.stash_dir();
        let display_name = self.find_album_paths(album)?.0;
        let display_name = display_name
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| album.display_name.clone());
        let dst_parent = find_parent_dir(&self.data_dir, &album.parent_uuid)?;

        self.move_path_tuple(&album.uuid_dir_name(), &display_name, &stash_dir, &dst_parent)?;
        info!("retrieved stashed album {}", album.uuid);
        Ok(())
    }

    /// Uuids currently sitting in the stash, derived from each stash
    /// symlink's target (spec.md §4.1 state machine, state `stashed`).
    /// Lets a caller check a stash entry against a fresh remote listing
    /// before deciding whether to retrieve it or leave it for
    /// `clean_archived_orphans`.
    pub fn stash_album_uuids(&self) -> Result<Vec<String>> {
        let stash_dir = self.stash_dir();
        let mut uuids = Vec::new();

        let entries = match fs::read_dir(&stash_dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(uuids),
            Err(e) => return Err(e.into()),
        };

        for entry in entries.filter_map(|e| e.ok()) {
            let file_type = match entry.file_type() {
                Ok(ft) => ft,
                Err(_) => continue,
            };
            if !file_type.is_symlink() {
                continue;
            }
            let Ok(target) = fs::read_link(entry.path()) else {
                continue;
            };
            let target_name = target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if let Some(uuid) = uuid_from_dir_name(&target_name) {
                uuids.push(uuid.to_string());
            }
        }

        Ok(uuids)
    }

    /// Flattens the stash into permanent archived entries: each stash
    /// album's UUID directory is renamed into the archive root under a
    /// collision-avoiding name (`<base>`, `<base>-1`, `<base>-2`, ...) and
    /// its stash name symlink is unlinked (spec.md §4.1).
    pub fn clean_archived_orphans(&self) -> Result<usize> {
        let stash_dir = self.stash_dir();
        let archive_dir = self.archive_dir();
        let mut promoted = 0;

        let entries: Vec<_> = fs::read_dir(&stash_dir)?.filter_map(|e| e.ok()).collect();
        for entry in entries {
            let file_type = match entry.file_type() {
                Ok(ft) => ft,
                Err(_) => continue,
            };
            if !file_type.is_symlink() {
                continue;
            }

            let name_path = entry.path();
            let Ok(target) = fs::read_link(&name_path) else {
                continue;
            };
            let uuid_dir_name = target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let src_uuid_path = stash_dir.join(&uuid_dir_name);
            if !src_uuid_path.exists() {
                warn!("stash entry {:?} has no backing directory, skipping", name_path);
                continue;
            }

            let base_name = entry.file_name().to_string_lossy().into_owned();
            let dst = Self::first_free_name(&archive_dir, &base_name);

            fs::rename(&src_uuid_path, &dst)?;
            fs::remove_file(&name_path)?;
            promoted += 1;
            info!("promoted orphaned stash entry {:?} to {:?}", name_path, dst);
        }

        Ok(promoted)
    }

    fn first_free_name(archive_dir: &Path, base_name: &str) -> PathBuf {
        let candidate = archive_dir.join(base_name);
        if !candidate.exists() {
            return candidate;
        }
        let mut n: usize = 1;
        loop {
            let candidate = archive_dir.join(format!("{base_name}-{n}"));
            if !candidate.exists() {
                return candidate;
            }
            n += 1;
        }
    }
}
