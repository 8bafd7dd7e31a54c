use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{EngineError, Result};

pub const ASSET_DIR_NAME: &str = "_All-Photos";
pub const ARCHIVE_DIR_NAME: &str = "_Archive";
pub const STASH_DIR_NAME: &str = "_Stash";
pub const RESOURCE_FILE_NAME: &str = ".photos-library.db";

/// Filenames ignored by kind detection and deletion-emptiness checks
/// (spec.md §6, "Safe filenames").
const SAFE_FILE_NAMES: &[&str] = &[".DS_Store", "Thumbs.db", "desktop.ini", ".localized"];

pub fn is_safe_file_name(name: &str) -> bool {
    SAFE_FILE_NAMES.contains(&name)
}

/// Strips the leading dot from a UUID directory name (`.{uuid}` -> `{uuid}`).
pub fn uuid_from_dir_name(dir_name: &str) -> Option<&str> {
    dir_name.strip_prefix('.').filter(|s| !s.is_empty())
}

/// Creates a relative symlink at `link_path` pointing at `target_path`.
///
/// Both paths must exist (or at least be resolvable as siblings) for the
/// relative computation to make sense; the link itself need not exist yet.
/// All internal symlinks are relative (spec.md §6, "Symlink format") so the
/// tree remains portable across `data_dir` moves.
pub fn create_relative_symlink(link_path: &Path, target_path: &Path) -> Result<()> {
    let link_parent = link_path.parent().unwrap_or_else(|| Path::new("."));
    let relative_target = pathdiff::diff_paths(target_path, link_parent)
        .unwrap_or_else(|| target_path.to_path_buf());

    #[cfg(unix)]
    std::os::unix::fs::symlink(&relative_target, link_path)?;
    #[cfg(not(unix))]
    compile_error!("mirror-engine requires POSIX symlink support (spec.md §6)");

    Ok(())
}

/// Resolves the pair `(name_path, uuid_path)` for an album by locating the
/// parent's UUID directory under `root` (spec.md §4.1, `find_album_paths`).
///
/// Fails with `ParentNotFound` if the parent cannot be located, and with
/// `AmbiguousTree` if more than one match is found (I3 violation), unless
/// `parent_uuid` is empty, in which case the parent is `root` itself.
pub fn find_parent_dir(root: &Path, parent_uuid: &str) -> Result<PathBuf> {
    if parent_uuid.is_empty() {
        return Ok(root.to_path_buf());
    }

    let target_name = format!(".{parent_uuid}");
    let mut matches = Vec::new();
    find_dirs_named(root, &target_name, &mut matches)?;

    match matches.len() {
        0 => Err(EngineError::ParentNotFound(parent_uuid.to_string())),
        1 => Ok(matches.remove(0)),
        _ => Err(EngineError::AmbiguousTree(parent_uuid.to_string())),
    }
}

fn find_dirs_named(dir: &Path, name: &str, out: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .collect::<Vec<_>>();
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let file_type = match entry.file_type() {
            Ok(ft) => ft,
            Err(e) => {
                warn!("skipping unreadable entry {:?}: {e}", entry.path());
                continue;
            }
        };
        if !file_type.is_dir() {
            continue;
        }
        let path = entry.path();
        let entry_name = entry.file_name().to_string_lossy().into_owned();
        if entry_name == name {
            out.push(path.clone());
        }
        // Recurse only through hidden UUID directories; named symlinks
        // don't add new structural paths beyond what their target covers.
        if entry_name.starts_with('.') {
            find_dirs_named(&path, name, out)?;
        }
    }
    Ok(())
}
