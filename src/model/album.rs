use serde::{Deserialize, Serialize};

/// Kind of album node in the tree (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlbumKind {
    /// Synthetic, never written, never listed.
    Root,
    /// Contains only other albums; no asset links.
    Folder,
    /// Contains only asset symlinks; no child directories.
    Album,
    /// User-owned files the engine never inspects past its kind.
    Archived,
}

/// Ordered `asset_uuid -> linked_filename` membership map.
///
/// A plain `Vec` rather than a hash map: spec.md requires a stable
/// ordering for album membership and `write_album`/`link_album_assets`
/// must walk entries deterministically for test replay (spec.md §4.2,
/// P5).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssetLinks(Vec<(String, String)>);

impl AssetLinks {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn insert(&mut self, asset_uuid: impl Into<String>, linked_filename: impl Into<String>) {
        let asset_uuid = asset_uuid.into();
        let linked_filename = linked_filename.into();
        if let Some(entry) = self.0.iter_mut().find(|(u, _)| *u == asset_uuid) {
            entry.1 = linked_filename;
        } else {
            self.0.push((asset_uuid, linked_filename));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(u, f)| (u.as_str(), f.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains_asset(&self, asset_uuid: &str) -> bool {
        self.0.iter().any(|(u, _)| u == asset_uuid)
    }
}

impl FromIterator<(String, String)> for AssetLinks {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Descriptor of a folder or album (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Album {
    pub uuid: String,
    pub kind: AlbumKind,
    pub display_name: String,
    /// Empty string for the synthetic root.
    pub parent_uuid: String,
    pub assets: AssetLinks,
}

impl PartialEq for Album {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
            && self.kind == other.kind
            && self.display_name == other.display_name
            && self.parent_uuid == other.parent_uuid
            && self.assets == other.assets
    }
}

impl Album {
    pub fn new(
        uuid: impl Into<String>,
        kind: AlbumKind,
        display_name: impl Into<String>,
        parent_uuid: impl Into<String>,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            kind,
            display_name: display_name.into(),
            parent_uuid: parent_uuid.into(),
            assets: AssetLinks::new(),
        }
    }

    /// The name of the hidden UUID directory: `.{uuid}` (spec.md §3).
    pub fn uuid_dir_name(&self) -> String {
        format!(".{}", self.uuid)
    }
}

/// Sanitizes a remote display name into a filesystem-safe symlink name.
///
/// Replaces path separators and other characters that would break the
/// dual-path scheme with `_`; trims trailing whitespace/dots which some
/// filesystems reject.
pub fn sanitize_display_name(name: &str) -> String {
    let mut sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    while sanitized.ends_with('.') || sanitized.ends_with(' ') {
        sanitized.pop();
    }
    if sanitized.is_empty() {
        sanitized.push_str("untitled");
    }
    sanitized
}
