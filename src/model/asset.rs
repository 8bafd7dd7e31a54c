use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of media an [`Asset`] represents, as reported by the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Original,
    Edited,
    LivePhotoVideo,
}

/// Immutable descriptor of a single remote asset.
///
/// Identity is the `uuid`; two assets are equal iff their uuids match,
/// regardless of any other field (spec.md §3, "Identity equality is by uuid").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub uuid: String,
    pub filename_stem: String,
    pub extension: String,
    pub size_bytes: u64,
    pub content_hash: String,
    pub modified_time: DateTime<Utc>,
    pub kind: AssetKind,
}

impl PartialEq for Asset {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}
impl Eq for Asset {}

impl std::hash::Hash for Asset {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.uuid.hash(state);
    }
}

impl Asset {
    /// The on-disk filename for this asset: `<uuid>.<ext>` (spec.md I5).
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.uuid, self.extension)
    }

    /// Parses the on-disk filename `<uuid>.<ext>` back into its parts.
    /// Returns `None` for names that don't carry an extension (these are
    /// skipped, fail-soft, by `load_assets`).
    pub fn parse_file_name(name: &str) -> Option<(String, String)> {
        let (uuid, ext) = name.rsplit_once('.')?;
        if uuid.is_empty() || ext.is_empty() {
            return None;
        }
        Some((uuid.to_string(), ext.to_string()))
    }

    /// Content-derived digest used by `verify_asset` (spec.md §4.1).
    pub fn hash_bytes(bytes: &[u8]) -> String {
        blake3::hash(bytes).to_hex().to_string()
    }

    /// Self-verify against freshly read bytes: size must match exactly and
    /// the digest must match `content_hash`. Rejects truncations and size
    /// mismatches (spec.md §4.1, `verify_asset`).
    pub fn verify_bytes(&self, bytes: &[u8]) -> bool {
        bytes.len() as u64 == self.size_bytes && Self::hash_bytes(bytes) == self.content_hash
    }
}
