pub mod album;
pub mod asset;

pub use album::{sanitize_display_name, Album, AlbumKind, AssetLinks};
pub use asset::{Asset, AssetKind};
