//! Integration tests against a real on-disk tree (`tempfile::TempDir`),
//! covering spec.md §8's testable properties and concrete scenarios.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use mirror_engine::config::{Config, LogLevel, MetadataRate};
use mirror_engine::differ::{diff, LocalState, RemoteState};
use mirror_engine::model::{Album, AlbumKind, Asset, AssetKind};
use mirror_engine::remote::{MockRemoteApi, RemoteAlbumListing};
use mirror_engine::resources::SharedResources;
use mirror_engine::store::LibraryStore;
use mirror_engine::sync::{never_cancel, SyncEngine};

fn config(data_dir: &std::path::Path) -> Config {
    Config {
        data_dir: data_dir.to_path_buf(),
        username: "user".to_string(),
        password: "pass".to_string(),
        trust_token: Some("test-token".to_string()),
        refresh_token: false,
        port: 10000,
        max_retries: 2,
        download_threads: 4,
        schedule: None,
        enable_crash_reporting: false,
        fail_on_mfa: false,
        force: false,
        remote_delete: false,
        silent: false,
        log_to_cli: false,
        suppress_warnings: false,
        export_metrics: false,
        log_level: LogLevel::Info,
        metadata_rate: MetadataRate { count: 100, interval_ms: 10 },
    }
}

fn asset(uuid: &str, bytes: &[u8]) -> Asset {
    Asset {
        uuid: uuid.to_string(),
        filename_stem: uuid.to_string(),
        extension: "jpg".to_string(),
        size_bytes: bytes.len() as u64,
        content_hash: Asset::hash_bytes(bytes),
        modified_time: Utc::now(),
        kind: AssetKind::Original,
    }
}

async fn engine_for(
    dir: &std::path::Path,
    listings: Vec<RemoteAlbumListing>,
    bytes: HashMap<String, Vec<u8>>,
) -> (SyncEngine, Arc<LibraryStore>) {
    let store = Arc::new(LibraryStore::open(dir).unwrap());
    let network = Arc::new(MockRemoteApi::new(listings, bytes));
    let resources = Arc::new(SharedResources::build(config(dir), network).unwrap());
    (SyncEngine::new(resources, store.clone()), store)
}

#[tokio::test]
async fn fresh_sync_downloads_assets_and_links_album() {
    let dir = tempfile::tempdir().unwrap();
    let p1 = asset("p1", b"photo one");
    let p2 = asset("p2", b"photo two");

    let mut album = Album::new("aaa", AlbumKind::Album, "Vacation", "");
    album.assets.insert("p1", "a1.jpg");
    album.assets.insert("p2", "a2.jpg");

    let mut bytes = HashMap::new();
    bytes.insert("p1".to_string(), b"photo one".to_vec());
    bytes.insert("p2".to_string(), b"photo two".to_vec());

    let (engine, store) = engine_for(
        dir.path(),
        vec![RemoteAlbumListing { album, assets: vec![p1, p2] }],
        bytes,
    )
    .await;

    let report = engine.run(never_cancel()).await.unwrap();
    assert_eq!(report.assets_added, 2);
    assert_eq!(report.assets_failed, 0);
    assert_eq!(report.albums_applied, 1);

    assert!(store.asset_path_for("p1", "jpg").exists());
    assert!(store.asset_path_for("p2", "jpg").exists());
    assert!(dir.path().join(".aaa").join("a1.jpg").exists());
    assert!(dir.path().join("Vacation").exists());

    // P2: idempotence under re-run with unchanged remote state.
    let albums = store.load_albums().unwrap();
    let assets = store.load_assets().unwrap();
    let mut remote = RemoteState::default();
    let loaded_album = albums.get("aaa").unwrap().clone();
    remote.albums.insert("aaa".to_string(), loaded_album);
    let mut local = LocalState {
        albums: albums.clone(),
        assets: assets.clone(),
        verified_asset_uuids: Default::default(),
    };
    for (uuid, local_asset) in &assets {
        let bytes = std::fs::read(store.asset_path_for(uuid, &local_asset.extension)).unwrap();
        let hash = Asset::hash_bytes(&bytes);
        remote.assets.insert(
            uuid.clone(),
            Asset {
                uuid: uuid.clone(),
                filename_stem: uuid.clone(),
                extension: local_asset.extension.clone(),
                size_bytes: local_asset.size_bytes,
                content_hash: hash,
                modified_time: local_asset.modified_time,
                kind: AssetKind::Original,
            },
        );
        local.verified_asset_uuids.insert(uuid.clone());
    }
    let ops = diff(&remote, &local);
    assert!(ops.is_empty(), "expected empty plan on unchanged re-run, got {ops:?}");
}

#[tokio::test]
async fn rename_swaps_symlink_without_redownloading_assets() {
    let dir = tempfile::tempdir().unwrap();
    let p1 = asset("p1", b"photo one");
    let mut album = Album::new("aaa", AlbumKind::Album, "Vacation", "");
    album.assets.insert("p1", "a1.jpg");

    let mut bytes = HashMap::new();
    bytes.insert("p1".to_string(), b"photo one".to_vec());

    let (engine, store) = engine_for(
        dir.path(),
        vec![RemoteAlbumListing { album, assets: vec![p1.clone()] }],
        bytes.clone(),
    )
    .await;
    engine.run(never_cancel()).await.unwrap();
    assert!(dir.path().join("Vacation").exists());

    // Second run: remote renames "Vacation" to "Holiday", same uuid.
    let mut renamed = Album::new("aaa", AlbumKind::Album, "Holiday", "");
    renamed.assets.insert("p1", "a1.jpg");
    let network = Arc::new(MockRemoteApi::new(
        vec![RemoteAlbumListing { album: renamed, assets: vec![p1] }],
        bytes,
    ));
    let resources = Arc::new(SharedResources::build(config(dir.path()), network).unwrap());
    let engine2 = SyncEngine::new(resources, store.clone());
    let report = engine2.run(never_cancel()).await.unwrap();

    assert_eq!(report.assets_added, 0, "rename must not re-download assets");
    assert!(!dir.path().join("Vacation").exists());
    assert!(dir.path().join("Holiday").exists());
    assert!(dir.path().join(".aaa").exists(), "uuid directory must survive a rename");
}

#[tokio::test]
async fn archived_album_is_stashed_then_promoted_when_remote_drops_it() {
    let dir = tempfile::tempdir().unwrap();
    let store = LibraryStore::open(dir.path()).unwrap();

    // Simulate a user-converted archived album directly on disk: a
    // dual-path pair whose uuid directory holds real files.
    let uuid_dir = dir.path().join(".bbb");
    std::fs::create_dir_all(&uuid_dir).unwrap();
    std::fs::write(uuid_dir.join("keepsake.jpg"), b"user photo").unwrap();
    #[cfg(unix)]
    std::os::unix::fs::symlink(".bbb", dir.path().join("Holiday")).unwrap();

    let albums = store.load_albums().unwrap();
    let archived = albums.get("bbb").unwrap();
    assert_eq!(archived.kind, AlbumKind::Archived);

    let remote = RemoteState::default(); // remote no longer lists "bbb"
    let local = LocalState {
        albums: albums.clone(),
        assets: store.load_assets().unwrap(),
        verified_asset_uuids: Default::default(),
    };
    let ops = diff(&remote, &local);
    assert_eq!(ops.len(), 1);
    let mirror_engine::differ::Operation::AlbumArchiveStash(stashed) = &ops[0] else {
        panic!("expected AlbumArchiveStash, got {ops:?}");
    };
    store.stash_archived_album(stashed).unwrap();

    assert!(!dir.path().join(".bbb").exists());
    assert!(!dir.path().join("Holiday").exists());

    let promoted = store.clean_archived_orphans().unwrap();
    assert_eq!(promoted, 1);
    assert!(dir.path().join("_Archive").join("Holiday").exists());
    assert!(dir
        .path()
        .join("_Archive")
        .join("Holiday")
        .join("keepsake.jpg")
        .exists());
}

#[tokio::test]
async fn dangling_asset_link_is_rescheduled_for_download() {
    let dir = tempfile::tempdir().unwrap();
    let store = LibraryStore::open(dir.path()).unwrap();

    let uuid_dir = dir.path().join(".ccc");
    std::fs::create_dir_all(&uuid_dir).unwrap();
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink("../_All-Photos/missing.jpg", uuid_dir.join("foo.jpg")).unwrap();
        std::os::unix::fs::symlink(".ccc", dir.path().join("Trip")).unwrap();
    }

    let albums = store.load_albums().unwrap();
    let local_album = albums.get("ccc").unwrap().clone();
    assert!(local_album.assets.contains_asset("missing"));

    let missing_asset = asset("missing", b"recovered bytes");
    let mut remote = RemoteState::default();
    let mut remote_album = local_album.clone();
    remote_album.assets = Default::default();
    remote_album.assets.insert("missing", "foo.jpg");
    remote.albums.insert("ccc".to_string(), remote_album);
    remote.assets.insert("missing".to_string(), missing_asset);

    let local = LocalState {
        albums: albums.clone(),
        assets: store.load_assets().unwrap(),
        verified_asset_uuids: Default::default(), // verify_asset would find no file
    };
    let ops = diff(&remote, &local);
    assert_eq!(ops.len(), 1);
    assert!(matches!(ops[0], mirror_engine::differ::Operation::AssetAdd(_)));
}

#[tokio::test]
async fn ambiguous_uuid_directory_fails_parent_lookup() {
    let dir = tempfile::tempdir().unwrap();
    let store = LibraryStore::open(dir.path()).unwrap();

    // `find_parent_dir` only recurses through hidden uuid directories
    // (real album nesting always goes through `.{uuid}`), so both copies
    // of `.ddd` must sit under their own hidden parent to be reachable.
    std::fs::create_dir_all(dir.path().join(".left").join(".ddd")).unwrap();
    std::fs::create_dir_all(dir.path().join(".right").join(".ddd")).unwrap();

    let album = Album::new("eee", AlbumKind::Album, "Sub", "ddd");
    let result = store.find_album_paths(&album);
    assert!(matches!(result, Err(mirror_engine::error::EngineError::AmbiguousTree(_))));
}

#[tokio::test]
async fn stash_round_trip_restores_without_orphan_promotion() {
    let dir = tempfile::tempdir().unwrap();
    let store = LibraryStore::open(dir.path()).unwrap();

    let album = Album::new("fff", AlbumKind::Album, "Reunion", "");
    store.write_album(&album).unwrap();

    let mut archived = album.clone();
    // Simulate the user converting it into an archived album by dropping a
    // real file directly into the uuid directory.
    std::fs::write(dir.path().join(".fff").join("keepsake.jpg"), b"memory").unwrap();
    archived.kind = AlbumKind::Archived;

    store.stash_archived_album(&archived).unwrap();
    assert!(!dir.path().join(".fff").exists());

    store.retrieve_stashed_album(&archived).unwrap();
    assert!(dir.path().join(".fff").exists());
    assert!(dir.path().join("Reunion").exists());

    let promoted = store.clean_archived_orphans().unwrap();
    assert_eq!(promoted, 0, "a retrieved album must not be promoted as an orphan");
}

#[tokio::test]
async fn sync_run_retrieves_stash_entry_reappearing_remotely() {
    let dir = tempfile::tempdir().unwrap();

    // Leave an album sitting in the stash, as if a previous run archived
    // and stashed it because the remote had dropped it at that time.
    {
        let store = LibraryStore::open(dir.path()).unwrap();
        let uuid_dir = dir.path().join(".bbb");
        std::fs::create_dir_all(&uuid_dir).unwrap();
        std::fs::write(uuid_dir.join("keepsake.jpg"), b"user photo").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink(".bbb", dir.path().join("Holiday")).unwrap();
        let archived = store.load_albums().unwrap().get("bbb").unwrap().clone();
        store.stash_archived_album(&archived).unwrap();
    }
    assert!(!dir.path().join(".bbb").exists());
    assert!(!dir.path().join("Holiday").exists());

    // The remote now lists that same uuid again as an ordinary album.
    let remote_album = Album::new("bbb", AlbumKind::Album, "Holiday", "");
    let (engine, store) = engine_for(
        dir.path(),
        vec![RemoteAlbumListing { album: remote_album, assets: vec![] }],
        HashMap::new(),
    )
    .await;

    engine.run(never_cancel()).await.unwrap();

    // Retrieved to its computed parent, not left in the stash and not
    // promoted to the archive root.
    assert!(dir.path().join(".bbb").exists());
    assert!(dir.path().join("Holiday").exists());
    assert!(dir.path().join(".bbb").join("keepsake.jpg").exists());
    assert!(!dir.path().join("_Archive").join("Holiday").exists());
    assert_eq!(store.stash_album_uuids().unwrap().len(), 0);
}

#[tokio::test]
async fn empty_album_removed_remotely_is_deleted_locally() {
    let dir = tempfile::tempdir().unwrap();
    let store = LibraryStore::open(dir.path()).unwrap();
    let album = Album::new("ggg", AlbumKind::Album, "Empty", "");
    store.write_album(&album).unwrap();

    let remote = RemoteState::default();
    let local = LocalState {
        albums: store.load_albums().unwrap(),
        assets: store.load_assets().unwrap(),
        verified_asset_uuids: Default::default(),
    };
    let ops = diff(&remote, &local);
    assert_eq!(ops.len(), 1);
    let mirror_engine::differ::Operation::AlbumRemove(removed) = &ops[0] else {
        panic!("expected AlbumRemove");
    };
    store.delete_album(removed).unwrap();
    assert!(!dir.path().join(".ggg").exists());
    assert!(!dir.path().join("Empty").exists());
}

#[tokio::test]
async fn folder_with_stray_file_warns_but_is_not_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let store = LibraryStore::open(dir.path()).unwrap();

    let uuid_dir = dir.path().join(".hhh");
    std::fs::create_dir_all(uuid_dir.join(".iii")).unwrap();
    std::fs::write(uuid_dir.join("stray.txt"), b"oops").unwrap();

    let kind = store.read_album_kind(&uuid_dir).unwrap();
    assert_eq!(kind, AlbumKind::Folder, "mixed content still classifies as folder");
}

#[tokio::test]
async fn invariant_i1_no_dangling_symlinks_after_fresh_sync() {
    let dir = tempfile::tempdir().unwrap();
    let p1 = asset("p1", b"one");
    let mut album = Album::new("aaa", AlbumKind::Album, "Vacation", "");
    album.assets.insert("p1", "a1.jpg");
    let mut bytes = HashMap::new();
    bytes.insert("p1".to_string(), b"one".to_vec());

    let (engine, store) = engine_for(
        dir.path(),
        vec![RemoteAlbumListing { album, assets: vec![p1] }],
        bytes,
    )
    .await;
    engine.run(never_cancel()).await.unwrap();

    let albums = store.load_albums().unwrap();
    for album in albums.values() {
        for (asset_uuid, _) in album.assets.iter() {
            let local_assets = store.load_assets().unwrap();
            assert!(local_assets.contains_key(asset_uuid), "dangling symlink to {asset_uuid}");
        }
    }
}
