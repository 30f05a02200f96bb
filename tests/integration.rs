use std::fs;
use std::sync::Arc;

use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::RwLock;
use walkdir::WalkDir;

use scoped_storage_arbiter::classify::MediaType;
use scoped_storage_arbiter::config::RuntimeConfig;
use scoped_storage_arbiter::error::RenameViolation;
use scoped_storage_arbiter::policy::DenyReason;
use scoped_storage_arbiter::{
    AppOp, Arbiter, ArbiterError, BindingKind, CallerIdentity, ContentIndex, GrantRegistry,
    InMemoryIndex, OpenMode, PackageGrants, Permission, Server,
};

const APP_A: u32 = 10_001;
const APP_B: u32 = 10_002;
const GALLERY: u32 = 10_003;
const READER: u32 = 10_004;
const MANAGER: u32 = 10_005;

struct Fixture {
    _root: TempDir,
    index: Arc<InMemoryIndex>,
    arbiter: Arc<Arbiter>,
}

impl Fixture {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let grants = GrantRegistry::from_packages([
            PackageGrants::new("com.example.a", APP_A),
            PackageGrants::new("com.example.b", APP_B),
            PackageGrants::new("com.example.gallery", GALLERY)
                .with_app_op(AppOp::WriteMediaImages)
                .with_app_op(AppOp::WriteMediaVideo)
                .with_app_op(AppOp::WriteMediaAudio),
            PackageGrants::new("com.example.reader", READER)
                .with_permission(Permission::ReadExternalStorage),
            PackageGrants::new("com.example.files", MANAGER)
                .with_permission(Permission::ManageExternalStorage),
        ]);
        let index = Arc::new(InMemoryIndex::new());
        let arbiter = Arc::new(Arbiter::new(
            root.path(),
            Arc::clone(&index) as Arc<dyn ContentIndex>,
            Arc::new(grants),
        ));
        arbiter.prepare_layout().unwrap();
        Self {
            _root: root,
            index,
            arbiter,
        }
    }

    fn caller(&self, uid: u32) -> CallerIdentity {
        self.arbiter.grants().resolve(uid).unwrap()
    }

    fn exists(&self, path: &str) -> bool {
        self.arbiter
            .storage_root()
            .join(path.trim_start_matches('/'))
            .exists()
    }

    fn owner(&self, path: &str) -> Option<String> {
        self.index
            .lookup(path)
            .unwrap()
            .map(|record| record.owner_package)
    }

    fn listing(&self, uid: u32, dir: &str) -> Vec<String> {
        self.arbiter
            .readdir(&self.caller(uid), dir)
            .unwrap()
            .into_iter()
            .map(|entry| entry.display_name())
            .collect()
    }
}

fn denial(result: Result<impl std::fmt::Debug, ArbiterError>) -> DenyReason {
    match result {
        Err(ArbiterError::PermissionDenied { reason, .. }) => reason,
        other => panic!("expected a permission denial, got {:?}", other),
    }
}

#[test]
fn test_conformity_table() {
    let fx = Fixture::new();
    let app = fx.caller(APP_A);

    let cases = [
        ("/DCIM/a.jpg", true),
        ("/DCIM/a.mp4", true),
        ("/DCIM/a.mp3", false),
        ("/DCIM/a.txt", false),
        ("/Movies/a.mp4", true),
        ("/Movies/a.mp3", false),
        ("/Movies/a.png", false),
        ("/Music/a.mp3", true),
        ("/Music/a.mp4", false),
        ("/Music/a.pdf", false),
        ("/Download/a.pdf", true),
        ("/Download/a.mp3", true),
        ("/Pictures/a.png", true),
        ("/Pictures/a.txt", true),
    ];
    for (path, allowed) in cases {
        let result = fx.arbiter.create(&app, path);
        assert_eq!(result.is_ok(), allowed, "create {}", path);
        assert_eq!(fx.exists(path), allowed, "file {}", path);
        if !allowed {
            assert!(matches!(denial(result), DenyReason::TypeMismatch { .. }));
            assert_eq!(fx.owner(path), None);
        }
    }
}

#[test]
fn test_top_level_only_under_bypass() {
    let fx = Fixture::new();

    for uid in [APP_A, GALLERY, READER] {
        let caller = fx.caller(uid);
        assert_eq!(
            denial(fx.arbiter.create(&caller, "/a.jpg")),
            DenyReason::TopLevelEntry
        );
        assert_eq!(
            denial(fx.arbiter.mkdir(&caller, "/Stuff")),
            DenyReason::TopLevelEntry
        );
    }
    assert!(!fx.exists("/a.jpg"));

    let manager = fx.caller(MANAGER);
    fx.arbiter.create(&manager, "/a.jpg").unwrap();
    assert_eq!(fx.owner("/a.jpg").as_deref(), Some("com.example.files"));

    // Platform uids run privileged without any registered grant
    let system = CallerIdentity::new(1000, "android");
    fx.arbiter.create(&system, "/notes.txt").unwrap();
    assert!(fx.exists("/notes.txt"));
}

#[test]
fn test_create_delete_round_trip() {
    let fx = Fixture::new();
    let app = fx.caller(APP_A);

    let first = fx.arbiter.create(&app, "/DCIM/a.jpg").unwrap();
    assert_eq!(first.media_type, MediaType::Image);
    assert!(matches!(
        fx.arbiter.create(&app, "/DCIM/a.jpg"),
        Err(ArbiterError::AlreadyExists(_))
    ));

    let deleted = fx.arbiter.delete(&app, "/DCIM/a.jpg", false).unwrap();
    assert_eq!(deleted.records_removed, 1);
    assert_eq!(fx.owner("/DCIM/a.jpg"), None);
    assert!(!fx.exists("/DCIM/a.jpg"));

    let second = fx.arbiter.create(&app, "/DCIM/a.jpg").unwrap();
    assert_ne!(first.row_id, second.row_id);
}

#[test]
fn test_ownership_isolation() {
    let fx = Fixture::new();
    let a = fx.caller(APP_A);
    let b = fx.caller(APP_B);
    fx.arbiter.create(&a, "/DCIM/a.jpg").unwrap();

    assert_eq!(
        denial(fx.arbiter.open(&b, "/DCIM/a.jpg", OpenMode::read_only())),
        DenyReason::NotOwner
    );
    assert_eq!(
        denial(fx.arbiter.open(&b, "/DCIM/a.jpg", OpenMode::write_only())),
        DenyReason::NotOwner
    );
    assert_eq!(
        denial(fx.arbiter.delete(&b, "/DCIM/a.jpg", false)),
        DenyReason::NotOwner
    );
    assert_eq!(
        denial(fx.arbiter.rename(&b, "/DCIM/a.jpg", "/DCIM/b.jpg")),
        DenyReason::NotOwner
    );
    assert!(fx.exists("/DCIM/a.jpg"));

    assert_eq!(fx.listing(APP_A, "/DCIM"), vec!["a.jpg"]);
    assert!(fx.listing(APP_B, "/DCIM").is_empty());
    // Read permission reveals other packages' media
    assert_eq!(fx.listing(READER, "/DCIM"), vec!["a.jpg"]);

    // The owner is only reported to callers who may read the file
    let stat = fx.arbiter.stat(&b, "/DCIM/a.jpg").unwrap();
    assert_eq!(stat.owner, None);
    let stat = fx.arbiter.stat(&a, "/DCIM/a.jpg").unwrap();
    assert_eq!(stat.owner.as_deref(), Some("com.example.a"));
    assert_eq!(stat.mime_type, Some("image/jpeg"));
}

#[test]
fn test_untracked_and_non_media_listing() {
    let fx = Fixture::new();
    let a = fx.caller(APP_A);
    fx.arbiter.create(&a, "/Download/notes.txt").unwrap();
    fs::write(fx.arbiter.storage_root().join("Download/stray.bin"), b"x").unwrap();

    // Non-media records stay private even to read-permission holders
    assert_eq!(fx.listing(READER, "/Download"), vec!["stray.bin"]);
    assert_eq!(fx.listing(APP_A, "/Download"), vec!["notes.txt", "stray.bin"]);

    // Untracked files can be listed but not opened by non-owners
    assert_eq!(
        denial(fx.arbiter.open(&fx.caller(READER), "/Download/stray.bin", OpenMode::read_only())),
        DenyReason::Untracked
    );
}

#[test]
fn test_gallery_grant_is_media_type_scoped() {
    let fx = Fixture::new();
    let a = fx.caller(APP_A);
    let gallery = fx.caller(GALLERY);
    fx.arbiter.create(&a, "/DCIM/photo.jpg").unwrap();
    fx.arbiter.create(&a, "/Movies/clip.mp4").unwrap();
    fx.arbiter.create(&a, "/Music/song.mp3").unwrap();

    fx.arbiter
        .rename(&gallery, "/DCIM/photo.jpg", "/Pictures/photo.jpg")
        .unwrap();
    assert_eq!(fx.owner("/Pictures/photo.jpg").as_deref(), Some("com.example.a"));
    fx.arbiter.delete(&gallery, "/Movies/clip.mp4", false).unwrap();
    assert!(!fx.exists("/Movies/clip.mp4"));

    assert_eq!(
        denial(fx.arbiter.delete(&gallery, "/Music/song.mp3", false)),
        DenyReason::NotOwner
    );
    assert_eq!(
        denial(fx.arbiter.rename(&gallery, "/Music/song.mp3", "/Music/other.mp3")),
        DenyReason::NotOwner
    );
    assert_eq!(
        denial(fx.arbiter.open(&gallery, "/Music/song.mp3", OpenMode::read_only())),
        DenyReason::NotOwner
    );

    // A file reached through the grant may not leave the granted types
    assert_eq!(
        denial(fx.arbiter.rename(&gallery, "/Pictures/photo.jpg", "/Download/photo.mp3")),
        DenyReason::GalleryTypeEscape
    );
    assert!(fx.exists("/Pictures/photo.jpg"));
    assert!(fx.exists("/Music/song.mp3"));
}

#[test]
fn test_grant_changes_apply_to_next_request() {
    let fx = Fixture::new();
    let a = fx.caller(APP_A);
    let b = fx.caller(APP_B);
    fx.arbiter.create(&a, "/DCIM/photo.jpg").unwrap();

    assert!(fx.listing(APP_B, "/DCIM").is_empty());
    assert!(fx.arbiter.grants().allow_app_op(APP_B, AppOp::WriteMediaImages));
    assert_eq!(fx.listing(APP_B, "/DCIM"), vec!["photo.jpg"]);
    let handle = fx
        .arbiter
        .open(&b, "/DCIM/photo.jpg", OpenMode::read_only())
        .unwrap();
    fx.arbiter.close(handle).unwrap();

    assert!(fx.arbiter.grants().deny_app_op(APP_B, AppOp::WriteMediaImages));
    assert_eq!(
        denial(fx.arbiter.delete(&b, "/DCIM/photo.jpg", false)),
        DenyReason::NotOwner
    );
}

#[test]
fn test_tree_operations_are_all_or_nothing() {
    let fx = Fixture::new();
    let a = fx.caller(APP_A);
    let b = fx.caller(APP_B);
    fx.arbiter.mkdir(&a, "/Download/album").unwrap();
    fx.arbiter.create(&a, "/Download/album/a.jpg").unwrap();
    fx.arbiter.create(&b, "/Download/album/b.jpg").unwrap();

    let deleted = fx.arbiter.delete(&a, "/Download/album", true);
    match deleted {
        Err(ArbiterError::PartialOwnershipConflict { offending, .. }) => {
            assert_eq!(offending, "/Download/album/b.jpg");
        }
        other => panic!("unexpected {:?}", other),
    }

    let renamed = fx.arbiter.rename(&a, "/Download/album", "/Download/trip");
    assert!(matches!(
        renamed,
        Err(ArbiterError::PartialOwnershipConflict { .. })
    ));

    for path in ["/Download/album/a.jpg", "/Download/album/b.jpg"] {
        assert!(fx.exists(path), "{} removed", path);
    }
    assert_eq!(fx.owner("/Download/album/a.jpg").as_deref(), Some("com.example.a"));
    assert_eq!(fx.owner("/Download/album/b.jpg").as_deref(), Some("com.example.b"));
    assert!(!fx.exists("/Download/trip"));

    // Once the foreign file is gone the same calls go through
    fx.arbiter.delete(&b, "/Download/album/b.jpg", false).unwrap();
    let renamed = fx
        .arbiter
        .rename(&a, "/Download/album", "/Download/trip")
        .unwrap();
    assert_eq!(renamed.records_updated, 1);
    assert_eq!(fx.owner("/Download/trip/a.jpg").as_deref(), Some("com.example.a"));

    let deleted = fx.arbiter.delete(&a, "/Download/trip", true).unwrap();
    assert_eq!(deleted.files_removed, 1);
    assert!(fx.index.records_under("/Download").is_empty());
}

#[test]
fn test_directory_rules() {
    let fx = Fixture::new();
    let a = fx.caller(APP_A);
    fx.arbiter.mkdir(&a, "/Download/d").unwrap();
    fx.arbiter.create(&a, "/Download/d/x.txt").unwrap();

    assert!(matches!(
        fx.arbiter.delete(&a, "/Download/d", false),
        Err(ArbiterError::DirectoryNotEmpty(_))
    ));
    assert_eq!(
        denial(fx.arbiter.delete(&a, "/DCIM", true)),
        DenyReason::ProtectedDirectory
    );

    let violation = |result: Result<_, ArbiterError>| match result {
        Err(ArbiterError::InvalidRename { violation, .. }) => violation,
        other => panic!("expected an invalid rename, got {:?}", other),
    };
    assert_eq!(
        violation(fx.arbiter.rename(&a, "/Music", "/Download/music")),
        RenameViolation::ProtectedDirectory
    );
    assert_eq!(
        violation(fx.arbiter.rename(&a, "/Download/d", "/Download/d/sub")),
        RenameViolation::Cycle
    );
    fx.arbiter.mkdir(&a, "/Download/e").unwrap();
    assert_eq!(
        violation(fx.arbiter.rename(&a, "/Download/d/x.txt", "/Download/e")),
        RenameViolation::FileOntoDirectory
    );
    fx.arbiter.create(&a, "/Download/y.txt").unwrap();
    assert_eq!(
        violation(fx.arbiter.rename(&a, "/Download/d", "/Download/y.txt")),
        RenameViolation::DirectoryOntoFile
    );

    // An empty directory may be the target of a tree rename
    fx.arbiter.rename(&a, "/Download/d", "/Download/e").unwrap();
    assert!(fx.exists("/Download/e/x.txt"));
    fx.arbiter.delete(&a, "/Download/e/x.txt", false).unwrap();
    fx.arbiter.delete(&a, "/Download/e", false).unwrap();
    assert!(!fx.exists("/Download/e"));
}

#[test]
fn test_read_write_read_coherence() {
    let fx = Fixture::new();
    let a = fx.caller(APP_A);
    fx.arbiter.create(&a, "/Download/data.bin").unwrap();

    let mut writer = fx
        .arbiter
        .open(&a, "/Download/data.bin", OpenMode::read_write())
        .unwrap();
    assert_eq!(writer.binding(), BindingKind::Direct);
    writer.write_at(0, &[0u8; 32]).unwrap();

    let reader = fx
        .arbiter
        .open(&a, "/Download/data.bin", OpenMode::read_only())
        .unwrap();
    assert_eq!(reader.binding(), BindingKind::Cached);
    assert_eq!(reader.read_at(0, 10).unwrap(), vec![0u8; 10]);

    let payload: Vec<u8> = (1..=10).collect();
    writer.write_at(0, &payload).unwrap();
    assert_eq!(reader.read_at(0, 10).unwrap(), payload);

    // And the other way round
    let mut second_writer = fx
        .arbiter
        .open(&a, "/Download/data.bin", OpenMode::read_write())
        .unwrap();
    assert_eq!(second_writer.binding(), BindingKind::Cached);
    second_writer.write_at(20, b"cached").unwrap();
    assert_eq!(writer.read_at(20, 6).unwrap(), b"cached".to_vec());

    let counts = fx.arbiter.binding_counts("/Download/data.bin").unwrap();
    assert_eq!(counts.direct, 1);
    assert_eq!(counts.cached, 2);

    fx.arbiter.close(second_writer).unwrap();
    fx.arbiter.close(reader).unwrap();
    fx.arbiter.close(writer).unwrap();
    assert_eq!(fx.index.lookup("/Download/data.bin").unwrap().unwrap().size, 32);

    // The released binding can be taken again
    let reopened = fx
        .arbiter
        .open(&a, "/Download/data.bin", OpenMode::read_write())
        .unwrap();
    assert_eq!(reopened.binding(), BindingKind::Direct);
}

#[test]
fn test_duplicate_extends_binding() {
    let fx = Fixture::new();
    let a = fx.caller(APP_A);
    let writer = fx
        .arbiter
        .open(&a, "/Download/log.txt", OpenMode::write_only().with_create())
        .unwrap();
    let copy = writer.duplicate().unwrap();
    assert_eq!(copy.binding(), BindingKind::Direct);

    fx.arbiter.close(writer).unwrap();
    let other = fx
        .arbiter
        .open(&a, "/Download/log.txt", OpenMode::read_write())
        .unwrap();
    assert_eq!(other.binding(), BindingKind::Cached);

    fx.arbiter.close(copy).unwrap();
    fx.arbiter.close(other).unwrap();
    let again = fx
        .arbiter
        .open(&a, "/Download/log.txt", OpenMode::read_write())
        .unwrap();
    assert_eq!(again.binding(), BindingKind::Direct);
}

#[test]
fn test_rename_changes_media_type() {
    let fx = Fixture::new();
    let a = fx.caller(APP_A);
    let created = fx.arbiter.create(&a, "/Download/a.pdf").unwrap();
    assert_eq!(created.media_type, MediaType::Other);

    fx.arbiter.rename(&a, "/Download/a.pdf", "/DCIM/a.mp4").unwrap();
    assert_eq!(fx.index.lookup("/Download/a.pdf").unwrap(), None);
    let moved = fx.index.lookup("/DCIM/a.mp4").unwrap().unwrap();
    assert_eq!(moved.media_type, MediaType::Video);
    assert_eq!(moved.row_id, created.row_id);

    // The new type must still fit the destination
    assert!(matches!(
        denial(fx.arbiter.rename(&a, "/DCIM/a.mp4", "/Music/a.mp4")),
        DenyReason::TypeMismatch { .. }
    ));
}

#[test]
fn test_overwrite_replaces_destination_record() {
    let fx = Fixture::new();
    let a = fx.caller(APP_A);
    let b = fx.caller(APP_B);
    let source = fx.arbiter.create(&a, "/Download/x.txt").unwrap();
    let target = fx.arbiter.create(&a, "/Download/y.txt").unwrap();

    let result = fx.arbiter.rename(&a, "/Download/x.txt", "/Download/y.txt").unwrap();
    assert!(result.replaced);
    let record = fx.index.lookup("/Download/y.txt").unwrap().unwrap();
    assert_eq!(record.row_id, source.row_id);
    assert_ne!(record.row_id, target.row_id);
    assert!(!fx.exists("/Download/x.txt"));
    assert_eq!(fx.listing(APP_A, "/Download"), vec!["y.txt"]);

    // Another package's file cannot be clobbered
    fx.arbiter.create(&b, "/Download/z.txt").unwrap();
    assert_eq!(
        denial(fx.arbiter.rename(&b, "/Download/z.txt", "/Download/y.txt")),
        DenyReason::NotOwner
    );
    assert_eq!(fx.owner("/Download/y.txt").as_deref(), Some("com.example.a"));
    assert!(fx.exists("/Download/z.txt"));
}

#[test]
fn test_index_failures_leave_state_unchanged() {
    let fx = Fixture::new();
    let a = fx.caller(APP_A);

    // Create
    fx.index.set_available(false);
    assert!(matches!(
        fx.arbiter.create(&a, "/DCIM/a.jpg"),
        Err(ArbiterError::IndexUnavailable(_))
    ));
    assert!(!fx.exists("/DCIM/a.jpg"));
    fx.index.clear_faults();

    // Delete
    fx.arbiter.create(&a, "/DCIM/a.jpg").unwrap();
    fx.index.fail_after_mutations(0);
    assert!(matches!(
        fx.arbiter.delete(&a, "/DCIM/a.jpg", false),
        Err(ArbiterError::IndexUnavailable(_))
    ));
    assert!(fx.exists("/DCIM/a.jpg"));
    assert_eq!(fx.owner("/DCIM/a.jpg").as_deref(), Some("com.example.a"));

    // Rename
    assert!(matches!(
        fx.arbiter.rename(&a, "/DCIM/a.jpg", "/DCIM/b.jpg"),
        Err(ArbiterError::IndexUnavailable(_))
    ));
    assert!(fx.exists("/DCIM/a.jpg"));
    assert!(!fx.exists("/DCIM/b.jpg"));
    fx.index.clear_faults();

    // Tree delete failing halfway puts the dropped record back
    fx.arbiter.mkdir(&a, "/DCIM/trip").unwrap();
    fx.arbiter.create(&a, "/DCIM/trip/1.jpg").unwrap();
    fx.arbiter.create(&a, "/DCIM/trip/2.jpg").unwrap();
    fx.index.fail_once_after_mutations(1);
    assert!(fx.arbiter.delete(&a, "/DCIM/trip", true).is_err());
    assert!(fx.exists("/DCIM/trip/1.jpg"));
    assert!(fx.exists("/DCIM/trip/2.jpg"));
    assert_eq!(fx.index.records_under("/DCIM/trip").len(), 2);
    assert_eq!(fx.listing(APP_A, "/DCIM"), vec!["a.jpg", "trip/"]);

    // Tree rename failing halfway moves everything back
    fx.index.fail_once_after_mutations(1);
    assert!(fx.arbiter.rename(&a, "/DCIM/trip", "/DCIM/moved").is_err());
    assert!(!fx.exists("/DCIM/moved"));
    let records: Vec<String> = fx
        .index
        .records_under("/DCIM/trip")
        .into_iter()
        .map(|record| record.path)
        .collect();
    assert_eq!(records, vec!["/DCIM/trip/1.jpg", "/DCIM/trip/2.jpg"]);
}

#[test]
fn test_foreign_private_directory_is_hidden() {
    let fx = Fixture::new();
    let a = fx.caller(APP_A);
    let b = fx.caller(APP_B);
    fx.arbiter.mkdir(&a, "/Android/data/com.example.a").unwrap();
    fx.arbiter
        .create(&a, "/Android/data/com.example.a/cache.db")
        .unwrap();

    assert!(matches!(
        fx.arbiter.create(&b, "/Android/data/com.example.a/x.txt"),
        Err(ArbiterError::NotFound(_))
    ));
    assert!(matches!(
        fx.arbiter.stat(&b, "/Android/data/com.example.a/cache.db"),
        Err(ArbiterError::NotFound(_))
    ));
    assert!(matches!(
        fx.arbiter.readdir(&b, "/Android/data/com.example.a"),
        Err(ArbiterError::NotFound(_))
    ));
    assert!(fx.listing(APP_B, "/Android/data").is_empty());
    assert_eq!(fx.listing(APP_A, "/Android/data"), vec!["com.example.a/"]);
    assert_eq!(
        fx.listing(APP_A, "/Android/data/com.example.a"),
        vec!["cache.db"]
    );

    // Installed and missing packages must be indistinguishable
    fx.arbiter.create(&b, "/Download/f.txt").unwrap();
    for dir in ["/Android/data/com.example.a", "/Android/data/com.not.installed"] {
        assert!(
            matches!(
                fx.arbiter.open(&b, dir, OpenMode::read_only()),
                Err(ArbiterError::NotFound(_))
            ),
            "open {}",
            dir
        );
        assert!(
            matches!(
                fx.arbiter.rename(&b, "/Download/f.txt", dir),
                Err(ArbiterError::NotFound(_))
            ),
            "rename onto {}",
            dir
        );
        assert!(
            matches!(
                fx.arbiter.delete(&b, dir, true),
                Err(ArbiterError::NotFound(_))
            ),
            "delete {}",
            dir
        );
    }
    let exclusive = OpenMode {
        exclusive: true,
        ..OpenMode::write_only().with_create()
    };
    for file in [
        "/Android/data/com.example.a/cache.db",
        "/Android/data/com.example.a/missing.db",
    ] {
        assert!(
            matches!(
                fx.arbiter.open(&b, file, exclusive),
                Err(ArbiterError::NotFound(_))
            ),
            "exclusive open {}",
            file
        );
        assert!(
            matches!(
                fx.arbiter.rename(&b, file, "/Download/g.txt"),
                Err(ArbiterError::NotFound(_))
            ),
            "rename from {}",
            file
        );
    }
    assert!(fx.exists("/Download/f.txt"));
    assert!(fx.exists("/Android/data/com.example.a/cache.db"));
    assert!(!fx.exists("/Android/data/com.example.a/missing.db"));
}

#[test]
fn test_close_after_rename_leaves_new_file_record_alone() {
    let fx = Fixture::new();
    let a = fx.caller(APP_A);
    let mut handle = fx
        .arbiter
        .open(&a, "/Download/x.txt", OpenMode::read_write().with_create())
        .unwrap();
    let row_id = handle.row_id();
    handle.write_at(0, &[7u8; 100]).unwrap();

    fx.arbiter.rename(&a, "/Download/x.txt", "/Download/y.txt").unwrap();
    let replacement = fx.arbiter.create(&a, "/Download/x.txt").unwrap();
    assert_ne!(replacement.row_id, row_id);
    fx.arbiter.close(handle).unwrap();

    let moved = fx.index.lookup("/Download/y.txt").unwrap().unwrap();
    assert_eq!(moved.row_id, row_id);
    assert_eq!(moved.size, 100);
    let fresh = fx.index.lookup("/Download/x.txt").unwrap().unwrap();
    assert_eq!(fresh.row_id, replacement.row_id);
    assert_eq!(fresh.size, 0);
}

#[test]
fn test_rename_over_stale_record() {
    let fx = Fixture::new();
    let a = fx.caller(APP_A);
    fx.arbiter.create(&a, "/Download/y.txt").unwrap();
    fs::remove_file(fx.arbiter.storage_root().join("Download/y.txt")).unwrap();
    let source = fx.arbiter.create(&a, "/Download/x.txt").unwrap();

    let renamed = fx
        .arbiter
        .rename(&a, "/Download/x.txt", "/Download/y.txt")
        .unwrap();
    assert_eq!(renamed.records_updated, 1);
    assert!(!renamed.replaced);
    assert!(fx.exists("/Download/y.txt"));
    assert_eq!(fx.index.lookup("/Download/x.txt").unwrap(), None);
    let record = fx.index.lookup("/Download/y.txt").unwrap().unwrap();
    assert_eq!(record.row_id, source.row_id);
}

fn files_on_disk(fx: &Fixture, dir: &str) -> Vec<String> {
    let root = fx.arbiter.storage_root();
    let mut files: Vec<String> = WalkDir::new(root.join(dir.trim_start_matches('/')))
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            let relative = entry.path().strip_prefix(root).unwrap();
            format!("/{}", relative.to_string_lossy())
        })
        .collect();
    files.sort();
    files
}

fn record_paths(fx: &Fixture, dir: &str) -> Vec<String> {
    fx.index
        .records_under(dir)
        .into_iter()
        .map(|record| record.path)
        .collect()
}

const RACE_DIRS: [&str; 2] = ["/Download/batch", "/Download/moved"];

fn spawn_creators<'scope>(
    scope: &'scope std::thread::Scope<'scope, '_>,
    arbiter: &'scope Arbiter,
    caller: &'scope CallerIdentity,
    phase: usize,
) {
    for worker in 0..4 {
        scope.spawn(move || {
            for i in 0..40 {
                let path = format!("{}/p{}-w{}-{}.txt", RACE_DIRS[i % 2], phase, worker, i);
                match arbiter.create(caller, &path) {
                    Ok(_) | Err(ArbiterError::NotFound(_)) => {}
                    Err(e) => panic!("create {}: {:?}", path, e),
                }
            }
        });
    }
}

#[test]
fn test_concurrent_mutations_keep_index_in_step() {
    let fx = Fixture::new();
    let a = fx.caller(APP_A);
    let dirs = RACE_DIRS;
    fx.arbiter.mkdir(&a, dirs[0]).unwrap();

    // Creates race tree renames that flip the directory back and forth
    std::thread::scope(|scope| {
        spawn_creators(scope, &fx.arbiter, &a, 0);
        scope.spawn(|| {
            for round in 0..10 {
                let (from, to) = (dirs[round % 2], dirs[(round + 1) % 2]);
                fx.arbiter.rename(&a, from, to).unwrap();
            }
        });
    });
    let files = files_on_disk(&fx, "/Download");
    assert!(!files.is_empty());
    assert!(files.iter().all(|f| f.starts_with("/Download/batch/")));
    assert_eq!(files, record_paths(&fx, "/Download"));

    // Creates race a recursive delete of the same tree
    std::thread::scope(|scope| {
        spawn_creators(scope, &fx.arbiter, &a, 1);
        scope.spawn(|| {
            fx.arbiter.delete(&a, dirs[0], true).unwrap();
        });
    });
    assert!(!fx.exists(dirs[0]));
    assert_eq!(
        files_on_disk(&fx, "/Download"),
        record_paths(&fx, "/Download")
    );
}

#[test]
fn test_rejects_malformed_paths() {
    let fx = Fixture::new();
    let a = fx.caller(APP_A);
    for path in ["", "/DCIM/../a.jpg", "/DCIM/a\0.jpg"] {
        assert!(matches!(
            fx.arbiter.create(&a, path),
            Err(ArbiterError::InvalidPath(_))
        ));
    }
}

struct ControlClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl ControlClient {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, writer) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(read_half),
            writer,
        };
        assert!(client.reply().await.starts_with("220 "));
        client
    }

    async fn reply(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.unwrap();
        line.trim_end().to_string()
    }

    async fn send(&mut self, command: &str) -> String {
        self.writer
            .write_all(format!("{}\r\n", command).as_bytes())
            .await
            .unwrap();
        self.reply().await
    }
}

async fn start_server(fx: &Fixture, max_clients: usize) -> std::net::SocketAddr {
    let runtime = Arc::new(RwLock::new(RuntimeConfig { max_clients }));
    let server = Server::bind_to("127.0.0.1:0", 8192, runtime, Arc::clone(&fx.arbiter))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.start());
    addr
}

#[tokio::test(flavor = "multi_thread")]
async fn test_control_session_end_to_end() {
    let fx = Fixture::new();
    let addr = start_server(&fx, 4).await;
    let mut client = ControlClient::connect(addr).await;

    assert!(client.send("LIST /DCIM").await.starts_with("530 "));
    assert!(client.send("CALLER 99999").await.starts_with("530 "));
    assert!(client.send("CALLER 10001").await.starts_with("230 "));

    assert!(client.send("CREATE /DCIM/a.jpg").await.starts_with("200 Created"));
    assert!(client.send("CREATE /Music/a.jpg").await.starts_with("553 "));
    assert!(client.send("CREATE /a.jpg").await.starts_with("553 "));
    assert_eq!(client.send("OPEN /DCIM/a.jpg rw").await, "150 Handle 1 direct");
    assert!(client.send("WRITE 1 0 68656c6c6f").await.starts_with("200 "));
    assert_eq!(client.send("OPEN /DCIM/a.jpg r").await, "150 Handle 2 cached");
    assert_eq!(client.send("READ 2 0 5").await, "200 5 68656c6c6f");
    assert_eq!(client.send("CLOSE 1").await, "200 Closed handle 1");
    assert!(client.send("READ 1 0 5").await.starts_with("500 "));
    assert_eq!(client.send("LIST /DCIM").await, "200 1 entries: a.jpg");
    assert!(client.send("STAT /DCIM/a.jpg").await.contains("size=5"));
    assert!(client.send("RENAME /DCIM/a.jpg /Movies/a.jpg").await.starts_with("553 "));
    assert!(client.send("RENAME /DCIM a").await.starts_with("554 "));
    assert!(client.send("BOGUS").await.starts_with("500 "));
    assert!(client.send("QUIT").await.starts_with("221 "));

    assert_eq!(fx.index.lookup("/DCIM/a.jpg").unwrap().unwrap().size, 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_session_limit() {
    let fx = Fixture::new();
    let addr = start_server(&fx, 1).await;

    let mut first = ControlClient::connect(addr).await;
    assert!(first.send("CALLER 10001").await.starts_with("230 "));
    // Registered once the first command is served
    assert!(first.send("LIST /DCIM").await.starts_with("200 "));

    let mut second = ControlClient::connect(addr).await;
    assert!(second.send("CALLER 10002").await.starts_with("230 "));
    assert!(second.reply().await.starts_with("421 "));

    assert!(first.send("QUIT").await.starts_with("221 "));
}
