use dashboard_profiles::{
    create_empty_profile, ActivationSource, LiveState, PinnedCard, ProfileStore, Reconciler,
    RunMetadata, SqliteStorage, StaticSource,
};

fn open_store(path: &std::path::Path) -> ProfileStore {
    ProfileStore::new(Box::new(SqliteStorage::new(path).expect("open sqlite")))
}

#[test]
fn profile_lifecycle_end_to_end() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("profiles.db");
    let store = open_store(&db_path);

    let mut profile = create_empty_profile("P1");
    profile.pinned_cards = vec![PinnedCard::scalar("loss")];
    profile.tag_filter = "train".to_string();
    store.save_profile(&profile).expect("save P1");

    let listed = store.list_profiles();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "P1");

    let loaded = store.load_profile("P1").expect("load P1");
    assert_eq!(loaded.pinned_cards, vec![PinnedCard::scalar("loss")]);
    assert_eq!(loaded.tag_filter, "train");
    assert_eq!(loaded.smoothing, 0.6);

    store.delete_profile("P1").expect("delete P1");
    assert!(store.load_profile("P1").is_none());
    assert!(store.list_profiles().is_empty());
}

#[test]
fn profiles_and_fragments_survive_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("profiles.db");

    {
        let store = open_store(&db_path);
        let mut profile = create_empty_profile("Persistent");
        profile.smoothing = 0.85;
        store.save_profile(&profile).expect("save");
        store
            .set_active_profile_name(Some("Persistent"))
            .expect("activate");
        store.set_tag_filter("accuracy").expect("filter");
    }

    let store = open_store(&db_path);
    let loaded = store.load_profile("Persistent").expect("reload");
    assert_eq!(loaded.smoothing, 0.85);
    assert_eq!(
        store.get_active_profile_name().as_deref(),
        Some("Persistent")
    );
    assert_eq!(store.tag_filter().as_deref(), Some("accuracy"));
}

#[test]
fn session_restore_reactivates_saved_profile() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("profiles.db");

    {
        let mut reconciler = Reconciler::new(open_store(&db_path), StaticSource::default());
        let mut live = LiveState::default();
        live.pinned_cards = vec![PinnedCard::scalar("loss")];
        live.smoothing = 0.6;
        reconciler.save_snapshot("Session", &live).expect("save");
    }

    let mut reconciler = Reconciler::new(open_store(&db_path), StaticSource::default());
    reconciler.on_runs_loaded(
        "e1",
        vec![RunMetadata {
            id: "r1".to_string(),
            name: "train".to_string(),
            experiment_id: "e1".to_string(),
        }],
    );
    let activation = reconciler
        .on_startup()
        .expect("startup")
        .expect("restored activation");
    assert_eq!(activation.profile.name, "Session");
    assert_eq!(activation.source, ActivationSource::LocalLoad);
    assert_eq!(
        activation.settings.pinned_cards,
        vec![PinnedCard::scalar("loss")]
    );
    assert_eq!(activation.settings.run_visibility.get("r1"), Some(&true));
}

#[test]
fn export_import_moves_profiles_between_stores() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source_store = open_store(&dir.path().join("a.db"));
    let target_store = open_store(&dir.path().join("b.db"));

    let mut profile = create_empty_profile("Shared");
    profile.tag_filter = "loss".to_string();
    let saved = source_store.save_profile(&profile).expect("save");
    let json = source_store.export_profile(&saved).expect("export");

    let imported = target_store.import_profile(&json).expect("import");
    target_store.save_profile(&imported).expect("save imported");

    let loaded = target_store.load_profile("Shared").expect("load");
    assert_eq!(loaded.tag_filter, "loss");
}
