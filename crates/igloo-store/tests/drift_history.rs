use igloo_store::{compute_fingerprint, FingerprintStore, StoreLayout};
use std::fs;

fn write_config(dir: &std::path::Path, image: &str) {
    fs::create_dir_all(dir.join("scripts")).unwrap();
    fs::write(
        dir.join("igloo.toml"),
        format!("[container]\nname = \"igloo-h\"\nimage = \"{image}\"\n"),
    )
    .unwrap();
}

#[test]
fn record_survives_config_dir_recreation() {
    let data = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    let config = project.path().join(".igloo");
    write_config(&config, "images:debian/trixie/cloud");

    let store = FingerprintStore::new(StoreLayout::new(data.path()));
    let original = compute_fingerprint(&config).unwrap();
    store.store("igloo-h", &original).unwrap();

    fs::remove_dir_all(&config).unwrap();
    write_config(&config, "images:debian/bookworm/cloud");

    let check = store.has_changed("igloo-h", &config).unwrap();
    assert!(check.changed);
    assert_eq!(check.stored, Some(original));
}

#[test]
fn clearing_record_resets_to_first_run() {
    let data = tempfile::tempdir().unwrap();
    let project = tempfile::tempdir().unwrap();
    let config = project.path().join(".igloo");
    write_config(&config, "images:ubuntu/noble/cloud");

    let store = FingerprintStore::new(StoreLayout::new(data.path()));
    store
        .store("igloo-h", &compute_fingerprint(&config).unwrap())
        .unwrap();
    fs::write(config.join("scripts").join("10-new.sh"), "true\n").unwrap();
    assert!(store.has_changed("igloo-h", &config).unwrap().changed);

    store.remove("igloo-h").unwrap();
    let check = store.has_changed("igloo-h", &config).unwrap();
    assert!(!check.changed);
    assert!(check.is_first_observation());
}
