use organizer_core::config::AppConfig;
use organizer_core::Organizer;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn only_child(dir: &Path) -> std::path::PathBuf {
    let entries: Vec<_> = fs::read_dir(dir).unwrap().map(|e| e.unwrap().path()).collect();
    assert_eq!(entries.len(), 1, "expected one entry in {}", dir.display());
    entries.into_iter().next().unwrap()
}

#[tokio::test]
async fn organizes_local_folder_and_indexes_it() {
    // 1. A local library with three images and one unrelated file.
    let temp = tempdir().unwrap();
    let root = temp.path().join("library");
    let inbox = root.join("Inbox");
    fs::create_dir_all(&inbox).unwrap();
    fs::write(inbox.join("a.jpg"), b"jpeg-bytes").unwrap();
    fs::write(inbox.join("b.PNG"), b"png-bytes").unwrap();
    fs::write(inbox.join("c.webp"), b"webp-bytes").unwrap();
    fs::write(inbox.join("notes.txt"), b"not an image").unwrap();

    let mut cfg = AppConfig::default();
    cfg.recognition.provider = "noop".into();
    cfg.storage.provider = "local".into();
    cfg.storage.local.root = Some(root.to_string_lossy().into_owned());
    cfg.organization.use_original_filenames = true;
    cfg.organization.batch_size = 2;
    cfg.organization.temp_dir = Some(temp.path().join("scratch"));
    let db = temp.path().join("index.db");
    cfg.database.path = Some(db.to_string_lossy().into_owned());

    // 2. Run.
    let organizer = Organizer::from_config(&cfg, None, None).await.unwrap();
    let pool = organizer.indexer().unwrap().pool().clone();
    let result = organizer.organize_folder("Inbox", "Sorted", None).await.unwrap();
    assert_eq!(result.counts(), (3, 0));

    // 3. Everything lands under Sorted/Other/<year>/ with its original name.
    let year_dir = only_child(&root.join("Sorted").join("Other"));
    let mut names: Vec<String> = fs::read_dir(&year_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["a.jpg", "b.PNG", "c.webp"]);
    assert_eq!(fs::read(year_dir.join("a.jpg")).unwrap(), b"jpeg-bytes");
    // Sources are copied, not moved.
    assert!(inbox.join("a.jpg").exists());

    // 4. The scratch directory is cleaned up.
    let scratch = temp.path().join("scratch");
    assert_eq!(fs::read_dir(&scratch).unwrap().count(), 0);

    // 5. The index has one row per organized image.
    let images = storage::images_by_category(&pool, "Other").await.unwrap();
    assert_eq!(images.len(), 3);
    let a = images.iter().find(|i| i.name == "a.jpg").unwrap();
    assert_eq!(a.uploaded_name, "a.jpg");
    assert!(a.destination_path.starts_with("Sorted/Other/"));
    assert!(a.labels.is_empty());
}

#[tokio::test]
async fn missing_source_folder_fails_the_run() {
    let temp = tempdir().unwrap();
    let mut cfg = AppConfig::default();
    cfg.recognition.provider = "noop".into();
    cfg.storage.provider = "local".into();
    cfg.storage.local.root = Some(temp.path().to_string_lossy().into_owned());

    let organizer = Organizer::from_config(&cfg, None, None).await.unwrap();
    let err = organizer.organize_folder("Nowhere", "", None).await.unwrap_err();
    assert!(matches!(err, organizer_core::OrganizeError::Listing { .. }));
}
