use anyhow::Result;
use std::fs;
use std::path::PathBuf;

use PostingDB::config::IndexConfig;
use PostingDB::index::FullTextIndex;

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("pdb-{}-{}-{}", prefix, pid, t))
}

fn doc(words: &[&str]) -> Vec<(String, Vec<u32>)> {
    let mut map: std::collections::BTreeMap<String, Vec<u32>> = Default::default();
    for (i, w) in words.iter().enumerate() {
        map.entry((*w).to_string()).or_default().push(i as u32 + 1);
    }
    map.into_iter().collect()
}

#[test]
fn smoke_insert_search_remove() -> Result<()> {
    let root = unique_root("smoke");
    fs::create_dir_all(&root)?;

    // 1) create + insert
    {
        let idx = FullTextIndex::create(&root, IndexConfig::default().with_merge_interval_ms(50))?;
        idx.insert_document(100, &doc(&["the", "cat", "sat"]))?;
        idx.insert_document(200, &doc(&["a", "cat", "ran", "cat"]))?;
        idx.insert_document(300, &doc(&["dogs", "ran"]))?;
        idx.merge_now()?;
        idx.flush()?;

        let mut rows = idx.search("cat")?;
        rows.sort_unstable();
        assert_eq!(rows, vec![100, 200]);

        let hits = idx.search_with_positions("cat")?;
        let h200 = hits.iter().find(|(r, _, _)| *r == 200).expect("row 200");
        assert_eq!(h200.1, 2);
        assert_eq!(h200.2, vec![2, 4]);

        assert_eq!(idx.count("ran")?, 2);
        assert_eq!(idx.count("absent")?, 0);
        assert_eq!(idx.document_count(), 3);
    }

    // 2) reopen: всё на месте
    {
        let idx = FullTextIndex::open(&root, IndexConfig::default())?;
        assert_eq!(idx.document_count(), 3);
        let mut rows = idx.search("ran")?;
        rows.sort_unstable();
        assert_eq!(rows, vec![200, 300]);

        // 3) remove + проверка отсутствия
        assert!(idx.remove_document(200, &doc(&["a", "cat", "ran", "cat"]))?);
        assert_eq!(idx.search("cat")?, vec![100]);
        assert_eq!(idx.document_count(), 2);
        assert!(!idx.remove_document(200, &doc(&["a"]))?);

        // 4) verify чистый
        let reports = idx.verify(PostingDB::TREATMENT_CONTINUE)?;
        for p in &reports {
            assert!(p.is_consistent(), "{:?}", p.inconsistencies);
        }
    }

    fs::remove_dir_all(&root).ok();
    Ok(())
}

#[test]
fn distributed_units_shard_by_row() -> Result<()> {
    let root = unique_root("dist");
    fs::create_dir_all(&root)?;

    let idx = FullTextIndex::create(
        &root,
        IndexConfig::default().with_unit_count(3),
    )?;
    assert_eq!(idx.unit_count(), 3);
    for row in 0..30u32 {
        idx.insert_document(row, &doc(&["shared", "term"]))?;
    }
    idx.merge_now()?;
    idx.flush()?;

    let mut rows = idx.search("shared")?;
    rows.sort_unstable();
    assert_eq!(rows, (0..30u32).collect::<Vec<_>>());
    assert_eq!(idx.count("shared")?, 30);

    // каталоги юнитов существуют
    for k in 0..3 {
        assert!(root.join(format!("Inv{}", k)).join("Leaf").exists());
    }

    fs::remove_dir_all(&root).ok();
    Ok(())
}

#[test]
fn merge_daemon_picks_up_threshold() -> Result<()> {
    let root = unique_root("daemon");
    fs::create_dir_all(&root)?;

    let cfg = IndexConfig::default()
        .with_merge_threshold(10)
        .with_merge_interval_ms(20);
    let idx = FullTextIndex::create(&root, cfg)?;
    for row in 0..50u32 {
        idx.insert_document(row, &doc(&["w"]))?;
    }
    // демон должен свернуть батч сам, без явного merge_now
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while idx.pending_batch_entries() > 0 {
        if std::time::Instant::now() > deadline {
            panic!(
                "daemon did not fold batches in time ({} pending)",
                idx.pending_batch_entries()
            );
        }
        std::thread::sleep(std::time::Duration::from_millis(20));
    }
    assert_eq!(idx.count("w")?, 50);

    fs::remove_dir_all(&root).ok();
    Ok(())
}

#[test]
fn unavailable_marker_blocks_open() -> Result<()> {
    let root = unique_root("unavail");
    fs::create_dir_all(&root)?;
    {
        let _ = FullTextIndex::create(&root, IndexConfig::default())?;
    }
    fs::write(root.join("UNAVAILABLE"), b"x")?;
    assert!(FullTextIndex::open(&root, IndexConfig::default()).is_err());
    fs::remove_file(root.join("UNAVAILABLE"))?;
    assert!(FullTextIndex::open(&root, IndexConfig::default()).is_ok());

    fs::remove_dir_all(&root).ok();
    Ok(())
}
