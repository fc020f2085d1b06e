use anyhow::Result;
use std::fs;
use std::path::PathBuf;

use PostingDB::config::IndexConfig;
use PostingDB::error::is_verify_aborted;
use PostingDB::types::{key_from_str, LocationList};
use PostingDB::unit::InvertedUnit;
use PostingDB::verify::{InconsistencyKind, TREATMENT_ABORT, TREATMENT_CONTINUE};

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("pdb-{}-{}-{}", prefix, pid, t))
}

fn make_unit(root: &PathBuf, cfg: &IndexConfig) -> Result<InvertedUnit> {
    fs::create_dir_all(root)?;
    let dir = root.join("Inv0");
    let mut unit = InvertedUnit::new(root, &dir, 0, cfg);
    unit.create()?;
    Ok(unit)
}

#[test]
fn clean_unit_verifies() -> Result<()> {
    let root = unique_root("vfok");
    let cfg = IndexConfig::default()
        .with_leaf_page_size(512)
        .with_overflow_page_size(512)
        .with_id_block_units(4);
    let mut unit = make_unit(&root, &cfg)?;

    for (i, term) in ["alpha", "beta", "gamma", "delta"].iter().enumerate() {
        let key = key_from_str(term);
        let mut lm = unit.list_manager(&key)?;
        for d in 1..=50u32 {
            lm.insert_document(d + i as u32 * 50, &LocationList::new(vec![d]))?;
        }
    }
    unit.flush()?;

    let mut progress = unit.start_verification(TREATMENT_CONTINUE);
    unit.verify(&mut progress)?;
    unit.end_verification();
    assert!(progress.is_consistent(), "{:?}", progress.inconsistencies);
    assert!(progress.pages_checked > 0);
    assert!(progress.lists_checked >= 4);

    fs::remove_dir_all(&root).ok();
    Ok(())
}

#[test]
fn dangling_btree_entry_is_reported() -> Result<()> {
    let root = unique_root("vfdangle");
    let cfg = IndexConfig::default();
    let mut unit = make_unit(&root, &cfg)?;

    {
        let key = key_from_str("cat");
        let mut lm = unit.list_manager(&key)?;
        lm.insert_document(1, &LocationList::new(vec![1]))?;
    }

    // "dog" указывает на страницу, где такой области нет
    let page = unit.first_leaf_page_id()?;
    unit.insert_btree(&key_from_str("dog"), page)?;

    // Continue: находка фиксируется, проверка дочитывает до конца
    let mut progress = unit.start_verification(TREATMENT_CONTINUE);
    unit.verify(&mut progress)?;
    unit.end_verification();
    assert!(!progress.is_consistent());
    assert!(progress
        .inconsistencies
        .iter()
        .any(|f| f.kind == InconsistencyKind::IllegalIndex));

    // Abort: первая же находка прерывает проверку
    let mut progress = unit.start_verification(TREATMENT_ABORT);
    let err = unit.verify(&mut progress).expect_err("must abort");
    unit.end_verification();
    assert!(is_verify_aborted(&err));

    fs::remove_dir_all(&root).ok();
    Ok(())
}

#[test]
fn list_count_mismatch_is_reported() -> Result<()> {
    let root = unique_root("vfcount");
    let cfg = IndexConfig::default();
    let mut unit = make_unit(&root, &cfg)?;

    let key = key_from_str("bad");
    {
        let mut lm = unit.list_manager(&key)?;
        lm.insert_document(1, &LocationList::new(vec![1]))?;
        lm.insert_document(2, &LocationList::new(vec![2]))?;
    }

    // портим счётчик области напрямую
    {
        let mut lm = unit.list_manager(&key)?;
        let mut pos = lm.locate()?;
        let off = pos.area_off();
        PostingDB::leaf::area::set_document_count(&mut pos.page.image, off, 5);
        lm.cx.leaf.write(&pos.page)?;
    }

    let mut progress = unit.start_verification(TREATMENT_CONTINUE);
    unit.verify(&mut progress)?;
    unit.end_verification();
    assert!(progress
        .inconsistencies
        .iter()
        .any(|f| f.kind == InconsistencyKind::IllegalListCount));

    fs::remove_dir_all(&root).ok();
    Ok(())
}
