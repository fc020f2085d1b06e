use anyhow::Result;
use std::fs;
use std::path::PathBuf;

use PostingDB::config::IndexConfig;
use PostingDB::types::key_from_str;
use PostingDB::types::LocationList;
use PostingDB::unit::InvertedUnit;

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
fn short_list_life_cycle() -> Result<()> {
    let root = unique_root("short");
    let cfg = IndexConfig::default();
    let mut unit = make_unit(&root, &cfg)?;
    let key = key_from_str("cat");

    {
        let mut lm = unit.list_manager(&key)?;
        lm.insert_document(5, &LocationList::new(vec![3]))?;
        lm.insert_document(7, &LocationList::new(vec![1, 4]))?;
        lm.insert_document(12, &LocationList::new(vec![9]))?;
    }
    unit.flush()?;

    let mut lm = unit.list_manager(&key)?;
    let mut it = lm.iterator()?.expect("list must exist");
    assert_eq!(it.get_count(), 3);

    // find + частота + позиции
    assert!(it.find(&mut lm.cx, 7, false)?);
    assert_eq!(it.get_in_document_frequency(&mut lm.cx)?, 2);
    let locs = it.get_location_list_iterator(&mut lm.cx)?;
    assert_eq!(locs.into_location_list().as_slice(), &[1, 4]);

    // lower_bound(10) встаёт на doc=12
    assert!(it.lower_bound(&mut lm.cx, 10, false)?);
    assert_eq!(it.get_document_id(&mut lm.cx)?, 12);

    // за последним — конец
    assert!(!it.lower_bound(&mut lm.cx, 13, false)?);
    assert!(it.is_end());

    // полный проход с начала: id строго возрастают
    it.reset(&mut lm.cx)?;
    let mut seen = Vec::new();
    while !it.is_end() {
        seen.push(it.get_document_id(&mut lm.cx)?);
        it.next(&mut lm.cx)?;
    }
    assert_eq!(seen, vec![5, 7, 12]);

    fs::remove_dir_all(&root).ok();
    Ok(())
}

#[test]
fn expunge_of_absent_doc_is_noop() -> Result<()> {
    let root = unique_root("noopexp");
    let cfg = IndexConfig::default();
    let mut unit = make_unit(&root, &cfg)?;
    let key = key_from_str("dog");

    {
        let mut lm = unit.list_manager(&key)?;
        lm.insert_document(3, &LocationList::new(vec![1]))?;
        assert!(!lm.expunge_document(99)?);
        assert!(lm.expunge_document(3)?);
        assert!(!lm.expunge_document(3)?);
    }
    let mut lm = unit.list_manager(&key)?;
    let it = lm.iterator()?.expect("area stays after expunge");
    assert_eq!(it.get_count(), 0);

    fs::remove_dir_all(&root).ok();
    Ok(())
}

#[test]
fn short_expunge_undo_is_bit_identical() -> Result<()> {
    let root = unique_root("undo");
    let cfg = IndexConfig::default();
    let mut unit = make_unit(&root, &cfg)?;
    let key = key_from_str("x");

    let docs: Vec<(u32, Vec<u32>)> = vec![
        (2, vec![5]),
        (9, vec![1, 2, 8]),
        (17, vec![4]),
        (33, vec![7, 9]),
    ];
    {
        let mut lm = unit.list_manager(&key)?;
        for (d, l) in &docs {
            lm.insert_document(*d, &LocationList::new(l.clone()))?;
        }
    }
    unit.flush()?;

    let snapshot = {
        let mut lm = unit.list_manager(&key)?;
        let pos = lm.locate()?;
        pos.page.image.clone()
    };

    // удаление и точный откат для каждого документа, включая голову и хвост
    for (d, l) in &docs {
        {
            let mut lm = unit.list_manager(&key)?;
            assert!(lm.expunge_document(*d)?);
            lm.undo_expunge(*d, &LocationList::new(l.clone()))?;
        }
        let mut lm = unit.list_manager(&key)?;
        let pos = lm.locate()?;
        assert_eq!(
            pos.page.image, snapshot,
            "expunge+undo of doc {} must be bit-identical",
            d
        );
    }

    fs::remove_dir_all(&root).ok();
    Ok(())
}
