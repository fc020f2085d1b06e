use anyhow::Result;
use std::fs;
use std::path::PathBuf;

use PostingDB::config::IndexConfig;
use PostingDB::leaf::area;
use PostingDB::types::{key_from_str, LocationList};
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
fn no_tf_mode_serves_constant_frequency() -> Result<()> {
    let root = unique_root("notf");
    let cfg = IndexConfig::default().with_no_tf(true);
    let mut unit = make_unit(&root, &cfg)?;
    let key = key_from_str("t");

    {
        let mut lm = unit.list_manager(&key)?;
        lm.insert_document(10, &LocationList::new(vec![1, 2, 3]))?;
    }

    let mut lm = unit.list_manager(&key)?;
    // позиционный поток не заводится вовсе
    let pos = lm.locate()?;
    assert_eq!(area::location_offset(&pos.page.image, pos.area_off()), 0);
    drop(pos);

    let mut it = lm.iterator()?.expect("list");
    assert!(it.find(&mut lm.cx, 10, false)?);
    // частота — константа 1, позиции — канонический пустой список
    assert_eq!(it.get_in_document_frequency(&mut lm.cx)?, 1);
    let locs = it.get_location_list_iterator(&mut lm.cx)?;
    assert!(locs.is_end());

    fs::remove_dir_all(&root).ok();
    Ok(())
}

#[test]
fn no_location_mode_keeps_frequency() -> Result<()> {
    let root = unique_root("noloc");
    let cfg = IndexConfig::default().with_no_location(true);
    let mut unit = make_unit(&root, &cfg)?;
    let key = key_from_str("t");

    {
        let mut lm = unit.list_manager(&key)?;
        lm.insert_document(4, &LocationList::new(vec![1, 5, 9]))?;
        lm.insert_document(6, &LocationList::new(vec![2]))?;
    }

    let mut lm = unit.list_manager(&key)?;
    let mut it = lm.iterator()?.expect("list");
    assert!(it.find(&mut lm.cx, 4, false)?);
    assert_eq!(it.get_in_document_frequency(&mut lm.cx)?, 3);
    let locs = it.get_location_list_iterator(&mut lm.cx)?;
    assert!(locs.is_end(), "positions are not stored in this mode");
    assert!(it.find(&mut lm.cx, 6, false)?);
    assert_eq!(it.get_in_document_frequency(&mut lm.cx)?, 1);

    fs::remove_dir_all(&root).ok();
    Ok(())
}

#[test]
fn no_tf_expunge_roundtrip() -> Result<()> {
    let root = unique_root("notfexp");
    let cfg = IndexConfig::default().with_no_tf(true);
    let mut unit = make_unit(&root, &cfg)?;
    let key = key_from_str("z");

    {
        let mut lm = unit.list_manager(&key)?;
        for d in [3u32, 8, 15] {
            lm.insert_document(d, &LocationList::empty())?;
        }
        assert!(lm.expunge_document(8)?);
        lm.undo_expunge(8, &LocationList::empty())?;
    }

    let mut lm = unit.list_manager(&key)?;
    let mut it = lm.iterator()?.expect("list");
    let mut seen = Vec::new();
    while !it.is_end() {
        seen.push(it.get_document_id(&mut lm.cx)?);
        it.next(&mut lm.cx)?;
    }
    assert_eq!(seen, vec![3, 8, 15]);

    fs::remove_dir_all(&root).ok();
    Ok(())
}
