use anyhow::Result;
use std::fs;
use std::path::PathBuf;

use PostingDB::config::IndexConfig;
use PostingDB::consts::{LIST_TYPE_LONG, LIST_TYPE_MIDDLE, LIST_TYPE_SHORT};
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

fn list_type_of(unit: &mut InvertedUnit, key: &[u16]) -> Result<u32> {
    let mut lm = unit.list_manager(key)?;
    let pos = lm.locate()?;
    assert!(pos.exists);
    Ok(area::list_type(&pos.page.image, pos.area_off()))
}

#[test]
fn short_promotes_to_middle_then_long() -> Result<()> {
    let root = unique_root("promo");
    // маленькие страницы, чтобы продвижение случилось рано
    let cfg = IndexConfig::default()
        .with_leaf_page_size(512)
        .with_overflow_page_size(512)
        .with_id_block_units(8);
    let mut unit = make_unit(&root, &cfg)?;
    let key = key_from_str("term");

    let mut saw_short = false;
    let mut saw_middle = false;
    {
        for d in 1..=200u32 {
            let mut lm = unit.list_manager(&key)?;
            let base = d * 10;
            let locs =
                LocationList::new(vec![base + 1, base + 2, base + 3, base + 4, base + 5]);
            lm.insert_document(d, &locs)?;
            drop(lm);
            match list_type_of(&mut unit, &key)? {
                LIST_TYPE_SHORT => {
                    assert!(!saw_middle, "list must not demote");
                    saw_short = true;
                }
                LIST_TYPE_MIDDLE | LIST_TYPE_LONG => saw_middle = true,
                other => panic!("unexpected list type {:#x}", other),
            }
        }
    }
    assert!(saw_short && saw_middle, "must observe Short -> Middle");
    assert_eq!(list_type_of(&mut unit, &key)?, LIST_TYPE_LONG);
    unit.flush()?;

    // все 200 документов по порядку, с частотами и позициями
    let mut lm = unit.list_manager(&key)?;
    let mut it = lm.iterator()?.expect("list");
    assert_eq!(it.get_count(), 200);
    let mut expected = 1u32;
    while !it.is_end() {
        let doc = it.get_document_id(&mut lm.cx)?;
        assert_eq!(doc, expected);
        assert_eq!(it.get_in_document_frequency(&mut lm.cx)?, 5);
        let locs = it.get_location_list_iterator(&mut lm.cx)?;
        let base = doc * 10;
        assert_eq!(
            locs.into_location_list().as_slice(),
            &[base + 1, base + 2, base + 3, base + 4, base + 5]
        );
        it.next(&mut lm.cx)?;
        expected += 1;
    }
    assert_eq!(expected, 201);

    fs::remove_dir_all(&root).ok();
    Ok(())
}

#[test]
fn middle_lower_bound_is_monotonic() -> Result<()> {
    let root = unique_root("mono");
    let cfg = IndexConfig::default()
        .with_leaf_page_size(512)
        .with_overflow_page_size(512)
        .with_id_block_units(4);
    let mut unit = make_unit(&root, &cfg)?;
    let key = key_from_str("w");

    {
        let mut lm = unit.list_manager(&key)?;
        for d in (2..=600u32).step_by(2) {
            lm.insert_document(d, &LocationList::new(vec![1]))?;
        }
    }
    unit.flush()?;

    let mut lm = unit.list_manager(&key)?;
    let mut it = lm.iterator()?.expect("list");
    // неубывающие цели: каждый lower_bound попадает на ближайший чётный
    for target in [1u32, 2, 55, 56, 200, 201, 599, 600] {
        assert!(it.lower_bound(&mut lm.cx, target, false)?);
        let doc = it.get_document_id(&mut lm.cx)?;
        let want = if target % 2 == 0 { target } else { target + 1 };
        assert_eq!(doc, want, "lower_bound({})", target);
    }
    assert!(!it.lower_bound(&mut lm.cx, 601, false)?);
    assert!(it.is_end());

    fs::remove_dir_all(&root).ok();
    Ok(())
}

#[test]
fn conversion_preserves_iterator_semantics() -> Result<()> {
    let root = unique_root("convtrans");
    let cfg = IndexConfig::default()
        .with_leaf_page_size(512)
        .with_overflow_page_size(512)
        .with_id_block_units(8);
    let mut unit = make_unit(&root, &cfg)?;
    let key = key_from_str("s");

    // вставки до и после продвижения дают один и тот же наблюдаемый ряд
    let mut expected = Vec::new();
    {
        for d in 1..=250u32 {
            let mut lm = unit.list_manager(&key)?;
            let locs = LocationList::new(vec![d, d + 7]);
            lm.insert_document(d * 3, &locs)?;
            expected.push((d * 3, vec![d, d + 7]));
        }
    }
    assert_ne!(
        list_type_of(&mut unit, &key)?,
        LIST_TYPE_SHORT,
        "the list must have been promoted"
    );
    let mut lm = unit.list_manager(&key)?;
    let mut it = lm.iterator()?.expect("list");
    for (doc, locs) in &expected {
        assert_eq!(it.get_document_id(&mut lm.cx)?, *doc);
        let got = it.get_location_list_iterator(&mut lm.cx)?;
        assert_eq!(got.into_location_list().as_slice(), locs.as_slice());
        it.next(&mut lm.cx)?;
    }
    assert!(it.is_end());

    fs::remove_dir_all(&root).ok();
    Ok(())
}
