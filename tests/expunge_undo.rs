use anyhow::Result;
use std::fs;
use std::path::PathBuf;

use PostingDB::config::IndexConfig;
use PostingDB::types::{key_from_str, LocationList, UNDEFINED_DOCUMENT_ID};
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

// Маленькие IDBlock-и: 100 документов дают несколько блоков.
fn middle_cfg() -> IndexConfig {
    IndexConfig::default()
        .with_leaf_page_size(512)
        .with_overflow_page_size(512)
        .with_id_block_units(4)
}

fn insert_1_to_100(unit: &mut InvertedUnit, key: &[u16]) -> Result<()> {
    for d in 1..=100u32 {
        let mut lm = unit.list_manager(key)?;
        lm.insert_document(d, &LocationList::new(vec![d]))?;
    }
    Ok(())
}

fn collect_docs(unit: &mut InvertedUnit, key: &[u16]) -> Result<Vec<u32>> {
    let mut lm = unit.list_manager(key)?;
    let mut out = Vec::new();
    if let Some(mut it) = lm.iterator()? {
        loop {
            let doc = it.get_document_id(&mut lm.cx)?;
            if doc == UNDEFINED_DOCUMENT_ID {
                break;
            }
            out.push(doc);
            it.next(&mut lm.cx)?;
        }
    }
    Ok(out)
}

#[test]
fn middle_expunge_interior_and_tail() -> Result<()> {
    let root = unique_root("midexp");
    let mut unit = make_unit(&root, &middle_cfg())?;
    let key = key_from_str("x");
    insert_1_to_100(&mut unit, &key)?;
    unit.flush()?;

    {
        let mut lm = unit.list_manager(&key)?;
        assert!(lm.expunge_document(37)?);
        assert!(lm.expunge_document(100)?);
        assert!(lm.expunge_document(1)?);
    }

    let docs = collect_docs(&mut unit, &key)?;
    let want: Vec<u32> = (1..=100u32)
        .filter(|d| !matches!(d, 1 | 37 | 100))
        .collect();
    assert_eq!(docs, want);

    fs::remove_dir_all(&root).ok();
    Ok(())
}

#[test]
fn first_of_block_expunge_rewrites_head_and_logs() -> Result<()> {
    let root = unique_root("firstexp");
    let mut unit = make_unit(&root, &middle_cfg())?;
    let key = key_from_str("x");
    insert_1_to_100(&mut unit, &key)?;
    unit.flush()?;

    // первый документ какого-то переполненного блока: после вставки
    // 1..=100 блоки по границам кодека; вычёркиваем head второго блока,
    // найдя его через lower_bound за пределами первого блока
    let docs_before = collect_docs(&mut unit, &key)?;
    assert_eq!(docs_before.len(), 100);

    // doc=1 — голова первого блока; после его удаления лог переписывания
    // помнит старый->новый
    {
        let mut lm = unit.list_manager(&key)?;
        assert!(lm.expunge_document(1)?);
    }
    assert_eq!(unit.get_expunge_first_document_id(&key, 1), 2);

    // конкурентный откатчик находит исходную запись по логу
    {
        let mut lm = unit.list_manager(&key)?;
        lm.undo_expunge(1, &LocationList::new(vec![1]))?;
    }
    let docs_after = collect_docs(&mut unit, &key)?;
    assert_eq!(docs_after, docs_before);

    fs::remove_dir_all(&root).ok();
    Ok(())
}

#[test]
fn expunge_whole_block_queues_reclamation() -> Result<()> {
    let root = unique_root("reclaim");
    let mut unit = make_unit(&root, &middle_cfg())?;
    let key = key_from_str("x");
    insert_1_to_100(&mut unit, &key)?;
    unit.flush()?;

    // вычеркнуть всё: пустеющие блоки встают в очередь на вычистку
    {
        let mut lm = unit.list_manager(&key)?;
        for d in 1..=100u32 {
            assert!(lm.expunge_document(d)?, "doc {}", d);
        }
    }
    let docs = collect_docs(&mut unit, &key)?;
    assert!(docs.is_empty());

    let reclaimed = unit.apply_pending_deletes()?;
    assert!(reclaimed > 0, "empty id blocks must be reclaimed");
    unit.flush()?;

    // список снова принимает документы
    {
        let mut lm = unit.list_manager(&key)?;
        lm.insert_document(7, &LocationList::new(vec![2]))?;
    }
    assert_eq!(collect_docs(&mut unit, &key)?, vec![7]);

    fs::remove_dir_all(&root).ok();
    Ok(())
}

#[test]
fn bulk_expunge_and_compact() -> Result<()> {
    let root = unique_root("bulk");
    let mut unit = make_unit(&root, &middle_cfg())?;
    let key = key_from_str("gone");
    insert_1_to_100(&mut unit, &key)?;

    // свёрточное удаление одним итератором
    {
        let mut lm = unit.list_manager(&key)?;
        let docs: Vec<u32> = (1..=100).collect();
        assert_eq!(lm.expunge_list(&docs)?, 100);
    }
    assert!(collect_docs(&mut unit, &key)?.is_empty());

    // vacuum вычищает блоки, compact снимает пустую область
    unit.apply_pending_deletes()?;
    let removed = unit.compact_empty_areas()?;
    assert_eq!(removed, 1);
    {
        let mut lm = unit.list_manager(&key)?;
        assert!(lm.iterator()?.is_none(), "area must be gone after compact");
    }
    unit.flush()?;

    fs::remove_dir_all(&root).ok();
    Ok(())
}

#[test]
fn middle_undo_restores_positions() -> Result<()> {
    let root = unique_root("midundo");
    let mut unit = make_unit(&root, &middle_cfg())?;
    let key = key_from_str("y");
    for d in 1..=60u32 {
        let mut lm = unit.list_manager(&key)?;
        lm.insert_document(d, &LocationList::new(vec![d, d + 100]))?;
    }

    {
        let mut lm = unit.list_manager(&key)?;
        assert!(lm.expunge_document(30)?);
        lm.undo_expunge(30, &LocationList::new(vec![30, 130]))?;
    }

    let mut lm = unit.list_manager(&key)?;
    let mut it = lm.iterator()?.expect("list");
    assert!(it.find(&mut lm.cx, 30, false)?);
    assert_eq!(it.get_in_document_frequency(&mut lm.cx)?, 2);
    let locs = it.get_location_list_iterator(&mut lm.cx)?;
    assert_eq!(locs.into_location_list().as_slice(), &[30, 130]);

    fs::remove_dir_all(&root).ok();
    Ok(())
}
