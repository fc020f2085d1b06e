use anyhow::Result;
use std::fs;
use std::path::PathBuf;

use PostingDB::config::IndexConfig;
use PostingDB::list::batch::BatchList;
use PostingDB::list::ListCodec;
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
fn batch_fold_is_idempotent() -> Result<()> {
    let root = unique_root("fold");
    let cfg = IndexConfig::default();
    let codec = ListCodec::from_config(&cfg);
    let mut unit = make_unit(&root, &cfg)?;
    let key = key_from_str("q");

    let mut batch = BatchList::new(&cfg, &key);
    for d in 1..=500u32 {
        let locs = LocationList::new(vec![d % 7 + 1, d % 7 + 3]);
        assert_eq!(
            batch.insert(&codec, &cfg, d, &locs),
            PostingDB::list::ListInsert::Done
        );
    }

    {
        let mut lm = unit.list_manager(&key)?;
        lm.insert_batch_list(batch.image(), 0)?;
    }
    unit.flush()?;
    let docs_once = collect_docs(&mut unit, &key)?;
    assert_eq!(docs_once.len(), 500);

    let snapshot = {
        let mut lm = unit.list_manager(&key)?;
        lm.locate()?.page.image.clone()
    };

    // повторная свёртка того же батча — no-op (last >= first источника)
    {
        let mut lm = unit.list_manager(&key)?;
        lm.insert_batch_list(batch.image(), 0)?;
    }
    let again = {
        let mut lm = unit.list_manager(&key)?;
        lm.locate()?.page.image.clone()
    };
    assert_eq!(snapshot, again, "re-fold must leave the list byte-identical");

    fs::remove_dir_all(&root).ok();
    Ok(())
}

#[test]
fn batch_fold_with_base_offset() -> Result<()> {
    let root = unique_root("foldbase");
    let cfg = IndexConfig::default();
    let codec = ListCodec::from_config(&cfg);
    let mut unit = make_unit(&root, &cfg)?;
    let key = key_from_str("r");

    // на диске уже 1..=10
    {
        let mut lm = unit.list_manager(&key)?;
        for d in 1..=10u32 {
            lm.insert_document(d, &LocationList::new(vec![1]))?;
        }
    }

    // батч с относительными id 1..=5 при base=10 становится 11..=15
    let mut batch = BatchList::new(&cfg, &key);
    for d in 1..=5u32 {
        batch.insert(&codec, &cfg, d, &LocationList::new(vec![d]));
    }
    {
        let mut lm = unit.list_manager(&key)?;
        lm.insert_batch_list(batch.image(), 10)?;
    }

    let docs = collect_docs(&mut unit, &key)?;
    assert_eq!(docs, (1..=15u32).collect::<Vec<_>>());

    // позиции переживают свёртку
    let mut lm = unit.list_manager(&key)?;
    let mut it = lm.iterator()?.expect("list");
    assert!(it.find(&mut lm.cx, 13, false)?);
    let locs = it.get_location_list_iterator(&mut lm.cx)?;
    assert_eq!(locs.into_location_list().as_slice(), &[3]);

    fs::remove_dir_all(&root).ok();
    Ok(())
}

#[test]
fn fold_into_middle_list() -> Result<()> {
    let root = unique_root("foldmid");
    let cfg = IndexConfig::default()
        .with_leaf_page_size(512)
        .with_overflow_page_size(512)
        .with_id_block_units(4);
    let codec = ListCodec::from_config(&cfg);
    let mut unit = make_unit(&root, &cfg)?;
    let key = key_from_str("m");

    // большой батч продвигает список через Short в Middle при свёртке
    let mut batch = BatchList::new(&cfg, &key);
    for d in 1..=300u32 {
        batch.insert(&codec, &cfg, d, &LocationList::new(vec![d, d + 1, d + 2]));
    }
    {
        let mut lm = unit.list_manager(&key)?;
        lm.insert_batch_list(batch.image(), 0)?;
    }
    unit.flush()?;

    let docs = collect_docs(&mut unit, &key)?;
    assert_eq!(docs, (1..=300u32).collect::<Vec<_>>());

    fs::remove_dir_all(&root).ok();
    Ok(())
}
