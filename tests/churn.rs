use anyhow::Result;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use PostingDB::config::IndexConfig;
use PostingDB::types::{key_from_str, LocationList, UNDEFINED_DOCUMENT_ID};
use PostingDB::unit::InvertedUnit;
use PostingDB::verify::TREATMENT_CONTINUE;

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("pdb-{}-{}-{}", prefix, pid, t))
}

// Случайная нагрузка против эталонной модели: вставки и удаления по
// нескольким термам, затем полная сверка итераторов и verify.
#[test]
fn randomized_churn_matches_model() -> Result<()> {
    let root = unique_root("churn");
    fs::create_dir_all(&root)?;
    let cfg = IndexConfig::default()
        .with_leaf_page_size(512)
        .with_overflow_page_size(512)
        .with_id_block_units(4);
    let dir = root.join("Inv0");
    let mut unit = InvertedUnit::new(&root, &dir, 0, &cfg);
    unit.create()?;

    let mut rng = oorandom::Rand32::new(0xC0FF_EE11);
    let terms = ["red", "green", "blue", "cyan", "violet"];
    // модель: терм -> doc -> позиции
    let mut model: BTreeMap<&str, BTreeMap<u32, Vec<u32>>> = Default::default();

    let mut next_doc = 0u32;
    for _ in 0..3000 {
        let term = terms[rng.rand_range(0..terms.len() as u32) as usize];
        let roll = rng.rand_range(0..100);
        if roll < 75 {
            // вставка нового документа в терм
            next_doc += 1;
            let doc = next_doc;
            let n = rng.rand_range(1..6);
            let mut locs: Vec<u32> = (0..n)
                .map(|_| rng.rand_range(1..10_000))
                .collect();
            locs.sort_unstable();
            locs.dedup();
            let mut lm = unit.list_manager(&key_from_str(term))?;
            lm.insert_document(doc, &LocationList::from_sorted(locs.clone()))?;
            model.entry(term).or_default().insert(doc, locs);
        } else {
            // удаление случайного существующего
            let docs: Vec<u32> = model
                .get(term)
                .map(|m| m.keys().copied().collect())
                .unwrap_or_default();
            if docs.is_empty() {
                continue;
            }
            let doc = docs[rng.rand_range(0..docs.len() as u32) as usize];
            let mut lm = unit.list_manager(&key_from_str(term))?;
            assert!(lm.expunge_document(doc)?, "model said {} exists", doc);
            model.get_mut(term).unwrap().remove(&doc);
        }
    }
    unit.flush()?;

    // сверка: каждый терм отдаёт ровно модельные документы и позиции
    for term in terms {
        let want = model.get(term).cloned().unwrap_or_default();
        let mut got: BTreeMap<u32, Vec<u32>> = Default::default();
        let mut lm = unit.list_manager(&key_from_str(term))?;
        if let Some(mut it) = lm.iterator()? {
            let mut last = 0u32;
            loop {
                let doc = it.get_document_id(&mut lm.cx)?;
                if doc == UNDEFINED_DOCUMENT_ID {
                    break;
                }
                assert!(doc > last, "ids must strictly increase");
                last = doc;
                let tf = it.get_in_document_frequency(&mut lm.cx)?;
                let locs = it
                    .get_location_list_iterator(&mut lm.cx)?
                    .into_location_list();
                assert_eq!(tf as usize, locs.as_slice().len());
                got.insert(doc, locs.as_slice().to_vec());
                it.next(&mut lm.cx)?;
            }
        }
        assert_eq!(got, want, "term '{}' diverged from model", term);
    }

    // find по каждой модельной записи
    for (term, docs) in &model {
        let mut lm = unit.list_manager(&key_from_str(term))?;
        let mut it = match lm.iterator()? {
            Some(it) => it,
            None => {
                assert!(docs.is_empty());
                continue;
            }
        };
        for doc in docs.keys() {
            assert!(it.find(&mut lm.cx, *doc, false)?, "find({})", doc);
        }
    }

    // вычистка и целостность
    unit.apply_pending_deletes()?;
    unit.flush()?;
    let mut progress = unit.start_verification(TREATMENT_CONTINUE);
    unit.verify(&mut progress)?;
    unit.end_verification();
    assert!(progress.is_consistent(), "{:?}", progress.inconsistencies);

    fs::remove_dir_all(&root).ok();
    Ok(())
}

// Повторное открытие после случайной нагрузки: состояние на диске полное.
#[test]
fn churn_survives_reopen() -> Result<()> {
    let root = unique_root("reopen");
    fs::create_dir_all(&root)?;
    let cfg = IndexConfig::default()
        .with_leaf_page_size(512)
        .with_overflow_page_size(512);
    let dir = root.join("Inv0");

    let mut rng = oorandom::Rand32::new(42);
    let mut model: BTreeMap<u32, Vec<u32>> = Default::default();
    {
        let mut unit = InvertedUnit::new(&root, &dir, 0, &cfg);
        unit.create()?;
        let key = key_from_str("k");
        for d in 1..=500u32 {
            if rng.rand_range(0..10) < 8 {
                let locs = vec![d, d + rng.rand_range(1..50)];
                let mut lm = unit.list_manager(&key)?;
                lm.insert_document(d, &LocationList::new(locs.clone()))?;
                let mut sorted = locs;
                sorted.sort_unstable();
                sorted.dedup();
                model.insert(d, sorted);
            }
        }
        unit.flush()?;
        unit.close()?;
    }
    {
        let mut unit = InvertedUnit::new(&root, &dir, 0, &cfg);
        unit.mount()?;
        unit.open(PostingDB::FixMode::ReadOnly)?;
        let key = key_from_str("k");
        let mut lm = unit.list_manager(&key)?;
        let mut it = lm.iterator()?.expect("list");
        for (doc, locs) in &model {
            assert!(it.lower_bound(&mut lm.cx, *doc, false)?);
            assert_eq!(it.get_document_id(&mut lm.cx)?, *doc);
            let got = it.get_location_list_iterator(&mut lm.cx)?;
            assert_eq!(got.into_location_list().as_slice(), locs.as_slice());
        }
    }

    fs::remove_dir_all(&root).ok();
    Ok(())
}
