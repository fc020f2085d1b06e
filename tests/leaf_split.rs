use anyhow::Result;
use std::fs;
use std::path::PathBuf;

use PostingDB::config::IndexConfig;
use PostingDB::consts::NO_PAGE;
use PostingDB::types::{compare_keys, key_from_str, LocationList};
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

fn make_unit(root: &PathBuf, cfg: &IndexConfig) -> Result<InvertedUnit> {
    fs::create_dir_all(root)?;
    let dir = root.join("Inv0");
    let mut unit = InvertedUnit::new(root, &dir, 0, cfg);
    unit.create()?;
    Ok(unit)
}

#[test]
fn many_terms_split_pages_and_keep_chain() -> Result<()> {
    let root = unique_root("split");
    let cfg = IndexConfig::default().with_leaf_page_size(512);
    let mut unit = make_unit(&root, &cfg)?;

    // сотни термов в перемешанном порядке заставляют листы резаться
    let mut terms: Vec<String> = (0..400u32).map(|i| format!("term{:04}", i * 7 % 400)).collect();
    terms.dedup();
    for (n, term) in terms.iter().enumerate() {
        let key = key_from_str(term);
        let mut lm = unit.list_manager(&key)?;
        lm.insert_document(n as u32 + 1, &LocationList::new(vec![1, 3]))?;
    }
    unit.flush()?;
    assert!(
        unit.leaf_mut()?.page_count() > 1,
        "400 terms on 512-byte pages must split"
    );

    // цепочка: p.next.prev == p, ключи между страницами возрастают
    let mut page_id = unit.first_leaf_page_id()?;
    let mut prev_id = NO_PAGE;
    let mut last_key: Option<Vec<u16>> = None;
    let mut seen_terms = 0usize;
    while page_id != NO_PAGE {
        let page = unit.leaf_mut()?.attach(page_id)?;
        assert_eq!(page.prev_page_id(), prev_id, "page {} prev link", page_id);
        assert_eq!(
            page.used_units() + page.free_units(),
            page.page_units(),
            "page {} accounting",
            page_id
        );
        for i in 0..page.area_count() {
            let key = page.key_at(i);
            if let Some(prev) = &last_key {
                assert_eq!(
                    compare_keys(prev, &key),
                    std::cmp::Ordering::Less,
                    "keys must increase across the chain"
                );
            }
            last_key = Some(key);
            seen_terms += 1;
        }
        prev_id = page_id;
        page_id = page.next_page_id();
    }
    // + якорная область пустого ключа
    assert_eq!(seen_terms, terms.len() + 1);

    // каждый терм находится и его документ на месте
    for (n, term) in terms.iter().enumerate() {
        let key = key_from_str(term);
        let mut lm = unit.list_manager(&key)?;
        let mut it = lm.iterator()?.unwrap_or_else(|| panic!("term {}", term));
        assert!(it.find(&mut lm.cx, n as u32 + 1, false)?);
    }

    let mut progress = unit.start_verification(TREATMENT_CONTINUE);
    unit.verify(&mut progress)?;
    unit.end_verification();
    assert!(progress.is_consistent(), "{:?}", progress.inconsistencies);

    fs::remove_dir_all(&root).ok();
    Ok(())
}

#[test]
fn recover_drops_unflushed_mutations() -> Result<()> {
    let root = unique_root("recover");
    let cfg = IndexConfig::default();
    let mut unit = make_unit(&root, &cfg)?;
    let key = key_from_str("k");

    {
        let mut lm = unit.list_manager(&key)?;
        lm.insert_document(1, &LocationList::new(vec![1]))?;
    }
    unit.flush()?;

    // несброшенная вставка откатывается recover-ом
    {
        let mut lm = unit.list_manager(&key)?;
        lm.insert_document(2, &LocationList::new(vec![2]))?;
    }
    unit.recover(0)?;

    let mut lm = unit.list_manager(&key)?;
    let it = lm.iterator()?.expect("list");
    assert_eq!(it.get_count(), 1);

    fs::remove_dir_all(&root).ok();
    Ok(())
}

#[test]
fn clear_reinstalls_anchor() -> Result<()> {
    let root = unique_root("clear");
    let cfg = IndexConfig::default();
    let mut unit = make_unit(&root, &cfg)?;

    for t in ["a", "b", "c"] {
        let key = key_from_str(t);
        let mut lm = unit.list_manager(&key)?;
        lm.insert_document(1, &LocationList::new(vec![1]))?;
    }
    unit.clear(false)?;

    // пустой индекс снова несёт одну страницу с якорной областью
    let first = unit.first_leaf_page_id()?;
    let page = unit.leaf_mut()?.attach(first)?;
    assert_eq!(page.area_count(), 1);
    assert!(page.key_at(0).is_empty());
    assert_eq!(unit.get_count(), 0);

    // и принимает новые вставки
    let key = key_from_str("fresh");
    let mut lm = unit.list_manager(&key)?;
    lm.insert_document(1, &LocationList::new(vec![1]))?;

    fs::remove_dir_all(&root).ok();
    Ok(())
}
