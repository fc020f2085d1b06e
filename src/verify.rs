//! Проверка целостности юнита: перекрёстная сверка ключевой карты и
//! листовой цепочки, инварианты областей, пересчёт списков.
//!
//! Находки стекают в Progress; treatment решает судьбу проверки:
//! Continue — дочитать до конца, Abort — прервать VerifyAborted-ом.

use anyhow::Result;
use serde::Serialize;

use crate::consts::NO_PAGE;
use crate::error::{Cancelled, VerifyAborted};
use crate::leaf::area;
use crate::types::{compare_keys, key_to_string};
use crate::unit::InvertedUnit;

pub const TREATMENT_CONTINUE: u32 = 0x1;
pub const TREATMENT_ABORT: u32 = 0x2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InconsistencyKind {
    /// Расхождение ключевой карты и листов (висячая или потерянная запись).
    IllegalIndex,
    /// Счётчик документов списка не сходится с содержимым.
    IllegalListCount,
    /// Порвана двусвязная листовая цепочка или порядок ключей.
    IllegalLeafChain,
    /// Учёт места страницы не сходится.
    IllegalPageAccounting,
}

#[derive(Debug, Clone, Serialize)]
pub struct Inconsistency {
    pub kind: InconsistencyKind,
    pub message: String,
}

/// Приёмник находок проверки.
pub struct Progress {
    treatment: u32,
    pub inconsistencies: Vec<Inconsistency>,
    pub pages_checked: u64,
    pub lists_checked: u64,
}

impl Progress {
    pub fn new(treatment: u32) -> Self {
        Self {
            treatment,
            inconsistencies: Vec::new(),
            pages_checked: 0,
            lists_checked: 0,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.inconsistencies.is_empty()
    }

    fn report(&mut self, kind: InconsistencyKind, message: String) -> Result<()> {
        log::warn!("verify: {:?}: {}", kind, message);
        self.inconsistencies.push(Inconsistency { kind, message });
        if self.treatment & TREATMENT_ABORT != 0 {
            return Err(anyhow::Error::new(VerifyAborted));
        }
        Ok(())
    }
}

/// Полная проверка одного юнита.
pub fn verify_unit(unit: &mut InvertedUnit, progress: &mut Progress) -> Result<()> {
    verify_btree(unit, progress)?;
    let keys = verify_leaf_chain(unit, progress)?;
    verify_lists(unit, progress, &keys)?;
    Ok(())
}

/// Каждая запись карты указывает на страницу, чей первый ключ совпадает
/// с ключом записи.
pub fn verify_btree(unit: &mut InvertedUnit, progress: &mut Progress) -> Result<()> {
    let entries: Vec<(Vec<u16>, u32)> = unit
        .btr_ref()?
        .iter_entries()
        .map(|(k, p)| (k.clone(), p))
        .collect();
    for (key, page_id) in entries {
        if unit.is_cancelled() {
            return Err(anyhow::Error::new(Cancelled));
        }
        let page = match unit.leaf_mut()?.attach(page_id) {
            Ok(p) => p,
            Err(e) => {
                progress.report(
                    InconsistencyKind::IllegalIndex,
                    format!(
                        "key '{}' maps to unreadable leaf page {}: {}",
                        key_to_string(&key),
                        page_id,
                        e
                    ),
                )?;
                continue;
            }
        };
        if page.area_count() == 0 || compare_keys(&page.key_at(0), &key) != std::cmp::Ordering::Equal
        {
            progress.report(
                InconsistencyKind::IllegalIndex,
                format!(
                    "key '{}' maps to page {} whose first area disagrees",
                    key_to_string(&key),
                    page_id
                ),
            )?;
        }
    }
    Ok(())
}

// Обход цепочки: обратные ссылки, порядок ключей, учёт места, наличие
// обратной записи карты для первого ключа каждой страницы. Возвращает
// все ключи областей.
fn verify_leaf_chain(unit: &mut InvertedUnit, progress: &mut Progress) -> Result<Vec<Vec<u16>>> {
    let mut keys = Vec::new();
    let mut page_id = unit.first_leaf_page_id()?;
    let mut prev_id = NO_PAGE;
    let mut prev_key: Option<Vec<u16>> = None;

    while page_id != NO_PAGE {
        if unit.is_cancelled() {
            return Err(anyhow::Error::new(Cancelled));
        }
        let page = unit.leaf_mut()?.attach(page_id)?;
        progress.pages_checked += 1;

        if page.prev_page_id() != prev_id {
            progress.report(
                InconsistencyKind::IllegalLeafChain,
                format!(
                    "page {}: prev link {} != expected {}",
                    page_id,
                    page.prev_page_id(),
                    prev_id
                ),
            )?;
        }
        if page.used_units() + page.free_units() != page.page_units() {
            progress.report(
                InconsistencyKind::IllegalPageAccounting,
                format!("page {}: used+free != page units", page_id),
            )?;
        }

        for i in 0..page.area_count() {
            let key = page.key_at(i);
            if let Some(prev) = &prev_key {
                if compare_keys(prev, &key) != std::cmp::Ordering::Less {
                    progress.report(
                        InconsistencyKind::IllegalLeafChain,
                        format!(
                            "page {}: key order broken at '{}'",
                            page_id,
                            key_to_string(&key)
                        ),
                    )?;
                }
            }
            prev_key = Some(key.clone());
            keys.push(key);
        }

        if page.area_count() > 0 {
            let first = page.key_at(0);
            if unit.search_btree(&first) != Some(page_id) {
                // floor-поиск мог увести на соседнюю страницу только при
                // потерянной записи
                if unit.btr_ref()?.search_exact(&first) != Some(page_id) {
                    progress.report(
                        InconsistencyKind::IllegalIndex,
                        format!(
                            "page {}: first key '{}' has no key map entry",
                            page_id,
                            key_to_string(&first)
                        ),
                    )?;
                }
            }
        }

        prev_id = page_id;
        page_id = page.next_page_id();
    }
    Ok(keys)
}

// Пересчёт каждого списка его итератором.
fn verify_lists(
    unit: &mut InvertedUnit,
    progress: &mut Progress,
    keys: &[Vec<u16>],
) -> Result<()> {
    let unit_count = unit.get_count();
    for key in keys {
        if unit.is_cancelled() {
            return Err(anyhow::Error::new(Cancelled));
        }
        progress.lists_checked += 1;
        let mut lm = unit.list_manager(key)?;
        let it = match lm.iterator()? {
            Some(it) => it,
            None => {
                progress.report(
                    InconsistencyKind::IllegalIndex,
                    format!("list '{}' vanished during verify", key_to_string(key)),
                )?;
                continue;
            }
        };
        let declared = it.get_count();
        if unit_count == 0 && declared != 0 {
            progress.report(
                InconsistencyKind::IllegalListCount,
                format!(
                    "unit holds no documents but list '{}' declares {}",
                    key_to_string(key),
                    declared
                ),
            )?;
            continue;
        }

        // прямой пересчёт и монотонность id
        let mut it = it;
        let mut counted = 0u32;
        let mut last = 0u32;
        loop {
            let doc = it.get_document_id(&mut lm.cx)?;
            if doc == crate::types::UNDEFINED_DOCUMENT_ID {
                break;
            }
            if doc <= last {
                progress.report(
                    InconsistencyKind::IllegalListCount,
                    format!(
                        "list '{}': non-increasing document id {}",
                        key_to_string(key),
                        doc
                    ),
                )?;
                break;
            }
            last = doc;
            counted += 1;
            it.next(&mut lm.cx)?;
        }
        if counted != declared {
            progress.report(
                InconsistencyKind::IllegalListCount,
                format!(
                    "list '{}': declared {} documents, found {}",
                    key_to_string(key),
                    declared,
                    counted
                ),
            )?;
        }

        let pos = it.into_position();
        let off = pos.area_off();
        let img = &pos.page.image;
        // инварианты границ Short-списка
        if area::list_type(img, off) == crate::consts::LIST_TYPE_SHORT {
            let count = area::document_count(img, off);
            let first = area::first_document_id(img, off);
            let lastd = area::last_document_id(img, off);
            let broken = (count == 0 && (first != 0 || lastd != 0))
                || (count == 1 && first != lastd)
                || (count > 1 && first >= lastd);
            if broken {
                progress.report(
                    InconsistencyKind::IllegalListCount,
                    format!(
                        "list '{}': boundary ids disagree with count",
                        key_to_string(key)
                    ),
                )?;
            }
        }
    }
    Ok(())
}
