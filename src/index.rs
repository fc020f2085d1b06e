//! Фасад драйвера: парк юнитов (Inv0..InvN-1), батчевый слой, merge-демон.
//!
//! Вставка шардируется по row id; документы получают плотные id в своём
//! юните сразу, в батч пишутся относительные значения. Удаление сперва
//! сворачивает батч юнита (дисковые списки становятся авторитетными),
//! затем вычёркивает документ из списков с откатом при сбое на середине.

use anyhow::{anyhow, Context, Result};
use fs2::FileExt;
use log::{debug, info};
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::IndexConfig;
use crate::consts::{LOCK_FILE, UNAVAILABLE_FILE, UNIT_DIR_PREFIX};
use crate::error::Unavailable;
use crate::list::batch::BatchListMap;
use crate::list::ListCodec;
use crate::merge::MergeDaemon;
use crate::metrics;
use crate::types::{key_from_str, DocumentId, LocationList, RowId, UNDEFINED_DOCUMENT_ID};
use crate::unit::{FixMode, InvertedUnit};
use crate::verify::Progress;

/// Состояние, разделяемое с merge-демоном.
pub struct IndexShared {
    pub cfg: IndexConfig,
    pub codec: ListCodec,
    units: Vec<Mutex<InvertedUnit>>,
    batches: Vec<Mutex<BatchListMap>>,
}

impl IndexShared {
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    pub(crate) fn unit(&self, k: usize) -> &Mutex<InvertedUnit> {
        &self.units[k]
    }

    pub(crate) fn batch(&self, k: usize) -> &Mutex<BatchListMap> {
        &self.batches[k]
    }

    /// Свернуть батч юнита k в дисковый слой. Точка сериализации —
    /// подмена карты: писатели после неё видят пустой батч.
    pub fn fold_unit(&self, k: usize) -> Result<bool> {
        let taken = {
            let mut unit = self.units[k].lock();
            let mut batch = self.batches[k].lock();
            if batch.is_empty() {
                return Ok(false);
            }
            let next_base = unit.get_last_document_id();
            let taken = std::mem::replace(&mut *batch, BatchListMap::new(next_base));
            drop(batch);
            // юнит остаётся под замком на всю свёртку
            let base = taken.base;
            for (key, lists) in taken.iter() {
                for list in lists {
                    let mut lm = unit.list_manager(key)?;
                    lm.insert_batch_list(list.image(), base)?;
                    metrics::record_merged_list();
                }
            }
            unit.flush()?;
            taken
        };
        debug!(
            "unit {} folded: {} batch entries merged",
            k,
            taken.entry_count()
        );
        Ok(true)
    }
}

pub struct FullTextIndex {
    root: PathBuf,
    shared: Arc<IndexShared>,
    daemon: Option<MergeDaemon>,
    _lock: std::fs::File,
}

impl FullTextIndex {
    /// Создать индекс: каталоги юнитов, три файла в каждом, демон.
    pub fn create(root: &Path, cfg: IndexConfig) -> Result<Self> {
        cfg.validate()?;
        std::fs::create_dir_all(root)
            .with_context(|| format!("create index root {}", root.display()))?;
        let n = cfg.unit_count.max(1);
        for k in 0..n {
            let dir = unit_dir(root, k);
            let mut unit = InvertedUnit::new(root, &dir, k, &cfg);
            unit.create()?;
            unit.close()?;
        }
        info!("index created at {} with {} unit(s)", root.display(), n);
        Self::open(root, cfg)
    }

    /// Открыть существующий индекс; юниты обнаруживаются по каталогам.
    pub fn open(root: &Path, cfg: IndexConfig) -> Result<Self> {
        if root.join(UNAVAILABLE_FILE).exists() {
            return Err(anyhow::Error::new(Unavailable)
                .context(format!("index {} is marked unavailable", root.display())));
        }
        let lock = open_lock_file(root)?;
        lock.try_lock_exclusive()
            .with_context(|| format!("lock index {} for writing", root.display()))?;

        let mut units = Vec::new();
        let mut batches = Vec::new();
        let mut k = 0u32;
        loop {
            let dir = unit_dir(root, k);
            if !dir.join(crate::consts::BTR_FILE).exists() {
                break;
            }
            let mut unit = InvertedUnit::new(root, &dir, k, &cfg);
            unit.mount()?;
            unit.open(FixMode::Write)?;
            let base = unit.get_last_document_id();
            units.push(Mutex::new(unit));
            batches.push(Mutex::new(BatchListMap::new(base)));
            k += 1;
        }
        if units.is_empty() {
            return Err(anyhow!("no units found under {}", root.display()));
        }

        let shared = Arc::new(IndexShared {
            codec: ListCodec::from_config(&cfg),
            cfg,
            units,
            batches,
        });
        let daemon = MergeDaemon::start(shared.clone());
        Ok(Self {
            root: root.to_path_buf(),
            shared,
            daemon: Some(daemon),
            _lock: lock,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn unit_count(&self) -> usize {
        self.shared.unit_count()
    }

    pub fn shared(&self) -> &Arc<IndexShared> {
        &self.shared
    }

    fn unit_of_row(&self, row: RowId) -> usize {
        (row as usize) % self.shared.unit_count()
    }

    // ----- запись -----

    /// Вставить документ: (термин, позиции) от внешнего токенизатора.
    pub fn insert_document(&self, row: RowId, postings: &[(String, Vec<u32>)]) -> Result<()> {
        let k = self.unit_of_row(row);
        let doc_rel;
        {
            let mut unit = self.shared.unit(k).lock();
            let doc = unit.assign_document_id(row)?;
            let batch = self.shared.batch(k);
            let mut batch = batch.lock();
            doc_rel = doc - batch.base;
            for (term, positions) in postings {
                // в позиционном режиме постинг без позиций некодируем
                if positions.is_empty() && !self.shared.codec.no_location {
                    continue;
                }
                let key = key_from_str(term);
                let locs = LocationList::new(positions.clone());
                batch.insert(&self.shared.codec, &self.shared.cfg, &key, doc_rel, &locs);
            }
            if batch.entry_count() >= self.shared.cfg.merge_threshold {
                if let Some(d) = &self.daemon {
                    d.signal();
                }
            }
        }
        Ok(())
    }

    /// Удалить документ. Батч юнита сворачивается, затем термы
    /// вычёркиваются; сбой на середине откатывается undo-путём.
    pub fn remove_document(&self, row: RowId, postings: &[(String, Vec<u32>)]) -> Result<bool> {
        let k = self.unit_of_row(row);
        self.shared.fold_unit(k)?;

        let mut unit = self.shared.unit(k).lock();
        let doc = unit.convert_to_document_id(row);
        if doc == UNDEFINED_DOCUMENT_ID {
            return Ok(false);
        }

        let mut done: Vec<(Vec<u16>, LocationList)> = Vec::new();
        let mut failure: Option<anyhow::Error> = None;
        for (term, positions) in postings {
            if positions.is_empty() && !self.shared.codec.no_location {
                continue;
            }
            let key = key_from_str(term);
            let locs = LocationList::new(positions.clone());
            let res = unit
                .list_manager(&key)
                .and_then(|mut lm| lm.expunge_document(doc));
            match res {
                Ok(true) => done.push((key, locs)),
                Ok(false) => {}
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = failure {
            // откат уже вычеркнутых термов
            for (key, locs) in done.into_iter().rev() {
                let undo = unit
                    .list_manager(&key)
                    .and_then(|mut lm| lm.undo_expunge(doc, &locs));
                if let Err(ue) = undo {
                    log::warn!("undo expunge failed: {:#}", ue);
                    unit.set_unavailable();
                    return Err(anyhow::Error::new(Unavailable).context(e));
                }
            }
            return Err(e);
        }

        unit.unassign_document_id(doc)?;
        unit.flush()?;
        unit.logs.clear();
        Ok(true)
    }

    // ----- чтение -----

    /// Строки, содержащие термин (по всем юнитам).
    pub fn search(&self, term: &str) -> Result<Vec<RowId>> {
        let key = key_from_str(term);
        let mut rows = Vec::new();
        for k in 0..self.shared.unit_count() {
            self.shared.fold_unit(k)?;
            let mut unit = self.shared.unit(k).lock();
            let mut docs = Vec::new();
            {
                let mut lm = unit.list_manager(&key)?;
                if let Some(mut it) = lm.iterator()? {
                    loop {
                        let doc = it.get_document_id(&mut lm.cx)?;
                        if doc == UNDEFINED_DOCUMENT_ID {
                            break;
                        }
                        docs.push(doc);
                        it.next(&mut lm.cx)?;
                    }
                }
            }
            for doc in docs {
                let row = unit.convert_to_row_id(doc);
                if row != crate::types::UNDEFINED_ROW_ID {
                    rows.push(row);
                }
            }
        }
        Ok(rows)
    }

    /// Строки с частотой и позициями термина.
    pub fn search_with_positions(
        &self,
        term: &str,
    ) -> Result<Vec<(RowId, u32, Vec<u32>)>> {
        let key = key_from_str(term);
        let mut out = Vec::new();
        for k in 0..self.shared.unit_count() {
            self.shared.fold_unit(k)?;
            let mut unit = self.shared.unit(k).lock();
            let mut hits: Vec<(DocumentId, u32, Vec<u32>)> = Vec::new();
            {
                let mut lm = unit.list_manager(&key)?;
                if let Some(mut it) = lm.iterator()? {
                    loop {
                        let doc = it.get_document_id(&mut lm.cx)?;
                        if doc == UNDEFINED_DOCUMENT_ID {
                            break;
                        }
                        let tf = it.get_in_document_frequency(&mut lm.cx)?;
                        let locs = it.get_location_list_iterator(&mut lm.cx)?;
                        hits.push((doc, tf, locs.into_location_list().as_slice().to_vec()));
                        it.next(&mut lm.cx)?;
                    }
                }
            }
            for (doc, tf, locs) in hits {
                let row = unit.convert_to_row_id(doc);
                if row != crate::types::UNDEFINED_ROW_ID {
                    out.push((row, tf, locs));
                }
            }
        }
        Ok(out)
    }

    /// Число документов с термином.
    pub fn count(&self, term: &str) -> Result<u32> {
        let key = key_from_str(term);
        let mut total = 0u32;
        for k in 0..self.shared.unit_count() {
            self.shared.fold_unit(k)?;
            let mut unit = self.shared.unit(k).lock();
            let mut lm = unit.list_manager(&key)?;
            if let Some(it) = lm.iterator()? {
                total += it.get_count();
            }
        }
        Ok(total)
    }

    /// Несвёрнутых батчевых вхождений по всем юнитам.
    pub fn pending_batch_entries(&self) -> usize {
        (0..self.shared.unit_count())
            .map(|k| self.shared.batch(k).lock().entry_count())
            .sum()
    }

    /// Всего документов в индексе.
    pub fn document_count(&self) -> u32 {
        (0..self.shared.unit_count())
            .map(|k| self.shared.unit(k).lock().get_count())
            .sum()
    }

    // ----- обслуживание -----

    /// Свернуть батчи всех юнитов немедленно.
    pub fn merge_now(&self) -> Result<()> {
        for k in 0..self.shared.unit_count() {
            self.shared.fold_unit(k)?;
        }
        Ok(())
    }

    /// Сбросить все юниты.
    pub fn flush(&self) -> Result<()> {
        for k in 0..self.shared.unit_count() {
            self.shared.unit(k).lock().flush()?;
        }
        Ok(())
    }

    /// Вычистить недостижимые IDBlock-и и области опустевших списков.
    pub fn vacuum(&self) -> Result<usize> {
        self.merge_now()?;
        let mut reclaimed = 0usize;
        for k in 0..self.shared.unit_count() {
            let mut unit = self.shared.unit(k).lock();
            reclaimed += unit.apply_pending_deletes()?;
            reclaimed += unit.compact_empty_areas()?;
            unit.flush()?;
        }
        Ok(reclaimed)
    }

    /// Уплотнить листы: снять области опустевших списков. У Middle-списков
    /// без позиций дополнительной работы нет (позиционного потока не
    /// существует), это осознанный no-op.
    pub fn compact(&self) -> Result<usize> {
        let mut removed = 0usize;
        for k in 0..self.shared.unit_count() {
            let mut unit = self.shared.unit(k).lock();
            removed += unit.compact_empty_areas()?;
            unit.flush()?;
        }
        Ok(removed)
    }

    /// Проверка всех юнитов.
    pub fn verify(&self, treatment: u32) -> Result<Vec<Progress>> {
        self.merge_now()?;
        let mut out = Vec::new();
        for k in 0..self.shared.unit_count() {
            let mut unit = self.shared.unit(k).lock();
            let mut progress = unit.start_verification(treatment);
            let res = unit.verify(&mut progress);
            unit.end_verification();
            res?;
            out.push(progress);
        }
        Ok(out)
    }

    /// Остановить демона для обслуживания.
    pub fn stop_merge_daemon(&mut self) {
        if let Some(d) = &mut self.daemon {
            d.stop();
        }
    }

    /// Запустить демона снова.
    pub fn start_merge_daemon(&mut self) {
        if let Some(d) = &mut self.daemon {
            d.restart();
        }
    }

    /// Подготовка к останову: demon abort+join, батчи свёрнуты.
    pub fn prepare_terminate(&mut self) -> Result<()> {
        if let Some(d) = &mut self.daemon {
            d.prepare_terminate();
        }
        self.merge_now()?;
        self.flush()
    }

    /// Останов драйвера (идемпотентен после prepare_terminate).
    pub fn terminate(&mut self) -> Result<()> {
        self.prepare_terminate()?;
        self.daemon = None;
        Ok(())
    }
}

impl Drop for FullTextIndex {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            log::warn!("index shutdown flush failed: {:#}", e);
        }
    }
}

fn unit_dir(root: &Path, k: u32) -> PathBuf {
    root.join(format!("{}{}", UNIT_DIR_PREFIX, k))
}

fn open_lock_file(root: &Path) -> Result<std::fs::File> {
    let p = root.join(LOCK_FILE);
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&p)
        .with_context(|| format!("open lock file {}", p.display()))
}
