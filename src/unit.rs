//! Юнит инвертированного индекса: тройка файлов (Btr, Leaf, Ovr) в одном
//! каталоге + карта row<->doc + журналы незавершённых удалений.
//!
//! Все операции юнита локальны его каталогу; распределённый индекс несёт
//! несколько юнитов (Inv0, Inv1, ...) и перебирает их снаружи.
//! Изменения страниц живут в кэшах до flush; recover/restore откатывают
//! к последнему flush, перечитав файлы.

use anyhow::{anyhow, Context, Result};
use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::btree::BtrFile;
use crate::config::IndexConfig;
use crate::consts::{BTR_FILE, LEAF_FILE, OVR_FILE, UNAVAILABLE_FILE};
use crate::error::Unavailable;
use crate::leaf::LeafFile;
use crate::list::{ExpungeLogs, ListCodec, ListContext};
use crate::list_manager::ListManager;
use crate::overflow::OverflowFile;
use crate::types::{DocumentId, RowId};

/// Режим фиксации страниц при открытии.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixMode {
    ReadOnly,
    Write,
}

pub struct InvertedUnit {
    /// Каталог юнита.
    path: PathBuf,
    /// Корень индекса (для маркера недоступности).
    db_root: PathBuf,
    /// Номер юнита в распределении.
    element: u32,
    cfg: IndexConfig,
    codec: ListCodec,

    btr: Option<BtrFile>,
    leaf: Option<LeafFile>,
    ovr: Option<OverflowFile>,

    pub logs: ExpungeLogs,
    cancel: Arc<AtomicBool>,
    mounted: bool,
    fix_mode: FixMode,
}

impl InvertedUnit {
    pub fn new(db_root: &Path, path: &Path, element: u32, cfg: &IndexConfig) -> Self {
        Self {
            path: path.to_path_buf(),
            db_root: db_root.to_path_buf(),
            element,
            cfg: cfg.clone(),
            codec: ListCodec::from_config(cfg),
            btr: None,
            leaf: None,
            ovr: None,
            logs: ExpungeLogs::default(),
            cancel: Arc::new(AtomicBool::new(false)),
            mounted: false,
            fix_mode: FixMode::ReadOnly,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn element(&self) -> u32 {
        self.element
    }

    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn btr_path(&self) -> PathBuf {
        self.path.join(BTR_FILE)
    }
    fn leaf_path(&self) -> PathBuf {
        self.path.join(LEAF_FILE)
    }
    fn ovr_path(&self) -> PathBuf {
        self.path.join(OVR_FILE)
    }

    /// Файлы юнита существуют на диске.
    pub fn is_accessible(&self) -> bool {
        self.btr_path().exists() && self.leaf_path().exists() && self.ovr_path().exists()
    }

    pub fn is_attached(&self) -> bool {
        self.btr.is_some()
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    // ----- жизненный цикл файлов -----

    /// Создать каталог и три файла юнита; листовой файл получает
    /// якорную область пустого ключа.
    pub fn create(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.path)
            .with_context(|| format!("create unit dir {}", self.path.display()))?;
        let mut btr = BtrFile::create(&self.btr_path(), self.cfg.no_location, self.cfg.no_tf)?;
        let leaf = LeafFile::create(
            &self.leaf_path(),
            self.cfg.leaf_page_size,
            self.cfg.page_cache_pages,
            &mut btr,
        );
        let leaf = match leaf {
            Ok(l) => l,
            Err(e) => {
                // откат частично созданного юнита
                let _ = std::fs::remove_file(self.btr_path());
                return Err(e);
            }
        };
        let ovr = OverflowFile::create(
            &self.ovr_path(),
            self.cfg.overflow_page_size,
            self.cfg.page_cache_pages,
        );
        let ovr = match ovr {
            Ok(o) => o,
            Err(e) => {
                let _ = std::fs::remove_file(self.btr_path());
                let _ = std::fs::remove_file(self.leaf_path());
                return Err(e);
            }
        };
        self.btr = Some(btr);
        self.leaf = Some(leaf);
        self.ovr = Some(ovr);
        self.flush()?;
        self.fix_mode = FixMode::Write;
        debug!("unit {} created at {}", self.element, self.path.display());
        Ok(())
    }

    /// Удалить файлы и каталог юнита.
    pub fn destroy(&mut self) -> Result<()> {
        self.btr = None;
        self.leaf = None;
        self.ovr = None;
        for p in [self.btr_path(), self.leaf_path(), self.ovr_path()] {
            if p.exists() {
                std::fs::remove_file(&p)
                    .with_context(|| format!("remove {}", p.display()))?;
            }
        }
        self.rmdir();
        Ok(())
    }

    /// Снести каталог юнита, если он опустел.
    pub fn rmdir(&self) {
        let _ = std::fs::remove_dir(&self.path);
    }

    /// Зарегистрировать юнит; при сбое шаг откатывается.
    pub fn mount(&mut self) -> Result<()> {
        if !self.is_accessible() {
            return Err(anyhow!(
                "unit {} files missing under {}",
                self.element,
                self.path.display()
            ));
        }
        self.mounted = true;
        Ok(())
    }

    pub fn unmount(&mut self) -> Result<()> {
        if self.is_attached() {
            self.close()?;
        }
        self.mounted = false;
        Ok(())
    }

    /// Открыть три файла с заданным режимом фиксации.
    pub fn open(&mut self, fix_mode: FixMode) -> Result<()> {
        if self.unavailable_marker().exists() {
            return Err(anyhow::Error::new(Unavailable));
        }
        if self.is_attached() {
            self.fix_mode = fix_mode;
            return Ok(());
        }
        let btr = BtrFile::open(&self.btr_path())?;
        let leaf = LeafFile::open(&self.leaf_path(), self.cfg.page_cache_pages)?;
        let ovr = OverflowFile::open(&self.ovr_path(), self.cfg.page_cache_pages)?;
        self.btr = Some(btr);
        self.leaf = Some(leaf);
        self.ovr = Some(ovr);
        self.fix_mode = fix_mode;
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        if self.fix_mode == FixMode::Write {
            self.flush()?;
        }
        self.btr = None;
        self.leaf = None;
        self.ovr = None;
        Ok(())
    }

    fn btr_mut(&mut self) -> Result<&mut BtrFile> {
        self.btr.as_mut().ok_or_else(|| anyhow!("unit not open"))
    }

    fn require_open(&self) -> Result<()> {
        if self.btr.is_none() {
            return Err(anyhow!("unit {} is not open", self.element));
        }
        Ok(())
    }

    // ----- фиксация и восстановление -----

    /// Сбросить все грязные страницы трёх файлов и зафиксировать журналы.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(leaf) = self.leaf.as_mut() {
            leaf.flush_all()?;
        }
        if let Some(ovr) = self.ovr.as_mut() {
            ovr.flush_all()?;
        }
        if let Some(btr) = self.btr.as_mut() {
            btr.flush()?;
        }
        Ok(())
    }

    /// Отбросить несброшенные изменения всех трёх файлов.
    pub fn recover_all_pages(&mut self) -> Result<()> {
        if let Some(leaf) = self.leaf.as_mut() {
            leaf.recover_all()?;
        }
        if let Some(ovr) = self.ovr.as_mut() {
            ovr.recover_all()?;
        }
        if let Some(btr) = self.btr.as_mut() {
            btr.recover()?;
        }
        self.logs.clear();
        Ok(())
    }

    /// Опустошить кэши страниц.
    pub fn detach_all_pages(&mut self) {
        if let Some(leaf) = self.leaf.as_mut() {
            leaf.detach_all();
        }
        if let Some(ovr) = self.ovr.as_mut() {
            ovr.detach_all();
        }
    }

    /// Восстановление на момент времени (хостовый журнал операций
    /// проигрывает остальное): откат к последнему flush.
    pub fn recover(&mut self, timestamp: u64) -> Result<()> {
        debug!("unit {} recover to ts {}", self.element, timestamp);
        self.recover_all_pages()
    }

    /// Восстановление для читающей транзакции той же точки.
    pub fn restore(&mut self, timestamp: u64) -> Result<()> {
        debug!("unit {} restore to ts {}", self.element, timestamp);
        self.recover_all_pages()
    }

    /// Синхронизация: флаги изменённости/незавершённости ИЛИ-ятся.
    pub fn sync(&mut self, incomplete: &mut bool, modified: &mut bool) -> Result<()> {
        let dirty = self.leaf.as_ref().map(|l| l.is_dirty()).unwrap_or(false)
            || self.ovr.as_ref().map(|o| o.is_dirty()).unwrap_or(false)
            || self.btr.as_ref().map(|b| b.is_dirty()).unwrap_or(false);
        if dirty {
            *modified = true;
            self.flush()?;
        }
        let _ = incomplete;
        Ok(())
    }

    // ----- бэкап -----

    /// Начало бэкапа атомарно по трём файлам: частичный сбой
    /// откатывается, при неудаче отката юнит помечается недоступным.
    pub fn start_backup(&mut self, restorable: bool) -> Result<()> {
        let _ = restorable;
        match self.flush() {
            Ok(()) => Ok(()),
            Err(e) => {
                if let Err(re) = self.recover_all_pages() {
                    warn!("unit {} backup rollback failed: {:#}", self.element, re);
                    self.set_unavailable();
                    return Err(anyhow::Error::new(Unavailable).context(e));
                }
                Err(e)
            }
        }
    }

    pub fn end_backup(&mut self) -> Result<()> {
        Ok(())
    }

    // ----- перенос и очистка -----

    /// Атомарный перенос трёх файлов; при сбое уже перенесённые
    /// возвращаются назад, неудача отката помечает базу недоступной.
    pub fn move_to(&mut self, new_dir: &Path) -> Result<()> {
        self.flush()?;
        std::fs::create_dir_all(new_dir)
            .with_context(|| format!("create target dir {}", new_dir.display()))?;

        let mut moved: Vec<(PathBuf, PathBuf)> = Vec::new();
        let plan = [
            (self.btr_path(), new_dir.join(BTR_FILE)),
            (self.leaf_path(), new_dir.join(LEAF_FILE)),
            (self.ovr_path(), new_dir.join(OVR_FILE)),
        ];
        let mut failure: Option<anyhow::Error> = None;
        for (i, (from, to)) in plan.iter().enumerate() {
            let res = match i {
                0 => self.btr.as_mut().map(|f| f.move_to(to)).unwrap_or_else(|| {
                    std::fs::rename(from, to).map_err(Into::into)
                }),
                1 => self.leaf.as_mut().map(|f| f.move_to(to)).unwrap_or_else(|| {
                    std::fs::rename(from, to).map_err(Into::into)
                }),
                _ => self.ovr.as_mut().map(|f| f.move_to(to)).unwrap_or_else(|| {
                    std::fs::rename(from, to).map_err(Into::into)
                }),
            };
            match res {
                Ok(()) => moved.push((from.clone(), to.clone())),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = failure {
            // откат перенесённого
            for (from, to) in moved.into_iter().rev() {
                if let Err(re) = std::fs::rename(&to, &from) {
                    warn!(
                        "unit {} move rollback {} -> {} failed: {}",
                        self.element,
                        to.display(),
                        from.display(),
                        re
                    );
                    self.set_unavailable();
                    return Err(anyhow::Error::new(Unavailable).context(e));
                }
            }
            return Err(e);
        }

        let old = std::mem::replace(&mut self.path, new_dir.to_path_buf());
        let _ = std::fs::remove_dir(&old);
        Ok(())
    }

    /// Очистить юнит до пустого состояния; якорная область
    /// восстанавливается.
    pub fn clear(&mut self, force: bool) -> Result<()> {
        let _ = force;
        self.require_open()?;
        let btr = self.btr.as_mut().expect("open");
        btr.clear()?;
        self.leaf.as_mut().expect("open").clear(btr)?;
        self.ovr.as_mut().expect("open").clear()?;
        self.logs.clear();
        self.flush()
    }

    // ----- проверка целостности -----

    /// Начать проверку: приёмник находок с заданным treatment.
    pub fn start_verification(&mut self, treatment: u32) -> crate::verify::Progress {
        crate::verify::Progress::new(treatment)
    }

    /// Полная проверка юнита.
    pub fn verify(&mut self, progress: &mut crate::verify::Progress) -> Result<()> {
        crate::verify::verify_unit(self, progress)
    }

    /// Проверка только ключевой карты.
    pub fn verify_btree(&mut self, progress: &mut crate::verify::Progress) -> Result<()> {
        crate::verify::verify_btree(self, progress)
    }

    pub fn end_verification(&mut self) {
        self.cancel.store(false, Ordering::Relaxed);
    }

    // ----- маркер недоступности -----

    fn unavailable_marker(&self) -> PathBuf {
        self.db_root.join(UNAVAILABLE_FILE)
    }

    pub fn set_unavailable(&self) {
        let _ = std::fs::write(self.unavailable_marker(), b"unit failure\n");
    }

    // ----- журналы удалений -----

    pub fn enter_delete_id_block(&self, key: &[u16], first_document_id: DocumentId) {
        self.logs.enter_delete_id_block(key, first_document_id);
    }

    pub fn enter_expunge_first_document_id(
        &self,
        key: &[u16],
        old_id: DocumentId,
        new_id: DocumentId,
    ) {
        self.logs.enter_expunge_first_document_id(key, old_id, new_id);
    }

    pub fn get_expunge_first_document_id(&self, key: &[u16], old_id: DocumentId) -> DocumentId {
        self.logs.get_expunge_first_document_id(key, old_id)
    }

    // ----- ключевая карта (B-дерево хоста) -----

    pub fn insert_btree(&mut self, key: &[u16], page_id: u32) -> Result<()> {
        self.btr_mut()?.insert(key, page_id);
        Ok(())
    }

    pub fn expunge_btree(&mut self, key: &[u16]) -> Result<()> {
        self.btr_mut()?.expunge(key);
        Ok(())
    }

    pub fn update_btree(
        &mut self,
        old_key: &[u16],
        old_page: u32,
        new_key: &[u16],
        new_page: u32,
    ) -> Result<()> {
        self.btr_mut()?.update(old_key, old_page, new_key, new_page);
        Ok(())
    }

    pub fn search_btree(&self, key: &[u16]) -> Option<u32> {
        self.btr.as_ref().and_then(|b| b.search(key))
    }

    // ----- счётчики и карта документов -----

    pub fn get_count(&self) -> u32 {
        self.btr.as_ref().map(|b| b.document_count()).unwrap_or(0)
    }

    pub fn get_last_document_id(&self) -> DocumentId {
        self.btr.as_ref().map(|b| b.last_document_id()).unwrap_or(0)
    }

    pub fn convert_to_row_id(&self, doc: DocumentId) -> RowId {
        self.btr
            .as_ref()
            .map(|b| b.convert_to_row_id(doc))
            .unwrap_or(crate::types::UNDEFINED_ROW_ID)
    }

    pub fn convert_to_document_id(&self, row: RowId) -> DocumentId {
        self.btr
            .as_ref()
            .map(|b| b.convert_to_document_id(row))
            .unwrap_or(crate::types::UNDEFINED_DOCUMENT_ID)
    }

    pub fn assign_document_id(&mut self, row: RowId) -> Result<DocumentId> {
        self.btr_mut()?.assign_document_id(row)
    }

    pub fn unassign_document_id(&mut self, doc: DocumentId) -> Result<()> {
        self.btr_mut()?.unassign_document_id(doc);
        Ok(())
    }

    // ----- размеры -----

    pub fn size(&self) -> Result<u64> {
        let mut total = 0u64;
        for p in [self.btr_path(), self.leaf_path(), self.ovr_path()] {
            if p.exists() {
                total += std::fs::metadata(&p)?.len();
            }
        }
        Ok(total)
    }

    pub fn used_size(&mut self) -> Result<u64> {
        self.require_open()?;
        let mut total = self.btr.as_ref().expect("open").size()?;
        total += self.leaf.as_mut().expect("open").used_size()?;
        total += self.ovr.as_mut().expect("open").used_size()?;
        Ok(total)
    }

    // ----- операции списков -----

    /// Менеджер списков для одного ключа.
    pub fn list_manager(&mut self, key: &[u16]) -> Result<ListManager<'_>> {
        self.require_open()?;
        let id_block_units = self.cfg.id_block_units_for(key) as usize;
        let cx = ListContext {
            leaf: self.leaf.as_mut().expect("open"),
            ovr: self.ovr.as_mut().expect("open"),
            btr: self.btr.as_mut().expect("open"),
            codec: &self.codec,
            logs: &self.logs,
            cancel: self.cancel.as_ref(),
            key: key.to_vec(),
            id_block_units,
        };
        Ok(ListManager::new(cx))
    }

    pub fn codec(&self) -> &ListCodec {
        &self.codec
    }

    /// Позиции не хранятся.
    pub fn is_no_location(&self) -> bool {
        self.codec.no_location
    }

    /// Ни позиции, ни TF не хранятся.
    pub fn is_no_tf(&self) -> bool {
        self.codec.no_tf
    }

    pub fn config(&self) -> &IndexConfig {
        &self.cfg
    }

    /// Применить накопленные заявки на вычистку IDBlock-ов (vacuum).
    pub fn apply_pending_deletes(&mut self) -> Result<usize> {
        let pending = self.logs.take_delete_id_blocks();
        let mut reclaimed = 0usize;
        for (key, first_ids) in pending {
            let mut lm = self.list_manager(&key)?;
            reclaimed += lm.expunge_id_blocks(&first_ids)?;
        }
        Ok(reclaimed)
    }

    /// Снести области опустевших списков (vacuum). Якорная область
    /// пустого ключа не трогается; у Middle-списка освобождается его
    /// якорная LOC-страница.
    pub fn compact_empty_areas(&mut self) -> Result<usize> {
        use crate::consts::{LIST_TYPE_SHORT, NO_PAGE};
        use crate::leaf::area;

        self.require_open()?;
        let mut removed = 0usize;
        let mut page_id = self.leaf.as_ref().expect("open").first_page_id();
        while page_id != NO_PAGE {
            loop {
                let (leaf, btr, ovr) = match (
                    self.leaf.as_mut(),
                    self.btr.as_mut(),
                    self.ovr.as_mut(),
                ) {
                    (Some(l), Some(b), Some(o)) => (l, b, o),
                    _ => return Err(anyhow!("unit not open")),
                };
                let mut page = leaf.attach(page_id)?;
                let next = page.next_page_id();
                let victim = (0..page.area_count()).find(|&i| {
                    let off = page.area_off(i);
                    area::key_len(&page.image, off) > 0
                        && area::document_count(&page.image, off) == 0
                });
                match victim {
                    Some(i) => {
                        let off = page.area_off(i);
                        if area::list_type(&page.image, off) != LIST_TYPE_SHORT {
                            let anchor = area::last_location_page_id(&page.image, off);
                            if anchor != NO_PAGE && anchor != 0 {
                                ovr.free_page(anchor)?;
                            }
                        }
                        let was_last = page.area_count() == 1;
                        leaf.expunge_area(btr, &mut page, i)?;
                        removed += 1;
                        if was_last {
                            page_id = next;
                            break;
                        }
                    }
                    None => {
                        page_id = next;
                        break;
                    }
                }
            }
        }
        Ok(removed)
    }

    /// Голова листовой цепочки (для обходов verify/merge).
    pub fn first_leaf_page_id(&self) -> Result<u32> {
        self.require_open()?;
        Ok(self.leaf.as_ref().expect("open").first_page_id())
    }

    pub fn leaf_mut(&mut self) -> Result<&mut LeafFile> {
        self.require_open()?;
        Ok(self.leaf.as_mut().expect("open"))
    }

    pub fn btr_ref(&self) -> Result<&BtrFile> {
        self.require_open()?;
        Ok(self.btr.as_ref().expect("open"))
    }
}
