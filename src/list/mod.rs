//! Семейство постинг-листов: Short / Middle(Long) / Batch.
//!
//! Список — значение, параметризованное позицией (страница + индекс
//! области) и контекстом юнита; долгоживущих ссылок на страницы нет.
//! Переполнение варианта — не ошибка: insert возвращает
//! ListInsert::Full, вызывающий делает convert и повторяет.
//!
//! ListCodec собирает четыре кодера и режимы полезной нагрузки
//! (no_location / no_tf) и даёт общие помощники чтения/записи
//! разностей документов и позиционных данных.

pub mod batch;
pub mod middle;
pub mod short;

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::btree::BtrFile;
use crate::coder::Coder;
use crate::config::IndexConfig;
use crate::consts::{LIST_TYPE_BATCH, LIST_TYPE_LONG, LIST_TYPE_MIDDLE, LIST_TYPE_SHORT};
use crate::error::Cancelled;
use crate::leaf::{page::LeafPage, LeafFile};
use crate::overflow::OverflowFile;
use crate::types::{DocumentId, LocationList, UNDEFINED_DOCUMENT_ID};

/// Исход вставки в список фиксированного варианта.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListInsert {
    Done,
    /// Вариант переполнен: нужен convert и повтор.
    Full,
}

/// Читаемое имя типа списка по битам заголовка области.
pub fn list_type_name(t: u32) -> &'static str {
    match t {
        LIST_TYPE_SHORT => "short",
        LIST_TYPE_MIDDLE => "middle",
        LIST_TYPE_LONG => "long",
        LIST_TYPE_BATCH => "batch",
        _ => "?",
    }
}

/// Кодеры четырёх потоков + режимы полезной нагрузки.
#[derive(Debug, Clone)]
pub struct ListCodec {
    pub id: Coder,
    pub frequency: Coder,
    pub length: Coder,
    pub location: Coder,
    pub no_location: bool,
    pub no_tf: bool,
}

impl ListCodec {
    pub fn from_config(cfg: &IndexConfig) -> Self {
        Self {
            id: cfg.id_coder,
            frequency: cfg.frequency_coder,
            length: cfg.length_coder,
            location: cfg.location_coder,
            no_location: cfg.no_location || cfg.no_tf,
            no_tf: cfg.no_tf,
        }
    }

    // ----- битовые длины -----

    pub fn bits_document_id(&self, last: DocumentId, id: DocumentId) -> usize {
        debug_assert!(id > last);
        self.id.bits_for(id - last)
    }

    pub fn bits_frequency(&self, frequency: u32) -> usize {
        self.frequency.bits_for(frequency)
    }

    pub fn bits_bit_length(&self, bits: usize) -> usize {
        self.length.bits_for(bits as u32)
    }

    pub fn bits_location(&self, last: u32, loc: u32) -> usize {
        debug_assert!(loc > last);
        self.location.bits_for(loc - last)
    }

    /// Битовая длина данных позиций (без частоты и длины).
    pub fn bits_location_data(&self, locs: &LocationList) -> usize {
        let mut last = 0u32;
        let mut bits = 0usize;
        for loc in locs.iter() {
            bits += self.bits_location(last, loc);
            last = loc;
        }
        bits
    }

    /// Полная битовая длина позиционной записи одного документа и
    /// отдельно длина данных позиций.
    /// - no_location: только частота;
    /// - no_tf: ничего.
    pub fn bits_location_list(&self, locs: &LocationList) -> (usize, usize) {
        if self.no_tf {
            return (0, 0);
        }
        // в позиционном режиме запись частоты 1 без разности некодируема
        debug_assert!(self.no_location || !locs.is_empty());
        let frequency = locs.size().max(1);
        if self.no_location {
            return (self.bits_frequency(frequency), 0);
        }
        let data_bits = self.bits_location_data(locs);
        let mut total = self.bits_frequency(frequency) + data_bits;
        if frequency > 1 {
            total += self.bits_bit_length(data_bits);
        }
        (total, data_bits)
    }

    // ----- чтение/запись разностей документов (задний поток) -----

    /// Прочитать один id из заднего потока; Undefined на границе.
    pub fn read_document_id(
        &self,
        last: DocumentId,
        tail: &[u32],
        total_bits: usize,
        off: &mut usize,
    ) -> DocumentId {
        match self.id.get_back(tail, total_bits, off) {
            Some(gap) => last + gap,
            None => UNDEFINED_DOCUMENT_ID,
        }
    }

    /// Записать id как разность от last в задний поток.
    pub fn write_document_id(
        &self,
        last: DocumentId,
        id: DocumentId,
        tail: &mut [u32],
        off: &mut usize,
    ) {
        debug_assert!(id > last);
        #[cfg(debug_assertions)]
        let save = *off;
        self.id.append_back(id - last, tail, off);
        #[cfg(debug_assertions)]
        {
            let mut check = save;
            debug_assert_eq!(self.id.get_back(tail, *off, &mut check), Some(id - last));
        }
    }

    // ----- чтение/запись позиционной записи (прямой поток) -----

    pub fn read_location_frequency(
        &self,
        head: &[u32],
        total_bits: usize,
        off: &mut usize,
    ) -> u32 {
        self.frequency.get(head, total_bits, off).unwrap_or(0)
    }

    pub fn read_location_bit_length(
        &self,
        head: &[u32],
        total_bits: usize,
        off: &mut usize,
    ) -> usize {
        self.length.get(head, total_bits, off).unwrap_or(0) as usize
    }

    pub fn read_location_data(
        &self,
        last: u32,
        head: &[u32],
        total_bits: usize,
        off: &mut usize,
    ) -> u32 {
        last + self.location.get(head, total_bits, off).unwrap_or(0)
    }

    pub fn write_location_frequency(&self, frequency: u32, head: &mut [u32], off: &mut usize) {
        self.frequency.append(frequency, head, off);
    }

    pub fn write_location_bit_length(&self, bits: usize, head: &mut [u32], off: &mut usize) {
        self.length.append(bits as u32, head, off);
    }

    pub fn write_location_data(&self, last: u32, loc: u32, head: &mut [u32], off: &mut usize) {
        debug_assert!(loc > last);
        self.location.append(loc - last, head, off);
    }

    /// Записать позиции начиная с locs[start], не превышая max_bits
    /// (если задан). Возвращает (последняя записанная позиция, сколько
    /// позиций записано).
    pub fn write_location_run(
        &self,
        mut last: u32,
        locs: &[u32],
        start: usize,
        head: &mut [u32],
        off: &mut usize,
        max_bits: Option<usize>,
    ) -> (u32, usize) {
        let mut written = 0usize;
        for &loc in &locs[start..] {
            let bits = self.bits_location(last, loc);
            if let Some(max) = max_bits {
                if *off + bits > max {
                    break;
                }
            }
            self.write_location_data(last, loc, head, off);
            last = loc;
            written += 1;
        }
        (last, written)
    }

    /// Записать полную позиционную запись одного документа
    /// (частота, [длина данных], разности позиций) с учётом режима.
    pub fn write_location_list(
        &self,
        locs: &LocationList,
        data_bits: usize,
        head: &mut [u32],
        off: &mut usize,
    ) {
        if self.no_tf {
            return;
        }
        let frequency = locs.size().max(1);
        self.write_location_frequency(frequency, head, off);
        if self.no_location {
            return;
        }
        if frequency > 1 {
            self.write_location_bit_length(data_bits, head, off);
        }
        let mut last = 0u32;
        for loc in locs.iter() {
            self.write_location_data(last, loc, head, off);
            last = loc;
        }
    }
}

/// Журналы незавершённых удалений юнита.
///
/// - delete_id_blocks: IDBlock-и, ставшие недостижимыми; страницы
///   вычищаются после фиксации логического удаления (vacuum/flush);
/// - first_id_rewrites: журнал переписывания первого id блока,
///   (ключ, старый id) -> новый id; нужен undo-путям.
#[derive(Default)]
pub struct ExpungeLogs {
    delete_id_blocks: Mutex<BTreeMap<Vec<u16>, Vec<DocumentId>>>,
    first_id_rewrites: Mutex<BTreeMap<(Vec<u16>, DocumentId), DocumentId>>,
}

impl ExpungeLogs {
    pub fn enter_delete_id_block(&self, key: &[u16], first_document_id: DocumentId) {
        self.delete_id_blocks
            .lock()
            .entry(key.to_vec())
            .or_default()
            .push(first_document_id);
    }

    pub fn enter_expunge_first_document_id(
        &self,
        key: &[u16],
        old_id: DocumentId,
        new_id: DocumentId,
    ) {
        self.first_id_rewrites
            .lock()
            .insert((key.to_vec(), old_id), new_id);
    }

    /// Новый первый id для (ключ, старый id); Undefined, если записи нет.
    pub fn get_expunge_first_document_id(&self, key: &[u16], old_id: DocumentId) -> DocumentId {
        self.first_id_rewrites
            .lock()
            .get(&(key.to_vec(), old_id))
            .copied()
            .unwrap_or(UNDEFINED_DOCUMENT_ID)
    }

    /// Забрать накопленные заявки на удаление IDBlock-ов.
    pub fn take_delete_id_blocks(&self) -> BTreeMap<Vec<u16>, Vec<DocumentId>> {
        std::mem::take(&mut self.delete_id_blocks.lock())
    }

    /// Сброс журналов на границе транзакции.
    pub fn clear(&self) {
        self.delete_id_blocks.lock().clear();
        self.first_id_rewrites.lock().clear();
    }
}

/// Контекст операций списка: файлы юнита, кодек, журналы, отмена.
pub struct ListContext<'a> {
    pub leaf: &'a mut LeafFile,
    pub ovr: &'a mut OverflowFile,
    pub btr: &'a mut BtrFile,
    pub codec: &'a ListCodec,
    pub logs: &'a ExpungeLogs,
    pub cancel: &'a AtomicBool,
    pub key: Vec<u16>,
    /// Data-юниты IDBlock для этого ключа.
    pub id_block_units: usize,
}

impl<'a> ListContext<'a> {
    pub fn check_cancel(&self) -> anyhow::Result<()> {
        if self.cancel.load(Ordering::Relaxed) {
            Err(anyhow::Error::new(Cancelled))
        } else {
            Ok(())
        }
    }
}

/// Позиция списка: рабочая копия листовой страницы + индекс области.
/// exists == false — области ещё нет, area_idx хранит точку вставки.
pub struct ListPosition {
    pub page: LeafPage,
    pub area_idx: usize,
    pub exists: bool,
}

impl ListPosition {
    pub fn area_off(&self) -> usize {
        self.page.area_off(self.area_idx)
    }
}
