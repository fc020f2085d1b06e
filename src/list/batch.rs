//! Batch-список: буфер записи в памяти с тем же начертанием области,
//! что и Short, но на анонимной куче. Идентификаторы документов хранятся
//! относительно последнего id юнита на момент старта батча; абсолютными
//! они становятся при свёртке merge-демоном.
//!
//! Переполненный batch-список не конвертируется: карта заводит следующий
//! список того же ключа (свёртка проигрывает их по порядку).

use std::collections::BTreeMap;

use super::{ListCodec, ListInsert};
use crate::coder::bitops;
use crate::config::IndexConfig;
use crate::consts::LIST_TYPE_BATCH;
use crate::leaf::area;
use crate::types::{DocumentId, LocationList};

pub struct BatchList {
    /// Образ области со смещением 0.
    image: Vec<u32>,
}

impl BatchList {
    pub fn new(cfg: &IndexConfig, key: &[u16]) -> Self {
        let data_units = cfg.batch_initial_units as usize;
        let total = area::calc_area_unit_size(key.len(), data_units);
        let mut image = vec![0u32; total];
        area::init(&mut image, 0, key, data_units, LIST_TYPE_BATCH);
        Self { image }
    }

    pub fn image(&self) -> &[u32] {
        &self.image
    }

    pub fn document_count(&self) -> u32 {
        area::document_count(&self.image, 0)
    }

    pub fn first_document_id(&self) -> DocumentId {
        area::first_document_id(&self.image, 0)
    }

    pub fn last_document_id(&self) -> DocumentId {
        area::last_document_id(&self.image, 0)
    }

    /// Слов в образе (учёт кучи картой батчей).
    pub fn unit_size(&self) -> usize {
        self.image.len()
    }

    /// Вставка документа с относительным id. Full — упёрлись в потолок
    /// batch_max_units.
    pub fn insert(
        &mut self,
        codec: &ListCodec,
        cfg: &IndexConfig,
        doc_rel: DocumentId,
        locs: &LocationList,
    ) -> ListInsert {
        let (loc_bits, data_bits) = codec.bits_location_list(locs);
        let last = area::last_document_id(&self.image, 0);
        let id_bits = if last != 0 {
            codec.bits_document_id(last, doc_rel)
        } else {
            0
        };
        let total = area::document_offset(&self.image, 0)
            + id_bits
            + area::location_offset(&self.image, 0)
            + loc_bits;
        let need_units = (total + 31) / 32;
        let have_units = area::data_units(&self.image, 0);
        if need_units > have_units && !self.expand(cfg, need_units) {
            return ListInsert::Full;
        }

        if last == 0 {
            area::set_first_document_id(&mut self.image, 0, doc_rel);
        } else {
            let mut off = area::document_offset(&self.image, 0);
            let r = area::data_range(&self.image, 0);
            codec.write_document_id(last, doc_rel, &mut self.image[r], &mut off);
            area::set_document_offset(&mut self.image, 0, off);
        }
        {
            let mut off = area::location_offset(&self.image, 0);
            let r = area::data_range(&self.image, 0);
            codec.write_location_list(locs, data_bits, &mut self.image[r], &mut off);
            area::set_location_offset(&mut self.image, 0, off);
        }
        area::set_last_document_id(&mut self.image, 0, doc_rel);
        area::increment_document_count(&mut self.image, 0);
        ListInsert::Done
    }

    // Рост data-региона до need_units (шагами batch_regular_units,
    // потолок batch_max_units); задний поток переезжает к новому хвосту.
    fn expand(&mut self, cfg: &IndexConfig, need_units: usize) -> bool {
        let cur = area::data_units(&self.image, 0);
        let max = cfg.batch_max_units as usize;
        if need_units > max {
            return false;
        }
        let target = need_units
            .max(cur + cfg.batch_regular_units as usize)
            .min(max);
        let grow = target - cur;

        let old_len = self.image.len();
        self.image.resize(old_len + grow, 0);
        area::set_unit_size(&mut self.image, 0, old_len + grow);

        let doc_bits = area::document_offset(&self.image, 0);
        if doc_bits > 0 {
            let r = area::data_range(&self.image, 0);
            let buf = &mut self.image[r];
            bitops::move_bits_back(buf, 0, grow * 32, doc_bits);
            bitops::set_off_back(buf, doc_bits, grow * 32);
        }
        true
    }
}

/// Карта батчей юнита: ключ -> списки в порядке создания.
pub struct BatchListMap {
    /// Последний id юнита на момент старта карты: относительные id
    /// батчей становятся абсолютными прибавлением base.
    pub base: DocumentId,
    lists: BTreeMap<Vec<u16>, Vec<BatchList>>,
    entries: usize,
    heap_units: usize,
}

impl BatchListMap {
    pub fn new(base: DocumentId) -> Self {
        Self {
            base,
            lists: BTreeMap::new(),
            entries: 0,
            heap_units: 0,
        }
    }

    /// Число вставленных постингов (порог пробуждения демона).
    pub fn entry_count(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    /// Суммарный размер образов в словах.
    pub fn heap_units(&self) -> usize {
        self.heap_units
    }

    pub fn insert(
        &mut self,
        codec: &ListCodec,
        cfg: &IndexConfig,
        key: &[u16],
        doc_rel: DocumentId,
        locs: &LocationList,
    ) {
        let lists = self.lists.entry(key.to_vec()).or_default();
        if lists.is_empty() {
            let l = BatchList::new(cfg, key);
            self.heap_units += l.unit_size();
            lists.push(l);
        }
        let last = lists.last_mut().expect("at least one batch list");
        let before = last.unit_size();
        match last.insert(codec, cfg, doc_rel, locs) {
            ListInsert::Done => {
                self.heap_units += last.unit_size() - before;
            }
            ListInsert::Full => {
                let mut fresh = BatchList::new(cfg, key);
                let done = fresh.insert(codec, cfg, doc_rel, locs);
                debug_assert_eq!(done, ListInsert::Done);
                self.heap_units += fresh.unit_size();
                lists.push(fresh);
            }
        }
        self.entries += 1;
    }

    /// Отсортированный по ключу обход для свёртки.
    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u16>, &Vec<BatchList>)> {
        self.lists.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::key_from_str;

    fn codec() -> ListCodec {
        ListCodec::from_config(&IndexConfig::default())
    }

    #[test]
    fn batch_roundtrip() {
        let cfg = IndexConfig::default();
        let codec = codec();
        let key = key_from_str("term");
        let mut list = BatchList::new(&cfg, &key);
        for d in 1..=100u32 {
            let locs = LocationList::new(vec![d, d + 3]);
            assert_eq!(list.insert(&codec, &cfg, d, &locs), ListInsert::Done);
        }
        assert_eq!(list.document_count(), 100);
        assert_eq!(list.first_document_id(), 1);
        assert_eq!(list.last_document_id(), 100);

        let postings = crate::list::short::read_postings(&codec, list.image(), 0, 10);
        assert_eq!(postings.len(), 100);
        assert_eq!(postings[0].0, 11);
        assert_eq!(postings[99].0, 110);
        assert_eq!(postings[4].1.as_slice(), &[5, 8]);
    }

    #[test]
    fn map_rolls_over_on_full() {
        let cfg = IndexConfig::default().with_batch_units(4, 4, 8);
        let codec = codec();
        let mut map = BatchListMap::new(0);
        let key = key_from_str("x");
        for d in 1..=2000u32 {
            map.insert(&codec, &cfg, &key, d, &LocationList::new(vec![1]));
        }
        let (_, lists) = map.iter().next().unwrap();
        assert!(lists.len() > 1, "tiny cap must roll to a second list");
        let total: u32 = lists.iter().map(|l| l.document_count()).sum();
        assert_eq!(total, 2000);
        assert_eq!(map.entry_count(), 2000);
    }
}
