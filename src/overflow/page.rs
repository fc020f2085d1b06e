//! Страница переполнения: ID / LOC / IDLOC.
//!
//! Layout (в u32-юнитах):
//!   w0 [kind u8 | id_block_count u16 << 8]
//!   w1 next_page_id            -- продолжение LOC-цепочки
//!   w2 [used_units u16 | loc_block_count u16 << 16]
//!   w3 id_live_bitmap          -- живые ID-слоты
//!   bitmap[B]                  -- занятость data-юнитов
//!   data[data_units]
//!
//! ID-слоты нарезаются от головы data-региона append-only (порядок слотов
//! совпадает с порядком first_document_id — внутри страницы живут блоки
//! одного терма); их место не переиспользуется до освобождения страницы
//! целиком. LOC-блоки размещаются first-fit по unit-bitmap: на IDLOC —
//! с хвоста региона, на LOC — с головы.
//!
//! IDBlock-заголовок (3 слова) используется и для встроенного последнего
//! блока Middle-области, поэтому его аксессоры — свободные функции над
//! (буфер, смещение).

use anyhow::{anyhow, Result};

use crate::consts::{
    DOC_ID_MASK, EXPUNGE_MASK, ID_BLOCK_HDR_UNITS, LOC_BLOCK_HDR_UNITS, LOC_CONTINUE_BIT,
    LOC_UNIT_SIZE_MASK, OVR_HDR_UNITS, OVR_KIND_ID, OVR_KIND_IDLOC, OVR_KIND_LOC,
    OVR_MAX_ID_SLOTS, OVR_OFF_ID_BITMAP, OVR_OFF_KIND, OVR_OFF_NEXT, OVR_OFF_USED,
};
use crate::types::{DocumentId, UNDEFINED_DOCUMENT_ID};

// ----- IDBlock-заголовок: свободные аксессоры -----

pub fn idb_first_document_id(buf: &[u32], off: usize) -> DocumentId {
    buf[off] & DOC_ID_MASK
}

pub fn idb_set_first_document_id(buf: &mut [u32], off: usize, id: DocumentId) {
    buf[off] = (buf[off] & EXPUNGE_MASK) | (id & DOC_ID_MASK);
}

pub fn idb_is_expunged(buf: &[u32], off: usize) -> bool {
    buf[off] & EXPUNGE_MASK != 0
}

pub fn idb_set_expunged(buf: &mut [u32], off: usize) {
    buf[off] |= EXPUNGE_MASK;
}

pub fn idb_unset_expunged(buf: &mut [u32], off: usize) {
    buf[off] &= !EXPUNGE_MASK;
}

pub fn idb_loc_page_id(buf: &[u32], off: usize) -> u32 {
    buf[off + 1]
}

pub fn idb_loc_offset(buf: &[u32], off: usize) -> usize {
    (buf[off + 2] & 0xFFFF) as usize
}

pub fn idb_set_loc_position(buf: &mut [u32], off: usize, page_id: u32, unit_off: usize) {
    buf[off + 1] = page_id;
    buf[off + 2] = unit_off as u32 & 0xFFFF;
}

/// Диапазон data-слов IDBlock (задний битовый поток разностей).
pub fn idb_data_range(off: usize, id_units: usize) -> std::ops::Range<usize> {
    off + ID_BLOCK_HDR_UNITS..off + ID_BLOCK_HDR_UNITS + id_units
}

// ----- LocBlock-заголовок -----

pub fn locb_is_continue(buf: &[u32], off: usize) -> bool {
    buf[off] & LOC_CONTINUE_BIT != 0
}

pub fn locb_set_continue(buf: &mut [u32], off: usize, on: bool) {
    if on {
        buf[off] |= LOC_CONTINUE_BIT;
    } else {
        buf[off] &= !LOC_CONTINUE_BIT;
    }
}

pub fn locb_data_units(buf: &[u32], off: usize) -> usize {
    (buf[off] & LOC_UNIT_SIZE_MASK) as usize
}

pub fn locb_set_data_units(buf: &mut [u32], off: usize, n: usize) {
    buf[off] = (buf[off] & !LOC_UNIT_SIZE_MASK) | (n as u32 & LOC_UNIT_SIZE_MASK);
}

pub fn locb_data_bit_length(buf: &[u32], off: usize) -> usize {
    buf[off + 1] as usize
}

pub fn locb_set_data_bit_length(buf: &mut [u32], off: usize, bits: usize) {
    buf[off + 1] = bits as u32;
}

/// Диапазон data-слов LocBlock (прямой битовый поток позиций).
pub fn locb_data_range(buf: &[u32], off: usize) -> std::ops::Range<usize> {
    off + LOC_BLOCK_HDR_UNITS..off + LOC_BLOCK_HDR_UNITS + locb_data_units(buf, off)
}

// ----- страница -----

#[derive(Clone)]
pub struct OverflowPage {
    pub page_id: u32,
    pub image: Vec<u32>,
}

impl OverflowPage {
    pub fn new(page_id: u32, page_units: usize, kind: u8) -> Self {
        let mut image = vec![0u32; page_units];
        image[OVR_OFF_KIND] = kind as u32;
        image[OVR_OFF_NEXT] = crate::consts::NO_PAGE;
        Self { page_id, image }
    }

    pub fn from_image(page_id: u32, image: Vec<u32>) -> Result<Self> {
        let kind = (image[OVR_OFF_KIND] & 0xFF) as u8;
        if !matches!(kind, OVR_KIND_ID | OVR_KIND_LOC | OVR_KIND_IDLOC) {
            return Err(anyhow!("overflow page {}: bad kind {}", page_id, kind));
        }
        Ok(Self { page_id, image })
    }

    pub fn kind(&self) -> u8 {
        (self.image[OVR_OFF_KIND] & 0xFF) as u8
    }

    pub fn set_kind(&mut self, kind: u8) {
        self.image[OVR_OFF_KIND] = (self.image[OVR_OFF_KIND] & !0xFF) | kind as u32;
    }

    pub fn next_page_id(&self) -> u32 {
        self.image[OVR_OFF_NEXT]
    }

    pub fn set_next_page_id(&mut self, id: u32) {
        self.image[OVR_OFF_NEXT] = id;
    }

    /// Число когда-либо нарезанных ID-слотов (high-water).
    pub fn id_block_count(&self) -> usize {
        ((self.image[OVR_OFF_KIND] >> 8) & 0xFFFF) as usize
    }

    fn set_id_block_count(&mut self, n: usize) {
        let w = &mut self.image[OVR_OFF_KIND];
        *w = (*w & !0x00FF_FF00) | ((n as u32 & 0xFFFF) << 8);
    }

    /// Число живых ID-слотов.
    pub fn live_id_block_count(&self) -> usize {
        self.image[OVR_OFF_ID_BITMAP].count_ones() as usize
    }

    pub fn is_id_slot_live(&self, slot: usize) -> bool {
        self.image[OVR_OFF_ID_BITMAP] & (1u32 << slot) != 0
    }

    pub fn loc_block_count(&self) -> usize {
        (self.image[OVR_OFF_USED] >> 16) as usize
    }

    fn set_loc_block_count(&mut self, n: usize) {
        let w = &mut self.image[OVR_OFF_USED];
        *w = (*w & 0xFFFF) | ((n as u32) << 16);
    }

    pub fn used_units(&self) -> usize {
        (self.image[OVR_OFF_USED] & 0xFFFF) as usize
    }

    fn set_used_units(&mut self, n: usize) {
        let w = &mut self.image[OVR_OFF_USED];
        *w = (*w & !0xFFFF) | (n as u32 & 0xFFFF);
    }

    // ----- геометрия -----

    /// Слов в unit-bitmap.
    pub fn bitmap_units(&self) -> usize {
        let avail = self.image.len() - OVR_HDR_UNITS;
        (avail + 32) / 33
    }

    /// Начало data-региона (абсолютное словное смещение).
    pub fn data_start(&self) -> usize {
        OVR_HDR_UNITS + self.bitmap_units()
    }

    /// Длина data-региона в юнитах.
    pub fn data_units(&self) -> usize {
        self.image.len() - self.data_start()
    }

    pub fn free_units(&self) -> usize {
        self.data_units() - self.used_units()
    }

    // бит i unit-bitmap: data-юнит i занят
    fn bitmap_get(&self, i: usize) -> bool {
        self.image[OVR_HDR_UNITS + i / 32] & (1u32 << (i % 32)) != 0
    }

    fn bitmap_set(&mut self, i: usize, v: bool) {
        let w = &mut self.image[OVR_HDR_UNITS + i / 32];
        if v {
            *w |= 1u32 << (i % 32);
        } else {
            *w &= !(1u32 << (i % 32));
        }
    }

    fn mark_run(&mut self, start: usize, len: usize, v: bool) {
        for i in start..start + len {
            self.bitmap_set(i, v);
        }
    }

    fn run_is_free(&self, start: usize, len: usize) -> bool {
        if start + len > self.data_units() {
            return false;
        }
        (start..start + len).all(|i| !self.bitmap_get(i))
    }

    // ----- ID-слоты -----

    pub fn id_slot_units(id_units: usize) -> usize {
        ID_BLOCK_HDR_UNITS + id_units
    }

    /// Абсолютное смещение ID-слота.
    pub fn id_slot_off(&self, slot: usize, id_units: usize) -> usize {
        self.data_start() + slot * Self::id_slot_units(id_units)
    }

    /// Нарезать следующий ID-слот; None, если страница исчерпана.
    pub fn allocate_id_block(&mut self, id_units: usize) -> Option<usize> {
        let slot = self.id_block_count();
        if slot >= OVR_MAX_ID_SLOTS {
            return None;
        }
        let su = Self::id_slot_units(id_units);
        let rel = slot * su;
        if !self.run_is_free(rel, su) {
            return None;
        }
        self.mark_run(rel, su, true);
        self.set_id_block_count(slot + 1);
        self.image[OVR_OFF_ID_BITMAP] |= 1u32 << slot;
        self.set_used_units(self.used_units() + su);
        let off = self.data_start() + rel;
        for w in self.image[off..off + su].iter_mut() {
            *w = 0;
        }
        Some(slot)
    }

    /// Погасить живость слота. Место не переиспользуется: страница
    /// возвращается во free-цепочку, когда гаснет последний слот.
    pub fn free_id_block(&mut self, slot: usize) {
        debug_assert!(slot < self.id_block_count());
        self.image[OVR_OFF_ID_BITMAP] &= !(1u32 << slot);
    }

    /// Floor-поиск слота по first_document_id: последний слот с
    /// first <= doc_id, с пропуском погашенных/удалённых вперёд
    /// (кроме undo). Поиск начинается со слота from (монотонный курсор).
    pub fn lower_bound_id_block(
        &self,
        doc_id: DocumentId,
        id_units: usize,
        from: usize,
        undo: bool,
    ) -> Option<usize> {
        let count = self.id_block_count();
        if from >= count {
            return None;
        }
        let mut lo = from;
        let mut hi = count;
        while lo < hi {
            let mid = (lo + hi) / 2;
            let first = idb_first_document_id(&self.image, self.id_slot_off(mid, id_units));
            if first <= doc_id {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        let mut slot = if lo > from { lo - 1 } else { from };
        if !undo {
            while slot < count
                && (idb_is_expunged(&self.image, self.id_slot_off(slot, id_units))
                    || !self.is_id_slot_live(slot))
            {
                slot += 1;
            }
            if slot >= count {
                return None;
            }
        }
        Some(slot)
    }

    /// Первый документ следующего слота (верхняя граница текущего).
    pub fn next_document_id(&self, slot: usize, id_units: usize) -> DocumentId {
        if slot + 1 < self.id_block_count() {
            idb_first_document_id(&self.image, self.id_slot_off(slot + 1, id_units))
        } else {
            UNDEFINED_DOCUMENT_ID
        }
    }

    // ----- LOC-блоки -----

    /// Разместить LocBlock с data-регионом data_units юнитов first-fit.
    /// Возвращает абсолютное смещение блока; None, если места нет.
    pub fn allocate_loc_block(&mut self, data_units: usize) -> Option<usize> {
        let need = LOC_BLOCK_HDR_UNITS + data_units;
        let total = self.data_units();
        if need > self.free_units() {
            return None;
        }
        // на IDLOC ищем с хвоста, чтобы не мешать росту ID-слотов
        let from_tail = self.kind() == OVR_KIND_IDLOC;
        let rel = if from_tail {
            (0..=total.saturating_sub(need))
                .rev()
                .find(|&s| self.run_is_free(s, need))?
        } else {
            (0..=total.saturating_sub(need)).find(|&s| self.run_is_free(s, need))?
        };
        self.mark_run(rel, need, true);
        self.set_loc_block_count(self.loc_block_count() + 1);
        self.set_used_units(self.used_units() + need);
        let off = self.data_start() + rel;
        for w in self.image[off..off + need].iter_mut() {
            *w = 0;
        }
        locb_set_data_units(&mut self.image, off, data_units);
        Some(off)
    }

    /// Освободить LocBlock по абсолютному смещению.
    pub fn free_loc_block(&mut self, off: usize) {
        let n = LOC_BLOCK_HDR_UNITS + locb_data_units(&self.image, off);
        let rel = off - self.data_start();
        self.mark_run(rel, n, false);
        for w in self.image[off..off + n].iter_mut() {
            *w = 0;
        }
        self.set_loc_block_count(self.loc_block_count() - 1);
        self.set_used_units(self.used_units() - n);
    }

    /// Нарастить data-регион LocBlock на extra юнитов, если место за
    /// блоком свободно.
    pub fn expand_loc_block(&mut self, off: usize, extra: usize) -> bool {
        let n = locb_data_units(&self.image, off);
        let rel_end = off + LOC_BLOCK_HDR_UNITS + n - self.data_start();
        if !self.run_is_free(rel_end, extra) {
            return false;
        }
        self.mark_run(rel_end, extra, true);
        for w in
            self.image[off + LOC_BLOCK_HDR_UNITS + n..off + LOC_BLOCK_HDR_UNITS + n + extra]
                .iter_mut()
        {
            *w = 0;
        }
        locb_set_data_units(&mut self.image, off, n + extra);
        self.set_used_units(self.used_units() + extra);
        true
    }

    /// Максимально возможное расширение LocBlock на этой странице.
    pub fn loc_block_expand_room(&self, off: usize) -> usize {
        let n = locb_data_units(&self.image, off);
        let mut rel = off + LOC_BLOCK_HDR_UNITS + n - self.data_start();
        let mut room = 0usize;
        while rel < self.data_units() && !self.bitmap_get(rel) {
            room += 1;
            rel += 1;
        }
        room
    }

    /// Страница полностью пуста (нечего в ней держать).
    pub fn is_idle(&self) -> bool {
        self.live_id_block_count() == 0 && self.loc_block_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::NO_PAGE;

    #[test]
    fn id_slots_append_only() {
        let mut p = OverflowPage::new(1, 256, OVR_KIND_ID);
        let id_units = 4;
        let s0 = p.allocate_id_block(id_units).unwrap();
        let s1 = p.allocate_id_block(id_units).unwrap();
        assert_eq!((s0, s1), (0, 1));
        let off0 = p.id_slot_off(0, id_units);
        idb_set_first_document_id(&mut p.image, off0, 10);
        let off1 = p.id_slot_off(1, id_units);
        idb_set_first_document_id(&mut p.image, off1, 20);

        assert_eq!(p.lower_bound_id_block(15, id_units, 0, false), Some(0));
        assert_eq!(p.lower_bound_id_block(20, id_units, 0, false), Some(1));
        assert_eq!(p.lower_bound_id_block(5, id_units, 0, false), Some(0));

        // погашенный слот пропускается вперёд
        idb_set_expunged(&mut p.image, off0);
        assert_eq!(p.lower_bound_id_block(15, id_units, 0, false), Some(1));
        assert_eq!(p.lower_bound_id_block(15, id_units, 0, true), Some(0));

        p.free_id_block(0);
        p.free_id_block(1);
        assert_eq!(p.live_id_block_count(), 0);
        assert!(p.is_idle());
    }

    #[test]
    fn loc_blocks_first_fit_and_reuse() {
        let mut p = OverflowPage::new(2, 256, OVR_KIND_LOC);
        assert_eq!(p.next_page_id(), NO_PAGE);
        let a = p.allocate_loc_block(8).unwrap();
        let b = p.allocate_loc_block(8).unwrap();
        assert!(b > a);
        let used = p.used_units();
        p.free_loc_block(a);
        assert_eq!(p.used_units(), used - 8 - LOC_BLOCK_HDR_UNITS);
        // освобождённое место переиспользуется first-fit
        let c = p.allocate_loc_block(8).unwrap();
        assert_eq!(c, a);
        assert_eq!(p.loc_block_count(), 2);
    }

    #[test]
    fn loc_block_expand() {
        let mut p = OverflowPage::new(3, 256, OVR_KIND_LOC);
        let a = p.allocate_loc_block(4).unwrap();
        let room = p.loc_block_expand_room(a);
        assert!(room > 0);
        assert!(p.expand_loc_block(a, 4));
        assert_eq!(locb_data_units(&p.image, a), 8);
        // после второго блока расширение первого ограничено
        let b = p.allocate_loc_block(4).unwrap();
        assert_eq!(p.loc_block_expand_room(a), 0);
        assert!(!p.expand_loc_block(a, 1));
        let _ = b;
    }

    #[test]
    fn idloc_alloc_from_both_ends() {
        let mut p = OverflowPage::new(4, 256, OVR_KIND_IDLOC);
        let id_units = 4;
        p.allocate_id_block(id_units).unwrap();
        let loc = p.allocate_loc_block(6).unwrap();
        // LOC-блок лёг в хвост региона
        assert_eq!(
            loc - p.data_start() + 6 + LOC_BLOCK_HDR_UNITS,
            p.data_units()
        );
        // ID-слоты продолжают нарезаться от головы
        let s1 = p.allocate_id_block(id_units).unwrap();
        assert_eq!(s1, 1);
    }
}
