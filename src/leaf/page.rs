//! Листовая страница: упорядоченный по ключу массив областей.
//!
//! Layout (в u32-юнитах):
//!   w0 prev_page_id, w1 next_page_id, w2 area_count,
//!   далее области вплотную, затем свободное место.
//!
//! Инварианты:
//! - ключи областей строго возрастают;
//! - used_units + free_units == page_units;
//! - области занимают непрерывный префикс после заголовка.

use anyhow::{anyhow, Result};
use std::cmp::Ordering;

use super::area;
use crate::consts::{LEAF_HDR_UNITS, LEAF_OFF_COUNT, LEAF_OFF_NEXT, LEAF_OFF_PREV};
use crate::types::compare_keys;

pub struct LeafPage {
    pub page_id: u32,
    pub image: Vec<u32>,
    // словные смещения областей в порядке ключей
    areas: Vec<usize>,
}

impl LeafPage {
    /// Пустая страница с заданными соседями.
    pub fn new(page_id: u32, page_units: usize, prev: u32, next: u32) -> Self {
        let mut image = vec![0u32; page_units];
        image[LEAF_OFF_PREV] = prev;
        image[LEAF_OFF_NEXT] = next;
        image[LEAF_OFF_COUNT] = 0;
        Self {
            page_id,
            image,
            areas: Vec::new(),
        }
    }

    /// Разбор образа страницы: обход областей по их unit_size.
    pub fn from_image(page_id: u32, image: Vec<u32>) -> Result<Self> {
        let count = image[LEAF_OFF_COUNT] as usize;
        let mut areas = Vec::with_capacity(count);
        let mut off = LEAF_HDR_UNITS;
        for i in 0..count {
            if off >= image.len() {
                return Err(anyhow!(
                    "leaf page {}: area {} offset {} beyond page",
                    page_id,
                    i,
                    off
                ));
            }
            let n = area::unit_size(&image, off);
            if n < crate::consts::AREA_FIXED_UNITS + 1 || off + n > image.len() {
                return Err(anyhow!(
                    "leaf page {}: area {} has bad unit size {}",
                    page_id,
                    i,
                    n
                ));
            }
            areas.push(off);
            off += n;
        }
        Ok(Self {
            page_id,
            image,
            areas,
        })
    }

    pub fn prev_page_id(&self) -> u32 {
        self.image[LEAF_OFF_PREV]
    }

    pub fn next_page_id(&self) -> u32 {
        self.image[LEAF_OFF_NEXT]
    }

    pub fn set_prev_page_id(&mut self, id: u32) {
        self.image[LEAF_OFF_PREV] = id;
    }

    pub fn set_next_page_id(&mut self, id: u32) {
        self.image[LEAF_OFF_NEXT] = id;
    }

    pub fn area_count(&self) -> usize {
        self.areas.len()
    }

    pub fn area_off(&self, idx: usize) -> usize {
        self.areas[idx]
    }

    /// Индекс области по её словному смещению.
    pub fn idx_of_off(&self, off: usize) -> Option<usize> {
        self.areas.iter().position(|&o| o == off)
    }

    pub fn page_units(&self) -> usize {
        self.image.len()
    }

    pub fn used_units(&self) -> usize {
        LEAF_HDR_UNITS
            + self
                .areas
                .iter()
                .map(|&off| area::unit_size(&self.image, off))
                .sum::<usize>()
    }

    pub fn free_units(&self) -> usize {
        self.page_units() - self.used_units()
    }

    /// Максимальный размер области (одна область на страницу).
    pub fn max_area_unit_size(&self) -> usize {
        self.page_units() - LEAF_HDR_UNITS
    }

    pub fn key_at(&self, idx: usize) -> Vec<u16> {
        area::key(&self.image, self.areas[idx])
    }

    /// Точный поиск области по ключу.
    pub fn search(&self, key: &[u16]) -> Option<usize> {
        let idx = self.lower_bound(key);
        if idx < self.areas.len() && compare_keys(&self.key_at(idx), key) == Ordering::Equal {
            Some(idx)
        } else {
            None
        }
    }

    /// Первая область с ключом >= key; area_count(), если все меньше.
    pub fn lower_bound(&self, key: &[u16]) -> usize {
        let mut lo = 0usize;
        let mut hi = self.areas.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if compare_keys(&self.key_at(mid), key) == Ordering::Less {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// Поместится ли новая область с таким ключом и data-регионом.
    pub fn is_insert_area(&self, key: &[u16], data_units: usize) -> bool {
        self.free_units() >= area::calc_area_unit_size(key.len(), data_units)
    }

    /// Вставить новую область в позицию ключевого порядка.
    /// Возвращает индекс области. Caller обязан проверить free_units.
    pub fn insert(&mut self, key: &[u16], data_units: usize, list_type: u32) -> Result<usize> {
        let n = area::calc_area_unit_size(key.len(), data_units);
        if self.free_units() < n {
            return Err(anyhow!(
                "leaf page {}: no room for area of {} units (free {})",
                self.page_id,
                n,
                self.free_units()
            ));
        }
        let idx = self.lower_bound(key);
        debug_assert!(
            idx >= self.areas.len()
                || compare_keys(&self.key_at(idx), key) != Ordering::Equal,
            "duplicate key insert"
        );
        let off = self.open_gap(idx, n);
        area::init(&mut self.image, off, key, data_units, list_type);
        self.areas.insert(idx, off);
        self.image[LEAF_OFF_COUNT] = self.areas.len() as u32;
        Ok(idx)
    }

    /// Вставить готовый образ области (перенос при split/merge).
    pub fn insert_area_image(&mut self, src: &[u32]) -> Result<usize> {
        let n = area::unit_size(src, 0);
        debug_assert_eq!(n, src.len());
        if self.free_units() < n {
            return Err(anyhow!(
                "leaf page {}: no room for moved area of {} units",
                self.page_id,
                n
            ));
        }
        let key = area::key(src, 0);
        let idx = self.lower_bound(&key);
        let off = self.open_gap(idx, n);
        self.image[off..off + n].copy_from_slice(src);
        self.areas.insert(idx, off);
        self.image[LEAF_OFF_COUNT] = self.areas.len() as u32;
        Ok(idx)
    }

    /// Удалить область, вернув её образ.
    pub fn expunge(&mut self, idx: usize) -> Vec<u32> {
        let off = self.areas[idx];
        let n = area::unit_size(&self.image, off);
        let out = self.image[off..off + n].to_vec();
        self.close_gap(off, n);
        self.areas.remove(idx);
        for o in self.areas.iter_mut().skip(idx) {
            *o -= n;
        }
        self.image[LEAF_OFF_COUNT] = self.areas.len() as u32;
        out
    }

    /// Изменить размер области на delta юнитов (data-регион меняется с
    /// хвоста). false, если на странице нет места для роста.
    /// Содержимое data-региона при росте получает нули в хвосте; при
    /// сжатии хвост отрезается — вызывающий обязан сначала перенести
    /// задний поток.
    pub fn change_area_size(&mut self, idx: usize, delta: isize) -> bool {
        if delta == 0 {
            return true;
        }
        let off = self.areas[idx];
        let n = area::unit_size(&self.image, off);
        if delta > 0 {
            let grow = delta as usize;
            if self.free_units() < grow {
                return false;
            }
            self.open_gap_at(off + n, grow);
            for w in self.image[off + n..off + n + grow].iter_mut() {
                *w = 0;
            }
            area::set_unit_size(&mut self.image, off, n + grow);
            for o in self.areas.iter_mut().skip(idx + 1) {
                *o += grow;
            }
        } else {
            let shrink = (-delta) as usize;
            debug_assert!(n > shrink);
            self.close_gap(off + n - shrink, shrink);
            area::set_unit_size(&mut self.image, off, n - shrink);
            for o in self.areas.iter_mut().skip(idx + 1) {
                *o -= shrink;
            }
        }
        true
    }

    // ---------------- internal helpers ----------------

    // Раздвинуть место под область размера n перед областью idx,
    // вернуть смещение освободившегося окна.
    fn open_gap(&mut self, idx: usize, n: usize) -> usize {
        let insert_off = if idx < self.areas.len() {
            self.areas[idx]
        } else {
            self.used_units()
        };
        self.open_gap_at(insert_off, n);
        for o in self.areas.iter_mut().skip(idx) {
            *o += n;
        }
        insert_off
    }

    fn open_gap_at(&mut self, at: usize, n: usize) {
        let used_end = self.used_units();
        debug_assert!(used_end + n <= self.page_units());
        self.image.copy_within(at..used_end, at + n);
    }

    fn close_gap(&mut self, at: usize, n: usize) {
        let used_end = self.used_units();
        self.image.copy_within(at + n..used_end, at);
        for w in self.image[used_end - n..used_end].iter_mut() {
            *w = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::{LIST_TYPE_SHORT, NO_PAGE};
    use crate::types::key_from_str;

    fn page() -> LeafPage {
        LeafPage::new(1, 128, NO_PAGE, NO_PAGE)
    }

    #[test]
    fn insert_keeps_key_order() -> Result<()> {
        let mut p = page();
        p.insert(&key_from_str("m"), 2, LIST_TYPE_SHORT)?;
        p.insert(&key_from_str("a"), 2, LIST_TYPE_SHORT)?;
        p.insert(&key_from_str("z"), 2, LIST_TYPE_SHORT)?;
        let keys: Vec<String> = (0..p.area_count())
            .map(|i| String::from_utf16_lossy(&p.key_at(i)))
            .collect();
        assert_eq!(keys, ["a", "m", "z"]);
        assert_eq!(p.image[LEAF_OFF_COUNT], 3);

        // roundtrip через образ
        let p2 = LeafPage::from_image(1, p.image.clone())?;
        assert_eq!(p2.area_count(), 3);
        assert_eq!(p2.search(&key_from_str("m")), Some(1));
        assert_eq!(p2.search(&key_from_str("q")), None);
        assert_eq!(p2.lower_bound(&key_from_str("q")), 2);
        assert_eq!(p2.lower_bound(&key_from_str("zz")), 3);
        Ok(())
    }

    #[test]
    fn expunge_closes_gap() -> Result<()> {
        let mut p = page();
        p.insert(&key_from_str("a"), 2, LIST_TYPE_SHORT)?;
        p.insert(&key_from_str("b"), 3, LIST_TYPE_SHORT)?;
        p.insert(&key_from_str("c"), 4, LIST_TYPE_SHORT)?;
        let used_before = p.used_units();
        let img = p.expunge(1);
        assert_eq!(area::key(&img, 0), key_from_str("b"));
        assert_eq!(p.area_count(), 2);
        assert_eq!(p.used_units(), used_before - img.len());
        assert_eq!(p.search(&key_from_str("c")), Some(1));
        Ok(())
    }

    #[test]
    fn change_area_size_shifts_neighbours() -> Result<()> {
        let mut p = page();
        p.insert(&key_from_str("a"), 2, LIST_TYPE_SHORT)?;
        p.insert(&key_from_str("b"), 2, LIST_TYPE_SHORT)?;
        let used = p.used_units();
        assert!(p.change_area_size(0, 4));
        assert_eq!(p.used_units(), used + 4);
        assert_eq!(area::data_units(&p.image, p.area_off(0)), 6);
        // соседняя область цела
        assert_eq!(p.key_at(1), key_from_str("b"));
        assert!(p.change_area_size(0, -4));
        assert_eq!(p.used_units(), used);
        Ok(())
    }

    #[test]
    fn accounting_invariant() -> Result<()> {
        let mut p = page();
        for s in ["a", "b", "c", "d"] {
            p.insert(&key_from_str(s), 3, LIST_TYPE_SHORT)?;
        }
        assert_eq!(p.used_units() + p.free_units(), p.page_units());
        Ok(())
    }
}
