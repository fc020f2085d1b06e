//! Листовой файл: цепочка листовых страниц + обслуживание разрезов и
//! слияний с поддержкой ключевой карты (Btr).
//!
//! Каждый юнит всегда несёт одну страницу с якорной областью пустого
//! ключа — она ставится при create и восстанавливается при clear.
//! Разрез страницы (1->2, 1->3) и слияние соседей перешивают
//! двусвязную цепочку prev/next и правят записи ключевой карты
//! (первый ключ каждой страницы -> id страницы).

pub mod area;
pub mod page;

use anyhow::{anyhow, Context, Result};
use std::path::Path;

use crate::btree::BtrFile;
use crate::consts::{LEAF_MAGIC, LIST_TYPE_SHORT, NO_PAGE};
use crate::metrics;
use crate::paged::PagedFile;
use page::LeafPage;

pub struct LeafFile {
    pf: PagedFile,
}

impl LeafFile {
    /// Создать листовой файл и установить якорную область пустого ключа.
    pub fn create(
        path: &Path,
        page_size: u32,
        cache_pages: usize,
        btr: &mut BtrFile,
    ) -> Result<Self> {
        let pf = PagedFile::create(path, LEAF_MAGIC, page_size, cache_pages)?;
        let mut leaf = Self { pf };
        leaf.install_anchor(btr)?;
        Ok(leaf)
    }

    pub fn open(path: &Path, cache_pages: usize) -> Result<Self> {
        let pf = PagedFile::open(path, LEAF_MAGIC, cache_pages)?;
        Ok(Self { pf })
    }

    fn install_anchor(&mut self, btr: &mut BtrFile) -> Result<()> {
        let mut page = self.allocate(NO_PAGE, NO_PAGE)?;
        page.insert(&[], 0, LIST_TYPE_SHORT)?;
        self.pf.set_aux0(page.page_id);
        btr.insert(&[], page.page_id);
        self.write(&page)
    }

    /// Голова цепочки листовых страниц.
    pub fn first_page_id(&self) -> u32 {
        self.pf.aux0()
    }

    pub fn page_units(&self) -> usize {
        self.pf.page_units()
    }

    pub fn page_count(&self) -> u32 {
        self.pf.page_count()
    }

    pub fn attach(&mut self, page_id: u32) -> Result<LeafPage> {
        let image = self
            .pf
            .read_page(page_id)
            .with_context(|| format!("attach leaf page {}", page_id))?;
        LeafPage::from_image(page_id, image)
    }

    pub fn write(&mut self, page: &LeafPage) -> Result<()> {
        self.pf.write_page(page.page_id, &page.image)
    }

    pub fn allocate(&mut self, prev: u32, next: u32) -> Result<LeafPage> {
        let id = self.pf.allocate_page()?;
        metrics::record_leaf_page_allocated();
        let page = LeafPage::new(id, self.pf.page_units(), prev, next);
        self.pf.write_page(id, &page.image)?;
        Ok(page)
    }

    pub fn free(&mut self, page_id: u32) -> Result<()> {
        metrics::record_leaf_page_freed();
        self.pf.free_page(page_id)
    }

    // ----- составные операции с поддержкой ключевой карты -----

    /// Вставить новую область; правит запись карты, если область стала
    /// первой на странице.
    pub fn insert_area(
        &mut self,
        btr: &mut BtrFile,
        page: &mut LeafPage,
        key: &[u16],
        data_units: usize,
        list_type: u32,
    ) -> Result<usize> {
        let old_first = if page.area_count() > 0 {
            Some(page.key_at(0))
        } else {
            None
        };
        let idx = page.insert(key, data_units, list_type)?;
        if idx == 0 {
            match old_first {
                Some(old) => btr.update(&old, page.page_id, key, page.page_id),
                None => btr.insert(key, page.page_id),
            }
        }
        Ok(idx)
    }

    /// Удалить область; правит карту и, если страница опустела и не
    /// является головой цепочки, выпиливает страницу из цепочки.
    pub fn expunge_area(
        &mut self,
        btr: &mut BtrFile,
        page: &mut LeafPage,
        idx: usize,
    ) -> Result<()> {
        let old_first = page.key_at(0);
        page.expunge(idx);

        if page.area_count() == 0 {
            if page.page_id == self.first_page_id() {
                // голова цепочки остаётся; карта чистится
                btr.expunge(&old_first);
                self.write(page)?;
                return Ok(());
            }
            btr.expunge(&old_first);
            self.unlink(page)?;
            self.free(page.page_id)?;
            return Ok(());
        }

        if idx == 0 {
            let new_first = page.key_at(0);
            btr.update(&old_first, page.page_id, &new_first, page.page_id);
        }
        self.write(page)
    }

    fn unlink(&mut self, page: &LeafPage) -> Result<()> {
        let prev = page.prev_page_id();
        let next = page.next_page_id();
        if prev != NO_PAGE {
            let mut p = self.attach(prev)?;
            p.set_next_page_id(next);
            self.write(&p)?;
        }
        if next != NO_PAGE {
            let mut n = self.attach(next)?;
            n.set_prev_page_id(prev);
            self.write(&n)?;
        }
        Ok(())
    }

    // Вставить новую пустую страницу сразу после page.
    fn link_after(&mut self, page: &mut LeafPage) -> Result<LeafPage> {
        let old_next = page.next_page_id();
        let fresh = self.allocate(page.page_id, old_next)?;
        page.set_next_page_id(fresh.page_id);
        if old_next != NO_PAGE {
            let mut n = self.attach(old_next)?;
            n.set_prev_page_id(fresh.page_id);
            self.write(&n)?;
        }
        Ok(fresh)
    }

    // Вставить новую пустую страницу перед page.
    fn link_before(&mut self, page: &mut LeafPage) -> Result<LeafPage> {
        let old_prev = page.prev_page_id();
        let fresh = self.allocate(old_prev, page.page_id)?;
        page.set_prev_page_id(fresh.page_id);
        if old_prev != NO_PAGE {
            let mut p = self.attach(old_prev)?;
            p.set_next_page_id(fresh.page_id);
            self.write(&p)?;
        } else {
            // page был головой цепочки
            self.pf.set_aux0(fresh.page_id);
        }
        Ok(fresh)
    }

    /// Разрез под вставку новой области с ключом key и data-регионом
    /// data_units. Возвращает страницу, в чей диапазон попадает ключ и
    /// где для области гарантировано есть место.
    pub fn split_for_insert(
        &mut self,
        btr: &mut BtrFile,
        page: &mut LeafPage,
        key: &[u16],
        data_units: usize,
    ) -> Result<LeafPage> {
        metrics::record_leaf_split();
        let n = area::calc_area_unit_size(key.len(), data_units);
        let capacity = page.max_area_unit_size();
        let idx = page.lower_bound(key);
        // floor-маршрутизация карты гарантирует первый ключ страницы <= key
        debug_assert!(idx >= 1 || page.area_count() == 0);

        if n > capacity / 2 {
            // 1->3: средняя страница целиком под крупную область
            return self.split_dedicated(btr, page, idx);
        }

        // 1->2: граница у точки вставки со сдвигом к балансу
        let count = page.area_count();
        let used: usize = (0..count)
            .map(|i| area::unit_size(&page.image, page.area_off(i)))
            .sum();
        let mut prefix = Vec::with_capacity(count + 1);
        prefix.push(0usize);
        for i in 0..count {
            prefix.push(prefix[i] + area::unit_size(&page.image, page.area_off(i)));
        }

        let mut best: Option<usize> = None;
        let bal = {
            let mut b = 1;
            while b < count && prefix[b] < used / 2 {
                b += 1;
            }
            b
        };
        let mut candidates = vec![bal];
        for d in 1..=count {
            if bal >= d && bal - d >= 1 {
                candidates.push(bal - d);
            }
            if bal + d <= count {
                candidates.push(bal + d);
            }
        }
        for b in candidates {
            let left_free = capacity - prefix[b];
            let right_free = capacity - (used - prefix[b]);
            let fits = if idx < b {
                left_free >= n
            } else if idx > b {
                right_free >= n
            } else {
                left_free >= n || right_free >= n
            };
            if fits {
                best = Some(b);
                break;
            }
        }
        let b = best.ok_or_else(|| anyhow!("leaf split: no feasible boundary"))?;

        let mut right = self.link_after(page)?;
        let moved: Vec<Vec<u32>> = (b..page.area_count()).map(|_| page.expunge(b)).collect();
        for img in &moved {
            right.insert_area_image(img)?;
        }
        if right.area_count() > 0 {
            btr.insert(&right.key_at(0), right.page_id);
        }

        let goes_right = if idx > b {
            true
        } else if idx < b {
            false
        } else {
            capacity - prefix[b] < n
        };
        self.write(page)?;
        self.write(&right)?;
        Ok(if goes_right {
            right
        } else {
            LeafPage::from_image(page.page_id, page.image.clone())?
        })
    }

    // 1->3: суффикс с позиции idx уходит на новую правую страницу,
    // между ними — пустая страница под крупную область.
    fn split_dedicated(
        &mut self,
        btr: &mut BtrFile,
        page: &mut LeafPage,
        idx: usize,
    ) -> Result<LeafPage> {
        let mut middle = self.link_after(page)?;
        if idx < page.area_count() {
            let mut right = self.link_after(&mut middle)?;
            let moved: Vec<Vec<u32>> =
                (idx..page.area_count()).map(|_| page.expunge(idx)).collect();
            for img in &moved {
                right.insert_area_image(img)?;
            }
            btr.insert(&right.key_at(0), right.page_id);
            self.write(&right)?;
        }
        self.write(page)?;
        self.write(&middle)?;
        Ok(middle)
    }

    /// Разрез под расширение существующей области на expand_units.
    /// Возвращает страницу с областью и её новый индекс; на странице
    /// гарантировано expand_units свободных юнитов.
    pub fn split_for_expand(
        &mut self,
        btr: &mut BtrFile,
        page: &mut LeafPage,
        area_idx: usize,
        expand_units: usize,
    ) -> Result<(LeafPage, usize)> {
        metrics::record_leaf_split();
        let mut idx = area_idx;

        // суффикс за областью — на новую правую страницу
        if area_idx + 1 < page.area_count() {
            let mut right = self.link_after(page)?;
            let from = area_idx + 1;
            let moved: Vec<Vec<u32>> =
                (from..page.area_count()).map(|_| page.expunge(from)).collect();
            for img in &moved {
                right.insert_area_image(img)?;
            }
            btr.insert(&right.key_at(0), right.page_id);
            self.write(&right)?;
        }

        if page.free_units() < expand_units && area_idx > 0 {
            // префикс перед областью — на новую левую страницу
            let mut left = self.link_before(page)?;
            let old_first = page.key_at(0);
            let moved: Vec<Vec<u32>> = (0..area_idx).map(|_| page.expunge(0)).collect();
            for img in &moved {
                left.insert_area_image(img)?;
            }
            // запись старого первого ключа теперь указывает на левую
            // страницу, область получает собственную запись
            btr.update(&old_first, page.page_id, &old_first, left.page_id);
            btr.insert(&page.key_at(0), page.page_id);
            self.write(&left)?;
            idx = 0;
        }

        if page.free_units() < expand_units {
            return Err(anyhow!(
                "leaf split_for_expand: area cannot fit even alone (need {}, free {})",
                expand_units,
                page.free_units()
            ));
        }
        self.write(page)?;
        let fresh = LeafPage::from_image(page.page_id, page.image.clone())?;
        Ok((fresh, idx))
    }

    /// Слияние с соседом, когда страница полупуста. Возвращает страницу,
    /// содержащую область area_idx, и её новый индекс.
    pub fn reduce(
        &mut self,
        btr: &mut BtrFile,
        page: &mut LeafPage,
        area_idx: usize,
    ) -> Result<(LeafPage, usize)> {
        let capacity = page.max_area_unit_size();
        let my_used = capacity - page.free_units();

        // слить следующего в нас
        let next_id = page.next_page_id();
        if next_id != NO_PAGE {
            let mut next = self.attach(next_id)?;
            let next_used = next.max_area_unit_size() - next.free_units();
            if my_used + next_used <= capacity {
                metrics::record_leaf_reduce();
                let next_first = next.key_at(0);
                while next.area_count() > 0 {
                    let img = next.expunge(0);
                    page.insert_area_image(&img)?;
                }
                btr.expunge(&next_first);
                page.set_next_page_id(next.next_page_id());
                if next.next_page_id() != NO_PAGE {
                    let mut nn = self.attach(next.next_page_id())?;
                    nn.set_prev_page_id(page.page_id);
                    self.write(&nn)?;
                }
                self.free(next.page_id)?;
                self.write(page)?;
                let fresh = LeafPage::from_image(page.page_id, page.image.clone())?;
                return Ok((fresh, area_idx));
            }
        }

        // слить нас в предыдущего
        let prev_id = page.prev_page_id();
        if prev_id != NO_PAGE {
            let mut prev = self.attach(prev_id)?;
            let prev_used = prev.max_area_unit_size() - prev.free_units();
            if my_used + prev_used <= capacity {
                metrics::record_leaf_reduce();
                let my_first = page.key_at(0);
                let base = prev.area_count();
                while page.area_count() > 0 {
                    let img = page.expunge(0);
                    prev.insert_area_image(&img)?;
                }
                btr.expunge(&my_first);
                prev.set_next_page_id(page.next_page_id());
                if page.next_page_id() != NO_PAGE {
                    let mut nn = self.attach(page.next_page_id())?;
                    nn.set_prev_page_id(prev.page_id);
                    self.write(&nn)?;
                }
                self.free(page.page_id)?;
                self.write(&prev)?;
                return Ok((prev, base + area_idx));
            }
        }

        self.write(page)?;
        let fresh = LeafPage::from_image(page.page_id, page.image.clone())?;
        Ok((fresh, area_idx))
    }

    // ----- passthrough к постраничному файлу -----

    pub fn flush_all(&mut self) -> Result<()> {
        self.pf.flush_all()
    }

    pub fn recover_all(&mut self) -> Result<()> {
        self.pf.recover_all()
    }

    pub fn detach_all(&mut self) {
        self.pf.detach_all()
    }

    pub fn is_dirty(&self) -> bool {
        self.pf.is_dirty()
    }

    /// Очистить файл и восстановить якорную область.
    pub fn clear(&mut self, btr: &mut BtrFile) -> Result<()> {
        self.pf.clear()?;
        self.install_anchor(btr)
    }

    pub fn move_to(&mut self, new_path: &Path) -> Result<()> {
        self.pf.move_to(new_path)
    }

    pub fn size(&self) -> Result<u64> {
        self.pf.size()
    }

    pub fn used_size(&mut self) -> Result<u64> {
        self.pf.used_size()
    }
}
