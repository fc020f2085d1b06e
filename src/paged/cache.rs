//! O(1) LRU-кэш чистых страниц.
//!
//! Design:
//! - HashMap<page_id, Entry> хранит образ страницы и prev/next по page_id.
//! - head = MRU, tail = LRU.
//! - get() переносит узел в голову и копирует образ наружу.
//! - put() обновляет существующий (перенос в голову) или вставляет новый,
//!   вытесняя хвост при переполнении.
//!
//! Грязные страницы сюда не попадают: до flush они приколоты в dirty-карте
//! файла и вытеснению не подлежат.

use std::collections::HashMap;

pub(crate) struct PageCache {
    cap: usize,
    map: HashMap<u32, Entry>,
    head: Option<u32>, // most-recently used
    tail: Option<u32>, // least-recently used
}

struct Entry {
    data: Vec<u32>,
    prev: Option<u32>,
    next: Option<u32>,
}

impl PageCache {
    /// Кэш на cap страниц; cap = 0 выключает кэш.
    pub(crate) fn new(cap: usize) -> Self {
        Self {
            cap,
            map: HashMap::with_capacity(cap.max(1)),
            head: None,
            tail: None,
        }
    }

    /// Образ страницы, если есть; узел переносится в голову.
    pub(crate) fn get(&mut self, page_id: u32) -> Option<Vec<u32>> {
        if self.cap == 0 || !self.map.contains_key(&page_id) {
            return None;
        }
        self.detach(page_id);
        self.attach_front(page_id);
        self.map.get(&page_id).map(|e| e.data.clone())
    }

    /// Положить образ страницы (копия); вытесняет LRU при переполнении.
    pub(crate) fn put(&mut self, page_id: u32, data: &[u32]) {
        if self.cap == 0 {
            return;
        }

        if self.map.contains_key(&page_id) {
            if let Some(e) = self.map.get_mut(&page_id) {
                if e.data.len() == data.len() {
                    e.data.copy_from_slice(data);
                } else {
                    e.data = data.to_vec();
                }
            }
            self.detach(page_id);
            self.attach_front(page_id);
            return;
        }

        if self.map.len() >= self.cap {
            if let Some(victim) = self.tail {
                self.detach(victim);
                self.map.remove(&victim);
            }
        }

        self.map.insert(
            page_id,
            Entry {
                data: data.to_vec(),
                prev: None,
                next: None,
            },
        );
        self.attach_front(page_id);
    }

    /// Удалить страницу из кэша (free_page / clear).
    pub(crate) fn remove(&mut self, page_id: u32) {
        if self.map.contains_key(&page_id) {
            self.detach(page_id);
            self.map.remove(&page_id);
        }
    }

    /// Полностью опустошить кэш.
    pub(crate) fn clear(&mut self) {
        self.map.clear();
        self.head = None;
        self.tail = None;
    }

    // ---------------- internal helpers ----------------

    fn detach(&mut self, page_id: u32) {
        let (prev, next) = match self.map.get(&page_id) {
            Some(e) => (e.prev, e.next),
            None => return,
        };

        if self.head == Some(page_id) {
            self.head = next;
        }
        if self.tail == Some(page_id) {
            self.tail = prev;
        }

        if let Some(p) = prev {
            if let Some(pe) = self.map.get_mut(&p) {
                pe.next = next;
            }
        }
        if let Some(n) = next {
            if let Some(ne) = self.map.get_mut(&n) {
                ne.prev = prev;
            }
        }

        if let Some(e) = self.map.get_mut(&page_id) {
            e.prev = None;
            e.next = None;
        }
    }

    fn attach_front(&mut self, page_id: u32) {
        if self.head == Some(page_id) {
            return;
        }

        if let Some(e) = self.map.get_mut(&page_id) {
            e.prev = None;
            e.next = self.head;
        }

        if let Some(old_head) = self.head {
            if let Some(he) = self.map.get_mut(&old_head) {
                he.prev = Some(page_id);
            }
        }

        self.head = Some(page_id);

        if self.tail.is_none() {
            self.tail = Some(page_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_lru() {
        let mut c = PageCache::new(2);
        c.put(1, &[1]);
        c.put(2, &[2]);
        assert!(c.get(1).is_some()); // 1 становится MRU
        c.put(3, &[3]); // вытесняет 2
        assert!(c.get(2).is_none());
        assert!(c.get(1).is_some());
        assert!(c.get(3).is_some());
    }

    #[test]
    fn zero_capacity_is_noop() {
        let mut c = PageCache::new(0);
        c.put(1, &[1]);
        assert!(c.get(1).is_none());
    }
}
