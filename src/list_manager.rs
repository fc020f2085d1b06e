//! Менеджер списков юнита: находит/создаёт список терма через ключевую
//! карту и листовую цепочку, ведёт протокол вставки с конвертацией.
//!
//! Переполнение варианта — штатный исход: Short возвращает Full,
//! менеджер конвертирует список в Middle и повторяет ту же вставку.
//! Наружу Full не выходит никогда.

use anyhow::{anyhow, Context, Result};

use crate::consts::{LIST_TYPE_SHORT, NO_PAGE};
use crate::iter::InvertedIterator;
use crate::leaf::area;
use crate::list::{middle, short, ListContext, ListInsert, ListPosition};
use crate::types::{DocumentId, LocationList};

pub struct ListManager<'a> {
    pub cx: ListContext<'a>,
}

impl<'a> ListManager<'a> {
    pub fn new(cx: ListContext<'a>) -> Self {
        Self { cx }
    }

    /// Позиция списка ключа: floor-поиск карты -> листовая страница ->
    /// точный поиск области (или точка вставки).
    pub fn locate(&mut self) -> Result<ListPosition> {
        let page_id = self
            .cx
            .btr
            .search(&self.cx.key)
            .ok_or_else(|| anyhow!("leaf key map is empty"))?;
        debug_assert_ne!(page_id, NO_PAGE);
        let page = self
            .cx
            .leaf
            .attach(page_id)
            .with_context(|| format!("locate list of key {:?}", self.cx.key))?;
        Ok(match page.search(&self.cx.key) {
            Some(idx) => ListPosition {
                page,
                area_idx: idx,
                exists: true,
            },
            None => {
                let idx = page.lower_bound(&self.cx.key);
                ListPosition {
                    page,
                    area_idx: idx,
                    exists: false,
                }
            }
        })
    }

    fn is_short(&self, pos: &ListPosition) -> bool {
        !pos.exists || area::list_type(&pos.page.image, pos.area_off()) == LIST_TYPE_SHORT
    }

    /// Вставка одного документа с протоколом Full -> convert -> retry.
    pub fn insert_document(&mut self, doc: DocumentId, locs: &LocationList) -> Result<()> {
        self.cx.check_cancel()?;
        let mut pos = self.locate()?;
        if self.is_short(&pos) {
            match short::insert(&mut self.cx, &mut pos, doc, locs)? {
                ListInsert::Done => return Ok(()),
                ListInsert::Full => {
                    middle::convert_from_short(&mut self.cx, &mut pos)?;
                }
            }
        }
        middle::insert(&mut self.cx, &mut pos, doc, locs)
    }

    /// Свёртка batch-списка (образ области, id относительно base).
    pub fn insert_batch_list(&mut self, src: &[u32], base: DocumentId) -> Result<()> {
        self.cx.check_cancel()?;
        let mut pos = self.locate()?;
        if self.is_short(&pos) {
            match short::insert_list(&mut self.cx, &mut pos, src, base)? {
                ListInsert::Done => return Ok(()),
                ListInsert::Full => {
                    middle::convert_from_short(&mut self.cx, &mut pos)?;
                }
            }
        }
        middle::insert_from_area(&mut self.cx, &mut pos, src, base)
    }

    /// Удаление документа из списка; false — документа в списке нет.
    pub fn expunge_document(&mut self, doc: DocumentId) -> Result<bool> {
        self.cx.check_cancel()?;
        let pos = self.locate()?;
        if !pos.exists {
            return Ok(false);
        }
        let mut it = InvertedIterator::begin(&mut self.cx, pos)?;
        if !it.find(&mut self.cx, doc, false)? {
            return Ok(false);
        }
        it.expunge(&mut self.cx)?;
        let pos = it.into_position();
        self.cx.leaf.write(&pos.page)?;
        Ok(true)
    }

    /// Массовое удаление (свёртка удалений): вычеркнуть перечисленные
    /// документы одним проходом итератора. Возвращает число удалённых.
    pub fn expunge_list(&mut self, docs: &[DocumentId]) -> Result<usize> {
        let pos = self.locate()?;
        if !pos.exists {
            return Ok(0);
        }
        let mut it = InvertedIterator::begin(&mut self.cx, pos)?;
        let mut removed = 0usize;
        for &doc in docs {
            self.cx.check_cancel()?;
            if it.find(&mut self.cx, doc, false)? {
                it.expunge(&mut self.cx)?;
                removed += 1;
            }
        }
        let pos = it.into_position();
        self.cx.leaf.write(&pos.page)?;
        Ok(removed)
    }

    /// Откат удаления: документ возвращается на прежнее место.
    pub fn undo_expunge(&mut self, doc: DocumentId, locs: &LocationList) -> Result<()> {
        let pos = self.locate()?;
        if !pos.exists {
            return Err(anyhow!("undo expunge: list vanished"));
        }
        let mut it = InvertedIterator::begin(&mut self.cx, pos)?;
        it.lower_bound(&mut self.cx, doc, true)?;
        it.undo_expunge(&mut self.cx, doc, locs)?;
        let pos = it.into_position();
        self.cx.leaf.write(&pos.page)?;
        Ok(())
    }

    /// Итератор списка; None — списка нет.
    pub fn iterator(&mut self) -> Result<Option<InvertedIterator>> {
        let pos = self.locate()?;
        if !pos.exists {
            return Ok(None);
        }
        Ok(Some(InvertedIterator::begin(&mut self.cx, pos)?))
    }

    /// Вычистить заявленные на удаление IDBlock-и списка (vacuum).
    pub fn expunge_id_blocks(&mut self, first_ids: &[DocumentId]) -> Result<usize> {
        let mut pos = self.locate()?;
        if !pos.exists {
            return Ok(0);
        }
        middle::expunge_id_blocks(&mut self.cx, &mut pos, first_ids)
    }
}
