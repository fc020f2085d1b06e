//! Итераторы постинг-листов: декодирующие курсоры со state-machine
//! Fresh -> Positioned -> End.
//!
//! Позиции декодируются лениво: next/lower_bound не трогают позиционный
//! поток; synchronize подтягивает курсор позиций к текущему документу,
//! пропуская чужие записи по их известной длине.

pub mod middle;
pub mod short;

use anyhow::Result;

use crate::consts::{LIST_TYPE_MIDDLE, LIST_TYPE_SHORT};
use crate::leaf::area;
use crate::list::{ListContext, ListPosition};
use crate::types::{DocumentId, LocationList};

/// Курсор по позициям одного документа.
#[derive(Debug, Clone)]
pub struct LocationListIterator {
    locations: Vec<u32>,
    pos: usize,
}

impl LocationListIterator {
    pub fn new(locations: Vec<u32>) -> Self {
        Self { locations, pos: 0 }
    }

    pub fn empty() -> Self {
        Self {
            locations: Vec::new(),
            pos: 0,
        }
    }

    pub fn is_end(&self) -> bool {
        self.pos >= self.locations.len()
    }

    pub fn get_location(&self) -> u32 {
        self.locations[self.pos]
    }

    pub fn next(&mut self) {
        self.pos += 1;
    }

    pub fn reset(&mut self) {
        self.pos = 0;
    }

    pub fn size(&self) -> usize {
        self.locations.len()
    }

    pub fn into_location_list(self) -> LocationList {
        LocationList::from_sorted(self.locations)
    }
}

/// Итератор по списку: диспетчеризация по типу области один раз при
/// создании, не на каждый вызов.
pub enum InvertedIterator {
    Short(short::ShortIterator),
    Middle(middle::MiddleIterator),
}

impl InvertedIterator {
    /// Построить итератор по позиции существующей области.
    pub fn begin(cx: &mut ListContext<'_>, pos: ListPosition) -> Result<Self> {
        debug_assert!(pos.exists);
        let t = area::list_type(&pos.page.image, pos.area_off());
        Ok(if t == LIST_TYPE_SHORT {
            InvertedIterator::Short(short::ShortIterator::new(cx, pos))
        } else {
            // Middle и Long читаются одним кодом
            debug_assert!(t == LIST_TYPE_MIDDLE || t == crate::consts::LIST_TYPE_LONG);
            InvertedIterator::Middle(middle::MiddleIterator::new(cx, pos)?)
        })
    }

    pub fn position(&self) -> &ListPosition {
        match self {
            InvertedIterator::Short(i) => &i.pos,
            InvertedIterator::Middle(i) => &i.pos,
        }
    }

    /// Забрать позицию (страница пишется вызывающим после мутаций).
    pub fn into_position(self) -> ListPosition {
        match self {
            InvertedIterator::Short(i) => i.pos,
            InvertedIterator::Middle(i) => i.pos,
        }
    }

    pub fn is_end(&self) -> bool {
        self.get_document_id_raw() == crate::types::UNDEFINED_DOCUMENT_ID
    }

    fn get_document_id_raw(&self) -> DocumentId {
        match self {
            InvertedIterator::Short(i) => i.current_id(),
            InvertedIterator::Middle(i) => i.current_id(),
        }
    }

    pub fn get_document_id(&mut self, cx: &mut ListContext<'_>) -> Result<DocumentId> {
        match self {
            InvertedIterator::Short(i) => Ok(i.get_document_id()),
            InvertedIterator::Middle(i) => i.get_document_id(cx),
        }
    }

    pub fn next(&mut self, cx: &mut ListContext<'_>) -> Result<()> {
        match self {
            InvertedIterator::Short(i) => {
                i.next(cx);
                Ok(())
            }
            InvertedIterator::Middle(i) => i.next(cx),
        }
    }

    pub fn reset(&mut self, cx: &mut ListContext<'_>) -> Result<()> {
        match self {
            InvertedIterator::Short(i) => {
                i.reset(cx);
                Ok(())
            }
            InvertedIterator::Middle(i) => i.reset(cx),
        }
    }

    pub fn find(&mut self, cx: &mut ListContext<'_>, doc: DocumentId, undo: bool) -> Result<bool> {
        match self {
            InvertedIterator::Short(i) => Ok(i.find(cx, doc, undo)),
            InvertedIterator::Middle(i) => i.find(cx, doc, undo),
        }
    }

    pub fn lower_bound(
        &mut self,
        cx: &mut ListContext<'_>,
        doc: DocumentId,
        undo: bool,
    ) -> Result<bool> {
        match self {
            InvertedIterator::Short(i) => Ok(i.lower_bound(cx, doc, undo)),
            InvertedIterator::Middle(i) => i.lower_bound(cx, doc, undo),
        }
    }

    pub fn get_in_document_frequency(&mut self, cx: &mut ListContext<'_>) -> Result<u32> {
        match self {
            InvertedIterator::Short(i) => Ok(i.get_in_document_frequency(cx)),
            InvertedIterator::Middle(i) => i.get_in_document_frequency(cx),
        }
    }

    pub fn get_location_list_iterator(
        &mut self,
        cx: &mut ListContext<'_>,
    ) -> Result<LocationListIterator> {
        match self {
            InvertedIterator::Short(i) => Ok(i.get_location_list_iterator(cx)),
            InvertedIterator::Middle(i) => i.get_location_list_iterator(cx),
        }
    }

    /// Битовое смещение позиционной записи текущего документа.
    pub fn get_location_offset(&mut self, cx: &mut ListContext<'_>) -> Result<usize> {
        match self {
            InvertedIterator::Short(i) => Ok(i.get_location_offset(cx)),
            InvertedIterator::Middle(i) => i.get_location_offset(cx),
        }
    }

    /// Полная битовая длина позиционной записи текущего документа.
    pub fn get_location_bit_length(&mut self, cx: &mut ListContext<'_>) -> Result<usize> {
        match self {
            InvertedIterator::Short(i) => Ok(i.get_location_bit_length(cx)),
            InvertedIterator::Middle(i) => i.get_location_bit_length(cx),
        }
    }

    pub fn expunge(&mut self, cx: &mut ListContext<'_>) -> Result<()> {
        match self {
            InvertedIterator::Short(i) => {
                i.expunge(cx);
                Ok(())
            }
            InvertedIterator::Middle(i) => i.expunge(cx),
        }
    }

    pub fn undo_expunge(
        &mut self,
        cx: &mut ListContext<'_>,
        doc: DocumentId,
        locs: &LocationList,
    ) -> Result<()> {
        match self {
            InvertedIterator::Short(i) => {
                i.undo_expunge(cx, doc, locs);
                Ok(())
            }
            InvertedIterator::Middle(i) => i.undo_expunge(cx, doc, locs),
        }
    }

    /// Число документов списка (по заголовку области).
    pub fn get_count(&self) -> u32 {
        let pos = self.position();
        area::document_count(&pos.page.image, pos.area_off())
    }
}
