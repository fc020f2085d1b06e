//! Курсор Short-списка: оба потока в одной области.
//!
//! Задний поток разностей id читается get_back-ом, передний поток
//! позиций — лениво, через synchronize: курсор позиций догоняет текущий
//! документ, пропуская чужие записи по их длине.

use super::LocationListIterator;
use crate::leaf::area;
use crate::list::{ListContext, ListPosition};
use crate::types::{DocumentId, LocationList, UNDEFINED_DOCUMENT_ID};

pub struct ShortIterator {
    pub pos: ListPosition,
    // порядковый номер текущего документа
    position: usize,
    prev_id: DocumentId,
    current_id: DocumentId,
    // задние битовые смещения: начало разности текущего и следующая
    current_off: usize,
    next_off: usize,
    // курсор позиционного потока
    sync_pos: usize,
    loc_off: usize,
    // поля текущей записи (валидны после synchronize)
    frequency: u32,
    rec_bits: usize,
    data_off: usize,
    data_bits: usize,
}

impl ShortIterator {
    pub fn new(cx: &mut ListContext<'_>, pos: ListPosition) -> Self {
        let mut it = Self {
            pos,
            position: 0,
            prev_id: 0,
            current_id: 0,
            current_off: 0,
            next_off: 0,
            sync_pos: 0,
            loc_off: 0,
            frequency: 0,
            rec_bits: 0,
            data_off: 0,
            data_bits: 0,
        };
        it.reset(cx);
        it
    }

    pub fn current_id(&self) -> DocumentId {
        self.current_id
    }

    pub fn get_document_id(&self) -> DocumentId {
        self.current_id
    }

    pub fn is_end(&self) -> bool {
        self.current_id == UNDEFINED_DOCUMENT_ID
    }

    fn off(&self) -> usize {
        self.pos.area_off()
    }

    pub fn reset(&mut self, _cx: &mut ListContext<'_>) {
        let off = self.off();
        self.position = 0;
        self.prev_id = 0;
        self.current_off = 0;
        self.next_off = 0;
        self.sync_pos = 0;
        self.loc_off = 0;
        self.current_id = if area::document_count(&self.pos.page.image, off) == 0 {
            UNDEFINED_DOCUMENT_ID
        } else {
            area::first_document_id(&self.pos.page.image, off)
        };
    }

    pub fn next(&mut self, cx: &mut ListContext<'_>) {
        if self.is_end() {
            return;
        }
        let off = self.off();
        let doc_bits = area::document_offset(&self.pos.page.image, off);
        let r = area::data_range(&self.pos.page.image, off);
        let data = &self.pos.page.image[r];

        self.position += 1;
        self.prev_id = self.current_id;
        self.current_off = self.next_off;
        self.current_id =
            cx.codec
                .read_document_id(self.prev_id, data, doc_bits, &mut self.next_off);
    }

    pub fn find(&mut self, cx: &mut ListContext<'_>, doc: DocumentId, undo: bool) -> bool {
        self.lower_bound(cx, doc, undo) && self.current_id == doc
    }

    pub fn lower_bound(&mut self, cx: &mut ListContext<'_>, doc: DocumentId, undo: bool) -> bool {
        let off = self.off();
        if !undo
            && (area::document_count(&self.pos.page.image, off) == 0
                || area::last_document_id(&self.pos.page.image, off) < doc)
        {
            self.current_id = UNDEFINED_DOCUMENT_ID;
            return false;
        }
        if self.current_id == UNDEFINED_DOCUMENT_ID || self.current_id > doc {
            // назад не ходим — перечитываем с головы
            self.reset(cx);
        }
        while self.current_id < doc {
            if self.is_end() {
                return false;
            }
            self.next(cx);
        }
        !self.is_end() || undo
    }

    // ----- позиционный поток -----

    // Догнать курсор позиций до текущего документа и разобрать поля
    // его записи.
    fn synchronize(&mut self, cx: &mut ListContext<'_>) {
        if cx.codec.no_tf {
            self.frequency = 1;
            self.rec_bits = 0;
            self.data_bits = 0;
            return;
        }
        if self.sync_pos > self.position {
            self.sync_pos = 0;
            self.loc_off = 0;
        }
        let off = self.off();
        let loc_bits = area::location_offset(&self.pos.page.image, off);
        let r = area::data_range(&self.pos.page.image, off);
        let data = &self.pos.page.image[r];

        while self.sync_pos < self.position {
            let (rec, _freq, _doff, _dbits) =
                read_record(cx, data, loc_bits, self.loc_off);
            self.loc_off += rec;
            self.sync_pos += 1;
        }
        let (rec, freq, doff, dbits) = read_record(cx, data, loc_bits, self.loc_off);
        self.rec_bits = rec;
        self.frequency = freq;
        self.data_off = doff;
        self.data_bits = dbits;
    }

    pub fn get_in_document_frequency(&mut self, cx: &mut ListContext<'_>) -> u32 {
        self.synchronize(cx);
        self.frequency
    }

    pub fn get_location_offset(&mut self, cx: &mut ListContext<'_>) -> usize {
        self.synchronize(cx);
        self.loc_off
    }

    pub fn get_location_bit_length(&mut self, cx: &mut ListContext<'_>) -> usize {
        self.synchronize(cx);
        self.rec_bits
    }

    pub fn get_location_list_iterator(&mut self, cx: &mut ListContext<'_>) -> LocationListIterator {
        self.synchronize(cx);
        if cx.codec.no_tf || cx.codec.no_location {
            return LocationListIterator::empty();
        }
        let off = self.off();
        let loc_bits = area::location_offset(&self.pos.page.image, off);
        let r = area::data_range(&self.pos.page.image, off);
        let data = &self.pos.page.image[r];

        let mut out = Vec::with_capacity(self.frequency as usize);
        let mut cur = self.data_off;
        let mut last = 0u32;
        for _ in 0..self.frequency {
            last = cx.codec.read_location_data(last, data, loc_bits, &mut cur);
            out.push(last);
        }
        LocationListIterator::new(out)
    }

    // ----- удаление и его откат -----

    /// Удалить текущий документ из обоих потоков. Курсор переходит на
    /// следующий документ (или End).
    pub fn expunge(&mut self, cx: &mut ListContext<'_>) {
        self.synchronize(cx);
        let off = self.off();

        // поток id
        let doc_bits = area::document_offset(&self.pos.page.image, off);
        let mut probe = self.next_off;
        let next = {
            let r = area::data_range(&self.pos.page.image, off);
            cx.codec.read_document_id(
                self.current_id,
                &self.pos.page.image[r],
                doc_bits,
                &mut probe,
            )
        };

        if self.position == 0 {
            if next == UNDEFINED_DOCUMENT_ID {
                // единственный документ
                area::set_first_document_id(&mut self.pos.page.image, off, 0);
                area::set_last_document_id(&mut self.pos.page.image, off, 0);
                area::set_document_offset(&mut self.pos.page.image, off, 0);
                self.current_id = UNDEFINED_DOCUMENT_ID;
            } else {
                // снять первую разность, новый первый — в заголовок
                let gap = probe;
                {
                    let r = area::data_range(&self.pos.page.image, off);
                    let buf = &mut self.pos.page.image[r];
                    crate::coder::bitops::move_bits_back(buf, 0, gap, doc_bits - gap);
                    crate::coder::bitops::set_off_back(buf, doc_bits - gap, gap);
                }
                area::set_first_document_id(&mut self.pos.page.image, off, next);
                area::set_document_offset(&mut self.pos.page.image, off, doc_bits - gap);
                self.current_id = next;
                self.prev_id = 0;
                self.current_off = 0;
                self.next_off = 0;
            }
        } else if next != UNDEFINED_DOCUMENT_ID {
            // перешить разность prev -> next на месте
            let mut new_off = self.current_off;
            {
                let r = area::data_range(&self.pos.page.image, off);
                let buf = &mut self.pos.page.image[r];
                crate::coder::bitops::set_off_back(buf, self.current_off, probe - self.current_off);
                cx.codec
                    .write_document_id(self.prev_id, next, buf, &mut new_off);
                if new_off != probe {
                    let len = doc_bits - probe;
                    if len > 0 {
                        crate::coder::bitops::move_bits_back(buf, new_off, probe, len);
                    }
                    crate::coder::bitops::set_off_back(buf, new_off + len, probe - new_off);
                }
            }
            area::set_document_offset(&mut self.pos.page.image, off, doc_bits - (probe - new_off));
            self.next_off = new_off;
            self.current_id = next;
        } else {
            // последний документ списка
            {
                let r = area::data_range(&self.pos.page.image, off);
                let buf = &mut self.pos.page.image[r];
                crate::coder::bitops::set_off_back(
                    buf,
                    self.current_off,
                    self.next_off - self.current_off,
                );
            }
            area::set_document_offset(&mut self.pos.page.image, off, self.current_off);
            area::set_last_document_id(&mut self.pos.page.image, off, self.prev_id);
            self.current_id = UNDEFINED_DOCUMENT_ID;
        }

        area::decrement_document_count(&mut self.pos.page.image, off);

        // позиционный поток
        if !cx.codec.no_tf {
            let loc_bits = area::location_offset(&self.pos.page.image, off);
            let rec = self.rec_bits;
            {
                let r = area::data_range(&self.pos.page.image, off);
                let buf = &mut self.pos.page.image[r];
                let tail = loc_bits - (self.loc_off + rec);
                if tail > 0 {
                    crate::coder::bitops::move_bits(buf, self.loc_off, self.loc_off + rec, tail);
                }
                crate::coder::bitops::set_off(buf, self.loc_off + tail, rec);
            }
            area::set_location_offset(&mut self.pos.page.image, off, loc_bits - rec);
        }
    }

    /// Вернуть документ на прежнее место (точный обратный ход expunge).
    /// Вызывается после lower_bound(doc, undo=true).
    pub fn undo_expunge(&mut self, cx: &mut ListContext<'_>, doc: DocumentId, locs: &LocationList) {
        self.synchronize(cx);
        let off = self.off();
        let doc_bits = area::document_offset(&self.pos.page.image, off);

        if self.current_id == UNDEFINED_DOCUMENT_ID {
            // doc становится последним (или единственным)
            let last = area::last_document_id(&self.pos.page.image, off);
            if last == 0 {
                area::set_first_document_id(&mut self.pos.page.image, off, doc);
            } else {
                let mut o = self.current_off;
                let r = area::data_range(&self.pos.page.image, off);
                cx.codec
                    .write_document_id(last, doc, &mut self.pos.page.image[r], &mut o);
                area::set_document_offset(&mut self.pos.page.image, off, o);
            }
        } else if self.position == 0 {
            // doc становится новым первым
            let gap = cx.codec.bits_document_id(doc, self.current_id);
            {
                let r = area::data_range(&self.pos.page.image, off);
                let buf = &mut self.pos.page.image[r];
                crate::coder::bitops::move_bits_back(buf, gap, 0, doc_bits);
                crate::coder::bitops::set_off_back(buf, 0, gap);
                let mut o = 0usize;
                cx.codec.write_document_id(doc, self.current_id, buf, &mut o);
            }
            area::set_first_document_id(&mut self.pos.page.image, off, doc);
            area::set_document_offset(&mut self.pos.page.image, off, doc_bits + gap);
            // текущий документ сместился на один ординал вправо
            self.position += 1;
            self.prev_id = doc;
            self.current_off = 0;
            self.next_off = gap;
        } else {
            // интерьер: разность prev -> current распадается на две
            let old = self.next_off - self.current_off;
            let new = cx.codec.bits_document_id(self.prev_id, doc)
                + cx.codec.bits_document_id(doc, self.current_id);
            let delta = new - old;
            {
                let r = area::data_range(&self.pos.page.image, off);
                let buf = &mut self.pos.page.image[r];
                let len = doc_bits - self.next_off;
                if len > 0 {
                    crate::coder::bitops::move_bits_back(buf, self.next_off + delta, self.next_off, len);
                }
                crate::coder::bitops::set_off_back(buf, self.current_off, new);
                let mut o = self.current_off;
                cx.codec.write_document_id(self.prev_id, doc, buf, &mut o);
                cx.codec.write_document_id(doc, self.current_id, buf, &mut o);
            }
            area::set_document_offset(&mut self.pos.page.image, off, doc_bits + delta);
            let first_gap = cx.codec.bits_document_id(self.prev_id, doc);
            self.position += 1;
            self.next_off = self.current_off + new;
            self.current_off += first_gap;
            self.prev_id = doc;
        }

        if area::last_document_id(&self.pos.page.image, off) < doc {
            area::set_last_document_id(&mut self.pos.page.image, off, doc);
        }
        area::increment_document_count(&mut self.pos.page.image, off);

        // позиционная запись встаёт перед записью текущего документа
        if !cx.codec.no_tf {
            let (rec_bits, data_bits) = cx.codec.bits_location_list(locs);
            let loc_bits = area::location_offset(&self.pos.page.image, off);
            {
                let r = area::data_range(&self.pos.page.image, off);
                let buf = &mut self.pos.page.image[r];
                let tail = loc_bits - self.loc_off;
                if tail > 0 {
                    crate::coder::bitops::move_bits(buf, self.loc_off + rec_bits, self.loc_off, tail);
                }
                crate::coder::bitops::set_off(buf, self.loc_off, rec_bits);
                let mut o = self.loc_off;
                cx.codec.write_location_list(locs, data_bits, buf, &mut o);
            }
            area::set_location_offset(&mut self.pos.page.image, off, loc_bits + rec_bits);
        }
    }
}

// Разобрать позиционную запись по смещению at: (полная длина, частота,
// смещение данных, длина данных). Для частоты 1 длина данных измеряется
// декодированием единственной разности.
fn read_record(
    cx: &ListContext<'_>,
    data: &[u32],
    total_bits: usize,
    at: usize,
) -> (usize, u32, usize, usize) {
    let mut o = at;
    let freq = cx.codec.read_location_frequency(data, total_bits, &mut o);
    if cx.codec.no_location {
        return (o - at, freq, o, 0);
    }
    if freq <= 1 {
        let doff = o;
        let _ = cx.codec.read_location_data(0, data, total_bits, &mut o);
        (o - at, freq.max(1), doff, o - doff)
    } else {
        let dbits = cx.codec.read_location_bit_length(data, total_bits, &mut o);
        (o - at + dbits, freq, o, dbits)
    }
}
