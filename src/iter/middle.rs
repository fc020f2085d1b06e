//! Курсор Middle/Long-списка.
//!
//! Идентификаторы читаются по блокам: DIR-записи (по одной на
//! ID-страницу) -> слоты страницы -> встроенный последний IDBlock.
//! lower_bound монотонен: повторные вызовы с неубывающими целями идут
//! секвенциально по блокам, бинарный поиск DIR — только при холодном
//! или обратном позиционировании.
//!
//! Позиционный поток каждого IDBlock начинается с бита 0 его LOC-блока;
//! цепочка блоков связана continue-флагами и next-указателями страниц.

use anyhow::{anyhow, Result};

use super::LocationListIterator;
use crate::coder::bitops;
use crate::consts::NO_PAGE;
use crate::leaf::area;
use crate::list::{ListContext, ListPosition};
use crate::overflow::page::{
    idb_data_range, idb_first_document_id, idb_is_expunged, idb_loc_offset, idb_loc_page_id,
    idb_set_first_document_id, idb_unset_expunged, locb_data_bit_length, locb_data_units,
    locb_is_continue, locb_set_continue, locb_set_data_bit_length, OverflowPage,
};
use crate::types::{DocumentId, LocationList, UNDEFINED_DOCUMENT_ID};

// Курсор позиционной цепочки: страница + блок + битовое смещение в
// данных блока.
#[derive(Clone)]
struct LocCursor {
    page: OverflowPage,
    block: usize,
    off: usize,
}

impl LocCursor {
    fn bit_len(&self) -> usize {
        locb_data_bit_length(&self.page.image, self.block)
    }

    fn capacity(&self) -> usize {
        locb_data_units(&self.page.image, self.block) * 32
    }

    fn data<'b>(&'b self) -> &'b [u32] {
        let r = crate::overflow::page::locb_data_range(&self.page.image, self.block);
        &self.page.image[r]
    }

    // Перейти к следующему блоку цепочки (первый блок следующей страницы).
    fn next_block(&mut self, cx: &mut ListContext<'_>) -> Result<()> {
        let next = self.page.next_page_id();
        if next == NO_PAGE {
            return Err(anyhow!(
                "loc chain ends unexpectedly at page {}",
                self.page.page_id
            ));
        }
        self.page = cx.ovr.attach(next)?;
        self.block = self.page.data_start();
        self.off = 0;
        Ok(())
    }

    // Перешагнуть исчерпанные блоки по continue-флагам;
    // false — поток этого IDBlock кончился.
    fn skip_exhausted(&mut self, cx: &mut ListContext<'_>) -> Result<bool> {
        while self.off >= self.bit_len() {
            if !locb_is_continue(&self.page.image, self.block) {
                return Ok(false);
            }
            self.next_block(cx)?;
        }
        Ok(true)
    }
}

pub struct MiddleIterator {
    pub pos: ListPosition,
    id_units: usize,

    // текущий IDBlock
    in_area: bool,
    block_loaded: bool,
    id_page: Option<OverflowPage>,
    id_slot: usize,
    dir_pos: usize,

    // декодирование разностей id
    position: usize,
    prev_id: DocumentId,
    current_id: DocumentId,
    current_off: usize,
    next_off: usize,
    /// Верхняя граница текущего блока (первый документ следующего).
    block_bound: DocumentId,

    // позиционный курсор (валиден при sync_valid)
    sync_valid: bool,
    sync_pos: usize,
    cursor: Option<LocCursor>,
    // поля текущей записи после synchronize
    frequency: u32,
    rec_bits: usize,
    data_bits: usize,
    data_cursor: Option<LocCursor>,
}

impl MiddleIterator {
    pub fn new(cx: &mut ListContext<'_>, pos: ListPosition) -> Result<Self> {
        let mut it = Self {
            pos,
            id_units: cx.id_block_units,
            in_area: true,
            block_loaded: false,
            id_page: None,
            id_slot: 0,
            dir_pos: 0,
            position: 0,
            prev_id: 0,
            current_id: 0,
            current_off: 0,
            next_off: 0,
            block_bound: 0,
            sync_valid: false,
            sync_pos: 0,
            cursor: None,
            frequency: 0,
            rec_bits: 0,
            data_bits: 0,
            data_cursor: None,
        };
        it.reset(cx)?;
        Ok(it)
    }

    pub fn current_id(&self) -> DocumentId {
        self.current_id
    }

    pub fn is_end(&self) -> bool {
        self.current_id == UNDEFINED_DOCUMENT_ID
    }

    fn off(&self) -> usize {
        self.pos.area_off()
    }

    fn dir_count(&self) -> usize {
        area::dir_block_count(&self.pos.page.image, self.off(), self.id_units)
    }

    // (буфер, смещение) заголовка текущего IDBlock
    fn block_hdr(&self) -> (&[u32], usize) {
        if self.in_area {
            (
                &self.pos.page.image,
                area::last_id_block_off(&self.pos.page.image, self.off()),
            )
        } else {
            let page = self.id_page.as_ref().expect("id page attached");
            (&page.image, page.id_slot_off(self.id_slot, self.id_units))
        }
    }

    fn block_first(&self) -> DocumentId {
        let (buf, off) = self.block_hdr();
        idb_first_document_id(buf, off)
    }

    fn block_expunged(&self) -> bool {
        let (buf, off) = self.block_hdr();
        idb_is_expunged(buf, off)
    }

    fn block_loc_position(&self) -> (u32, usize) {
        let (buf, off) = self.block_hdr();
        (idb_loc_page_id(buf, off), idb_loc_offset(buf, off))
    }

    // Полные биты данных текущего блока: для встроенного — точный учёт
    // из области, для страниц — ёмкость (хвост добит нулями).
    fn block_total_bits(&self) -> usize {
        if self.in_area {
            area::document_offset(&self.pos.page.image, self.off())
        } else {
            self.id_units * 32
        }
    }

    pub fn reset(&mut self, cx: &mut ListContext<'_>) -> Result<()> {
        let off = self.off();
        self.dir_pos = 0;
        self.id_page = None;
        self.id_slot = 0;
        self.block_loaded = false;
        self.sync_valid = false;
        self.cursor = None;
        self.current_id = if area::document_count(&self.pos.page.image, off) == 0 {
            UNDEFINED_DOCUMENT_ID
        } else {
            0
        };
        if self.dir_count() == 0 {
            self.load_in_area_block();
            if self.block_first() == 0 || self.block_expunged() {
                self.current_id = UNDEFINED_DOCUMENT_ID;
            }
        } else {
            // блоки подтягиваются лениво при next/get_document_id
            self.in_area = false;
        }
        let _ = cx;
        Ok(())
    }

    fn load_in_area_block(&mut self) {
        self.in_area = true;
        self.block_loaded = true;
        self.id_page = None;
        self.position = 0;
        self.prev_id = 0;
        self.current_off = 0;
        self.next_off = 0;
        self.current_id = self.block_first();
        self.block_bound = area::last_document_id(&self.pos.page.image, self.off()) + 1;
    }

    fn load_slot_block(&mut self, page: OverflowPage, slot: usize) {
        self.in_area = false;
        self.block_loaded = true;
        self.id_slot = slot;
        let bound = {
            let next = page.next_document_id(slot, self.id_units);
            if next != UNDEFINED_DOCUMENT_ID {
                next
            } else if self.dir_pos + 1 < self.dir_count() {
                let d = area::dir_block_off(
                    &self.pos.page.image,
                    self.off(),
                    self.id_units,
                    self.dir_pos + 1,
                );
                area::dir_document_id(&self.pos.page.image, d)
            } else {
                let idb = area::last_id_block_off(&self.pos.page.image, self.off());
                let first = idb_first_document_id(&self.pos.page.image, idb);
                if first != 0 {
                    first
                } else {
                    area::last_document_id(&self.pos.page.image, self.off()) + 1
                }
            }
        };
        self.id_page = Some(page);
        self.position = 0;
        self.prev_id = 0;
        self.current_off = 0;
        self.next_off = 0;
        self.current_id = self.block_first();
        self.block_bound = bound;
    }

    // Следующий IDBlock; false — блоков больше нет (current остаётся End).
    fn next_id_block(&mut self, cx: &mut ListContext<'_>) -> Result<bool> {
        self.sync_valid = false;
        if self.in_area && self.block_loaded {
            self.current_id = UNDEFINED_DOCUMENT_ID;
            return Ok(false);
        }

        loop {
            if !self.block_loaded {
                if self.dir_count() == 0 {
                    self.load_in_area_block();
                    break;
                }
                let d = area::dir_block_off(
                    &self.pos.page.image,
                    self.off(),
                    self.id_units,
                    self.dir_pos,
                );
                let page_id = area::dir_page_id(&self.pos.page.image, d);
                self.id_page = Some(cx.ovr.attach(page_id)?);
                self.id_slot = 0;
                self.block_loaded = true;
            } else {
                self.id_slot += 1;
                let count = self
                    .id_page
                    .as_ref()
                    .map(|p| p.id_block_count())
                    .unwrap_or(0);
                if self.id_slot >= count {
                    self.dir_pos += 1;
                    if self.dir_pos >= self.dir_count() {
                        self.load_in_area_block();
                        break;
                    }
                    let d = area::dir_block_off(
                        &self.pos.page.image,
                        self.off(),
                        self.id_units,
                        self.dir_pos,
                    );
                    let page_id = area::dir_page_id(&self.pos.page.image, d);
                    self.id_page = Some(cx.ovr.attach(page_id)?);
                    self.id_slot = 0;
                }
            }

            let page = self.id_page.as_ref().expect("id page attached");
            let so = page.id_slot_off(self.id_slot, self.id_units);
            if page.is_id_slot_live(self.id_slot) && !idb_is_expunged(&page.image, so) {
                let page = page.clone();
                let slot = self.id_slot;
                self.load_slot_block(page, slot);
                return Ok(true);
            }
        }

        // встроенный блок
        if self.block_first() == 0 || self.block_expunged() {
            self.current_id = UNDEFINED_DOCUMENT_ID;
            return Ok(false);
        }
        Ok(true)
    }

    fn next2(&mut self, cx: &mut ListContext<'_>) {
        self.position += 1;
        self.prev_id = self.current_id;
        self.current_off = self.next_off;
        let total = self.block_total_bits();
        let mut next_off = self.next_off;
        let current = {
            let (buf, off) = self.block_hdr();
            let r = idb_data_range(off, self.id_units);
            cx.codec
                .read_document_id(self.prev_id, &buf[r], total, &mut next_off)
        };
        self.next_off = next_off;
        self.current_id = current;
    }

    pub fn next(&mut self, cx: &mut ListContext<'_>) -> Result<()> {
        self.next_impl(cx, false)
    }

    fn next_impl(&mut self, cx: &mut ListContext<'_>, undo: bool) -> Result<()> {
        if self.is_end() {
            return Ok(());
        }
        if !self.block_loaded {
            if !self.next_id_block(cx)? {
                return Ok(());
            }
            return Ok(());
        }
        self.next2(cx);
        if self.current_id == UNDEFINED_DOCUMENT_ID && !undo {
            self.next_id_block(cx)?;
        }
        Ok(())
    }

    pub fn get_document_id(&mut self, cx: &mut ListContext<'_>) -> Result<DocumentId> {
        if self.current_id != UNDEFINED_DOCUMENT_ID && !self.block_loaded {
            self.next_id_block(cx)?;
        }
        Ok(self.current_id)
    }

    pub fn find(&mut self, cx: &mut ListContext<'_>, doc: DocumentId, undo: bool) -> Result<bool> {
        Ok(self.lower_bound(cx, doc, undo)? && self.current_id == doc)
    }

    pub fn lower_bound(
        &mut self,
        cx: &mut ListContext<'_>,
        doc_in: DocumentId,
        undo: bool,
    ) -> Result<bool> {
        let off = self.off();
        let count = area::document_count(&self.pos.page.image, off);
        let last = area::last_document_id(&self.pos.page.image, off);
        if !undo && (count == 0 || (last != 0 && last < doc_in)) {
            self.current_id = UNDEFINED_DOCUMENT_ID;
            return Ok(false);
        }

        let mut doc = doc_in;
        if undo || !self.block_loaded || self.block_first() > doc || self.block_first() == 0 {
            // холодный или обратный заход: бинарный поиск по DIR
            self.sync_valid = false;

            if undo {
                // первый id блока мог быть переписан при удалении
                let rewritten = cx.logs.get_expunge_first_document_id(&cx.key, doc);
                if rewritten != UNDEFINED_DOCUMENT_ID {
                    doc = rewritten;
                }
            }

            // кандидат по умолчанию — встроенный последний блок
            let idb = area::last_id_block_off(&self.pos.page.image, off);
            let in_area_first = idb_first_document_id(&self.pos.page.image, idb);
            let mut placed = false;

            if (in_area_first > doc || in_area_first == 0) && self.dir_count() > 0 {
                let dc = self.dir_count();
                // floor по DIR: последняя запись с doc_id <= doc
                let mut lo = 0usize;
                let mut hi = dc;
                while lo < hi {
                    let mid = (lo + hi) / 2;
                    let d =
                        area::dir_block_off(&self.pos.page.image, off, self.id_units, mid);
                    if area::dir_document_id(&self.pos.page.image, d) <= doc {
                        lo = mid + 1;
                    } else {
                        hi = mid;
                    }
                }
                let mut d = lo.saturating_sub(1);
                if !undo {
                    while d < dc {
                        let doff =
                            area::dir_block_off(&self.pos.page.image, off, self.id_units, d);
                        if area::dir_is_expunged(&self.pos.page.image, doff) {
                            d += 1;
                        } else {
                            break;
                        }
                    }
                }
                if d < dc {
                    let doff = area::dir_block_off(&self.pos.page.image, off, self.id_units, d);
                    let page_id = area::dir_page_id(&self.pos.page.image, doff);
                    let page = cx.ovr.attach(page_id)?;
                    if let Some(slot) =
                        page.lower_bound_id_block(doc, self.id_units, 0, undo)
                    {
                        self.dir_pos = d;
                        self.load_slot_block(page, slot);
                        placed = true;
                    }
                }
            }

            if !placed {
                self.dir_pos = self.dir_count();
                self.load_in_area_block();
                if self.block_first() == 0 {
                    self.current_id = UNDEFINED_DOCUMENT_ID;
                    return Ok(false);
                }
            }

            if !undo && self.block_expunged() {
                self.current_id = UNDEFINED_DOCUMENT_ID;
                return Ok(false);
            }
        } else if self.block_bound <= doc {
            // секвенциальный проход вперёд без повторного поиска
            self.sync_valid = false;
            while self.block_bound <= doc {
                if !self.next_id_block(cx)? {
                    return Ok(false);
                }
            }
        } else if self.current_id > doc {
            // внутри блока, но раньше текущей позиции: с начала блока
            self.sync_valid = false;
            if self.in_area {
                self.load_in_area_block();
            } else {
                let page = self.id_page.clone().expect("id page attached");
                let slot = self.id_slot;
                self.load_slot_block(page, slot);
            }
        }

        while self.current_id < doc {
            if self.is_end() {
                return Ok(false);
            }
            self.next_impl(cx, undo)?;
        }
        Ok(!self.is_end() || undo)
    }

    // ----- позиционный поток -----

    fn synchronize(&mut self, cx: &mut ListContext<'_>) -> Result<()> {
        if cx.codec.no_tf {
            self.frequency = 1;
            self.rec_bits = 0;
            self.data_bits = 0;
            return Ok(());
        }
        if self.current_id != UNDEFINED_DOCUMENT_ID && !self.block_loaded {
            self.next_id_block(cx)?;
        }
        if !self.sync_valid || self.sync_pos > self.position {
            let (lp, lo) = self.block_loc_position();
            if lp == NO_PAGE || lp == 0 {
                return Err(anyhow!("posting has no location chain"));
            }
            let page = cx.ovr.attach(lp)?;
            self.cursor = Some(LocCursor {
                page,
                block: lo,
                off: 0,
            });
            self.sync_pos = 0;
            self.sync_valid = true;
        }
        while self.sync_pos < self.position {
            self.skip_record(cx)?;
            self.sync_pos += 1;
        }
        self.parse_record(cx)
    }

    // Пропустить одну позиционную запись.
    fn skip_record(&mut self, cx: &mut ListContext<'_>) -> Result<()> {
        let mut cur = self.cursor.take().expect("loc cursor");
        let res = Self::skip_record_inner(cx, &mut cur);
        self.cursor = Some(cur);
        res
    }

    fn skip_record_inner(cx: &mut ListContext<'_>, cur: &mut LocCursor) -> Result<()> {
        if !cur.skip_exhausted(cx)? {
            return Err(anyhow!("location stream ends before its record"));
        }
        let freq = {
            let bit_len = cur.bit_len();
            let mut o = cur.off;
            let f = cx.codec.read_location_frequency(cur.data(), bit_len, &mut o);
            cur.off = o;
            f
        };
        if cx.codec.no_location {
            return Ok(());
        }
        if freq <= 1 {
            // единственная разность может начинаться в следующем блоке
            if !cur.skip_exhausted(cx)? {
                return Err(anyhow!("location stream ends inside a record"));
            }
            let bit_len = cur.bit_len();
            let mut o = cur.off;
            let _ = cx.codec.read_location_data(0, cur.data(), bit_len, &mut o);
            cur.off = o;
        } else {
            let bits = {
                let bit_len = cur.bit_len();
                let mut o = cur.off;
                let b = cx.codec.read_location_bit_length(cur.data(), bit_len, &mut o);
                cur.off = o;
                b
            };
            let mut need = bits;
            while need > 0 {
                let avail = cur.bit_len() - cur.off;
                if avail == 0 {
                    cur.next_block(cx)?;
                    continue;
                }
                let take = avail.min(need);
                cur.off += take;
                need -= take;
            }
        }
        Ok(())
    }

    // Разобрать запись текущего документа, не смещая курсор.
    fn parse_record(&mut self, cx: &mut ListContext<'_>) -> Result<()> {
        let mut probe = self.cursor.clone().expect("loc cursor");
        if !probe.skip_exhausted(cx)? {
            // конец потока: курсор у точки вставки (undo в хвост)
            *self.cursor.as_mut().expect("loc cursor") = probe;
            self.frequency = 0;
            self.rec_bits = 0;
            self.data_bits = 0;
            self.data_cursor = None;
            return Ok(());
        }
        *self.cursor.as_mut().expect("loc cursor") = probe.clone();
        let rec_start = probe.off;

        let freq = {
            let bit_len = probe.bit_len();
            let mut o = probe.off;
            let f = cx.codec.read_location_frequency(probe.data(), bit_len, &mut o);
            probe.off = o;
            f
        };
        self.frequency = freq.max(1);
        if cx.codec.no_location {
            self.rec_bits = probe.off - rec_start;
            self.data_bits = 0;
            self.data_cursor = None;
            return Ok(());
        }
        if freq <= 1 {
            let mut dprobe = probe.clone();
            while dprobe.off >= dprobe.bit_len() {
                dprobe.next_block(cx)?;
            }
            self.data_cursor = Some(dprobe.clone());
            let before = dprobe.off;
            let bit_len = dprobe.bit_len();
            let mut o = dprobe.off;
            let _ = cx.codec.read_location_data(0, dprobe.data(), bit_len, &mut o);
            self.data_bits = o - before;
            // запись целиком в пределах одного блока либо с перекатом
            // заголовка; длина для сплайса — заголовок + разность
            self.rec_bits = (probe.off - rec_start) + self.data_bits;
        } else {
            let dbits = {
                let bit_len = probe.bit_len();
                let mut o = probe.off;
                let b = cx.codec.read_location_bit_length(probe.data(), bit_len, &mut o);
                probe.off = o;
                b
            };
            self.data_bits = dbits;
            self.rec_bits = (probe.off - rec_start) + dbits;
            let mut dprobe = probe;
            while dprobe.off >= dprobe.bit_len() {
                dprobe.next_block(cx)?;
            }
            self.data_cursor = Some(dprobe);
        }
        Ok(())
    }

    pub fn get_in_document_frequency(&mut self, cx: &mut ListContext<'_>) -> Result<u32> {
        self.synchronize(cx)?;
        Ok(self.frequency)
    }

    /// Битовое смещение записи внутри её LOC-блока.
    pub fn get_location_offset(&mut self, cx: &mut ListContext<'_>) -> Result<usize> {
        self.synchronize(cx)?;
        Ok(self.cursor.as_ref().map(|c| c.off).unwrap_or(0))
    }

    /// Полная битовая длина записи текущего документа.
    pub fn get_location_bit_length(&mut self, cx: &mut ListContext<'_>) -> Result<usize> {
        self.synchronize(cx)?;
        Ok(self.rec_bits)
    }

    pub fn get_location_list_iterator(
        &mut self,
        cx: &mut ListContext<'_>,
    ) -> Result<LocationListIterator> {
        if cx.codec.no_tf || cx.codec.no_location {
            return Ok(LocationListIterator::empty());
        }
        self.synchronize(cx)?;
        let mut cur = self.data_cursor.clone().expect("data cursor");
        let mut out = Vec::with_capacity(self.frequency as usize);
        let mut last = 0u32;
        for _ in 0..self.frequency {
            while cur.off >= cur.bit_len() {
                cur.next_block(cx)?;
            }
            let bit_len = cur.bit_len();
            let mut o = cur.off;
            last = cx.codec.read_location_data(last, cur.data(), bit_len, &mut o);
            cur.off = o;
            out.push(last);
        }
        Ok(LocationListIterator::new(out))
    }

    // ----- удаление -----

    pub fn expunge(&mut self, cx: &mut ListContext<'_>) -> Result<()> {
        self.synchronize(cx)?;
        let rec_bits = self.rec_bits;
        let rec_cursor = self.cursor.clone();

        if self.block_first() == self.current_id {
            self.expunge_first_document_id(cx)?;
        } else {
            self.expunge_document_id(cx)?;
        }

        let off = self.off();
        area::decrement_document_count(&mut self.pos.page.image, off);

        if !cx.codec.no_tf {
            self.expunge_location(cx, rec_cursor.expect("loc cursor"), rec_bits)?;
        }
        cx.leaf.write(&self.pos.page)?;
        Ok(())
    }

    // Удаление первого документа блока.
    fn expunge_first_document_id(&mut self, cx: &mut ListContext<'_>) -> Result<()> {
        let total = if self.in_area {
            area::document_offset(&self.pos.page.image, self.off())
        } else {
            self.id_units * 32
        };
        let mut probe = self.next_off;
        let next = {
            let (buf, off) = self.block_hdr();
            let r = idb_data_range(off, self.id_units);
            cx.codec
                .read_document_id(self.current_id, &buf[r], total, &mut probe)
        };

        if next == UNDEFINED_DOCUMENT_ID {
            // блок пустеет целиком: гасим и регистрируем на вычистку
            let first = self.block_first();
            if self.in_area {
                let off = self.off();
                let idb = area::last_id_block_off(&self.pos.page.image, off);
                crate::overflow::page::idb_set_expunged(&mut self.pos.page.image, idb);
            } else {
                let page = self.id_page.as_mut().expect("id page attached");
                let so = page.id_slot_off(self.id_slot, self.id_units);
                crate::overflow::page::idb_set_expunged(&mut page.image, so);
                // все блоки страницы погашены -> DIR-запись гаснет
                let all_gone = (0..page.id_block_count()).all(|s| {
                    let o = page.id_slot_off(s, self.id_units);
                    !page.is_id_slot_live(s) || idb_is_expunged(&page.image, o)
                });
                let page = page.clone();
                cx.ovr.write(&page)?;
                if all_gone {
                    let off = self.off();
                    let d = area::dir_block_off(
                        &self.pos.page.image,
                        off,
                        self.id_units,
                        self.dir_pos,
                    );
                    area::dir_set_expunged(&mut self.pos.page.image, d, true);
                }
            }
            cx.logs.enter_delete_id_block(&cx.key, first);
            self.next_id_block(cx)?;
        } else {
            // первый id переписывается на следующий, разность уходит
            let gap = probe;
            if self.in_area {
                let off = self.off();
                let idb = area::last_id_block_off(&self.pos.page.image, off);
                {
                    let r = idb_data_range(idb, self.id_units);
                    let buf = &mut self.pos.page.image[r];
                    bitops::move_bits_back(buf, 0, gap, total - gap);
                    bitops::set_off_back(buf, total - gap, gap);
                }
                area::set_document_offset(&mut self.pos.page.image, off, total - gap);
                idb_set_first_document_id(&mut self.pos.page.image, idb, next);
            } else {
                let page = self.id_page.as_mut().expect("id page attached");
                let so = page.id_slot_off(self.id_slot, self.id_units);
                {
                    let r = idb_data_range(so, self.id_units);
                    let buf = &mut page.image[r];
                    bitops::move_bits_back(buf, 0, gap, total - gap);
                    bitops::set_off_back(buf, total - gap, gap);
                }
                idb_set_first_document_id(&mut page.image, so, next);
                let page = page.clone();
                cx.ovr.write(&page)?;
            }
            cx.logs
                .enter_expunge_first_document_id(&cx.key, self.current_id, next);
            self.current_id = next;
            self.prev_id = 0;
            self.current_off = 0;
            self.next_off = 0;
        }
        Ok(())
    }

    // Удаление не-первого документа блока.
    fn expunge_document_id(&mut self, cx: &mut ListContext<'_>) -> Result<()> {
        let in_area = self.in_area;
        let total = self.id_units * 32;
        let used = if in_area {
            area::document_offset(&self.pos.page.image, self.off())
        } else {
            total
        };
        let mut probe = self.next_off;
        let next = {
            let (buf, off) = self.block_hdr();
            let r = idb_data_range(off, self.id_units);
            cx.codec
                .read_document_id(self.current_id, &buf[r], used, &mut probe)
        };

        let area_off = self.off();
        let idb_or_slot = if in_area {
            area::last_id_block_off(&self.pos.page.image, area_off)
        } else {
            let page = self.id_page.as_ref().expect("id page attached");
            page.id_slot_off(self.id_slot, self.id_units)
        };

        if next != UNDEFINED_DOCUMENT_ID {
            let current_off = self.current_off;
            let prev_id = self.prev_id;
            let mut new_off = current_off;
            let splice = |buf: &mut [u32], new_off: &mut usize| {
                bitops::set_off_back(buf, current_off, probe - current_off);
                cx.codec.write_document_id(prev_id, next, buf, new_off);
                if *new_off != probe {
                    let len = total - probe;
                    if len > 0 {
                        bitops::move_bits_back(buf, *new_off, probe, len);
                    }
                    bitops::set_off_back(buf, *new_off + len, probe - *new_off);
                }
            };
            if in_area {
                let r = idb_data_range(idb_or_slot, self.id_units);
                splice(&mut self.pos.page.image[r], &mut new_off);
                area::set_document_offset(
                    &mut self.pos.page.image,
                    area_off,
                    used - (probe - new_off),
                );
            } else {
                let page = self.id_page.as_mut().expect("id page attached");
                let r = idb_data_range(idb_or_slot, self.id_units);
                splice(&mut page.image[r], &mut new_off);
                let page = page.clone();
                cx.ovr.write(&page)?;
            }
            self.next_off = new_off;
            self.current_id = next;
        } else {
            // последний документ блока
            if in_area {
                let r = idb_data_range(idb_or_slot, self.id_units);
                bitops::set_off_back(
                    &mut self.pos.page.image[r],
                    self.current_off,
                    self.next_off - self.current_off,
                );
                area::set_document_offset(&mut self.pos.page.image, area_off, self.current_off);
                area::set_last_document_id(&mut self.pos.page.image, area_off, self.prev_id);
            } else {
                let page = self.id_page.as_mut().expect("id page attached");
                let r = idb_data_range(idb_or_slot, self.id_units);
                bitops::set_off_back(
                    &mut page.image[r],
                    self.current_off,
                    self.next_off - self.current_off,
                );
                let page = page.clone();
                cx.ovr.write(&page)?;
            }
            self.current_id = UNDEFINED_DOCUMENT_ID;
            self.next_id_block(cx)?;
        }
        Ok(())
    }

    // Вырезать запись rec_bits бит начиная с позиции rec (сплайс по
    // блокам цепочки).
    fn expunge_location(
        &mut self,
        cx: &mut ListContext<'_>,
        mut rec: LocCursor,
        rec_bits: usize,
    ) -> Result<()> {
        let mut remaining = rec_bits;
        while remaining > 0 {
            while rec.off >= rec.bit_len() && remaining > 0 {
                rec.next_block(cx)?;
            }
            let bit_len = rec.bit_len();
            let take = remaining.min(bit_len - rec.off);
            {
                let r = crate::overflow::page::locb_data_range(&rec.page.image, rec.block);
                let block = rec.block;
                let buf_range = r.clone();
                let tail = bit_len - rec.off - take;
                let image = &mut rec.page.image;
                {
                    let buf = &mut image[buf_range];
                    if tail > 0 {
                        bitops::move_bits(buf, rec.off, rec.off + take, tail);
                    }
                    bitops::set_off(buf, rec.off + tail, take);
                }
                locb_set_data_bit_length(image, block, bit_len - take);
            }
            cx.ovr.write(&rec.page)?;
            remaining -= take;
        }
        // курсор остаётся на записи следующего документа
        self.cursor = Some(rec);
        self.sync_valid = true;
        self.sync_pos = self.position;
        Ok(())
    }

    // ----- откат удаления -----

    pub fn undo_expunge(
        &mut self,
        cx: &mut ListContext<'_>,
        doc: DocumentId,
        locs: &LocationList,
    ) -> Result<()> {
        if !cx.codec.no_tf {
            self.synchronize(cx)?;
        }
        self.undo_expunge_document_id(cx, doc)?;
        if !cx.codec.no_tf {
            self.undo_expunge_location(cx, locs)?;
        }
        let off = self.off();
        area::increment_document_count(&mut self.pos.page.image, off);
        if area::last_document_id(&self.pos.page.image, off) < doc {
            area::set_last_document_id(&mut self.pos.page.image, off, doc);
        }
        cx.leaf.write(&self.pos.page)?;
        Ok(())
    }

    fn undo_expunge_document_id(&mut self, cx: &mut ListContext<'_>, doc: DocumentId) -> Result<()> {
        let in_area = self.in_area;
        let total = self.id_units * 32;
        let area_off = self.off();

        if self.block_first() == doc {
            // гашение блока отменяется
            if in_area {
                let idb = area::last_id_block_off(&self.pos.page.image, area_off);
                idb_unset_expunged(&mut self.pos.page.image, idb);
            } else {
                let page = self.id_page.as_mut().expect("id page attached");
                let so = page.id_slot_off(self.id_slot, self.id_units);
                idb_unset_expunged(&mut page.image, so);
                let page = page.clone();
                cx.ovr.write(&page)?;
                let d = area::dir_block_off(&self.pos.page.image, area_off, self.id_units, self.dir_pos);
                area::dir_set_expunged(&mut self.pos.page.image, d, false);
            }
            self.current_id = doc;
            return Ok(());
        }

        if self.block_first() == self.current_id && self.position == 0 {
            // doc возвращается в голову блока
            let gap = cx.codec.bits_document_id(doc, self.current_id);
            let apply = |buf: &mut [u32]| {
                bitops::move_bits_back(buf, gap, 0, total - gap);
                bitops::set_off_back(buf, 0, gap);
                let mut o = 0usize;
                cx.codec.write_document_id(doc, self.current_id, buf, &mut o);
            };
            if in_area {
                let idb = area::last_id_block_off(&self.pos.page.image, area_off);
                {
                    let r = idb_data_range(idb, self.id_units);
                    apply(&mut self.pos.page.image[r]);
                }
                idb_set_first_document_id(&mut self.pos.page.image, idb, doc);
                let used = area::document_offset(&self.pos.page.image, area_off);
                area::set_document_offset(&mut self.pos.page.image, area_off, used + gap);
            } else {
                let page = self.id_page.as_mut().expect("id page attached");
                let so = page.id_slot_off(self.id_slot, self.id_units);
                {
                    let r = idb_data_range(so, self.id_units);
                    apply(&mut page.image[r]);
                }
                idb_set_first_document_id(&mut page.image, so, doc);
                let page = page.clone();
                cx.ovr.write(&page)?;
            }
            self.position += 1;
            self.prev_id = doc;
            self.current_off = 0;
            self.next_off = gap;
            return Ok(());
        }

        if self.current_id == UNDEFINED_DOCUMENT_ID {
            // doc был последним в блоке
            let mut o = self.current_off;
            if in_area {
                let idb = area::last_id_block_off(&self.pos.page.image, area_off);
                let r = idb_data_range(idb, self.id_units);
                cx.codec
                    .write_document_id(self.prev_id, doc, &mut self.pos.page.image[r], &mut o);
                area::set_document_offset(&mut self.pos.page.image, area_off, o);
            } else {
                let page = self.id_page.as_mut().expect("id page attached");
                let so = page.id_slot_off(self.id_slot, self.id_units);
                let r = idb_data_range(so, self.id_units);
                cx.codec
                    .write_document_id(self.prev_id, doc, &mut page.image[r], &mut o);
                let page = page.clone();
                cx.ovr.write(&page)?;
            }
            self.current_id = doc;
            self.next_off = o;
            return Ok(());
        }

        // интерьер: одна разность распадается на две
        let old = self.next_off - self.current_off;
        let new = cx.codec.bits_document_id(self.prev_id, doc)
            + cx.codec.bits_document_id(doc, self.current_id);
        let delta = new - old;
        let current_off = self.current_off;
        let next_off = self.next_off;
        let prev_id = self.prev_id;
        let current_id = self.current_id;
        let apply = |buf: &mut [u32]| {
            let len = total - next_off - delta;
            if len > 0 {
                bitops::move_bits_back(buf, next_off + delta, next_off, len);
            }
            bitops::set_off_back(buf, current_off, new);
            let mut o = current_off;
            cx.codec.write_document_id(prev_id, doc, buf, &mut o);
            cx.codec.write_document_id(doc, current_id, buf, &mut o);
        };
        if in_area {
            let idb = area::last_id_block_off(&self.pos.page.image, area_off);
            {
                let r = idb_data_range(idb, self.id_units);
                apply(&mut self.pos.page.image[r]);
            }
            let used = area::document_offset(&self.pos.page.image, area_off);
            area::set_document_offset(&mut self.pos.page.image, area_off, used + delta);
        } else {
            let page = self.id_page.as_mut().expect("id page attached");
            let so = page.id_slot_off(self.id_slot, self.id_units);
            {
                let r = idb_data_range(so, self.id_units);
                apply(&mut page.image[r]);
            }
            let page = page.clone();
            cx.ovr.write(&page)?;
        }
        let first_gap = cx.codec.bits_document_id(self.prev_id, doc);
        self.position += 1;
        self.next_off = self.current_off + new;
        self.current_off += first_gap;
        self.prev_id = doc;
        Ok(())
    }

    // Вставить позиционную запись по курсору. Быстрый путь — запись
    // влезает в текущий блок; иначе хвост цепочки переписывается.
    fn undo_expunge_location(&mut self, cx: &mut ListContext<'_>, locs: &LocationList) -> Result<()> {
        let (rec_bits, data_bits) = cx.codec.bits_location_list(locs);
        if rec_bits == 0 {
            return Ok(());
        }
        let mut cur = match self.cursor.clone() {
            Some(c) => c,
            None => {
                // курсор ещё не поднимался (synchronize мог упереться в
                // отсутствие цепочки) — позиция блока
                let (lp, lo) = self.block_loc_position();
                let page = cx.ovr.attach(lp)?;
                LocCursor { page, block: lo, off: 0 }
            }
        };

        let bit_len = cur.bit_len();
        let need_room = bit_len + rec_bits;
        let mut fits = need_room <= cur.capacity();
        if !fits {
            let extra = (need_room - cur.capacity() + 31) / 32;
            if cur.page.loc_block_expand_room(cur.block) >= extra {
                cur.page.expand_loc_block(cur.block, extra);
                fits = true;
            }
        }

        if fits {
            let off = cur.off;
            {
                let r = crate::overflow::page::locb_data_range(&cur.page.image, cur.block);
                let buf = &mut cur.page.image[r];
                let tail = bit_len - off;
                if tail > 0 {
                    bitops::move_bits(buf, off + rec_bits, off, tail);
                }
                bitops::set_off(buf, off, rec_bits);
                let mut o = off;
                cx.codec.write_location_list(locs, data_bits, buf, &mut o);
            }
            locb_set_data_bit_length(&mut cur.page.image, cur.block, bit_len + rec_bits);
            cx.ovr.write(&cur.page)?;
            self.cursor = Some(cur);
            self.sync_valid = true;
            self.sync_pos = self.position;
            return Ok(());
        }

        self.rewrite_chain_suffix(cx, cur, locs, rec_bits, data_bits)
    }

    // Переписать хвост цепочки: собрать биты от курсора до конца цепочки,
    // вставить запись и уложить всё заново по блокам.
    fn rewrite_chain_suffix(
        &mut self,
        cx: &mut ListContext<'_>,
        cur: LocCursor,
        locs: &LocationList,
        rec_bits: usize,
        data_bits: usize,
    ) -> Result<()> {
        // 1. запись + хвост в сплошной битовый буфер
        let mut total_bits = rec_bits;
        {
            let mut probe = cur.clone();
            loop {
                total_bits += probe.bit_len() - probe.off;
                if !locb_is_continue(&probe.page.image, probe.block) {
                    break;
                }
                probe.next_block(cx)?;
            }
        }
        let mut bitsbuf = vec![0u32; (total_bits + 31) / 32 + 1];
        let mut w = {
            let mut o = 0usize;
            cx.codec.write_location_list(locs, data_bits, &mut bitsbuf, &mut o);
            o
        };
        {
            let mut probe = cur.clone();
            loop {
                let take = probe.bit_len() - probe.off;
                bitops::copy_bits(&mut bitsbuf, w, probe.data(), probe.off, take);
                w += take;
                if !locb_is_continue(&probe.page.image, probe.block) {
                    break;
                }
                probe.next_block(cx)?;
            }
        }
        debug_assert_eq!(w, total_bits);

        // 2. уложить обратно: блоки цепочки заполняются до ёмкости,
        //    при нехватке цепочка наращивается новыми LOC-страницами
        let mut dst = cur;
        dst.page = cx.ovr.attach(dst.page.page_id)?; // свежая копия
        let mut r = 0usize;
        let mut at_start = true;
        loop {
            let base = if at_start { dst.off } else { 0 };
            let cap = dst.capacity() - base;
            let take = cap.min(total_bits - r);
            {
                let range = crate::overflow::page::locb_data_range(&dst.page.image, dst.block);
                let buf = &mut dst.page.image[range];
                bitops::set_off(buf, base, take);
                bitops::copy_bits(buf, base, &bitsbuf, r, take);
            }
            locb_set_data_bit_length(&mut dst.page.image, dst.block, base + take);
            r += take;
            if r >= total_bits {
                // уплотнение могло не израсходовать хвост цепочки:
                // оставшиеся блоки обнуляются, continue гасится
                let had_continue = locb_is_continue(&dst.page.image, dst.block);
                locb_set_continue(&mut dst.page.image, dst.block, false);
                cx.ovr.write(&dst.page)?;
                if had_continue {
                    let mut walker = dst.clone();
                    loop {
                        walker.next_block(cx)?;
                        let more = locb_is_continue(&walker.page.image, walker.block);
                        locb_set_data_bit_length(&mut walker.page.image, walker.block, 0);
                        locb_set_continue(&mut walker.page.image, walker.block, false);
                        cx.ovr.write(&walker.page)?;
                        if !more {
                            break;
                        }
                    }
                }
                // якорь последнего LOC-блока встроенного IDBlock — на
                // финальный блок перезаписанной цепочки
                if self.in_area {
                    let off = self.off();
                    area::set_last_location_page_id(&mut self.pos.page.image, off, dst.page.page_id);
                    area::set_location_offset(&mut self.pos.page.image, off, dst.block);
                }
                break;
            }
            if locb_is_continue(&dst.page.image, dst.block) {
                cx.ovr.write(&dst.page)?;
                dst.next_block(cx)?;
            } else {
                // цепочка кончилась, а биты остались: новый блок
                locb_set_continue(&mut dst.page.image, dst.block, true);
                let mut fresh = cx.ovr.allocate(crate::consts::OVR_KIND_LOC)?;
                dst.page.set_next_page_id(fresh.page_id);
                cx.ovr.write(&dst.page)?;
                let want = ((total_bits - r) + 31) / 32;
                let room = fresh
                    .free_units()
                    .saturating_sub(crate::consts::LOC_BLOCK_HDR_UNITS);
                let block = fresh
                    .allocate_loc_block(want.min(room))
                    .ok_or_else(|| anyhow!("fresh loc page cannot host a block"))?;
                cx.ovr.write(&fresh)?;
                // если хвост принадлежит встроенному блоку, якорь
                // последнего LOC-блока сдвигается
                let off = self.off();
                if self.in_area {
                    area::set_last_location_page_id(&mut self.pos.page.image, off, fresh.page_id);
                    area::set_location_offset(&mut self.pos.page.image, off, block);
                }
                dst = LocCursor {
                    page: cx.ovr.attach(fresh.page_id)?,
                    block,
                    off: 0,
                };
            }
            at_start = false;
        }

        self.sync_valid = false;
        Ok(())
    }
}
