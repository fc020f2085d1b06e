//! Middle/Long-список: тело области хранит DIR-записи и последний
//! IDBlock, остальные IDBlock-и и все LOC-блоки живут в файле
//! переполнения.
//!
//! Инварианты размещения:
//! - страницы переполнения приватны списку одного терма;
//! - DIR-запись — одна на ID-страницу, по first_document_id её первого
//!   блока; порядок записей возрастающий;
//! - позиционные данные одного IDBlock начинаются с бита 0 его
//!   LOC-блока; блок перекатывается только посреди записи, поэтому у
//!   каждого непоследнего блока цепочки взведён continue-флаг;
//! - последний LOC-блок непустого списка — якорь, его страница не
//!   освобождается.
//!
//! Long отличается от Middle только битами типа: они взводятся, как
//! только появляется первая DIR-запись.

use anyhow::{anyhow, Result};

use super::short;
use super::{ListContext, ListInsert, ListPosition};
use crate::consts::{
    DIR_BLOCK_UNITS, LIST_TYPE_LONG, LIST_TYPE_MIDDLE, LOC_BLOCK_HDR_UNITS, NO_PAGE,
    OVR_KIND_ID, OVR_KIND_IDLOC, OVR_KIND_LOC,
};
use crate::leaf::area;
use crate::metrics;
use crate::overflow::page::{
    self as ovr, idb_data_range, idb_first_document_id, idb_is_expunged, idb_loc_offset,
    idb_loc_page_id, idb_set_first_document_id, idb_set_loc_position, locb_data_bit_length,
    locb_data_units, locb_is_continue, locb_set_continue, locb_set_data_bit_length,
    OverflowPage,
};
use crate::types::{DocumentId, LocationList};

/// Начальный data-регион Middle-области: встроенный последний IDBlock.
pub fn initial_data_units(id_block_units: usize) -> usize {
    area::id_block_total_units(id_block_units)
}

/// Конвертация Short -> Middle на месте (или создание пустого Middle).
/// Содержимое Short-списка перечитывается и вставляется заново.
pub fn convert_from_short(cx: &mut ListContext<'_>, pos: &mut ListPosition) -> Result<()> {
    metrics::record_list_convert();
    let data_units = initial_data_units(cx.id_block_units);

    if pos.exists {
        let off = pos.area_off();
        let unit_size = area::unit_size(&pos.page.image, off);
        let src = pos.page.image[off..off + unit_size].to_vec();
        let postings = short::read_postings(cx.codec, &src, 0, 0);

        // размер области меняется под Middle-начертание: позиции уходят
        // в переполнение, обычно область сжимается
        let new_units = area::calc_area_unit_size(cx.key.len(), data_units);
        let change = new_units as isize - unit_size as isize;
        if change > 0 {
            if short::expand_area(cx, pos, change as usize)? == ListInsert::Full {
                return Err(anyhow!("middle area does not fit into a leaf page"));
            }
        } else if change < 0 {
            short::shorten_area(cx, pos, (-change) as usize)?;
        }

        init_area(cx, pos);
        cx.leaf.write(&pos.page)?;

        for (doc, locs) in &postings {
            insert(cx, pos, *doc, locs)?;
        }
    } else {
        let area_units = area::calc_area_unit_size(cx.key.len(), data_units);
        if pos.page.free_units() < area_units {
            pos.page = cx
                .leaf
                .split_for_insert(cx.btr, &mut pos.page, &cx.key, data_units)?;
        }
        let key = cx.key.clone();
        pos.area_idx =
            cx.leaf
                .insert_area(cx.btr, &mut pos.page, &key, data_units, LIST_TYPE_MIDDLE)?;
        pos.exists = true;
        init_area(cx, pos);
        cx.leaf.write(&pos.page)?;
    }
    Ok(())
}

// Привести существующую область к пустому Middle-начертанию.
fn init_area(cx: &ListContext<'_>, pos: &mut ListPosition) {
    let off = pos.area_off();
    area::clear(&mut pos.page.image, off);
    area::set_list_type(&mut pos.page.image, off, LIST_TYPE_MIDDLE);
    area::set_last_location_page_id(&mut pos.page.image, off, NO_PAGE);
    let idb = area::last_id_block_off(&pos.page.image, off);
    idb_set_loc_position(&mut pos.page.image, idb, NO_PAGE, 0);
    let _ = cx;
}

/// Вставка одного документа. Middle не переполняется (рост уходит в
/// переполнение и DIR), поэтому исход всегда Done.
pub fn insert(
    cx: &mut ListContext<'_>,
    pos: &mut ListPosition,
    doc_id: DocumentId,
    locs: &LocationList,
) -> Result<()> {
    cx.check_cancel()?;
    let (loc_bits, data_bits) = cx.codec.bits_location_list(locs);

    let off = pos.area_off();
    let idb = area::last_id_block_off(&pos.page.image, off);
    let first = idb_first_document_id(&pos.page.image, idb);
    let expunged = idb_is_expunged(&pos.page.image, idb);

    if first == 0 && !expunged {
        // встроенный блок пуст: документ становится его первым
        start_fresh_id_block(cx, pos, doc_id, loc_bits)?;
    } else if expunged {
        // погашенный блок ждёт вычистки: уводим его в переполнение,
        // документ открывает свежий встроенный блок
        copy_id_block(cx, pos)?;
        start_fresh_id_block(cx, pos, doc_id, loc_bits)?;
    } else {
        let last = area::last_document_id(&pos.page.image, off);
        let gap_bits = cx.codec.bits_document_id(last, doc_id);
        let used = area::document_offset(&pos.page.image, off);
        if used + gap_bits > cx.id_block_units * 32 {
            // встроенный блок полон: копия в переполнение, новый блок
            copy_id_block(cx, pos)?;
            start_fresh_id_block(cx, pos, doc_id, loc_bits)?;
        } else {
            let off = pos.area_off();
            let idb = area::last_id_block_off(&pos.page.image, off);
            let r = idb_data_range(idb, cx.id_block_units);
            let mut bit_off = used;
            cx.codec
                .write_document_id(last, doc_id, &mut pos.page.image[r], &mut bit_off);
            area::set_document_offset(&mut pos.page.image, off, bit_off);
        }
    }

    if !cx.codec.no_tf {
        write_locations(cx, pos, locs, data_bits)?;
    }

    let off = pos.area_off();
    area::set_last_document_id(&mut pos.page.image, off, doc_id);
    area::increment_document_count(&mut pos.page.image, off);
    cx.leaf.write(&pos.page)?;
    Ok(())
}

/// Массовая вставка: постинги источника (Short/Batch-область)
/// проигрываются по одному.
pub fn insert_from_area(
    cx: &mut ListContext<'_>,
    pos: &mut ListPosition,
    src: &[u32],
    base: DocumentId,
) -> Result<()> {
    if area::document_count(src, 0) == 0 {
        return Ok(());
    }
    let off = pos.area_off();
    let src_first = area::first_document_id(src, 0) + base;
    if area::last_document_id(&pos.page.image, off) >= src_first {
        // источник уже свёрнут в этот список
        return Ok(());
    }
    for (doc, locs) in short::read_postings(cx.codec, src, 0, base) {
        insert(cx, pos, doc, &locs)?;
    }
    Ok(())
}

// Инициализировать встроенный блок новым первым документом; при
// необходимости открыть для него свежий LOC-блок (позиции блока всегда
// начинаются с бита 0 своего LOC-блока).
fn start_fresh_id_block(
    cx: &mut ListContext<'_>,
    pos: &mut ListPosition,
    doc_id: DocumentId,
    loc_bits: usize,
) -> Result<()> {
    let mut loc_pos = (NO_PAGE, 0usize);
    if !cx.codec.no_tf {
        let off = pos.area_off();
        let cur_page = area::last_location_page_id(&pos.page.image, off);
        if cur_page == NO_PAGE {
            // первый LOC-блок списка: IDLOC-страница под оба вида блоков
            let mut page = cx.ovr.allocate(OVR_KIND_IDLOC)?;
            let want = units_for_bits(loc_bits).max(1);
            let room = page.free_units().saturating_sub(LOC_BLOCK_HDR_UNITS);
            let block = page
                .allocate_loc_block(want.min(room))
                .ok_or_else(|| anyhow!("fresh IDLOC page cannot host a loc block"))?;
            loc_pos = (page.page_id, block);
            cx.ovr.write(&page)?;
        } else {
            let cur_off = area::location_offset(&pos.page.image, off);
            let mut page = cx.ovr.attach(cur_page)?;
            if locb_data_bit_length(&page.image, cur_off) == 0 {
                // текущий блок ещё пуст — он и станет блоком нового IDBlock
                loc_pos = (cur_page, cur_off);
            } else {
                let (npage, nblock) = roll_loc_block(cx, &mut page, cur_off, false, loc_bits)?;
                loc_pos = (npage, nblock);
            }
        }
        let off = pos.area_off();
        area::set_last_location_page_id(&mut pos.page.image, off, loc_pos.0);
        area::set_location_offset(&mut pos.page.image, off, loc_pos.1);
    }

    let off = pos.area_off();
    let idb = area::last_id_block_off(&pos.page.image, off);
    // блок мог быть погашен целиком: бит снимается при переинициализации
    pos.page.image[idb] = 0;
    idb_set_first_document_id(&mut pos.page.image, idb, doc_id);
    idb_set_loc_position(&mut pos.page.image, idb, loc_pos.0, loc_pos.1);
    let r = idb_data_range(idb, cx.id_block_units);
    for w in pos.page.image[r].iter_mut() {
        *w = 0;
    }
    area::set_document_offset(&mut pos.page.image, off, 0);
    Ok(())
}

// Скопировать встроенный последний IDBlock на страницу переполнения и
// завести DIR-запись, если блок лёг на новую страницу.
fn copy_id_block(cx: &mut ListContext<'_>, pos: &mut ListPosition) -> Result<()> {
    let off = pos.area_off();
    let idb = area::last_id_block_off(&pos.page.image, off);
    let block_words =
        pos.page.image[idb..idb + area::id_block_total_units(cx.id_block_units)].to_vec();
    let block_first = idb_first_document_id(&block_words, 0);

    // целевая страница: последняя DIR-страница с местом, затем стартовая
    // IDLOC-страница, иначе свежая ID-страница
    let dir_count = area::dir_block_count(&pos.page.image, off, cx.id_block_units);
    let mut target: Option<OverflowPage> = None;
    if dir_count > 0 {
        let last_dir =
            area::dir_block_off(&pos.page.image, off, cx.id_block_units, dir_count - 1);
        let page_id = area::dir_page_id(&pos.page.image, last_dir);
        let page = cx.ovr.attach(page_id)?;
        if page_has_id_room(&page, cx.id_block_units) {
            target = Some(page);
        }
    } else {
        let loc_page_id = area::last_location_page_id(&pos.page.image, off);
        if loc_page_id != NO_PAGE {
            // продолжение может жить уже на LOC-страницах; проверяем
            // только стартовую страницу списка
            let start_page = idb_loc_page_id(&pos.page.image, idb);
            if start_page != NO_PAGE {
                let page = cx.ovr.attach(start_page)?;
                if page.kind() == OVR_KIND_IDLOC && page_has_id_room(&page, cx.id_block_units) {
                    target = Some(page);
                }
            }
        }
    }

    let (mut page, new_page) = match target {
        Some(p) => (p, false),
        None => (cx.ovr.allocate(OVR_KIND_ID)?, true),
    };

    let slot = page
        .allocate_id_block(cx.id_block_units)
        .ok_or_else(|| anyhow!("id page {} has no room for a block", page.page_id))?;
    let slot_off = page.id_slot_off(slot, cx.id_block_units);
    let n = block_words.len();
    page.image[slot_off..slot_off + n].copy_from_slice(&block_words);
    cx.ovr.write(&page)?;

    let need_dir = new_page || dir_count == 0;
    if need_dir {
        add_dir_block(cx, pos, page.page_id, block_first)?;
    }
    Ok(())
}

fn page_has_id_room(page: &OverflowPage, id_units: usize) -> bool {
    let slot = page.id_block_count();
    if slot >= crate::consts::OVR_MAX_ID_SLOTS {
        return false;
    }
    let su = OverflowPage::id_slot_units(id_units);
    (slot + 1) * su <= page.data_units() && page.free_units() >= su
}

// Добавить DIR-запись (page_id, first_doc); область растёт ровно на
// одну запись, при нехватке места на странице — разрез листа.
fn add_dir_block(
    cx: &mut ListContext<'_>,
    pos: &mut ListPosition,
    page_id: u32,
    first_doc: DocumentId,
) -> Result<()> {
    if pos.page.free_units() < DIR_BLOCK_UNITS {
        let (page, idx) =
            cx.leaf
                .split_for_expand(cx.btr, &mut pos.page, pos.area_idx, DIR_BLOCK_UNITS)?;
        pos.page = page;
        pos.area_idx = idx;
    }
    let grown = pos
        .page
        .change_area_size(pos.area_idx, DIR_BLOCK_UNITS as isize);
    debug_assert!(grown);

    let off = pos.area_off();
    let dir_count = area::dir_block_count(&pos.page.image, off, cx.id_block_units);
    let dir_off = area::dir_block_off(&pos.page.image, off, cx.id_block_units, dir_count - 1);
    area::dir_set(&mut pos.page.image, dir_off, page_id, first_doc);
    // с первой DIR-записью список становится Long
    area::set_list_type(&mut pos.page.image, off, LIST_TYPE_LONG);
    Ok(())
}

fn units_for_bits(bits: usize) -> usize {
    (bits + 31) / 32
}

// Записать позиционную запись одного документа в хвост LOC-цепочки.
// Заголовок (частота [, длина]) пишется целиком в один блок; разности
// позиций могут перекатываться через блоки с continue-флагом.
fn write_locations(
    cx: &mut ListContext<'_>,
    pos: &mut ListPosition,
    locs: &LocationList,
    data_bits: usize,
) -> Result<()> {
    let off = pos.area_off();
    let page_id = area::last_location_page_id(&pos.page.image, off);
    debug_assert_ne!(page_id, NO_PAGE);
    let mut page = cx.ovr.attach(page_id)?;
    let mut block = area::location_offset(&pos.page.image, off);

    let frequency = locs.size().max(1);
    let mut header_bits = cx.codec.bits_frequency(frequency);
    if !cx.codec.no_location && frequency > 1 {
        header_bits += cx.codec.bits_bit_length(data_bits);
    }

    // заголовок не дробится: расширяем блок или перекатываемся; continue
    // взводится на каждом перекате внутри цепочки одного IDBlock, чтобы
    // обходы цепочки (освобождение, переписывание хвоста) шли по флагу
    if !block_fits(&page, block, header_bits) && !try_expand(&mut page, block, header_bits) {
        let (npid, nblock) = roll_loc_block(cx, &mut page, block, true, header_bits + data_bits)?;
        page = cx.ovr.attach(npid)?;
        block = nblock;
        update_area_loc(cx, pos, npid, nblock);
    }
    {
        let mut bits = locb_data_bit_length(&page.image, block);
        let r = ovr::locb_data_range(&page.image, block);
        let buf = &mut page.image[r];
        cx.codec.write_location_frequency(frequency, buf, &mut bits);
        if !cx.codec.no_location && frequency > 1 {
            cx.codec.write_location_bit_length(data_bits, buf, &mut bits);
        }
        locb_set_data_bit_length(&mut page.image, block, bits);
    }

    if cx.codec.no_location {
        cx.ovr.write(&page)?;
        return Ok(());
    }

    // разности позиций: пишем сколько влезает, расширяем, перекатываемся
    let slice = locs.as_slice();
    let mut idx = 0usize;
    let mut last = 0u32;
    while idx < slice.len() {
        let capacity = locb_data_units(&page.image, block) * 32;
        let used = locb_data_bit_length(&page.image, block);
        let (new_last, written) = {
            let r = ovr::locb_data_range(&page.image, block);
            let buf = &mut page.image[r];
            let mut off_bits = used;
            let out = cx.codec.write_location_run(
                last,
                slice,
                idx,
                buf,
                &mut off_bits,
                Some(capacity),
            );
            locb_set_data_bit_length(&mut page.image, block, off_bits);
            out
        };
        last = new_last;
        idx += written;
        if idx >= slice.len() {
            break;
        }

        // не влезло: блок расширяется в пределах страницы, иначе перекат
        // посреди записи с continue-флагом
        let next_bits = cx.codec.bits_location(last, slice[idx]);
        if try_expand(&mut page, block, next_bits) {
            continue;
        }
        let remaining: usize = {
            let mut l = last;
            slice[idx..]
                .iter()
                .map(|&x| {
                    let b = cx.codec.bits_location(l, x);
                    l = x;
                    b
                })
                .sum()
        };
        let (npid, nblock) = roll_loc_block(cx, &mut page, block, true, remaining)?;
        page = cx.ovr.attach(npid)?;
        block = nblock;
        update_area_loc(cx, pos, npid, nblock);
    }

    cx.ovr.write(&page)?;
    Ok(())
}

fn block_fits(page: &OverflowPage, block: usize, bits: usize) -> bool {
    locb_data_bit_length(&page.image, block) + bits <= locb_data_units(&page.image, block) * 32
}

// Попробовать нарастить блок так, чтобы влезло ещё need бит.
fn try_expand(page: &mut OverflowPage, block: usize, need: usize) -> bool {
    let capacity = locb_data_units(&page.image, block) * 32;
    let used = locb_data_bit_length(&page.image, block);
    if used + need <= capacity {
        return true;
    }
    let extra = units_for_bits(used + need - capacity);
    let room = page.loc_block_expand_room(block);
    if room >= extra {
        page.expand_loc_block(block, extra)
    } else {
        false
    }
}

fn update_area_loc(cx: &ListContext<'_>, pos: &mut ListPosition, page_id: u32, block: usize) {
    let off = pos.area_off();
    area::set_last_location_page_id(&mut pos.page.image, off, page_id);
    area::set_location_offset(&mut pos.page.image, off, block);
    let _ = cx;
}

// Перекат LOC-цепочки: новая LOC-страница со свежим блоком; у прежнего
// блока по необходимости взводится continue-флаг, страницы связываются.
fn roll_loc_block(
    cx: &mut ListContext<'_>,
    cur_page: &mut OverflowPage,
    cur_block: usize,
    set_continue: bool,
    want_bits: usize,
) -> Result<(u32, usize)> {
    if set_continue {
        locb_set_continue(&mut cur_page.image, cur_block, true);
    }
    let mut fresh = cx.ovr.allocate(OVR_KIND_LOC)?;
    cur_page.set_next_page_id(fresh.page_id);
    cx.ovr.write(cur_page)?;

    let want = units_for_bits(want_bits).max(1);
    let room = fresh.free_units().saturating_sub(LOC_BLOCK_HDR_UNITS);
    let block = fresh
        .allocate_loc_block(want.min(room))
        .ok_or_else(|| anyhow!("fresh loc page cannot host a block"))?;
    let id = fresh.page_id;
    cx.ovr.write(&fresh)?;
    Ok((id, block))
}

/// Вычистить IDBlock-и, заявленные на удаление (vacuum после фиксации
/// логического удаления). Возвращает число вычищенных блоков.
pub fn expunge_id_blocks(
    cx: &mut ListContext<'_>,
    pos: &mut ListPosition,
    first_ids: &[DocumentId],
) -> Result<usize> {
    let mut reclaimed = 0usize;
    for &target in first_ids {
        cx.check_cancel()?;
        if expunge_one_id_block(cx, pos, target)? {
            reclaimed += 1;
            metrics::record_expunged_id_block();
        }
    }
    cx.leaf.write(&pos.page)?;
    Ok(reclaimed)
}

fn expunge_one_id_block(
    cx: &mut ListContext<'_>,
    pos: &mut ListPosition,
    target: DocumentId,
) -> Result<bool> {
    let off = pos.area_off();
    let idb = area::last_id_block_off(&pos.page.image, off);

    // встроенный блок
    if idb_is_expunged(&pos.page.image, idb)
        && idb_first_document_id(&pos.page.image, idb) == target
    {
        let loc_page = idb_loc_page_id(&pos.page.image, idb);
        let loc_off = idb_loc_offset(&pos.page.image, idb);
        free_loc_chain(cx, pos, loc_page, loc_off)?;
        let idb = area::last_id_block_off(&pos.page.image, off);
        pos.page.image[idb] = 0;
        idb_set_loc_position(&mut pos.page.image, idb, NO_PAGE, 0);
        let r = idb_data_range(idb, cx.id_block_units);
        for w in pos.page.image[r].iter_mut() {
            *w = 0;
        }
        area::set_document_offset(&mut pos.page.image, off, 0);
        return Ok(true);
    }

    // блоки на ID-страницах
    let dir_count = area::dir_block_count(&pos.page.image, off, cx.id_block_units);
    for d in 0..dir_count {
        let dir_off = area::dir_block_off(&pos.page.image, off, cx.id_block_units, d);
        let page_id = area::dir_page_id(&pos.page.image, dir_off);
        let mut page = cx.ovr.attach(page_id)?;
        let count = page.id_block_count();
        for slot in 0..count {
            let so = page.id_slot_off(slot, cx.id_block_units);
            if !page.is_id_slot_live(slot)
                || !idb_is_expunged(&page.image, so)
                || idb_first_document_id(&page.image, so) != target
            {
                continue;
            }
            let loc_page = idb_loc_page_id(&page.image, so);
            let loc_off = idb_loc_offset(&page.image, so);
            page.free_id_block(slot);
            let live = page.live_id_block_count();
            let kind = page.kind();
            let anchor = area::last_location_page_id(&pos.page.image, off) == page.page_id;
            cx.ovr.write(&page)?;
            free_loc_chain(cx, pos, loc_page, loc_off)?;

            if live == 0 {
                // страница больше не нужна (якорную IDLOC держим)
                let page = cx.ovr.attach(page_id)?;
                if page.kind() == OVR_KIND_ID
                    || (kind == OVR_KIND_IDLOC && page.loc_block_count() == 0 && !anchor)
                {
                    cx.ovr.free_page(page_id)?;
                }
                remove_dir_block(cx, pos, d)?;
            }
            return Ok(true);
        }
    }
    Ok(false)
}

// Освободить LOC-цепочку одного IDBlock начиная с (page_id, block_off).
fn free_loc_chain(
    cx: &mut ListContext<'_>,
    pos: &mut ListPosition,
    mut page_id: u32,
    mut block_off: usize,
) -> Result<()> {
    let off = pos.area_off();
    while page_id != NO_PAGE && page_id != 0 {
        let mut page = cx.ovr.attach(page_id)?;
        let is_continue = locb_is_continue(&page.image, block_off);
        let next = if is_continue {
            page.next_page_id()
        } else {
            NO_PAGE
        };

        let is_anchor_block = area::last_location_page_id(&pos.page.image, off) == page_id
            && area::location_offset(&pos.page.image, off) == block_off;
        if is_anchor_block {
            // первый LOC-блок живого встроенного IDBlock: continue гаснет
            locb_set_continue(&mut page.image, block_off, false);
        } else {
            page.free_loc_block(block_off);
        }

        let idle = page.kind() == OVR_KIND_LOC
            && page.loc_block_count() == 0
            && area::last_location_page_id(&pos.page.image, off) != page.page_id;
        cx.ovr.write(&page)?;
        if idle {
            cx.ovr.free_page(page_id)?;
        }

        page_id = next;
        // продолжение цепочки — первый блок следующей страницы
        if page_id != NO_PAGE {
            let npage = cx.ovr.attach(page_id)?;
            block_off = npage.data_start();
        }
    }
    Ok(())
}

// Убрать DIR-запись d: хвост массива сдвигается, область сжимается.
fn remove_dir_block(cx: &mut ListContext<'_>, pos: &mut ListPosition, d: usize) -> Result<()> {
    let off = pos.area_off();
    let dir_count = area::dir_block_count(&pos.page.image, off, cx.id_block_units);
    for i in d..dir_count - 1 {
        let src = area::dir_block_off(&pos.page.image, off, cx.id_block_units, i + 1);
        let dst = area::dir_block_off(&pos.page.image, off, cx.id_block_units, i);
        let (pid, did) = (
            area::dir_page_id(&pos.page.image, src),
            pos.page.image[src + 1],
        );
        pos.page.image[dst] = pid;
        pos.page.image[dst + 1] = did;
    }
    let shrunk = pos
        .page
        .change_area_size(pos.area_idx, -(DIR_BLOCK_UNITS as isize));
    debug_assert!(shrunk);
    let off = pos.area_off();
    if area::dir_block_count(&pos.page.image, off, cx.id_block_units) == 0 {
        area::set_list_type(&mut pos.page.image, off, LIST_TYPE_MIDDLE);
    }
    Ok(())
}
