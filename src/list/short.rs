//! Short-список: весь постинг-лист в одной области листовой страницы.
//!
//! Data-регион делят два битовых потока: позиции растут от головы вперёд
//! (location_offset бит занято), разности документов — от хвоста назад
//! (document_offset бит). Первый id хранится открытым в заголовке
//! области. Вставка, не влезающая в max_area_unit_size, возвращает Full —
//! вызывающий конвертирует список в Middle и повторяет.

use anyhow::Result;

use super::{ListContext, ListInsert, ListPosition};
use crate::coder::bitops;
use crate::consts::LIST_TYPE_SHORT;
use crate::leaf::area;
use crate::types::{DocumentId, LocationList};

/// Вставка одного документа. Full — выход за пределы Short-варианта.
pub fn insert(
    cx: &mut ListContext<'_>,
    pos: &mut ListPosition,
    doc_id: DocumentId,
    locs: &LocationList,
) -> Result<ListInsert> {
    let (loc_bits, data_bits) = cx.codec.bits_location_list(locs);

    // вставка одного документа не перестраивает соседние страницы:
    // только рост области, при нехватке места — разрез 1->2 / 1->3
    if insert_or_expand_area(cx, pos, doc_id, loc_bits)? == ListInsert::Full {
        return Ok(ListInsert::Full);
    }

    let off = pos.area_off();
    let last = area::last_document_id(&pos.page.image, off);

    if last == 0 {
        // первый документ списка
        area::set_first_document_id(&mut pos.page.image, off, doc_id);
    } else {
        let mut bit_off = area::document_offset(&pos.page.image, off);
        let r = area::data_range(&pos.page.image, off);
        cx.codec
            .write_document_id(last, doc_id, &mut pos.page.image[r], &mut bit_off);
        area::set_document_offset(&mut pos.page.image, off, bit_off);
    }

    {
        let mut bit_off = area::location_offset(&pos.page.image, off);
        let r = area::data_range(&pos.page.image, off);
        cx.codec
            .write_location_list(locs, data_bits, &mut pos.page.image[r], &mut bit_off);
        area::set_location_offset(&mut pos.page.image, off, bit_off);
    }

    area::set_last_document_id(&mut pos.page.image, off, doc_id);
    area::increment_document_count(&mut pos.page.image, off);

    cx.leaf.write(&pos.page)?;
    Ok(ListInsert::Done)
}

/// Массовая вставка другого Short/Batch-списка (склейка потоков).
/// base прибавляется к id источника (batch хранит их относительно
/// последнего id юнита на момент старта батча).
pub fn insert_list(
    cx: &mut ListContext<'_>,
    pos: &mut ListPosition,
    src: &[u32],
    base: DocumentId,
) -> Result<ListInsert> {
    if area::document_count(src, 0) == 0 {
        return Ok(ListInsert::Done);
    }
    let src_first = area::first_document_id(src, 0) + base;
    let src_last = area::last_document_id(src, 0) + base;
    let src_doc_bits = area::document_offset(src, 0);
    let src_loc_bits = area::location_offset(src, 0);

    if pos.exists {
        let off = pos.area_off();
        let last = area::last_document_id(&pos.page.image, off);

        if last >= src_first {
            // источник уже свёрнут в этот список
            return Ok(ListInsert::Done);
        }

        let first_gap_bits = if last != 0 {
            cx.codec.bits_document_id(last, src_first)
        } else {
            0
        };
        let total = area::document_offset(&pos.page.image, off)
            + first_gap_bits
            + src_doc_bits
            + area::location_offset(&pos.page.image, off)
            + src_loc_bits;
        let need_units = (total + 31) / 32;
        let have_units = area::data_units(&pos.page.image, off);
        if need_units > have_units {
            if expand_area(cx, pos, need_units - have_units)? == ListInsert::Full {
                return Ok(ListInsert::Full);
            }
        }

        let off = pos.area_off();
        if last == 0 {
            area::set_first_document_id(&mut pos.page.image, off, src_first);
        } else {
            let mut bit_off = area::document_offset(&pos.page.image, off);
            let r = area::data_range(&pos.page.image, off);
            cx.codec
                .write_document_id(last, src_first, &mut pos.page.image[r], &mut bit_off);
            area::set_document_offset(&mut pos.page.image, off, bit_off);
        }

        // хвост потока id источника (разности не зависят от base)
        {
            let bit_off = area::document_offset(&pos.page.image, off);
            let r = area::data_range(&pos.page.image, off);
            let src_r = area::data_range(src, 0);
            bitops::copy_bits_back(
                &mut pos.page.image[r],
                bit_off,
                &src[src_r],
                0,
                src_doc_bits,
            );
            area::set_document_offset(&mut pos.page.image, off, bit_off + src_doc_bits);
        }

        // поток позиций источника
        {
            let bit_off = area::location_offset(&pos.page.image, off);
            let r = area::data_range(&pos.page.image, off);
            let src_r = area::data_range(src, 0);
            bitops::copy_bits(&mut pos.page.image[r], bit_off, &src[src_r], 0, src_loc_bits);
            area::set_location_offset(&mut pos.page.image, off, bit_off + src_loc_bits);
        }

        area::set_last_document_id(&mut pos.page.image, off, src_last);
        let count =
            area::document_count(&pos.page.image, off) + area::document_count(src, 0);
        area::set_document_count(&mut pos.page.image, off, count);
    } else {
        // области нет: копия источника с точным размером данных
        let total = src_doc_bits + src_loc_bits;
        let data_units = (total + 31) / 32;
        let area_units = area::calc_area_unit_size(cx.key.len(), data_units);
        if area_units > pos.page.max_area_unit_size() {
            return Ok(ListInsert::Full);
        }
        if pos.page.free_units() < area_units {
            pos.page =
                cx.leaf
                    .split_for_insert(cx.btr, &mut pos.page, &cx.key, data_units)?;
        }
        let key = cx.key.clone();
        pos.area_idx =
            cx.leaf
                .insert_area(cx.btr, &mut pos.page, &key, data_units, LIST_TYPE_SHORT)?;
        pos.exists = true;

        let off = pos.area_off();
        area::set_first_document_id(&mut pos.page.image, off, src_first);
        area::set_last_document_id(&mut pos.page.image, off, src_last);
        area::set_document_count(&mut pos.page.image, off, area::document_count(src, 0));
        area::set_document_offset(&mut pos.page.image, off, src_doc_bits);
        area::set_location_offset(&mut pos.page.image, off, src_loc_bits);
        let r = area::data_range(&pos.page.image, off);
        let src_r = area::data_range(src, 0);
        bitops::copy_bits_back(&mut pos.page.image[r.clone()], 0, &src[src_r.clone()], 0, src_doc_bits);
        bitops::copy_bits(&mut pos.page.image[r], 0, &src[src_r], 0, src_loc_bits);
    }

    cx.leaf.write(&pos.page)?;
    Ok(ListInsert::Done)
}

// Подготовить область под запись doc_id с loc_bits битами позиций:
// создать новую или расширить существующую. Full — выход за Short.
fn insert_or_expand_area(
    cx: &mut ListContext<'_>,
    pos: &mut ListPosition,
    doc_id: DocumentId,
    loc_bits: usize,
) -> Result<ListInsert> {
    if pos.exists {
        let off = pos.area_off();
        let last = area::last_document_id(&pos.page.image, off);
        let id_bits = if last != 0 {
            cx.codec.bits_document_id(last, doc_id)
        } else {
            0
        };
        let total = area::document_offset(&pos.page.image, off)
            + id_bits
            + area::location_offset(&pos.page.image, off)
            + loc_bits;
        let need_units = (total + 31) / 32;
        let have_units = area::data_units(&pos.page.image, off);
        if need_units > have_units {
            return expand_area(cx, pos, need_units - have_units);
        }
        Ok(ListInsert::Done)
    } else {
        let data_units = (loc_bits + 31) / 32;
        let area_units = area::calc_area_unit_size(cx.key.len(), data_units);
        if area_units > pos.page.max_area_unit_size() {
            return Ok(ListInsert::Full);
        }
        if pos.page.free_units() < area_units {
            pos.page =
                cx.leaf
                    .split_for_insert(cx.btr, &mut pos.page, &cx.key, data_units)?;
        }
        let key = cx.key.clone();
        pos.area_idx =
            cx.leaf
                .insert_area(cx.btr, &mut pos.page, &key, data_units, LIST_TYPE_SHORT)?;
        pos.exists = true;
        Ok(ListInsert::Done)
    }
}

/// Расширить область на expand юнитов, перенеся задний поток id к новому
/// хвосту. Full — результат вышел бы за max_area_unit_size.
pub(crate) fn expand_area(
    cx: &mut ListContext<'_>,
    pos: &mut ListPosition,
    expand: usize,
) -> Result<ListInsert> {
    let off = pos.area_off();
    if area::unit_size(&pos.page.image, off) + expand > pos.page.max_area_unit_size() {
        return Ok(ListInsert::Full);
    }
    if pos.page.free_units() < expand {
        let (page, idx) =
            cx.leaf
                .split_for_expand(cx.btr, &mut pos.page, pos.area_idx, expand)?;
        pos.page = page;
        pos.area_idx = idx;
    }
    let grown = pos.page.change_area_size(pos.area_idx, expand as isize);
    debug_assert!(grown);

    // задний поток id переезжает к новому хвосту data-региона
    let off = pos.area_off();
    let doc_bits = area::document_offset(&pos.page.image, off);
    if doc_bits > 0 {
        let r = area::data_range(&pos.page.image, off);
        let buf = &mut pos.page.image[r];
        bitops::move_bits_back(buf, 0, expand * 32, doc_bits);
        bitops::set_off_back(buf, doc_bits, expand * 32);
    }
    Ok(ListInsert::Done)
}

/// Сжать область на shrink юнитов (хвост отрезается; используется только
/// перед полной переинициализацией области при конвертации).
pub(crate) fn shorten_area(
    cx: &mut ListContext<'_>,
    pos: &mut ListPosition,
    shrink: usize,
) -> Result<()> {
    let done = pos.page.change_area_size(pos.area_idx, -(shrink as isize));
    debug_assert!(done);

    // полупустая страница — кандидат на слияние с соседом
    let margin = crate::consts::DIR_BLOCK_UNITS;
    if pos.page.free_units() > pos.page.page_units() / 2 + margin {
        let (page, idx) = cx.leaf.reduce(cx.btr, &mut pos.page, pos.area_idx)?;
        pos.page = page;
        pos.area_idx = idx;
    }
    Ok(())
}

/// Прочитать все постинги области Short/Batch (для конвертации и слияния).
pub fn read_postings(
    codec: &super::ListCodec,
    buf: &[u32],
    off: usize,
    base: DocumentId,
) -> Vec<(DocumentId, LocationList)> {
    let count = area::document_count(buf, off) as usize;
    let mut out = Vec::with_capacity(count);
    if count == 0 {
        return out;
    }
    let doc_bits = area::document_offset(buf, off);
    let loc_bits = area::location_offset(buf, off);
    let r = area::data_range(buf, off);
    let data = &buf[r];

    let mut id = area::first_document_id(buf, off);
    let mut id_off = 0usize;
    let mut loc_off = 0usize;
    for k in 0..count {
        if k > 0 {
            id = codec.read_document_id(id, data, doc_bits, &mut id_off);
        }
        let locs = if codec.no_tf {
            LocationList::empty()
        } else {
            let frequency = codec.read_location_frequency(data, loc_bits, &mut loc_off);
            if codec.no_location {
                // частота без позиций: переносим её синтетическим списком
                LocationList::from_sorted((1..=frequency).collect())
            } else {
                let mut last = 0u32;
                let mut v = Vec::with_capacity(frequency as usize);
                if frequency > 1 {
                    let _data_bits =
                        codec.read_location_bit_length(data, loc_bits, &mut loc_off);
                }
                for _ in 0..frequency {
                    last = codec.read_location_data(last, data, loc_bits, &mut loc_off);
                    v.push(last);
                }
                LocationList::from_sorted(v)
            }
        };
        out.push((id + base, locs));
    }
    out
}
