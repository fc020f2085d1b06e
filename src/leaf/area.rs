//! Доступ к области (Area) постинг-листа внутри образа листовой страницы.
//!
//! Область адресуется парой (буфер страницы, словное смещение). Все
//! функции свободные, чтобы не держать заимствование заголовка при работе
//! с битовыми потоками data-региона.
//!
//! Layout области — см. consts.rs. Data-регион Short/Batch: поток позиций
//! растёт от головы вперёд, поток разностей id — от хвоста назад; у
//! Middle/Long в data-регионе лежит последний IDBlock, за ним DIR-записи.

use crate::consts::{
    AREA_FIXED_UNITS, AREA_OFF_DOC_COUNT, AREA_OFF_DOC_OFFSET, AREA_OFF_HEADER, AREA_OFF_KEY,
    AREA_OFF_LAST_DOC_ID, AREA_OFF_LOC_OFFSET, AREA_OFF_UNION, DIR_BLOCK_UNITS, EXPUNGE_MASK,
    DOC_ID_MASK, ID_BLOCK_HDR_UNITS, LIST_SIZE_MASK, LIST_TYPE_MASK,
};
use crate::types::DocumentId;

/// Словная длина ключа с префиксом длины: keyLen+1 u16, по два на слово.
pub fn key_units(key_len: usize) -> usize {
    (key_len + 2) / 2
}

/// Полный размер области в юнитах.
pub fn calc_area_unit_size(key_len: usize, data_units: usize) -> usize {
    AREA_FIXED_UNITS + key_units(key_len) + data_units
}

pub fn list_type(buf: &[u32], off: usize) -> u32 {
    buf[off + AREA_OFF_HEADER] & LIST_TYPE_MASK
}

pub fn set_list_type(buf: &mut [u32], off: usize, t: u32) {
    let w = &mut buf[off + AREA_OFF_HEADER];
    *w = (*w & LIST_SIZE_MASK) | t;
}

pub fn unit_size(buf: &[u32], off: usize) -> usize {
    (buf[off + AREA_OFF_HEADER] & LIST_SIZE_MASK) as usize
}

pub fn set_unit_size(buf: &mut [u32], off: usize, n: usize) {
    let w = &mut buf[off + AREA_OFF_HEADER];
    *w = (*w & LIST_TYPE_MASK) | (n as u32 & LIST_SIZE_MASK);
}

pub fn document_count(buf: &[u32], off: usize) -> u32 {
    buf[off + AREA_OFF_DOC_COUNT]
}

pub fn set_document_count(buf: &mut [u32], off: usize, n: u32) {
    buf[off + AREA_OFF_DOC_COUNT] = n;
}

pub fn increment_document_count(buf: &mut [u32], off: usize) {
    buf[off + AREA_OFF_DOC_COUNT] += 1;
}

pub fn decrement_document_count(buf: &mut [u32], off: usize) {
    buf[off + AREA_OFF_DOC_COUNT] -= 1;
}

pub fn last_document_id(buf: &[u32], off: usize) -> DocumentId {
    buf[off + AREA_OFF_LAST_DOC_ID]
}

pub fn set_last_document_id(buf: &mut [u32], off: usize, id: DocumentId) {
    buf[off + AREA_OFF_LAST_DOC_ID] = id;
}

/// Биты заднего потока id (Short/Batch) либо биты последнего IDBlock (Middle).
pub fn document_offset(buf: &[u32], off: usize) -> usize {
    buf[off + AREA_OFF_DOC_OFFSET] as usize
}

pub fn set_document_offset(buf: &mut [u32], off: usize, bits: usize) {
    buf[off + AREA_OFF_DOC_OFFSET] = bits as u32;
}

/// Биты переднего потока позиций (Short/Batch) либо юнит-смещение
/// последнего LOC-блока внутри его страницы (Middle).
pub fn location_offset(buf: &[u32], off: usize) -> usize {
    buf[off + AREA_OFF_LOC_OFFSET] as usize
}

pub fn set_location_offset(buf: &mut [u32], off: usize, v: usize) {
    buf[off + AREA_OFF_LOC_OFFSET] = v as u32;
}

pub fn first_document_id(buf: &[u32], off: usize) -> DocumentId {
    buf[off + AREA_OFF_UNION]
}

pub fn set_first_document_id(buf: &mut [u32], off: usize, id: DocumentId) {
    buf[off + AREA_OFF_UNION] = id;
}

/// Union-поле в Middle/Long: id последней LOC-страницы.
pub fn last_location_page_id(buf: &[u32], off: usize) -> u32 {
    buf[off + AREA_OFF_UNION]
}

pub fn set_last_location_page_id(buf: &mut [u32], off: usize, page_id: u32) {
    buf[off + AREA_OFF_UNION] = page_id;
}

pub fn key_len(buf: &[u32], off: usize) -> usize {
    (buf[off + AREA_OFF_KEY] & 0xFFFF) as usize
}

pub fn key(buf: &[u32], off: usize) -> Vec<u16> {
    let len = key_len(buf, off);
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        // code unit i живёт в слове (i+1)/2: нулевой — в старшей половине
        // слова длины, далее по два на слово
        let unit_index = (i + 1) / 2;
        let w = buf[off + AREA_OFF_KEY + unit_index];
        let half = if (i + 1) % 2 == 0 { w & 0xFFFF } else { w >> 16 };
        out.push(half as u16);
    }
    out
}

fn write_key(buf: &mut [u32], off: usize, key: &[u16]) {
    let kw = key_units(key.len());
    for w in buf[off + AREA_OFF_KEY..off + AREA_OFF_KEY + kw].iter_mut() {
        *w = 0;
    }
    buf[off + AREA_OFF_KEY] = key.len() as u32 & 0xFFFF;
    for (i, &cu) in key.iter().enumerate() {
        let unit_index = (i + 1) / 2;
        let w = &mut buf[off + AREA_OFF_KEY + unit_index];
        if (i + 1) % 2 == 0 {
            *w |= cu as u32;
        } else {
            *w |= (cu as u32) << 16;
        }
    }
}

/// Абсолютное словное смещение начала data-региона.
pub fn data_start(buf: &[u32], off: usize) -> usize {
    off + AREA_FIXED_UNITS + key_units(key_len(buf, off))
}

/// Длина data-региона в юнитах.
pub fn data_units(buf: &[u32], off: usize) -> usize {
    unit_size(buf, off) - AREA_FIXED_UNITS - key_units(key_len(buf, off))
}

/// Абсолютный словный диапазон data-региона.
pub fn data_range(buf: &[u32], off: usize) -> std::ops::Range<usize> {
    let start = data_start(buf, off);
    start..start + data_units(buf, off)
}

/// Список пуст: нет документов и оба граничных id нулевые.
pub fn is_empty(buf: &[u32], off: usize) -> bool {
    document_count(buf, off) == 0
        && first_document_id(buf, off) == 0
        && last_document_id(buf, off) == 0
}

/// Инициализировать область: заголовок, ключ, обнулённый data-регион.
pub fn init(buf: &mut [u32], off: usize, key: &[u16], data_units: usize, list_type: u32) {
    let total = calc_area_unit_size(key.len(), data_units);
    for w in buf[off..off + total].iter_mut() {
        *w = 0;
    }
    buf[off + AREA_OFF_HEADER] = list_type | (total as u32 & LIST_SIZE_MASK);
    write_key(buf, off, key);
}

/// Обнулить служебные поля и data-регион, сохранив тип, размер и ключ.
pub fn clear(buf: &mut [u32], off: usize) {
    buf[off + AREA_OFF_DOC_COUNT] = 0;
    buf[off + AREA_OFF_LAST_DOC_ID] = 0;
    buf[off + AREA_OFF_DOC_OFFSET] = 0;
    buf[off + AREA_OFF_LOC_OFFSET] = 0;
    buf[off + AREA_OFF_UNION] = 0;
    let r = data_range(buf, off);
    for w in buf[r].iter_mut() {
        *w = 0;
    }
}

// ----- служебные блоки Middle-области -----

/// Полный размер встроенного последнего IDBlock для данного размера данных.
pub fn id_block_total_units(id_block_units: usize) -> usize {
    ID_BLOCK_HDR_UNITS + id_block_units
}

/// Смещение встроенного последнего IDBlock (голова data-региона).
pub fn last_id_block_off(buf: &[u32], off: usize) -> usize {
    data_start(buf, off)
}

/// Число DIR-записей Middle-области; область растёт ровно на запись.
pub fn dir_block_count(buf: &[u32], off: usize, id_block_units: usize) -> usize {
    let d = data_units(buf, off);
    let fixed = id_block_total_units(id_block_units);
    debug_assert!(d >= fixed);
    (d - fixed) / DIR_BLOCK_UNITS
}

/// Абсолютное смещение DIR-записи i.
pub fn dir_block_off(buf: &[u32], off: usize, id_block_units: usize, i: usize) -> usize {
    data_start(buf, off) + id_block_total_units(id_block_units) + i * DIR_BLOCK_UNITS
}

pub fn dir_page_id(buf: &[u32], dir_off: usize) -> u32 {
    buf[dir_off]
}

pub fn dir_document_id(buf: &[u32], dir_off: usize) -> DocumentId {
    buf[dir_off + 1] & DOC_ID_MASK
}

pub fn dir_is_expunged(buf: &[u32], dir_off: usize) -> bool {
    buf[dir_off + 1] & EXPUNGE_MASK != 0
}

pub fn dir_set(buf: &mut [u32], dir_off: usize, page_id: u32, doc_id: DocumentId) {
    buf[dir_off] = page_id;
    buf[dir_off + 1] = doc_id & DOC_ID_MASK;
}

pub fn dir_set_expunged(buf: &mut [u32], dir_off: usize, expunged: bool) {
    if expunged {
        buf[dir_off + 1] |= EXPUNGE_MASK;
    } else {
        buf[dir_off + 1] &= !EXPUNGE_MASK;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::LIST_TYPE_SHORT;
    use crate::types::key_from_str;

    #[test]
    fn init_and_read_back() {
        let key = key_from_str("кот");
        let total = calc_area_unit_size(key.len(), 8);
        let mut buf = vec![0xAAAA_AAAAu32; total + 4];
        init(&mut buf, 2, &key, 8, LIST_TYPE_SHORT);

        assert_eq!(unit_size(&buf, 2), total);
        assert_eq!(list_type(&buf, 2), LIST_TYPE_SHORT);
        assert_eq!(key_len(&buf, 2), 3);
        assert_eq!(super::key(&buf, 2), key);
        assert_eq!(data_units(&buf, 2), 8);
        assert!(is_empty(&buf, 2));
        // соседние слова не тронуты
        assert_eq!(buf[0], 0xAAAA_AAAA);
        assert_eq!(buf[2 + total], 0xAAAA_AAAA);
    }

    #[test]
    fn empty_key_area() {
        let mut buf = vec![0u32; 16];
        init(&mut buf, 0, &[], 0, LIST_TYPE_SHORT);
        assert_eq!(key_len(&buf, 0), 0);
        assert_eq!(unit_size(&buf, 0), AREA_FIXED_UNITS + 1);
        assert_eq!(data_units(&buf, 0), 0);
    }

    #[test]
    fn even_odd_key_packing() {
        for s in ["a", "ab", "abc", "abcd"] {
            let key = key_from_str(s);
            let mut buf = vec![0u32; 32];
            init(&mut buf, 1, &key, 2, LIST_TYPE_SHORT);
            assert_eq!(super::key(&buf, 1), key, "key {:?}", s);
        }
    }
}
