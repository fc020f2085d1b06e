// Общие имена файлов юнита
pub const BTR_FILE: &str = "Btr";
pub const LEAF_FILE: &str = "Leaf";
pub const OVR_FILE: &str = "Ovr";

pub const LOCK_FILE: &str = "LOCK";
pub const UNAVAILABLE_FILE: &str = "UNAVAILABLE";

// Подкаталоги юнитов при распределении (Inv0, Inv1, ...)
pub const UNIT_DIR_PREFIX: &str = "Inv";

// Заголовок постраничного файла (страница 0, 36 байт):
// [magic8][version u32][page_size u32][page_count u32][free_head u32][aux0 u32][aux1 u32][crc32 u32]
pub const LEAF_MAGIC: &[u8; 8] = b"PDBLEAF1";
pub const OVR_MAGIC: &[u8; 8] = b"PDBOVFL1";
pub const BTR_MAGIC: &[u8; 8] = b"PDBBTRE1";
pub const FILE_HDR_SIZE: usize = 36;
pub const FILE_VERSION: u32 = 1;

// Offsets inside the file header
pub const HDR_OFF_VERSION: usize = 8;
pub const HDR_OFF_PAGE_SIZE: usize = 12;
pub const HDR_OFF_PAGE_COUNT: usize = 16;
pub const HDR_OFF_FREE_HEAD: usize = 20;
pub const HDR_OFF_AUX0: usize = 24;
pub const HDR_OFF_AUX1: usize = 28;

/// "Нет страницы" (UndefinedPageID).
pub const NO_PAGE: u32 = u32::MAX;

// Leaf page:
// [prev_page_id u32][next_page_id u32][area_count u32][area0]..[areaN-1][free]
pub const LEAF_HDR_UNITS: usize = 3;
pub const LEAF_OFF_PREV: usize = 0;
pub const LEAF_OFF_NEXT: usize = 1;
pub const LEAF_OFF_COUNT: usize = 2;

// Area (все поля в u32-юнитах):
// w0 [list_type 2b << 30 | unit_size 30b]
// w1 document_count
// w2 last_document_id
// w3 document_offset  (биты, задний поток id; у Middle — биты последнего IDBlock)
// w4 location_offset  (биты переднего потока; у Middle — юнит-смещение
//                      последнего LOC-блока внутри его страницы)
// w5 first_document_id (Short/Batch) | last_location_page_id (Middle/Long)
// w6.. key_length u16 | key[0] u16 << 16, далее key упакован по два на слово
// затем data region (unit_size - 6 - key_units слов)
pub const AREA_FIXED_UNITS: usize = 6;
pub const AREA_OFF_HEADER: usize = 0;
pub const AREA_OFF_DOC_COUNT: usize = 1;
pub const AREA_OFF_LAST_DOC_ID: usize = 2;
pub const AREA_OFF_DOC_OFFSET: usize = 3;
pub const AREA_OFF_LOC_OFFSET: usize = 4;
pub const AREA_OFF_UNION: usize = 5;
pub const AREA_OFF_KEY: usize = 6;

// Тип списка в старших битах заголовка области
pub const LIST_TYPE_MASK: u32 = 0xC000_0000;
pub const LIST_SIZE_MASK: u32 = 0x3FFF_FFFF;
pub const LIST_TYPE_SHORT: u32 = 0x0000_0000;
pub const LIST_TYPE_MIDDLE: u32 = 0x4000_0000;
pub const LIST_TYPE_LONG: u32 = 0x8000_0000;
pub const LIST_TYPE_BATCH: u32 = 0xC000_0000;

// Overflow page:
// w0 [kind u8 | id_block_count u16 << 8]
// w1 next_page_id              -- продолжение LOC-цепочки
// w2 [used_units u16 | loc_block_count u16 << 16]
// w3 id_live_bitmap            -- живые ID-слоты (до 32 на страницу)
// затем unit-bitmap занятости data-региона, затем data units
pub const OVR_HDR_UNITS: usize = 4;
pub const OVR_OFF_KIND: usize = 0;
pub const OVR_OFF_NEXT: usize = 1;
pub const OVR_OFF_USED: usize = 2;
pub const OVR_OFF_ID_BITMAP: usize = 3;

pub const OVR_KIND_ID: u8 = 1;
pub const OVR_KIND_LOC: u8 = 2;
pub const OVR_KIND_IDLOC: u8 = 3;

/// Максимум ID-слотов на страницу (ограничен шириной id_live_bitmap).
pub const OVR_MAX_ID_SLOTS: usize = 32;

// IDBlock: 3 служебных слова + id_block_unit_size слов битов разностей,
// растущих от хвоста блока к голове.
// b0 first_document_id | expunge-бит
// b1 loc_block_page_id
// b2 loc_block_offset u16 (юниты от начала страницы)
pub const ID_BLOCK_HDR_UNITS: usize = 3;

// LocBlock: 2 служебных слова + data_unit_size слов битов позиций.
// l0 [continue-бит 31 | data_unit_size u16]
// l1 data_bit_length
pub const LOC_BLOCK_HDR_UNITS: usize = 2;
pub const LOC_CONTINUE_BIT: u32 = 0x8000_0000;
pub const LOC_UNIT_SIZE_MASK: u32 = 0x0000_FFFF;

// DIR-блок (2 слова): d0 id_page_id, d1 first_document_id | expunge-бит
pub const DIR_BLOCK_UNITS: usize = 2;

/// Бит "удалён" в first_document_id блоков и DIR-записей.
pub const EXPUNGE_MASK: u32 = 0x8000_0000;
/// Маска собственно идентификатора документа.
pub const DOC_ID_MASK: u32 = 0x7FFF_FFFF;

// Флаги юнита в aux1 заголовка Btr-файла
pub const UNIT_FLAG_NO_LOCATION: u32 = 0x1;
pub const UNIT_FLAG_NO_TF: u32 = 0x2;
