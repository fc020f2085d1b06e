//! Btr-файл юнита: ключ (UTF-16) -> id листовой страницы, плюс вектор
//! row id <-> document id и счётчик последнего документа.
//!
//! Сам B-деревянный индекс хоста здесь представлен компактной
//! упорядоченной таблицей, целиком загружаемой в память и переписываемой
//! на flush.
//!
//! Layout:
//!   [magic8][version u32][entry_count u32][doc_count u32]
//!   [last_document_id u32][flags u32][crc32 u32]
//!   entries: entry_count x { key_len u16, key[key_len] u16, page_id u32 }
//!   rowdoc:  doc_count x { row_id u32 }   -- позиция + 1 == document id,
//!            UNDEFINED_ROW_ID помечает вычеркнутый документ
//!
//! Поиск по ключу — floor-семантика: наибольшая запись с ключом <= probe
//! (каждый юнит несёт якорную запись с пустым ключом, поэтому поиск
//! всегда находит страницу).

use anyhow::{anyhow, Context, Result};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::{BTreeMap, HashMap};
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::ops::Bound;
use std::path::{Path, PathBuf};

use crate::consts::{BTR_MAGIC, FILE_VERSION, UNIT_FLAG_NO_LOCATION, UNIT_FLAG_NO_TF};
use crate::types::{DocumentId, RowId, UNDEFINED_DOCUMENT_ID, UNDEFINED_ROW_ID};

const BTR_HDR_SIZE: usize = 32;

pub struct BtrFile {
    path: PathBuf,
    // ключ -> id листовой страницы; порядок Vec<u16> совпадает с
    // беззнаковым NO-PAD сравнением code units
    entries: BTreeMap<Vec<u16>, u32>,
    // document id - 1 -> row id
    doc_to_row: Vec<RowId>,
    // row id -> document id
    row_to_doc: HashMap<RowId, DocumentId>,
    last_document_id: DocumentId,
    flags: u32,
    dirty: bool,
}

impl BtrFile {
    /// Создать новый пустой Btr-файл. Ошибка, если уже существует.
    pub fn create(path: &Path, no_location: bool, no_tf: bool) -> Result<Self> {
        if path.exists() {
            return Err(anyhow!("btr file already exists at {}", path.display()));
        }
        let mut flags = 0u32;
        if no_location {
            flags |= UNIT_FLAG_NO_LOCATION;
        }
        if no_tf {
            flags |= UNIT_FLAG_NO_TF;
        }
        let mut btr = Self {
            path: path.to_path_buf(),
            entries: BTreeMap::new(),
            doc_to_row: Vec::new(),
            row_to_doc: HashMap::new(),
            last_document_id: 0,
            flags,
            dirty: true,
        };
        btr.flush()?;
        Ok(btr)
    }

    /// Открыть существующий Btr-файл.
    pub fn open(path: &Path) -> Result<Self> {
        let mut f = OpenOptions::new()
            .read(true)
            .open(path)
            .with_context(|| format!("open btr file {}", path.display()))?;

        let mut hdr = [0u8; BTR_HDR_SIZE];
        f.read_exact(&mut hdr)
            .with_context(|| format!("read btr header {}", path.display()))?;
        if &hdr[..8] != BTR_MAGIC {
            return Err(anyhow!("bad btr magic in {}", path.display()));
        }
        let version = LittleEndian::read_u32(&hdr[8..]);
        if version != FILE_VERSION {
            return Err(anyhow!("unsupported btr version {} in {}", version, path.display()));
        }
        let entry_count = LittleEndian::read_u32(&hdr[12..]) as usize;
        let doc_count = LittleEndian::read_u32(&hdr[16..]) as usize;
        let last_document_id = LittleEndian::read_u32(&hdr[20..]);
        let flags = LittleEndian::read_u32(&hdr[24..]);
        let crc_stored = LittleEndian::read_u32(&hdr[BTR_HDR_SIZE - 4..]);
        if crc_stored != crc32fast::hash(&hdr[..BTR_HDR_SIZE - 4]) {
            return Err(anyhow!("btr header checksum mismatch in {}", path.display()));
        }

        let mut entries = BTreeMap::new();
        for _ in 0..entry_count {
            let key_len = f.read_u16::<LittleEndian>()? as usize;
            let mut key = Vec::with_capacity(key_len);
            for _ in 0..key_len {
                key.push(f.read_u16::<LittleEndian>()?);
            }
            let page_id = f.read_u32::<LittleEndian>()?;
            entries.insert(key, page_id);
        }

        let mut doc_to_row = Vec::with_capacity(doc_count);
        let mut row_to_doc = HashMap::with_capacity(doc_count);
        for i in 0..doc_count {
            let row = f.read_u32::<LittleEndian>()?;
            doc_to_row.push(row);
            if row != UNDEFINED_ROW_ID {
                row_to_doc.insert(row, (i + 1) as DocumentId);
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            entries,
            doc_to_row,
            row_to_doc,
            last_document_id,
            flags,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn no_location(&self) -> bool {
        self.flags & UNIT_FLAG_NO_LOCATION != 0
    }

    pub fn no_tf(&self) -> bool {
        self.flags & UNIT_FLAG_NO_TF != 0
    }

    // ----- карта ключей -----

    /// Вставить пару (ключ, страница).
    pub fn insert(&mut self, key: &[u16], page_id: u32) {
        self.entries.insert(key.to_vec(), page_id);
        self.dirty = true;
    }

    /// Удалить запись по ключу; отсутствие записи — не ошибка.
    pub fn expunge(&mut self, key: &[u16]) {
        if self.entries.remove(key).is_some() {
            self.dirty = true;
        }
    }

    /// Заменить запись (old_key -> old_page) на (new_key -> new_page).
    pub fn update(&mut self, old_key: &[u16], old_page: u32, new_key: &[u16], new_page: u32) {
        if self.entries.get(old_key) == Some(&old_page) {
            self.entries.remove(old_key);
        }
        self.entries.insert(new_key.to_vec(), new_page);
        self.dirty = true;
    }

    /// Floor-поиск: страница наибольшего ключа <= probe.
    pub fn search(&self, key: &[u16]) -> Option<u32> {
        self.entries
            .range::<[u16], _>((Bound::Unbounded, Bound::Included(key)))
            .next_back()
            .map(|(_, &page)| page)
    }

    /// Точный поиск.
    pub fn search_exact(&self, key: &[u16]) -> Option<u32> {
        self.entries.get(key).copied()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Обход всех записей (для verify).
    pub fn iter_entries(&self) -> impl Iterator<Item = (&Vec<u16>, u32)> {
        self.entries.iter().map(|(k, &p)| (k, p))
    }

    // ----- карта row <-> doc -----

    /// Назначить следующий плотный document id строке.
    pub fn assign_document_id(&mut self, row_id: RowId) -> Result<DocumentId> {
        if self.row_to_doc.contains_key(&row_id) {
            return Err(anyhow!("row {} already indexed", row_id));
        }
        self.last_document_id += 1;
        let doc = self.last_document_id;
        self.doc_to_row.push(row_id);
        self.row_to_doc.insert(row_id, doc);
        self.dirty = true;
        Ok(doc)
    }

    /// Вычеркнуть документ из карты (строка перестаёт резолвиться).
    pub fn unassign_document_id(&mut self, doc: DocumentId) {
        if doc >= 1 && (doc as usize) <= self.doc_to_row.len() {
            let row = self.doc_to_row[doc as usize - 1];
            if row != UNDEFINED_ROW_ID {
                self.row_to_doc.remove(&row);
                self.doc_to_row[doc as usize - 1] = UNDEFINED_ROW_ID;
                self.dirty = true;
            }
        }
    }

    pub fn convert_to_row_id(&self, doc: DocumentId) -> RowId {
        if doc >= 1 && (doc as usize) <= self.doc_to_row.len() {
            self.doc_to_row[doc as usize - 1]
        } else {
            UNDEFINED_ROW_ID
        }
    }

    pub fn convert_to_document_id(&self, row: RowId) -> DocumentId {
        self.row_to_doc
            .get(&row)
            .copied()
            .unwrap_or(UNDEFINED_DOCUMENT_ID)
    }

    pub fn last_document_id(&self) -> DocumentId {
        self.last_document_id
    }

    /// Число живых документов юнита.
    pub fn document_count(&self) -> u32 {
        self.row_to_doc.len() as u32
    }

    // ----- персистентность -----

    /// Переписать файл целиком и fsync.
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty && self.path.exists() {
            return Ok(());
        }
        let mut f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .with_context(|| format!("rewrite btr file {}", self.path.display()))?;

        let mut hdr = [0u8; BTR_HDR_SIZE];
        hdr[..8].copy_from_slice(BTR_MAGIC);
        LittleEndian::write_u32(&mut hdr[8..], FILE_VERSION);
        LittleEndian::write_u32(&mut hdr[12..], self.entries.len() as u32);
        LittleEndian::write_u32(&mut hdr[16..], self.doc_to_row.len() as u32);
        LittleEndian::write_u32(&mut hdr[20..], self.last_document_id);
        LittleEndian::write_u32(&mut hdr[24..], self.flags);
        let crc = crc32fast::hash(&hdr[..BTR_HDR_SIZE - 4]);
        LittleEndian::write_u32(&mut hdr[BTR_HDR_SIZE - 4..], crc);
        f.write_all(&hdr)?;

        for (key, &page_id) in &self.entries {
            f.write_u16::<LittleEndian>(key.len() as u16)?;
            for &cu in key {
                f.write_u16::<LittleEndian>(cu)?;
            }
            f.write_u32::<LittleEndian>(page_id)?;
        }
        for &row in &self.doc_to_row {
            f.write_u32::<LittleEndian>(row)?;
        }
        f.sync_all()?;
        self.dirty = false;
        Ok(())
    }

    /// Отбросить несброшенные изменения, перечитав файл.
    pub fn recover(&mut self) -> Result<()> {
        let reloaded = Self::open(&self.path)?;
        self.entries = reloaded.entries;
        self.doc_to_row = reloaded.doc_to_row;
        self.row_to_doc = reloaded.row_to_doc;
        self.last_document_id = reloaded.last_document_id;
        self.flags = reloaded.flags;
        self.dirty = false;
        Ok(())
    }

    /// Очистить все данные (карта ключей и карта документов).
    pub fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.doc_to_row.clear();
        self.row_to_doc.clear();
        self.last_document_id = 0;
        self.dirty = true;
        self.flush()
    }

    /// Переместить файл.
    pub fn move_to(&mut self, new_path: &Path) -> Result<()> {
        self.flush()?;
        std::fs::rename(&self.path, new_path)
            .with_context(|| format!("move {} -> {}", self.path.display(), new_path.display()))?;
        self.path = new_path.to_path_buf();
        Ok(())
    }

    pub fn size(&self) -> Result<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::key_from_str;

    fn unique_path(prefix: &str) -> PathBuf {
        let pid = std::process::id();
        let t = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("pdb-btr-{}-{}-{}", prefix, pid, t))
    }

    #[test]
    fn floor_search() -> Result<()> {
        let path = unique_path("floor");
        let mut btr = BtrFile::create(&path, false, false)?;
        btr.insert(&[], 1);
        btr.insert(&key_from_str("m"), 2);
        btr.insert(&key_from_str("t"), 3);

        assert_eq!(btr.search(&key_from_str("a")), Some(1));
        assert_eq!(btr.search(&key_from_str("m")), Some(2));
        assert_eq!(btr.search(&key_from_str("mzzz")), Some(2));
        assert_eq!(btr.search(&key_from_str("z")), Some(3));
        assert_eq!(btr.search_exact(&key_from_str("q")), None);
        std::fs::remove_file(&path).ok();
        Ok(())
    }

    #[test]
    fn rowdoc_roundtrip_through_flush() -> Result<()> {
        let path = unique_path("rowdoc");
        {
            let mut btr = BtrFile::create(&path, false, true)?;
            assert_eq!(btr.assign_document_id(100)?, 1);
            assert_eq!(btr.assign_document_id(200)?, 2);
            assert_eq!(btr.assign_document_id(50)?, 3);
            btr.unassign_document_id(2);
            btr.insert(&key_from_str("dog"), 7);
            btr.flush()?;
        }
        {
            let btr = BtrFile::open(&path)?;
            assert!(btr.no_tf());
            assert_eq!(btr.last_document_id(), 3);
            assert_eq!(btr.convert_to_row_id(1), 100);
            assert_eq!(btr.convert_to_row_id(2), UNDEFINED_ROW_ID);
            assert_eq!(btr.convert_to_document_id(50), 3);
            assert_eq!(btr.convert_to_document_id(200), UNDEFINED_DOCUMENT_ID);
            assert_eq!(btr.search_exact(&key_from_str("dog")), Some(7));
            assert_eq!(btr.document_count(), 2);
        }
        std::fs::remove_file(&path).ok();
        Ok(())
    }
}
