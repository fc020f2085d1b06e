//! Постраничный файл: страница-заголовок 0 + страницы фиксированного размера.
//!
//! Layout заголовка (36 байт страницы 0):
//!   [magic8][version u32][page_size u32][page_count u32]
//!   [free_head u32][aux0 u32][aux1 u32][crc32 u32]
//!
//! - page_count — число когда-либо выделенных страниц (id 1..=page_count);
//! - free_head — голова внутрифайловой цепочки свободных страниц, у
//!   свободной страницы слово 0 хранит id следующей свободной;
//! - aux0/aux1 — два слова полезной нагрузки владельца файла;
//! - crc32 — по первым 28 байтам заголовка.
//!
//! Все мутации страниц живут в dirty-карте до flush_all (грязные страницы
//! вытеснению не подлежат); recover_all сбрасывает их, возвращая файл к
//! последнему flush. Чистые страницы читаются через LRU-кэш.

mod cache;

use anyhow::{anyhow, Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::consts::{
    FILE_HDR_SIZE, FILE_VERSION, HDR_OFF_AUX0, HDR_OFF_AUX1, HDR_OFF_FREE_HEAD,
    HDR_OFF_PAGE_COUNT, HDR_OFF_PAGE_SIZE, HDR_OFF_VERSION, NO_PAGE,
};
use cache::PageCache;

pub struct PagedFile {
    path: PathBuf,
    file: File,
    magic: &'static [u8; 8],
    page_size: u32,
    page_count: u32,
    free_head: u32,
    aux: [u32; 2],
    cache: PageCache,
    dirty: HashMap<u32, Vec<u32>>,
    hdr_dirty: bool,
}

impl PagedFile {
    /// Создать новый файл с пустым заголовком. Ошибка, если уже существует.
    pub fn create(
        path: &Path,
        magic: &'static [u8; 8],
        page_size: u32,
        cache_pages: usize,
    ) -> Result<Self> {
        if path.exists() {
            return Err(anyhow!("paged file already exists at {}", path.display()));
        }
        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("create paged file {}", path.display()))?;

        let mut pf = Self {
            path: path.to_path_buf(),
            file,
            magic,
            page_size,
            page_count: 0,
            free_head: NO_PAGE,
            aux: [0, 0],
            cache: PageCache::new(cache_pages),
            dirty: HashMap::new(),
            hdr_dirty: true,
        };
        pf.write_header()?;
        pf.file.sync_all()?;
        Ok(pf)
    }

    /// Открыть существующий файл и проверить заголовок.
    pub fn open(path: &Path, magic: &'static [u8; 8], cache_pages: usize) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("open paged file {}", path.display()))?;

        let mut hdr = [0u8; FILE_HDR_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut hdr)
            .with_context(|| format!("read header of {}", path.display()))?;

        if &hdr[..8] != magic {
            return Err(anyhow!("bad magic in {}", path.display()));
        }
        let version = LittleEndian::read_u32(&hdr[HDR_OFF_VERSION..]);
        if version != FILE_VERSION {
            return Err(anyhow!(
                "unsupported version {} in {}",
                version,
                path.display()
            ));
        }
        let crc_stored = LittleEndian::read_u32(&hdr[FILE_HDR_SIZE - 4..]);
        let crc_actual = crc32fast::hash(&hdr[..FILE_HDR_SIZE - 4]);
        if crc_stored != crc_actual {
            return Err(anyhow!("header checksum mismatch in {}", path.display()));
        }

        let page_size = LittleEndian::read_u32(&hdr[HDR_OFF_PAGE_SIZE..]);
        if page_size < 512 || page_size % 4 != 0 {
            return Err(anyhow!("bad page size {} in {}", page_size, path.display()));
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            magic,
            page_size,
            page_count: LittleEndian::read_u32(&hdr[HDR_OFF_PAGE_COUNT..]),
            free_head: LittleEndian::read_u32(&hdr[HDR_OFF_FREE_HEAD..]),
            aux: [
                LittleEndian::read_u32(&hdr[HDR_OFF_AUX0..]),
                LittleEndian::read_u32(&hdr[HDR_OFF_AUX1..]),
            ],
            cache: PageCache::new(cache_pages),
            dirty: HashMap::new(),
            hdr_dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Размер страницы в u32-юнитах.
    pub fn page_units(&self) -> usize {
        (self.page_size / 4) as usize
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    pub fn aux0(&self) -> u32 {
        self.aux[0]
    }

    pub fn aux1(&self) -> u32 {
        self.aux[1]
    }

    pub fn set_aux0(&mut self, v: u32) {
        if self.aux[0] != v {
            self.aux[0] = v;
            self.hdr_dirty = true;
        }
    }

    pub fn set_aux1(&mut self, v: u32) {
        if self.aux[1] != v {
            self.aux[1] = v;
            self.hdr_dirty = true;
        }
    }

    /// Выделить страницу: голова free-цепочки либо рост файла.
    /// Возвращает обнулённый образ в dirty-состоянии.
    pub fn allocate_page(&mut self) -> Result<u32> {
        let page_id = if self.free_head != NO_PAGE {
            let id = self.free_head;
            let image = self.read_page(id)?;
            self.free_head = image[0];
            id
        } else {
            self.page_count += 1;
            self.page_count
        };
        self.hdr_dirty = true;
        self.cache.remove(page_id);
        self.dirty.insert(page_id, vec![0u32; self.page_units()]);
        Ok(page_id)
    }

    /// Вернуть страницу во free-цепочку.
    pub fn free_page(&mut self, page_id: u32) -> Result<()> {
        if page_id == 0 || page_id > self.page_count {
            return Err(anyhow!(
                "free of page {} out of range in {}",
                page_id,
                self.path.display()
            ));
        }
        let mut image = vec![0u32; self.page_units()];
        image[0] = self.free_head;
        self.free_head = page_id;
        self.hdr_dirty = true;
        self.cache.remove(page_id);
        self.dirty.insert(page_id, image);
        Ok(())
    }

    /// Число страниц во free-цепочке (обход цепочки).
    pub fn free_page_count(&mut self) -> Result<u32> {
        let mut n = 0u32;
        let mut id = self.free_head;
        while id != NO_PAGE {
            let image = self.read_page(id)?;
            id = image[0];
            n += 1;
            if n > self.page_count {
                return Err(anyhow!("free chain loop in {}", self.path.display()));
            }
        }
        Ok(n)
    }

    /// Прочитать образ страницы: dirty-карта, затем LRU, затем файл.
    pub fn read_page(&mut self, page_id: u32) -> Result<Vec<u32>> {
        if page_id == 0 || page_id > self.page_count {
            return Err(anyhow!(
                "read of page {} out of range (count {}) in {}",
                page_id,
                self.page_count,
                self.path.display()
            ));
        }
        if let Some(image) = self.dirty.get(&page_id) {
            crate::metrics::record_cache_hit();
            return Ok(image.clone());
        }
        if let Some(image) = self.cache.get(page_id) {
            crate::metrics::record_cache_hit();
            return Ok(image);
        }
        crate::metrics::record_cache_miss();

        let mut bytes = vec![0u8; self.page_size as usize];
        self.file
            .seek(SeekFrom::Start(page_id as u64 * self.page_size as u64))?;
        self.file
            .read_exact(&mut bytes)
            .with_context(|| format!("read page {} of {}", page_id, self.path.display()))?;
        let mut image = vec![0u32; self.page_units()];
        LittleEndian::read_u32_into(&bytes, &mut image);
        self.cache.put(page_id, &image);
        Ok(image)
    }

    /// Записать образ страницы (остаётся в dirty-карте до flush_all).
    pub fn write_page(&mut self, page_id: u32, image: &[u32]) -> Result<()> {
        if image.len() != self.page_units() {
            return Err(anyhow!(
                "page image size {} != page units {}",
                image.len(),
                self.page_units()
            ));
        }
        if page_id == 0 || page_id > self.page_count {
            return Err(anyhow!(
                "write of page {} out of range in {}",
                page_id,
                self.path.display()
            ));
        }
        self.cache.remove(page_id);
        self.dirty.insert(page_id, image.to_vec());
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.hdr_dirty || !self.dirty.is_empty()
    }

    /// Сбросить все грязные страницы и заголовок на диск, fsync.
    pub fn flush_all(&mut self) -> Result<()> {
        if !self.is_dirty() {
            return Ok(());
        }
        let mut ids: Vec<u32> = self.dirty.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            let image = self.dirty.remove(&id).expect("dirty page present");
            let mut bytes = vec![0u8; self.page_size as usize];
            LittleEndian::write_u32_into(&image, &mut bytes);
            self.file
                .seek(SeekFrom::Start(id as u64 * self.page_size as u64))?;
            self.file
                .write_all(&bytes)
                .with_context(|| format!("write page {} of {}", id, self.path.display()))?;
            self.cache.put(id, &image);
        }
        self.write_header()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Отбросить несброшенные изменения (возврат к последнему flush).
    pub fn recover_all(&mut self) -> Result<()> {
        self.dirty.clear();
        self.cache.clear();

        // заголовок перечитывается из файла
        let mut hdr = [0u8; FILE_HDR_SIZE];
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_exact(&mut hdr)?;
        self.page_count = LittleEndian::read_u32(&hdr[HDR_OFF_PAGE_COUNT..]);
        self.free_head = LittleEndian::read_u32(&hdr[HDR_OFF_FREE_HEAD..]);
        self.aux = [
            LittleEndian::read_u32(&hdr[HDR_OFF_AUX0..]),
            LittleEndian::read_u32(&hdr[HDR_OFF_AUX1..]),
        ];
        self.hdr_dirty = false;
        Ok(())
    }

    /// Опустошить кэш чистых страниц (detach всех страниц).
    pub fn detach_all(&mut self) {
        self.cache.clear();
    }

    /// Обрезать файл до пустого состояния (остаётся только заголовок).
    pub fn clear(&mut self) -> Result<()> {
        self.dirty.clear();
        self.cache.clear();
        self.page_count = 0;
        self.free_head = NO_PAGE;
        self.hdr_dirty = true;
        self.file.set_len(self.page_size as u64)?;
        self.write_header()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Переместить файл (с предварительным flush).
    pub fn move_to(&mut self, new_path: &Path) -> Result<()> {
        self.flush_all()?;
        std::fs::rename(&self.path, new_path)
            .with_context(|| format!("move {} -> {}", self.path.display(), new_path.display()))?;
        self.file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(new_path)
            .with_context(|| format!("reopen moved file {}", new_path.display()))?;
        self.path = new_path.to_path_buf();
        Ok(())
    }

    /// Размер файла в байтах.
    pub fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Используемый размер: всё минус свободные страницы.
    pub fn used_size(&mut self) -> Result<u64> {
        let free = self.free_page_count()? as u64;
        let total = (self.page_count as u64 + 1) * self.page_size as u64;
        Ok(total - free * self.page_size as u64)
    }

    fn write_header(&mut self) -> Result<()> {
        let mut hdr = [0u8; FILE_HDR_SIZE];
        hdr[..8].copy_from_slice(self.magic);
        LittleEndian::write_u32(&mut hdr[HDR_OFF_VERSION..], FILE_VERSION);
        LittleEndian::write_u32(&mut hdr[HDR_OFF_PAGE_SIZE..], self.page_size);
        LittleEndian::write_u32(&mut hdr[HDR_OFF_PAGE_COUNT..], self.page_count);
        LittleEndian::write_u32(&mut hdr[HDR_OFF_FREE_HEAD..], self.free_head);
        LittleEndian::write_u32(&mut hdr[HDR_OFF_AUX0..], self.aux[0]);
        LittleEndian::write_u32(&mut hdr[HDR_OFF_AUX1..], self.aux[1]);
        let crc = crc32fast::hash(&hdr[..FILE_HDR_SIZE - 4]);
        LittleEndian::write_u32(&mut hdr[FILE_HDR_SIZE - 4..], crc);

        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&hdr)?;
        self.hdr_dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_path(prefix: &str) -> PathBuf {
        let pid = std::process::id();
        let t = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("pdb-paged-{}-{}-{}", prefix, pid, t))
    }

    #[test]
    fn allocate_write_flush_reopen() -> Result<()> {
        let path = unique_path("rw");
        {
            let mut pf = PagedFile::create(&path, crate::consts::LEAF_MAGIC, 512, 4)?;
            let p1 = pf.allocate_page()?;
            assert_eq!(p1, 1);
            let mut image = pf.read_page(p1)?;
            image[0] = 0xDEAD_BEEF;
            pf.write_page(p1, &image)?;
            pf.set_aux0(77);
            pf.flush_all()?;
        }
        {
            let mut pf = PagedFile::open(&path, crate::consts::LEAF_MAGIC, 4)?;
            assert_eq!(pf.page_count(), 1);
            assert_eq!(pf.aux0(), 77);
            let image = pf.read_page(1)?;
            assert_eq!(image[0], 0xDEAD_BEEF);
        }
        std::fs::remove_file(&path).ok();
        Ok(())
    }

    #[test]
    fn free_chain_reuse() -> Result<()> {
        let path = unique_path("free");
        let mut pf = PagedFile::create(&path, crate::consts::OVR_MAGIC, 512, 4)?;
        let p1 = pf.allocate_page()?;
        let p2 = pf.allocate_page()?;
        pf.free_page(p1)?;
        assert_eq!(pf.free_page_count()?, 1);
        let p3 = pf.allocate_page()?;
        assert_eq!(p3, p1); // свободная страница переиспользована
        assert_eq!(pf.free_page_count()?, 0);
        assert_eq!(pf.page_count(), 2);
        let _ = p2;
        std::fs::remove_file(&path).ok();
        Ok(())
    }

    #[test]
    fn recover_drops_unflushed() -> Result<()> {
        let path = unique_path("rec");
        let mut pf = PagedFile::create(&path, crate::consts::LEAF_MAGIC, 512, 4)?;
        let p1 = pf.allocate_page()?;
        let mut image = pf.read_page(p1)?;
        image[1] = 42;
        pf.write_page(p1, &image)?;
        pf.flush_all()?;

        // несброшенное изменение пропадает после recover_all
        let mut image = pf.read_page(p1)?;
        image[1] = 43;
        pf.write_page(p1, &image)?;
        pf.recover_all()?;
        let image = pf.read_page(p1)?;
        assert_eq!(image[1], 42);
        std::fs::remove_file(&path).ok();
        Ok(())
    }
}
