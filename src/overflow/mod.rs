//! Файл переполнения: страницы ID / LOC / IDLOC для Middle/Long списков.

pub mod page;

use anyhow::{Context, Result};
use std::path::Path;

use crate::consts::OVR_MAGIC;
use crate::metrics;
use crate::paged::PagedFile;
use page::OverflowPage;

pub struct OverflowFile {
    pf: PagedFile,
}

impl OverflowFile {
    pub fn create(path: &Path, page_size: u32, cache_pages: usize) -> Result<Self> {
        let pf = PagedFile::create(path, OVR_MAGIC, page_size, cache_pages)?;
        Ok(Self { pf })
    }

    pub fn open(path: &Path, cache_pages: usize) -> Result<Self> {
        let pf = PagedFile::open(path, OVR_MAGIC, cache_pages)?;
        Ok(Self { pf })
    }

    pub fn page_units(&self) -> usize {
        self.pf.page_units()
    }

    pub fn page_count(&self) -> u32 {
        self.pf.page_count()
    }

    pub fn attach(&mut self, page_id: u32) -> Result<OverflowPage> {
        let image = self
            .pf
            .read_page(page_id)
            .with_context(|| format!("attach overflow page {}", page_id))?;
        OverflowPage::from_image(page_id, image)
    }

    pub fn write(&mut self, page: &OverflowPage) -> Result<()> {
        self.pf.write_page(page.page_id, &page.image)
    }

    pub fn allocate(&mut self, kind: u8) -> Result<OverflowPage> {
        let id = self.pf.allocate_page()?;
        metrics::record_overflow_page_allocated();
        let page = OverflowPage::new(id, self.pf.page_units(), kind);
        self.pf.write_page(id, &page.image)?;
        Ok(page)
    }

    pub fn free_page(&mut self, page_id: u32) -> Result<()> {
        metrics::record_overflow_page_freed();
        self.pf.free_page(page_id)
    }

    pub fn free_page_count(&mut self) -> Result<u32> {
        self.pf.free_page_count()
    }

    pub fn flush_all(&mut self) -> Result<()> {
        self.pf.flush_all()
    }

    pub fn recover_all(&mut self) -> Result<()> {
        self.pf.recover_all()
    }

    pub fn detach_all(&mut self) {
        self.pf.detach_all()
    }

    pub fn is_dirty(&self) -> bool {
        self.pf.is_dirty()
    }

    pub fn clear(&mut self) -> Result<()> {
        self.pf.clear()
    }

    pub fn move_to(&mut self, new_path: &Path) -> Result<()> {
        self.pf.move_to(new_path)
    }

    pub fn size(&self) -> Result<u64> {
        self.pf.size()
    }

    pub fn used_size(&mut self) -> Result<u64> {
        self.pf.used_size()
    }
}
