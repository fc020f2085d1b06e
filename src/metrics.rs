//! Глобальные метрики движка: атомарные счётчики + snapshot.
//!
//! Счётчики процесс-глобальные и дёшевы (Relaxed). Снимок берётся
//! целиком в MetricsSnapshot для status/JSON-вывода.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

static LEAF_PAGES_ALLOCATED: AtomicU64 = AtomicU64::new(0);
static LEAF_PAGES_FREED: AtomicU64 = AtomicU64::new(0);
static OVERFLOW_PAGES_ALLOCATED: AtomicU64 = AtomicU64::new(0);
static OVERFLOW_PAGES_FREED: AtomicU64 = AtomicU64::new(0);
static LEAF_SPLITS: AtomicU64 = AtomicU64::new(0);
static LEAF_REDUCES: AtomicU64 = AtomicU64::new(0);
static LIST_CONVERTS: AtomicU64 = AtomicU64::new(0);
static MERGE_CYCLES: AtomicU64 = AtomicU64::new(0);
static MERGED_LISTS: AtomicU64 = AtomicU64::new(0);
static EXPUNGED_ID_BLOCKS: AtomicU64 = AtomicU64::new(0);
static CACHE_HITS: AtomicU64 = AtomicU64::new(0);
static CACHE_MISSES: AtomicU64 = AtomicU64::new(0);

#[inline]
pub fn record_leaf_page_allocated() {
    LEAF_PAGES_ALLOCATED.fetch_add(1, Ordering::Relaxed);
}
#[inline]
pub fn record_leaf_page_freed() {
    LEAF_PAGES_FREED.fetch_add(1, Ordering::Relaxed);
}
#[inline]
pub fn record_overflow_page_allocated() {
    OVERFLOW_PAGES_ALLOCATED.fetch_add(1, Ordering::Relaxed);
}
#[inline]
pub fn record_overflow_page_freed() {
    OVERFLOW_PAGES_FREED.fetch_add(1, Ordering::Relaxed);
}
#[inline]
pub fn record_leaf_split() {
    LEAF_SPLITS.fetch_add(1, Ordering::Relaxed);
}
#[inline]
pub fn record_leaf_reduce() {
    LEAF_REDUCES.fetch_add(1, Ordering::Relaxed);
}
#[inline]
pub fn record_list_convert() {
    LIST_CONVERTS.fetch_add(1, Ordering::Relaxed);
}
#[inline]
pub fn record_merge_cycle() {
    MERGE_CYCLES.fetch_add(1, Ordering::Relaxed);
}
#[inline]
pub fn record_merged_list() {
    MERGED_LISTS.fetch_add(1, Ordering::Relaxed);
}
#[inline]
pub fn record_expunged_id_block() {
    EXPUNGED_ID_BLOCKS.fetch_add(1, Ordering::Relaxed);
}
#[inline]
pub fn record_cache_hit() {
    CACHE_HITS.fetch_add(1, Ordering::Relaxed);
}
#[inline]
pub fn record_cache_miss() {
    CACHE_MISSES.fetch_add(1, Ordering::Relaxed);
}

/// Снимок всех счётчиков.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub leaf_pages_allocated: u64,
    pub leaf_pages_freed: u64,
    pub overflow_pages_allocated: u64,
    pub overflow_pages_freed: u64,
    pub leaf_splits: u64,
    pub leaf_reduces: u64,
    pub list_converts: u64,
    pub merge_cycles: u64,
    pub merged_lists: u64,
    pub expunged_id_blocks: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        leaf_pages_allocated: LEAF_PAGES_ALLOCATED.load(Ordering::Relaxed),
        leaf_pages_freed: LEAF_PAGES_FREED.load(Ordering::Relaxed),
        overflow_pages_allocated: OVERFLOW_PAGES_ALLOCATED.load(Ordering::Relaxed),
        overflow_pages_freed: OVERFLOW_PAGES_FREED.load(Ordering::Relaxed),
        leaf_splits: LEAF_SPLITS.load(Ordering::Relaxed),
        leaf_reduces: LEAF_REDUCES.load(Ordering::Relaxed),
        list_converts: LIST_CONVERTS.load(Ordering::Relaxed),
        merge_cycles: MERGE_CYCLES.load(Ordering::Relaxed),
        merged_lists: MERGED_LISTS.load(Ordering::Relaxed),
        expunged_id_blocks: EXPUNGED_ID_BLOCKS.load(Ordering::Relaxed),
        cache_hits: CACHE_HITS.load(Ordering::Relaxed),
        cache_misses: CACHE_MISSES.load(Ordering::Relaxed),
    }
}
