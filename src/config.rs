//! Централизованная конфигурация движка.
//!
//! Цели:
//! - Одно место для всех настроек вместо разбросанных чтений env.
//! - IndexConfig::from_env() читает переменные POSTING_*, builder-методы
//!   with_* позволяют переопределить их в коде (тесты, CLI).
//!
//! Использование:
//!   let cfg = IndexConfig::from_env()
//!       .with_leaf_page_size(8192)
//!       .with_unit_count(4);

use crate::coder::CoderSpec;

/// Настройки индекса. Читаются один раз при открытии драйвера.
#[derive(Clone, Debug)]
pub struct IndexConfig {
    /// Размер листовой страницы в байтах.
    /// Env: POSTING_LEAF_PAGE_SIZE (default 4096)
    pub leaf_page_size: u32,

    /// Размер страницы переполнения в байтах.
    /// Env: POSTING_OVERFLOW_PAGE_SIZE (default 4096)
    pub overflow_page_size: u32,

    /// Начальный размер data-региона batch-области, в u32-юнитах.
    /// Env: POSTING_BATCH_INITIAL_UNITS (default 32)
    pub batch_initial_units: u32,

    /// Шаг роста batch-области.
    /// Env: POSTING_BATCH_REGULAR_UNITS (default 1024)
    pub batch_regular_units: u32,

    /// Жёсткий потолок batch-области; сверх него заводится следующий список.
    /// Env: POSTING_BATCH_MAX_UNITS (default 16384)
    pub batch_max_units: u32,

    /// Data-юниты IDBlock для обычных ключей.
    /// Env: POSTING_ID_BLOCK_UNITS (default 16)
    pub id_block_units: u32,

    /// Data-юниты IDBlock для юнитов со словарной границей (пустой ключ).
    /// Env: POSTING_WORD_ID_BLOCK_UNITS (default 4)
    pub word_id_block_units: u32,

    /// Сколько batch-вхождений накапливается до пробуждения merge-демона.
    /// Env: POSTING_MERGE_THRESHOLD (default 65536)
    pub merge_threshold: usize,

    /// Таймаут ожидания демона, мс.
    /// Env: POSTING_MERGE_INTERVAL_MS (default 1000)
    pub merge_interval_ms: u64,

    /// Размер LRU-кэша страниц на файл, в страницах.
    /// Env: POSTING_PAGE_CACHE_PAGES (default 64)
    pub page_cache_pages: usize,

    /// Количество юнитов (каталоги Inv0..InvN-1).
    /// Env: POSTING_UNIT_COUNT (default 1)
    pub unit_count: u32,

    /// Не хранить позиции (TF хранится).
    /// Env: POSTING_NO_LOCATION (default false)
    pub no_location: bool,

    /// Не хранить ни позиции, ни TF (TF читается как 1).
    /// Env: POSTING_NO_TF (default false)
    pub no_tf: bool,

    /// Кодеры четырёх потоков.
    /// Env: POSTING_ID_CODER / POSTING_FREQUENCY_CODER /
    ///      POSTING_LENGTH_CODER / POSTING_LOCATION_CODER
    pub id_coder: CoderSpec,
    pub frequency_coder: CoderSpec,
    pub length_coder: CoderSpec,
    pub location_coder: CoderSpec,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            leaf_page_size: 4096,
            overflow_page_size: 4096,
            batch_initial_units: 32,
            batch_regular_units: 1024,
            batch_max_units: 16384,
            id_block_units: 16,
            word_id_block_units: 4,
            merge_threshold: 65536,
            merge_interval_ms: 1000,
            page_cache_pages: 64,
            unit_count: 1,
            no_location: false,
            no_tf: false,
            id_coder: CoderSpec::ExpGolomb(6),
            frequency_coder: CoderSpec::Gamma,
            length_coder: CoderSpec::Gamma,
            location_coder: CoderSpec::ExpGolomb(6),
        }
    }
}

fn env_u32(key: &str, out: &mut u32) {
    if let Ok(v) = std::env::var(key) {
        if let Ok(n) = v.trim().parse::<u32>() {
            *out = n;
        }
    }
}

fn env_usize(key: &str, out: &mut usize) {
    if let Ok(v) = std::env::var(key) {
        if let Ok(n) = v.trim().parse::<usize>() {
            *out = n;
        }
    }
}

fn env_bool(key: &str, out: &mut bool) {
    if let Ok(v) = std::env::var(key) {
        let s = v.trim().to_ascii_lowercase();
        *out = !(s == "0" || s == "false" || s == "off" || s == "no" || s.is_empty());
    }
}

fn env_coder(key: &str, out: &mut CoderSpec) {
    if let Ok(v) = std::env::var(key) {
        if let Ok(spec) = v.trim().parse::<CoderSpec>() {
            *out = spec;
        }
    }
}

impl IndexConfig {
    /// Прочитать конфигурацию из переменных окружения.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        env_u32("POSTING_LEAF_PAGE_SIZE", &mut cfg.leaf_page_size);
        env_u32("POSTING_OVERFLOW_PAGE_SIZE", &mut cfg.overflow_page_size);
        env_u32("POSTING_BATCH_INITIAL_UNITS", &mut cfg.batch_initial_units);
        env_u32("POSTING_BATCH_REGULAR_UNITS", &mut cfg.batch_regular_units);
        env_u32("POSTING_BATCH_MAX_UNITS", &mut cfg.batch_max_units);
        env_u32("POSTING_ID_BLOCK_UNITS", &mut cfg.id_block_units);
        env_u32("POSTING_WORD_ID_BLOCK_UNITS", &mut cfg.word_id_block_units);
        env_usize("POSTING_MERGE_THRESHOLD", &mut cfg.merge_threshold);
        if let Ok(v) = std::env::var("POSTING_MERGE_INTERVAL_MS") {
            if let Ok(n) = v.trim().parse::<u64>() {
                cfg.merge_interval_ms = n;
            }
        }
        env_usize("POSTING_PAGE_CACHE_PAGES", &mut cfg.page_cache_pages);
        env_u32("POSTING_UNIT_COUNT", &mut cfg.unit_count);
        env_bool("POSTING_NO_LOCATION", &mut cfg.no_location);
        env_bool("POSTING_NO_TF", &mut cfg.no_tf);
        env_coder("POSTING_ID_CODER", &mut cfg.id_coder);
        env_coder("POSTING_FREQUENCY_CODER", &mut cfg.frequency_coder);
        env_coder("POSTING_LENGTH_CODER", &mut cfg.length_coder);
        env_coder("POSTING_LOCATION_CODER", &mut cfg.location_coder);

        cfg
    }

    // ----- builder-методы -----

    pub fn with_leaf_page_size(mut self, v: u32) -> Self {
        self.leaf_page_size = v;
        self
    }
    pub fn with_overflow_page_size(mut self, v: u32) -> Self {
        self.overflow_page_size = v;
        self
    }
    pub fn with_id_block_units(mut self, v: u32) -> Self {
        self.id_block_units = v;
        self
    }
    pub fn with_merge_threshold(mut self, v: usize) -> Self {
        self.merge_threshold = v;
        self
    }
    pub fn with_merge_interval_ms(mut self, v: u64) -> Self {
        self.merge_interval_ms = v;
        self
    }
    pub fn with_page_cache_pages(mut self, v: usize) -> Self {
        self.page_cache_pages = v;
        self
    }
    pub fn with_unit_count(mut self, v: u32) -> Self {
        self.unit_count = v.max(1);
        self
    }
    pub fn with_no_location(mut self, v: bool) -> Self {
        self.no_location = v;
        self
    }
    pub fn with_no_tf(mut self, v: bool) -> Self {
        self.no_tf = v;
        // без TF позиции тоже не хранятся
        if v {
            self.no_location = true;
        }
        self
    }
    pub fn with_batch_units(mut self, initial: u32, regular: u32, max: u32) -> Self {
        self.batch_initial_units = initial;
        self.batch_regular_units = regular;
        self.batch_max_units = max;
        self
    }

    /// Размер IDBlock для данного ключа: пустой ключ — словарная граница.
    pub fn id_block_units_for(&self, key: &[u16]) -> u32 {
        if key.is_empty() {
            self.word_id_block_units
        } else {
            self.id_block_units
        }
    }

    /// Проверка вменяемости размеров страниц.
    pub fn validate(&self) -> anyhow::Result<()> {
        use anyhow::anyhow;
        for (name, ps) in [
            ("leaf", self.leaf_page_size),
            ("overflow", self.overflow_page_size),
        ] {
            if ps < 512 || ps % 4 != 0 || !ps.is_power_of_two() {
                return Err(anyhow!(
                    "{} page size {} invalid (power of two >= 512 required)",
                    name,
                    ps
                ));
            }
        }
        if self.id_block_units == 0 || self.word_id_block_units == 0 {
            return Err(anyhow!("id block unit size must be positive"));
        }
        // сплайсы потоков разностей опираются на субаддитивность ширины
        // кода: bits(a+b) <= bits(a)+bits(b); гамма её нарушает
        for (name, coder) in [("id", self.id_coder), ("location", self.location_coder)] {
            if coder == crate::coder::Coder::Gamma {
                return Err(anyhow!(
                    "{} coder must be gap-subadditive (unary or peg:<n>)",
                    name
                ));
            }
        }
        Ok(())
    }
}
