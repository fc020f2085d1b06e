#![allow(non_snake_case)]

// Базовые модули
pub mod config;
pub mod consts;
pub mod error;
pub mod metrics;
pub mod types;

// Кодек битовых потоков
pub mod coder; // src/coder/{mod,bitops}.rs

// Постраничное хранение
pub mod btree;
pub mod leaf; // src/leaf/{mod,page,area}.rs
pub mod overflow; // src/overflow/{mod,page}.rs
pub mod paged; // src/paged/{mod,cache}.rs

// Постинг-листы и итераторы
pub mod iter; // src/iter/{mod,short,middle}.rs
pub mod list; // src/list/{mod,short,middle,batch}.rs
pub mod list_manager;

// Юнит, проверка, свёртка, фасад
pub mod index;
pub mod merge;
pub mod unit;
pub mod verify;

// CLI
pub mod cli;

// Удобные реэкспорты
pub use config::IndexConfig;
pub use index::FullTextIndex;
pub use types::{DocumentId, LocationList, RowId};
pub use unit::{FixMode, InvertedUnit};
pub use verify::{Progress, TREATMENT_ABORT, TREATMENT_CONTINUE};
