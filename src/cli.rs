// src/cli.rs

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

use crate::config::IndexConfig;
use crate::index::FullTextIndex;
use crate::verify::{TREATMENT_ABORT, TREATMENT_CONTINUE};

#[derive(Parser)]
#[command(
    name = "postingdb",
    about = "Embedded inverted-index storage engine",
    version
)]
pub struct Cli {
    /// Корень индекса
    #[arg(long, global = true, default_value = ".")]
    pub root: PathBuf,

    /// JSON-вывод для status/verify
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand)]
pub enum Cmd {
    /// Создать индекс
    Init {
        /// Количество юнитов (Inv0..InvN-1)
        #[arg(long, default_value_t = 1)]
        units: u32,
        /// Размер листовой страницы в байтах
        #[arg(long, default_value_t = 4096)]
        page_size: u32,
        /// Не хранить позиции
        #[arg(long)]
        no_location: bool,
        /// Не хранить ни позиции, ни TF
        #[arg(long)]
        no_tf: bool,
    },
    /// Показать состояние индекса и метрики
    Status,
    /// Вставить документ: термины через пробел, позиции по порядку
    Add {
        row: u32,
        terms: Vec<String>,
    },
    /// Удалить документ (термины должны совпадать со вставкой)
    Remove {
        row: u32,
        terms: Vec<String>,
    },
    /// Найти строки с термином
    Search {
        term: String,
        /// Показать частоты и позиции
        #[arg(long)]
        positions: bool,
    },
    /// Число документов с термином
    Count { term: String },
    /// Проверить целостность
    Verify {
        /// Прервать проверку на первой находке
        #[arg(long)]
        abort: bool,
    },
    /// Свернуть батчи немедленно
    Merge,
    /// Вычистить недостижимые блоки
    Vacuum,
    /// Снять области опустевших списков
    Compact,
}

#[derive(Serialize)]
struct StatusOut {
    root: String,
    units: usize,
    documents: u32,
    metrics: crate::metrics::MetricsSnapshot,
}

// Термины командной строки -> (термин, позиции по порядку слов).
fn tokenize(terms: &[String]) -> Vec<(String, Vec<u32>)> {
    let mut map: std::collections::BTreeMap<String, Vec<u32>> = Default::default();
    for (i, t) in terms.iter().enumerate() {
        map.entry(t.clone()).or_default().push(i as u32 + 1);
    }
    map.into_iter().collect()
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.cmd {
        Cmd::Init {
            units,
            page_size,
            no_location,
            no_tf,
        } => {
            let cfg = IndexConfig::from_env()
                .with_unit_count(units)
                .with_leaf_page_size(page_size)
                .with_overflow_page_size(page_size)
                .with_no_location(no_location)
                .with_no_tf(no_tf);
            let idx = FullTextIndex::create(&cli.root, cfg)?;
            println!(
                "created index at {} with {} unit(s)",
                cli.root.display(),
                idx.unit_count()
            );
            Ok(())
        }
        Cmd::Status => {
            let idx = open(&cli.root)?;
            let out = StatusOut {
                root: cli.root.display().to_string(),
                units: idx.unit_count(),
                documents: idx.document_count(),
                metrics: crate::metrics::snapshot(),
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("root:      {}", out.root);
                println!("units:     {}", out.units);
                println!("documents: {}", out.documents);
            }
            Ok(())
        }
        Cmd::Add { row, terms } => {
            if terms.is_empty() {
                return Err(anyhow!("no terms given"));
            }
            let idx = open(&cli.root)?;
            idx.insert_document(row, &tokenize(&terms))?;
            idx.merge_now()?;
            idx.flush()?;
            println!("row {} indexed ({} term(s))", row, terms.len());
            Ok(())
        }
        Cmd::Remove { row, terms } => {
            let idx = open(&cli.root)?;
            let removed = idx.remove_document(row, &tokenize(&terms))?;
            println!(
                "row {} {}",
                row,
                if removed { "removed" } else { "not indexed" }
            );
            Ok(())
        }
        Cmd::Search { term, positions } => {
            let idx = open(&cli.root)?;
            if positions {
                let hits = idx.search_with_positions(&term)?;
                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&hits)?);
                } else {
                    for (row, tf, locs) in hits {
                        println!("row {} tf {} at {:?}", row, tf, locs);
                    }
                }
            } else {
                let rows = idx.search(&term)?;
                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                } else {
                    for row in rows {
                        println!("{}", row);
                    }
                }
            }
            Ok(())
        }
        Cmd::Count { term } => {
            let idx = open(&cli.root)?;
            println!("{}", idx.count(&term)?);
            Ok(())
        }
        Cmd::Verify { abort } => {
            let idx = open(&cli.root)?;
            let treatment = if abort {
                TREATMENT_ABORT
            } else {
                TREATMENT_CONTINUE
            };
            let reports = idx.verify(treatment)?;
            let mut bad = 0usize;
            for (k, p) in reports.iter().enumerate() {
                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&p.inconsistencies)?);
                } else {
                    println!(
                        "unit {}: {} page(s), {} list(s), {} finding(s)",
                        k,
                        p.pages_checked,
                        p.lists_checked,
                        p.inconsistencies.len()
                    );
                    for f in &p.inconsistencies {
                        println!("  {:?}: {}", f.kind, f.message);
                    }
                }
                bad += p.inconsistencies.len();
            }
            if bad > 0 {
                return Err(anyhow!("verification found {} inconsistencies", bad));
            }
            println!("ok");
            Ok(())
        }
        Cmd::Merge => {
            let idx = open(&cli.root)?;
            idx.merge_now()?;
            idx.flush()?;
            println!("merged");
            Ok(())
        }
        Cmd::Vacuum => {
            let idx = open(&cli.root)?;
            let n = idx.vacuum()?;
            println!("reclaimed {} id block(s)", n);
            Ok(())
        }
        Cmd::Compact => {
            let idx = open(&cli.root)?;
            let n = idx.compact()?;
            println!("removed {} empty area(s)", n);
            Ok(())
        }
    }
}

fn open(root: &PathBuf) -> Result<FullTextIndex> {
    FullTextIndex::open(root, IndexConfig::from_env())
        .with_context(|| format!("open index at {}", root.display()))
}
