//! Merge-демон: одна фоновая нить на драйвер, сворачивающая батчевый
//! слой юнитов в дисковый.
//!
//! Цикл: ждать сигнала о накоплении порога или таймаута; атомарно
//! забрать карту батчей (писатели не блокируются — у них уже пустая);
//! свернуть списки в порядке ключей с протоколом Full -> convert ->
//! retry; сбросить юнит. abort добивает текущую границу и выходит.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::index::IndexShared;
use crate::metrics;

struct Flags {
    pending: bool,
    abort: bool,
}

pub struct DaemonState {
    flags: Mutex<Flags>,
    cv: Condvar,
}

impl DaemonState {
    fn new() -> Self {
        Self {
            flags: Mutex::new(Flags {
                pending: false,
                abort: false,
            }),
            cv: Condvar::new(),
        }
    }
}

pub struct MergeDaemon {
    state: Arc<DaemonState>,
    handle: Option<JoinHandle<()>>,
    shared: Arc<IndexShared>,
}

impl MergeDaemon {
    /// Создать и запустить демона.
    pub fn start(shared: Arc<IndexShared>) -> Self {
        let state = Arc::new(DaemonState::new());
        let handle = spawn(shared.clone(), state.clone());
        Self {
            state,
            handle: Some(handle),
            shared,
        }
    }

    /// Разбудить демона: батч какого-то юнита перерос порог.
    pub fn signal(&self) {
        let mut f = self.state.flags.lock();
        f.pending = true;
        self.state.cv.notify_one();
    }

    /// Попросить демона выйти (текущая граница страниц дорабатывается).
    pub fn abort(&self) {
        let mut f = self.state.flags.lock();
        f.abort = true;
        self.state.cv.notify_one();
    }

    /// Дождаться выхода нити.
    pub fn join(&mut self) {
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }

    /// Остановка для обслуживания: abort + join.
    pub fn stop(&mut self) {
        self.abort();
        self.join();
    }

    /// Повторный запуск после stop.
    pub fn restart(&mut self) {
        if self.handle.is_some() {
            return;
        }
        {
            let mut f = self.state.flags.lock();
            f.abort = false;
            f.pending = false;
        }
        self.handle = Some(spawn(self.shared.clone(), self.state.clone()));
    }

    /// Подготовка к останову драйвера; последующий terminate идемпотентен.
    pub fn prepare_terminate(&mut self) {
        self.stop();
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for MergeDaemon {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn(shared: Arc<IndexShared>, state: Arc<DaemonState>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("posting-merge".into())
        .spawn(move || run(shared, state))
        .expect("spawn merge daemon")
}

fn run(shared: Arc<IndexShared>, state: Arc<DaemonState>) {
    let interval = Duration::from_millis(shared.cfg.merge_interval_ms.max(1));
    loop {
        {
            let mut f = state.flags.lock();
            if !f.pending && !f.abort {
                state.cv.wait_for(&mut f, interval);
            }
            if f.abort {
                break;
            }
            f.pending = false;
        }

        let mut cycle_did_work = false;
        for k in 0..shared.unit_count() {
            if state.flags.lock().abort {
                // добиваем на границе юнита
                return;
            }
            match shared.fold_unit(k) {
                Ok(folded) => cycle_did_work |= folded,
                Err(e) => {
                    if crate::error::is_cancelled(&e) {
                        continue;
                    }
                    log::error!("merge of unit {} failed: {:#}", k, e);
                }
            }
        }
        if cycle_did_work {
            metrics::record_merge_cycle();
        }
    }
}
