//! Доменные ошибки поверх anyhow: маркерные типы, различимые через downcast.

use std::fmt;

/// Кооперативная отмена: операция свёрнута, страницы на диске не тронуты
/// (все изменения живут в кэше до flush).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Проверка целостности прервана (treatment содержит Abort).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyAborted;

impl fmt::Display for VerifyAborted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "verification aborted on inconsistency")
    }
}

impl std::error::Error for VerifyAborted {}

/// База помечена недоступной: откат внутри обработчика ошибок тоже не удался.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unavailable;

impl fmt::Display for Unavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "index is marked unavailable, admin intervention required")
    }
}

impl std::error::Error for Unavailable {}

/// true, если в цепочке ошибки лежит Cancelled.
pub fn is_cancelled(e: &anyhow::Error) -> bool {
    e.chain().any(|c| c.downcast_ref::<Cancelled>().is_some())
}

/// true, если проверка была прервана по Abort.
pub fn is_verify_aborted(e: &anyhow::Error) -> bool {
    e.chain().any(|c| c.downcast_ref::<VerifyAborted>().is_some())
}
