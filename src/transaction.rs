use crate::error::BoxError;

/// State of the calling thread's user transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionStatus {
    Active,
    MarkedRollback,
    Prepared,
    Committed,
    RolledBack,
    Unknown,
    NoTransaction,
    Preparing,
    Committing,
    RollingBack,
}

/// Handle to an external transaction coordinator.
///
/// The cache core only stores and hands out this handle; isolation and
/// commit protocol are the coordinator's business. A manager built with a
/// handle supports transactional caches, one built without does not.
pub trait UserTransaction: Send + Sync {
    fn begin(&self) -> Result<(), BoxError>;

    fn commit(&self) -> Result<(), BoxError>;

    fn rollback(&self) -> Result<(), BoxError>;

    fn status(&self) -> TransactionStatus;
}
