//! Reconciliation state machines for the Backup and Restore resources

pub mod backup;
pub mod restore;
