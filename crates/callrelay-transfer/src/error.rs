use crate::migrations::MigrationError;
use callrelay_types::UnknownLabel;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("failed to create database connection pool: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("decision already recorded for session {0}")]
    AlreadyRecorded(String),

    #[error("stored decision is unreadable: {0}")]
    Corrupt(#[from] UnknownLabel),

    #[error("store task failed: {0}")]
    Task(String),
}
