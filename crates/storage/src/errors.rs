use sea_orm::{DbErr, SqlErr};

pub use usb_domain::storage::StorageError;

/// Sorts a SeaORM error into the storage taxonomy.
pub(crate) fn from_db_err(err: DbErr) -> StorageError {
    if let Some(sql_err) = err.sql_err() {
        return match sql_err {
            SqlErr::UniqueConstraintViolation(message) => StorageError::Constraint(message),
            SqlErr::ForeignKeyConstraintViolation(message) => StorageError::Constraint(message),
            _ => StorageError::from_source(err),
        };
    }
    match err {
        DbErr::Conn(_) | DbErr::ConnectionAcquire(_) => StorageError::unavailable(err),
        other => StorageError::from_source(other),
    }
}

pub(crate) fn from_io_err(err: std::io::Error) -> StorageError {
    StorageError::unavailable(err)
}
