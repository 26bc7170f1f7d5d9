pub mod database;
pub mod models;
pub mod transfer_repository;

pub use database::Database;
pub use models::{
    NewTransfer, PeriodStatusSummary, StatusExtra, TransferFilter, TransferRecord, TransferStats,
    TransferStatus,
};
pub use transfer_repository::TransferRepository;
