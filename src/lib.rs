//! SMS/MMS message store with conversation threads kept consistent on
//! every write.

pub mod address;
pub mod config;
pub mod error;
pub mod models;
pub mod storage;

pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use storage::{MessageStore, StorageState};
