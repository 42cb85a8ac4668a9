/// Database model definitions.
pub mod models;
/// Repository port for rooms and their message logs, plus its backends.
pub mod room_store;
/// Storage abstraction layer for database operations.
pub mod storage;
