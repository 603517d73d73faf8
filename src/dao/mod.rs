/// Persisted document and message models.
pub mod models;
/// Backend-neutral storage errors.
pub mod storage;
/// Document store abstraction, backends and optimistic transactions.
pub mod store;
