//! Session bookkeeping: the `session_id → worker` mapping and TTL expiry.

mod manager;

pub use manager::SessionManager;
