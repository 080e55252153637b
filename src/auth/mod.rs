pub mod cache;
pub mod key_store;

pub use cache::{AuthCache, AuthCacheEntry};
pub use key_store::{HttpKeyStore, KeyRecord, KeyStore, SqliteKeyStore};
