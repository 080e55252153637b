pub mod data_log;
pub mod log_store;
pub mod relay;

pub use data_log::{DataLogger, LogEntry, RequestLog, ResponseLog};
pub use log_store::{LocalLogStore, LogStore};
pub use relay::{ProxyRelay, RelayConfig};
