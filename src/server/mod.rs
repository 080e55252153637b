pub mod extract;
pub mod handlers;
pub mod proxy_router;
pub mod router;
