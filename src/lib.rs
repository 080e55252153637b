pub mod auth;
pub mod core;
pub mod embedding;
pub mod llm;
pub mod proxy;
pub mod rag;
pub mod server;
pub mod state;
pub mod vector_math;
