pub mod ask;
pub mod collections;
pub mod generate;
pub mod health;
pub mod proxy;
pub mod retrieve;
