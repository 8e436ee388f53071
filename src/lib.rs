pub mod clock;
pub mod config;
pub mod directory;
pub mod engine;
pub mod identity;
pub mod limits;
pub mod model;
pub mod observability;
pub mod resolver;
pub mod seed;
pub mod service;
pub mod sweeper;
pub mod wal;
