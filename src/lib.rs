pub mod clock;
pub mod config;
pub mod engine;
pub mod geo;
pub mod limits;
pub mod mail;
pub mod model;
pub mod observability;
pub mod scheduler;
pub mod seed;
pub mod slots;
pub mod wal;
