pub mod cache;
pub mod config;
pub mod error;
pub mod existence;
pub mod generate;
pub mod metadata;
pub mod model;
pub mod parse;
pub mod pool;
pub mod remote;
pub mod runtime;
pub mod sync;
pub mod title;
