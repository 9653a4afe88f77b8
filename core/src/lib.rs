pub mod config;
pub mod error;
pub mod grammar;
pub mod graph;
pub mod index;
pub mod investigation;
pub mod retry;
pub mod scanner;
pub mod tools;
pub mod watcher;
