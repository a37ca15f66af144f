pub mod agent;
pub mod assembler;
pub mod config;
pub mod errors;
pub mod flow;
pub mod history;
pub mod models;
pub mod module;
pub mod providers;
pub mod tools;
