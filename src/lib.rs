pub mod align;
pub mod app;
pub mod config;
pub mod consolidate;
pub mod domain;
pub mod engine;
pub mod error;
pub mod expand;
pub mod fs_util;
pub mod merge;
pub mod output;
pub mod process;
pub mod project;
pub mod prompt;
pub mod tracker;
pub mod unit;
