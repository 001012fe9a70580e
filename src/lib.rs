pub mod app;
pub mod apply;
pub mod classifier;
pub mod config;
pub mod correlate;
pub mod domain;
pub mod download;
pub mod engine;
pub mod error;
pub mod knowledge;
pub mod output;
pub mod record;
pub mod report;
pub mod store;
pub mod tsv;
