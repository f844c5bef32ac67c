pub mod api;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod feed;
pub mod storage;
pub mod workflow;
