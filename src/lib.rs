pub mod config;
pub mod db;
pub mod listing;
pub mod model;
pub mod notify;
pub mod sync;
