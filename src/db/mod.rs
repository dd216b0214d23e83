//! Database module: the append-only patch entry store.
//!
//! `repo` holds SQL-only functions that map rows into `crate::model::Entry`.
//! External modules should import from `vim_patches::db`; the repository API
//! is re-exported here.

pub mod repo;

pub use repo::*;
