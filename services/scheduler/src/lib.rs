//! Rotation scheduler service library.
//!
//! This crate primarily ships a `rota-scheduler` binary, but we expose a small
//! library surface to enable integration testing and reuse.

pub mod config;
pub mod db;
pub mod ledger;
pub mod planner;
pub mod worker;
