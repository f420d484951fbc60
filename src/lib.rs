pub mod baseline;
pub mod config;
pub mod elo;
pub mod error;
pub mod export;
pub mod fixtures;
pub mod form;
pub mod recalc;
pub mod rest;
pub mod snapshot;
pub mod store;
