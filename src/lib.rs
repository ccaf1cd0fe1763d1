//! calendar-sync - calendar synchronization engine for short-term rentals
//!
//! This crate scrapes availability calendars from booking platforms through a
//! pool of disguised egress identities and merges them into a local store,
//! recording every attempt as a sync log.

pub mod clock;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod otel;
pub mod plugins;
pub mod session;
pub mod sync;
