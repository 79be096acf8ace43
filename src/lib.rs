//! Gator - A command-line RSS feed aggregator
//!
//! This crate registers users, records the feeds they follow, and fetches
//! and normalizes RSS documents for display. Commands are dispatched through
//! [`commands::run`] against a [`commands::State`].

pub mod commands;
pub mod config;
pub mod db;
pub mod fetcher;
pub mod parser;
pub mod store;
