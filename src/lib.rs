//! linktally - conversion attribution and commission pipeline for short links
//!
//! This library provides the core functionality for the linktally pipeline:
//! payment webhook ingestion, click/lead/sale attribution, partner commission
//! calculation, aggregate usage tracking, and outbound webhook delivery.

pub mod attribution;
pub mod cache;
pub mod config;
pub mod db;
pub mod delivery;
pub mod dispatch;
pub mod email;
pub mod error;
pub mod events;
pub mod handlers;
pub mod health;
pub mod id;
pub mod idempotency;
pub mod ledger;
pub mod models;
pub mod payments;
pub mod rewards;
