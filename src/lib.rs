//! Vocira billing backend: payment gateway webhook ingestion, the credit
//! ledger, subscriptions, refunds and the admin billing endpoints.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod gateways;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod services;
pub mod workers;
