//! # Linktrail Integrations Library
//!
//! OAuth integrations with Calendly and YouTube, token lifecycle management, webhook
//! attribution of booked calls to shared links, and a read-through YouTube video cache.

pub mod attribution;
pub mod audit;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod oauth;
pub mod providers;
pub mod repositories;
pub mod server;
pub mod telemetry;
pub mod token_manager;
pub mod token_refresh;
pub mod video_cache;
pub mod webhook_subscriptions;
pub mod webhook_verification;
pub use migration;
