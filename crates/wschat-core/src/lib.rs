//! # wschat-core
//!
//! Switching hub and participant sessions for the wschat relay.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Hub** - Single-owner registry of participants that fans broadcasts out
//! - **Session** - Per-connection read and write pumps
//! - **Config** - Session timings and queue sizes
//! - **Metrics** - Counters and gauges recorded through the `metrics` facade
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐ broadcast ┌─────────────┐  queue   ┌─────────────┐
//! │  read pump  │──────────▶│     Hub     │─────────▶│ write pump  │
//! └─────────────┘           └─────────────┘          └─────────────┘
//!        ▲                   join / leave                   │
//!        │                                                  ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           Connection                            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use wschat_core::{hub, HubConfig, SessionConfig};
//! use wschat_transport::memory;
//!
//! # async fn example() {
//! let (handle, _task) = hub::spawn(HubConfig::default());
//! let (connection, _browser) = memory::pair();
//! tokio::spawn(wschat_core::serve(connection, handle, SessionConfig::default()));
//! # }
//! ```

pub mod config;
pub mod hub;
pub mod metrics;
pub mod session;

pub use config::{HubConfig, SessionConfig};
pub use hub::{BroadcastOutcome, Hub, HubError, HubEvent, HubHandle, HubStats, Participant};
pub use session::{serve, SessionError};
