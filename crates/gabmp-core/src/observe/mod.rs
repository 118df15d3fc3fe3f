//! # Observability
//!
//! - **Logging**: `tracing` subscriber setup ([`init_logging`])
//! - **Counters**: per-pursuit atomic counters ([`PursuitStats`])
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │                 Pursuit                   │
//! │   tracing::debug!(), stats.foo.inc()      │
//! └──────────────┬──────────────────┬─────────┘
//!                ▼                  ▼
//!          ┌──────────┐       ┌──────────┐
//!          │ Logging  │       │ Counters │
//!          │ (fmt)    │       │ (atomic) │
//!          └──────────┘       └──────────┘
//! ```

pub mod logging;
pub mod stats;

pub use logging::{init_logging, LogConfig, LogFormat, LogLevel};
pub use stats::{Counter, PursuitStats, StatsSnapshot};
