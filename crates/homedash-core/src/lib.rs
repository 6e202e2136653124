//! Application layer between `homedash-api` and its consumers (the CLI).
//!
//! - **[`Dashboard`]**: owns one backend's [`SessionStore`] and
//!   [`Gateway`], exposes login/logout/whoami, authenticated requests, and
//!   the route guard ([`Dashboard::authorize`]). Involuntary logouts are
//!   broadcast as [`LoginRequired`].
//!
//! - **[`DebugConsole`]**: operator-driven broker connection with a
//!   bounded message [`Transcript`]. Generic over
//!   [`BrokerConnector`](homedash_api::BrokerConnector) so it runs against
//!   the real MQTT transport or an in-memory fake.
//!
//! - **[`guard`]**: the dashboard's route table and the pure navigation
//!   decision.
//!
//! [`SessionStore`]: homedash_api::SessionStore
//! [`Gateway`]: homedash_api::Gateway

pub mod config;
pub mod console;
pub mod dashboard;
pub mod error;
pub mod guard;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{ConnectionParams, DashboardConfig, TlsVerification};
pub use console::{
    ConsoleState, ConsoleStatus, DebugConsole, Direction, Outcome, Skip, Subscription,
    Transcript, TranscriptEntry,
};
pub use dashboard::{Dashboard, LoginRequired};
pub use error::CoreError;
pub use guard::{Navigation, Route};

// Transport types consumers need alongside the core API.
pub use homedash_api::{
    ApiRequest, BrokerStatus, Identity, MqttConnector, ProtocolVersion, QoS, StorageScope,
};
