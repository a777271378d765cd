//! `reach-cockpit` – HTTP + WebSocket control surface
//!
//! Boots a lightweight server (default `0.0.0.0:8080`) that:
//!
//! 1. **Serves** `GET /status` as JSON and the embedded cockpit page at
//!    every other `GET` path.
//!
//! 2. **Streams** [`EventBus`] traffic (per-tick status on the telemetry
//!    topic, mode changes and faults on the safety topic) to every connected
//!    browser over a WebSocket.
//!
//! 3. **Accepts** JSON commands on the same WebSocket and applies them to
//!    the shared control state through a [`ControlHandle`]:
//!    `/goal/set`, `/goal/nudge`, `/output/robot`, `/output/sim`, `/go`,
//!    `/status`.  Every command gets exactly one reply.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use reach_cockpit::CockpitServer;
//! use reach_middleware::EventBus;
//! # fn handle() -> reach_runtime::ControlHandle { unimplemented!() }
//!
//! #[tokio::main]
//! async fn main() {
//!     let bus = Arc::new(EventBus::default());
//!     CockpitServer::new(handle(), bus)
//!         .run()
//!         .await
//!         .expect("cockpit server failed");
//! }
//! ```
//!
//! [`EventBus`]: reach_middleware::EventBus
//! [`ControlHandle`]: reach_runtime::ControlHandle

pub mod command;
pub mod server;

pub use command::{Command, Reply, apply, parse_command};
pub use server::{CockpitServer, DEFAULT_HOST, DEFAULT_PORT};
