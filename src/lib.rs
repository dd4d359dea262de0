//! civic-engine: an adaptive governance engine for civic-complaint and
//! sensor event streams.
//!
//! Three coupled subsystems:
//! - an ordered event pipeline with per-district sliding-window surge and
//!   disaster detection ([`services::pipeline`], [`services::surge`]);
//! - an online tabular Q-learning routing agent updated from delayed
//!   outcome feedback ([`services::agent`], [`services::feedback`]);
//! - a federated coordinator folding per-district model updates into a
//!   global model under privacy noise ([`services::federated`]).
//!
//! All services are explicit instances wired at startup; there is no
//! module-global state.

pub mod collaborators;
pub mod config;
pub mod events;
pub mod services;

pub use config::EngineConfig;
