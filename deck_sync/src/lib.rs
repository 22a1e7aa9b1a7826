pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod link;
pub mod patch;
pub mod pending;
pub mod protocol;
pub mod reconcile;
pub mod store;

pub use crate::config::{Framing, SyncConfig, TransportKind};
pub use crate::dispatcher::Intent;
pub use crate::engine::{Engine, EngineHandle, EngineStats, LinkStatus, Presenter};
pub use crate::error::{ErrorKind, SyncError};
pub use crate::link::{Endpoint, LinkThread};
pub use crate::protocol::{InboundMsg, OutboundMsg, INBOUND_CAP, OUTBOUND_CAP, OUTCOME_CAP};
pub use crate::reconcile::{CommandOutcome, Resolution};
pub use crate::store::{DashboardState, Snapshot};
