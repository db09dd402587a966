//! Device runtime for the framecast display appliance.
//!
//! A framecast unit subscribes to two broker topics scoped by its own
//! identity, renders image payloads on an output device, applies live
//! settings, and can power itself off once its job is done. This crate
//! holds everything that is independent of the concrete broker client
//! and output hardware:
//!
//! - **[`Appliance`]**: Owns and wires every component. [`run()`](Appliance::run)
//!   starts the dispatch loop, the config worker and the shutdown gate,
//!   runs the startup race, and returns once a shutdown sequence has
//!   completed.
//!
//! - **[`Orchestrator`]**: Races broker connection and output-device init
//!   under one soft timeout, then starts auxiliary hardware after a delay.
//!
//! - **[`ConnectionManager`]**: Idempotent connect/subscribe over a
//!   [`Transport`], observable [`ConnectionState`], and identity-filtered
//!   demultiplexing of inbound messages.
//!
//! - **[`DisplayController`]**: Readiness-gated rendering over a
//!   [`DisplayDriver`] with a latest-wins single-slot buffer and
//!   degraded-mode fallback.
//!
//! - **[`ConfigStore`]**: Live settings with fail-safe defaults.
//!
//! - **[`ShutdownGate`]**: Four-condition auto-shutdown with a
//!   process-wide single-fire [`ShutdownLatch`].

pub mod appliance;
pub mod asset;
pub mod config;
pub mod connection;
pub mod display;
pub mod error;
pub mod gate;
pub mod hardware;
pub mod identity;
pub mod orchestrator;
pub mod retry;
pub mod store;
pub mod transport;

// ── Primary re-exports ──────────────────────────────────────────────
pub use appliance::{Appliance, ShutdownReason};
pub use asset::{AssetMessage, AssetSlot};
pub use config::CoreConfig;
pub use connection::{
    ConnectOutcome, ConnectionManager, ConnectionState, InboundHandler, SubscriptionSet,
};
pub use display::{DisplayController, DisplayDriver, DisplayMode};
pub use error::{CoreError, DriverError, HardwareError};
pub use gate::{GatePhase, GateSignal, ShutdownGate, ShutdownLatch};
pub use hardware::{AuxHardware, NoHardware, watch_switch};
pub use identity::{DeviceIdentity, MessageClass, Route};
pub use orchestrator::{Orchestrator, StartupReport};
pub use retry::RetryPolicy;
pub use store::{ConfigStore, ConfigUpdate, Settings};
pub use transport::{
    DeliveryGuarantee, InboundMessage, Transport, TransportError, TransportErrorKind,
    TransportEvent,
};
