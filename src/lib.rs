//! # cmSim - Adaptive Channel-Map Renegotiation Simulator
//!
//! Simulates a two-node radio link (Master and Slave) that periodically
//! renegotiates a shared channel assignment under a configurable,
//! time-varying packet-loss model, in the manner of Bluetooth AFH
//! channel-map updates. The point of the exercise is comparing two
//! activation strategies and measuring how many communication events a link
//! survives before disconnecting:
//!
//! - **Algorithm 1** (time-triggered): a scheduled update activates
//!   unconditionally when its activation time arrives.
//! - **Algorithm 2** (acknowledgment-gated): an update activates only
//!   through a completed Ack1/Ack2 handshake before its activation time.
//!
//! ## Core Components
//!
//! - **ErrorRateModel**: time-varying loss probability, ramping while the
//!   channels are aligned and penalizing missed/backed-off activations
//! - **UpdateRegistry**: immutable scheduled updates, pending and history
//! - **UpdateGenerator**: periodic channel proposals and back-offs
//! - **ActivationEngine**: forced activation (alg 1) / expiration (alg 2)
//! - **Simulator**: the per-run communication-event loop
//!
//! ## Usage
//!
//! ```no_run
//! use cm_sim::{LoggingEventSink, SimConfig, Simulator};
//!
//! let config = SimConfig::default();
//! let mut sim = Simulator::new(&config, LoggingEventSink::new(true)).unwrap();
//! let events = sim.run();
//! println!("{}", events);
//! ```
//!
//! The simulation runs on a virtual clock: one tick per communication
//! event, no wall-clock sleeps, fully reproducible from a seed.

// Core simulation modules
pub mod cm_activation;
pub mod cm_config;
pub mod cm_error_model;
pub mod cm_interface;
pub mod cm_link;
pub mod cm_registry;
pub mod cm_simulator;
pub mod cm_updates;

// Re-export commonly used types
pub use cm_config::{Algorithm, ConfigError, SimConfig, SimParams};
pub use cm_interface::{
    Channel, DisconnectCause, Event, EventSink, LoggingEventSink, NoOpSink, Packet, SimTime,
    UpdateId,
};
pub use cm_link::{HandshakeState, Link};
pub use cm_registry::{ScheduledUpdate, UpdateRegistry, UpdateState};
pub use cm_simulator::{RunSummary, Simulator};
