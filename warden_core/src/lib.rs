//! Warden Core
//!
//! Supervisory layer of the Warden safety-shutdown appliance: one generic
//! poller per device family, the countdown timer, and the main controller
//! that drives them through two-phase mode transitions.
//!
//! # Module Structure
//!
//! - [`context`] - Shared collaborators and controller signals
//! - [`budget`] - Alert budget computation
//! - [`transition`] - Poller mode transition table
//! - [`poller`] - Generic poller, its loop thread and item-driven work
//! - [`devices`] - Per-family profiles and fleet construction
//! - [`countdown`] - Countdown deadlines and the countdown poller
//! - [`controller`] - Main controller and fan-out protocol

pub mod budget;
pub mod context;
pub mod controller;
pub mod countdown;
pub mod devices;
pub mod poller;
pub mod transition;

pub use context::{ControllerSignals, WardenContext};
pub use controller::MainController;
pub use countdown::CountdownPoller;
pub use poller::{ItemPoller, Poller, PollerView, Supervised};
pub use transition::Transition;
