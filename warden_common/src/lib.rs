//! Warden Common Library
//!
//! Shared types and contracts for the Warden workspace: controller and
//! poller modes, panic reasons, configuration loading, the bounded-wait
//! guarded value, cancellation, time, and the collaborator traits the
//! supervisory core consumes.
//!
//! # Module Structure
//!
//! - [`status`] - Poller and controller mode enums
//! - [`panic`] - Device families and panic reason mapping
//! - [`config`] - Configuration loading traits and types
//! - [`guarded`] - Mutex with bounded acquire
//! - [`cancel`] - Latch and cancellation token
//! - [`clock`] - Time source abstraction
//! - [`error`] - Error taxonomy
//! - [`item`], [`trigger`], [`store`], [`mail`] - External collaborator contracts
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```toml
//! [dependencies]
//! warden_common = { path = "../warden_common" }
//! ```

pub mod cancel;
pub mod clock;
pub mod config;
pub mod error;
pub mod guarded;
pub mod item;
pub mod mail;
pub mod panic;
pub mod prelude;
pub mod status;
pub mod store;
pub mod trigger;
