//! Session controller.
//!
//! The [`SessionController`] is the surface the UI talks to: it starts and
//! hangs up calls, forwards mute and camera changes to the media manager, and
//! publishes assistant state and transcript updates as [`SessionEvent`]s.

pub mod controller;
pub mod state;

pub use controller::{SessionController, SessionEvent};
pub use state::{AssistantState, StatePatch, TurnError, dispatch};
