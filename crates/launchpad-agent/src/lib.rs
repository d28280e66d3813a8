//! Provisioning, configuration and lifecycle of the game server process.

pub mod controller;
pub mod launch;
pub mod materialize;
pub mod output;
pub mod provision;
pub mod settings;

pub use controller::{ControllerError, ServerController, StopOutcome};
pub use settings::{AgentSettings, ServerLayout};
