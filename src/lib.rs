//! Longitudinal vehicle simulator with driver-assistance filters.
//!
//! A [`Simulator`] owns the vehicle state and a fixed-cadence loop that runs
//! the safety pipeline and dynamics step every tick. Input and render code
//! talk to it through a cloneable [`SimHandle`].

#[macro_use]
extern crate log;

pub mod config;
pub mod controls;
pub mod dashboard;
pub mod error;
pub mod physics;
pub mod scheduler;
pub mod simulator;

pub use config::SimConfig;
pub use controls::{ControlInputs, Gear};
pub use error::{SimError, SimResult};
pub use simulator::{PublishedTargets, SimHandle, Simulator};
