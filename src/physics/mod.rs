pub mod dynamics;
pub mod safety;
pub mod transmission;

pub use dynamics::{DriveInput, VehicleDynamics, VehicleState};
pub use safety::{SafetyFlags, SafetyPipeline, SafetySystem};
pub use transmission::Transmission;
