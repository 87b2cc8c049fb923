//! Self-healing supervisor for the Aegis edge appliance
//!
//! Composes the service inspector, the tiered recovery executor, the
//! reboot safety gate, and the periodic supervisor loop, with a
//! heartbeat file read back by the health endpoint.

pub mod engine;
pub mod executor;
pub mod heartbeat;
pub mod inspector;
pub mod primitives;
pub mod reboot_gate;
pub mod runtime;
pub mod server;
pub mod validator;

pub use engine::HealingEngine;
pub use executor::RecoveryExecutor;
pub use inspector::{InspectedUnit, ServiceInspector, UnitClass, CORE_UNITS, SELF_UNIT};
pub use primitives::{Outcome, Primitives};
pub use reboot_gate::RebootGate;
pub use runtime::{ContainerRuntime, UnitState};
pub use validator::PostRebootValidator;
