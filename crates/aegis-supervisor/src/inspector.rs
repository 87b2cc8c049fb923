//! Service inspector (C5)
//!
//! Enumerates managed units and classifies them: core units from the
//! closed allowlist, store-managed apps whose intended state lives in
//! the installation table, and the supervisor itself.

use crate::runtime::{ContainerRuntime, UnitState};
use aegis_common::Result;
use aegis_ledger::Ledger;
use tracing::{debug, warn};

/// First-party units the supervisor manages directly
pub const CORE_UNITS: &[&str] = &[
    "llm-service",
    "embedding-service",
    "broker-host",
    "dashboard-backend",
    "dashboard-frontend",
];

/// The supervisor's own unit name; never restarted
pub const SELF_UNIT: &str = "aegis-supervisor";

/// Classification of a managed unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitClass {
    /// Closed allowlist of first-party services
    Core,
    /// Installed via the app store; `intended_running` reflects the
    /// installation table
    StoreManaged { intended_running: bool },
    /// The supervisor itself
    SelfUnit,
    /// Anything else on the box
    Other,
}

/// A unit plus its classification
#[derive(Debug, Clone)]
pub struct InspectedUnit {
    pub state: UnitState,
    pub class: UnitClass,
}

impl InspectedUnit {
    /// Store-managed apps intentionally stopped must not be touched
    pub fn eligible_for_recovery(&self) -> bool {
        match &self.class {
            UnitClass::SelfUnit => false,
            UnitClass::StoreManaged { intended_running } => *intended_running,
            UnitClass::Core | UnitClass::Other => true,
        }
    }
}

/// Inspects the unit population each cycle
pub struct ServiceInspector {
    runtime: ContainerRuntime,
    ledger: Ledger,
}

impl ServiceInspector {
    pub fn new(runtime: ContainerRuntime, ledger: Ledger) -> Self {
        ServiceInspector { runtime, ledger }
    }

    /// Enumerate and classify every unit on the host
    pub async fn inspect(&self) -> Result<Vec<InspectedUnit>> {
        let units = self.runtime.list_units().await?;
        let mut inspected = Vec::with_capacity(units.len());

        for state in units {
            let class = self.classify(&state.name).await;
            inspected.push(InspectedUnit { state, class });
        }
        Ok(inspected)
    }

    async fn classify(&self, name: &str) -> UnitClass {
        if name == SELF_UNIT {
            return UnitClass::SelfUnit;
        }
        if CORE_UNITS.contains(&name) {
            return UnitClass::Core;
        }
        match self.ledger.store_app_status(name).await {
            Ok(Some(status)) => {
                debug!("Unit {} is store-managed (status: {})", name, status);
                UnitClass::StoreManaged {
                    // `installed` means deliberately stopped via the
                    // dashboard; anything else is expected to run.
                    intended_running: status != "installed",
                }
            }
            Ok(None) => UnitClass::Other,
            Err(e) => {
                warn!("Failed to check store app status for {}: {}", name, e);
                UnitClass::Other
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(name: &str, class: UnitClass) -> InspectedUnit {
        InspectedUnit {
            state: UnitState {
                name: name.to_string(),
                status: "running".into(),
                health: "unhealthy".into(),
            },
            class,
        }
    }

    #[test]
    fn self_unit_is_never_eligible() {
        assert!(!unit(SELF_UNIT, UnitClass::SelfUnit).eligible_for_recovery());
    }

    #[test]
    fn stopped_store_app_is_skipped() {
        let u = unit(
            "some-app",
            UnitClass::StoreManaged {
                intended_running: false,
            },
        );
        assert!(!u.eligible_for_recovery());
        let u = unit(
            "some-app",
            UnitClass::StoreManaged {
                intended_running: true,
            },
        );
        assert!(u.eligible_for_recovery());
    }

    #[test]
    fn core_units_are_eligible() {
        assert!(unit("llm-service", UnitClass::Core).eligible_for_recovery());
    }
}
