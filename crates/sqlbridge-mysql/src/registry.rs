//! Registry of the MySQL-family drivers, in preference order.

use sqlbridge_core::capability::{DriverRegistry, Environment};

use crate::legacy::LegacyMySql;
use crate::mysqli::MySqli;

/// Both drivers over the build's environment.
pub fn registry() -> DriverRegistry {
    registry_for(crate::build_environment())
}

/// Both drivers over an explicit environment.
pub fn registry_for(environment: Environment) -> DriverRegistry {
    let mut registry = DriverRegistry::new(environment);
    registry.register(MySqli::new).register(LegacyMySql::default);
    registry
}
