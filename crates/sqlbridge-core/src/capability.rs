//! Capability probing and driver selection.
//!
//! Whether a backend can run is a pure function of an [`Environment`]: the
//! major version of the hosting runtime plus the set of client extensions it
//! exposes. A selection layer uses the [`DriverRegistry`] to list the
//! supported variants and instantiate one by name.

use std::collections::BTreeSet;
use std::fmt;

use crate::backend::Backend;
use crate::driver::{Database, DriverHandle};
use crate::error::{Error, Result, UnsupportedError};
use crate::options::ConnectionOptions;

/// Runtime major version of the current build.
pub const CURRENT_RUNTIME_MAJOR: u32 = 2;

/// What the hosting runtime offers to backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    runtime_major: u32,
    extensions: BTreeSet<String>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new(CURRENT_RUNTIME_MAJOR)
    }
}

impl Environment {
    /// An environment with no client extensions.
    pub fn new(runtime_major: u32) -> Self {
        Self {
            runtime_major,
            extensions: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_extension(mut self, name: impl Into<String>) -> Self {
        self.extensions.insert(name.into());
        self
    }

    #[must_use]
    pub fn without_extension(mut self, name: &str) -> Self {
        self.extensions.remove(name);
        self
    }

    pub fn runtime_major(&self) -> u32 {
        self.runtime_major
    }

    pub fn has_extension(&self, name: &str) -> bool {
        self.extensions.contains(name)
    }

    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.extensions.iter().map(String::as_str)
    }
}

/// Static description of a backend variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverInfo {
    /// Driver name used for selection (`mysqli`, `mysql`)
    pub name: &'static str,
    /// Server family the driver talks to
    pub server_type: &'static str,
    /// Oldest server version the driver supports
    pub minimum_version: &'static str,
}

impl fmt::Display for DriverInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} >= {})",
            self.name, self.server_type, self.minimum_version
        )
    }
}

type Factory = Box<dyn Fn(ConnectionOptions, &Environment) -> Box<dyn Database>>;

struct Entry {
    info: DriverInfo,
    supported: fn(&Environment) -> bool,
    factory: Factory,
}

/// Known backend variants, in registration (preference) order.
pub struct DriverRegistry {
    environment: Environment,
    entries: Vec<Entry>,
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("environment", &self.environment)
            .field(
                "drivers",
                &self.entries.iter().map(|e| e.info.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl DriverRegistry {
    pub fn new(environment: Environment) -> Self {
        Self {
            environment,
            entries: Vec::new(),
        }
    }

    /// Register a backend. Re-registering a name replaces the old entry.
    pub fn register<B>(&mut self, make: fn() -> B) -> &mut Self
    where
        B: Backend + 'static,
        B::Connection: 'static,
    {
        let info = B::INFO;
        let factory: Factory = Box::new(
            move |options: ConnectionOptions, env: &Environment| -> Box<dyn Database> {
                Box::new(DriverHandle::new(make(), options).with_environment(env.clone()))
            },
        );
        self.entries.retain(|e| e.info.name != info.name);
        self.entries.push(Entry {
            info,
            supported: B::is_supported,
            factory,
        });
        self
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Every registered driver, supported or not.
    pub fn drivers(&self) -> impl Iterator<Item = &DriverInfo> {
        self.entries.iter().map(|e| &e.info)
    }

    /// Drivers that can run in this registry's environment.
    pub fn available(&self) -> Vec<DriverInfo> {
        self.entries
            .iter()
            .filter(|e| (e.supported)(&self.environment))
            .map(|e| e.info)
            .collect()
    }

    pub fn is_supported(&self, name: &str) -> bool {
        self.find(name)
            .is_some_and(|e| (e.supported)(&self.environment))
    }

    /// Instantiate the named driver. Nothing connects until first use.
    pub fn create(&self, name: &str, options: ConnectionOptions) -> Result<Box<dyn Database>> {
        let entry = self.find(name).ok_or_else(|| {
            Error::Unsupported(UnsupportedError {
                driver: "unknown",
                message: format!("no driver named '{}' is registered", name),
            })
        })?;
        if !(entry.supported)(&self.environment) {
            return Err(Error::Unsupported(UnsupportedError {
                driver: entry.info.name,
                message: "the client library is not available in this environment".to_string(),
            }));
        }
        tracing::debug!(driver = entry.info.name, host = %options.host, "Creating database driver");
        Ok((entry.factory)(options, &self.environment))
    }

    /// Instantiate the first supported driver, in registration order.
    pub fn create_preferred(&self, options: ConnectionOptions) -> Result<Box<dyn Database>> {
        let name = self
            .entries
            .iter()
            .find(|e| (e.supported)(&self.environment))
            .map(|e| e.info.name)
            .ok_or_else(|| {
                Error::Unsupported(UnsupportedError {
                    driver: "any",
                    message: "no registered driver is supported in this environment".to_string(),
                })
            })?;
        self.create(name, options)
    }

    fn find(&self, name: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.info.name == name)
    }
}
