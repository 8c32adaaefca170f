//! Backend capability registries
//!
//! Two process-wide registries map a backend name (`"mysql"`, ...) to a
//! factory producing fresh harvester or purger instances. A module is keyed
//! by the name it reports about itself; registering the same name again
//! replaces the previous factory.
//!
//! ```rust,ignore
//! use archiver::registry;
//!
//! registry::register_builtin_modules();
//! let harvester = registry::create_harvester("mysql")?;
//! let purger = registry::create_purger("mysql")?;
//! ```

use crate::error::{ArchiverError, Result};
use crate::harvester::Harvester;
use crate::purger::Purger;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tracing::debug;

/// Anything that can be looked up by backend name
pub trait Module: Send + Sync {
    /// Backend name this module implements, e.g. `"mysql"`
    fn name(&self) -> &str;
}

/// Factory producing a new, uninitialized module instance
pub type ModuleFactory<M> = Arc<dyn Fn() -> Box<M> + Send + Sync>;

/// Registry of module factories for one role
pub struct ModuleRegistry<M: ?Sized> {
    kind: &'static str,
    factories: HashMap<String, ModuleFactory<M>>,
}

impl<M: Module + ?Sized> ModuleRegistry<M> {
    /// Create an empty registry; `kind` names the role in errors
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            factories: HashMap::new(),
        }
    }

    /// Register a factory under the name its modules report.
    ///
    /// The factory is invoked once to read that name. Returns the name.
    pub fn register<F>(&mut self, factory: F) -> String
    where
        F: Fn() -> Box<M> + Send + Sync + 'static,
    {
        let name = factory().name().to_string();
        if self.factories.insert(name.clone(), Arc::new(factory)).is_some() {
            debug!(kind = self.kind, module = %name, "Replaced registered module");
        } else {
            debug!(kind = self.kind, module = %name, "Registered module");
        }
        name
    }

    /// Factory registered under `name`
    pub fn factory(&self, name: &str) -> Result<ModuleFactory<M>> {
        self.factories
            .get(name)
            .cloned()
            .ok_or_else(|| ArchiverError::ModuleNotFound {
                kind: self.kind,
                name: name.to_string(),
            })
    }

    /// Create a new instance of the module registered under `name`
    pub fn create(&self, name: &str) -> Result<Box<M>> {
        Ok((self.factory(name)?)())
    }

    /// Check if a module is registered
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered modules
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

static HARVESTERS: LazyLock<Mutex<ModuleRegistry<dyn Harvester>>> =
    LazyLock::new(|| Mutex::new(ModuleRegistry::new("harvester")));

static PURGERS: LazyLock<Mutex<ModuleRegistry<dyn Purger>>> =
    LazyLock::new(|| Mutex::new(ModuleRegistry::new("purger")));

/// Register a harvester factory in the process-wide registry
pub fn register_harvester<F>(factory: F) -> String
where
    F: Fn() -> Box<dyn Harvester> + Send + Sync + 'static,
{
    HARVESTERS.lock().register(factory)
}

/// Register a purger factory in the process-wide registry
pub fn register_purger<F>(factory: F) -> String
where
    F: Fn() -> Box<dyn Purger> + Send + Sync + 'static,
{
    PURGERS.lock().register(factory)
}

/// Create a fresh harvester for `name`
pub fn create_harvester(name: &str) -> Result<Box<dyn Harvester>> {
    // Build outside the lock.
    let factory = HARVESTERS.lock().factory(name)?;
    Ok(factory())
}

/// Create a fresh purger for `name`
pub fn create_purger(name: &str) -> Result<Box<dyn Purger>> {
    let factory = PURGERS.lock().factory(name)?;
    Ok(factory())
}

/// Names of registered harvesters
pub fn registered_harvesters() -> Vec<String> {
    HARVESTERS.lock().names()
}

/// Names of registered purgers
pub fn registered_purgers() -> Vec<String> {
    PURGERS.lock().names()
}

/// Install the built-in backends
pub fn register_builtin_modules() {
    use crate::harvester::mysql::MySqlHarvester;
    use crate::purger::mysql::MySqlPurger;

    register_harvester(|| Box::new(MySqlHarvester::new()));
    register_purger(|| Box::new(MySqlPurger::new()));
}
