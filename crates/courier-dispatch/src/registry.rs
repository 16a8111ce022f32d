//! Module registry: filters the compile-time handler catalog against the
//! configuration snapshot and binds the accepted subset to the gateway.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::handler::CommandHandler;

/// A registrable handler group. Catalogs are assembled at build time; there
/// is no runtime discovery.
pub trait HandlerModule: Send + Sync {
    /// Stable identifier matching configuration keys.
    fn name(&self) -> &'static str;
    /// Command-name to handler bindings contributed by this module.
    fn commands(&self) -> Vec<(String, Arc<dyn CommandHandler>)>;
    /// Listener invoked for generic (non-command) events, if the module
    /// subscribes to them.
    fn generic_listener(&self) -> Option<Arc<dyn CommandHandler>> {
        None
    }
}

/// One module's enabled/disabled switch from the configuration snapshot.
#[derive(Debug, Clone)]
pub struct ModuleConfigEntry {
    pub name: String,
    pub is_enabled: bool,
}

/// External configuration collaborator.
#[async_trait]
pub trait ModuleConfigStore: Send + Sync {
    async fn all_modules(&self) -> anyhow::Result<Vec<ModuleConfigEntry>>;
}

/// A module as handed to the gateway's event-binding mechanism.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredModule {
    pub name: String,
    pub commands: Vec<String>,
}

/// Gateway connection collaborator, consumed only for module binding here.
pub trait GatewayClient: Send + Sync {
    fn bind_modules(&self, modules: &[RegisteredModule]) -> anyhow::Result<()>;
}

/// Fatal initialization failures. Configuration-fetch problems are not among
/// them; those degrade to all-enabled.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("module catalog is empty")]
    EmptyCatalog,
    #[error("duplicate module name '{name}' in catalog")]
    DuplicateModule { name: String },
    #[error("command '{command}' is bound by both '{first}' and '{second}'")]
    DuplicateCommand {
        command: String,
        first: String,
        second: String,
    },
    #[error("failed to bind modules to the gateway")]
    Registration(#[source] anyhow::Error),
}

/// The immutable, filtered handler set for the process lifetime.
pub struct RegisteredModuleSet {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
    generic_listeners: Vec<Arc<dyn CommandHandler>>,
    /// Module names accepted for registration, sorted.
    pub included: Vec<String>,
    /// Module names rejected by configuration, sorted.
    pub excluded: Vec<String>,
    /// Accepted modules that had no configuration entry, sorted.
    pub defaulted: Vec<String>,
}

impl RegisteredModuleSet {
    pub fn resolve(&self, command_name: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(command_name).cloned()
    }

    pub fn generic_listeners(&self) -> &[Arc<dyn CommandHandler>] {
        &self.generic_listeners
    }
}

/// Filters `catalog` against the configuration snapshot and binds the result
/// to the gateway. Modules without a configuration entry default to enabled.
pub async fn initialize(
    catalog: Vec<Arc<dyn HandlerModule>>,
    config_store: &dyn ModuleConfigStore,
    gateway: &dyn GatewayClient,
) -> Result<RegisteredModuleSet, InitError> {
    if catalog.is_empty() {
        return Err(InitError::EmptyCatalog);
    }
    let mut seen = HashSet::new();
    for module in &catalog {
        if !seen.insert(module.name()) {
            return Err(InitError::DuplicateModule {
                name: module.name().to_string(),
            });
        }
    }

    let enabled_by_name: HashMap<String, bool> = match config_store.all_modules().await {
        Ok(entries) => entries
            .into_iter()
            .map(|entry| (entry.name, entry.is_enabled))
            .collect(),
        Err(error) => {
            tracing::warn!(
                error = %error,
                "module configuration fetch failed, defaulting every module to enabled"
            );
            HashMap::new()
        }
    };

    let mut handlers: HashMap<String, Arc<dyn CommandHandler>> = HashMap::new();
    let mut command_owner: HashMap<String, String> = HashMap::new();
    let mut generic_listeners = Vec::new();
    let mut included = Vec::new();
    let mut excluded = Vec::new();
    let mut defaulted = Vec::new();
    let mut registered = Vec::new();

    for module in &catalog {
        let name = module.name().to_string();
        match enabled_by_name.get(&name) {
            Some(false) => {
                excluded.push(name);
                continue;
            }
            Some(true) => {}
            None => defaulted.push(name.clone()),
        }

        let mut command_names = Vec::new();
        for (command, handler) in module.commands() {
            if let Some(first) = command_owner.get(&command) {
                return Err(InitError::DuplicateCommand {
                    command,
                    first: first.clone(),
                    second: name,
                });
            }
            command_owner.insert(command.clone(), name.clone());
            command_names.push(command.clone());
            handlers.insert(command, handler);
        }
        if let Some(listener) = module.generic_listener() {
            generic_listeners.push(listener);
        }
        command_names.sort();
        registered.push(RegisteredModule {
            name: name.clone(),
            commands: command_names,
        });
        included.push(name);
    }

    included.sort();
    excluded.sort();
    defaulted.sort();
    tracing::info!(modules = ?included, "modules included for registration");
    tracing::info!(modules = ?excluded, "modules excluded by configuration");
    if !defaulted.is_empty() {
        tracing::info!(modules = ?defaulted, "modules absent from configuration, defaulted to enabled");
    }

    gateway
        .bind_modules(&registered)
        .map_err(InitError::Registration)?;

    Ok(RegisteredModuleSet {
        handlers,
        generic_listeners,
        included,
        excluded,
        defaulted,
    })
}
