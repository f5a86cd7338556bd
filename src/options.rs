//! Per-repository options and the registry that hands them out.
//!
//! Options are registered once during startup wiring, keyed by the concrete repository
//! (or unit-of-work) type, and read on every call. The registry is an explicit value
//! threaded through construction and is immutable after [`OptionsRegistryBuilder::build`].

use crate::convention::ConventionSet;
use crate::error::{DbError, DbResult};
use std::any::{TypeId, type_name};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::Level;

/// Serialization settings for document-shaped parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonSettings {
    pub pretty: bool,
    /// Drop null members from serialized documents
    pub skip_nulls: bool,
}

/// Everything a repository needs to turn a call into a command.
#[derive(Debug, Clone, PartialEq)]
pub struct RepositoryOptions {
    /// Schema qualifying tables and routines; empty means unqualified
    pub schema: Option<String>,
    pub conventions: ConventionSet,
    pub json: JsonSettings,
    /// Level of the per-command log event
    pub log_level: Level,
    /// Named connection configuration requested from the factory
    pub connection_key: Option<String>,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            schema: None,
            conventions: ConventionSet::default(),
            json: JsonSettings::default(),
            log_level: Level::DEBUG,
            connection_key: None,
        }
    }
}

impl RepositoryOptions {
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_conventions(mut self, conventions: ConventionSet) -> Self {
        self.conventions = conventions;
        self
    }

    pub fn with_log_level(mut self, level: Level) -> Self {
        self.log_level = level;
        self
    }

    pub fn with_connection_key(mut self, key: impl Into<String>) -> Self {
        self.connection_key = Some(key.into());
        self
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }
}

struct Entry {
    type_name: &'static str,
    options: Arc<RepositoryOptions>,
}

/// Collects per-type options during startup.
pub struct OptionsRegistryBuilder {
    defaults: RepositoryOptions,
    entries: HashMap<TypeId, Entry>,
}

impl OptionsRegistryBuilder {
    pub fn new(defaults: RepositoryOptions) -> Self {
        Self {
            defaults,
            entries: HashMap::new(),
        }
    }

    pub fn defaults(&self) -> &RepositoryOptions {
        &self.defaults
    }

    /// Register options for `R`, replacing any earlier registration.
    pub fn register<R: 'static>(mut self, options: RepositoryOptions) -> Self {
        self.insert::<R>(options);
        self
    }

    /// Register a copy of the defaults for `R`, customized by `configure`.
    ///
    /// The shared defaults are never mutated.
    pub fn configure<R: 'static>(mut self, configure: impl FnOnce(&mut RepositoryOptions)) -> Self {
        let mut options = self.defaults.clone();
        configure(&mut options);
        self.insert::<R>(options);
        self
    }

    fn insert<R: 'static>(&mut self, options: RepositoryOptions) {
        tracing::debug!(repository = type_name::<R>(), "Registered repository options");
        self.entries.insert(
            TypeId::of::<R>(),
            Entry {
                type_name: type_name::<R>(),
                options: Arc::new(options),
            },
        );
    }

    pub fn build(self) -> OptionsRegistry {
        OptionsRegistry {
            defaults: Arc::new(self.defaults),
            entries: Arc::new(self.entries),
        }
    }
}

/// Read-only mapping from repository type to its options. Cheap to clone.
#[derive(Clone)]
pub struct OptionsRegistry {
    defaults: Arc<RepositoryOptions>,
    entries: Arc<HashMap<TypeId, Entry>>,
}

impl OptionsRegistry {
    pub fn builder(defaults: RepositoryOptions) -> OptionsRegistryBuilder {
        OptionsRegistryBuilder::new(defaults)
    }

    /// Options registered for `R`.
    pub fn resolve<R: 'static>(&self) -> DbResult<Arc<RepositoryOptions>> {
        self.resolve_type(TypeId::of::<R>(), type_name::<R>())
    }

    /// Options registered for a runtime type id; `name` is only used in the error.
    pub fn resolve_type(&self, id: TypeId, name: &str) -> DbResult<Arc<RepositoryOptions>> {
        self.entries
            .get(&id)
            .map(|entry| Arc::clone(&entry.options))
            .ok_or_else(|| {
                DbError::configuration(format!(
                    "No options registered for repository type '{}'",
                    name
                ))
            })
    }

    pub fn defaults(&self) -> &RepositoryOptions {
        &self.defaults
    }

    pub fn is_registered<R: 'static>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<R>())
    }

    /// Names of the registered types, sorted.
    pub fn registered_types(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entries.values().map(|e| e.type_name).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for OptionsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptionsRegistry")
            .field("registered", &self.registered_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convention::CasingRule;

    struct UserRepository;
    struct OrderRepository;

    #[test]
    fn test_register_then_resolve() {
        let options = RepositoryOptions::default().with_schema("auth");
        let registry = OptionsRegistry::builder(RepositoryOptions::default())
            .register::<UserRepository>(options.clone())
            .build();

        assert_eq!(*registry.resolve::<UserRepository>().unwrap(), options);
        assert!(registry.is_registered::<UserRepository>());
    }

    #[test]
    fn test_unregistered_type_names_the_type() {
        let registry = OptionsRegistry::builder(RepositoryOptions::default()).build();
        let err = registry.resolve::<OrderRepository>().unwrap_err();

        assert!(matches!(err, DbError::Configuration { .. }));
        assert!(err.to_string().contains("OrderRepository"));
    }

    #[test]
    fn test_configure_does_not_touch_defaults() {
        let defaults = RepositoryOptions {
            conventions: ConventionSet::default().with_casing(CasingRule::LowerSnake),
            ..Default::default()
        };
        let registry = OptionsRegistry::builder(defaults.clone())
            .configure::<UserRepository>(|o| {
                o.schema = Some("auth".to_string());
                o.conventions.parameter.naming.prefix = Some("p_".to_string());
            })
            .build();

        let user = registry.resolve::<UserRepository>().unwrap();
        assert_eq!(user.schema(), Some("auth"));
        assert_eq!(registry.defaults(), &defaults);
        assert_eq!(registry.defaults().conventions.parameter.naming.prefix, None);
        assert_eq!(
            user.conventions.parameter.naming.casing,
            Some(CasingRule::LowerSnake)
        );
    }

    #[test]
    fn test_registered_types_sorted() {
        let registry = OptionsRegistry::builder(RepositoryOptions::default())
            .register::<UserRepository>(RepositoryOptions::default())
            .register::<OrderRepository>(RepositoryOptions::default())
            .build();
        let names = registry.registered_types();
        assert_eq!(names.len(), 2);
        assert!(names[0].ends_with("OrderRepository"));
    }
}
