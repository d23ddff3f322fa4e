use crate::connection::ConnectionManager;
use crate::error::{ModelDbError, Result};
use crate::schema::{parse_schema_file, parse_schema_str, ModelSchema, SchemaFile};
use crate::schemas::user::{user_schema, USER_MODEL_NAME};
use crate::service::{Model, ModelService, TypedService};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Schema registry plus a per-name cache of services.
///
/// At most one `ModelService` exists per model name until the cache is
/// cleared or that name is registered again.
pub struct DbServiceFactory {
    manager: Arc<ConnectionManager>,
    schemas: RwLock<HashMap<String, Arc<ModelSchema>>>,
    services: Mutex<HashMap<String, Arc<ModelService>>>,
}

impl DbServiceFactory {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        DbServiceFactory {
            manager,
            schemas: RwLock::new(HashMap::new()),
            services: Mutex::new(HashMap::new()),
        }
    }

    /// Collect schemas first, then `build` against a manager.
    pub fn builder() -> FactoryBuilder {
        FactoryBuilder::default()
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    // ── Registry ─────────────────────────────────────────────────────

    /// Register or replace a model's schema. Replacing evicts the cached
    /// service so the next `get_service` sees the new schema.
    pub fn register_schema(&self, name: &str, schema: ModelSchema) -> Result<()> {
        if name.trim().is_empty() {
            return Err(ModelDbError::Schema("Model name must not be empty".into()));
        }
        schema.check()?;

        let replaced = self
            .write_schemas()
            .insert(name.to_string(), Arc::new(schema))
            .is_some();
        if replaced {
            self.lock_services().remove(name);
            log::info!("Re-registered schema {name}");
        } else {
            log::info!("Registered schema {name}");
        }
        Ok(())
    }

    /// Register every model in a `models:` YAML document. Returns the names
    /// registered, sorted.
    pub fn register_schemas_from_yaml(&self, yaml: &str) -> Result<Vec<String>> {
        self.register_schema_set(parse_schema_str(yaml)?)
    }

    pub fn register_schema_file(&self, path: &Path) -> Result<Vec<String>> {
        self.register_schema_set(parse_schema_file(path)?)
    }

    fn register_schema_set(&self, file: SchemaFile) -> Result<Vec<String>> {
        let mut names: Vec<String> = file.models.keys().cloned().collect();
        names.sort();
        for (name, schema) in file.models {
            self.register_schema(&name, schema)?;
        }
        Ok(names)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.read_schemas().contains_key(name)
    }

    /// Registered model names, sorted.
    pub fn model_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read_schemas().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn schema(&self, name: &str) -> Option<Arc<ModelSchema>> {
        self.read_schemas().get(name).cloned()
    }

    // ── Models & services ────────────────────────────────────────────

    /// Bind a registered model to the live connection.
    pub fn get_model(&self, name: &str) -> Result<Model> {
        let connection = self.manager.connection()?;
        Ok(Model::new(name, self.registered(name)?, connection)
            .with_write_lock(self.manager.write_lock(name)))
    }

    fn registered(&self, name: &str) -> Result<Arc<ModelSchema>> {
        self.schema(name)
            .ok_or_else(|| ModelDbError::SchemaNotRegistered(name.to_string()))
    }

    /// The cached service for `name`, created on first use.
    pub fn get_service(&self, name: &str) -> Result<Arc<ModelService>> {
        let mut services = self.lock_services();
        if let Some(service) = services.get(name) {
            return Ok(service.clone());
        }

        self.manager.connection()?;
        let service = Arc::new(ModelService::new(
            name,
            self.registered(name)?,
            self.manager.clone(),
        ));
        services.insert(name.to_string(), service.clone());
        Ok(service)
    }

    /// Typed view over the cached service for `name`.
    pub fn typed_service<T>(&self, name: &str) -> Result<TypedService<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        Ok(TypedService::new(self.get_service(name)?))
    }

    pub fn clear_service_cache(&self) {
        self.lock_services().clear();
        log::debug!("Service cache cleared");
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Connect through the manager; `uri` overrides the configured default.
    pub async fn initialize(&self, uri: Option<&str>) -> Result<()> {
        self.manager.connect(uri).await?;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    /// Drop every cached service, then close the connection.
    pub async fn disconnect(&self) -> Result<()> {
        self.clear_service_cache();
        self.manager.disconnect().await
    }

    fn read_schemas(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<ModelSchema>>> {
        self.schemas.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_schemas(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<ModelSchema>>> {
        self.schemas.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_services(&self) -> MutexGuard<'_, HashMap<String, Arc<ModelService>>> {
        self.services.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Collects schemas before a connection manager exists.
#[derive(Debug, Default)]
pub struct FactoryBuilder {
    schemas: Vec<(String, ModelSchema)>,
}

impl FactoryBuilder {
    pub fn schema(mut self, name: &str, schema: ModelSchema) -> Self {
        self.schemas.push((name.to_string(), schema));
        self
    }

    /// Add the built-in `User` model.
    pub fn with_user_schema(self) -> Self {
        self.schema(USER_MODEL_NAME, user_schema())
    }

    pub fn schemas_from_yaml(mut self, yaml: &str) -> Result<Self> {
        let file = parse_schema_str(yaml)?;
        self.extend(file);
        Ok(self)
    }

    pub fn schema_file(mut self, path: &Path) -> Result<Self> {
        let file = parse_schema_file(path)?;
        self.extend(file);
        Ok(self)
    }

    fn extend(&mut self, file: SchemaFile) {
        let mut models: Vec<_> = file.models.into_iter().collect();
        models.sort_by(|a, b| a.0.cmp(&b.0));
        self.schemas.extend(models);
    }

    /// Register everything collected; later entries win on name clashes.
    pub fn build(self, manager: Arc<ConnectionManager>) -> Result<DbServiceFactory> {
        let factory = DbServiceFactory::new(manager);
        for (name, schema) in self.schemas {
            factory.register_schema(&name, schema)?;
        }
        Ok(factory)
    }
}
