use std::collections::BTreeMap;
use std::fmt;
use std::ops::Index;
use std::sync::Arc;

use tracing::{debug, info};

use crate::binder::ModelBinder;
use crate::cache::TenantCache;
use crate::config::{ConnectOptions, PluginOptions};
use crate::connection::{ConnectionFactory, ConnectionRef};
use crate::errors::TenancyError;
use crate::model::Model;
use crate::mongo::MongoConnectionFactory;
use crate::schema::ModelDescriptor;

/// One default connection plus the tenant connections derived from it.
///
/// # Example
///
/// ```rust,no_run
/// # async fn demo(models: Vec<mongodactyl::ModelDescriptor>) -> Result<(), mongodactyl::TenancyError> {
/// use mongodactyl::{ConnectOptions, MultiTenantClient};
/// use mongodb::bson::doc;
///
/// let client =
///     MultiTenantClient::connect("mongodb://localhost:27017", models, ConnectOptions::default())
///         .await?;
///
/// let tenant = client.use_database("test_database").await?;
/// let users = tenant.model("Users")?.find(doc! {}).await?;
///
/// client.close(true).await?;
/// # Ok(())
/// # }
/// ```
pub struct MultiTenantClient {
    url: String,
    options: ConnectOptions,
    binder: ModelBinder,
    cache: Arc<TenantCache>,
}

impl MultiTenantClient {
    /// Opens the default connection with the MongoDB driver.
    pub async fn connect(
        url: &str,
        models: Vec<ModelDescriptor>,
        options: ConnectOptions,
    ) -> Result<Self, TenancyError> {
        Self::connect_with(Arc::new(MongoConnectionFactory::new()), url, models, options).await
    }

    pub async fn connect_with(
        factory: Arc<dyn ConnectionFactory>,
        url: &str,
        models: Vec<ModelDescriptor>,
        options: ConnectOptions,
    ) -> Result<Self, TenancyError> {
        if url.is_empty() {
            return Err(TenancyError::MissingUrl);
        }
        if models.is_empty() {
            return Err(TenancyError::MissingModels);
        }
        let binder = ModelBinder::new(models)?;
        let options = options.merged_over_defaults();

        let timeout = options.server_selection_timeout();
        let default = tokio::time::timeout(timeout, factory.connect(url, &options))
            .await
            .map_err(|_| {
                TenancyError::Connection(format!(
                    "no server selected within {}ms",
                    timeout.as_millis()
                ))
            })??;

        info!(db = %default.db_name(), models = binder.descriptors().len(), "client ready");
        Ok(Self {
            url: url.to_string(),
            options,
            binder,
            cache: Arc::new(TenantCache::new(factory, default)),
        })
    }

    pub async fn from_options(
        factory: Arc<dyn ConnectionFactory>,
        options: &PluginOptions,
    ) -> Result<Self, TenancyError> {
        Self::connect_with(
            factory,
            &options.url,
            options.models.clone(),
            options.connect.clone(),
        )
        .await
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Effective connect options, defaults included.
    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    pub fn model_aliases(&self) -> impl Iterator<Item = &str> {
        self.binder.aliases()
    }

    /// Binds every model on the tenant connection for `db`, deriving it on
    /// first use. Earlier bindings for the same database stay valid.
    pub async fn use_database(&self, db: &str) -> Result<TenantBinding, TenancyError> {
        if db.is_empty() {
            return Err(TenancyError::EmptyDatabaseName);
        }

        let connection = self.cache.resolve(db).await?;
        let models = self.binder.bind(connection.as_ref())?;
        debug!(db = %db, "models bound");

        Ok(TenantBinding {
            db: db.to_string(),
            models,
            cache: self.cache.clone(),
        })
    }

    /// Closes the tenant connection for `db` if one is cached.
    pub async fn close_database(&self, db: &str, force: bool) -> Result<(), TenancyError> {
        self.cache.remove(db, force).await
    }

    /// Closes every tenant connection, then the default one. If a tenant
    /// refuses, the default connection stays open and the call may be retried.
    pub async fn close(&self, force: bool) -> Result<(), TenancyError> {
        self.cache.shutdown(force).await
    }

    pub async fn default_connection(&self) -> Option<ConnectionRef> {
        self.cache.default_connection().await
    }

    pub async fn tenant_connections(&self) -> BTreeMap<String, ConnectionRef> {
        self.cache.snapshot().await
    }
}

impl fmt::Debug for MultiTenantClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiTenantClient")
            .field("url", &self.url)
            .field("options", &self.options)
            .field("models", &self.binder.aliases().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Models bound to one tenant database. Fixed once created; call
/// [`MultiTenantClient::use_database`] again for a fresh set.
pub struct TenantBinding {
    db: String,
    models: BTreeMap<String, Model>,
    cache: Arc<TenantCache>,
}

impl TenantBinding {
    pub fn db(&self) -> &str {
        &self.db
    }

    pub fn get(&self, alias: &str) -> Option<&Model> {
        self.models.get(alias)
    }

    pub fn model(&self, alias: &str) -> Result<&Model, TenancyError> {
        self.get(alias)
            .ok_or_else(|| TenancyError::UnknownModel(alias.to_string()))
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    /// Closes this tenant's connection for every binding that shares it.
    /// `None` closes forcefully.
    pub async fn close(&self, force: Option<bool>) -> Result<(), TenancyError> {
        self.cache.remove(&self.db, force.unwrap_or(true)).await
    }
}

/// `binding["Users"]` is shorthand for `binding.model("Users")`.
///
/// # Panics
///
/// Panics if no model is registered under the alias. Use
/// [`TenantBinding::model`] when the alias comes from user input.
impl Index<&str> for TenantBinding {
    type Output = Model;

    fn index(&self, alias: &str) -> &Model {
        match self.models.get(alias) {
            Some(model) => model,
            None => panic!("no model registered under alias {alias}"),
        }
    }
}

impl fmt::Debug for TenantBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantBinding")
            .field("db", &self.db)
            .field("models", &self.models.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
