//! # Rocket integration
//!
//! [`TenancyFairing`] registers a [`MultiTenantClient`] on a Rocket instance.
//! At ignite it opens the client (or takes an existing one), attaches it to
//! the instance's [`ClientRegistry`] and, for clients it opened itself, closes
//! them again at shutdown.
//!
//! ```rust,no_run
//! use mongodactyl::{ModelDescriptor, PluginOptions, TenancyFairing};
//! use mongodb::bson::doc;
//!
//! let users = ModelDescriptor::new("users", "Users", doc! { "username": "String" });
//!
//! let rocket = rocket::build()
//!     .attach(TenancyFairing::new(
//!         PluginOptions::new("mongodb://localhost:27017", vec![users.clone()]).with_name("client1"),
//!     ))
//!     .attach(TenancyFairing::new(
//!         PluginOptions::new("mongodb://localhost:27017", vec![users]).with_name("client2"),
//!     ));
//! ```

use std::sync::{Arc, OnceLock};

use rocket::fairing::{self, Fairing, Info, Kind};
use rocket::{Build, Orbit, Rocket};
use tracing::{error, info, warn};

use crate::client::MultiTenantClient;
use crate::config::{PluginConfig, PluginOptions};
use crate::connection::ConnectionFactory;
use crate::errors::TenancyError;
use crate::mongo::MongoConnectionFactory;
use crate::registry::{ClientRegistry, RegisteredClient};
use crate::schema::ModelDescriptor;

enum Source {
    Options(PluginOptions),
    Config {
        key: String,
        models: Vec<ModelDescriptor>,
    },
    Reuse {
        name: Option<String>,
        client: Arc<MultiTenantClient>,
    },
}

struct Owned {
    client: Arc<MultiTenantClient>,
    force_close: bool,
}

/// The error that made a [`TenancyFairing`] abort ignition. Take a handle with
/// [`TenancyFairing::failure`] before attaching the fairing.
#[derive(Clone, Default)]
pub struct IgniteFailure(Arc<OnceLock<String>>);

impl IgniteFailure {
    pub fn message(&self) -> Option<&str> {
        self.0.get().map(String::as_str)
    }
}

pub struct TenancyFairing {
    source: Source,
    factory: Arc<dyn ConnectionFactory>,
    owned: OnceLock<Owned>,
    failure: IgniteFailure,
}

impl TenancyFairing {
    /// Opens a new client from `options` at ignite and closes it at shutdown.
    pub fn new(options: PluginOptions) -> Self {
        Self::from_source(Source::Options(options))
    }

    /// Like [`TenancyFairing::new`], reading everything but the models from
    /// the figment under `key`.
    pub fn from_config(key: impl Into<String>, models: Vec<ModelDescriptor>) -> Self {
        Self::from_source(Source::Config {
            key: key.into(),
            models,
        })
    }

    /// Registers a client opened elsewhere. Its owner stays responsible for
    /// closing it.
    pub fn reuse(name: Option<&str>, client: Arc<MultiTenantClient>) -> Self {
        Self::from_source(Source::Reuse {
            name: name.map(str::to_string),
            client,
        })
    }

    fn from_source(source: Source) -> Self {
        Self {
            source,
            factory: Arc::new(MongoConnectionFactory::new()),
            owned: OnceLock::new(),
            failure: IgniteFailure::default(),
        }
    }

    pub fn with_factory(mut self, factory: Arc<dyn ConnectionFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn failure(&self) -> IgniteFailure {
        self.failure.clone()
    }

    /// Name, client, and the force flag for clients this fairing has to close.
    /// Registration conflicts are reported before any connection is opened.
    async fn open(
        &self,
        rocket: &Rocket<Build>,
        registry: &ClientRegistry,
    ) -> Result<(Option<String>, Arc<MultiTenantClient>, Option<bool>), TenancyError> {
        let options = match &self.source {
            Source::Reuse { name, client } => {
                registry.check(name.as_deref())?;
                return Ok((name.clone(), client.clone(), None));
            }
            Source::Options(options) => options.clone(),
            Source::Config { key, models } => {
                let config: PluginConfig = rocket
                    .figment()
                    .extract_inner(key)
                    .map_err(|e| TenancyError::Config(e.to_string()))?;
                PluginOptions::from_config(config, models.clone())
            }
        };
        registry.check(options.name.as_deref())?;

        let client = MultiTenantClient::from_options(self.factory.clone(), &options).await?;
        Ok((
            options.name.clone(),
            Arc::new(client),
            Some(options.force_close()),
        ))
    }

    fn abort(&self, rocket: Rocket<Build>, e: TenancyError) -> fairing::Result {
        error!(error = %e, "failed to register MongoDB client");
        self.failure.0.get_or_init(|| e.to_string());
        Err(rocket)
    }
}

#[rocket::async_trait]
impl Fairing for TenancyFairing {
    fn info(&self) -> Info {
        Info {
            name: "Multi-tenant MongoDB",
            kind: Kind::Ignite | Kind::Shutdown,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> fairing::Result {
        let rocket = if rocket.state::<ClientRegistry>().is_some() {
            rocket
        } else {
            rocket.manage(ClientRegistry::new())
        };
        let Some(registry) = rocket.state::<ClientRegistry>() else {
            return Err(rocket);
        };

        let (name, client, force_close) = match self.open(&rocket, registry).await {
            Ok(opened) => opened,
            Err(e) => return self.abort(rocket, e),
        };

        let entry = RegisteredClient::new(client.clone());
        if let Err(e) = registry.register(name.as_deref(), entry) {
            if let Some(force) = force_close
                && let Err(e) = client.close(force).await
            {
                warn!(error = %e, "failed to close rejected client");
            }
            return self.abort(rocket, e);
        }

        if let Some(force_close) = force_close
            && self
                .owned
                .set(Owned {
                    client,
                    force_close,
                })
                .is_err()
        {
            warn!("fairing ignited twice, the second client will not be closed at shutdown");
        }

        Ok(rocket)
    }

    async fn on_shutdown(&self, _rocket: &Rocket<Orbit>) {
        let Some(owned) = self.owned.get() else {
            return;
        };

        match owned.client.close(owned.force_close).await {
            Ok(()) => info!(url = %owned.client.url(), "MongoDB client closed"),
            Err(e) => warn!(error = %e, "failed to close MongoDB client on shutdown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryConnectionFactory;
    use mongodb::bson::doc;

    fn fairing(factory: &MemoryConnectionFactory) -> TenancyFairing {
        let users = ModelDescriptor::new("users", "Users", doc! { "username": "String" });
        TenancyFairing::new(PluginOptions::new("mongodb://localhost:27017", vec![users]))
            .with_factory(Arc::new(factory.clone()))
    }

    #[tokio::test]
    async fn second_ignite_keeps_the_first_owned_client() {
        let factory = MemoryConnectionFactory::new();
        let fairing = fairing(&factory);

        let first = fairing.on_ignite(rocket::build()).await.ok().unwrap();
        let second = fairing.on_ignite(rocket::build()).await.ok().unwrap();

        let first_client = first.state::<ClientRegistry>().unwrap().default_client().unwrap();
        let second_client = second.state::<ClientRegistry>().unwrap().default_client().unwrap();
        let owned = fairing.owned.get().unwrap();

        assert!(Arc::ptr_eq(&owned.client, first_client.client()));
        assert!(!Arc::ptr_eq(&owned.client, second_client.client()));
        assert!(owned.force_close);
        assert_eq!(factory.connections_opened(), 2);
        assert!(fairing.failure().message().is_none());
    }

    #[tokio::test]
    async fn registration_conflict_is_recorded_before_connecting() {
        let factory = MemoryConnectionFactory::new();
        let existing = MultiTenantClient::connect_with(
            Arc::new(factory.clone()),
            "mongodb://localhost:27017",
            vec![ModelDescriptor::new("users", "Users", doc! {})],
            Default::default(),
        )
        .await
        .unwrap();
        let registry = ClientRegistry::new();
        registry
            .register(None, RegisteredClient::new(Arc::new(existing)))
            .unwrap();

        let fairing = fairing(&factory);
        let rocket = rocket::build().manage(registry);

        assert!(fairing.on_ignite(rocket).await.is_err());
        assert_eq!(
            fairing.failure().message(),
            Some("fastify-mongoose has already registered")
        );
        assert_eq!(factory.connections_opened(), 1);
    }
}
