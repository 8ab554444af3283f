//! # Client registry
//!
//! Every Rocket instance carries at most one [`ClientRegistry`] in its managed
//! state. It maps registration names to clients and keeps a reserved default
//! slot, filled by whichever registration comes first. An unnamed
//! registration claims the whole registry and so must come alone.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use mongodb::bson::oid::{self, ObjectId};
use tracing::info;

use crate::client::MultiTenantClient;
use crate::errors::TenancyError;

/// What handlers get for one registration: the client and an id factory.
#[derive(Clone)]
pub struct RegisteredClient {
    client: Arc<MultiTenantClient>,
}

impl RegisteredClient {
    pub fn new(client: Arc<MultiTenantClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<MultiTenantClient> {
        &self.client
    }

    pub fn object_id(&self) -> ObjectId {
        ObjectId::new()
    }

    pub fn parse_object_id(&self, hex: &str) -> Result<ObjectId, oid::Error> {
        ObjectId::parse_str(hex)
    }

    pub fn same_client(&self, other: &RegisteredClient) -> bool {
        Arc::ptr_eq(&self.client, &other.client)
    }
}

impl fmt::Debug for RegisteredClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredClient")
            .field("client", &self.client)
            .finish()
    }
}

#[derive(Default)]
struct Slots {
    default: Option<RegisteredClient>,
    named: BTreeMap<String, RegisteredClient>,
}

impl Slots {
    fn check(&self, name: Option<&str>) -> Result<(), TenancyError> {
        match name.filter(|name| !name.is_empty()) {
            Some(name) if self.named.contains_key(name) => {
                Err(TenancyError::DuplicateConnectionName(name.to_string()))
            }
            Some(_) => Ok(()),
            None if self.default.is_some() || !self.named.is_empty() => {
                Err(TenancyError::AlreadyRegistered)
            }
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct ClientRegistry {
    slots: RwLock<Slots>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails with the error [`ClientRegistry::register`] would return for
    /// `name`, without registering anything.
    pub fn check(&self, name: Option<&str>) -> Result<(), TenancyError> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.check(name)
    }

    /// Registers `entry` under `name`, or as the sole unnamed client when
    /// `name` is `None` or empty.
    pub fn register(
        &self,
        name: Option<&str>,
        entry: RegisteredClient,
    ) -> Result<(), TenancyError> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.check(name)?;

        match name.filter(|name| !name.is_empty()) {
            Some(name) => {
                if slots.default.is_none() {
                    slots.default = Some(entry.clone());
                }
                slots.named.insert(name.to_string(), entry);
                info!(name = %name, "client registered");
            }
            None => {
                slots.default = Some(entry);
                info!("client registered");
            }
        }

        Ok(())
    }

    /// The unnamed client, or the first named one.
    pub fn default_client(&self) -> Option<RegisteredClient> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .default
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<RegisteredClient> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .named
            .get(name)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .named
            .keys()
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .default
            .is_none()
    }
}

impl fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("names", &self.names())
            .field("has_default", &!self.is_empty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectOptions;
    use crate::memory::MemoryConnectionFactory;
    use crate::schema::ModelDescriptor;
    use mongodb::bson::doc;

    async fn entry() -> RegisteredClient {
        let client = MultiTenantClient::connect_with(
            Arc::new(MemoryConnectionFactory::new()),
            "mongodb://localhost:27017",
            vec![ModelDescriptor::new("users", "Users", doc! {})],
            ConnectOptions::default(),
        )
        .await
        .unwrap();
        RegisteredClient::new(Arc::new(client))
    }

    #[tokio::test]
    async fn unnamed_registration_is_exclusive() {
        let registry = ClientRegistry::new();
        registry.register(None, entry().await).unwrap();

        let err = registry.register(None, entry().await).unwrap_err();
        assert_eq!(err.to_string(), "fastify-mongoose has already registered");
    }

    #[tokio::test]
    async fn unnamed_after_named_is_rejected() {
        let registry = ClientRegistry::new();
        registry.register(Some("client1"), entry().await).unwrap();

        assert!(matches!(
            registry.register(None, entry().await),
            Err(TenancyError::AlreadyRegistered)
        ));
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let registry = ClientRegistry::new();
        registry.register(Some("client_name"), entry().await).unwrap();

        let err = registry
            .register(Some("client_name"), entry().await)
            .unwrap_err();
        assert_eq!(err.to_string(), "Connection name already registered: client_name");
        assert_eq!(registry.names(), ["client_name"]);
    }

    #[tokio::test]
    async fn first_named_client_fills_the_default_slot() {
        let registry = ClientRegistry::new();
        registry.register(Some("client1"), entry().await).unwrap();
        registry.register(Some("client2"), entry().await).unwrap();

        let default = registry.default_client().unwrap();
        let client1 = registry.get("client1").unwrap();
        let client2 = registry.get("client2").unwrap();

        assert!(default.same_client(&client1));
        assert!(!client1.same_client(&client2));
        assert!(registry.get("client3").is_none());
    }

    #[tokio::test]
    async fn check_reports_conflicts_without_registering() {
        let registry = ClientRegistry::new();
        registry.check(None).unwrap();
        registry.check(Some("client1")).unwrap();
        assert!(registry.is_empty());

        registry.register(Some("client1"), entry().await).unwrap();

        let err = registry.check(Some("client1")).unwrap_err();
        assert_eq!(err.to_string(), "Connection name already registered: client1");
        assert!(matches!(registry.check(None), Err(TenancyError::AlreadyRegistered)));
        registry.check(Some("client2")).unwrap();
        assert_eq!(registry.names(), ["client1"]);
    }

    #[test]
    fn poisoned_lock_still_reports_registrations() {
        let registry = Arc::new(ClientRegistry::new());
        let runtime = tokio::runtime::Runtime::new().unwrap();
        registry
            .register(Some("client1"), runtime.block_on(entry()))
            .unwrap();

        let poisoner = registry.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.slots.write().unwrap();
            panic!("poison the registry lock");
        })
        .join();

        assert!(registry.slots.is_poisoned());
        assert!(!registry.is_empty());
        assert_eq!(registry.names(), ["client1"]);
    }

    #[tokio::test]
    async fn empty_name_counts_as_unnamed() {
        let registry = ClientRegistry::new();
        registry.register(Some(""), entry().await).unwrap();

        assert!(registry.names().is_empty());
        assert!(!registry.is_empty());
    }

    #[tokio::test]
    async fn object_ids_round_trip_through_hex() {
        let entry = entry().await;
        let id = entry.object_id();
        assert_eq!(entry.parse_object_id(&id.to_hex()).unwrap(), id);
        assert!(entry.parse_object_id("not-an-id").is_err());
    }
}
