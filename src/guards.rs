use rocket::State;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};

use crate::errors::TenancyError;
use crate::registry::{ClientRegistry, RegisteredClient};

/// The client in the registry's default slot.
///
/// ```rust,no_run
/// use mongodactyl::{DefaultClient, TenancyError};
/// use rocket::get;
///
/// #[get("/<db>/users/count")]
/// async fn count(client: DefaultClient, db: &str) -> Result<String, TenancyError> {
///     let tenant = client.client().use_database(db).await?;
///     let count = tenant.model("Users")?.count_documents(Default::default()).await?;
///     Ok(count.to_string())
/// }
/// ```
pub struct DefaultClient(pub RegisteredClient);

impl std::ops::Deref for DefaultClient {
    type Target = RegisteredClient;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for DefaultClient {
    type Error = TenancyError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let registry = match request.guard::<&State<ClientRegistry>>().await {
            Outcome::Success(registry) => registry,
            _ => {
                return Outcome::Error((Status::InternalServerError, TenancyError::NotConnected));
            }
        };

        match registry.default_client() {
            Some(client) => Outcome::Success(DefaultClient(client)),
            None => Outcome::Error((Status::ServiceUnavailable, TenancyError::NotConnected)),
        }
    }
}
