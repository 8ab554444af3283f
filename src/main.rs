//! # Mongodactyl demo server
//!
//! Serves every model from [`mongodactyl::models`] on any tenant database.
//!
//! ## Environment Variables
//!
//! - `DATABASE_URL` or `MONGODB_URL`: MongoDB connection string
//! - `ROCKET_MONGODACTYL`: extra plugin settings, e.g. `{force_close=false}`

use mongodactyl::{TenancyFairing, cli, handlers, models};
use rocket::{catchers, http::Method, routes};
use rocket_cors::{AllowedOrigins, CorsOptions};

const FALLBACK_URL: &str = "mongodb://localhost:27017";

#[rocket::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    if std::env::args().len() > 1 {
        return cli::handle_cli().await;
    }

    let url = cli::database_url().unwrap_or_else(|_| FALLBACK_URL.to_string());
    let figment = rocket::Config::figment().join(("mongodactyl.url", url));

    let cors = CorsOptions::default()
        .allowed_origins(AllowedOrigins::all())
        .allowed_methods(
            vec![Method::Get, Method::Post, Method::Delete]
                .into_iter()
                .map(From::from)
                .collect(),
        )
        .allow_credentials(true)
        .to_cors()?;

    let _rocket = rocket::custom(figment)
        .attach(TenancyFairing::from_config("mongodactyl", models::all()))
        .attach(cors)
        .register("/", catchers![handlers::catch404, handlers::catch500])
        .mount("/", routes![handlers::index])
        .mount("/", handlers::tenants::routes())
        .mount("/misc", handlers::misc::routes())
        .launch()
        .await?;

    Ok(())
}
