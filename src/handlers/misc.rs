use rocket::{State, get, routes, serde::json::Json};
use serde::{Deserialize, Serialize};

use crate::registry::ClientRegistry;

#[derive(Serialize, Deserialize, Clone, Default)]
pub struct HealthStatus {
    pub db_status: String,
    pub default_database: Option<String>,
    pub tenants: Vec<String>,
    pub clients: Vec<String>,
}

#[get("/check-health")]
pub async fn health(registry: &State<ClientRegistry>) -> Json<HealthStatus> {
    let mut health = HealthStatus {
        clients: registry.names(),
        ..Default::default()
    };

    let Some(entry) = registry.default_client() else {
        health.db_status = "no client registered".to_string();
        return Json(health);
    };

    match entry.client().default_connection().await {
        Some(conn) if conn.is_open() => {
            health.db_status = "database online!".to_string();
            health.default_database = Some(conn.db_name().to_string());
        }
        _ => health.db_status = "database offline :(".to_string(),
    }
    health.tenants = entry.client().tenant_connections().await.into_keys().collect();

    Json(health)
}

pub fn routes() -> Vec<rocket::Route> {
    routes![health]
}
