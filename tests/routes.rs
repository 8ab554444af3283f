mod common;

use common::unnamed;
use mongodactyl::handlers::{self, misc::HealthStatus};
use mongodactyl::MemoryConnectionFactory;
use rocket::http::{ContentType, Status};
use rocket::local::asynchronous::Client;
use rocket::serde::json::{Value, json};
use rocket::{catchers, routes};

async fn client(factory: &MemoryConnectionFactory) -> Client {
    let rocket = rocket::build()
        .attach(unnamed(factory))
        .register("/", catchers![handlers::catch404, handlers::catch500])
        .mount("/", routes![handlers::index])
        .mount("/", handlers::tenants::routes())
        .mount("/misc", handlers::misc::routes());

    Client::tracked(rocket).await.unwrap()
}

#[rocket::async_test]
async fn documents_are_created_and_listed_per_tenant() {
    let factory = MemoryConnectionFactory::new();
    let client = client(&factory).await;

    let response = client
        .post("/tenant_a/Users")
        .header(ContentType::JSON)
        .body(json!({ "username": "saul", "age": 45 }).to_string())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Created);
    let created: Value = response.into_json().await.unwrap();
    assert!(created["_id"]["$oid"].is_string());

    let listed: Vec<Value> = client
        .get("/tenant_a/Users")
        .dispatch()
        .await
        .into_json()
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["username"], "saul");

    let other: Vec<Value> = client
        .get("/tenant_b/Users")
        .dispatch()
        .await
        .into_json()
        .await
        .unwrap();
    assert!(other.is_empty());
}

#[rocket::async_test]
async fn unknown_model_is_a_json_404() {
    let factory = MemoryConnectionFactory::new();
    let client = client(&factory).await;

    let response = client.get("/tenant_a/Comments").dispatch().await;
    assert_eq!(response.status(), Status::NotFound);

    let body: Value = response.into_json().await.unwrap();
    assert_eq!(body["status"], 404);
    assert_eq!(body["error"], "No model registered under alias: Comments");
}

#[rocket::async_test]
async fn non_object_bodies_are_rejected() {
    let factory = MemoryConnectionFactory::new();
    let client = client(&factory).await;

    let response = client
        .post("/tenant_a/Users")
        .header(ContentType::JSON)
        .body("[1, 2, 3]")
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::BadRequest);
    assert_eq!(factory.document_count("tenant_a", "users"), 0);
}

#[rocket::async_test]
async fn deleting_a_tenant_closes_its_connection() {
    let factory = MemoryConnectionFactory::new();
    let client = client(&factory).await;

    client.get("/tenant_a/Users").dispatch().await;
    let response = client.delete("/tenant_a").dispatch().await;
    assert_eq!(response.status(), Status::NoContent);
    assert_eq!(factory.connections_closed(), 1);

    let health: HealthStatus = client
        .get("/misc/check-health")
        .dispatch()
        .await
        .into_json()
        .await
        .unwrap();
    assert!(health.tenants.is_empty());
}

#[rocket::async_test]
async fn health_reports_default_and_tenants() {
    let factory = MemoryConnectionFactory::new();
    let client = client(&factory).await;
    client.get("/tenant_a/Post").dispatch().await;

    let response = client.get("/misc/check-health").dispatch().await;
    assert_eq!(response.status(), Status::Ok);

    let health: HealthStatus = response.into_json().await.unwrap();
    assert_eq!(health.db_status, "database online!");
    assert_eq!(health.default_database.as_deref(), Some("test"));
    assert_eq!(health.tenants, ["tenant_a"]);
    assert!(health.clients.is_empty());
}

#[rocket::async_test]
async fn unmatched_paths_use_the_json_catcher() {
    let factory = MemoryConnectionFactory::new();
    let client = client(&factory).await;

    let response = client.get("/a/b/c").dispatch().await;
    assert_eq!(response.status(), Status::NotFound);

    let body: Value = response.into_json().await.unwrap();
    assert_eq!(body["status"], 404);
}
