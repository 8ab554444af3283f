use rocket::serde::json::{Json, Value, json};
use rocket::{Request, catch, get};

pub mod misc;
pub mod tenants;

#[get("/")]
pub fn index() -> &'static str {
    "mongodactyl: GET /<db>/<model>, POST /<db>/<model>, DELETE /<db>"
}

#[catch(404)]
pub fn catch404(req: &Request) -> Json<Value> {
    Json(json!({
        "error": format!("Nothing found at {}", req.uri()),
        "status": 404
    }))
}

#[catch(500)]
pub fn catch500() -> Json<Value> {
    Json(json!({
        "error": "Internal server error",
        "status": 500
    }))
}
