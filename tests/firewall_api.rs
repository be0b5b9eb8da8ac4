use std::net::SocketAddr;

use firewall_server::{
    build_rocket,
    config::ServerConfig,
    database::{FirewallDbError, FirewallDbPool},
    gate::{self, AccessGate, GateConfig},
};
use rand::RngCore;
use rocket::{
    get,
    http::{Header, Status},
    local::asynchronous::Client,
    routes,
};
use serde_json::{Value, json};

#[get("/v1/models")]
fn stub_models() -> &'static str {
    "models"
}

#[get("/unprotected")]
fn stub_unprotected() -> &'static str {
    "open"
}

fn temp_database_url() -> String {
    let mut buf = [0u8; 8];
    rand::rng().fill_bytes(&mut buf);

    std::env::temp_dir()
        .join(format!("firewall-test-{}.sqlite", hex::encode(buf)))
        .to_string_lossy()
        .into_owned()
}

fn test_pool() -> FirewallDbPool {
    FirewallDbPool::from_url(&temp_database_url()).expect("failed to set up the test database")
}

async fn test_client(config: &ServerConfig) -> Client {
    let rocket = build_rocket(config, test_pool()).mount("/", routes![stub_models, stub_unprotected]);

    Client::tracked(rocket).await.expect("failed to build the test client")
}

fn remote(ip: &str) -> SocketAddr {
    format!("{ip}:45000").parse().unwrap()
}

async fn add_ip(client: &Client, ip: &str) -> (Status, Value) {
    let response = client
        .post("/api/firewall/ips")
        .json(&json!({ "ip_address": ip }))
        .dispatch()
        .await;

    let status = response.status();
    let body = response.into_json::<Value>().await.expect("expected a json body");

    (status, body)
}

async fn list_ips(client: &Client) -> Value {
    let response = client.get("/api/firewall/ips").dispatch().await;
    assert_eq!(response.status(), Status::Ok);

    response.into_json::<Value>().await.expect("expected a json body")
}

// Administrative surface

#[rocket::async_test]
async fn list_starts_empty_in_allow_all_mode() {
    let client = test_client(&ServerConfig::default()).await;

    let body = list_ips(&client).await;
    assert_eq!(body["mode"], "allow_all");
    assert_eq!(body["entries"], json!([]));
}

#[rocket::async_test]
async fn add_list_delete_roundtrip() {
    let client = test_client(&ServerConfig::default()).await;

    let (status, body) = add_ip(&client, "  10.0.0.5 ").await;
    assert_eq!(status, Status::Ok);
    assert_eq!(body["ip_address"], "10.0.0.5");
    assert!(body["created_at"].is_i64());

    let listed = list_ips(&client).await;
    assert_eq!(listed["mode"], "allowlist_active");
    assert_eq!(listed["entries"][0]["ip_address"], "10.0.0.5");

    let response = client.delete("/api/firewall/ips/10.0.0.5").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    let body = response.into_json::<Value>().await.unwrap();
    assert_eq!(body["status"], "deleted");

    let listed = list_ips(&client).await;
    assert_eq!(listed["mode"], "allow_all");
    assert_eq!(listed["entries"], json!([]));
}

#[rocket::async_test]
async fn add_rejects_invalid_input() {
    let client = test_client(&ServerConfig::default()).await;

    for bad in ["", "   ", "not-an-ip", "10.0.0.256"] {
        let (status, body) = add_ip(&client, bad).await;
        assert_eq!(status, Status::BadRequest, "input {bad:?}");
        assert_eq!(body["error"]["code"], "invalid_ip");
    }
}

#[rocket::async_test]
async fn duplicate_spellings_conflict() {
    let client = test_client(&ServerConfig::default()).await;

    let (status, _) = add_ip(&client, "2001:0db8::0001").await;
    assert_eq!(status, Status::Ok);

    // same address, different textual form
    let (status, body) = add_ip(&client, "2001:db8:0:0:0:0:0:1").await;
    assert_eq!(status, Status::Conflict);
    assert_eq!(body["error"]["code"], "ip_exists");

    let listed = list_ips(&client).await;
    assert_eq!(listed["entries"].as_array().unwrap().len(), 1);
    assert_eq!(listed["entries"][0]["ip_address"], "2001:db8::1");
}

#[rocket::async_test]
async fn delete_missing_is_not_found() {
    let client = test_client(&ServerConfig::default()).await;

    let response = client.delete("/api/firewall/ips/10.9.9.9").dispatch().await;
    assert_eq!(response.status(), Status::NotFound);
    let body = response.into_json::<Value>().await.unwrap();
    assert_eq!(body["error"]["code"], "ip_not_found");
}

#[rocket::async_test]
async fn delete_invalid_input_is_bad_request() {
    let client = test_client(&ServerConfig::default()).await;

    let response = client.delete("/api/firewall/ips/not-an-ip").dispatch().await;
    assert_eq!(response.status(), Status::BadRequest);
    let body = response.into_json::<Value>().await.unwrap();
    assert_eq!(body["error"]["code"], "invalid_ip");
}

// Access gate

async fn assert_forbidden(response: rocket::local::asynchronous::LocalResponse<'_>) {
    assert_eq!(response.status(), Status::Forbidden);

    let body = response.into_json::<Value>().await.unwrap();
    assert_eq!(body["error"]["code"], "ip_forbidden");
    assert_eq!(body["error"]["message"], "Access denied for client IP");
    assert_eq!(body["error"]["type"], "access_error");
}

#[rocket::async_test]
async fn empty_allowlist_forwards_everyone() {
    let client = test_client(&ServerConfig::default()).await;

    let response = client.get("/v1/models").remote(remote("203.0.113.7")).dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(response.into_string().await.unwrap(), "models");

    // open mode does not even need a resolvable address
    let response = client.get("/v1/models").dispatch().await;
    assert_eq!(response.status(), Status::Ok);
}

#[rocket::async_test]
async fn restricted_mode_full_lifecycle() {
    let client = test_client(&ServerConfig::default()).await;

    let (status, _) = add_ip(&client, "10.0.0.5").await;
    assert_eq!(status, Status::Ok);

    // member forwarded
    let response = client.get("/v1/models").remote(remote("10.0.0.5")).dispatch().await;
    assert_eq!(response.status(), Status::Ok);

    // non-member denied
    let response = client.get("/v1/models").remote(remote("10.0.0.6")).dispatch().await;
    assert_forbidden(response).await;

    // absent address denied
    let response = client.get("/v1/models").dispatch().await;
    assert_forbidden(response).await;

    // deleting the last entry re-opens access - lockout recovery
    let response = client.delete("/api/firewall/ips/10.0.0.5").dispatch().await;
    assert_eq!(response.status(), Status::Ok);

    let response = client.get("/v1/models").remote(remote("10.0.0.6")).dispatch().await;
    assert_eq!(response.status(), Status::Ok);
}

#[rocket::async_test]
async fn unprotected_paths_bypass_the_gate() {
    let client = test_client(&ServerConfig::default()).await;

    let (status, _) = add_ip(&client, "10.0.0.5").await;
    assert_eq!(status, Status::Ok);

    // restricted mode, unknown source, but the path is not protected
    let response = client.get("/unprotected").remote(remote("10.0.0.6")).dispatch().await;
    assert_eq!(response.status(), Status::Ok);
    assert_eq!(response.into_string().await.unwrap(), "open");

    // the admin surface itself stays reachable
    let response = client.get("/api/firewall/ips").remote(remote("10.0.0.6")).dispatch().await;
    assert_eq!(response.status(), Status::Ok);
}

#[rocket::async_test]
async fn forwarded_header_ignored_without_proxy_trust() {
    let client = test_client(&ServerConfig::default()).await;

    let (status, _) = add_ip(&client, "10.0.0.5").await;
    assert_eq!(status, Status::Ok);

    // header claims a member address, but the peer is what counts
    let response = client
        .get("/v1/models")
        .remote(remote("10.0.0.6"))
        .header(Header::new("x-forwarded-for", "10.0.0.5"))
        .dispatch()
        .await;

    assert_forbidden(response).await;
}

#[rocket::async_test]
async fn forwarded_header_wins_with_proxy_trust() {
    let config = ServerConfig {
        trust_proxy_headers: true,
        ..ServerConfig::default()
    };
    let client = test_client(&config).await;

    let (status, _) = add_ip(&client, "10.0.0.5").await;
    assert_eq!(status, Status::Ok);

    // first comma-separated token is the claimed client
    let response = client
        .get("/v1/models")
        .remote(remote("192.0.2.1"))
        .header(Header::new("x-forwarded-for", "10.0.0.5, 192.0.2.1"))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    // unparsable claimed address fails closed
    let response = client
        .get("/v1/models")
        .remote(remote("10.0.0.5"))
        .header(Header::new("x-forwarded-for", "garbage"))
        .dispatch()
        .await;
    assert_forbidden(response).await;

    // empty header falls back to the peer address
    let response = client
        .get("/v1/models")
        .remote(remote("10.0.0.5"))
        .header(Header::new("x-forwarded-for", ""))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
}

#[rocket::async_test]
async fn gate_fails_closed_without_a_database() {
    // no pool managed at all - the gate must deny rather than forward
    let gate = AccessGate::new(GateConfig::new(false, &["/v1".to_owned()]));

    let rocket = rocket::build()
        .mount("/", routes![stub_models])
        .mount("/", gate::denied_routes())
        .attach(gate);

    let client = Client::tracked(rocket).await.unwrap();

    let response = client.get("/v1/models").remote(remote("10.0.0.5")).dispatch().await;
    assert_forbidden(response).await;
}

// Store contract

#[rocket::async_test]
async fn store_insert_conflicts_on_duplicate_key() {
    let pool = test_pool();
    let db = pool.get_one().await.unwrap();

    db.insert_allowlist_entry("10.0.0.5").await.unwrap();

    // the primary key is the real uniqueness guarantee, not the service
    // layer pre-check
    let err = db.insert_allowlist_entry("10.0.0.5").await.unwrap_err();
    assert!(matches!(err, FirewallDbError::Conflict));
}

#[rocket::async_test]
async fn store_delete_reports_absence() {
    let pool = test_pool();
    let db = pool.get_one().await.unwrap();

    assert!(!db.delete_allowlist_entry("10.0.0.5").await.unwrap());

    db.insert_allowlist_entry("10.0.0.5").await.unwrap();
    assert!(db.delete_allowlist_entry("10.0.0.5").await.unwrap());
    assert!(!db.delete_allowlist_entry("10.0.0.5").await.unwrap());
}

#[rocket::async_test]
async fn store_membership_view_matches_entries() {
    let pool = test_pool();
    let db = pool.get_one().await.unwrap();

    assert!(db.allowlist_ip_addresses().await.unwrap().is_empty());

    db.insert_allowlist_entry("10.0.0.5").await.unwrap();
    db.insert_allowlist_entry("2001:db8::1").await.unwrap();

    let ips = db.allowlist_ip_addresses().await.unwrap();
    assert_eq!(ips.len(), 2);
    assert!(ips.contains("10.0.0.5"));
    assert!(ips.contains("2001:db8::1"));

    assert!(db.allowlist_contains("10.0.0.5").await.unwrap());
    assert!(!db.allowlist_contains("10.0.0.6").await.unwrap());
}
