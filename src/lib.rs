use rocket::{Build, Rocket, routes};

pub mod config;
pub mod database;
pub mod firewall;
pub mod gate;
pub mod logger;
pub mod routes;
pub mod schema;

use config::ServerConfig;
use database::FirewallDbPool;
use gate::{AccessGate, GateConfig};

/// Assembles the rocket instance: administrative routes under `/api`, the
/// gate fairing with its rejection routes, and the database pool as managed
/// state. CORS is attached separately by the binary.
pub fn build_rocket(config: &ServerConfig, pool: FirewallDbPool) -> Rocket<Build> {
    let gate = AccessGate::new(GateConfig::from(config));

    rocket::build()
        .mount("/api", routes::build_routes())
        .mount("/", routes![routes::index])
        .mount("/", gate::denied_routes())
        .attach(gate)
        .manage(pool)
}
