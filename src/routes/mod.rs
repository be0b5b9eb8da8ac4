use rocket::{Route, get, routes};

mod api_error;
mod firewall;

pub use api_error::{ApiError, ApiResult};

#[get("/")]
pub async fn index() -> &'static str {
    "There is nothing interesting here. Not yet, at least."
}

pub fn build_routes() -> Vec<Route> {
    routes![
        firewall::list_firewall_ips,
        firewall::add_firewall_ip,
        firewall::delete_firewall_ip,
    ]
}
