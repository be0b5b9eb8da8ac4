use rocket::{delete, get, post, serde::json::Json};
use serde::{Deserialize, Serialize};

use super::api_error::{ApiError, ApiResult};
use crate::{
    database::{AllowlistEntry, FirewallDb},
    firewall::{FirewallListData, FirewallService},
    logger::*,
};

#[derive(Deserialize)]
pub struct FirewallIpCreateRequest {
    pub ip_address: String,
}

#[derive(Serialize)]
pub struct FirewallDeleteResponse {
    pub status: &'static str,
}

#[get("/firewall/ips")]
pub async fn list_firewall_ips(db: FirewallDb) -> ApiResult<Json<FirewallListData>> {
    let service = FirewallService::new(db);

    Ok(Json(service.list_ips().await?))
}

#[post("/firewall/ips", data = "<payload>")]
pub async fn add_firewall_ip(
    db: FirewallDb,
    payload: Json<FirewallIpCreateRequest>,
) -> ApiResult<Json<AllowlistEntry>> {
    let service = FirewallService::new(db);
    let entry = service.add_ip(&payload.ip_address).await?;

    info!("allowlisted IP address {}", entry.ip_address);

    Ok(Json(entry))
}

#[delete("/firewall/ips/<ip_address>")]
pub async fn delete_firewall_ip(
    db: FirewallDb,
    ip_address: &str,
) -> ApiResult<Json<FirewallDeleteResponse>> {
    let service = FirewallService::new(db);

    if !service.remove_ip(ip_address).await? {
        return Err(ApiError::not_found("ip_not_found", "IP address not found"));
    }

    info!("removed allowlisted IP address {ip_address}");

    Ok(Json(FirewallDeleteResponse { status: "deleted" }))
}
