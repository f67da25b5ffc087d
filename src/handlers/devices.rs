use crate::errors::{AppError, ErrorType};
use crate::filters::{AppContext, AuthUser};
use crate::models::{
    parse_object_id, ActivityLog, Device, NodeStatus, RequestMeta, Secret,
};
use crate::policy::{self, Operation};
use bson::{doc, oid::ObjectId, Document};
use chrono::Utc;
use futures::TryStreamExt;
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;
use warp::http::StatusCode;

use super::hubs::StatusBody;

#[utoipa::path(
        get,
        path = "/devices",
        responses(
            (status = 200, description = "All registered devices, credentials stripped"),
            (status = 401, description = "Missing or invalid token", body = crate::errors::ErrorMessage),
        )
    )
]
pub async fn list_devices_handler(
    auth: AuthUser,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::ListDevices, auth.role).map_err(|err| err.reject())?;

    let mut cursor = ctx
        .devices()
        .find(None, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "List devices error:").reject())?;

    let mut devices: Vec<Device> = Vec::new();
    while let Some(device) = cursor
        .try_next()
        .await
        .map_err(|err| AppError::from_mongo(err, "List devices error:").reject())?
    {
        devices.push(device.sanitized());
    }

    Ok(warp::reply::json(&devices))
}

pub async fn get_device_handler(
    id: String,
    auth: AuthUser,
    meta: RequestMeta,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::GetDevice, auth.role).map_err(|err| err.reject())?;
    let device_id = parse_object_id(&id, "device").map_err(|err| err.reject())?;

    let device = ctx
        .devices()
        .find_one(doc! { "_id": device_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Get device error:").reject())?
        .ok_or_else(|| AppError::new("Device not found", ErrorType::NotFound).reject())?;

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "view_device", "device", &meta).target_id(device_id),
    );

    Ok(warp::reply::json(&device.sanitized()))
}

async fn resolve_hub(ctx: &AppContext, raw: &str) -> Result<ObjectId, AppError> {
    let hub_id = parse_object_id(raw, "hub")?;
    ctx.hubs()
        .find_one(doc! { "_id": hub_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Hub reference check error:"))?
        .ok_or_else(|| AppError::new("Hub not found", ErrorType::ReferenceNotFound))?;
    Ok(hub_id)
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeviceBody {
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub ip_address: String,
    pub ssh_port: Option<i32>,
    pub ssh_username: Option<String>,
    pub ssh_password: Option<String>,
    pub status: Option<NodeStatus>,
    pub is_docker: Option<bool>,
    pub docker_id: Option<String>,
    pub hub: Option<String>,
}

pub async fn create_device_handler(
    auth: AuthUser,
    meta: RequestMeta,
    body: CreateDeviceBody,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::CreateDevice, auth.role).map_err(|err| err.reject())?;

    let hub = match &body.hub {
        Some(raw) => Some(resolve_hub(&ctx, raw).await.map_err(|err| err.reject())?),
        None => None,
    };

    let now = Utc::now();
    let device = Device {
        id: ObjectId::new(),
        name: body.name,
        device_type: body.device_type,
        ip_address: body.ip_address,
        ssh_port: body.ssh_port.unwrap_or(22),
        ssh_username: body.ssh_username,
        ssh_password: body.ssh_password.map(Secret),
        status: body.status.unwrap_or(NodeStatus::Offline),
        last_ping: None,
        is_docker: body.is_docker.unwrap_or(false),
        docker_id: body.docker_id,
        docker_stats: None,
        hub,
        created_at: now,
        updated_at: now,
    };

    ctx.devices()
        .insert_one(&device, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Create device error:").reject())?;

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "create_device", "device", &meta)
            .target_id(device.id)
            .details(doc! { "name": &device.name, "type": &device.device_type }),
    );

    Ok(warp::reply::with_status(
        warp::reply::json(&device.sanitized()),
        StatusCode::CREATED,
    ))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDeviceBody {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub device_type: Option<String>,
    pub ip_address: Option<String>,
    pub ssh_port: Option<i32>,
    pub ssh_username: Option<String>,
    pub ssh_password: Option<String>,
    pub status: Option<NodeStatus>,
    pub is_docker: Option<bool>,
    pub docker_id: Option<String>,
    pub hub: Option<String>,
}

impl UpdateDeviceBody {
    fn to_update_doc(&self, hub: Option<ObjectId>) -> Document {
        let mut set = Document::new();
        if let Some(name) = &self.name {
            set.insert("name", name);
        }
        if let Some(device_type) = &self.device_type {
            set.insert("type", device_type);
        }
        if let Some(ip_address) = &self.ip_address {
            set.insert("ipAddress", ip_address);
        }
        if let Some(ssh_port) = self.ssh_port {
            set.insert("sshPort", ssh_port);
        }
        if let Some(ssh_username) = &self.ssh_username {
            set.insert("sshUsername", ssh_username);
        }
        if let Some(ssh_password) = &self.ssh_password {
            set.insert("sshPassword", ssh_password);
        }
        if let Some(status) = self.status {
            set.insert("status", status.as_str());
        }
        if let Some(is_docker) = self.is_docker {
            set.insert("isDocker", is_docker);
        }
        if let Some(docker_id) = &self.docker_id {
            set.insert("dockerId", docker_id);
        }
        if let Some(hub) = hub {
            set.insert("hub", hub);
        }
        set
    }
}

pub async fn update_device_handler(
    id: String,
    auth: AuthUser,
    meta: RequestMeta,
    body: UpdateDeviceBody,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::UpdateDevice, auth.role).map_err(|err| err.reject())?;
    let device_id = parse_object_id(&id, "device").map_err(|err| err.reject())?;

    ctx.devices()
        .find_one(doc! { "_id": device_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Update device error:").reject())?
        .ok_or_else(|| AppError::new("Device not found", ErrorType::NotFound).reject())?;

    let hub = match &body.hub {
        Some(raw) => Some(resolve_hub(&ctx, raw).await.map_err(|err| err.reject())?),
        None => None,
    };

    let mut set = body.to_update_doc(hub);
    if !set.is_empty() {
        set.insert("updatedAt", bson::DateTime::from_chrono(Utc::now()));
        ctx.devices()
            .update_one(doc! { "_id": device_id }, doc! { "$set": set }, None)
            .await
            .map_err(|err| AppError::from_mongo(err, "Update device error:").reject())?;
    }

    let device = ctx
        .devices()
        .find_one(doc! { "_id": device_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Update device error:").reject())?
        .ok_or_else(|| AppError::new("Device not found", ErrorType::NotFound).reject())?;

    let device = device.sanitized();
    ctx.broadcaster
        .emit_all("device_updated", json!(&device))
        .await;

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "update_device", "device", &meta)
            .target_id(device_id)
            .details(doc! { "name": &device.name }),
    );

    Ok(warp::reply::json(&device))
}

pub async fn delete_device_handler(
    id: String,
    auth: AuthUser,
    meta: RequestMeta,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::DeleteDevice, auth.role).map_err(|err| err.reject())?;
    let device_id = parse_object_id(&id, "device").map_err(|err| err.reject())?;

    let result = ctx
        .devices()
        .delete_one(doc! { "_id": device_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Delete device error:").reject())?;
    if result.deleted_count == 0 {
        return Err(AppError::new("Device not found", ErrorType::NotFound).reject());
    }

    ctx.broadcaster
        .emit_all("device_deleted", json!({ "deviceId": device_id }))
        .await;

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "delete_device", "device", &meta).target_id(device_id),
    );

    Ok(warp::reply::json(&json!({
        "message": "Device deleted successfully"
    })))
}

pub async fn update_device_status_handler(
    id: String,
    auth: AuthUser,
    meta: RequestMeta,
    body: StatusBody,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::UpdateDeviceStatus, auth.role).map_err(|err| err.reject())?;
    let device_id = parse_object_id(&id, "device").map_err(|err| err.reject())?;

    let now = Utc::now();
    let updated = ctx
        .devices()
        .update_one(
            doc! { "_id": device_id },
            doc! { "$set": {
                "status": body.status.as_str(),
                "lastPing": bson::DateTime::from_chrono(now),
                "updatedAt": bson::DateTime::from_chrono(now),
            } },
            None,
        )
        .await
        .map_err(|err| AppError::from_mongo(err, "Update device status error:").reject())?;
    if updated.matched_count == 0 {
        return Err(AppError::new("Device not found", ErrorType::NotFound).reject());
    }

    let device = ctx
        .devices()
        .find_one(doc! { "_id": device_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Update device status error:").reject())?
        .ok_or_else(|| AppError::new("Device not found", ErrorType::NotFound).reject())?;

    broadcast_device_status(&ctx, &device).await;

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "update_device_status", "device", &meta)
            .target_id(device_id)
            .details(doc! { "status": device.status.as_str() }),
    );

    Ok(warp::reply::json(&device.sanitized()))
}

/// Status changes go to the owning hub's room; an unattached device falls
/// back to the global channel.
pub async fn broadcast_device_status(ctx: &AppContext, device: &Device) {
    let payload = json!({
        "deviceId": device.id,
        "status": device.status,
        "lastPing": device.last_ping,
    });
    match &device.hub {
        Some(hub) => {
            ctx.broadcaster
                .emit_room(&hub.to_hex(), "device_status_changed", payload)
                .await
        }
        None => {
            ctx.broadcaster
                .emit_all("device_status_changed", payload)
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_device_patch_builds_an_empty_set() {
        let body = UpdateDeviceBody::default();
        assert!(body.to_update_doc(None).is_empty());
    }

    #[test]
    fn device_patch_maps_renamed_fields_to_wire_names() {
        let body = UpdateDeviceBody {
            device_type: Some("camera".to_string()),
            ssh_port: Some(2222),
            is_docker: Some(true),
            docker_id: Some("abc123".to_string()),
            ..Default::default()
        };
        let set = body.to_update_doc(None);
        assert_eq!(set.get_str("type").unwrap(), "camera");
        assert_eq!(set.get_i32("sshPort").unwrap(), 2222);
        assert!(set.get_bool("isDocker").unwrap());
        assert_eq!(set.get_str("dockerId").unwrap(), "abc123");
        assert!(set.get("hub").is_none());
        assert!(set.get("name").is_none());
    }
}
