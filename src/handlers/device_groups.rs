use crate::errors::{AppError, ErrorType};
use crate::filters::{AppContext, AuthUser};
use crate::models::{parse_object_id, ActivityLog, DeviceGroup, RequestMeta};
use crate::policy::{self, Operation};
use bson::{doc, oid::ObjectId, Document};
use chrono::Utc;
use futures::TryStreamExt;
use serde::Deserialize;
use serde_json::json;
use warp::http::StatusCode;

pub async fn list_device_groups_handler(
    auth: AuthUser,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::ListDeviceGroups, auth.role).map_err(|err| err.reject())?;

    let mut cursor = ctx
        .device_groups()
        .find(None, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "List device groups error:").reject())?;

    let mut groups: Vec<DeviceGroup> = Vec::new();
    while let Some(group) = cursor
        .try_next()
        .await
        .map_err(|err| AppError::from_mongo(err, "List device groups error:").reject())?
    {
        groups.push(group);
    }

    Ok(warp::reply::json(&groups))
}

pub async fn get_device_group_handler(
    id: String,
    auth: AuthUser,
    meta: RequestMeta,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::GetDeviceGroup, auth.role).map_err(|err| err.reject())?;
    let group_id = parse_object_id(&id, "device group").map_err(|err| err.reject())?;

    let group = ctx
        .device_groups()
        .find_one(doc! { "_id": group_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Get device group error:").reject())?
        .ok_or_else(|| AppError::new("Device group not found", ErrorType::NotFound).reject())?;

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "view_device_group", "device_group", &meta)
            .target_id(group_id),
    );

    Ok(warp::reply::json(&group))
}

/// Every member id must name an existing device at write time.
async fn resolve_devices(ctx: &AppContext, raw: &[String]) -> Result<Vec<ObjectId>, AppError> {
    let mut ids = Vec::with_capacity(raw.len());
    for value in raw {
        let device_id = parse_object_id(value, "device")?;
        ctx.devices()
            .find_one(doc! { "_id": device_id }, None)
            .await
            .map_err(|err| AppError::from_mongo(err, "Device reference check error:"))?
            .ok_or_else(|| AppError::new("Device not found", ErrorType::ReferenceNotFound))?;
        ids.push(device_id);
    }
    Ok(ids)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeviceGroupBody {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub devices: Vec<String>,
}

pub async fn create_device_group_handler(
    auth: AuthUser,
    meta: RequestMeta,
    body: CreateDeviceGroupBody,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::CreateDeviceGroup, auth.role).map_err(|err| err.reject())?;

    let devices = resolve_devices(&ctx, &body.devices)
        .await
        .map_err(|err| err.reject())?;

    let now = Utc::now();
    let group = DeviceGroup {
        id: ObjectId::new(),
        name: body.name,
        description: body.description,
        devices,
        created_by: auth.id,
        created_at: now,
        updated_at: now,
    };

    ctx.device_groups()
        .insert_one(&group, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Create device group error:").reject())?;

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "create_device_group", "device_group", &meta)
            .target_id(group.id)
            .details(doc! { "name": &group.name }),
    );

    Ok(warp::reply::with_status(
        warp::reply::json(&group),
        StatusCode::CREATED,
    ))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDeviceGroupBody {
    pub name: Option<String>,
    pub description: Option<String>,
    pub devices: Option<Vec<String>>,
}

pub async fn update_device_group_handler(
    id: String,
    auth: AuthUser,
    meta: RequestMeta,
    body: UpdateDeviceGroupBody,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::UpdateDeviceGroup, auth.role).map_err(|err| err.reject())?;
    let group_id = parse_object_id(&id, "device group").map_err(|err| err.reject())?;

    ctx.device_groups()
        .find_one(doc! { "_id": group_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Update device group error:").reject())?
        .ok_or_else(|| AppError::new("Device group not found", ErrorType::NotFound).reject())?;

    let mut set = Document::new();
    if let Some(name) = &body.name {
        set.insert("name", name);
    }
    if let Some(description) = &body.description {
        set.insert("description", description);
    }
    if let Some(devices) = &body.devices {
        let devices = resolve_devices(&ctx, devices)
            .await
            .map_err(|err| err.reject())?;
        set.insert("devices", devices);
    }

    if !set.is_empty() {
        set.insert("updatedAt", bson::DateTime::from_chrono(Utc::now()));
        ctx.device_groups()
            .update_one(doc! { "_id": group_id }, doc! { "$set": set }, None)
            .await
            .map_err(|err| AppError::from_mongo(err, "Update device group error:").reject())?;
    }

    let group = ctx
        .device_groups()
        .find_one(doc! { "_id": group_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Update device group error:").reject())?
        .ok_or_else(|| AppError::new("Device group not found", ErrorType::NotFound).reject())?;

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "update_device_group", "device_group", &meta)
            .target_id(group_id)
            .details(doc! { "name": &group.name }),
    );

    Ok(warp::reply::json(&group))
}

pub async fn delete_device_group_handler(
    id: String,
    auth: AuthUser,
    meta: RequestMeta,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::DeleteDeviceGroup, auth.role).map_err(|err| err.reject())?;
    let group_id = parse_object_id(&id, "device group").map_err(|err| err.reject())?;

    let result = ctx
        .device_groups()
        .delete_one(doc! { "_id": group_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Delete device group error:").reject())?;
    if result.deleted_count == 0 {
        return Err(AppError::new("Device group not found", ErrorType::NotFound).reject());
    }

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "delete_device_group", "device_group", &meta)
            .target_id(group_id),
    );

    Ok(warp::reply::json(&json!({
        "message": "Device group deleted successfully"
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddDeviceBody {
    pub device_id: String,
}

pub async fn add_device_handler(
    id: String,
    auth: AuthUser,
    meta: RequestMeta,
    body: AddDeviceBody,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::AddDeviceToGroup, auth.role).map_err(|err| err.reject())?;
    let group_id = parse_object_id(&id, "device group").map_err(|err| err.reject())?;
    let device_id = parse_object_id(&body.device_id, "device").map_err(|err| err.reject())?;

    ctx.devices()
        .find_one(doc! { "_id": device_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Add device to group error:").reject())?
        .ok_or_else(|| AppError::new("Device not found", ErrorType::NotFound).reject())?;

    let group = ctx
        .device_groups()
        .find_one(doc! { "_id": group_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Add device to group error:").reject())?
        .ok_or_else(|| AppError::new("Device group not found", ErrorType::NotFound).reject())?;

    if group.devices.contains(&device_id) {
        return Err(AppError::new("Device already in group", ErrorType::BadRequest).reject());
    }

    ctx.device_groups()
        .update_one(
            doc! { "_id": group_id },
            doc! {
                "$addToSet": { "devices": device_id },
                "$set": { "updatedAt": bson::DateTime::from_chrono(Utc::now()) },
            },
            None,
        )
        .await
        .map_err(|err| AppError::from_mongo(err, "Add device to group error:").reject())?;

    let group = ctx
        .device_groups()
        .find_one(doc! { "_id": group_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Add device to group error:").reject())?
        .ok_or_else(|| AppError::new("Device group not found", ErrorType::NotFound).reject())?;

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "add_device_to_group", "device_group", &meta)
            .target_id(group_id)
            .details(doc! { "deviceId": device_id }),
    );

    Ok(warp::reply::json(&group))
}

pub async fn remove_device_handler(
    id: String,
    device_id: String,
    auth: AuthUser,
    meta: RequestMeta,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::RemoveDeviceFromGroup, auth.role).map_err(|err| err.reject())?;
    let group_id = parse_object_id(&id, "device group").map_err(|err| err.reject())?;
    let device_id = parse_object_id(&device_id, "device").map_err(|err| err.reject())?;

    let group = ctx
        .device_groups()
        .find_one(doc! { "_id": group_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Remove device from group error:").reject())?
        .ok_or_else(|| AppError::new("Device group not found", ErrorType::NotFound).reject())?;

    if !group.devices.contains(&device_id) {
        return Err(AppError::new("Device not in group", ErrorType::BadRequest).reject());
    }

    ctx.device_groups()
        .update_one(
            doc! { "_id": group_id },
            doc! {
                "$pull": { "devices": device_id },
                "$set": { "updatedAt": bson::DateTime::from_chrono(Utc::now()) },
            },
            None,
        )
        .await
        .map_err(|err| AppError::from_mongo(err, "Remove device from group error:").reject())?;

    let group = ctx
        .device_groups()
        .find_one(doc! { "_id": group_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Remove device from group error:").reject())?
        .ok_or_else(|| AppError::new("Device group not found", ErrorType::NotFound).reject())?;

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "remove_device_from_group", "device_group", &meta)
            .target_id(group_id)
            .details(doc! { "deviceId": device_id }),
    );

    Ok(warp::reply::json(&group))
}
