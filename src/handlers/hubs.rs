use crate::errors::{AppError, ErrorType};
use crate::filters::{AppContext, AuthUser};
use crate::models::{
    parse_object_id, ActivityLog, Customer, Hub, HubType, NodeStatus, RequestMeta,
};
use crate::policy::{self, Operation};
use bson::{doc, oid::ObjectId, Document};
use chrono::Utc;
use futures::TryStreamExt;
use serde::Deserialize;
use serde_json::json;
use warp::http::StatusCode;

pub async fn list_hubs_handler(
    auth: AuthUser,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::ListHubs, auth.role).map_err(|err| err.reject())?;

    let mut cursor = ctx
        .hubs()
        .find(None, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "List hubs error:").reject())?;

    let mut hubs: Vec<Hub> = Vec::new();
    while let Some(hub) = cursor
        .try_next()
        .await
        .map_err(|err| AppError::from_mongo(err, "List hubs error:").reject())?
    {
        hubs.push(hub);
    }

    Ok(warp::reply::json(&hubs))
}

pub async fn get_hub_handler(
    id: String,
    auth: AuthUser,
    meta: RequestMeta,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::GetHub, auth.role).map_err(|err| err.reject())?;
    let hub_id = parse_object_id(&id, "hub").map_err(|err| err.reject())?;

    let hub = ctx
        .hubs()
        .find_one(doc! { "_id": hub_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Get hub error:").reject())?
        .ok_or_else(|| AppError::new("Hub not found", ErrorType::NotFound).reject())?;

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "view_hub", "hub", &meta).target_id(hub_id),
    );

    Ok(warp::reply::json(&hub))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateHubBody {
    pub name: String,
    #[serde(rename = "type")]
    pub hub_type: HubType,
    pub ip_address: String,
    pub mac_address: Option<String>,
    pub location: Option<String>,
    pub status: Option<NodeStatus>,
    pub parent_hub: Option<String>,
    pub customer: Option<Customer>,
    pub notes: Option<String>,
}

/// Referenced hub must exist at write time; deletes do not cascade.
async fn resolve_parent_hub(
    ctx: &AppContext,
    raw: &str,
) -> Result<ObjectId, AppError> {
    let parent_id = parse_object_id(raw, "hub")?;
    ctx.hubs()
        .find_one(doc! { "_id": parent_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Hub reference check error:"))?
        .ok_or_else(|| AppError::new("Parent hub not found", ErrorType::ReferenceNotFound))?;
    Ok(parent_id)
}

pub async fn create_hub_handler(
    auth: AuthUser,
    meta: RequestMeta,
    body: CreateHubBody,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::CreateHub, auth.role).map_err(|err| err.reject())?;

    let parent_hub = match &body.parent_hub {
        Some(raw) => Some(resolve_parent_hub(&ctx, raw).await.map_err(|err| err.reject())?),
        None => None,
    };

    let now = Utc::now();
    let hub = Hub {
        id: ObjectId::new(),
        name: body.name,
        hub_type: body.hub_type,
        ip_address: body.ip_address,
        mac_address: body.mac_address,
        location: body.location,
        status: body.status.unwrap_or(NodeStatus::Offline),
        last_ping: None,
        parent_hub,
        customer: body.customer,
        notes: body.notes,
        created_at: now,
        updated_at: now,
    };

    ctx.hubs()
        .insert_one(&hub, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Create hub error:").reject())?;

    ctx.broadcaster
        .emit_all("hub_created", json!(&hub))
        .await;

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "create_hub", "hub", &meta)
            .target_id(hub.id)
            .details(doc! { "name": &hub.name, "type": hub.hub_type.as_str() }),
    );

    Ok(warp::reply::with_status(
        warp::reply::json(&hub),
        StatusCode::CREATED,
    ))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateHubBody {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub hub_type: Option<HubType>,
    pub ip_address: Option<String>,
    pub mac_address: Option<String>,
    pub location: Option<String>,
    pub status: Option<NodeStatus>,
    pub parent_hub: Option<String>,
    pub customer: Option<Customer>,
    pub notes: Option<String>,
}

impl UpdateHubBody {
    fn to_update_doc(&self, parent_hub: Option<ObjectId>) -> Result<Document, AppError> {
        let mut set = Document::new();
        if let Some(name) = &self.name {
            set.insert("name", name);
        }
        if let Some(hub_type) = self.hub_type {
            set.insert("type", hub_type.as_str());
        }
        if let Some(ip_address) = &self.ip_address {
            set.insert("ipAddress", ip_address);
        }
        if let Some(mac_address) = &self.mac_address {
            set.insert("macAddress", mac_address);
        }
        if let Some(location) = &self.location {
            set.insert("location", location);
        }
        if let Some(status) = self.status {
            set.insert("status", status.as_str());
        }
        if let Some(parent_hub) = parent_hub {
            set.insert("parentHub", parent_hub);
        }
        if let Some(customer) = &self.customer {
            let customer = bson::to_document(customer).map_err(|err| {
                AppError::new(
                    &format!("Internal Error: {:#?}", err),
                    ErrorType::Internal,
                )
            })?;
            set.insert("customer", customer);
        }
        if let Some(notes) = &self.notes {
            set.insert("notes", notes);
        }
        Ok(set)
    }
}

pub async fn update_hub_handler(
    id: String,
    auth: AuthUser,
    meta: RequestMeta,
    body: UpdateHubBody,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::UpdateHub, auth.role).map_err(|err| err.reject())?;
    let hub_id = parse_object_id(&id, "hub").map_err(|err| err.reject())?;

    ctx.hubs()
        .find_one(doc! { "_id": hub_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Update hub error:").reject())?
        .ok_or_else(|| AppError::new("Hub not found", ErrorType::NotFound).reject())?;

    let parent_hub = match &body.parent_hub {
        Some(raw) => Some(resolve_parent_hub(&ctx, raw).await.map_err(|err| err.reject())?),
        None => None,
    };

    let mut set = body.to_update_doc(parent_hub).map_err(|err| err.reject())?;
    if !set.is_empty() {
        set.insert("updatedAt", bson::DateTime::from_chrono(Utc::now()));
        ctx.hubs()
            .update_one(doc! { "_id": hub_id }, doc! { "$set": set }, None)
            .await
            .map_err(|err| AppError::from_mongo(err, "Update hub error:").reject())?;
    }

    let hub = ctx
        .hubs()
        .find_one(doc! { "_id": hub_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Update hub error:").reject())?
        .ok_or_else(|| AppError::new("Hub not found", ErrorType::NotFound).reject())?;

    ctx.broadcaster.emit_all("hub_updated", json!(&hub)).await;

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "update_hub", "hub", &meta)
            .target_id(hub_id)
            .details(doc! { "name": &hub.name }),
    );

    Ok(warp::reply::json(&hub))
}

pub async fn delete_hub_handler(
    id: String,
    auth: AuthUser,
    meta: RequestMeta,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::DeleteHub, auth.role).map_err(|err| err.reject())?;
    let hub_id = parse_object_id(&id, "hub").map_err(|err| err.reject())?;

    let result = ctx
        .hubs()
        .delete_one(doc! { "_id": hub_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Delete hub error:").reject())?;
    if result.deleted_count == 0 {
        return Err(AppError::new("Hub not found", ErrorType::NotFound).reject());
    }

    ctx.broadcaster
        .emit_all("hub_deleted", json!({ "hubId": hub_id }))
        .await;

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "delete_hub", "hub", &meta).target_id(hub_id),
    );

    Ok(warp::reply::json(&json!({
        "message": "Hub deleted successfully"
    })))
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: NodeStatus,
}

pub async fn update_hub_status_handler(
    id: String,
    auth: AuthUser,
    meta: RequestMeta,
    body: StatusBody,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::UpdateHubStatus, auth.role).map_err(|err| err.reject())?;
    let hub_id = parse_object_id(&id, "hub").map_err(|err| err.reject())?;

    let now = Utc::now();
    let updated = ctx
        .hubs()
        .update_one(
            doc! { "_id": hub_id },
            doc! { "$set": {
                "status": body.status.as_str(),
                "lastPing": bson::DateTime::from_chrono(now),
                "updatedAt": bson::DateTime::from_chrono(now),
            } },
            None,
        )
        .await
        .map_err(|err| AppError::from_mongo(err, "Update hub status error:").reject())?;
    if updated.matched_count == 0 {
        return Err(AppError::new("Hub not found", ErrorType::NotFound).reject());
    }

    let hub = ctx
        .hubs()
        .find_one(doc! { "_id": hub_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Update hub status error:").reject())?
        .ok_or_else(|| AppError::new("Hub not found", ErrorType::NotFound).reject())?;

    ctx.broadcaster
        .emit_room(
            &hub_id.to_hex(),
            "hub_status_changed",
            json!({
                "hubId": hub_id,
                "status": hub.status,
                "lastPing": hub.last_ping,
            }),
        )
        .await;

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "update_hub_status", "hub", &meta)
            .target_id(hub_id)
            .details(doc! { "status": hub.status.as_str() }),
    );

    Ok(warp::reply::json(&hub))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_hub_patch_builds_an_empty_set() {
        let body = UpdateHubBody::default();
        assert!(body.to_update_doc(None).unwrap().is_empty());
    }

    #[test]
    fn hub_patch_maps_renamed_fields_to_wire_names() {
        let body = UpdateHubBody {
            hub_type: Some(HubType::Garage),
            ip_address: Some("192.168.1.10".to_string()),
            status: Some(NodeStatus::Maintenance),
            ..Default::default()
        };
        let set = body.to_update_doc(Some(ObjectId::new())).unwrap();
        assert_eq!(set.get_str("type").unwrap(), "garage");
        assert_eq!(set.get_str("ipAddress").unwrap(), "192.168.1.10");
        assert_eq!(set.get_str("status").unwrap(), "maintenance");
        assert!(set.get_object_id("parentHub").is_ok());
        assert!(set.get("name").is_none());
    }
}
