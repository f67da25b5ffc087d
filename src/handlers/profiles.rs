use crate::errors::{AppError, ErrorType};
use crate::filters::{AppContext, AuthUser};
use crate::models::{parse_object_id, ActivityLog, Profile, RequestMeta, Role, User};
use crate::policy::{self, Operation};
use bson::{doc, oid::ObjectId, Document};
use chrono::Utc;
use futures::TryStreamExt;
use serde::Deserialize;
use serde_json::json;
use warp::http::StatusCode;

pub async fn list_profiles_handler(
    auth: AuthUser,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::ListProfiles, auth.role).map_err(|err| err.reject())?;

    let mut cursor = ctx
        .profiles()
        .find(None, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "List profiles error:").reject())?;

    let mut profiles: Vec<Profile> = Vec::new();
    while let Some(profile) = cursor
        .try_next()
        .await
        .map_err(|err| AppError::from_mongo(err, "List profiles error:").reject())?
    {
        profiles.push(profile);
    }

    Ok(warp::reply::json(&profiles))
}

pub async fn get_profile_handler(
    id: String,
    auth: AuthUser,
    meta: RequestMeta,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::GetProfile, auth.role).map_err(|err| err.reject())?;
    let profile_id = parse_object_id(&id, "profile").map_err(|err| err.reject())?;

    let profile = ctx
        .profiles()
        .find_one(doc! { "_id": profile_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Get profile error:").reject())?
        .ok_or_else(|| AppError::new("Profile not found", ErrorType::NotFound).reject())?;

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "view_profile", "profile", &meta).target_id(profile_id),
    );

    Ok(warp::reply::json(&profile))
}

async fn resolve_device_group(ctx: &AppContext, raw: &str) -> Result<ObjectId, AppError> {
    let group_id = parse_object_id(raw, "device group")?;
    ctx.device_groups()
        .find_one(doc! { "_id": group_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Device group reference check error:"))?
        .ok_or_else(|| AppError::new("Device group not found", ErrorType::ReferenceNotFound))?;
    Ok(group_id)
}

async fn resolve_command_list(ctx: &AppContext, raw: &str) -> Result<ObjectId, AppError> {
    let list_id = parse_object_id(raw, "command list")?;
    ctx.command_lists()
        .find_one(doc! { "_id": list_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Command list reference check error:"))?
        .ok_or_else(|| AppError::new("Command list not found", ErrorType::ReferenceNotFound))?;
    Ok(list_id)
}

/// Profile membership is restricted to accounts with the operator role.
async fn resolve_operator(ctx: &AppContext, raw: &str) -> Result<User, AppError> {
    let user_id = parse_object_id(raw, "user")?;
    let user = ctx
        .users()
        .find_one(doc! { "_id": user_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Operator reference check error:"))?
        .ok_or_else(|| AppError::new("User not found", ErrorType::NotFound))?;
    if user.role != Role::Operator {
        return Err(AppError::new("User is not an operator", ErrorType::BadRequest));
    }
    Ok(user)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProfileBody {
    pub name: String,
    pub description: Option<String>,
    pub device_group: String,
    pub command_list: String,
    #[serde(default)]
    pub operators: Vec<String>,
}

pub async fn create_profile_handler(
    auth: AuthUser,
    meta: RequestMeta,
    body: CreateProfileBody,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::CreateProfile, auth.role).map_err(|err| err.reject())?;

    let device_group = resolve_device_group(&ctx, &body.device_group)
        .await
        .map_err(|err| err.reject())?;
    let command_list = resolve_command_list(&ctx, &body.command_list)
        .await
        .map_err(|err| err.reject())?;

    let mut operators = Vec::with_capacity(body.operators.len());
    for raw in &body.operators {
        let operator = resolve_operator(&ctx, raw).await.map_err(|err| err.reject())?;
        if !operators.contains(&operator.id) {
            operators.push(operator.id);
        }
    }

    let now = Utc::now();
    let profile = Profile {
        id: ObjectId::new(),
        name: body.name,
        description: body.description,
        device_group,
        command_list,
        operators,
        created_by: auth.id,
        created_at: now,
        updated_at: now,
    };

    ctx.profiles()
        .insert_one(&profile, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Create profile error:").reject())?;

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "create_profile", "profile", &meta)
            .target_id(profile.id)
            .details(doc! { "name": &profile.name }),
    );

    Ok(warp::reply::with_status(
        warp::reply::json(&profile),
        StatusCode::CREATED,
    ))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileBody {
    pub name: Option<String>,
    pub description: Option<String>,
    pub device_group: Option<String>,
    pub command_list: Option<String>,
}

pub async fn update_profile_handler(
    id: String,
    auth: AuthUser,
    meta: RequestMeta,
    body: UpdateProfileBody,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::UpdateProfile, auth.role).map_err(|err| err.reject())?;
    let profile_id = parse_object_id(&id, "profile").map_err(|err| err.reject())?;

    ctx.profiles()
        .find_one(doc! { "_id": profile_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Update profile error:").reject())?
        .ok_or_else(|| AppError::new("Profile not found", ErrorType::NotFound).reject())?;

    let mut set = Document::new();
    if let Some(name) = &body.name {
        set.insert("name", name);
    }
    if let Some(description) = &body.description {
        set.insert("description", description);
    }
    if let Some(raw) = &body.device_group {
        let group_id = resolve_device_group(&ctx, raw)
            .await
            .map_err(|err| err.reject())?;
        set.insert("deviceGroup", group_id);
    }
    if let Some(raw) = &body.command_list {
        let list_id = resolve_command_list(&ctx, raw)
            .await
            .map_err(|err| err.reject())?;
        set.insert("commandList", list_id);
    }

    if !set.is_empty() {
        set.insert("updatedAt", bson::DateTime::from_chrono(Utc::now()));
        ctx.profiles()
            .update_one(doc! { "_id": profile_id }, doc! { "$set": set }, None)
            .await
            .map_err(|err| AppError::from_mongo(err, "Update profile error:").reject())?;
    }

    let profile = ctx
        .profiles()
        .find_one(doc! { "_id": profile_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Update profile error:").reject())?
        .ok_or_else(|| AppError::new("Profile not found", ErrorType::NotFound).reject())?;

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "update_profile", "profile", &meta)
            .target_id(profile_id)
            .details(doc! { "name": &profile.name }),
    );

    Ok(warp::reply::json(&profile))
}

pub async fn delete_profile_handler(
    id: String,
    auth: AuthUser,
    meta: RequestMeta,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::DeleteProfile, auth.role).map_err(|err| err.reject())?;
    let profile_id = parse_object_id(&id, "profile").map_err(|err| err.reject())?;

    let result = ctx
        .profiles()
        .delete_one(doc! { "_id": profile_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Delete profile error:").reject())?;
    if result.deleted_count == 0 {
        return Err(AppError::new("Profile not found", ErrorType::NotFound).reject());
    }

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "delete_profile", "profile", &meta)
            .target_id(profile_id),
    );

    Ok(warp::reply::json(&json!({
        "message": "Profile deleted successfully"
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignOperatorBody {
    pub user_id: String,
}

pub async fn assign_operator_handler(
    id: String,
    auth: AuthUser,
    meta: RequestMeta,
    body: AssignOperatorBody,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::AssignOperator, auth.role).map_err(|err| err.reject())?;
    let profile_id = parse_object_id(&id, "profile").map_err(|err| err.reject())?;

    let operator = resolve_operator(&ctx, &body.user_id)
        .await
        .map_err(|err| err.reject())?;

    let profile = ctx
        .profiles()
        .find_one(doc! { "_id": profile_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Assign operator error:").reject())?
        .ok_or_else(|| AppError::new("Profile not found", ErrorType::NotFound).reject())?;

    if profile.operators.contains(&operator.id) {
        return Err(
            AppError::new("Operator already assigned to profile", ErrorType::BadRequest).reject(),
        );
    }

    ctx.profiles()
        .update_one(
            doc! { "_id": profile_id },
            doc! {
                "$addToSet": { "operators": operator.id },
                "$set": { "updatedAt": bson::DateTime::from_chrono(Utc::now()) },
            },
            None,
        )
        .await
        .map_err(|err| AppError::from_mongo(err, "Assign operator error:").reject())?;

    let profile = ctx
        .profiles()
        .find_one(doc! { "_id": profile_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Assign operator error:").reject())?
        .ok_or_else(|| AppError::new("Profile not found", ErrorType::NotFound).reject())?;

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "assign_operator", "profile", &meta)
            .target_id(profile_id)
            .details(doc! { "userId": operator.id, "username": &operator.username }),
    );

    Ok(warp::reply::json(&profile))
}

pub async fn remove_operator_handler(
    id: String,
    user_id: String,
    auth: AuthUser,
    meta: RequestMeta,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::RemoveOperator, auth.role).map_err(|err| err.reject())?;
    let profile_id = parse_object_id(&id, "profile").map_err(|err| err.reject())?;
    let operator_id = parse_object_id(&user_id, "user").map_err(|err| err.reject())?;

    let profile = ctx
        .profiles()
        .find_one(doc! { "_id": profile_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Remove operator error:").reject())?
        .ok_or_else(|| AppError::new("Profile not found", ErrorType::NotFound).reject())?;

    if !profile.operators.contains(&operator_id) {
        return Err(
            AppError::new("Operator not assigned to profile", ErrorType::BadRequest).reject(),
        );
    }

    ctx.profiles()
        .update_one(
            doc! { "_id": profile_id },
            doc! {
                "$pull": { "operators": operator_id },
                "$set": { "updatedAt": bson::DateTime::from_chrono(Utc::now()) },
            },
            None,
        )
        .await
        .map_err(|err| AppError::from_mongo(err, "Remove operator error:").reject())?;

    let profile = ctx
        .profiles()
        .find_one(doc! { "_id": profile_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Remove operator error:").reject())?
        .ok_or_else(|| AppError::new("Profile not found", ErrorType::NotFound).reject())?;

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "remove_operator", "profile", &meta)
            .target_id(profile_id)
            .details(doc! { "userId": operator_id }),
    );

    Ok(warp::reply::json(&profile))
}

/// Assignments for one operator. Operators may ask about themselves;
/// anything wider requires an oversight role.
pub async fn operator_profiles_handler(
    user_id: String,
    auth: AuthUser,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    let target = parse_object_id(&user_id, "user").map_err(|err| err.reject())?;

    policy::check_operator_profiles_access(&auth.id, auth.role, &target)
        .map_err(|err| err.reject())?;

    let mut cursor = ctx
        .profiles()
        .find(doc! { "operators": target }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Operator profiles error:").reject())?;

    let mut profiles: Vec<Profile> = Vec::new();
    while let Some(profile) = cursor
        .try_next()
        .await
        .map_err(|err| AppError::from_mongo(err, "Operator profiles error:").reject())?
    {
        profiles.push(profile);
    }

    Ok(warp::reply::json(&profiles))
}
