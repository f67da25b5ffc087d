use crate::errors::{AppError, ErrorType};
use crate::filters::{AppContext, AuthUser};
use crate::models::{parse_object_id, ActivityLog, RequestMeta, Role, User, UserView};
use crate::policy::{self, Operation};
use crate::security;
use bson::{doc, oid::ObjectId, Document};
use chrono::Utc;
use futures::TryStreamExt;
use serde::Deserialize;
use serde_json::json;
use warp::http::StatusCode;

pub async fn list_users_handler(
    auth: AuthUser,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::ListUsers, auth.role).map_err(|err| err.reject())?;

    let mut cursor = ctx
        .users()
        .find(None, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "List users error:").reject())?;

    let mut users: Vec<UserView> = Vec::new();
    while let Some(user) = cursor
        .try_next()
        .await
        .map_err(|err| AppError::from_mongo(err, "List users error:").reject())?
    {
        users.push(UserView::from(&user));
    }

    Ok(warp::reply::json(&users))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserBody {
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_active: Option<bool>,
}

pub async fn create_user_handler(
    auth: AuthUser,
    meta: RequestMeta,
    body: CreateUserBody,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::CreateUser, auth.role).map_err(|err| err.reject())?;

    let taken = ctx
        .users()
        .find_one(
            doc! { "$or": [ { "username": &body.username }, { "email": &body.email } ] },
            None,
        )
        .await
        .map_err(|err| AppError::from_mongo(err, "Create user error:").reject())?;
    if taken.is_some() {
        return Err(AppError::new("User already exists", ErrorType::Conflict).reject());
    }

    let password = security::hash_password(&body.password).map_err(|err| err.reject())?;

    let now = Utc::now();
    let user = User {
        id: ObjectId::new(),
        username: body.username,
        email: body.email,
        password,
        role: body.role,
        first_name: body.first_name,
        last_name: body.last_name,
        is_active: body.is_active.unwrap_or(true),
        last_login: None,
        created_by: Some(auth.id),
        created_at: now,
        updated_at: now,
    };

    ctx.users()
        .insert_one(&user, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Create user error:").reject())?;

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "create_user", "user", &meta)
            .target_id(user.id)
            .details(doc! { "username": &user.username, "role": user.role.as_str() }),
    );

    Ok(warp::reply::with_status(
        warp::reply::json(&UserView::from(&user)),
        StatusCode::CREATED,
    ))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserBody {
    pub username: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_active: Option<bool>,
}

impl UpdateUserBody {
    /// Only the fields present in the request land in `$set`.
    fn to_update_doc(&self) -> Document {
        let mut set = Document::new();
        if let Some(username) = &self.username {
            set.insert("username", username);
        }
        if let Some(email) = &self.email {
            set.insert("email", email);
        }
        if let Some(role) = self.role {
            set.insert("role", role.as_str());
        }
        if let Some(first_name) = &self.first_name {
            set.insert("firstName", first_name);
        }
        if let Some(last_name) = &self.last_name {
            set.insert("lastName", last_name);
        }
        if let Some(is_active) = self.is_active {
            set.insert("isActive", is_active);
        }
        set
    }
}

pub async fn update_user_handler(
    id: String,
    auth: AuthUser,
    meta: RequestMeta,
    body: UpdateUserBody,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::UpdateUser, auth.role).map_err(|err| err.reject())?;
    let user_id = parse_object_id(&id, "user").map_err(|err| err.reject())?;

    ctx.users()
        .find_one(doc! { "_id": user_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Update user error:").reject())?
        .ok_or_else(|| AppError::new("User not found", ErrorType::NotFound).reject())?;

    // A rename must not collide with another account.
    if body.username.is_some() || body.email.is_some() {
        let mut claims: Vec<Document> = Vec::new();
        if let Some(username) = &body.username {
            claims.push(doc! { "username": username });
        }
        if let Some(email) = &body.email {
            claims.push(doc! { "email": email });
        }
        let taken = ctx
            .users()
            .find_one(
                doc! { "_id": { "$ne": user_id }, "$or": claims },
                None,
            )
            .await
            .map_err(|err| AppError::from_mongo(err, "Update user error:").reject())?;
        if taken.is_some() {
            return Err(AppError::new("User already exists", ErrorType::Conflict).reject());
        }
    }

    let mut set = body.to_update_doc();
    if !set.is_empty() {
        set.insert("updatedAt", bson::DateTime::from_chrono(Utc::now()));
        ctx.users()
            .update_one(doc! { "_id": user_id }, doc! { "$set": set }, None)
            .await
            .map_err(|err| AppError::from_mongo(err, "Update user error:").reject())?;
    }

    let user = ctx
        .users()
        .find_one(doc! { "_id": user_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Update user error:").reject())?
        .ok_or_else(|| AppError::new("User not found", ErrorType::NotFound).reject())?;

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "update_user", "user", &meta)
            .target_id(user_id)
            .details(doc! { "username": &user.username }),
    );

    Ok(warp::reply::json(&UserView::from(&user)))
}

pub async fn delete_user_handler(
    id: String,
    auth: AuthUser,
    meta: RequestMeta,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::DeleteUser, auth.role).map_err(|err| err.reject())?;
    let user_id = parse_object_id(&id, "user").map_err(|err| err.reject())?;

    if user_id == auth.id {
        return Err(
            AppError::new("Cannot delete your own account", ErrorType::BadRequest).reject(),
        );
    }

    let result = ctx
        .users()
        .delete_one(doc! { "_id": user_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Delete user error:").reject())?;
    if result.deleted_count == 0 {
        return Err(AppError::new("User not found", ErrorType::NotFound).reject());
    }

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "delete_user", "user", &meta).target_id(user_id),
    );

    Ok(warp::reply::json(&json!({
        "message": "User deleted successfully"
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_patch_builds_an_empty_set() {
        let body = UpdateUserBody::default();
        assert!(body.to_update_doc().is_empty());
    }

    #[test]
    fn partial_patch_only_touches_named_fields() {
        let body = UpdateUserBody {
            role: Some(Role::Supervisor),
            is_active: Some(false),
            ..Default::default()
        };
        let set = body.to_update_doc();
        assert_eq!(set.get_str("role").unwrap(), "supervisor");
        assert!(!set.get_bool("isActive").unwrap());
        assert!(set.get("username").is_none());
        assert!(set.get("email").is_none());
        assert_eq!(set.len(), 2);
    }
}
