use crate::db;
use crate::errors::{AppError, ErrorType};
use crate::filters::{AppContext, AuthUser};
use crate::models::{parse_object_id, ActivityLog, RequestMeta, UserView};
use crate::policy::{self, Operation};
use crate::security;
use bson::doc;
use chrono::Utc;
use log::warn;
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;
use warp_rate_limit::RateLimitInfo;

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginBody {
    pub username: String,
    pub password: String,
}

#[utoipa::path(
        post,
        path = "/auth/login",
        request_body = LoginBody,
        responses(
            (status = 200, description = "Token issued", body = String),
            (status = 401, description = "Invalid credentials", body = crate::errors::ErrorMessage),
            (status = 403, description = "Account is disabled", body = crate::errors::ErrorMessage),
        )
    )
]
pub async fn login_handler(
    _rate_limit_info: RateLimitInfo,
    meta: RequestMeta,
    body: LoginBody,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    let user = ctx
        .users()
        .find_one(doc! { "username": &body.username }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Login error:").reject())?
        .ok_or_else(|| {
            AppError::new("Invalid credentials", ErrorType::Unauthenticated).reject()
        })?;

    if !user.is_active {
        return Err(AppError::new("Account is disabled", ErrorType::AccountDisabled).reject());
    }

    if !security::verify_password(&body.password, &user.password) {
        // Failed attempt against a real account leaves a trail.
        ctx.audit.record(
            ActivityLog::new(Some(user.id), "login", "auth", &meta)
                .details(doc! { "success": false })
                .failure(),
        );
        return Err(AppError::new("Invalid credentials", ErrorType::Unauthenticated).reject());
    }

    let now = Utc::now();
    ctx.users()
        .update_one(
            doc! { "_id": user.id },
            doc! { "$set": { "lastLogin": bson::DateTime::from_chrono(now) } },
            None,
        )
        .await
        .map_err(|err| AppError::from_mongo(err, "Login error:").reject())?;

    let token = security::issue_token(
        &user.id.to_hex(),
        user.role,
        &ctx.config.auth.jwt_secret,
        ctx.config.auth.token_ttl_secs,
    )
    .map_err(|err| {
        AppError::new(
            &format!("Internal Error: {:#?}", err),
            ErrorType::Internal,
        )
        .reject()
    })?;

    ctx.audit.record(
        ActivityLog::new(Some(user.id), "login", "auth", &meta)
            .details(doc! { "success": true }),
    );

    Ok(warp::reply::json(&json!({
        "token": token,
        "user": {
            "id": user.id,
            "username": user.username,
            "email": user.email,
            "role": user.role,
            "firstName": user.first_name,
            "lastName": user.last_name,
        }
    })))
}

/// Public break-glass recovery: resets the admin account to the bootstrap
/// default. Deliberately kept from the original design; it is rate-limited
/// and every use is warned about and audited.
pub async fn reset_admin_password_handler(
    _rate_limit_info: RateLimitInfo,
    meta: RequestMeta,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    let admin = ctx
        .users()
        .find_one(doc! { "role": "admin" }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Admin password reset error:").reject())?
        .ok_or_else(|| AppError::new("Admin user not found", ErrorType::NotFound).reject())?;

    let password = security::hash_password(db::DEFAULT_ADMIN_PASSWORD)
        .map_err(|err| err.reject())?;

    ctx.users()
        .update_one(
            doc! { "_id": admin.id },
            doc! { "$set": {
                "password": password,
                "updatedAt": bson::DateTime::from_chrono(Utc::now()),
            } },
            None,
        )
        .await
        .map_err(|err| AppError::from_mongo(err, "Admin password reset error:").reject())?;

    warn!(
        "break-glass admin password reset used from {}",
        meta.ip_address.as_deref().unwrap_or("unknown")
    );

    ctx.audit.record(
        ActivityLog::new(Some(admin.id), "reset_admin_password", "user", &meta)
            .target_id(admin.id)
            .details(doc! { "username": &admin.username }),
    );

    Ok(warp::reply::json(&json!({
        "message": "Admin password reset to default successfully"
    })))
}

pub async fn me_handler(
    auth: AuthUser,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::Me, auth.role).map_err(|err| err.reject())?;

    let user = ctx
        .users()
        .find_one(doc! { "_id": auth.id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Get user error:").reject())?
        .ok_or_else(|| AppError::new("User not found", ErrorType::NotFound).reject())?;

    Ok(warp::reply::json(&UserView::from(&user)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePasswordBody {
    pub current_password: String,
    pub new_password: String,
}

pub async fn update_password_handler(
    auth: AuthUser,
    meta: RequestMeta,
    body: UpdatePasswordBody,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::UpdateOwnPassword, auth.role).map_err(|err| err.reject())?;

    let user = ctx
        .users()
        .find_one(doc! { "_id": auth.id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Password update error:").reject())?
        .ok_or_else(|| AppError::new("User not found", ErrorType::NotFound).reject())?;

    if !security::verify_password(&body.current_password, &user.password) {
        return Err(
            AppError::new("Current password is incorrect", ErrorType::Unauthenticated).reject(),
        );
    }

    let password = security::hash_password(&body.new_password).map_err(|err| err.reject())?;

    ctx.users()
        .update_one(
            doc! { "_id": user.id },
            doc! { "$set": {
                "password": password,
                "updatedAt": bson::DateTime::from_chrono(Utc::now()),
            } },
            None,
        )
        .await
        .map_err(|err| AppError::from_mongo(err, "Password update error:").reject())?;

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "update_password", "user", &meta).target_id(user.id),
    );

    Ok(warp::reply::json(&json!({
        "message": "Password updated successfully"
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordBody {
    pub user_id: String,
    pub new_password: String,
}

pub async fn reset_password_handler(
    auth: AuthUser,
    meta: RequestMeta,
    body: ResetPasswordBody,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::ResetPassword, auth.role).map_err(|err| err.reject())?;

    let user_id = parse_object_id(&body.user_id, "user").map_err(|err| err.reject())?;
    let user = ctx
        .users()
        .find_one(doc! { "_id": user_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Password reset error:").reject())?
        .ok_or_else(|| AppError::new("User not found", ErrorType::NotFound).reject())?;

    let password = security::hash_password(&body.new_password).map_err(|err| err.reject())?;

    ctx.users()
        .update_one(
            doc! { "_id": user.id },
            doc! { "$set": {
                "password": password,
                "updatedAt": bson::DateTime::from_chrono(Utc::now()),
            } },
            None,
        )
        .await
        .map_err(|err| AppError::from_mongo(err, "Password reset error:").reject())?;

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "reset_password", "user", &meta)
            .target_id(user.id)
            .details(doc! { "userId": user.id }),
    );

    Ok(warp::reply::json(&json!({
        "message": "Password reset successfully"
    })))
}
