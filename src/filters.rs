use crate::audit::AuditWriter;
use crate::broadcaster::Broadcaster;
use crate::config::Config;
use crate::errors::{AppError, ErrorType};
use crate::models::{
    parse_object_id, CommandList, Device, DeviceGroup, Hub, Profile, RequestMeta, Role, User,
};
use crate::remote::RemoteExecutor;
use crate::security;
use bson::{doc, oid::ObjectId};
use cookie::Cookie;
use mongodb::{Collection, Database};
use serde::de::DeserializeOwned;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use warp::Filter;

/// Everything a handler needs, wired once at startup. The broadcaster rides
/// here instead of being smuggled through a per-request side channel.
#[derive(Clone)]
pub struct AppContext {
    pub db: Database,
    pub audit: AuditWriter,
    pub broadcaster: Broadcaster,
    pub remote: RemoteExecutor,
    pub config: Arc<Config>,
}

impl AppContext {
    pub fn users(&self) -> Collection<User> {
        self.db.collection("users")
    }

    pub fn hubs(&self) -> Collection<Hub> {
        self.db.collection("hubs")
    }

    pub fn devices(&self) -> Collection<Device> {
        self.db.collection("devices")
    }

    pub fn device_groups(&self) -> Collection<DeviceGroup> {
        self.db.collection("devicegroups")
    }

    pub fn command_lists(&self) -> Collection<CommandList> {
        self.db.collection("commandlists")
    }

    pub fn profiles(&self) -> Collection<Profile> {
        self.db.collection("profiles")
    }
}

/// The verified actor for one request: token checked, then the store
/// re-checked for existence, active flag and the live role.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: ObjectId,
    pub username: String,
    pub email: String,
    pub role: Role,
}

pub fn with_ctx(
    ctx: AppContext,
) -> impl Filter<Extract = (AppContext,), Error = Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

pub fn with_json_body<T: DeserializeOwned + Send>(
) -> impl Filter<Extract = (T,), Error = warp::Rejection> + Clone {
    warp::body::content_length_limit(1024 * 16).and(warp::body::json())
}

/// Caller network origin + agent string for audit rows.
pub fn with_meta() -> impl Filter<Extract = (RequestMeta,), Error = warp::Rejection> + Clone {
    warp::filters::addr::remote()
        .and(warp::header::optional::<String>("user-agent"))
        .map(|addr: Option<SocketAddr>, user_agent: Option<String>| RequestMeta {
            ip_address: addr.map(|a| a.ip().to_string()),
            user_agent,
        })
}

pub fn with_auth(
    ctx: AppContext,
) -> impl Filter<Extract = (AuthUser,), Error = warp::Rejection> + Clone {
    warp::header::optional::<String>("Cookie")
        .and(warp::header::optional::<String>("Authorization"))
        .and(with_ctx(ctx))
        .and_then(authenticate)
}

/// Token from the `session` cookie or the Authorization header, whichever is
/// present.
fn extract_token(header_cookie: Option<String>, header_auth: Option<String>) -> Option<String> {
    if let Some(cookie_header) = header_cookie {
        let cookies = cookie_header.split("; ");
        for cookie in cookies {
            if let Ok(parsed_cookie) = Cookie::parse(cookie) {
                if parsed_cookie.name() == "session" {
                    return Some(parsed_cookie.value().to_string());
                }
            }
        }
    }

    if let Some(auth_header) = header_auth {
        if auth_header.starts_with("Bearer ") {
            return Some(auth_header);
        }
    }

    None
}

async fn authenticate(
    header_cookie: Option<String>,
    header_auth: Option<String>,
    ctx: AppContext,
) -> Result<AuthUser, warp::Rejection> {
    let token = extract_token(header_cookie, header_auth).ok_or_else(|| {
        AppError::new("No token, authorization denied", ErrorType::Unauthenticated).reject()
    })?;

    let claims = security::decode_token(&token, &ctx.config.auth.jwt_secret)
        .map_err(|err| err.reject())?;

    let user_id = parse_object_id(&claims.id, "user").map_err(|_| {
        AppError::new("Token is not valid", ErrorType::Unauthenticated).reject()
    })?;

    let user = ctx
        .users()
        .find_one(doc! { "_id": user_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Auth middleware error:").reject())?
        .ok_or_else(|| AppError::new("User not found", ErrorType::Unauthenticated).reject())?;

    if !user.is_active {
        return Err(AppError::new("Account is disabled", ErrorType::AccountDisabled).reject());
    }

    Ok(AuthUser {
        id: user.id,
        username: user.username,
        email: user.email,
        role: user.role,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_header_wins_when_no_cookie() {
        let token = extract_token(None, Some("Bearer abc.def.ghi".to_string())).unwrap();
        assert_eq!(token, "Bearer abc.def.ghi");
    }

    #[test]
    fn session_cookie_is_accepted() {
        let token = extract_token(
            Some("theme=dark; session=abc.def.ghi".to_string()),
            None,
        )
        .unwrap();
        assert_eq!(token, "abc.def.ghi");
    }

    #[test]
    fn missing_and_malformed_credentials_yield_none() {
        assert!(extract_token(None, None).is_none());
        assert!(extract_token(None, Some("abc.def.ghi".to_string())).is_none());
        assert!(extract_token(Some("theme=dark".to_string()), None).is_none());
    }
}
