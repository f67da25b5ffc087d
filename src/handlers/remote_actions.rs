//! HTTP face of the remote gateway: SSH and Docker actions against a device.

use crate::errors::{AppError, ErrorType};
use crate::filters::{AppContext, AuthUser};
use crate::models::{parse_object_id, ActivityLog, Device, NodeStatus, RequestMeta};
use crate::policy::{self, Operation};
use crate::remote::{DockerAction, SshTarget};
use bson::{doc, oid::ObjectId};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;

use super::devices::broadcast_device_status;

async fn load_device(ctx: &AppContext, id: &str) -> Result<Device, AppError> {
    let device_id = parse_object_id(id, "device")?;
    ctx.devices()
        .find_one(doc! { "_id": device_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Get device error:"))?
        .ok_or_else(|| AppError::new("Device not found", ErrorType::NotFound))
}

fn ssh_target(device: &Device) -> Result<SshTarget, AppError> {
    match (&device.ssh_username, &device.ssh_password) {
        (Some(username), Some(password)) => Ok(SshTarget {
            host: device.ip_address.clone(),
            port: device.ssh_port,
            username: username.clone(),
            password: password.clone(),
        }),
        _ => Err(AppError::new(
            "Device does not have SSH credentials configured",
            ErrorType::BadRequest,
        )),
    }
}

fn docker_container(device: &Device) -> Result<String, AppError> {
    match &device.docker_id {
        Some(docker_id) if device.is_docker => Ok(docker_id.clone()),
        _ => Err(AppError::new(
            "This device is not a Docker container",
            ErrorType::BadRequest,
        )),
    }
}

pub async fn test_ssh_handler(
    id: String,
    auth: AuthUser,
    meta: RequestMeta,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::TestSsh, auth.role).map_err(|err| err.reject())?;

    let device = load_device(&ctx, &id).await.map_err(|err| err.reject())?;
    let target = ssh_target(&device).map_err(|err| err.reject())?;

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "test_ssh", "device", &meta)
            .target_id(device.id)
            .details(doc! { "host": &target.host, "port": target.port }),
    );

    // Connectivity probe shape only; credentials are confirmed configured,
    // not exercised.
    Ok(warp::reply::json(&json!({
        "success": true,
        "message": "SSH configuration is valid",
        "device": {
            "id": device.id,
            "name": device.name,
            "host": target.host,
            "port": target.port,
            "username": target.username,
        }
    })))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ExecuteCommandBody {
    pub command: String,
}

#[utoipa::path(
        post,
        path = "/devices/{id}/execute-command",
        request_body = ExecuteCommandBody,
        params(("id" = String, Path, description = "Device id")),
        responses(
            (status = 200, description = "Command output"),
            (status = 400, description = "Device has no SSH credentials", body = crate::errors::ErrorMessage),
            (status = 404, description = "Device not found", body = crate::errors::ErrorMessage),
        )
    )
]
pub async fn execute_command_handler(
    id: String,
    auth: AuthUser,
    meta: RequestMeta,
    body: ExecuteCommandBody,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::ExecuteCommand, auth.role).map_err(|err| err.reject())?;

    let device = load_device(&ctx, &id).await.map_err(|err| err.reject())?;
    let target = ssh_target(&device).map_err(|err| err.reject())?;

    // The row is written after the command returns so it carries the real
    // outcome; a failed or timed-out command must not leave a success row.
    let result = ctx.remote.ssh_exec(&target, &body.command).await;
    ctx.audit.record(command_audit_entry(
        auth.id,
        device.id,
        &body.command,
        result.is_ok(),
        &meta,
    ));

    let output = result.map_err(|err| err.reject())?;

    Ok(warp::reply::json(&json!({
        "output": output.stdout,
        "error": output.stderr,
        "command": body.command,
        "deviceName": device.name,
    })))
}

fn command_audit_entry(
    actor: ObjectId,
    device_id: ObjectId,
    command: &str,
    succeeded: bool,
    meta: &RequestMeta,
) -> ActivityLog {
    let entry = ActivityLog::new(Some(actor), "execute_command", "device", meta)
        .target_id(device_id)
        .details(doc! { "command": command, "success": succeeded });
    if succeeded {
        entry
    } else {
        entry.failure()
    }
}

pub async fn docker_status_handler(
    id: String,
    auth: AuthUser,
    meta: RequestMeta,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::DockerStatus, auth.role).map_err(|err| err.reject())?;

    let device = load_device(&ctx, &id).await.map_err(|err| err.reject())?;
    let container = docker_container(&device).map_err(|err| err.reject())?;

    let status = ctx
        .remote
        .docker_status(&container)
        .await
        .map_err(|err| err.reject())?;

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "docker_status", "device", &meta)
            .target_id(device.id)
            .details(doc! { "containerStatus": &status }),
    );

    Ok(warp::reply::json(&json!({
        "deviceName": device.name,
        "dockerId": container,
        "status": status,
    })))
}

pub async fn docker_stats_handler(
    id: String,
    auth: AuthUser,
    meta: RequestMeta,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::DockerStats, auth.role).map_err(|err| err.reject())?;

    let device = load_device(&ctx, &id).await.map_err(|err| err.reject())?;
    let container = docker_container(&device).map_err(|err| err.reject())?;

    let stats = ctx
        .remote
        .docker_stats(&container)
        .await
        .map_err(|err| err.reject())?;

    // Cache the sample on the device record for dashboard reads.
    let stats_doc = bson::to_document(&stats).map_err(|err| {
        AppError::new(&format!("Internal Error: {:#?}", err), ErrorType::Internal).reject()
    })?;
    ctx.devices()
        .update_one(
            doc! { "_id": device.id },
            doc! { "$set": {
                "dockerStats": stats_doc,
                "updatedAt": bson::DateTime::from_chrono(Utc::now()),
            } },
            None,
        )
        .await
        .map_err(|err| AppError::from_mongo(err, "Docker stats error:").reject())?;

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "docker_stats", "device", &meta).target_id(device.id),
    );

    Ok(warp::reply::json(&json!({
        "deviceName": device.name,
        "dockerId": container,
        "stats": stats,
    })))
}

pub async fn docker_logs_handler(
    id: String,
    auth: AuthUser,
    meta: RequestMeta,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::DockerLogs, auth.role).map_err(|err| err.reject())?;

    let device = load_device(&ctx, &id).await.map_err(|err| err.reject())?;
    let container = docker_container(&device).map_err(|err| err.reject())?;

    let logs = ctx
        .remote
        .docker_logs(&container)
        .await
        .map_err(|err| err.reject())?;

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "docker_logs", "device", &meta).target_id(device.id),
    );

    Ok(warp::reply::json(&json!({
        "deviceName": device.name,
        "dockerId": container,
        "logs": logs,
    })))
}

#[derive(Debug, Deserialize)]
pub struct DockerActionBody {
    pub action: String,
}

pub async fn docker_action_handler(
    id: String,
    auth: AuthUser,
    meta: RequestMeta,
    body: DockerActionBody,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::DockerAction, auth.role).map_err(|err| err.reject())?;

    // Reject unknown verbs before anything is spawned.
    let action = DockerAction::parse(&body.action).map_err(|err| err.reject())?;

    let device = load_device(&ctx, &id).await.map_err(|err| err.reject())?;
    let container = docker_container(&device).map_err(|err| err.reject())?;

    ctx.remote
        .docker_action(&container, action)
        .await
        .map_err(|err| err.reject())?;

    let status = match action {
        DockerAction::Start | DockerAction::Restart => NodeStatus::Online,
        DockerAction::Stop => NodeStatus::Offline,
    };

    let device = persist_status(&ctx, device.id, status)
        .await
        .map_err(|err| err.reject())?;
    broadcast_device_status(&ctx, &device).await;

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "docker_action", "device", &meta)
            .target_id(device.id)
            .details(doc! { "action": action.as_str() }),
    );

    Ok(warp::reply::json(&json!({
        "message": format!("Container {} successful", action.as_str()),
        "deviceName": device.name,
        "status": device.status,
    })))
}

async fn persist_status(
    ctx: &AppContext,
    device_id: ObjectId,
    status: NodeStatus,
) -> Result<Device, AppError> {
    let now = Utc::now();
    ctx.devices()
        .update_one(
            doc! { "_id": device_id },
            doc! { "$set": {
                "status": status.as_str(),
                "lastPing": bson::DateTime::from_chrono(now),
                "updatedAt": bson::DateTime::from_chrono(now),
            } },
            None,
        )
        .await
        .map_err(|err| AppError::from_mongo(err, "Docker action error:"))?;

    ctx.devices()
        .find_one(doc! { "_id": device_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Docker action error:"))?
        .ok_or_else(|| AppError::new("Device not found", ErrorType::NotFound))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Secret;
    use chrono::Utc;

    fn device() -> Device {
        Device {
            id: ObjectId::new(),
            name: "edge-1".to_string(),
            device_type: "gateway".to_string(),
            ip_address: "10.0.0.5".to_string(),
            ssh_port: 2222,
            ssh_username: Some("pi".to_string()),
            ssh_password: Some(Secret("hunter2".to_string())),
            status: NodeStatus::Online,
            last_ping: None,
            is_docker: true,
            docker_id: Some("abc123".to_string()),
            docker_stats: None,
            hub: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn ssh_target_requires_both_credentials() {
        let full = device();
        let target = ssh_target(&full).unwrap();
        assert_eq!(target.host, "10.0.0.5");
        assert_eq!(target.port, 2222);

        let mut missing_password = device();
        missing_password.ssh_password = None;
        let err = ssh_target(&missing_password).unwrap_err();
        assert_eq!(err.message, "Device does not have SSH credentials configured");
        assert_eq!(err.err_type, ErrorType::BadRequest);

        let mut missing_username = device();
        missing_username.ssh_username = None;
        assert!(ssh_target(&missing_username).is_err());
    }

    #[test]
    fn failed_command_leaves_a_failure_row() {
        use crate::models::LogStatus;

        let meta = RequestMeta {
            ip_address: Some("127.0.0.1".to_string()),
            user_agent: None,
        };
        let actor = ObjectId::new();
        let target = ObjectId::new();

        let failed = command_audit_entry(actor, target, "uptime", false, &meta);
        assert_eq!(failed.status, LogStatus::Failure);
        assert_eq!(failed.action, "execute_command");
        assert_eq!(failed.target_id, Some(target));
        assert!(!failed.details.get_bool("success").unwrap());

        let ok = command_audit_entry(actor, target, "uptime", true, &meta);
        assert_eq!(ok.status, LogStatus::Success);
        assert!(ok.details.get_bool("success").unwrap());
    }

    #[test]
    fn docker_endpoints_require_a_container() {
        assert_eq!(docker_container(&device()).unwrap(), "abc123");

        let mut not_docker = device();
        not_docker.is_docker = false;
        let err = docker_container(&not_docker).unwrap_err();
        assert_eq!(err.message, "This device is not a Docker container");

        let mut no_id = device();
        no_id.docker_id = None;
        assert!(docker_container(&no_id).is_err());
    }
}
