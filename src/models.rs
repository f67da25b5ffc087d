use crate::errors::{AppError, ErrorType};
use bson::{oid::ObjectId, Document};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// Bson helper for optional datetimes; required ones use
/// `bson::serde_helpers::chrono_datetime_as_bson_datetime` directly.
pub mod opt_chrono_datetime_as_bson_datetime {
    use bson::DateTime as BsonDateTime;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        value.map(BsonDateTime::from_chrono).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let value = Option::<BsonDateTime>::deserialize(deserializer)?;
        Ok(value.map(|dt| dt.to_chrono()))
    }
}

pub fn parse_object_id(id: &str, what: &str) -> Result<ObjectId, AppError> {
    ObjectId::parse_str(id)
        .map_err(|_| AppError::new(&format!("Invalid {} id", what), ErrorType::BadRequest))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    TeamLead,
    Supervisor,
    Operator,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::TeamLead => "team_lead",
            Role::Supervisor => "supervisor",
            Role::Operator => "operator",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared by hubs and devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Online,
    Offline,
    Maintenance,
    Error,
}

impl NodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Online => "online",
            NodeStatus::Offline => "offline",
            NodeStatus::Maintenance => "maintenance",
            NodeStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HubType {
    Master,
    Garage,
    Alarm,
    Upstairs,
    Downstairs,
    Power,
    Irrigation,
}

impl HubType {
    pub fn as_str(self) -> &'static str {
        match self {
            HubType::Master => "master",
            HubType::Garage => "garage",
            HubType::Alarm => "alarm",
            HubType::Upstairs => "upstairs",
            HubType::Downstairs => "downstairs",
            HubType::Power => "power",
            HubType::Irrigation => "irrigation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CustomerType {
    Residential,
    Industrial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Success,
    Failure,
}

/// SSH credential wrapper: round-trips through the store, but never appears
/// in debug output, and handlers strip it from API responses.
#[derive(Clone, Serialize, Deserialize)]
pub struct Secret(pub String);

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

/// Caller network origin + agent string, attached to every audit row.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    pub is_active: bool,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "opt_chrono_datetime_as_bson_datetime"
    )]
    pub last_login: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<ObjectId>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

/// Response shape for user records: everything but the credential hash.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub username: String,
    pub email: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserView {
    fn from(user: &User) -> UserView {
        UserView {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role,
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            is_active: user.is_active,
            last_login: user.last_login,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub customer_type: Option<CustomerType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hub {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    #[serde(rename = "type")]
    pub hub_type: HubType,
    pub ip_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub status: NodeStatus,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "opt_chrono_datetime_as_bson_datetime"
    )]
    pub last_ping: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_hub: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer: Option<Customer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerStats {
    pub cpu_usage: String,
    pub memory_usage: String,
    pub network_io: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "opt_chrono_datetime_as_bson_datetime"
    )]
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub ip_address: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_password: Option<Secret>,
    pub status: NodeStatus,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "opt_chrono_datetime_as_bson_datetime"
    )]
    pub last_ping: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_docker: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_stats: Option<DockerStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub: Option<ObjectId>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

pub fn default_ssh_port() -> i32 {
    22
}

impl Device {
    /// The credential never leaves the server; call this before replying.
    pub fn sanitized(mut self) -> Device {
        self.ssh_password = None;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceGroup {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub devices: Vec<ObjectId>,
    pub created_by: ObjectId,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    #[serde(rename = "_id", default = "ObjectId::new")]
    pub id: ObjectId,
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub parameters: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandList {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub commands: Vec<Command>,
    pub created_by: ObjectId,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub device_group: ObjectId,
    pub command_list: ObjectId,
    #[serde(default)]
    pub operators: Vec<ObjectId>,
    pub created_by: ObjectId,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

/// Append-only audit row. Created once per gated operation, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLog {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<ObjectId>,
    pub action: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<ObjectId>,
    #[serde(default)]
    pub details: Document,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub status: LogStatus,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl ActivityLog {
    pub fn new(user: Option<ObjectId>, action: &str, target: &str, meta: &RequestMeta) -> Self {
        ActivityLog {
            id: ObjectId::new(),
            user,
            action: action.to_string(),
            target: target.to_string(),
            target_id: None,
            details: Document::new(),
            ip_address: meta.ip_address.clone(),
            user_agent: meta.user_agent.clone(),
            status: LogStatus::Success,
            created_at: Utc::now(),
        }
    }

    pub fn target_id(mut self, id: ObjectId) -> Self {
        self.target_id = Some(id);
        self
    }

    pub fn details(mut self, details: Document) -> Self {
        self.details = details;
        self
    }

    pub fn failure(mut self) -> Self {
        self.status = LogStatus::Failure;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn role_wire_names_are_snake_case() {
        assert_eq!(serde_json::to_string(&Role::TeamLead).unwrap(), "\"team_lead\"");
        assert_eq!(
            serde_json::from_str::<Role>("\"operator\"").unwrap(),
            Role::Operator
        );
    }

    #[test]
    fn status_enums_are_lowercase() {
        assert_eq!(
            serde_json::to_string(&NodeStatus::Maintenance).unwrap(),
            "\"maintenance\""
        );
        assert_eq!(serde_json::to_string(&HubType::Irrigation).unwrap(), "\"irrigation\"");
        assert_eq!(serde_json::to_string(&LogStatus::Failure).unwrap(), "\"failure\"");
    }

    #[test]
    fn secret_debug_is_redacted() {
        let secret = Secret("hunter2".to_string());
        assert_eq!(format!("{:?}", secret), "Secret(****)");
    }

    #[test]
    fn sanitized_device_drops_the_ssh_password() {
        let device = Device {
            id: ObjectId::new(),
            name: "edge-1".to_string(),
            device_type: "sensor".to_string(),
            ip_address: "10.0.0.5".to_string(),
            ssh_port: 22,
            ssh_username: Some("pi".to_string()),
            ssh_password: Some(Secret("hunter2".to_string())),
            status: NodeStatus::Offline,
            last_ping: None,
            is_docker: false,
            docker_id: None,
            docker_stats: None,
            hub: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let sanitized = device.sanitized();
        assert!(sanitized.ssh_password.is_none());
        let json = serde_json::to_value(&sanitized).unwrap();
        assert!(json.get("sshPassword").is_none());
    }

    #[test]
    fn user_view_has_no_password_field() {
        let user = User {
            id: ObjectId::new(),
            username: "admin".to_string(),
            email: "admin@aiotmonitor.com".to_string(),
            password: "$argon2id$...".to_string(),
            role: Role::Admin,
            first_name: None,
            last_name: None,
            is_active: true,
            last_login: None,
            created_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_value(UserView::from(&user)).unwrap();
        assert!(json.get("password").is_none());
        assert_eq!(json["username"], "admin");
    }

    #[test]
    fn activity_log_builder_defaults_to_success() {
        let meta = RequestMeta {
            ip_address: Some("127.0.0.1".to_string()),
            user_agent: Some("test".to_string()),
        };
        let entry = ActivityLog::new(None, "login", "auth", &meta)
            .details(doc! { "success": false })
            .failure();
        assert_eq!(entry.status, LogStatus::Failure);
        assert_eq!(entry.action, "login");
        assert_eq!(entry.ip_address.as_deref(), Some("127.0.0.1"));
        assert!(entry.target_id.is_none());

        let ok = ActivityLog::new(None, "view_hub", "hub", &meta);
        assert_eq!(ok.status, LogStatus::Success);
    }

    #[test]
    fn invalid_object_id_is_a_bad_request() {
        let err = parse_object_id("not-hex", "hub").unwrap_err();
        assert_eq!(err.err_type, crate::errors::ErrorType::BadRequest);
        assert!(parse_object_id("507f1f77bcf86cd799439011", "hub").is_ok());
    }
}
