use crate::errors::{AppError, ErrorType};
use crate::models::{ActivityLog, LogStatus, Role, User};
use bson::{doc, oid::ObjectId, Document};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use log::error;
use mongodb::{options::FindOptions, Collection, Database};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use warp::http::Method;

/// Append-only writer over the `activitylogs` collection.
///
/// `record` is fire-and-forget: the insert runs on its own task and a failed
/// write is reported to the operational log, never to the caller. The primary
/// operation's success must not depend on the audit write.
#[derive(Debug, Clone)]
pub struct AuditWriter {
    logs: Collection<ActivityLog>,
    users: Collection<User>,
}

impl AuditWriter {
    pub fn new(db: &Database) -> AuditWriter {
        AuditWriter {
            logs: db.collection("activitylogs"),
            users: db.collection("users"),
        }
    }

    pub fn record(&self, entry: ActivityLog) {
        let logs = self.logs.clone();
        tokio::spawn(async move {
            if let Err(err) = logs.insert_one(&entry, None).await {
                error!("Error creating activity log: {:#?}", err);
            }
        });
    }

    pub async fn query(&self, query: &LogQuery) -> Result<LogPage, AppError> {
        let filter = query.build_filter()?;
        let page = query.page.max(1);
        let limit = query.limit.clamp(1, 500);

        let total = self
            .logs
            .count_documents(filter.clone(), None)
            .await
            .map_err(|err| AppError::from_mongo(err, "While counting activity logs:"))?;

        let options = FindOptions::builder()
            .sort(doc! { "createdAt": -1 })
            .skip((page - 1) * limit)
            .limit(limit as i64)
            .build();

        let mut cursor = self
            .logs
            .find(filter, options)
            .await
            .map_err(|err| AppError::from_mongo(err, "While querying activity logs:"))?;

        let mut entries: Vec<ActivityLog> = Vec::new();
        while let Some(entry) = cursor
            .try_next()
            .await
            .map_err(|err| AppError::from_mongo(err, "While reading activity logs:"))?
        {
            entries.push(entry);
        }

        let actors = self.actor_summaries(&entries).await?;
        let logs = entries
            .into_iter()
            .map(|entry| {
                let user = entry.user.and_then(|id| actors.get(&id).cloned());
                LogView {
                    id: entry.id,
                    user,
                    action: entry.action,
                    target: entry.target,
                    target_id: entry.target_id,
                    details: entry.details,
                    ip_address: entry.ip_address,
                    user_agent: entry.user_agent,
                    status: entry.status,
                    created_at: entry.created_at,
                }
            })
            .collect();

        Ok(LogPage {
            logs,
            total_pages: (total + limit - 1) / limit,
            current_page: page,
            total,
        })
    }

    /// Batched lookup of `(username, role)` for the actors on one page.
    async fn actor_summaries(
        &self,
        entries: &[ActivityLog],
    ) -> Result<HashMap<ObjectId, ActorSummary>, AppError> {
        let ids: Vec<ObjectId> = entries.iter().filter_map(|e| e.user).collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut cursor = self
            .users
            .find(doc! { "_id": { "$in": ids } }, None)
            .await
            .map_err(|err| AppError::from_mongo(err, "While resolving log actors:"))?;

        let mut actors = HashMap::new();
        while let Some(user) = cursor
            .try_next()
            .await
            .map_err(|err| AppError::from_mongo(err, "While resolving log actors:"))?
        {
            actors.insert(
                user.id,
                ActorSummary {
                    id: user.id,
                    username: user.username,
                    role: user.role,
                },
            );
        }

        Ok(actors)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorSummary {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub username: String,
    pub role: Role,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogView {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub user: Option<ActorSummary>,
    pub action: String,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<ObjectId>,
    pub details: Document,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub status: LogStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogPage {
    pub logs: Vec<LogView>,
    pub total_pages: u64,
    pub current_page: u64,
    pub total: u64,
}

fn default_page() -> u64 {
    1
}

fn default_limit() -> u64 {
    50
}

/// Independent optional filters; all absent means a full (paginated) scan.
#[derive(Debug, Deserialize)]
pub struct LogQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
    pub user: Option<String>,
    pub action: Option<String>,
    pub target: Option<String>,
    pub status: Option<String>,
    #[serde(rename = "startDate")]
    pub start_date: Option<String>,
    #[serde(rename = "endDate")]
    pub end_date: Option<String>,
}

impl LogQuery {
    pub fn build_filter(&self) -> Result<Document, AppError> {
        let mut filter = Document::new();

        if let Some(user) = &self.user {
            let id = ObjectId::parse_str(user)
                .map_err(|_| AppError::new("Invalid user id", ErrorType::BadRequest))?;
            filter.insert("user", id);
        }
        if let Some(action) = &self.action {
            filter.insert("action", action);
        }
        if let Some(target) = &self.target {
            filter.insert("target", target);
        }
        if let Some(status) = &self.status {
            filter.insert("status", status);
        }

        let mut range = Document::new();
        if let Some(start) = &self.start_date {
            range.insert("$gte", bson::DateTime::from_chrono(parse_date(start)?));
        }
        if let Some(end) = &self.end_date {
            range.insert("$lte", bson::DateTime::from_chrono(parse_date(end)?));
        }
        if !range.is_empty() {
            filter.insert("createdAt", range);
        }

        Ok(filter)
    }
}

fn parse_date(raw: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| AppError::new("Invalid date filter", ErrorType::BadRequest))
}

// ---------------------------------------------------------------------------
// Derivation defaults for routes that carry no explicit action/target tag.
// Every current route tags explicitly; a new untagged route should build its
// entry from these.
// ---------------------------------------------------------------------------

pub fn derive_action(method: &Method) -> &'static str {
    match *method {
        Method::GET => "view",
        Method::POST => "create",
        Method::PUT => "update",
        Method::DELETE => "delete",
        _ => "other",
    }
}

pub fn derive_target(path: &str) -> &'static str {
    if path.contains("/device-groups") {
        "device_group"
    } else if path.contains("/command-lists") {
        "command_list"
    } else if path.contains("/profiles") {
        "profile"
    } else if path.contains("/users") {
        "user"
    } else if path.contains("/hubs") {
        "hub"
    } else if path.contains("/devices") {
        "device"
    } else if path.contains("/auth") {
        "auth"
    } else if path.contains("/logs") {
        "log"
    } else {
        "other"
    }
}

/// First path segment shaped like a document id (24 hex chars).
pub fn derive_target_id(path: &str) -> Option<ObjectId> {
    path.split('/')
        .find_map(|part| ObjectId::parse_str(part).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verb_map_matches_the_interceptor() {
        assert_eq!(derive_action(&Method::GET), "view");
        assert_eq!(derive_action(&Method::POST), "create");
        assert_eq!(derive_action(&Method::PUT), "update");
        assert_eq!(derive_action(&Method::DELETE), "delete");
        assert_eq!(derive_action(&Method::PATCH), "other");
    }

    #[test]
    fn target_is_derived_from_the_most_specific_segment() {
        assert_eq!(derive_target("/users/507f1f77bcf86cd799439011"), "user");
        assert_eq!(derive_target("/hubs"), "hub");
        assert_eq!(derive_target("/devices/abc/docker-status"), "device");
        // device-groups must not be mistaken for devices
        assert_eq!(derive_target("/device-groups/abc"), "device_group");
        assert_eq!(derive_target("/command-lists"), "command_list");
        assert_eq!(derive_target("/profiles/operator/abc"), "profile");
        assert_eq!(derive_target("/auth/login"), "auth");
        assert_eq!(derive_target("/logs"), "log");
        assert_eq!(derive_target("/metrics"), "other");
    }

    #[test]
    fn target_id_is_the_first_24_hex_segment() {
        let id = derive_target_id("/hubs/507f1f77bcf86cd799439011/status").unwrap();
        assert_eq!(id.to_hex(), "507f1f77bcf86cd799439011");
        assert!(derive_target_id("/hubs/not-an-id/status").is_none());
        assert!(derive_target_id("/hubs").is_none());
    }

    #[test]
    fn filter_builder_combines_independent_filters() {
        let query = LogQuery {
            page: 1,
            limit: 50,
            user: Some("507f1f77bcf86cd799439011".to_string()),
            action: Some("login".to_string()),
            target: None,
            status: Some("failure".to_string()),
            start_date: Some("2024-01-01T00:00:00Z".to_string()),
            end_date: None,
        };
        let filter = query.build_filter().unwrap();
        assert!(filter.get("user").is_some());
        assert_eq!(filter.get_str("action").unwrap(), "login");
        assert_eq!(filter.get_str("status").unwrap(), "failure");
        assert!(filter.get_document("createdAt").unwrap().get("$gte").is_some());
        assert!(filter.get("target").is_none());
    }

    #[test]
    fn empty_query_means_full_scan() {
        let query = LogQuery {
            page: 1,
            limit: 50,
            user: None,
            action: None,
            target: None,
            status: None,
            start_date: None,
            end_date: None,
        };
        assert!(query.build_filter().unwrap().is_empty());
    }

    #[test]
    fn malformed_filters_are_rejected() {
        let query = LogQuery {
            page: 1,
            limit: 50,
            user: Some("nope".to_string()),
            action: None,
            target: None,
            status: None,
            start_date: None,
            end_date: None,
        };
        assert_eq!(
            query.build_filter().unwrap_err().err_type,
            ErrorType::BadRequest
        );

        let query = LogQuery {
            page: 1,
            limit: 50,
            user: None,
            action: None,
            target: None,
            status: None,
            start_date: Some("january".to_string()),
            end_date: None,
        };
        assert!(query.build_filter().is_err());
    }
}
