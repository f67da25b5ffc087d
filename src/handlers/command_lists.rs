use crate::errors::{AppError, ErrorType};
use crate::filters::{AppContext, AuthUser};
use crate::models::{parse_object_id, ActivityLog, Command, CommandList, RequestMeta};
use crate::policy::{self, Operation};
use bson::{doc, oid::ObjectId, Document};
use chrono::Utc;
use futures::TryStreamExt;
use serde::Deserialize;
use serde_json::json;
use warp::http::StatusCode;

pub async fn list_command_lists_handler(
    auth: AuthUser,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::ListCommandLists, auth.role).map_err(|err| err.reject())?;

    let mut cursor = ctx
        .command_lists()
        .find(None, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "List command lists error:").reject())?;

    let mut lists: Vec<CommandList> = Vec::new();
    while let Some(list) = cursor
        .try_next()
        .await
        .map_err(|err| AppError::from_mongo(err, "List command lists error:").reject())?
    {
        lists.push(list);
    }

    Ok(warp::reply::json(&lists))
}

pub async fn get_command_list_handler(
    id: String,
    auth: AuthUser,
    meta: RequestMeta,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::GetCommandList, auth.role).map_err(|err| err.reject())?;
    let list_id = parse_object_id(&id, "command list").map_err(|err| err.reject())?;

    let list = ctx
        .command_lists()
        .find_one(doc! { "_id": list_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Get command list error:").reject())?
        .ok_or_else(|| AppError::new("Command list not found", ErrorType::NotFound).reject())?;

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "view_command_list", "command_list", &meta)
            .target_id(list_id),
    );

    Ok(warp::reply::json(&list))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandBody {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub parameters: Vec<String>,
    pub description: Option<String>,
}

impl CommandBody {
    fn into_command(self) -> Command {
        Command {
            id: ObjectId::new(),
            name: self.name,
            command: self.command,
            parameters: self.parameters,
            description: self.description,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommandListBody {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub commands: Vec<CommandBody>,
}

pub async fn create_command_list_handler(
    auth: AuthUser,
    meta: RequestMeta,
    body: CreateCommandListBody,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::CreateCommandList, auth.role).map_err(|err| err.reject())?;

    let now = Utc::now();
    let list = CommandList {
        id: ObjectId::new(),
        name: body.name,
        description: body.description,
        commands: body.commands.into_iter().map(CommandBody::into_command).collect(),
        created_by: auth.id,
        created_at: now,
        updated_at: now,
    };

    ctx.command_lists()
        .insert_one(&list, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Create command list error:").reject())?;

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "create_command_list", "command_list", &meta)
            .target_id(list.id)
            .details(doc! { "name": &list.name }),
    );

    Ok(warp::reply::with_status(
        warp::reply::json(&list),
        StatusCode::CREATED,
    ))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCommandListBody {
    pub name: Option<String>,
    pub description: Option<String>,
}

pub async fn update_command_list_handler(
    id: String,
    auth: AuthUser,
    meta: RequestMeta,
    body: UpdateCommandListBody,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::UpdateCommandList, auth.role).map_err(|err| err.reject())?;
    let list_id = parse_object_id(&id, "command list").map_err(|err| err.reject())?;

    ctx.command_lists()
        .find_one(doc! { "_id": list_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Update command list error:").reject())?
        .ok_or_else(|| AppError::new("Command list not found", ErrorType::NotFound).reject())?;

    let mut set = Document::new();
    if let Some(name) = &body.name {
        set.insert("name", name);
    }
    if let Some(description) = &body.description {
        set.insert("description", description);
    }

    if !set.is_empty() {
        set.insert("updatedAt", bson::DateTime::from_chrono(Utc::now()));
        ctx.command_lists()
            .update_one(doc! { "_id": list_id }, doc! { "$set": set }, None)
            .await
            .map_err(|err| AppError::from_mongo(err, "Update command list error:").reject())?;
    }

    let list = ctx
        .command_lists()
        .find_one(doc! { "_id": list_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Update command list error:").reject())?
        .ok_or_else(|| AppError::new("Command list not found", ErrorType::NotFound).reject())?;

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "update_command_list", "command_list", &meta)
            .target_id(list_id)
            .details(doc! { "name": &list.name }),
    );

    Ok(warp::reply::json(&list))
}

pub async fn delete_command_list_handler(
    id: String,
    auth: AuthUser,
    meta: RequestMeta,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::DeleteCommandList, auth.role).map_err(|err| err.reject())?;
    let list_id = parse_object_id(&id, "command list").map_err(|err| err.reject())?;

    let result = ctx
        .command_lists()
        .delete_one(doc! { "_id": list_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Delete command list error:").reject())?;
    if result.deleted_count == 0 {
        return Err(AppError::new("Command list not found", ErrorType::NotFound).reject());
    }

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "delete_command_list", "command_list", &meta)
            .target_id(list_id),
    );

    Ok(warp::reply::json(&json!({
        "message": "Command list deleted successfully"
    })))
}

pub async fn add_command_handler(
    id: String,
    auth: AuthUser,
    meta: RequestMeta,
    body: CommandBody,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::AddCommand, auth.role).map_err(|err| err.reject())?;
    let list_id = parse_object_id(&id, "command list").map_err(|err| err.reject())?;

    ctx.command_lists()
        .find_one(doc! { "_id": list_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Add command error:").reject())?
        .ok_or_else(|| AppError::new("Command list not found", ErrorType::NotFound).reject())?;

    let command = body.into_command();
    let command_doc = bson::to_document(&command).map_err(|err| {
        AppError::new(&format!("Internal Error: {:#?}", err), ErrorType::Internal).reject()
    })?;

    ctx.command_lists()
        .update_one(
            doc! { "_id": list_id },
            doc! {
                "$push": { "commands": command_doc },
                "$set": { "updatedAt": bson::DateTime::from_chrono(Utc::now()) },
            },
            None,
        )
        .await
        .map_err(|err| AppError::from_mongo(err, "Add command error:").reject())?;

    let list = ctx
        .command_lists()
        .find_one(doc! { "_id": list_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Add command error:").reject())?
        .ok_or_else(|| AppError::new("Command list not found", ErrorType::NotFound).reject())?;

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "add_command", "command_list", &meta)
            .target_id(list_id)
            .details(doc! { "commandId": command.id, "name": &command.name }),
    );

    Ok(warp::reply::json(&list))
}

pub async fn remove_command_handler(
    id: String,
    command_id: String,
    auth: AuthUser,
    meta: RequestMeta,
    ctx: AppContext,
) -> Result<impl warp::Reply, warp::Rejection> {
    policy::check(Operation::RemoveCommand, auth.role).map_err(|err| err.reject())?;
    let list_id = parse_object_id(&id, "command list").map_err(|err| err.reject())?;
    let command_id = parse_object_id(&command_id, "command").map_err(|err| err.reject())?;

    let list = ctx
        .command_lists()
        .find_one(doc! { "_id": list_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Remove command error:").reject())?
        .ok_or_else(|| AppError::new("Command list not found", ErrorType::NotFound).reject())?;

    if !list.commands.iter().any(|c| c.id == command_id) {
        return Err(AppError::new("Command not found in list", ErrorType::NotFound).reject());
    }

    ctx.command_lists()
        .update_one(
            doc! { "_id": list_id },
            doc! {
                "$pull": { "commands": { "_id": command_id } },
                "$set": { "updatedAt": bson::DateTime::from_chrono(Utc::now()) },
            },
            None,
        )
        .await
        .map_err(|err| AppError::from_mongo(err, "Remove command error:").reject())?;

    let list = ctx
        .command_lists()
        .find_one(doc! { "_id": list_id }, None)
        .await
        .map_err(|err| AppError::from_mongo(err, "Remove command error:").reject())?
        .ok_or_else(|| AppError::new("Command list not found", ErrorType::NotFound).reject())?;

    ctx.audit.record(
        ActivityLog::new(Some(auth.id), "remove_command", "command_list", &meta)
            .target_id(list_id)
            .details(doc! { "commandId": command_id }),
    );

    Ok(warp::reply::json(&list))
}
