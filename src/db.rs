use crate::config::DatabaseConfig;
use crate::models::{Role, User};
use crate::security;
use bson::doc;
use chrono::Utc;
use log::{error, info};
use mongodb::{
    bson::oid::ObjectId,
    options::{ClientOptions, ResolverConfig},
    Client, Collection, Database,
};

pub async fn get_db(config: &DatabaseConfig) -> mongodb::error::Result<Database> {
    // An extra line of code to work around a DNS issue on Windows:
    let options =
        ClientOptions::parse_with_resolver_config(&config.uri, ResolverConfig::cloudflare())
            .await?;
    let client = Client::with_options(options)?;

    Ok(client.database(&config.name))
}

pub const DEFAULT_ADMIN_USERNAME: &str = "admin";
pub const DEFAULT_ADMIN_PASSWORD: &str = "admin123";
pub const DEFAULT_ADMIN_EMAIL: &str = "admin@aiotmonitor.com";

/// At least one admin must exist; create the default one on first boot.
pub async fn ensure_default_admin(db: &Database) -> mongodb::error::Result<()> {
    let users: Collection<User> = db.collection("users");

    if users.find_one(doc! { "role": "admin" }, None).await?.is_some() {
        return Ok(());
    }

    info!("Creating default admin user...");

    let password = match security::hash_password(DEFAULT_ADMIN_PASSWORD) {
        Ok(hash) => hash,
        Err(err) => {
            error!("could not hash default admin password: {}", err.message);
            return Ok(());
        }
    };

    let now = Utc::now();
    let admin = User {
        id: ObjectId::new(),
        username: DEFAULT_ADMIN_USERNAME.to_string(),
        email: DEFAULT_ADMIN_EMAIL.to_string(),
        password,
        role: Role::Admin,
        first_name: Some("Admin".to_string()),
        last_name: Some("User".to_string()),
        is_active: true,
        last_login: None,
        created_by: None,
        created_at: now,
        updated_at: now,
    };

    users.insert_one(&admin, None).await?;
    info!("Default admin user created successfully");

    Ok(())
}
