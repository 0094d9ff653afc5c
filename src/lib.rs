pub mod attempt;
pub mod client;
pub mod config;
pub mod error;
pub mod grading;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod state;

use anyhow::Context;
use chrono::Utc;
use config::Config;
use models::{Role, User};
use state::{FileStore, StoreError, UserRepository};
use std::sync::Arc;

fn open_store(config: &Config) -> anyhow::Result<Arc<FileStore>> {
    let store = match config.data_dir.as_deref() {
        Some(dir) => FileStore::open(dir)
            .with_context(|| format!("refusing to start on top of {}", dir.display()))?,
        None => FileStore::in_memory(),
    };
    Ok(Arc::new(store))
}

pub async fn build_state(config: Config) -> anyhow::Result<state::AppState> {
    let schema_raw = include_str!("../contracts/quiz_import.schema.json");
    let schema: serde_json::Value = serde_json::from_str(schema_raw)?;
    let store = open_store(&config)?;
    if config.seed_demo_users {
        seed_demo_users(store.as_ref()).await?;
    }
    Ok(state::AppState::new(store, schema, config))
}

async fn seed_demo_users(users: &dyn UserRepository) -> anyhow::Result<()> {
    let demo = [
        ("student@example.com", "Demo Student", Role::Student, "student123"),
        ("teacher@example.com", "Demo Teacher", Role::Teacher, "teacher123"),
    ];
    for (email, name, role, password) in demo {
        if users.find_by_email(email).await.is_some() {
            continue;
        }
        let password_hash = handlers::hash_password(password)
            .map_err(|e| anyhow::anyhow!("password hash failed: {e}"))?;
        let user = User {
            email: email.to_string(),
            name: name.to_string(),
            role,
            password_hash,
            created_at: Utc::now(),
        };
        match users.insert(user).await {
            Ok(_) | Err(StoreError::DuplicateUser(_)) => {}
            Err(err) => return Err(err.into()),
        }
        tracing::info!(email, role = role.as_str(), "demo user seeded");
    }
    Ok(())
}
