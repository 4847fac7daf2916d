use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;

use onboarding_engine::{
    session::{create_store, DatabaseConfig, DatabaseType, SessionStore},
    workflow::WorkflowContext,
    Error,
};

async fn sqlite_store() -> Arc<dyn SessionStore> {
    let store = create_store(&DatabaseConfig::sqlite(":memory:"))
        .await
        .expect("Failed to create store");
    store.init().await.expect("Failed to initialize store");
    store
}

fn context(version: u64) -> WorkflowContext {
    let mut context = WorkflowContext::start("onboarding", "collect_name");
    context.set_variable("collect_name", json!("Jean Dupont"));
    context.push_history("collect_name", 50);
    context.version = version;
    context
}

#[tokio::test]
async fn test_sqlite_round_trip() {
    let store = sqlite_store().await;
    assert!(store.load("user-1").await.unwrap().is_none());

    let saved = context(1);
    store.save("user-1", &saved, None).await.unwrap();

    let loaded = store.load("user-1").await.unwrap().unwrap();
    assert_eq!(loaded, saved);
}

#[tokio::test]
async fn test_sqlite_rejects_stale_versions() {
    let store = sqlite_store().await;
    store.save("user-1", &context(1), None).await.unwrap();

    // A second first write loses
    let err = store.save("user-1", &context(1), None).await.unwrap_err();
    assert!(matches!(err, Error::VersionConflict { found: Some(1), .. }));

    store.save("user-1", &context(2), Some(1)).await.unwrap();
    let err = store.save("user-1", &context(2), Some(1)).await.unwrap_err();
    match err {
        Error::VersionConflict { expected, found, .. } => {
            assert_eq!(expected, Some(1));
            assert_eq!(found, Some(2));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_sqlite_clear_bumps_version() {
    let store = sqlite_store().await;
    store.save("user-1", &context(1), None).await.unwrap();

    store.clear("user-1").await.unwrap();
    let cleared = store.load("user-1").await.unwrap().unwrap();
    assert!(!cleared.is_active());
    assert!(cleared.variables.is_empty());
    assert_eq!(cleared.version, 2);

    // A turn that read version 1 can no longer write
    assert!(store.save("user-1", &context(2), Some(1)).await.is_err());
    // Clearing an unknown session is a no-op
    store.clear("nobody").await.unwrap();
    assert!(store.load("nobody").await.unwrap().is_none());
}

#[tokio::test]
async fn test_sqlite_file_store_survives_reopen() {
    let dir = std::env::temp_dir().join(format!("onboarding-store-{}", uuid::Uuid::new_v4()));
    let config = DatabaseConfig {
        db_type: DatabaseType::Sqlite,
        sqlite_path: Some(dir.join("sessions.db")),
        max_connections: 2,
    };

    {
        let store = create_store(&config).await.unwrap();
        store.init().await.unwrap();
        store.save("user-1", &context(1), None).await.unwrap();
    }

    let reopened = create_store(&config).await.unwrap();
    reopened.init().await.unwrap();
    let loaded = reopened.load("user-1").await.unwrap().unwrap();
    assert_eq!(loaded.get_variable("collect_name"), Some(&json!("Jean Dupont")));

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_sqlite_requires_a_path() {
    let config = DatabaseConfig {
        db_type: DatabaseType::Sqlite,
        sqlite_path: None::<PathBuf>,
        max_connections: 1,
    };
    assert!(matches!(create_store(&config).await, Err(Error::Config(_))));
}
