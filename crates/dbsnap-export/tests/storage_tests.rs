//! Storage integration tests
//!
//! Exercise `S3Storage` against a live S3-compatible endpoint.
//!
//! **Requirements**:
//! - MinIO or S3 must be running and accessible
//! - `S3_ENDPOINT` and `S3_BUCKET` must be set (the bucket must exist)
//! - Tests are skipped if `S3_ENDPOINT` is not configured
//!
//! **Running tests**:
//! ```bash
//! S3_ENDPOINT=http://localhost:9000 S3_BUCKET=dbsnap-test S3_PATH_STYLE=true \
//!   S3_ACCESS_KEY=minioadmin S3_SECRET_KEY=minioadmin \
//!   cargo test -p dbsnap-export --test storage_tests
//! ```

use dbsnap_export::storage::{ObjectStore, S3Storage, StorageConfig};

/// Setup helper that creates a storage client if an endpoint is configured
async fn setup_storage() -> Option<S3Storage> {
    if std::env::var("S3_ENDPOINT").is_err() {
        return None;
    }

    match S3Storage::new(&StorageConfig::from_env()).await {
        Ok(storage) => Some(storage),
        Err(e) => {
            eprintln!("Failed to create storage client: {}", e);
            None
        },
    }
}

/// Helper to generate a unique test key
fn test_key(test_name: &str, suffix: &str) -> String {
    format!("test/{}/{}", test_name, suffix)
}

// ============================================================================
// Object lifecycle
// ============================================================================

#[tokio::test]
async fn test_put_file_get_delete() {
    let Some(storage) = setup_storage().await else {
        eprintln!("Skipping test: S3_ENDPOINT not configured");
        return;
    };

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("orders_part0.csv.gz");
    std::fs::write(&path, b"not really gzip").unwrap();

    let key = test_key("put_file", "orders_part0.csv.gz");
    let size = storage.put_file(&key, &path).await.unwrap();
    assert_eq!(size, 15);

    assert_eq!(storage.get(&key).await.unwrap(), b"not really gzip");

    storage.delete(&key).await.unwrap();
    assert!(storage.get(&key).await.is_err());
}

#[tokio::test]
async fn test_get_missing_key_fails() {
    let Some(storage) = setup_storage().await else {
        eprintln!("Skipping test: S3_ENDPOINT not configured");
        return;
    };

    let key = test_key("get", "never-written");
    assert!(matches!(
        storage.get(&key).await,
        Err(dbsnap_export::ExportError::Storage(_))
    ));
}

#[tokio::test]
async fn test_delete_missing_key_succeeds() {
    let Some(storage) = setup_storage().await else {
        eprintln!("Skipping test: S3_ENDPOINT not configured");
        return;
    };

    // Rollback may delete keys that another run already removed.
    storage.delete(&test_key("delete", "never-written")).await.unwrap();
}

#[tokio::test]
async fn test_put_missing_file_fails() {
    let Some(storage) = setup_storage().await else {
        eprintln!("Skipping test: S3_ENDPOINT not configured");
        return;
    };

    let result = storage
        .put_file(&test_key("missing", "x.gz"), std::path::Path::new("/nonexistent/x.gz"))
        .await;
    assert!(result.is_err());
}
