//! Google Cloud Storage backend.

use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path;
use object_store::{ObjectStore, RetryConfig};
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{GcsConfigSnafu, StorageError};

use super::{BackendConfig, StorageProvider};

/// Google Cloud Storage configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcsConfig {
    pub bucket: String,
    pub key: Option<Path>,
}

impl StorageProvider {
    pub(super) fn construct_gcs(
        config: GcsConfig,
        options: HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        let mut builder = GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(&config.bucket)
            .with_retry(RetryConfig::default());

        for (key, value) in &options {
            builder = builder.with_config(key.parse().context(GcsConfigSnafu)?, value.clone());
        }

        if let Ok(service_account_key) = std::env::var("GOOGLE_SERVICE_ACCOUNT_KEY") {
            debug!("Constructing GCS builder with service account key");
            builder = builder.with_service_account_key(&service_account_key);
        }

        let mut canonical_url = format!("gs://{}", config.bucket);
        if let Some(key) = &config.key {
            canonical_url = format!("{canonical_url}/{key}");
        }

        let object_store: Arc<dyn ObjectStore> =
            Arc::new(builder.build().context(GcsConfigSnafu)?);

        Ok(Self {
            config: BackendConfig::Gcs(config),
            object_store,
            canonical_url,
        })
    }
}
