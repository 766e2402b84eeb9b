//! Enrichment stage.
//!
//! Science modules are external collaborators behind the [`Enricher`] trait.
//! An enricher may add columns but must return exactly the rows it was
//! given.

use arrow::array::RecordBatch;
use async_trait::async_trait;
use snafu::prelude::*;
use std::sync::Arc;

use crate::error::{EnrichError, RowCountChangedSnafu};

/// Options passed to every enrichment call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrichOptions {
    /// Run the science modules. When false, only cheap annotations are added.
    pub with_science: bool,
}

/// Adds columns to a filtered batch.
#[async_trait]
pub trait Enricher: Send + Sync {
    /// Stage name used in logs and errors.
    fn name(&self) -> &str;

    async fn enrich(
        &self,
        batch: RecordBatch,
        options: EnrichOptions,
    ) -> Result<RecordBatch, EnrichError>;
}

/// Shared enricher handle.
pub type EnricherRef = Arc<dyn Enricher>;

/// Returns batches unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughEnricher;

#[async_trait]
impl Enricher for PassthroughEnricher {
    fn name(&self) -> &str {
        "passthrough"
    }

    async fn enrich(
        &self,
        batch: RecordBatch,
        _options: EnrichOptions,
    ) -> Result<RecordBatch, EnrichError> {
        Ok(batch)
    }
}

/// Run `enricher` and check that it kept the row count.
pub async fn enrich_checked(
    enricher: &dyn Enricher,
    batch: RecordBatch,
    options: EnrichOptions,
) -> Result<RecordBatch, EnrichError> {
    let expected = batch.num_rows();
    let enriched = enricher.enrich(batch, options).await?;
    ensure!(
        enriched.num_rows() == expected,
        RowCountChangedSnafu {
            stage: enricher.name(),
            expected,
            actual: enriched.num_rows(),
        }
    );
    Ok(enriched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::{literal_utf8, with_column};
    use crate::error::StageFailedSnafu;
    use arrow::array::{ArrayRef, Int64Array};

    struct Classifier;

    #[async_trait]
    impl Enricher for Classifier {
        fn name(&self) -> &str {
            "classifier"
        }

        async fn enrich(
            &self,
            batch: RecordBatch,
            options: EnrichOptions,
        ) -> Result<RecordBatch, EnrichError> {
            let label = if options.with_science { "SN candidate" } else { "Unknown" };
            with_column(&batch, "cdsxmatch", literal_utf8(label, batch.num_rows())).map_err(|e| {
                EnrichError::StageFailed {
                    stage: "classifier".into(),
                    message: e.to_string(),
                }
            })
        }
    }

    struct Dropper;

    #[async_trait]
    impl Enricher for Dropper {
        fn name(&self) -> &str {
            "dropper"
        }

        async fn enrich(
            &self,
            batch: RecordBatch,
            _options: EnrichOptions,
        ) -> Result<RecordBatch, EnrichError> {
            Ok(batch.slice(0, batch.num_rows().saturating_sub(1)))
        }
    }

    struct Failing;

    #[async_trait]
    impl Enricher for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn enrich(
            &self,
            _batch: RecordBatch,
            _options: EnrichOptions,
        ) -> Result<RecordBatch, EnrichError> {
            StageFailedSnafu {
                stage: "failing",
                message: "model unavailable",
            }
            .fail()
        }
    }

    fn batch() -> RecordBatch {
        RecordBatch::try_from_iter(vec![(
            "candid",
            Arc::new(Int64Array::from(vec![1, 2, 3])) as ArrayRef,
        )])
        .unwrap()
    }

    const SCIENCE: EnrichOptions = EnrichOptions { with_science: true };

    #[tokio::test]
    async fn test_added_columns_propagate() {
        let enriched = enrich_checked(&Classifier, batch(), SCIENCE).await.unwrap();
        assert_eq!(enriched.num_rows(), 3);
        assert!(enriched.column_by_name("cdsxmatch").is_some());
    }

    #[tokio::test]
    async fn test_row_count_change_is_a_violation() {
        let err = enrich_checked(&Dropper, batch(), SCIENCE).await.unwrap_err();
        assert!(matches!(
            err,
            EnrichError::RowCountChanged {
                expected: 3,
                actual: 2,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_stage_failure_propagates() {
        let err = enrich_checked(&Failing, batch(), SCIENCE).await.unwrap_err();
        assert!(err.to_string().contains("model unavailable"));
    }

    #[tokio::test]
    async fn test_passthrough() {
        let enriched = enrich_checked(&PassthroughEnricher, batch(), SCIENCE)
            .await
            .unwrap();
        assert_eq!(enriched, batch());
    }
}
