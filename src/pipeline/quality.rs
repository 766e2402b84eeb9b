//! Per-record quality cuts.

use arrow::array::{Float64Array, Int64Array, RecordBatch};
use arrow::compute::kernels::boolean::and;
use arrow::compute::kernels::cmp::{eq, gt_eq};
use arrow::compute::{cast, filter_record_batch};
use arrow::datatypes::DataType;
use snafu::prelude::*;

use crate::columns::column_by_path;
use crate::config::QualityGateConfig;
use crate::error::{ArrowSnafu, BatchError};

/// Result of applying the gate to a batch.
#[derive(Debug)]
pub struct GateOutcome {
    pub batch: RecordBatch,
    pub rejected: usize,
}

/// Keeps records with no bad pixels and a real/bogus score above a threshold.
///
/// A record passes when `defect_column == 0` and `score_column >= min_score`.
/// Nulls in either column fail the gate.
#[derive(Debug, Clone)]
pub struct QualityGate {
    defect_column: String,
    score_column: String,
    min_score: f64,
}

impl QualityGate {
    pub fn new(
        defect_column: impl Into<String>,
        score_column: impl Into<String>,
        min_score: f64,
    ) -> Self {
        Self {
            defect_column: defect_column.into(),
            score_column: score_column.into(),
            min_score,
        }
    }

    pub fn apply(&self, batch: &RecordBatch) -> Result<GateOutcome, BatchError> {
        let defects = cast(
            &column_by_path(batch, &self.defect_column)?,
            &DataType::Int64,
        )
        .context(ArrowSnafu)?;
        let scores = cast(
            &column_by_path(batch, &self.score_column)?,
            &DataType::Float64,
        )
        .context(ArrowSnafu)?;

        let clean = eq(&defects, &Int64Array::new_scalar(0)).context(ArrowSnafu)?;
        let real = gt_eq(&scores, &Float64Array::new_scalar(self.min_score)).context(ArrowSnafu)?;
        let keep = and(&clean, &real).context(ArrowSnafu)?;

        let filtered = filter_record_batch(batch, &keep).context(ArrowSnafu)?;
        Ok(GateOutcome {
            rejected: batch.num_rows() - filtered.num_rows(),
            batch: filtered,
        })
    }
}

impl From<&QualityGateConfig> for QualityGate {
    fn from(config: &QualityGateConfig) -> Self {
        Self::new(
            config.defect_column.clone(),
            config.score_column.clone(),
            config.min_score,
        )
    }
}
