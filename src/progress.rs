//! Row schemas handed to the external table writer.
//!
//! Column names are part of the contract with downstream diagnostic tools and
//! must not change: `A_scale`, `ReC_nm`, `A_base_deg`, `A_kind`, `best_CR`,
//! `update_idx`, and per-stage `s1_<stage>`, `s2_<stage>`, `s3_<stage>`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::APlateKind;
use crate::error::{OpticsError, Result};
use crate::optimizer::{SearchPoint, UpdateEvent};
use crate::stokes::WhiteStokes;

/// One best-update row of the optimizer progress table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressRow {
    /// Zero-based improvement counter.
    pub update_idx: usize,
    #[serde(rename = "A_scale")]
    pub a_scale: f64,
    #[serde(rename = "ReC_nm")]
    pub c_retardation_nm: f64,
    #[serde(rename = "A_base_deg")]
    pub a_base_deg: f64,
    #[serde(rename = "A_kind")]
    pub a_kind: APlateKind,
    #[serde(rename = "best_CR")]
    pub best_cr: f64,
    /// Normalized Stokes columns keyed `s<i>_<stage>`.
    #[serde(flatten)]
    pub stokes: BTreeMap<String, f64>,
}

impl ProgressRow {
    /// Row for `event` without Stokes columns.
    pub fn from_event(event: &UpdateEvent) -> Self {
        let params = &event.point.params;
        Self {
            update_idx: event.update_idx,
            a_scale: params.a_scale,
            c_retardation_nm: params.c_retardation_nm,
            a_base_deg: params.a_base.azimuth_deg(),
            a_kind: params.a_kind,
            best_cr: event.point.cr,
            stokes: BTreeMap::new(),
        }
    }

    /// Adds `s1_/s2_/s3_<stage>` columns for every stage of a white trace.
    pub fn with_stokes(mut self, trace: &[WhiteStokes]) -> Self {
        for stage in trace {
            let [s1, s2, s3] = stage.normalized();
            self.stokes.insert(format!("s1_{}", stage.stage), s1);
            self.stokes.insert(format!("s2_{}", stage.stage), s2);
            self.stokes.insert(format!("s3_{}", stage.stage), s3);
        }
        self
    }

    /// Normalized `(s1, s2, s3)` recorded for `stage`.
    pub fn stokes_at(&self, stage: &str) -> Result<[f64; 3]> {
        let mut values = [0.0; 3];
        for (i, value) in values.iter_mut().enumerate() {
            let column = format!("s{}_{stage}", i + 1);
            *value = *self
                .stokes
                .get(&column)
                .ok_or_else(|| OpticsError::MissingColumn {
                    column: column.clone(),
                    available: self.columns(),
                })?;
        }
        Ok(values)
    }

    /// All column names of this row in output order.
    pub fn columns(&self) -> Vec<String> {
        ["update_idx", "A_scale", "ReC_nm", "A_base_deg", "A_kind", "best_CR"]
            .iter()
            .map(|c| c.to_string())
            .chain(self.stokes.keys().cloned())
            .collect()
    }
}

/// Best signed C retardation and contrast for one A_scale.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeRow {
    #[serde(rename = "A_scale")]
    pub a_scale: f64,
    #[serde(rename = "best_ReC_nm")]
    pub c_retardation_nm: f64,
    #[serde(rename = "A_base_deg")]
    pub a_base_deg: f64,
    #[serde(rename = "A_kind")]
    pub a_kind: APlateKind,
    #[serde(rename = "best_CR")]
    pub cr: f64,
}

impl EnvelopeRow {
    pub fn from_point(point: &SearchPoint) -> Self {
        Self {
            a_scale: point.params.a_scale,
            c_retardation_nm: point.params.c_retardation_nm,
            a_base_deg: point.params.a_base.azimuth_deg(),
            a_kind: point.params.a_kind,
            cr: point.cr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::StackParams;
    use crate::stokes::StokesVector;

    fn event() -> UpdateEvent {
        UpdateEvent {
            update_idx: 4,
            point: SearchPoint {
                params: StackParams::new(1.1, -30.0),
                cr: 812.5,
                grid_index: 17,
            },
        }
    }

    #[test]
    fn stage_columns_use_verbatim_names() {
        let trace = vec![WhiteStokes {
            stage: "el#2_C".to_string(),
            weighted: StokesVector::new(2.0, 1.0, 0.5, -0.25),
        }];
        let row = ProgressRow::from_event(&event()).with_stokes(&trace);
        assert_eq!(row.stokes_at("el#2_C").unwrap(), [0.5, 0.25, -0.125]);

        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["s1_el#2_C"], 0.5);
        assert_eq!(json["best_CR"], 812.5);
        assert_eq!(json["A_scale"], 1.1);
        assert_eq!(json["update_idx"], 4);
    }

    #[test]
    fn missing_stage_fails_fast() {
        let row = ProgressRow::from_event(&event());
        match row.stokes_at("el#9_A") {
            Err(OpticsError::MissingColumn { column, available }) => {
                assert_eq!(column, "s1_el#9_A");
                assert!(available.contains(&"best_CR".to_string()));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rows_round_trip_through_json() {
        let trace = vec![WhiteStokes {
            stage: "POL_in".to_string(),
            weighted: StokesVector::new(1.0, 1.0, 0.0, 0.0),
        }];
        let row = ProgressRow::from_event(&event()).with_stokes(&trace);
        let text = serde_json::to_string(&row).unwrap();
        let back: ProgressRow = serde_json::from_str(&text).unwrap();
        assert_eq!(back, row);
    }
}
