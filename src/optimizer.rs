//! Exhaustive film-parameter search at the target viewing angle.
//!
//! The grid is the Cartesian product of the discrete axis choices with the
//! A_scale and signed C retardation ranges, visited in one fixed order:
//! A-plate base azimuth, then A-plate material, then A_scale, then ReC
//! (innermost). Contrast values for a chunk of grid points may be computed on
//! the rayon pool; improvements are always detected by an in-order scan, so
//! sequential and parallel runs produce identical results.

use std::ops::Range;

use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{APlateKind, AxisBase, Execution, SimulationConfig};
use crate::error::{OpticsError, Result};
use crate::geometry::PolarizerPair;
use crate::leakage::LeakageEvaluator;
use crate::progress::EnvelopeRow;
use crate::stack::{Stack, StackBuilder, StackParams};

/// Largest number of values a single [`ParameterRange`] may expand to.
pub const MAX_RANGE_POINTS: usize = 1 << 24;

/// Inclusive arithmetic range `start, start + step, ..., <= stop`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterRange {
    /// First value.
    pub start: f64,
    /// Inclusive upper bound, with a `1e-9 * step` tolerance.
    pub stop: f64,
    /// Positive increment.
    pub step: f64,
}

impl ParameterRange {
    pub fn new(start: f64, stop: f64, step: f64) -> Self {
        Self { start, stop, step }
    }

    /// A range holding exactly one value.
    pub fn single(value: f64) -> Self {
        Self::new(value, value, 1.0)
    }

    /// Expands the range; `parameter` names it in the error.
    pub fn values(&self, parameter: &'static str) -> Result<Vec<f64>> {
        let finite = self.start.is_finite() && self.stop.is_finite() && self.step.is_finite();
        if !finite || self.step <= 0.0 || self.stop < self.start {
            return Err(OpticsError::grid_empty(parameter));
        }
        let tolerance = 1e-9 * self.step;
        let steps = ((self.stop - self.start + tolerance) / self.step).floor();
        if !steps.is_finite() || steps >= MAX_RANGE_POINTS as f64 {
            return Err(OpticsError::GridTooLarge {
                parameter,
                limit: MAX_RANGE_POINTS,
            });
        }
        let count = steps as usize + 1;
        Ok((0..count)
            .map(|i| self.start + i as f64 * self.step)
            .collect())
    }
}

/// Values visited by the grid search.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    /// A-plate retardation multipliers.
    pub a_scale: Vec<f64>,
    /// Signed C-plate retardations (nm).
    pub c_retardation_nm: Vec<f64>,
    /// A-plate base azimuths.
    pub a_bases: Vec<AxisBase>,
    /// A-plate materials.
    pub a_kinds: Vec<APlateKind>,
}

impl SearchSpace {
    /// Space over two continuous ranges with the default discrete choices.
    pub fn new(a_scale: &ParameterRange, c_retardation_nm: &ParameterRange) -> Result<Self> {
        Ok(Self {
            a_scale: a_scale.values("A_scale")?,
            c_retardation_nm: c_retardation_nm.values("ReC_nm")?,
            a_bases: vec![AxisBase::Absorption],
            a_kinds: vec![APlateKind::Upper],
        })
    }

    pub fn with_a_bases(mut self, a_bases: Vec<AxisBase>) -> Self {
        self.a_bases = a_bases;
        self
    }

    pub fn with_a_kinds(mut self, a_kinds: Vec<APlateKind>) -> Self {
        self.a_kinds = a_kinds;
        self
    }

    /// Fails with `GridEmpty` naming the first dimension without values.
    pub fn validate(&self) -> Result<()> {
        if self.a_bases.is_empty() {
            return Err(OpticsError::grid_empty("A_base"));
        }
        if self.a_kinds.is_empty() {
            return Err(OpticsError::grid_empty("A_kind"));
        }
        if self.a_scale.is_empty() {
            return Err(OpticsError::grid_empty("A_scale"));
        }
        if self.c_retardation_nm.is_empty() {
            return Err(OpticsError::grid_empty("ReC_nm"));
        }
        Ok(())
    }

    /// Number of grid points.
    pub fn len(&self) -> usize {
        self.a_bases.len() * self.a_kinds.len() * self.a_scale.len() * self.c_retardation_nm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parameters of the grid point at `index` in iteration order.
    pub fn point(&self, index: usize) -> StackParams {
        let n_c = self.c_retardation_nm.len();
        let n_a = self.a_scale.len();
        let n_kind = self.a_kinds.len();
        let c = index % n_c;
        let a = (index / n_c) % n_a;
        let kind = (index / (n_c * n_a)) % n_kind;
        let base = index / (n_c * n_a * n_kind);
        StackParams::new(self.a_scale[a], self.c_retardation_nm[c])
            .with_a_base(self.a_bases[base])
            .with_a_kind(self.a_kinds[kind])
    }

    /// The same space restricted to one A_scale value.
    fn at_a_scale(&self, a_scale: f64) -> Self {
        Self {
            a_scale: vec![a_scale],
            ..self.clone()
        }
    }
}

/// A grid point together with its contrast ratio.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchPoint {
    /// Film parameters of the point.
    pub params: StackParams,
    /// White contrast ratio at the target angle.
    pub cr: f64,
    /// Position in the deterministic iteration order.
    pub grid_index: usize,
}

/// Emitted whenever the search finds a strictly better point.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateEvent {
    /// Zero-based count of improvements before this one.
    pub update_idx: usize,
    /// The new best point.
    pub point: SearchPoint,
}

/// Stride sampling and capping of the update history.
///
/// Whether an event is kept depends on its `update_idx` alone, so the filter
/// can be applied to any slice of the event stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryFilter {
    /// Keep every `stride`-th update; zero behaves like one.
    pub stride: usize,
    /// Maximum number of retained updates.
    pub cap: Option<usize>,
}

impl Default for HistoryFilter {
    fn default() -> Self {
        Self {
            stride: 1,
            cap: None,
        }
    }
}

impl HistoryFilter {
    pub fn new(stride: usize, cap: Option<usize>) -> Self {
        Self { stride, cap }
    }

    /// Whether the event with this update index is retained.
    pub fn accepts(&self, update_idx: usize) -> bool {
        let stride = self.stride.max(1);
        if update_idx % stride != 0 {
            return false;
        }
        self.cap.map_or(true, |cap| update_idx / stride < cap)
    }

    /// Retained events of `events`, in order.
    pub fn apply(&self, events: &[UpdateEvent]) -> Vec<UpdateEvent> {
        events
            .iter()
            .filter(|event| self.accepts(event.update_idx))
            .cloned()
            .collect()
    }
}

/// State needed to continue a search after a chunk of grid points.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchCheckpoint {
    /// First grid index not yet evaluated.
    pub next_index: usize,
    /// Best point so far; `None` before the first evaluation.
    pub best: Option<SearchPoint>,
    /// Total improvements found so far, filtered or not.
    pub update_count: usize,
    /// Update events retained by the history filter.
    pub history: Vec<UpdateEvent>,
}

impl SearchCheckpoint {
    /// Whether every point of `space` has been evaluated.
    pub fn is_complete(&self, space: &SearchSpace) -> bool {
        self.next_index >= space.len()
    }
}

/// Final result of a full search.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    /// Highest-contrast point; ties keep the earliest in grid order.
    pub best: SearchPoint,
    /// Update events retained by the history filter.
    pub history: Vec<UpdateEvent>,
    /// Total improvements found, filtered or not.
    pub update_count: usize,
    /// Number of grid points evaluated.
    pub evaluated: usize,
}

/// Grid search driver for one configuration.
#[derive(Clone, Debug)]
pub struct GridOptimizer<'a> {
    config: &'a SimulationConfig,
    builder: StackBuilder<'a>,
    evaluator: LeakageEvaluator,
    polarizers: PolarizerPair,
}

impl<'a> GridOptimizer<'a> {
    /// Optimizer for the target angle and settings of `config`.
    pub fn new(config: &'a SimulationConfig) -> Self {
        Self {
            config,
            builder: StackBuilder::new(config),
            evaluator: LeakageEvaluator::from_config(config),
            polarizers: config.polarizers(),
        }
    }

    /// Stack for one grid point.
    pub fn stack(&self, params: &StackParams) -> Result<Stack> {
        self.builder.build(params)
    }

    /// White contrast ratio at the target angle for one grid point.
    pub fn evaluate(&self, params: &StackParams) -> Result<f64> {
        let stack = self.builder.build(params)?;
        self.evaluator
            .contrast(&self.config.target, &stack, &self.polarizers)
    }

    /// Searches the whole space.
    pub fn search(&self, space: &SearchSpace) -> Result<SearchOutcome> {
        let checkpoint = self.search_chunk(space, SearchCheckpoint::default(), usize::MAX)?;
        let outcome = self.finish(space, checkpoint)?;
        info!(
            "grid search over {} points finished: best CR {:.3} at A_scale {} ReC {} nm after {} updates",
            outcome.evaluated,
            outcome.best.cr,
            outcome.best.params.a_scale,
            outcome.best.params.c_retardation_nm,
            outcome.update_count
        );
        Ok(outcome)
    }

    /// Evaluates at most `max_points` grid points after `checkpoint`, keeping
    /// the update events the configured history filter accepts.
    pub fn search_chunk(
        &self,
        space: &SearchSpace,
        checkpoint: SearchCheckpoint,
        max_points: usize,
    ) -> Result<SearchCheckpoint> {
        let filter = &self.config.history;
        let mut accepted = Vec::new();
        let mut checkpoint = self.search_chunk_with(space, checkpoint, max_points, |event| {
            if filter.accepts(event.update_idx) {
                accepted.push(event.clone());
            }
        })?;
        checkpoint.history.extend(accepted);
        Ok(checkpoint)
    }

    /// Like [`search_chunk`](Self::search_chunk) but hands every update event
    /// to `on_update` instead of recording history.
    pub fn search_chunk_with<F>(
        &self,
        space: &SearchSpace,
        mut checkpoint: SearchCheckpoint,
        max_points: usize,
        mut on_update: F,
    ) -> Result<SearchCheckpoint>
    where
        F: FnMut(&UpdateEvent),
    {
        space.validate()?;
        let total = space.len();
        let start = checkpoint.next_index.min(total);
        let end = start.saturating_add(max_points).min(total);
        if start > 0 {
            debug!("resuming grid search at point {start} of {total}");
        }

        let values = self.evaluate_range(space, start..end)?;
        for (offset, cr) in values.into_iter().enumerate() {
            let improved = checkpoint.best.as_ref().map_or(true, |best| cr > best.cr);
            if !improved {
                continue;
            }
            let grid_index = start + offset;
            let point = SearchPoint {
                params: space.point(grid_index),
                cr,
                grid_index,
            };
            debug!(
                "update {}: CR {:.4} at A_scale {} ReC {} nm (point {grid_index})",
                checkpoint.update_count, cr, point.params.a_scale, point.params.c_retardation_nm
            );
            on_update(&UpdateEvent {
                update_idx: checkpoint.update_count,
                point: point.clone(),
            });
            checkpoint.update_count += 1;
            checkpoint.best = Some(point);
        }
        checkpoint.next_index = end;
        Ok(checkpoint)
    }

    /// Converts a completed checkpoint into an outcome.
    pub fn finish(&self, space: &SearchSpace, checkpoint: SearchCheckpoint) -> Result<SearchOutcome> {
        space.validate()?;
        if !checkpoint.is_complete(space) {
            debug!(
                "finishing partial search at point {} of {}",
                checkpoint.next_index,
                space.len()
            );
        }
        let best = checkpoint
            .best
            .ok_or_else(|| OpticsError::grid_empty("search space"))?;
        Ok(SearchOutcome {
            best,
            history: checkpoint.history,
            update_count: checkpoint.update_count,
            evaluated: checkpoint.next_index,
        })
    }

    /// Best achievable contrast for each A_scale of `space` after optimizing the
    /// remaining parameters.
    pub fn envelope(&self, space: &SearchSpace) -> Result<Vec<EnvelopeRow>> {
        space.validate()?;
        let rows = space
            .a_scale
            .iter()
            .map(|&a_scale| {
                let inner = space.at_a_scale(a_scale);
                let checkpoint = self.search_chunk_with(
                    &inner,
                    SearchCheckpoint::default(),
                    usize::MAX,
                    |_| {},
                )?;
                let best = self.finish(&inner, checkpoint)?.best;
                Ok(EnvelopeRow::from_point(&best))
            })
            .collect::<Result<Vec<_>>>()?;
        info!("envelope over {} A_scale values finished", rows.len());
        Ok(rows)
    }

    fn evaluate_range(&self, space: &SearchSpace, range: Range<usize>) -> Result<Vec<f64>> {
        match self.config.execution {
            Execution::Parallel => range
                .into_par_iter()
                .map(|index| self.evaluate(&space.point(index)))
                .collect(),
            Execution::Sequential => range
                .map(|index| self.evaluate(&space.point(index)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn small_space() -> SearchSpace {
        SearchSpace::new(
            &ParameterRange::new(0.0, 1.5, 0.5),
            &ParameterRange::new(-60.0, 60.0, 30.0),
        )
        .unwrap()
    }

    #[test]
    fn ranges_expand_inclusively() {
        let values = ParameterRange::new(0.0, 1.0, 0.1).values("A_scale").unwrap();
        assert_eq!(values.len(), 11);
        assert_relative_eq!(values[10], 1.0, epsilon = 1e-12);
        assert_eq!(ParameterRange::single(2.5).values("A_scale").unwrap(), vec![2.5]);
    }

    #[test]
    fn ill_formed_ranges_are_empty_grids() {
        for range in [
            ParameterRange::new(1.0, 0.0, 0.1),
            ParameterRange::new(0.0, 1.0, 0.0),
            ParameterRange::new(0.0, f64::NAN, 0.1),
        ] {
            assert!(matches!(
                range.values("ReC_nm"),
                Err(OpticsError::GridEmpty { parameter: "ReC_nm" })
            ));
        }
        let space = small_space().with_a_kinds(Vec::new());
        let config = SimulationConfig::default();
        assert!(matches!(
            GridOptimizer::new(&config).search(&space),
            Err(OpticsError::GridEmpty { .. })
        ));
    }

    #[test]
    fn oversized_ranges_are_rejected_before_allocating() {
        for range in [
            ParameterRange::new(0.0, 1.0, 1e-300),
            ParameterRange::new(-1e300, 1e300, 1.0),
            ParameterRange::new(0.0, MAX_RANGE_POINTS as f64, 1.0),
        ] {
            assert!(matches!(
                range.values("A_scale"),
                Err(OpticsError::GridTooLarge { parameter: "A_scale", .. })
            ));
        }
        let wide = ParameterRange::new(0.0, 1.0, 1e-5);
        assert_eq!(wide.values("A_scale").unwrap().len(), 100_001);
    }

    #[test]
    fn grid_points_follow_nested_order() {
        let space = small_space().with_a_bases(vec![AxisBase::Absorption, AxisBase::Transmission]);
        assert_eq!(space.len(), 2 * 4 * 5);
        let first = space.point(0);
        assert_eq!((first.a_scale, first.c_retardation_nm), (0.0, -60.0));
        let second = space.point(1);
        assert_eq!((second.a_scale, second.c_retardation_nm), (0.0, -30.0));
        let sixth = space.point(5);
        assert_eq!((sixth.a_scale, sixth.c_retardation_nm), (0.5, -60.0));
        assert_eq!(space.point(20).a_base, AxisBase::Transmission);
    }

    #[test]
    fn history_filter_is_stride_then_cap() {
        let filter = HistoryFilter::new(3, Some(2));
        let kept: Vec<usize> = (0..20).filter(|&i| filter.accepts(i)).collect();
        assert_eq!(kept, vec![0, 3]);
        let everything = HistoryFilter::default();
        assert!((0..10).all(|i| everything.accepts(i)));
    }

    #[test]
    fn sequential_and_parallel_runs_agree() {
        let space = small_space();
        let sequential = SimulationConfig::default().with_execution(Execution::Sequential);
        let parallel = SimulationConfig::default().with_execution(Execution::Parallel);
        let a = GridOptimizer::new(&sequential).search(&space).unwrap();
        let b = GridOptimizer::new(&parallel).search(&space).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.evaluated, space.len());
    }

    #[test]
    fn history_improves_strictly_and_ends_at_best() {
        let config = SimulationConfig::default();
        let outcome = GridOptimizer::new(&config).search(&small_space()).unwrap();
        assert_eq!(outcome.history.len(), outcome.update_count);
        for pair in outcome.history.windows(2) {
            assert!(pair[1].point.cr > pair[0].point.cr);
            assert!(pair[1].point.grid_index > pair[0].point.grid_index);
            assert_eq!(pair[1].update_idx, pair[0].update_idx + 1);
        }
        assert_eq!(outcome.history.last().map(|e| &e.point), Some(&outcome.best));
    }

    #[test]
    fn chunked_search_matches_single_run() {
        let config = SimulationConfig::default().with_history(HistoryFilter::new(2, None));
        let optimizer = GridOptimizer::new(&config);
        let space = small_space();
        let full = optimizer.search(&space).unwrap();

        let mut checkpoint = SearchCheckpoint::default();
        while !checkpoint.is_complete(&space) {
            checkpoint = optimizer.search_chunk(&space, checkpoint, 3).unwrap();
        }
        let chunked = optimizer.finish(&space, checkpoint).unwrap();
        assert_eq!(chunked, full);
    }

    #[test]
    fn envelope_dominates_global_best_retardation() {
        let config = SimulationConfig::default();
        let optimizer = GridOptimizer::new(&config);
        let space = small_space();
        let best = optimizer.search(&space).unwrap().best;
        let rows = optimizer.envelope(&space).unwrap();
        assert_eq!(rows.len(), space.a_scale.len());
        for row in &rows {
            let fixed = StackParams::new(row.a_scale, best.params.c_retardation_nm)
                .with_a_base(best.params.a_base)
                .with_a_kind(best.params.a_kind);
            assert!(row.cr >= optimizer.evaluate(&fixed).unwrap());
        }
        let top = rows.iter().map(|r| r.cr).fold(f64::MIN, f64::max);
        assert_eq!(top, best.cr);
    }
}
