//! Off-axis dark-state leakage of in-plane-switching LCD stacks.
//!
//! This crate models the light leaking through a dark IPS panel viewed
//! obliquely and searches compensation-film parameters that maximize the
//! contrast ratio at a target viewing angle. It offers tools to
//!
//! - compute oblique-incidence retardation of A-plates, LC cells, and C-plates (`retardation`),
//! - propagate a three-component field through a layer stack between crossed
//!   wide-view polarizers (`retarder`, `leakage`),
//! - assemble stacks from a small set of topologies (`stack`),
//! - run deterministic, resumable grid searches and envelopes (`optimizer`, `progress`),
//! - inspect stage-by-stage polarization (`stokes`), angular contrast maps
//!   (`isocontrast`), and perturbation studies (`sensitivity`).
//!
//! Angles are degrees and lengths are nanometres at every public boundary.
//! Leakage ignores Fresnel losses, so it is meant for comparing contrast
//! between designs rather than as an absolute transmittance.
//!
//! # Quick start
//!
//! ```no_run
//! use ipscomp::optimizer::{GridOptimizer, ParameterRange, SearchSpace};
//! use ipscomp::stack::Topology;
//! use ipscomp::SimulationConfig;
//!
//! let config = SimulationConfig::default().with_topology(Topology::LcAC);
//! let space = SearchSpace::new(
//!     &ParameterRange::new(0.0, 2.0, 0.05),
//!     &ParameterRange::new(-200.0, 200.0, 5.0),
//! )
//! .expect("non-empty grid");
//!
//! let optimizer = GridOptimizer::new(&config);
//! let outcome = optimizer.search(&space).expect("search succeeds");
//! println!(
//!     "best CR {:.1} at A_scale {} ReC {} nm",
//!     outcome.best.cr, outcome.best.params.a_scale, outcome.best.params.c_retardation_nm
//! );
//! ```

pub mod config;
pub mod error;
pub mod geometry;
pub mod isocontrast;
pub mod leakage;
pub mod optimizer;
pub mod progress;
pub mod retardation;
pub mod retarder;
pub mod sensitivity;
pub mod spectrum;
pub mod stack;
pub mod stokes;

pub use config::SimulationConfig;
pub use error::{OpticsError, Result};
pub use geometry::{PolarizerPair, ViewingAngle};
pub use leakage::{contrast_ratio, LeakageEvaluator};
pub use optimizer::{GridOptimizer, SearchOutcome, SearchSpace};
pub use stack::{OpticalLayer, Stack, StackBuilder, StackParams};
