//! Analysis modules.
//!
//! The step aggregator is the core; milestones and smoothing post-process the
//! tables it produces.

pub mod aggregator;
pub mod milestones;
pub mod reduction;
pub mod smoothing;

pub use aggregator::StepAggregator;
pub use reduction::Reduction;
