//! Multi-resolution dose-rate history
//!
//! A 10-second base tick feeds a cascade of five [`TimeframeAccumulator`]s
//! spanning 40 s, 4 min, 20 min, 2 h and 8 h. Each level holds the last few
//! sums of the level below, so the active level's volume is always the pulse
//! count over its nominal span.

pub mod aggregator;
pub mod timeframe;

pub use aggregator::DoseAggregator;
pub use timeframe::TimeframeAccumulator;
