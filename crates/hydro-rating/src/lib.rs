//! Evaluation engine for versioned hydrologic rating curves.
//!
//! Ratings map independent parameters (stage, elevation, gate opening) to a
//! dependent parameter (flow, storage). [`RatingSeries`] selects and blends
//! dated ratings of one specification by value time.

pub mod config;
pub mod error;
pub mod expression;
pub mod ratings;
pub mod telemetry;
pub mod units;

pub use config::{EngineConfig, SafetyPolicy};
pub use error::{RangeBound, RatingError, RatingResult};
pub use ratings::context::RatingContext;
pub use ratings::expression_rating::ExpressionRating;
pub use ratings::ids::{RatingSpecId, UnitsId};
pub use ratings::metadata::RatingMetadata;
pub use ratings::method::{Direction, RatingMethod, RatingMethodSet};
pub use ratings::point::{PointValue, RatingPoint};
pub use ratings::record::{RatingRecord, RecordError, SeriesRecord};
pub use ratings::series::{RatingSeries, SeriesObserver};
pub use ratings::source::SourceRating;
pub use ratings::table::LookupTable;
pub use ratings::tabular::TableRating;
pub use ratings::transitional::TransitionalRating;
pub use ratings::usgs::{ShiftCurve, UsgsShiftedRating};
pub use ratings::virtual_rating::{Port, VirtualRating};
pub use ratings::{is_undefined, Rate, Rating, UNDEFINED_VALUE};
