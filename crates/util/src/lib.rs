//! Small helpers shared by the Stepflow crates.

pub mod duration;
pub mod path_processing;
pub mod text_processing;

pub use duration::{DurationParseError, format_duration, parse_duration};
pub use path_processing::expand_tilde;
pub use text_processing::fuzzy_score;
