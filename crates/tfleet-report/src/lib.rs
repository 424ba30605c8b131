pub mod builder;
pub mod model;
pub mod render;

pub use builder::{build, find_collisions, Dropped};
pub use model::{DroppedUnitEntry, Report, ReportFooter, ReportHeader, StateKeyCollision, UnitReportEntry};
pub use render::{render_json, render_text};
