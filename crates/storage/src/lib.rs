//! Persistence: run reports and the geolocation database.

mod geo;
mod report;

pub use geo::GeoDatabase;
pub use report::{read_report, write_report};
