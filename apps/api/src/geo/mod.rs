pub mod handlers;
pub mod haversine;
pub mod index;

pub use index::GeoIndex;
