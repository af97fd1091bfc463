pub mod area;
pub mod emission;
pub mod meter;
pub mod reading;

pub use area::ServiceArea;
pub use emission::EmissionPattern;
pub use meter::{CustomerSegment, GeoPoint, MeterIdentity};
pub use reading::{DataQuality, Reading};
