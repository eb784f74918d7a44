pub mod contour;
pub mod stub;

pub use contour::ContourBackend;
pub use stub::StubBackend;
