pub mod errors;
pub mod geometry;
pub mod range;
pub mod region;
pub mod snapshot;

pub use errors::*;
pub use geometry::*;
pub use range::*;
pub use region::*;
pub use snapshot::*;
