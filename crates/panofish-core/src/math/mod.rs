pub mod projection;
pub mod rotation;
pub mod utils;

pub use projection::{
    DistanceMapping, EquirectGrid, Interpolation, ProjectionMap, ProjectionParams, azimuth,
    equirectangular_to_fisheye, fisheye_to_equirectangular, perspective_fisheye_correct,
    shrink_fisheye_circle,
};
pub use rotation::{Orientation, orthonormalize, rotation_about_y};
pub use utils::median;
