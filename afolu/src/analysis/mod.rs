pub mod band;
pub mod carbon;
pub mod indices;
pub mod land_cover;
pub mod zonal;
