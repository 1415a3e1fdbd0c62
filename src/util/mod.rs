pub mod quat;
pub mod vec3;
