
pub mod bounds;
pub mod cell;
pub mod chunk;
pub mod options;
pub mod vector3;
