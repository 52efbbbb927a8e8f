pub mod shape;
pub mod world;
