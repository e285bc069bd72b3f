pub mod class_groups;
pub mod core;
pub mod enrollment;
pub mod grades;
pub mod offerings;
pub mod promotion;
pub mod roster;
pub mod setup;
