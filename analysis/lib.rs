#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

pub mod basis;
pub mod config;
pub mod data;
pub mod estimate;
pub mod model;
pub mod predict;
pub mod render;
pub mod report;
pub mod summary;
