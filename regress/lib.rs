#![deny(dead_code)]
#![deny(unused_imports)]

pub mod config;
pub mod data;
pub mod design;
pub mod model;
pub mod pipeline;

#[path = "../report/mod.rs"]
pub mod report;
#[path = "../sampler/mod.rs"]
pub mod sampler;
