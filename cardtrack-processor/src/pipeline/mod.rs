pub mod batch;
pub mod processing;
pub mod service;
