pub mod compiled;
pub mod decision;
pub mod engine;
pub mod matcher;
pub mod request;
pub mod types;
