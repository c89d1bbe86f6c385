pub mod builder;
pub mod resources;
pub mod settings;
