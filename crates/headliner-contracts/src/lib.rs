pub mod assets;
pub mod config;
pub mod content;
pub mod events;
pub mod models;
pub mod provenance;
pub mod styles;
