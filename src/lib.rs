pub mod catalog;
pub mod cli;
pub mod database;
pub mod depends;
pub mod download;
pub mod error;
pub mod installer;
pub mod settings;
pub mod state;
pub mod store;
pub mod version;

pub use error::Error;
