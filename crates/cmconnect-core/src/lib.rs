pub mod canonical;
pub mod cleanup;
pub mod config;
pub mod db;
pub mod error;
pub mod locator;
pub mod logging;
pub mod normalize;
pub mod pipeline;
pub mod progress;
pub mod store;
pub mod validate;

pub use cmconnect_parser as parser;
