pub mod config;
pub mod diagnosis;
pub mod image;
pub mod models;
pub mod utils;
pub mod validation;
pub mod web;

pub use config::Config;
pub use diagnosis::{DiseasePrediction, PredictionMap};
pub use utils::error::RetinaError;

pub type Result<T> = std::result::Result<T, RetinaError>;
