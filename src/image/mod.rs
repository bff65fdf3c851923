pub mod loader;
pub mod preprocessing;
pub mod transforms;

pub use loader::{ImageLoader, UploadLimits};
pub use preprocessing::ImagePreprocessor;
pub use transforms::ImageTransforms;
