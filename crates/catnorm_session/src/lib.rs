mod controller;
mod error;
mod pipeline;

pub use controller::NormalizationService;
pub use error::{Result, SessionError};
