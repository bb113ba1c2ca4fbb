pub mod error;

pub use error::{KeywheelError, Result};
