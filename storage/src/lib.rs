mod error;
mod remove;
mod uploads;

pub use error::*;
pub use remove::*;
pub use uploads::*;
