mod attachments;
mod error;
mod json_file;
mod log;
mod options;
mod settings;

pub use attachments::*;
pub use error::*;
pub use log::*;
pub use options::*;
pub use settings::*;
