mod convert;
mod error;
mod input;
mod record;
mod schema;
mod splitter;
mod stats;

pub use error::{Error, ErrorKind, Result};
pub use input::CsvFileInput;
pub use schema::{FieldInfo, FieldKind, Schema};
pub use stats::CsvFileStats;
