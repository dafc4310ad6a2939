pub mod params;
pub mod rows;

pub use params::{bind_all, SqlParam};
pub use rows::{row_to_json, rows_to_json};
