mod preferences;
mod schema;
mod types;
mod watermark;

pub use schema::Database;
pub use types::DatabaseError;
pub use watermark::WatermarkStore;
