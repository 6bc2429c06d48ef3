pub mod connection;
pub mod schema;

pub use connection::{init_db, MullDb};
pub use schema::apply_schema;
