mod postgres;
pub(crate) use postgres::column_i32;
pub use postgres::{PostgresConfig, PostgresMetadataConn, PostgresMetadataPool};

mod types;
