pub mod iceberg;
pub mod nessie;
