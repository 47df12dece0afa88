pub mod db;
pub mod migrate;
pub mod models;
pub mod repos;
