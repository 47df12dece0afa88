pub mod buckets;
pub mod engine;
pub mod errors;
pub mod hasher;
pub mod mime;
pub mod paths;
pub mod validate;
