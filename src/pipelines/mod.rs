pub mod rqcfilter;
pub mod vertebrate_db;
