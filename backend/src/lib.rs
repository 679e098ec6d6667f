pub mod config;
pub mod context;
pub mod explain;
pub mod model;
pub mod routes;
pub mod storage;
