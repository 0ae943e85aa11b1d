//! DMS core: schema model, load ordering, authorization, update cascades and the document store.

pub mod authorization;
pub mod cache;
pub mod cascade;
pub mod config;
pub mod db;
pub mod error;
pub mod jsonpath;
pub mod load_order;
pub mod schema;
