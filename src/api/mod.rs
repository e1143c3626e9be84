//! HTTP serving surface

pub mod handlers;
pub mod routes;
