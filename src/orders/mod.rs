//! Cash-on-delivery orders: the order document and its lifecycle.

pub mod model;
pub mod service;
