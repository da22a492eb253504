//! HTTP surface

pub mod api;
