//! GPU asset node
//!
//! Serves image-to-3D generation jobs over HTTP on an ephemeral GPU node and
//! terminates the node through its provider API once the GPU has been idle
//! for too long.

pub mod app_state;
pub mod client;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
