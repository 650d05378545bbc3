//! Domain Layer
//!
//! Pure failover model: entities, value objects, ports and services.

pub mod entities;
pub mod errors;
pub mod ports;
pub mod services;
pub mod value_objects;
