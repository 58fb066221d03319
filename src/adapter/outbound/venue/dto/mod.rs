//! Venue data transfer objects: the JSON request and response shapes.

pub mod message;
