//! Aperture: tag-indexed caching and invalidation for a photography
//! portfolio's content API.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
