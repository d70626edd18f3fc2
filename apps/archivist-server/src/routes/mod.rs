//! Route modules for Archivist Server

pub mod health;
pub mod upload;
