//! Romforge - ROM collection manager
//!
//! Core library providing DAT import/export, clone merging, scanning of
//! folders and archives against a game database, and rebuilding of sets.

pub mod checksum;
pub mod container;
pub mod copier;
pub mod dat;
pub mod db;
pub mod error;
pub mod merge;
pub mod model;
pub mod profile;
pub mod services;

pub use error::{Result, RomError};
