//! Image Reflector: Kubernetes controller for container image metadata
//!
//! This crate scans container registries for the tags of the repositories
//! named by `ImageRepository` objects and selects the latest tag for each
//! `ImagePolicy` according to a semver, alphabetical or numerical ordering.

pub mod controller;
pub mod crd;
pub mod database;
pub mod error;
pub mod policy;
pub mod registry;

#[cfg(feature = "rest-api")]
pub mod rest_api;

pub use crate::error::{Error, Result};
