//! Custom Resource Definitions for the image reflector
//!
//! This module defines the ImageRepository and ImagePolicy CRDs.

mod image_policy;
mod image_repository;
pub mod types;

#[cfg(test)]
mod tests;

pub use image_policy::{ImagePolicy, ImagePolicySpec, ImagePolicyStatus};
pub use image_repository::{
    ImageRepository, ImageRepositorySpec, ImageRepositoryStatus, RECONCILE_REQUEST_ANNOTATION,
    SIGNATURE_TAG_PATTERN,
};
pub use types::*;
