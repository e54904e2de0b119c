#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]
//! Api contains the versions of the ImageScan CRDs.

pub mod image;
pub mod v1beta1;

/// GROUP is the kubernetes API group.
pub static GROUP: &str = "imagescan.dev";
