//! Turns annotated module descriptions into Kubernetes manifests and a Docker
//! build context per module.
//!
//! [`input`] describes what a compiler front end hands over, [`processors`]
//! fold annotations into the [`model`], [`validate`] checks it and
//! [`generators`] render it. [`artifacts::ArtifactManager`] drives a module
//! through all of it.

pub mod artifacts;
pub mod config;
pub mod defaults;
pub mod docker;
pub mod error;
pub mod generators;
pub mod input;
pub mod model;
pub mod names;
pub mod processors;
pub mod registry;
pub mod validate;
