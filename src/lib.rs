//! # TinyBundle
//!
//! Assembles OSGi-style bundles and deployment packages as ZIP/JAR byte streams.
//!
//! Resources are collected in a [`ResourceStore`] (or a [`StreamCache`] for deployment
//! packages), headers are computed by the [`analyzer`], and the [`writer`] emits the
//! archive either fully buffered in a temporary file or pipelined through a bounded
//! in-process pipe so the caller can start reading before the archive is complete.
//!
//! ## Key Modules
//!
//! - [`store`]: resource staging and lazy content providers.
//! - [`manifest`]: JAR manifest model, parser and serializer.
//! - [`analyzer`]: header derivation, plugins and symbolic-name enforcement.
//! - [`writer`]: archive encoding and the [`ArtifactStream`] handed to callers.
//! - [`pipe`]: the bounded producer/consumer byte pipe behind pipelined writes.
//! - [`cache`] and [`deployment`]: deployment package assembly.
//! - [`assembly`]: the high-level [`BundleAssembler`].

pub mod analyzer;
pub mod assembly;
pub mod cache;
pub mod config;
pub mod deployment;
pub mod error;
pub mod ident;
pub mod jar;
pub mod manifest;
pub mod pipe;
pub mod store;
pub mod writer;

pub use analyzer::{Analyzer, AnalyzerPlugin, DerivationEngine};
pub use assembly::{AssemblerBuilder, BuildStrategy, BundleAssembler};
pub use cache::{SpoolCache, StreamCache};
pub use config::{AssemblyConfig, Compression, WriteMode};
pub use deployment::DeploymentPackage;
pub use error::{BundleError, Result};
pub use ident::{IdentifierSource, RandomIdentifiers, SessionCounter};
pub use jar::Jar;
pub use manifest::{Headers, Manifest};
pub use store::{ContentProvider, ContentSource, ResourceStore};
pub use writer::{ArtifactStream, BuildReport};
