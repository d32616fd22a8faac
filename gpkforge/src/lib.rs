//! GpkForge - package loading, resolution, and rewrite engine
//!
//! This library decodes binary asset containers ("packages") into a live,
//! lazily populated object graph, resolves references across packages and
//! composite containers, and re-serializes modified packages back to disk,
//! optionally preserving byte-exact offsets for unchanged objects.
//!
//! The expected flow: build a [`Registry`] from an [`EngineConfig`], run
//! [`bootstrap::bootstrap`] once to populate the class map, then open
//! packages through the registry and work with their objects.

pub mod bootstrap;
pub mod codec;
pub mod compress;
pub mod config;
pub mod error;
pub mod index;
pub mod logging;
pub mod mapper;
pub mod names;
pub mod object;
pub mod package;
pub mod properties;
pub mod registry;
pub mod resolver;
pub mod save;
pub mod tables;
pub mod task;
pub mod telemetry;

pub use codec::{CompressionFlags, Guid, PackageFlags, PackageSummary};
pub use config::{ConfigError, EngineConfig};
pub use error::{FormatError, FormatResult};
pub use index::PackageIndex;
pub use object::{LiveObject, LoadOutcome, LoadState, SharedObject};
pub use package::{Package, PackageTables};
pub use registry::Registry;
pub use save::{save_package, SaveError, SaveOptions, SaveResult};
pub use task::{CancelFlag, LoadTask};
