//! # Modelbox Driver System
//!
//! This module provides the driver registry and loader for modelbox.
//! Drivers are shared libraries discovered on disk, catalogued by their
//! exported metadata, and activated on demand.
//!
//! ## Key Types
//!
//! - [`DriverDesc`]: Metadata identifying a driver (class, type, name, version)
//! - [`Driver`]: One registered plugin with on-demand factory activation
//! - [`DriverFactory`]: Trait implemented by plugin factories
//! - [`VirtualDriverManager`]: Factories that act as sub-registries
//! - [`Drivers`]: The process catalogue with scan, cache, and query surface
//! - [`DriverFactoryHandle`]: Shared ownership view of an active factory
//!
//! ## Lifecycle
//!
//! ```text
//!  Drivers::initialize(config)          read driver.dir / driver.skip-default
//!            │
//!  Drivers::scan()                      cache valid?  ── yes ──► rebuild from cache
//!            │ no                                                      │
//!  forked helper: walk dirs, Add()      write scan cache               │
//!            │                                                         │
//!            └────────────► virtual driver pass ◄──────────────────────┘
//!                                       │
//!  Drivers::get_driver(...)  ──►  Driver::create_factory()
//!                                       │
//!                     DriverFactoryHandle (drop = release)
//! ```
//!
//! Activation opens the library with flags derived from the descriptor
//! (`no_delete`, `global`, `deep_bind`), runs `DriverInit` once per unique
//! library handle, and builds the factory through `CreateDriverFactory`.
//! Dropping the last factory handle runs the teardown cascade; `no_delete`
//! drivers stay pinned and their finalizer never runs.

mod cache;
mod handle;
pub mod loader;
pub mod registry;
pub mod traits;
pub mod types;

pub use loader::{Driver, DriverFactoryHandle};
pub use registry::{
    Drivers, ScanResultInfo, DEFAULT_DRIVER_PATH, DEFAULT_LD_CACHE, DEFAULT_SCAN_INFO,
    DRIVER_CLASS_VIRTUAL, DRIVER_DIR_KEY, DRIVER_GLOB, DRIVER_SKIP_DEFAULT_KEY,
};
pub use traits::{
    CreateDriverFactoryFn, DriverDescriptionFn, DriverFactory, DriverFiniFn, DriverInitFn,
    VirtualDriverManager, CREATE_DRIVER_FACTORY_SYMBOL, DRIVER_DESCRIPTION_SYMBOL,
    DRIVER_FINI_SYMBOL, DRIVER_INIT_OK, DRIVER_INIT_SYMBOL,
};
pub use types::DriverDesc;
