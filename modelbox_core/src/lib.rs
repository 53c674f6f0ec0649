//! # Modelbox Core
//!
//! Driver registry and loader core for the modelbox dataflow/inference
//! runtime. This crate discovers driver plugins (shared libraries) on
//! disk, catalogues their exported metadata, caches scan results across
//! process restarts, and lends live factory instances to callers with
//! deterministic ownership and teardown semantics.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use modelbox_core::{Configuration, Drivers};
//!
//! # fn main() -> modelbox_core::ModelboxResult<()> {
//! let config = Configuration::from_toml_str(
//!     r#"
//! [driver]
//! dir = ["/opt/modelbox/drivers"]
//! "#,
//! )?;
//!
//! let drivers = Drivers::global();
//! let mut drivers = drivers.lock();
//! drivers.initialize(config)?;
//! drivers.scan()?;
//!
//! if let Some(driver) = drivers.get_driver("cpu", "flowunit", "resize", "") {
//!     let factory = driver.create_factory()?;
//!     // use the factory; dropping the handle releases the driver
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Plugin ABI
//!
//! Every driver library exports C-linkage entrypoints: `DriverDescription`
//! (metadata), `DriverInit`/`DriverFini` (once per resident library), and
//! `CreateDriverFactory`. See [`driver::traits`] for the exact signatures.

pub mod config;
pub mod driver;
pub mod error;
pub(crate) mod utils;

// Re-export commonly used types for easy access
pub use config::Configuration;
pub use driver::{
    Driver, DriverDesc, DriverFactory, DriverFactoryHandle, Drivers, ScanResultInfo,
    VirtualDriverManager,
};
pub use error::{ModelboxError, ModelboxResult};
