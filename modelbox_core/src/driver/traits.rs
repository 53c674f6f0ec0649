//! Driver factory traits and the plugin ABI
//!
//! Every modelbox driver plugin is a shared library exporting C-linkage
//! entrypoints. The registry harvests metadata through
//! [`DRIVER_DESCRIPTION_SYMBOL`] and activates the driver through
//! [`DRIVER_INIT_SYMBOL`] and [`CREATE_DRIVER_FACTORY_SYMBOL`].
//!
//! # Example: Implementing a Plugin
//!
//! ```rust,ignore
//! use modelbox_core::driver::{DriverDesc, DriverFactory};
//! use std::any::Any;
//!
//! pub struct ResizeFactory;
//!
//! impl DriverFactory for ResizeFactory {
//!     fn as_any(&self) -> &dyn Any {
//!         self
//!     }
//! }
//!
//! #[no_mangle]
//! pub unsafe extern "C" fn DriverDescription(desc: *mut DriverDesc) {
//!     let desc = &mut *desc;
//!     desc.set_class("cpu");
//!     desc.set_type("flowunit");
//!     desc.set_name("resize");
//!     desc.set_description("image resize flowunit");
//!     let _ = desc.set_version("1.0.0");
//! }
//!
//! #[no_mangle]
//! pub extern "C" fn DriverInit() -> i32 {
//!     0
//! }
//!
//! #[no_mangle]
//! pub extern "C" fn CreateDriverFactory() -> Option<Box<dyn DriverFactory>> {
//!     Some(Box::new(ResizeFactory))
//! }
//!
//! #[no_mangle]
//! pub extern "C" fn DriverFini() {}
//! ```

use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;

use crate::driver::loader::Driver;
use crate::driver::registry::Drivers;
use crate::driver::types::DriverDesc;
use crate::error::Result;

/// Factory object a plugin hands back from `CreateDriverFactory`.
///
/// The registry does not interpret the factory beyond lifecycle; consumers
/// downcast through [`DriverFactory::as_any`] to the plugin's concrete
/// type. Implementations must be thread-safe: multiple callers share one
/// factory instance.
pub trait DriverFactory: Send + Sync {
    /// Access the concrete factory type for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Present this factory as a virtual driver manager, if it is one.
    ///
    /// Drivers of class `"virtual"` return `Some` here; the registry uses
    /// it during the virtual-driver pass.
    fn as_virtual_manager(&self) -> Option<&dyn VirtualDriverManager> {
        None
    }
}

/// A factory that acts as a sub-registry, producing further drivers.
///
/// Returned by drivers whose class is [`DRIVER_CLASS_VIRTUAL`]; the
/// registry initializes the manager against itself, lets it scan the
/// configured directories, and appends every driver it produced.
///
/// [`DRIVER_CLASS_VIRTUAL`]: crate::driver::registry::DRIVER_CLASS_VIRTUAL
pub trait VirtualDriverManager: DriverFactory {
    /// Give the manager access to the registry it extends.
    fn init(&self, drivers: &Drivers) -> Result<()>;

    /// Scan the configured driver directories for virtual drivers.
    fn scan(&self, dirs: &[PathBuf]) -> Result<()>;

    /// Drivers produced by the preceding [`scan`](Self::scan).
    fn drivers(&self) -> Vec<Arc<Driver>>;
}

/// Symbol populating a [`DriverDesc`] during registration. Mandatory.
pub const DRIVER_DESCRIPTION_SYMBOL: &str = "DriverDescription";

/// Symbol initializing the plugin once per resident library. Mandatory
/// when the driver is activated.
pub const DRIVER_INIT_SYMBOL: &str = "DriverInit";

/// Symbol constructing the plugin's factory. Mandatory when the driver is
/// activated.
pub const CREATE_DRIVER_FACTORY_SYMBOL: &str = "CreateDriverFactory";

/// Symbol finalizing the plugin. Optional; never called for `no_delete`
/// drivers.
pub const DRIVER_FINI_SYMBOL: &str = "DriverFini";

/// `DriverInit` return value signalling success.
pub const DRIVER_INIT_OK: i32 = 0;

/// Type of the `DriverDescription` entrypoint.
pub type DriverDescriptionFn = unsafe extern "C" fn(*mut DriverDesc);

/// Type of the `DriverInit` entrypoint. Returns [`DRIVER_INIT_OK`] on
/// success, any other value as the plugin's error code.
pub type DriverInitFn = unsafe extern "C" fn() -> i32;

/// Type of the `CreateDriverFactory` entrypoint. `None` means the plugin
/// failed to build its factory.
#[allow(improper_ctypes_definitions)]
pub type CreateDriverFactoryFn = unsafe extern "C" fn() -> Option<Box<dyn DriverFactory>>;

/// Type of the optional `DriverFini` entrypoint.
pub type DriverFiniFn = unsafe extern "C" fn();
