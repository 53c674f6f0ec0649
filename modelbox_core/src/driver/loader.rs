//! Driver activation and factory lifecycle
//!
//! A [`Driver`] is one registered plugin. It stays dormant until a caller
//! asks for its factory; activation opens the shared library with the
//! flags derived from the descriptor, runs the plugin's one-time init
//! entrypoint, and builds the factory. The factory is handed out as a
//! shared [`DriverFactoryHandle`]; dropping the last handle tears the
//! driver back down through [`Driver::close_factory`].

use std::ops::Deref;
use std::os::raw::c_int;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use libloading::os::unix::{Library, Symbol};
use parking_lot::Mutex;

use crate::driver::handle::handle_table;
use crate::driver::traits::{
    CreateDriverFactoryFn, DriverFactory, DriverFiniFn, DriverInitFn,
    CREATE_DRIVER_FACTORY_SYMBOL, DRIVER_FINI_SYMBOL, DRIVER_INIT_OK, DRIVER_INIT_SYMBOL,
};
use crate::driver::types::DriverDesc;
use crate::error::{ModelboxError, Result};

struct DriverState {
    factory_count: i64,
    library: Option<Library>,
    raw_handle: usize,
    factory: Option<Arc<dyn DriverFactory>>,
}

/// One registered plugin.
///
/// Owns its [`DriverDesc`] and the opened library plus factory while any
/// factory handles are outstanding. All lifecycle transitions are
/// serialized by a per-driver guard; the library handle itself is shared
/// through the process-wide handle table with other drivers backed by the
/// same file.
pub struct Driver {
    desc: DriverDesc,
    is_virtual: AtomicBool,
    state: Mutex<DriverState>,
    #[cfg(test)]
    preset_factory: Option<Arc<dyn DriverFactory>>,
}

impl Driver {
    pub fn new(desc: DriverDesc) -> Self {
        Self {
            desc,
            is_virtual: AtomicBool::new(false),
            state: Mutex::new(DriverState {
                factory_count: 0,
                library: None,
                raw_handle: 0,
                factory: None,
            }),
            #[cfg(test)]
            preset_factory: None,
        }
    }

    /// Build a driver whose factory is already resident, bypassing the
    /// dynamic loader. Unit-test seam only.
    #[cfg(test)]
    pub(crate) fn with_factory(desc: DriverDesc, factory: Arc<dyn DriverFactory>) -> Self {
        let mut driver = Self::new(desc);
        driver.preset_factory = Some(factory);
        driver
    }

    pub fn desc(&self) -> &DriverDesc {
        &self.desc
    }

    /// Path of the shared library backing this driver.
    pub fn driver_file(&self) -> &str {
        self.desc.file_path()
    }

    /// Whether this driver was produced by a virtual driver manager.
    pub fn is_virtual(&self) -> bool {
        self.is_virtual.load(Ordering::Relaxed)
    }

    pub fn set_virtual(&self, is_virtual: bool) {
        self.is_virtual.store(is_virtual, Ordering::Relaxed);
    }

    /// dlopen mode derived from the descriptor flags. Eager binding, plus
    /// `RTLD_NODELETE` for pinned drivers and deep binding where the
    /// platform has it. Exactly one of global/local is selected.
    fn load_mode(desc: &DriverDesc) -> c_int {
        let mut mode = libc::RTLD_NOW;
        if desc.no_delete() {
            mode |= libc::RTLD_NODELETE;
        }

        #[cfg(target_os = "linux")]
        {
            if desc.deep_bind() {
                mode |= libc::RTLD_DEEPBIND;
            }
        }

        if desc.global() {
            mode | libc::RTLD_GLOBAL
        } else {
            mode | libc::RTLD_LOCAL
        }
    }

    /// Obtain a shared handle to this driver's factory, activating the
    /// driver on first acquisition.
    ///
    /// Concurrent callers share the same underlying factory; the driver
    /// stays active until the last handle is dropped. On failure every
    /// refcount change is unwound and the driver returns to its dormant
    /// state, remaining in the catalogue for later retries.
    pub fn create_factory(self: Arc<Self>) -> Result<DriverFactoryHandle> {
        let mut state = self.state.lock();
        state.factory_count += 1;
        if state.factory_count == 1 {
            if let Err(e) = self.activate(&mut state) {
                log::error!("create factory for {} failed: {}", self.driver_file(), e);
                self.close_locked(&mut state);
                return Err(e);
            }
        }

        let factory = match state.factory.clone() {
            Some(factory) => factory,
            None => {
                let err = ModelboxError::DriverFactory(format!(
                    "factory missing for active driver: {}",
                    self.driver_file()
                ));
                self.close_locked(&mut state);
                return Err(err);
            }
        };

        drop(state);
        Ok(DriverFactoryHandle {
            inner: Arc::new(FactoryRef {
                driver: self,
                factory,
            }),
        })
    }

    fn activate(&self, state: &mut DriverState) -> Result<()> {
        #[cfg(test)]
        {
            if let Some(factory) = &self.preset_factory {
                state.factory = Some(Arc::clone(factory));
                return Ok(());
            }
        }

        let path = self.desc.file_path().to_string();
        let mode = Self::load_mode(&self.desc);
        let library = unsafe { Library::open(Some(path.as_str()), mode) }.map_err(|e| {
            ModelboxError::Linkage(format!("dlopen {} failed, error: {}", path, e))
        })?;

        let raw = library.into_raw();
        let library = unsafe { Library::from_raw(raw) };
        let key = raw as usize;

        let entry = handle_table().acquire(key);
        {
            let mut init_count = entry.init_count();
            *init_count += 1;
            if *init_count == 1 {
                if let Err(e) = Self::run_driver_init(&library, &path) {
                    *init_count -= 1;
                    drop(init_count);
                    handle_table().release(key);
                    return Err(e);
                }
            }
        }

        let factory = {
            let create: Symbol<CreateDriverFactoryFn> =
                match unsafe { library.get(CREATE_DRIVER_FACTORY_SYMBOL.as_bytes()) } {
                    Ok(symbol) => symbol,
                    Err(e) => {
                        let err = ModelboxError::Linkage(format!(
                            "failed to dlsym function {} in file: {}, error: {}",
                            CREATE_DRIVER_FACTORY_SYMBOL, path, e
                        ));
                        self.teardown_handle(&library, key);
                        return Err(err);
                    }
                };
            unsafe { create() }
        };

        let Some(factory) = factory else {
            self.teardown_handle(&library, key);
            return Err(ModelboxError::DriverFactory(format!(
                "create driver factory failed, driver: {}",
                path
            )));
        };

        state.factory = Some(Arc::from(factory));
        state.library = Some(library);
        state.raw_handle = key;
        Ok(())
    }

    fn run_driver_init(library: &Library, path: &str) -> Result<()> {
        let init: Symbol<DriverInitFn> = unsafe { library.get(DRIVER_INIT_SYMBOL.as_bytes()) }
            .map_err(|e| {
                ModelboxError::Linkage(format!(
                    "failed to dlsym function {} in file: {}, error: {}",
                    DRIVER_INIT_SYMBOL, path, e
                ))
            })?;

        let code = unsafe { init() };
        if code != DRIVER_INIT_OK {
            return Err(ModelboxError::DriverInit(format!(
                "driver init failed with code {}, driver: {}",
                code, path
            )));
        }
        Ok(())
    }

    /// Drop this driver's init reference on the shared handle, running the
    /// plugin finalizer when the last reference goes away. Pinned
    /// (`no_delete`) entries are kept resident with their count restored,
    /// so the finalizer never runs for them.
    fn teardown_handle(&self, library: &Library, key: usize) {
        let Some(entry) = handle_table().get(key) else {
            log::error!(
                "close factory failed, missing handle entry for {}",
                self.driver_file()
            );
            return;
        };

        let mut init_count = entry.init_count();
        *init_count -= 1;
        if *init_count == 0 {
            if !self.desc.no_delete() {
                if let Ok(fini) =
                    unsafe { library.get::<DriverFiniFn>(DRIVER_FINI_SYMBOL.as_bytes()) }
                {
                    unsafe { fini() };
                }
                handle_table().release(key);
            } else {
                *init_count = 1;
            }
        }
    }

    /// Release one factory reference, tearing the driver down when it was
    /// the last. Invoked by [`DriverFactoryHandle`] on drop.
    pub(crate) fn close_factory(&self) {
        let mut state = self.state.lock();
        self.close_locked(&mut state);
    }

    fn close_locked(&self, state: &mut DriverState) {
        state.factory_count -= 1;
        if state.factory_count > 0 {
            return;
        }

        let Some(library) = state.library.take() else {
            state.factory = None;
            return;
        };
        let key = state.raw_handle;
        state.raw_handle = 0;

        self.teardown_handle(&library, key);
        state.factory = None;
        drop(library);
    }

    #[cfg(test)]
    pub(crate) fn factory_count(&self) -> i64 {
        self.state.lock().factory_count
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.factory_count != 0 {
            log::error!(
                "driver {} destroyed with {} live factory references",
                self.desc.file_path(),
                state.factory_count
            );
            std::process::abort();
        }
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("desc", &self.desc)
            .field("is_virtual", &self.is_virtual())
            .finish()
    }
}

struct FactoryRef {
    driver: Arc<Driver>,
    factory: Arc<dyn DriverFactory>,
}

impl Drop for FactoryRef {
    fn drop(&mut self) {
        self.driver.close_factory();
    }
}

/// Shared ownership view of a driver's factory.
///
/// Clones share one underlying reference; the driver's factory refcount
/// drops only when every clone of this handle is gone. Losing the handle
/// is equivalent to releasing it.
#[derive(Clone)]
pub struct DriverFactoryHandle {
    inner: Arc<FactoryRef>,
}

impl DriverFactoryHandle {
    pub fn factory(&self) -> &dyn DriverFactory {
        self.inner.factory.as_ref()
    }

    pub fn driver(&self) -> &Arc<Driver> {
        &self.inner.driver
    }
}

impl Deref for DriverFactoryHandle {
    type Target = dyn DriverFactory;

    fn deref(&self) -> &Self::Target {
        self.inner.factory.as_ref()
    }
}
