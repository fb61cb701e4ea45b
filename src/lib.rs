//! # jvmti-instrument
//!
//! Load-time class rewriting and live redefinition for JVM agents written in Rust.
//!
//! The crate is organised as a pipeline:
//!
//! - a [`repository::ClassRepository`] owns a lazily built class pool and the
//!   search path it reads class files from (directories, archives, or the
//!   running VM's class loaders);
//! - a [`facade::ClassAccessFacade`] is the single entry point to that pool,
//!   guarded by a fair, reentrant readers-writer lock;
//! - [`transform`] drives [`transform::ClassTransformer`]s from the
//!   `ClassFileLoadHook`, with three bundled rewrites (field write, constructor
//!   replacement, return-value wrapping);
//! - a [`redefine::RedefinitionCoordinator`] re-installs the original bytes of
//!   loaded classes so the hook rewrites them again.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │       Agent Trait + Macros (Agent, export_agent!)        │
//! │   agent::InstrumentationAgent - options, hook, JNI glue  │
//! ├─────────────────────────────────────────────────────────┤
//! │   transform  - transformer contract, driver, rewrites    │
//! │   redefine   - retransform with original class bytes     │
//! ├─────────────────────────────────────────────────────────┤
//! │   facade     - locked access to the class pool           │
//! │   repository - pool lifecycle and search path registry   │
//! │   structured - editable class with frozen state          │
//! │   classfile, bytecode - class file codec and editor      │
//! ├─────────────────────────────────────────────────────────┤
//! │   env / sys  - JVMTI and JNI wrappers and raw FFI        │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Building an agent
//!
//! ```toml
//! [lib]
//! crate-type = ["cdylib"]
//!
//! [dependencies]
//! jvmti-instrument = "0.3"
//! ```
//!
//! ```rust,ignore
//! jvmti_instrument::export_agent!();
//! ```
//!
//! ```bash
//! java -agentpath:./libagent.so=transformers=field-write,target=com/example/Counter,method=increment MyApp
//! ```
//!
//! ## Using the pipeline directly
//!
//! ```rust,ignore
//! use jvmti_instrument::prelude::*;
//! use jvmti_instrument::transform::{self, FieldWriteRewrite};
//!
//! let facade = ClassAccessFacade::default();
//! facade.append_search_path(ClassPath::from_path("target/classes"));
//!
//! let rewrite = FieldWriteRewrite::new("com/example/Counter", "increment", 2);
//! let request = TransformRequest::new(None, "com/example/Counter", &original);
//! let rewritten = transform::transform(&rewrite, &facade, &request)?;
//! ```

use std::os::raw::{c_char, c_uchar};
use std::sync::OnceLock;

pub mod agent;
pub mod bytecode;
pub mod class_path;
pub mod classfile;
pub mod config;
pub mod env;
pub mod error;
pub mod facade;
pub mod jni_wrapper;
pub mod jvmti_wrapper;
pub mod lock;
pub mod prelude;
pub mod redefine;
pub mod repository;
pub mod structured;
pub mod sys;
pub mod transform;

pub use error::{ErrorKind, InstrumentError, Result};

use sys::{jni, jvmti};

/// The event interface of a JVMTI agent.
///
/// Only the events the instrumentation pipeline needs are routed; every
/// method except [`Agent::on_load`] defaults to doing nothing.
pub trait Agent: Sync + Send {
    /// Called when the agent is loaded into the JVM.
    ///
    /// Return `JNI_OK` (0) on success, or `JNI_ERR` (-1) on failure.
    fn on_load(&self, vm: *mut jni::JavaVM, options: &str) -> jni::jint;

    /// Called when the agent is unloaded (JVM shutdown).
    fn on_unload(&self) {}

    /// Called when the VM initialization is complete.
    fn vm_init(&self, _jni: *mut jni::JNIEnv, _thread: jni::jthread) {}

    /// Called when the VM is about to terminate.
    fn vm_death(&self, _jni: *mut jni::JNIEnv) {}

    /// Called with the bytes of every class being loaded, redefined or retransformed.
    ///
    /// To replace the class, store JVMTI-allocated bytes in `new_class_data`
    /// and their length in `new_class_data_len`; leave both untouched otherwise.
    /// Requires `can_generate_all_class_hook_events` to see every class.
    #[allow(clippy::too_many_arguments)]
    fn class_file_load_hook(&self, _jni: *mut jni::JNIEnv, _class_being_redefined: jni::jclass,
                            _loader: jni::jobject, _name: *const c_char,
                            _protection_domain: jni::jobject, _class_data_len: jni::jint,
                            _class_data: *const c_uchar,
                            _new_class_data_len: *mut jni::jint,
                            _new_class_data: *mut *mut c_uchar) {}
}

// Holds the agent instance so the static C callbacks can find it.
pub static GLOBAL_AGENT: OnceLock<Box<dyn Agent>> = OnceLock::new();

/// Helper to initialize the global agent (called by the macro)
pub fn set_global_agent(agent: Box<dyn Agent>) -> std::result::Result<(), ()> {
    GLOBAL_AGENT.set(agent).map_err(|_| ())
}

unsafe extern "system" fn trampoline_vm_init(_env: *mut jvmti::jvmtiEnv, jni: *mut jni::JNIEnv, thread: jni::jthread) {
    if let Some(agent) = GLOBAL_AGENT.get() { agent.vm_init(jni, thread); }
}
unsafe extern "system" fn trampoline_vm_death(_env: *mut jvmti::jvmtiEnv, jni: *mut jni::JNIEnv) {
    if let Some(agent) = GLOBAL_AGENT.get() { agent.vm_death(jni); }
}
unsafe extern "system" fn trampoline_class_file_load_hook(
    _env: *mut jvmti::jvmtiEnv, jni: *mut jni::JNIEnv,
    class_being_redefined: jni::jclass, loader: jni::jobject, name: *const c_char,
    protection_domain: jni::jobject, class_data_len: jni::jint, class_data: *const c_uchar,
    new_class_data_len: *mut jni::jint, new_class_data: *mut *mut c_uchar
) {
    if let Some(agent) = GLOBAL_AGENT.get() {
        agent.class_file_load_hook(jni, class_being_redefined, loader, name, protection_domain, class_data_len, class_data, new_class_data_len, new_class_data);
    }
}

/// Returns callbacks routing `VMInit`, `VMDeath` and `ClassFileLoadHook` to the global agent.
///
/// Events still have to be enabled with `SetEventNotificationMode`.
pub fn get_default_callbacks() -> jvmti::jvmtiEventCallbacks {
    let mut callbacks = jvmti::jvmtiEventCallbacks::default();

    callbacks.VMInit = Some(trampoline_vm_init);
    callbacks.VMDeath = Some(trampoline_vm_death);
    callbacks.ClassFileLoadHook = Some(trampoline_class_file_load_hook);

    callbacks
}

/// Exports an agent type as a loadable JVMTI agent library.
///
/// Generates the `Agent_OnLoad` and `Agent_OnUnload` entry points the JVM
/// looks up when loading a library through `-agentpath`. Without arguments
/// the bundled [`agent::InstrumentationAgent`] is exported; otherwise the
/// given type, which must implement [`Agent`] and [`Default`].
///
/// ```rust,ignore
/// jvmti_instrument::export_agent!();
/// ```
///
/// The crate embedding the macro must be built with `crate-type = ["cdylib"]`.
/// `Agent_OnLoad` returns `JNI_ERR`, aborting VM startup, when the agent was
/// already registered or its `on_load` fails.
#[macro_export]
macro_rules! export_agent {
    () => {
        $crate::export_agent!($crate::agent::InstrumentationAgent);
    };
    ($agent_type:ty) => {
        #[no_mangle]
        pub unsafe extern "system" fn Agent_OnLoad(
            vm: *mut $crate::sys::jni::JavaVM,
            options: *mut std::ffi::c_char,
            _reserved: *mut std::ffi::c_void,
        ) -> $crate::sys::jni::jint {
            let agent = Box::new(<$agent_type>::default());
            if $crate::set_global_agent(agent).is_err() {
                return $crate::sys::jni::JNI_ERR;
            }

            let options_str = if options.is_null() {
                ""
            } else {
                std::ffi::CStr::from_ptr(options).to_str().unwrap_or("")
            };

            match $crate::GLOBAL_AGENT.get() {
                Some(global_agent) => global_agent.on_load(vm, options_str),
                None => $crate::sys::jni::JNI_ERR,
            }
        }

        #[no_mangle]
        pub unsafe extern "system" fn Agent_OnUnload(_vm: *mut $crate::sys::jni::JavaVM) {
            if let Some(agent) = $crate::GLOBAL_AGENT.get() {
                agent.on_unload();
            }
        }
    };
}
