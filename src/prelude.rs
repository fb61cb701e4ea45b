//! Common imports for building instrumentation agents.
//!
//! Covers the pipeline types most agents touch plus the raw FFI modules.

pub use crate::class_path::{ClassLoaderHandle, ClassPath};
pub use crate::env::{GlobalRef, JniEnv, Jvmti, LocalRef};
pub use crate::error::{ErrorKind, InstrumentError};
pub use crate::export_agent;
pub use crate::facade::ClassAccessFacade;
pub use crate::get_default_callbacks;
pub use crate::redefine::{Instrumentation, RedefinitionCoordinator, RuntimeClass};
pub use crate::structured::{SharedClass, StructuredClass};
pub use crate::sys::{jni, jvmti};
pub use crate::transform::{ClassTransformer, TransformRequest, TransformerChain};
pub use crate::Agent;
