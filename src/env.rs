//! High-level environment wrappers for JVMTI and JNI.
//!
//! [`Jvmti`] wraps the tool interface: capabilities, event callbacks,
//! memory handed back to the load hook, class signatures and loaders, and
//! class redefinition. [`JniEnv`] wraps the per-thread JNI environment with
//! just what is needed to call into a class loader. [`LocalRef`],
//! [`GlobalRef`] and [`WeakGlobalRef`] release references when dropped.

pub use crate::jni_wrapper::{GlobalRef, JniEnv, LocalRef, WeakGlobalRef};
pub use crate::jvmti_wrapper::Jvmti;
