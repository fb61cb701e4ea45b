//! Raw FFI declarations.

pub mod jni;
pub mod jvmti;
