//! Safe wrapper around the JNI environment.
//!
//! Only the calls the agent needs to reach a class loader are wrapped:
//! method lookup and invocation, strings, byte arrays, references and
//! exception handling.
//!
//! ```rust,ignore
//! let env = unsafe { JniEnv::from_raw(jni_ptr) };
//! let name = LocalRef::new(&env, env.new_string_utf("com/example/Foo.class")?);
//! if env.exception_check() {
//!     env.exception_clear();
//! }
//! ```

use crate::sys::jni;
use std::ffi::{c_void, CString};
use std::ptr;

/// Safe wrapper around a JNI environment pointer.
///
/// # Thread Safety
///
/// A `JniEnv` is tied to a specific thread and cannot be sent across threads.
/// Each JVM thread has its own JNI environment.
pub struct JniEnv {
    env: *mut jni::JNIEnv,
}

impl JniEnv {
    /// Creates a JniEnv wrapper from a raw pointer.
    ///
    /// # Safety
    ///
    /// The caller must ensure the pointer is valid and comes from the current thread.
    pub unsafe fn from_raw(env: *mut jni::JNIEnv) -> Self {
        JniEnv { env }
    }

    /// Looks up the environment of the current thread.
    ///
    /// Returns `None` when the thread isn't attached to `vm`.
    ///
    /// # Safety
    ///
    /// `vm` must be a live `JavaVM` pointer.
    pub unsafe fn from_vm(vm: *mut jni::JavaVM) -> Option<Self> {
        let mut env_ptr: *mut c_void = ptr::null_mut();
        let get_env_fn = (**vm).GetEnv;
        let res = get_env_fn(vm, &mut env_ptr, jni::JNI_VERSION_1_8);
        if res != jni::JNI_OK || env_ptr.is_null() {
            return None;
        }
        Some(JniEnv { env: env_ptr as *mut jni::JNIEnv })
    }

    /// Returns the raw JNI environment pointer.
    pub fn raw(&self) -> *mut jni::JNIEnv {
        self.env
    }

    // =========================================================================
    // Exception Handling
    // =========================================================================

    /// Checks if an exception is pending.
    pub fn exception_check(&self) -> bool {
        unsafe {
            let vtable = *self.env;
            ((*vtable).ExceptionCheck)(self.env) != 0
        }
    }

    /// Clears any pending exception.
    pub fn exception_clear(&self) {
        unsafe {
            let vtable = *self.env;
            ((*vtable).ExceptionClear)(self.env);
        }
    }

    /// Clears a pending exception, reporting whether there was one.
    pub fn take_exception(&self) -> bool {
        if self.exception_check() {
            self.exception_clear();
            true
        } else {
            false
        }
    }

    // =========================================================================
    // Objects and Methods
    // =========================================================================

    /// Finds a class by its internal name through the calling method's loader.
    pub fn find_class(&self, name: &str) -> Option<jni::jclass> {
        let c_name = CString::new(name).ok()?;
        unsafe {
            let vtable = *self.env;
            let cls = ((*vtable).FindClass)(self.env, c_name.as_ptr());
            if cls.is_null() { None } else { Some(cls) }
        }
    }

    /// Gets the class of an object.
    pub fn get_object_class(&self, obj: jni::jobject) -> Option<jni::jclass> {
        unsafe {
            let vtable = *self.env;
            let cls = ((*vtable).GetObjectClass)(self.env, obj);
            if cls.is_null() { None } else { Some(cls) }
        }
    }

    /// Gets the method ID for an instance method.
    pub fn get_method_id(&self, cls: jni::jclass, name: &str, sig: &str) -> Option<jni::jmethodID> {
        let c_name = CString::new(name).ok()?;
        let c_sig = CString::new(sig).ok()?;
        unsafe {
            let vtable = *self.env;
            let mid = ((*vtable).GetMethodID)(self.env, cls, c_name.as_ptr(), c_sig.as_ptr());
            if mid.is_null() { None } else { Some(mid) }
        }
    }

    pub fn get_static_method_id(&self, cls: jni::jclass, name: &str, sig: &str) -> Option<jni::jmethodID> {
        let c_name = CString::new(name).ok()?;
        let c_sig = CString::new(sig).ok()?;
        unsafe {
            let vtable = *self.env;
            let mid = ((*vtable).GetStaticMethodID)(self.env, cls, c_name.as_ptr(), c_sig.as_ptr());
            if mid.is_null() { None } else { Some(mid) }
        }
    }

    /// Calls a static method returning an object; a null result is `None`.
    pub fn call_static_object_method(&self, cls: jni::jclass, method_id: jni::jmethodID, args: &[jni::jvalue]) -> Option<jni::jobject> {
        unsafe {
            let vtable = *self.env;
            let result = ((*vtable).CallStaticObjectMethodA)(self.env, cls, method_id, args.as_ptr());
            if result.is_null() { None } else { Some(result) }
        }
    }

    /// Calls an instance method returning an object; a null result is `None`.
    pub fn call_object_method(&self, obj: jni::jobject, method_id: jni::jmethodID, args: &[jni::jvalue]) -> Option<jni::jobject> {
        unsafe {
            let vtable = *self.env;
            let result = ((*vtable).CallObjectMethodA)(self.env, obj, method_id, args.as_ptr());
            if result.is_null() { None } else { Some(result) }
        }
    }

    /// Calls a void instance method.
    pub fn call_void_method(&self, obj: jni::jobject, method_id: jni::jmethodID, args: &[jni::jvalue]) {
        unsafe {
            let vtable = *self.env;
            ((*vtable).CallVoidMethodA)(self.env, obj, method_id, args.as_ptr());
        }
    }

    /// Checks whether two references point to the same object.
    pub fn is_same_object(&self, ref1: jni::jobject, ref2: jni::jobject) -> bool {
        unsafe {
            let vtable = *self.env;
            ((*vtable).IsSameObject)(self.env, ref1, ref2) != 0
        }
    }

    // =========================================================================
    // Strings and Arrays
    // =========================================================================

    /// Creates a new Java string from modified UTF-8.
    pub fn new_string_utf(&self, s: &str) -> Option<jni::jstring> {
        let c_str = CString::new(s).ok()?;
        unsafe {
            let vtable = *self.env;
            let jstr = ((*vtable).NewStringUTF)(self.env, c_str.as_ptr());
            if jstr.is_null() { None } else { Some(jstr) }
        }
    }

    /// Gets the length of an array.
    pub fn get_array_length(&self, array: jni::jarray) -> jni::jsize {
        unsafe {
            let vtable = *self.env;
            ((*vtable).GetArrayLength)(self.env, array)
        }
    }

    /// Copies a whole `byte[]` into a Rust vector.
    pub fn get_byte_array(&self, array: jni::jbyteArray) -> Vec<u8> {
        let len = self.get_array_length(array).max(0);
        let mut buf = vec![0u8; len as usize];
        unsafe {
            let vtable = *self.env;
            ((*vtable).GetByteArrayRegion)(self.env, array, 0, len, buf.as_mut_ptr() as *mut jni::jbyte);
        }
        buf
    }

    // =========================================================================
    // References
    // =========================================================================

    /// Creates a new global reference to an object.
    pub fn new_global_ref(&self, obj: jni::jobject) -> jni::jobject {
        unsafe {
            let vtable = *self.env;
            ((*vtable).NewGlobalRef)(self.env, obj)
        }
    }

    /// Deletes a global reference.
    pub fn delete_global_ref(&self, obj: jni::jobject) {
        unsafe {
            let vtable = *self.env;
            ((*vtable).DeleteGlobalRef)(self.env, obj);
        }
    }

    /// Creates a local reference; `None` when `obj` is a cleared weak reference.
    pub fn new_local_ref(&self, obj: jni::jobject) -> Option<jni::jobject> {
        unsafe {
            let vtable = *self.env;
            let local = ((*vtable).NewLocalRef)(self.env, obj);
            if local.is_null() { None } else { Some(local) }
        }
    }

    pub fn new_weak_global_ref(&self, obj: jni::jobject) -> jni::jweak {
        unsafe {
            let vtable = *self.env;
            ((*vtable).NewWeakGlobalRef)(self.env, obj)
        }
    }

    pub fn delete_weak_global_ref(&self, obj: jni::jweak) {
        unsafe {
            let vtable = *self.env;
            ((*vtable).DeleteWeakGlobalRef)(self.env, obj);
        }
    }

    /// Deletes a local reference.
    pub fn delete_local_ref(&self, obj: jni::jobject) {
        unsafe {
            let vtable = *self.env;
            ((*vtable).DeleteLocalRef)(self.env, obj);
        }
    }
}

// =========================================================================
// Reference Guards (RAII wrappers)
// =========================================================================

/// A guard that automatically deletes a local reference when dropped.
pub struct LocalRef<'a> {
    env: &'a JniEnv,
    obj: jni::jobject,
}

impl<'a> LocalRef<'a> {
    pub fn new(env: &'a JniEnv, obj: jni::jobject) -> Self {
        LocalRef { env, obj }
    }

    pub fn get(&self) -> jni::jobject {
        self.obj
    }
}

impl<'a> Drop for LocalRef<'a> {
    fn drop(&mut self) {
        if !self.obj.is_null() {
            self.env.delete_local_ref(self.obj);
        }
    }
}

/// A global reference that outlives the native frame it was created in.
///
/// Unlike a `JNIEnv`, a global reference may be used from any attached
/// thread, so the guard keeps the `JavaVM` and looks up the current
/// thread's environment when it is dropped.
pub struct GlobalRef {
    vm: *mut jni::JavaVM,
    obj: jni::jobject,
}

// Global references are valid on every thread attached to the VM.
unsafe impl Send for GlobalRef {}
unsafe impl Sync for GlobalRef {}

impl GlobalRef {
    /// Promotes `local_obj` to a global reference.
    ///
    /// Returns `None` if the VM refused to create the reference.
    ///
    /// # Safety
    ///
    /// `vm` must stay valid for the lifetime of the guard and `env` must
    /// belong to the current thread.
    pub unsafe fn new(vm: *mut jni::JavaVM, env: &JniEnv, local_obj: jni::jobject) -> Option<Self> {
        let global = env.new_global_ref(local_obj);
        if global.is_null() {
            return None;
        }
        Some(GlobalRef { vm, obj: global })
    }

    /// Returns the underlying global reference.
    pub fn get(&self) -> jni::jobject {
        self.obj
    }

    pub fn vm(&self) -> *mut jni::JavaVM {
        self.vm
    }
}

impl Drop for GlobalRef {
    fn drop(&mut self) {
        if self.obj.is_null() || self.vm.is_null() {
            return;
        }
        match unsafe { JniEnv::from_vm(self.vm) } {
            Some(env) => env.delete_global_ref(self.obj),
            // Detached threads can't release references; the VM reclaims them at exit.
            None => tracing::debug!("Leaking global reference dropped on a detached thread"),
        }
    }
}

/// A weak global reference: it doesn't keep its referent from being collected.
///
/// [`upgrade`](Self::upgrade) must succeed before the object is used.
pub struct WeakGlobalRef {
    vm: *mut jni::JavaVM,
    obj: jni::jweak,
}

// Weak global references are valid on every thread attached to the VM.
unsafe impl Send for WeakGlobalRef {}
unsafe impl Sync for WeakGlobalRef {}

impl WeakGlobalRef {
    /// Creates a weak reference to `obj`.
    ///
    /// Returns `None` if the VM refused to create the reference.
    ///
    /// # Safety
    ///
    /// `vm` must stay valid for the lifetime of the guard and `env` must
    /// belong to the current thread.
    pub unsafe fn new(vm: *mut jni::JavaVM, env: &JniEnv, obj: jni::jobject) -> Option<Self> {
        let weak = env.new_weak_global_ref(obj);
        if weak.is_null() {
            return None;
        }
        Some(WeakGlobalRef { vm, obj: weak })
    }

    /// A local reference to the referent, or `None` once it has been collected.
    pub fn upgrade<'a>(&self, env: &'a JniEnv) -> Option<LocalRef<'a>> {
        env.new_local_ref(self.obj).map(|local| LocalRef::new(env, local))
    }

    /// The raw weak reference; only meaningful for identity checks.
    pub fn get(&self) -> jni::jweak {
        self.obj
    }

    pub fn vm(&self) -> *mut jni::JavaVM {
        self.vm
    }
}

impl Drop for WeakGlobalRef {
    fn drop(&mut self) {
        if self.obj.is_null() || self.vm.is_null() {
            return;
        }
        match unsafe { JniEnv::from_vm(self.vm) } {
            Some(env) => env.delete_weak_global_ref(self.obj),
            None => tracing::debug!("Leaking weak reference dropped on a detached thread"),
        }
    }
}
