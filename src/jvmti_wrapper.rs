// jvmti-instrument/src/jvmti_wrapper.rs
use crate::sys::jni;
use crate::sys::jvmti;
use std::ffi::CStr;
use std::os::raw::c_char;
use std::ptr;

/// A safe wrapper around the raw JVMTI Environment pointer.
pub struct Jvmti {
    env: *mut jvmti::jvmtiEnv,
}

// A jvmtiEnv may be used from any thread once created.
unsafe impl Send for Jvmti {}
unsafe impl Sync for Jvmti {}

/// Resolves a function-table slot; an empty slot reads as NOT_AVAILABLE.
fn resolve<F>(slot: Option<F>) -> Result<F, jvmti::jvmtiError> {
    slot.ok_or(jvmti::jvmtiError::NOT_AVAILABLE)
}

fn check(err: jvmti::jvmtiError) -> Result<(), jvmti::jvmtiError> {
    if err == jvmti::jvmtiError::NONE {
        Ok(())
    } else {
        Err(err)
    }
}

impl Jvmti {
    /// Connects to the JVM and retrieves the JVMTI environment.
    pub fn new(vm: *mut jni::JavaVM) -> Result<Self, jni::jint> {
        let mut env_ptr: *mut std::ffi::c_void = ptr::null_mut();

        unsafe {
            // vm: *mut JavaVM = *mut *const JNIInvokeInterface_
            let get_env_fn = (**vm).GetEnv;
            let res = get_env_fn(vm, &mut env_ptr, jvmti::JVMTI_VERSION_1_2);
            if res != jni::JNI_OK {
                return Err(res);
            }
        }

        Ok(Jvmti {
            env: env_ptr as *mut jvmti::jvmtiEnv,
        })
    }

    /// Create a Jvmti wrapper from a raw jvmtiEnv pointer
    ///
    /// # Safety
    /// The caller must ensure the pointer is valid for the duration of use.
    pub unsafe fn from_raw(env: *mut jvmti::jvmtiEnv) -> Self {
        Jvmti { env }
    }

    pub fn raw(&self) -> *mut jvmti::jvmtiEnv {
        self.env
    }

    pub fn get_capabilities(&self) -> Result<jvmti::jvmtiCapabilities, jvmti::jvmtiError> {
        let mut caps = jvmti::jvmtiCapabilities::default();
        unsafe {
            let get_caps_fn = resolve((*(*self.env).functions).GetCapabilities)?;
            check(get_caps_fn(self.env, &mut caps))?;
        }
        Ok(caps)
    }

    pub fn get_potential_capabilities(&self) -> Result<jvmti::jvmtiCapabilities, jvmti::jvmtiError> {
        let mut caps = jvmti::jvmtiCapabilities::default();
        unsafe {
            let get_pot_caps_fn = resolve((*(*self.env).functions).GetPotentialCapabilities)?;
            check(get_pot_caps_fn(self.env, &mut caps))?;
        }
        Ok(caps)
    }

    pub fn add_capabilities(&self, new_caps: &jvmti::jvmtiCapabilities) -> Result<(), jvmti::jvmtiError> {
        unsafe {
            let add_caps_fn = resolve((*(*self.env).functions).AddCapabilities)?;
            check(add_caps_fn(self.env, new_caps))
        }
    }

    pub fn set_event_callbacks(&self, callbacks: jvmti::jvmtiEventCallbacks) -> Result<(), jvmti::jvmtiError> {
        unsafe {
            let set_callbacks_fn = resolve((*(*self.env).functions).SetEventCallbacks)?;
            let size = std::mem::size_of::<jvmti::jvmtiEventCallbacks>() as jni::jint;
            check(set_callbacks_fn(self.env, &callbacks, size))
        }
    }

    pub fn set_event_notification_mode(&self, enable: bool, event_type: u32, thread: jni::jthread) -> Result<(), jvmti::jvmtiError> {
        unsafe {
            let set_mode_fn = resolve((*(*self.env).functions).SetEventNotificationMode)?;
            let mode = if enable { jvmti::JVMTI_ENABLE } else { jvmti::JVMTI_DISABLE };
            // thread can be null (all threads)
            check(set_mode_fn(self.env, mode, event_type, thread))
        }
    }

    pub fn allocate(&self, size: jni::jlong) -> Result<*mut u8, jvmti::jvmtiError> {
        let mut mem_ptr: *mut u8 = ptr::null_mut();
        unsafe {
            let allocate_fn = resolve((*(*self.env).functions).Allocate)?;
            check(allocate_fn(self.env, size, &mut mem_ptr))?;
        }
        Ok(mem_ptr)
    }

    pub fn deallocate(&self, mem: *mut u8) -> Result<(), jvmti::jvmtiError> {
        if mem.is_null() {
            return Ok(());
        }
        unsafe {
            let deallocate_fn = resolve((*(*self.env).functions).Deallocate)?;
            check(deallocate_fn(self.env, mem))
        }
    }

    /// Copies `bytes` into JVMTI-owned memory, as the load hook must hand back.
    pub fn allocate_copy(&self, bytes: &[u8]) -> Result<*mut u8, jvmti::jvmtiError> {
        let mem = self.allocate(bytes.len() as jni::jlong)?;
        if mem.is_null() {
            return Err(jvmti::jvmtiError::OUT_OF_MEMORY);
        }
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), mem, bytes.len()) };
        Ok(mem)
    }

    /// Takes ownership of a JVMTI-allocated C string.
    unsafe fn take_string(&self, chars: *mut c_char) -> Result<String, jvmti::jvmtiError> {
        let value = CStr::from_ptr(chars).to_string_lossy().into_owned();
        self.deallocate(chars as *mut u8)?;
        Ok(value)
    }

    /// Returns the type signature of `klass`, e.g. `Lcom/example/Foo;`.
    pub fn get_class_signature(&self, klass: jni::jclass) -> Result<String, jvmti::jvmtiError> {
        let mut sig_ptr: *mut c_char = ptr::null_mut();
        unsafe {
            let get_class_sig_fn = resolve((*(*self.env).functions).GetClassSignature)?;
            // generic_ptr may be null when the generic signature isn't wanted
            check(get_class_sig_fn(self.env, klass, &mut sig_ptr, ptr::null_mut()))?;
            if sig_ptr.is_null() {
                return Err(jvmti::jvmtiError::NULL_POINTER);
            }
            self.take_string(sig_ptr)
        }
    }

    /// Returns the defining loader of `klass`; null for the bootstrap loader.
    pub fn get_class_loader(&self, klass: jni::jclass) -> Result<jni::jobject, jvmti::jvmtiError> {
        let mut loader: jni::jobject = ptr::null_mut();
        unsafe {
            let get_class_loader_fn = resolve((*(*self.env).functions).GetClassLoader)?;
            check(get_class_loader_fn(self.env, klass, &mut loader))?;
        }
        Ok(loader)
    }

    pub fn is_modifiable_class(&self, klass: jni::jclass) -> Result<bool, jvmti::jvmtiError> {
        let mut modifiable: u8 = 0;
        unsafe {
            let is_modifiable_fn = resolve((*(*self.env).functions).IsModifiableClass)?;
            check(is_modifiable_fn(self.env, klass, &mut modifiable))?;
        }
        Ok(modifiable != 0)
    }

    pub fn redefine_classes(&self, class_definitions: &[jvmti::jvmtiClassDefinition]) -> Result<(), jvmti::jvmtiError> {
        unsafe {
            let redefine_classes_fn = resolve((*(*self.env).functions).RedefineClasses)?;
            check(redefine_classes_fn(self.env, class_definitions.len() as jni::jint, class_definitions.as_ptr()))
        }
    }

    pub fn get_error_name(&self, error: jvmti::jvmtiError) -> Result<String, jvmti::jvmtiError> {
        let mut name_ptr: *mut c_char = ptr::null_mut();
        unsafe {
            let get_error_name_fn = resolve((*(*self.env).functions).GetErrorName)?;
            check(get_error_name_fn(self.env, error, &mut name_ptr))?;
            if name_ptr.is_null() {
                return Err(jvmti::jvmtiError::NULL_POINTER);
            }
            self.take_string(name_ptr)
        }
    }

    /// Describes `error` by name, falling back to its numeric code.
    pub fn describe_error(&self, error: jvmti::jvmtiError) -> String {
        match self.get_error_name(error) {
            Ok(name) => format!("{name} ({})", error.0),
            Err(_) => format!("JVMTI error {}", error.0),
        }
    }

    pub fn dispose_environment(&self) -> Result<(), jvmti::jvmtiError> {
        unsafe {
            let dispose_env_fn = resolve((*(*self.env).functions).DisposeEnvironment)?;
            check(dispose_env_fn(self.env))
        }
    }
}
