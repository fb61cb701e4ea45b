// jvmti-instrument/src/sys/jvmti.rs
//
// JVMTI (JVM Tool Interface) declarations used by the agent.
//
// As in jni.rs, unused function-table slots are padding. JVMTI numbers its
// functions from 1, so slot N sits at offset (N - 1) pointers.

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

use std::os::raw::{c_char, c_uchar, c_void};

use crate::sys::jni::{jclass, jint, jlong, jobject, jthread, JNIEnv};

// --- Constants ---
pub const JVMTI_VERSION_1_2: jint = 0x30010200;

pub const JVMTI_EVENT_VM_INIT: u32 = 50;
pub const JVMTI_EVENT_VM_DEATH: u32 = 51;
pub const JVMTI_EVENT_CLASS_FILE_LOAD_HOOK: u32 = 54;

pub const JVMTI_ENABLE: jint = 1;
pub const JVMTI_DISABLE: jint = 0;

// --- Error Codes ---

/// A `jvmtiError` value. Kept open so codes added by newer VMs stay representable.
#[repr(transparent)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct jvmtiError(pub u32);

impl jvmtiError {
    pub const NONE: Self = Self(0);
    pub const INVALID_THREAD: Self = Self(10);
    pub const INVALID_CLASS: Self = Self(21);
    pub const INVALID_CLASS_FORMAT: Self = Self(60);
    pub const CIRCULAR_CLASS_DEFINITION: Self = Self(61);
    pub const FAILS_VERIFICATION: Self = Self(62);
    pub const UNSUPPORTED_REDEFINITION_METHOD_ADDED: Self = Self(63);
    pub const UNSUPPORTED_REDEFINITION_SCHEMA_CHANGED: Self = Self(64);
    pub const INVALID_TYPESTATE: Self = Self(65);
    pub const UNSUPPORTED_REDEFINITION_HIERARCHY_CHANGED: Self = Self(66);
    pub const UNSUPPORTED_REDEFINITION_METHOD_DELETED: Self = Self(67);
    pub const UNSUPPORTED_VERSION: Self = Self(68);
    pub const NAMES_DONT_MATCH: Self = Self(69);
    pub const UNSUPPORTED_REDEFINITION_CLASS_MODIFIERS_CHANGED: Self = Self(70);
    pub const UNSUPPORTED_REDEFINITION_METHOD_MODIFIERS_CHANGED: Self = Self(71);
    pub const UNSUPPORTED_REDEFINITION_CLASS_ATTRIBUTE_CHANGED: Self = Self(72);
    pub const UNMODIFIABLE_CLASS: Self = Self(79);
    pub const NOT_AVAILABLE: Self = Self(98);
    pub const MUST_POSSESS_CAPABILITY: Self = Self(99);
    pub const NULL_POINTER: Self = Self(100);
    pub const ABSENT_INFORMATION: Self = Self(101);
    pub const INVALID_EVENT_TYPE: Self = Self(102);
    pub const ILLEGAL_ARGUMENT: Self = Self(103);
    pub const OUT_OF_MEMORY: Self = Self(110);
    pub const WRONG_PHASE: Self = Self(112);
    pub const INTERNAL: Self = Self(113);

    /// Whether the code is one RedefineClasses reports for a class it refuses to replace.
    pub fn is_redefinition_rejection(self) -> bool {
        (60..=72).contains(&self.0) || self == Self::UNMODIFIABLE_CLASS || self == Self::INVALID_CLASS
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct jvmtiClassDefinition {
    pub klass: jclass,
    pub class_byte_count: jint,
    pub class_bytes: *const c_uchar,
}

// --- Capabilities ---
#[repr(C)]
#[derive(Debug, Copy, Clone, Default)]
pub struct jvmtiCapabilities {
    bits: [u32; 4],
}

impl jvmtiCapabilities {
    fn set_bit(&mut self, bit_offset: usize, value: bool) {
        let word_index = bit_offset / 32;
        let bit_index = bit_offset % 32;
        if value {
            self.bits[word_index] |= 1 << bit_index;
        } else {
            self.bits[word_index] &= !(1 << bit_index);
        }
    }

    fn get_bit(&self, bit_offset: usize) -> bool {
        let word_index = bit_offset / 32;
        let bit_index = bit_offset % 32;
        (self.bits[word_index] & (1 << bit_index)) != 0
    }

    // [9]
    pub fn set_can_redefine_classes(&mut self, v: bool) { self.set_bit(9, v); }
    pub fn can_redefine_classes(&self) -> bool { self.get_bit(9) }

    // [21]
    pub fn set_can_redefine_any_class(&mut self, v: bool) { self.set_bit(21, v); }
    pub fn can_redefine_any_class(&self) -> bool { self.get_bit(21) }

    // [26]
    pub fn set_can_generate_all_class_hook_events(&mut self, v: bool) { self.set_bit(26, v); }
    pub fn can_generate_all_class_hook_events(&self) -> bool { self.get_bit(26) }

    // [37]
    pub fn set_can_retransform_classes(&mut self, v: bool) { self.set_bit(37, v); }
    pub fn can_retransform_classes(&self) -> bool { self.get_bit(37) }

    // [38]
    pub fn set_can_retransform_any_class(&mut self, v: bool) { self.set_bit(38, v); }
    pub fn can_retransform_any_class(&self) -> bool { self.get_bit(38) }

    /// Keeps only the capabilities also set in `available`.
    pub fn intersect(&self, available: &jvmtiCapabilities) -> jvmtiCapabilities {
        let mut bits = [0; 4];
        for (i, word) in bits.iter_mut().enumerate() {
            *word = self.bits[i] & available.bits[i];
        }
        jvmtiCapabilities { bits }
    }
}

// --- Function signatures ---
pub type JvmtiSetEventNotificationModeFn = unsafe extern "system" fn(env: *mut jvmtiEnv, mode: jint, event_type: u32, event_thread: jthread) -> jvmtiError;
pub type JvmtiIsModifiableClassFn = unsafe extern "system" fn(env: *mut jvmtiEnv, klass: jclass, is_modifiable_class_ptr: *mut u8) -> jvmtiError;
pub type JvmtiAllocateFn = unsafe extern "system" fn(env: *mut jvmtiEnv, size: jlong, mem_ptr: *mut *mut u8) -> jvmtiError;
pub type JvmtiDeallocateFn = unsafe extern "system" fn(env: *mut jvmtiEnv, mem: *mut u8) -> jvmtiError;
pub type JvmtiGetClassSignatureFn = unsafe extern "system" fn(env: *mut jvmtiEnv, klass: jclass, signature_ptr: *mut *mut c_char, generic_ptr: *mut *mut c_char) -> jvmtiError;
pub type JvmtiGetClassLoaderFn = unsafe extern "system" fn(env: *mut jvmtiEnv, klass: jclass, classloader_ptr: *mut jobject) -> jvmtiError;
pub type JvmtiRedefineClassesFn = unsafe extern "system" fn(env: *mut jvmtiEnv, class_count: jint, class_definitions: *const jvmtiClassDefinition) -> jvmtiError;
pub type JvmtiGetCapabilitiesFn = unsafe extern "system" fn(env: *mut jvmtiEnv, capabilities_ptr: *mut jvmtiCapabilities) -> jvmtiError;
pub type JvmtiSetEventCallbacksFn = unsafe extern "system" fn(env: *mut jvmtiEnv, callbacks: *const jvmtiEventCallbacks, size_of_callbacks: jint) -> jvmtiError;
pub type JvmtiDisposeEnvironmentFn = unsafe extern "system" fn(env: *mut jvmtiEnv) -> jvmtiError;
pub type JvmtiGetErrorNameFn = unsafe extern "system" fn(env: *mut jvmtiEnv, error: jvmtiError, name_ptr: *mut *mut c_char) -> jvmtiError;
pub type JvmtiGetPotentialCapabilitiesFn = unsafe extern "system" fn(env: *mut jvmtiEnv, capabilities_ptr: *mut jvmtiCapabilities) -> jvmtiError;
pub type JvmtiAddCapabilitiesFn = unsafe extern "system" fn(env: *mut jvmtiEnv, capabilities_ptr: *const jvmtiCapabilities) -> jvmtiError;
pub type JvmtiRetransformClassesFn = unsafe extern "system" fn(env: *mut jvmtiEnv, class_count: jint, classes: *const jclass) -> jvmtiError;

// --- Event callback signatures ---
pub type JvmtiVMInitFn = unsafe extern "system" fn(
    jvmti_env: *mut jvmtiEnv,
    jni_env: *mut JNIEnv,
    thread: jthread
);

pub type JvmtiVMDeathFn = unsafe extern "system" fn(
    jvmti_env: *mut jvmtiEnv,
    jni_env: *mut JNIEnv
);

pub type JvmtiClassFileLoadHookFn = unsafe extern "system" fn(
    jvmti_env: *mut jvmtiEnv,
    jni_env: *mut JNIEnv,
    class_being_redefined: jclass,
    loader: jobject,
    name: *const c_char,
    protection_domain: jobject,
    class_data_len: jint,
    class_data: *const c_uchar,
    new_class_data_len: *mut jint,
    new_class_data: *mut *mut c_uchar,
);

// --- Function table ---
#[repr(C)]
pub struct jvmtiInterface_1_ {
    /*   1:  RESERVED */
    pub reserved1: *mut c_void,
    /*   2: Set Event Notification Mode */
    pub SetEventNotificationMode: Option<JvmtiSetEventNotificationModeFn>,
    /*   3-44: modules, threads, frames, locals, raw monitors, breakpoints, watches */
    _slots_3_44: [*mut c_void; 42],
    /*   45: Is Modifiable Class */
    pub IsModifiableClass: Option<JvmtiIsModifiableClassFn>,
    /*   46: Allocate */
    pub Allocate: Option<JvmtiAllocateFn>,
    /*   47: Deallocate */
    pub Deallocate: Option<JvmtiDeallocateFn>,
    /*   48: Get Class Signature */
    pub GetClassSignature: Option<JvmtiGetClassSignatureFn>,
    /*   49-56: class status, source file, modifiers, methods, fields, interfaces */
    _slots_49_56: [*mut c_void; 8],
    /*   57: Get Class Loader */
    pub GetClassLoader: Option<JvmtiGetClassLoaderFn>,
    /*   58-86: object and method queries, loaded classes */
    _slots_58_86: [*mut c_void; 29],
    /*   87: Redefine Classes */
    pub RedefineClasses: Option<JvmtiRedefineClassesFn>,
    /*   88: Get Version Number */
    _slot_88: *mut c_void,
    /*   89: Get Capabilities */
    pub GetCapabilities: Option<JvmtiGetCapabilitiesFn>,
    /*   90-121: source debug extension, heap, tagging, extension functions */
    _slots_90_121: [*mut c_void; 32],
    /*   122: Set Event Callbacks */
    pub SetEventCallbacks: Option<JvmtiSetEventCallbacksFn>,
    /*   123-126: generate events, extension functions/events, JNI function table */
    _slots_123_126: [*mut c_void; 4],
    /*   127: Dispose Environment */
    pub DisposeEnvironment: Option<JvmtiDisposeEnvironmentFn>,
    /*   128: Get Error Name */
    pub GetErrorName: Option<JvmtiGetErrorNameFn>,
    /*   129-139: JLocation format, system properties, phase, timers */
    _slots_129_139: [*mut c_void; 11],
    /*   140: Get Potential Capabilities */
    pub GetPotentialCapabilities: Option<JvmtiGetPotentialCapabilitiesFn>,
    /*   141: RESERVED */
    _slot_141: *mut c_void,
    /*   142: Add Capabilities */
    pub AddCapabilities: Option<JvmtiAddCapabilitiesFn>,
    /*   143-151: relinquish capabilities, processors, class version, constant pool, local storage, prefixes */
    _slots_143_151: [*mut c_void; 9],
    /*   152: Retransform Classes */
    pub RetransformClasses: Option<JvmtiRetransformClassesFn>,
}

#[repr(C)]
pub struct jvmtiEnv {
    pub functions: *const jvmtiInterface_1_,
}

/// Leading part of `jvmtiEventCallbacks`; the VM reads only the size it is given.
#[repr(C)]
#[derive(Copy, Clone)]
pub struct jvmtiEventCallbacks {
    pub VMInit: Option<JvmtiVMInitFn>,
    pub VMDeath: Option<JvmtiVMDeathFn>,
    pub ThreadStart: *mut c_void,
    pub ThreadEnd: *mut c_void,
    pub ClassFileLoadHook: Option<JvmtiClassFileLoadHookFn>,
}

impl Default for jvmtiEventCallbacks {
    fn default() -> Self {
        Self {
            VMInit: None,
            VMDeath: None,
            ThreadStart: std::ptr::null_mut(),
            ThreadEnd: std::ptr::null_mut(),
            ClassFileLoadHook: None,
        }
    }
}
