// jvmti-instrument/src/sys/jni.rs
//
// JNI (Java Native Interface) declarations used by the agent.
//
// Only the function-table slots the agent calls are named; the rest are
// kept as opaque padding so every named slot sits at its jni.h offset.
// Slot numbers below are 0-based indices into JNINativeInterface_.

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

use std::ffi::c_void;
use std::os::raw::c_char;

// =============================================================================
// Primitive Types
// =============================================================================

pub type jint = i32;
pub type jlong = i64;
pub type jbyte = i8;
pub type jboolean = u8;
pub type jchar = u16;
pub type jshort = i16;
pub type jfloat = f32;
pub type jdouble = f64;
pub type jsize = jint;

// =============================================================================
// Reference Types (opaque pointers)
// =============================================================================

pub type jobject = *mut c_void;
pub type jclass = jobject;
pub type jstring = jobject;
pub type jarray = jobject;
pub type jthread = jobject;
pub type jbyteArray = jarray;
pub type jweak = jobject;

pub type jmethodID = *mut c_void;

#[repr(C)]
#[derive(Copy, Clone)]
pub union jvalue {
    pub z: jboolean,
    pub b: jbyte,
    pub c: jchar,
    pub s: jshort,
    pub i: jint,
    pub j: jlong,
    pub f: jfloat,
    pub d: jdouble,
    pub l: jobject,
}

// =============================================================================
// Constants
// =============================================================================

pub const JNI_OK: jint = 0;
pub const JNI_ERR: jint = -1;
pub const JNI_EDETACHED: jint = -2;
pub const JNI_EVERSION: jint = -3;

pub const JNI_TRUE: jboolean = 1;
pub const JNI_FALSE: jboolean = 0;

pub const JNI_VERSION_1_8: jint = 0x00010008;

// =============================================================================
// Function table
// =============================================================================

pub type JNIEnv = *const JNINativeInterface_;

#[repr(C)]
pub struct JNINativeInterface_ {
    // 0-5: reserved, GetVersion, DefineClass
    _slots_0_5: [*mut c_void; 6],

    // 6
    pub FindClass: unsafe extern "system" fn(env: *mut JNIEnv, name: *const c_char) -> jclass,

    // 7-15: reflection, Throw*, ExceptionOccurred
    _slots_7_15: [*mut c_void; 9],

    // 16-17
    pub ExceptionDescribe: unsafe extern "system" fn(env: *mut JNIEnv),
    pub ExceptionClear: unsafe extern "system" fn(env: *mut JNIEnv),

    // 18-20: FatalError, PushLocalFrame, PopLocalFrame
    _slots_18_20: [*mut c_void; 3],

    // 21-24
    pub NewGlobalRef: unsafe extern "system" fn(env: *mut JNIEnv, lobj: jobject) -> jobject,
    pub DeleteGlobalRef: unsafe extern "system" fn(env: *mut JNIEnv, gref: jobject),
    pub DeleteLocalRef: unsafe extern "system" fn(env: *mut JNIEnv, obj: jobject),
    pub IsSameObject:
        unsafe extern "system" fn(env: *mut JNIEnv, obj1: jobject, obj2: jobject) -> jboolean,

    // 25
    pub NewLocalRef: unsafe extern "system" fn(env: *mut JNIEnv, reference: jobject) -> jobject,

    // 26-30: EnsureLocalCapacity, AllocObject, NewObject*
    _slots_26_30: [*mut c_void; 5],

    // 31
    pub GetObjectClass: unsafe extern "system" fn(env: *mut JNIEnv, obj: jobject) -> jclass,

    // 32: IsInstanceOf
    _slot_32: *mut c_void,

    // 33
    pub GetMethodID: unsafe extern "system" fn(
        env: *mut JNIEnv,
        clazz: jclass,
        name: *const c_char,
        sig: *const c_char,
    ) -> jmethodID,

    // 34-35: CallObjectMethod, CallObjectMethodV
    _slots_34_35: [*mut c_void; 2],

    // 36
    pub CallObjectMethodA: unsafe extern "system" fn(
        env: *mut JNIEnv,
        obj: jobject,
        methodID: jmethodID,
        args: *const jvalue,
    ) -> jobject,

    // 37-62: Call<Primitive>Method*
    _slots_37_62: [*mut c_void; 26],

    // 63
    pub CallVoidMethodA: unsafe extern "system" fn(
        env: *mut JNIEnv,
        obj: jobject,
        methodID: jmethodID,
        args: *const jvalue,
    ),

    // 64-112: nonvirtual calls, instance fields
    _slots_64_112: [*mut c_void; 49],

    // 113
    pub GetStaticMethodID: unsafe extern "system" fn(
        env: *mut JNIEnv,
        clazz: jclass,
        name: *const c_char,
        sig: *const c_char,
    ) -> jmethodID,

    // 114-115: CallStaticObjectMethod, CallStaticObjectMethodV
    _slots_114_115: [*mut c_void; 2],

    // 116
    pub CallStaticObjectMethodA: unsafe extern "system" fn(
        env: *mut JNIEnv,
        clazz: jclass,
        methodID: jmethodID,
        args: *const jvalue,
    ) -> jobject,

    // 117-166: remaining static calls, static fields, Unicode strings
    _slots_117_166: [*mut c_void; 50],

    // 167
    pub NewStringUTF: unsafe extern "system" fn(env: *mut JNIEnv, utf: *const c_char) -> jstring,

    // 168-170: GetStringUTFLength, GetStringUTFChars, ReleaseStringUTFChars
    _slots_168_170: [*mut c_void; 3],

    // 171
    pub GetArrayLength: unsafe extern "system" fn(env: *mut JNIEnv, array: jarray) -> jsize,

    // 172-199: array construction and element access
    _slots_172_199: [*mut c_void; 28],

    // 200
    pub GetByteArrayRegion: unsafe extern "system" fn(
        env: *mut JNIEnv,
        array: jbyteArray,
        start: jsize,
        len: jsize,
        buf: *mut jbyte,
    ),

    // 201-225: remaining regions, natives, monitors, critical access
    _slots_201_225: [*mut c_void; 25],

    // 226-227
    pub NewWeakGlobalRef: unsafe extern "system" fn(env: *mut JNIEnv, obj: jobject) -> jweak,
    pub DeleteWeakGlobalRef: unsafe extern "system" fn(env: *mut JNIEnv, reference: jweak),

    // 228
    pub ExceptionCheck: unsafe extern "system" fn(env: *mut JNIEnv) -> jboolean,
}

pub type JavaVM = *const JNIInvokeInterface_;

#[repr(C)]
pub struct JNIInvokeInterface_ {
    pub reserved0: *mut c_void,
    pub reserved1: *mut c_void,
    pub reserved2: *mut c_void,

    pub DestroyJavaVM: unsafe extern "system" fn(vm: *mut JavaVM) -> jint,
    pub AttachCurrentThread:
        unsafe extern "system" fn(vm: *mut JavaVM, penv: *mut *mut c_void, args: *mut c_void) -> jint,
    pub DetachCurrentThread: unsafe extern "system" fn(vm: *mut JavaVM) -> jint,
    pub GetEnv:
        unsafe extern "system" fn(vm: *mut JavaVM, penv: *mut *mut c_void, version: jint) -> jint,
    pub AttachCurrentThreadAsDaemon:
        unsafe extern "system" fn(vm: *mut JavaVM, penv: *mut *mut c_void, args: *mut c_void) -> jint,
}
