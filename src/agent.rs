//! The JVMTI agent that connects the pipeline to a running VM.
//!
//! [`InstrumentationAgent`] parses its options, installs logging, requests the
//! redefinition capabilities and routes every `ClassFileLoadHook` event through
//! the configured [`TransformerChain`]. Class loaders are reached over JNI
//! (`getResourceAsStream`) so classes of any loader can be pooled; the system
//! class loader joins the pool's system path once the VM is initialized.
//! Redefinition goes through JVMTI `RedefineClasses`.

use std::any::Any;
use std::ffi::CStr;
use std::io;
use std::os::raw::{c_char, c_uchar};
use std::sync::{Arc, OnceLock};

use tracing::{debug, error, info, warn};

use crate::class_path::{ClassLoaderHandle, ClassPath};
use crate::config::{init_logging, AgentOptions};
use crate::env::{GlobalRef, JniEnv, Jvmti, LocalRef, WeakGlobalRef};
use crate::error::{InstrumentError, Result};
use crate::facade::ClassAccessFacade;
use crate::redefine::{ClassDefinition, Instrumentation, RedefinitionCoordinator, RuntimeClass};
use crate::repository::RepositoryConfig;
use crate::sys::{jni, jvmti};
use crate::transform::{TransformRequest, TransformerChain};
use crate::{get_default_callbacks, Agent};

const GET_RESOURCE_AS_STREAM: (&str, &str) = ("getResourceAsStream", "(Ljava/lang/String;)Ljava/io/InputStream;");
const READ_ALL_BYTES: (&str, &str) = ("readAllBytes", "()[B");
const CLOSE: (&str, &str) = ("close", "()V");
const GET_SYSTEM_CLASS_LOADER: (&str, &str) = ("getSystemClassLoader", "()Ljava/lang/ClassLoader;");

/// A `JavaVM` pointer; the VM outlives every thread that can see it.
#[derive(Clone, Copy)]
struct Vm(*mut jni::JavaVM);

unsafe impl Send for Vm {}
unsafe impl Sync for Vm {}

fn jni_error(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Other, format!("{what} failed with a pending Java exception"))
}

fn current_env(vm: *mut jni::JavaVM) -> io::Result<JniEnv> {
    unsafe { JniEnv::from_vm(vm) }
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "current thread isn't attached to the VM"))
}

/// A `java.lang.ClassLoader` held by a weak global reference, so pooling its
/// classes doesn't keep it from being unloaded. A collected loader finds nothing.
pub struct JvmClassLoader {
    loader: WeakGlobalRef,
}

impl JvmClassLoader {
    /// # Safety
    ///
    /// `vm` must be the running VM and `env` the current thread's environment.
    pub unsafe fn new(vm: *mut jni::JavaVM, env: &JniEnv, loader: jni::jobject) -> Option<Self> {
        WeakGlobalRef::new(vm, env, loader).map(|loader| JvmClassLoader { loader })
    }

    /// `ClassLoader.getSystemClassLoader()`; only available once the VM is initialized.
    fn system(vm: *mut jni::JavaVM, env: &JniEnv) -> io::Result<Self> {
        let (name, sig) = GET_SYSTEM_CLASS_LOADER;
        let class = env.find_class("java/lang/ClassLoader").ok_or_else(|| {
            env.take_exception();
            jni_error("FindClass")
        })?;
        let class = LocalRef::new(env, class);
        let method = env.get_static_method_id(class.get(), name, sig).ok_or_else(|| {
            env.take_exception();
            jni_error(name)
        })?;
        let loader = env.call_static_object_method(class.get(), method, &[]);
        if env.take_exception() {
            return Err(jni_error(name));
        }
        let loader = LocalRef::new(env, loader.ok_or_else(|| jni_error(name))?);
        unsafe { Self::new(vm, env, loader.get()) }
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "NewWeakGlobalRef failed for the system class loader"))
    }

    fn method(&self, env: &JniEnv, object: jni::jobject, (name, sig): (&str, &str)) -> io::Result<jni::jmethodID> {
        let class = LocalRef::new(env, env.get_object_class(object).ok_or_else(|| jni_error("GetObjectClass"))?);
        env.get_method_id(class.get(), name, sig).ok_or_else(|| {
            env.take_exception();
            jni_error(name)
        })
    }

    fn read_stream(&self, env: &JniEnv, stream: jni::jobject) -> io::Result<Vec<u8>> {
        let read_all = self.method(env, stream, READ_ALL_BYTES)?;
        let array = env.call_object_method(stream, read_all, &[]);
        if env.take_exception() {
            return Err(jni_error(READ_ALL_BYTES.0));
        }
        let array = LocalRef::new(env, array.ok_or_else(|| jni_error(READ_ALL_BYTES.0))?);
        Ok(env.get_byte_array(array.get()))
    }
}

impl ClassLoaderHandle for JvmClassLoader {
    fn find_resource(&self, resource: &str) -> io::Result<Option<Vec<u8>>> {
        let env = current_env(self.loader.vm())?;
        let Some(live) = self.loader.upgrade(&env) else {
            debug!(resource, "Class loader was collected");
            return Ok(None);
        };
        let loader = live.get();

        let get_resource = self.method(&env, loader, GET_RESOURCE_AS_STREAM)?;
        let name = env.new_string_utf(resource).ok_or_else(|| {
            env.take_exception();
            jni_error("NewStringUTF")
        })?;
        let name = LocalRef::new(&env, name);

        let stream = env.call_object_method(loader, get_resource, &[jni::jvalue { l: name.get() }]);
        if env.take_exception() {
            return Err(jni_error(GET_RESOURCE_AS_STREAM.0));
        }
        let Some(stream) = stream else {
            return Ok(None);
        };
        let stream = LocalRef::new(&env, stream);

        let bytes = self.read_stream(&env, stream.get());
        if let Ok(close) = self.method(&env, stream.get(), CLOSE) {
            env.call_void_method(stream.get(), close, &[]);
            if env.take_exception() {
                debug!(resource, "Closing the class resource stream failed");
            }
        }
        bytes.map(Some)
    }

    fn same_loader(&self, other: &dyn ClassLoaderHandle) -> bool {
        let Some(other) = other.as_any().downcast_ref::<JvmClassLoader>() else {
            return false;
        };
        if self.loader.get() == other.loader.get() {
            return true;
        }
        let Ok(env) = current_env(self.loader.vm()) else {
            return false;
        };
        // A collected loader matches nothing, not even another collected one.
        let same = match (self.loader.upgrade(&env), other.loader.upgrade(&env)) {
            (Some(a), Some(b)) => env.is_same_object(a.get(), b.get()),
            _ => false,
        };
        same
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn describe(&self) -> String {
        format!("class loader {:p}", self.loader.get())
    }
}

/// A loaded class, held by a global reference.
pub struct JvmClass {
    class: GlobalRef,
    jvmti: Arc<Jvmti>,
}

impl JvmClass {
    /// # Safety
    ///
    /// `class` must be a live `jclass` reference valid on the current thread.
    pub unsafe fn new(vm: *mut jni::JavaVM, jvmti: Arc<Jvmti>, env: &JniEnv, class: jni::jclass) -> Option<Self> {
        GlobalRef::new(vm, env, class).map(|class| JvmClass { class, jvmti })
    }

    pub fn raw(&self) -> jni::jclass {
        self.class.get()
    }
}

/// `Lcom/example/Foo;` to `com/example/Foo`; other signatures pass unchanged.
fn internal_name(signature: &str) -> &str {
    signature.strip_prefix('L').and_then(|s| s.strip_suffix(';')).unwrap_or(signature)
}

impl RuntimeClass for JvmClass {
    fn name(&self) -> Result<String> {
        let signature = self.jvmti.get_class_signature(self.class.get()).map_err(|e| {
            InstrumentError::illegal_state(format!("GetClassSignature failed: {}", self.jvmti.describe_error(e)))
        })?;
        Ok(internal_name(&signature).to_owned())
    }

    fn loader(&self) -> Result<Option<Arc<dyn ClassLoaderHandle>>> {
        let loader = self.jvmti.get_class_loader(self.class.get()).map_err(|e| {
            InstrumentError::illegal_state(format!("GetClassLoader failed: {}", self.jvmti.describe_error(e)))
        })?;
        if loader.is_null() {
            return Ok(None);
        }
        let vm = self.class.vm();
        let env = current_env(vm).map_err(|e| InstrumentError::illegal_state(e.to_string()))?;
        let handle = unsafe { JvmClassLoader::new(vm, &env, loader) };
        env.delete_local_ref(loader);
        let handle = handle.ok_or_else(|| InstrumentError::illegal_state("NewWeakGlobalRef failed for a class loader"))?;
        Ok(Some(Arc::new(handle)))
    }
}

/// Redefinition through JVMTI `RedefineClasses`.
pub struct JvmtiInstrumentation {
    jvmti: Arc<Jvmti>,
}

impl JvmtiInstrumentation {
    pub fn new(jvmti: Arc<Jvmti>) -> Self {
        Self { jvmti }
    }

    fn rejected(&self, error: jvmti::jvmtiError) -> InstrumentError {
        let reason = self.jvmti.describe_error(error);
        if error.is_redefinition_rejection() {
            InstrumentError::RedefinitionRejected { reason }
        } else {
            InstrumentError::illegal_state(format!("RedefineClasses failed: {reason}"))
        }
    }
}

impl Instrumentation for JvmtiInstrumentation {
    type Class = JvmClass;

    fn is_redefine_classes_supported(&self) -> bool {
        self.jvmti.get_capabilities().map(|caps| caps.can_redefine_classes()).unwrap_or(false)
    }

    fn redefine_classes(&self, definitions: &[ClassDefinition<'_, JvmClass>]) -> Result<()> {
        for definition in definitions {
            match self.jvmti.is_modifiable_class(definition.class.raw()) {
                Ok(true) => {}
                Ok(false) => {
                    return Err(InstrumentError::RedefinitionRejected {
                        reason: format!("class '{}' isn't modifiable", definition.class.name()?),
                    })
                }
                Err(e) => return Err(self.rejected(e)),
            }
        }

        let raw: Vec<jvmti::jvmtiClassDefinition> = definitions
            .iter()
            .map(|definition| jvmti::jvmtiClassDefinition {
                klass: definition.class.raw(),
                class_byte_count: definition.bytes.len() as jni::jint,
                class_bytes: definition.bytes.as_ptr(),
            })
            .collect();
        self.jvmti.redefine_classes(&raw).map_err(|e| self.rejected(e))
    }
}

struct AgentState {
    vm: Vm,
    jvmti: Arc<Jvmti>,
    chain: TransformerChain,
    coordinator: RedefinitionCoordinator<JvmtiInstrumentation>,
}

static STATE: OnceLock<AgentState> = OnceLock::new();

/// The coordinator of the loaded agent.
pub fn coordinator() -> Result<&'static RedefinitionCoordinator<JvmtiInstrumentation>> {
    STATE
        .get()
        .map(|state| &state.coordinator)
        .ok_or_else(|| InstrumentError::illegal_state("Instrumentation environment wasn't initialized"))
}

/// Redefines `classes` with their original bytes, re-running the load hook.
///
/// # Safety
///
/// `jni` must be the current thread's environment and every entry of
/// `classes` a live class reference.
pub unsafe fn retransform_classes(jni: *mut jni::JNIEnv, classes: &[jni::jclass]) -> Result<()> {
    let state = STATE
        .get()
        .ok_or_else(|| InstrumentError::illegal_state("Instrumentation environment wasn't initialized"))?;
    let env = JniEnv::from_raw(jni);
    let classes = classes
        .iter()
        .map(|&class| {
            JvmClass::new(state.vm.0, Arc::clone(&state.jvmti), &env, class)
                .ok_or_else(|| InstrumentError::illegal_state("NewGlobalRef failed for a class"))
        })
        .collect::<Result<Vec<_>>>()?;
    state.coordinator.retransform(&classes)
}

/// The agent exported by [`export_agent!`](crate::export_agent).
#[derive(Default)]
pub struct InstrumentationAgent;

impl InstrumentationAgent {
    fn request_capabilities(jvmti: &Jvmti) -> std::result::Result<(), jvmti::jvmtiError> {
        let mut wanted = jvmti::jvmtiCapabilities::default();
        wanted.set_can_redefine_classes(true);
        wanted.set_can_retransform_classes(true);
        wanted.set_can_generate_all_class_hook_events(true);

        let granted = wanted.intersect(&jvmti.get_potential_capabilities()?);
        if !granted.can_redefine_classes() {
            warn!("The VM can't redefine classes; retransformation will be unavailable");
        }
        jvmti.add_capabilities(&granted)
    }

    fn start(vm: *mut jni::JavaVM, options: AgentOptions) -> std::result::Result<(), String> {
        let jvmti = Jvmti::new(vm).map_err(|code| format!("GetEnv returned {code}"))?;
        let jvmti = Arc::new(jvmti);

        Self::request_capabilities(&jvmti)
            .map_err(|e| format!("AddCapabilities failed: {}", jvmti.describe_error(e)))?;

        let chain = options.build_chain().map_err(|e| e.to_string())?;
        let facade = Arc::new(ClassAccessFacade::new(RepositoryConfig::default()));
        for entry in options.search_path() {
            facade.append_search_path(entry);
        }
        let coordinator = RedefinitionCoordinator::new(facade);
        coordinator
            .set_instrumentation(JvmtiInstrumentation::new(Arc::clone(&jvmti)))
            .map_err(|e| e.to_string())?;

        let transformers = chain.len();
        let state = AgentState { vm: Vm(vm), jvmti: Arc::clone(&jvmti), chain, coordinator };
        if STATE.set(state).is_err() {
            return Err("agent was already loaded".to_owned());
        }

        jvmti
            .set_event_callbacks(get_default_callbacks())
            .map_err(|e| format!("SetEventCallbacks failed: {}", jvmti.describe_error(e)))?;
        jvmti
            .set_event_notification_mode(true, jvmti::JVMTI_EVENT_VM_INIT, std::ptr::null_mut())
            .map_err(|e| format!("enabling VMInit failed: {}", jvmti.describe_error(e)))?;
        jvmti
            .set_event_notification_mode(true, jvmti::JVMTI_EVENT_CLASS_FILE_LOAD_HOOK, std::ptr::null_mut())
            .map_err(|e| format!("enabling ClassFileLoadHook failed: {}", jvmti.describe_error(e)))?;

        info!(transformers, "Instrumentation agent loaded");
        Ok(())
    }
}

impl Agent for InstrumentationAgent {
    fn on_load(&self, vm: *mut jni::JavaVM, options: &str) -> jni::jint {
        let options: AgentOptions = match options.parse() {
            Ok(options) => options,
            Err(e) => {
                init_logging(AgentOptions::default().log_level);
                error!("Invalid agent options: {e}");
                return jni::JNI_ERR;
            }
        };
        init_logging(options.log_level);

        match Self::start(vm, options) {
            Ok(()) => jni::JNI_OK,
            Err(reason) => {
                error!("Instrumentation agent failed to load: {reason}");
                jni::JNI_ERR
            }
        }
    }

    fn vm_init(&self, jni: *mut jni::JNIEnv, _thread: jni::jthread) {
        let Some(state) = STATE.get() else {
            return;
        };
        let env = unsafe { JniEnv::from_raw(jni) };
        match JvmClassLoader::system(state.vm.0, &env) {
            Ok(loader) => {
                let entry = ClassPath::loader(Arc::new(loader));
                state.coordinator.facade().append_system_path(entry);
                debug!("System class loader added to the class pool");
            }
            Err(e) => warn!("Bootstrap classes can't be read into the class pool: {e}"),
        }
    }

    fn on_unload(&self) {
        if let Some(state) = STATE.get() {
            if let Err(e) = state.jvmti.dispose_environment() {
                debug!(code = e.0, "DisposeEnvironment failed");
            }
        }
    }

    fn class_file_load_hook(
        &self,
        jni: *mut jni::JNIEnv,
        class_being_redefined: jni::jclass,
        loader: jni::jobject,
        name: *const c_char,
        _protection_domain: jni::jobject,
        class_data_len: jni::jint,
        class_data: *const c_uchar,
        new_class_data_len: *mut jni::jint,
        new_class_data: *mut *mut c_uchar,
    ) {
        let Some(state) = STATE.get() else {
            return;
        };
        // Anonymous classes arrive without a name.
        if state.chain.is_empty() || name.is_null() || class_data.is_null() || class_data_len < 0 {
            return;
        }
        let Ok(class_name) = unsafe { CStr::from_ptr(name) }.to_str() else {
            return;
        };
        if !state.chain.wants(class_name) {
            return;
        }
        let buffer = unsafe { std::slice::from_raw_parts(class_data, class_data_len as usize) };

        let env = unsafe { JniEnv::from_raw(jni) };
        let loader: Option<Arc<dyn ClassLoaderHandle>> = if loader.is_null() {
            None
        } else {
            unsafe { JvmClassLoader::new(state.vm.0, &env, loader) }.map(|l| Arc::new(l) as Arc<dyn ClassLoaderHandle>)
        };

        let mut request = TransformRequest::new(loader.as_ref(), class_name, buffer);
        request.class_being_redefined = !class_being_redefined.is_null();

        let Some(bytes) = state.chain.transform(state.coordinator.facade(), &request) else {
            return;
        };
        match state.jvmti.allocate_copy(&bytes) {
            Ok(memory) => unsafe {
                *new_class_data_len = bytes.len() as jni::jint;
                *new_class_data = memory;
            },
            Err(e) => error!(class = class_name, "Can't hand back transformed class: {}", state.jvmti.describe_error(e)),
        }
    }
}
