//! The class-load transformation contract and its driver.
//!
//! A [`ClassTransformer`] only decides *whether* a class is a target and *how*
//! to rewrite it; [`transform`] supplies everything around that: filtering,
//! fetching the pooled class, logging and error reporting.

use std::sync::Arc;

use tracing::{debug, error, trace};

use crate::class_path::ClassLoaderHandle;
use crate::error::{ErrorChain, InstrumentError, Result};
use crate::facade::ClassAccessFacade;
use crate::structured::{SharedClass, StructuredClass};

pub mod field_write;
pub mod replace_new;
pub mod wrap_return;

pub use field_write::FieldWriteRewrite;
pub use replace_new::ReplaceNewRewrite;
pub use wrap_return::WrapReturnRewrite;

/// One class-load event as delivered by the runtime hook.
#[derive(Clone, Copy)]
pub struct TransformRequest<'a> {
    /// Defining loader; `None` for the bootstrap loader.
    pub loader: Option<&'a Arc<dyn ClassLoaderHandle>>,
    /// Internal (slash-separated) class name.
    pub class_name: &'a str,
    /// Set when the event comes from a redefinition or retransformation.
    pub class_being_redefined: bool,
    /// Bytes offered by the runtime. Transformers read the pooled class instead.
    pub buffer: &'a [u8],
}

impl<'a> TransformRequest<'a> {
    pub fn new(loader: Option<&'a Arc<dyn ClassLoaderHandle>>, class_name: &'a str, buffer: &'a [u8]) -> Self {
        Self { loader, class_name, class_being_redefined: false, buffer }
    }
}

/// A concrete class rewrite.
///
/// `rewrite` receives the shared pooled class; implementations lock it for the
/// duration of their edit since the same class may be handed to other callers.
pub trait ClassTransformer: Send + Sync {
    fn name(&self) -> &str;

    /// Whether `class_name` could be a target under some loader. Lets the caller
    /// skip resolving the loader for classes nothing wants.
    fn may_accept(&self, _class_name: &str) -> bool {
        true
    }

    /// Whether `class_name` (internal form) is a target. Must be cheap and side-effect free.
    fn accept(&self, loader: Option<&Arc<dyn ClassLoaderHandle>>, class_name: &str) -> bool;

    /// Edits `class` and returns its new bytes, or `None` if nothing was changed.
    fn rewrite(&self, facade: &ClassAccessFacade, class: &SharedClass) -> Result<Option<Vec<u8>>>;
}

/// Runs one transformer for one class-load event.
///
/// Rejected classes return `Ok(None)` without touching the pool. Failures are
/// logged with their cause chain and returned to the caller.
pub fn transform(
    transformer: &dyn ClassTransformer,
    facade: &ClassAccessFacade,
    request: &TransformRequest<'_>,
) -> Result<Option<Vec<u8>>> {
    let class_name = request.class_name;
    if !transformer.accept(request.loader, class_name) {
        return Ok(None);
    }
    debug!(transformer = transformer.name(), class = class_name, "Transforming class");

    let outcome = {
        let _shared = facade.shared();
        facade
            .get_class_for_loader(request.loader, class_name)
            .and_then(|class| transformer.rewrite(facade, &class))
    };

    match &outcome {
        Ok(Some(bytes)) => debug!(class = class_name, len = bytes.len(), "Class was successfully transformed"),
        Ok(None) => debug!(class = class_name, "No transformation was performed"),
        Err(e) => error!(
            transformer = transformer.name(),
            class = class_name,
            kind = ?e.kind(),
            "Transformation failed: {}",
            ErrorChain(e)
        ),
    }
    outcome
}

/// Transformers registered with the hook, in registration order.
#[derive(Default)]
pub struct TransformerChain {
    transformers: Vec<Box<dyn ClassTransformer>>,
}

impl TransformerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, transformer: Box<dyn ClassTransformer>) {
        self.transformers.push(transformer);
    }

    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }

    /// Whether any transformer may accept `class_name`, whatever its loader.
    pub fn wants(&self, class_name: &str) -> bool {
        self.transformers.iter().any(|transformer| transformer.may_accept(class_name))
    }

    /// Drives every transformer independently. The last buffer produced wins; a
    /// failing transformer contributes nothing, as with the runtime's own hook chain.
    pub fn transform(&self, facade: &ClassAccessFacade, request: &TransformRequest<'_>) -> Option<Vec<u8>> {
        let mut result = None;
        for transformer in &self.transformers {
            if let Ok(Some(bytes)) = transform(transformer.as_ref(), facade, request) {
                result = Some(bytes);
            }
        }
        result
    }
}

/// What a rewrite does with a class that has already been serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrozenPolicy {
    /// Leave it alone and report no transformation.
    #[default]
    Skip,
    /// Defrost it and edit anyway.
    Defrost,
}

/// Locks `class`, applies the frozen policy, runs `edit` and serializes the result.
///
/// `edit` returns whether it changed anything; an unchanged class yields `None`.
/// A failing `edit` leaves the class as it found it.
pub fn edit_unless_frozen<F>(
    facade: &ClassAccessFacade,
    class: &SharedClass,
    policy: FrozenPolicy,
    edit: F,
) -> Result<Option<Vec<u8>>>
where
    F: FnOnce(&mut StructuredClass) -> Result<bool>,
{
    let mut class = class.lock();
    if class.is_frozen() {
        match policy {
            FrozenPolicy::Skip => {
                debug!(class = class.name(), "Class wasn't transformed because it's frozen");
                return Ok(None);
            }
            FrozenPolicy::Defrost => {
                trace!(class = class.name(), "Defrosting class");
                class.defrost();
            }
        }
    }
    if !class.edit_atomically(edit)? {
        return Ok(None);
    }
    facade.get_bytes(&mut class).map(Some)
}

/// Index of the method `name` (optionally `name(descriptor)`) in `class`.
pub(crate) fn find_method(class: &StructuredClass, selector: &str) -> Result<usize> {
    let (name, descriptor) = match selector.find('(') {
        Some(at) => (&selector[..at], Some(&selector[at..])),
        None => (selector, None),
    };
    class.class_file().find_method(name, descriptor).ok_or_else(|| InstrumentError::MemberNotFound {
        class: class.name().to_owned(),
        member: format!("method '{selector}'"),
    })
}
