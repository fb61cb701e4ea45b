//! Live redefinition of already-loaded classes.

use std::sync::{Arc, OnceLock};

use tracing::{debug, info};

use crate::class_path::ClassLoaderHandle;
use crate::error::{InstrumentError, Result};
use crate::facade::ClassAccessFacade;

/// A class loaded in the running VM.
pub trait RuntimeClass: Send + Sync {
    /// Binary name, dotted or internal form.
    fn name(&self) -> Result<String>;

    /// Defining loader; `None` for the bootstrap loader.
    fn loader(&self) -> Result<Option<Arc<dyn ClassLoaderHandle>>>;
}

/// One entry of a redefinition batch.
pub struct ClassDefinition<'a, C> {
    pub class: &'a C,
    pub bytes: Vec<u8>,
}

/// The runtime's redefinition primitive.
pub trait Instrumentation: Send + Sync {
    type Class: RuntimeClass;

    fn is_redefine_classes_supported(&self) -> bool;

    /// Replaces the definitions of every class in the batch, or none of them.
    fn redefine_classes(&self, definitions: &[ClassDefinition<'_, Self::Class>]) -> Result<()>;
}

/// Re-installs pristine class bytes so the load hook runs over them again.
pub struct RedefinitionCoordinator<I: Instrumentation> {
    facade: Arc<ClassAccessFacade>,
    instrumentation: OnceLock<I>,
}

impl<I: Instrumentation> RedefinitionCoordinator<I> {
    pub fn new(facade: Arc<ClassAccessFacade>) -> Self {
        Self { facade, instrumentation: OnceLock::new() }
    }

    pub fn facade(&self) -> &Arc<ClassAccessFacade> {
        &self.facade
    }

    /// Installs the runtime handle. Only the first call succeeds.
    pub fn set_instrumentation(&self, instrumentation: I) -> Result<()> {
        self.instrumentation
            .set(instrumentation)
            .map_err(|_| InstrumentError::illegal_state("Instrumentation environment was already initialized"))
    }

    pub fn instrumentation(&self) -> Result<&I> {
        self.instrumentation
            .get()
            .ok_or_else(|| InstrumentError::illegal_state("Instrumentation environment wasn't initialized"))
    }

    /// Redefines `classes` with their original bytes.
    ///
    /// The pool is recreated (keeping its search path) under the facade's
    /// exclusive lock, so every class is read afresh and any earlier
    /// transformation is absent from the submitted bytes. Reading failures are
    /// wrapped per class and abort the whole batch; a rejection by the runtime
    /// is returned as is.
    pub fn retransform(&self, classes: &[I::Class]) -> Result<()> {
        let instrumentation = self.instrumentation()?;
        if !instrumentation.is_redefine_classes_supported() {
            return Err(InstrumentError::illegal_state("The runtime doesn't support redefinition of classes"));
        }
        if classes.is_empty() {
            return Ok(());
        }

        let definitions = self.pristine_definitions(classes)?;
        info!(classes = definitions.len(), "Redefining classes");
        instrumentation.redefine_classes(&definitions)
    }

    fn pristine_definitions<'a>(&self, classes: &'a [I::Class]) -> Result<Vec<ClassDefinition<'a, I::Class>>> {
        let _exclusive = self.facade.exclusive()?;
        self.facade.renew(true);

        let mut definitions = Vec::with_capacity(classes.len());
        for (index, class) in classes.iter().enumerate() {
            let name = class.name().map_err(|source| InstrumentError::Retransform {
                class: format!("#{index}"),
                source: Box::new(source),
            })?;
            let bytes = self.pristine_bytes(class, &name).map_err(|source| InstrumentError::Retransform {
                class: name.clone(),
                source: Box::new(source),
            })?;
            debug!(class = %name, len = bytes.len(), "Read original class bytes");
            definitions.push(ClassDefinition { class, bytes });
        }
        Ok(definitions)
    }

    fn pristine_bytes(&self, class: &I::Class, name: &str) -> Result<Vec<u8>> {
        let loader = class.loader()?;
        let shared = self.facade.get_class_for_loader(loader.as_ref(), name)?;
        let mut structured = shared.lock();
        let bytes = self.facade.get_bytes(&mut structured)?;
        // Nothing was edited between the fetch and the serialization.
        structured.defrost();
        Ok(bytes)
    }
}
