//! Editable class representation held by a [`ClassPool`](crate::repository::ClassPool).

use std::sync::Arc;

use parking_lot::Mutex;

use crate::bytecode::{CodeEditor, CompileError};
use crate::classfile::{ClassFile, MethodInfo};
use crate::error::{InstrumentError, Result};

/// Handle to a pooled class. Every lookup of the same name in the same pool returns a clone of the same handle.
pub type SharedClass = Arc<Mutex<StructuredClass>>;

#[derive(Debug)]
pub struct StructuredClass {
    name: String,
    file: ClassFile,
    original: Arc<[u8]>,
    frozen: bool,
    dirty: bool,
}

impl StructuredClass {
    /// Parses `bytes` as the class named `name` (dotted form).
    pub fn parse(name: &str, bytes: &[u8]) -> Result<Self> {
        let file = ClassFile::parse(bytes).map_err(|e| InstrumentError::malformed(name, e))?;
        let declared = file
            .this_class_name()
            .map_err(|e| InstrumentError::malformed(name, e))?
            .replace('/', ".");
        if declared != name {
            return Err(InstrumentError::illegal_state(format!(
                "Class file for '{name}' declares class '{declared}'"
            )));
        }
        Ok(Self { name: declared, file, original: Arc::from(bytes), frozen: false, dirty: false })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Once frozen, the class refuses edits until [`defrost`](Self::defrost) is called.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn defrost(&mut self) {
        self.frozen = false;
    }

    pub fn is_modified(&self) -> bool {
        self.dirty
    }

    pub fn class_file(&self) -> &ClassFile {
        &self.file
    }

    pub fn class_file_mut(&mut self) -> Result<&mut ClassFile> {
        self.check_not_frozen()?;
        self.dirty = true;
        Ok(&mut self.file)
    }

    /// Names and descriptors of all declared methods.
    pub fn methods(&self) -> Vec<(String, String)> {
        let cp = &self.file.constant_pool;
        self.file
            .methods
            .iter()
            .filter_map(|m| Some((m.name(cp).ok()?.to_owned(), m.descriptor(cp).ok()?.to_owned())))
            .collect()
    }

    /// Runs `edit` over the body of method `index`. Returns `Ok(false)` if it had no body or nothing changed.
    pub fn edit_method<F>(&mut self, index: usize, edit: F) -> Result<bool>
    where
        F: FnOnce(&mut CodeEditor<'_>, &MethodInfo) -> std::result::Result<(), CompileError>,
    {
        self.check_not_frozen()?;
        let name = self.name.clone();
        let file = &mut self.file;
        let method = file
            .methods
            .get(index)
            .cloned()
            .ok_or_else(|| InstrumentError::illegal_state(format!("Method #{index} doesn't exist in '{name}'")))?;
        let Some(code) = method.code() else {
            return Ok(false);
        };
        let compile = |e| InstrumentError::compile(name.as_str(), e);

        let mut editor = CodeEditor::new(&mut file.constant_pool, code).map_err(compile)?;
        edit(&mut editor, &method).map_err(compile)?;
        if !editor.is_modified() {
            return Ok(false);
        }
        let code = file.methods[index]
            .code_mut()
            .ok_or_else(|| InstrumentError::illegal_state(format!("Method #{index} of '{name}' lost its code")))?;
        editor.apply(code).map_err(compile)?;
        self.dirty = true;
        Ok(true)
    }

    /// Runs `edit` as one unit: if it fails, every change it made to the class is undone.
    pub fn edit_atomically<T, F>(&mut self, edit: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let file = self.file.clone();
        let dirty = self.dirty;
        edit(self).map_err(|e| {
            self.file = file;
            self.dirty = dirty;
            e
        })
    }

    /// Serializes the class and freezes it. An unmodified class yields its original bytes.
    pub fn to_bytecode(&mut self) -> Vec<u8> {
        self.frozen = true;
        if self.dirty {
            self.file.to_bytes()
        } else {
            self.original.to_vec()
        }
    }

    fn check_not_frozen(&self) -> Result<()> {
        if self.frozen {
            Err(InstrumentError::illegal_state(format!("Class '{}' is frozen", self.name)))
        } else {
            Ok(())
        }
    }
}
