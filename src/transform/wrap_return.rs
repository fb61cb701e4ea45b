//! Passes every value returned by one method through a static factory.
//!
//! Each `areturn` in the method is preceded by `invokestatic Factory.m(R)R`,
//! where `R` is the method's declared return type.

use std::sync::Arc;

use tracing::debug;

use super::{edit_unless_frozen, find_method, ClassTransformer, FrozenPolicy};
use crate::bytecode::opcodes::{ARETURN, INVOKESTATIC};
use crate::bytecode::{split_method_descriptor, CodeEditor, CompileError, Instruction};
use crate::class_path::ClassLoaderHandle;
use crate::classfile::MethodInfo;
use crate::error::Result;
use crate::facade::ClassAccessFacade;
use crate::structured::SharedClass;

#[derive(Debug, Clone)]
pub struct WrapReturnRewrite {
    target: String,
    method: String,
    factory_class: String,
    factory_method: String,
    policy: FrozenPolicy,
}

impl WrapReturnRewrite {
    pub fn new(
        target: impl Into<String>,
        method: impl Into<String>,
        factory_class: impl Into<String>,
        factory_method: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            method: method.into(),
            factory_class: factory_class.into(),
            factory_method: factory_method.into(),
            policy: FrozenPolicy::Skip,
        }
    }

    pub fn with_frozen_policy(mut self, policy: FrozenPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn wrap_returns(&self, editor: &mut CodeEditor<'_>, method: &MethodInfo) -> std::result::Result<(), CompileError> {
        let descriptor = method.descriptor(editor.constant_pool())?.to_owned();
        let (_, returned) = split_method_descriptor(&descriptor)?;
        if !(returned.starts_with('L') || returned.starts_with('[')) {
            return Err(CompileError::NotAReference(returned.to_owned()));
        }
        let wrapper = editor.constant_pool_mut().add_methodref(
            &self.factory_class,
            &self.factory_method,
            &format!("({returned}){returned}"),
        )?;

        let returns: Vec<usize> = editor
            .instructions()
            .iter()
            .enumerate()
            .filter(|(_, insn)| insn.opcode == ARETURN)
            .map(|(i, _)| i)
            .collect();
        for index in returns {
            editor.insert_before(index, vec![Instruction::constant(INVOKESTATIC, wrapper)]);
        }
        Ok(())
    }
}

impl ClassTransformer for WrapReturnRewrite {
    fn name(&self) -> &str {
        "wrap-return"
    }

    fn may_accept(&self, class_name: &str) -> bool {
        class_name == self.target
    }

    fn accept(&self, _loader: Option<&Arc<dyn ClassLoaderHandle>>, class_name: &str) -> bool {
        self.may_accept(class_name)
    }

    fn rewrite(&self, facade: &ClassAccessFacade, class: &SharedClass) -> Result<Option<Vec<u8>>> {
        edit_unless_frozen(facade, class, self.policy, |class| {
            let index = find_method(class, &self.method)?;
            debug!(class = class.name(), method = %self.method, "Modifying return value of the method");
            class.edit_method(index, |editor, method| self.wrap_returns(editor, method))
        })
    }
}
