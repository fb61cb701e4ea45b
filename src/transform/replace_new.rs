//! Replaces `new T(args)` with a static factory call `Factory.m(args)` in every method.
//!
//! The `new T; dup` pair becomes two `nop`s and the matching
//! `invokespecial T.<init>(args)V` becomes `invokestatic Factory.m(args)LT;`.
//! Arguments are evaluated exactly as before.

use std::sync::Arc;

use tracing::{debug, trace};

use super::{edit_unless_frozen, ClassTransformer, FrozenPolicy};
use crate::bytecode::opcodes::{DUP, INVOKESPECIAL, INVOKESTATIC, NEW, NOP};
use crate::bytecode::{split_method_descriptor, CodeEditor, CompileError, Instruction};
use crate::class_path::ClassLoaderHandle;
use crate::error::Result;
use crate::facade::ClassAccessFacade;
use crate::structured::SharedClass;

const CONSTRUCTOR: &str = "<init>";

#[derive(Debug, Clone)]
pub struct ReplaceNewRewrite {
    target: String,
    replaced_type: String,
    factory_class: String,
    factory_method: String,
    policy: FrozenPolicy,
}

impl ReplaceNewRewrite {
    /// All names are internal (`a/b/C`).
    pub fn new(
        target: impl Into<String>,
        replaced_type: impl Into<String>,
        factory_class: impl Into<String>,
        factory_method: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            replaced_type: replaced_type.into(),
            factory_class: factory_class.into(),
            factory_method: factory_method.into(),
            policy: FrozenPolicy::Skip,
        }
    }

    pub fn with_frozen_policy(mut self, policy: FrozenPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn replace_allocations(&self, editor: &mut CodeEditor<'_>) -> std::result::Result<(), CompileError> {
        // (index of `new`) for allocations whose constructor call hasn't been seen yet
        let mut pending: Vec<usize> = Vec::new();
        // (new index, constructor index, constructor descriptor)
        let mut matched: Vec<(usize, usize, String)> = Vec::new();

        let cp = editor.constant_pool();
        let instructions = editor.instructions();
        for (index, insn) in instructions.iter().enumerate() {
            match insn.opcode {
                NEW => {
                    let Some(class_index) = insn.constant_index() else { continue };
                    if cp.class_name(class_index)? != self.replaced_type {
                        continue;
                    }
                    if instructions.get(index + 1).map(|next| next.opcode) != Some(DUP) {
                        return Err(CompileError::UnpairedNew {
                            class: self.replaced_type.clone(),
                            pc: insn.origin.unwrap_or(0),
                        });
                    }
                    pending.push(index);
                }
                INVOKESPECIAL if !pending.is_empty() => {
                    let Some(method_index) = insn.constant_index() else { continue };
                    let member = cp.member_ref(method_index)?;
                    if member.class != self.replaced_type || member.name != CONSTRUCTOR {
                        continue;
                    }
                    if let Some(allocation) = pending.pop() {
                        matched.push((allocation, index, member.descriptor.to_owned()));
                    }
                }
                _ => {}
            }
        }
        if let Some(&allocation) = pending.first() {
            return Err(CompileError::UnmatchedNew {
                class: self.replaced_type.clone(),
                pc: instructions[allocation].origin.unwrap_or(0),
            });
        }

        for (allocation, constructor, descriptor) in matched {
            let (params, _) = split_method_descriptor(&descriptor)?;
            let factory_descriptor = format!("({})L{};", params.concat(), self.replaced_type);
            trace!(factory = %self.factory_method, descriptor = %factory_descriptor, "Replacing constructor call");
            let factory = editor.constant_pool_mut().add_methodref(
                &self.factory_class,
                &self.factory_method,
                &factory_descriptor,
            )?;
            editor.replace(allocation, vec![Instruction::simple(NOP)]);
            editor.replace(allocation + 1, vec![Instruction::simple(NOP)]);
            editor.replace(constructor, vec![Instruction::constant(INVOKESTATIC, factory)]);
        }
        Ok(())
    }
}

impl ClassTransformer for ReplaceNewRewrite {
    fn name(&self) -> &str {
        "replace-new"
    }

    fn may_accept(&self, class_name: &str) -> bool {
        class_name == self.target
    }

    fn accept(&self, _loader: Option<&Arc<dyn ClassLoaderHandle>>, class_name: &str) -> bool {
        self.may_accept(class_name)
    }

    fn rewrite(&self, facade: &ClassAccessFacade, class: &SharedClass) -> Result<Option<Vec<u8>>> {
        edit_unless_frozen(facade, class, self.policy, |class| {
            debug!(class = class.name(), replaced = %self.replaced_type, "Replacing allocations");
            let mut changed = false;
            for index in 0..class.class_file().methods.len() {
                changed |= class.edit_method(index, |editor, _| self.replace_allocations(editor))?;
            }
            Ok(changed)
        })
    }
}
