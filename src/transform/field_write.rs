//! Turns every `int` field assignment in one method into "add a constant".
//!
//! `putfield f` becomes `pop; dup; getfield f; <k>; iadd; putfield f` and
//! `putstatic f` becomes `pop; getstatic f; <k>; iadd; putstatic f`, so the
//! assigned value is discarded and the field grows by `k` instead.

use std::sync::Arc;

use tracing::{debug, trace};

use super::{edit_unless_frozen, find_method, ClassTransformer, FrozenPolicy};
use crate::bytecode::opcodes::{DUP, GETFIELD, GETSTATIC, IADD, POP, PUTFIELD, PUTSTATIC};
use crate::bytecode::{CodeEditor, CompileError, Instruction};
use crate::class_path::ClassLoaderHandle;
use crate::error::Result;
use crate::facade::ClassAccessFacade;
use crate::structured::SharedClass;

const INT_DESCRIPTOR: &str = "I";

#[derive(Debug, Clone)]
pub struct FieldWriteRewrite {
    target: String,
    method: String,
    increment: i32,
    policy: FrozenPolicy,
}

impl FieldWriteRewrite {
    /// `target` is an internal class name, `method` a name or `name(descriptor)`.
    pub fn new(target: impl Into<String>, method: impl Into<String>, increment: i32) -> Self {
        Self { target: target.into(), method: method.into(), increment, policy: FrozenPolicy::Skip }
    }

    pub fn with_frozen_policy(mut self, policy: FrozenPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn rewrite_writes(&self, editor: &mut CodeEditor<'_>) -> std::result::Result<(), CompileError> {
        let writes: Vec<(usize, u8, u16)> = editor
            .instructions()
            .iter()
            .enumerate()
            .filter(|(_, insn)| matches!(insn.opcode, PUTFIELD | PUTSTATIC))
            .filter_map(|(i, insn)| Some((i, insn.opcode, insn.constant_index()?)))
            .collect();

        for (index, opcode, field) in writes {
            let member = editor.constant_pool().member_ref(field)?;
            if member.descriptor != INT_DESCRIPTOR {
                continue;
            }
            trace!(field = member.name, descriptor = member.descriptor, "Modifying access to the field");

            let mut code = vec![Instruction::simple(POP)];
            if opcode == PUTFIELD {
                code.push(Instruction::simple(DUP));
                code.push(Instruction::constant(GETFIELD, field));
            } else {
                code.push(Instruction::constant(GETSTATIC, field));
            }
            code.push(Instruction::push_int(self.increment, editor.constant_pool_mut())?);
            code.push(Instruction::simple(IADD));
            code.push(Instruction::constant(opcode, field));
            editor.replace(index, code);
            editor.reserve_stack(1);
        }
        Ok(())
    }
}

impl ClassTransformer for FieldWriteRewrite {
    fn name(&self) -> &str {
        "field-write"
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
            debug!(class = class.name(), method = %self.method, "Transforming method");
            class.edit_method(index, |editor, _| self.rewrite_writes(editor))
        })
    }
}
