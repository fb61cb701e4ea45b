// A small interpreter for the int/reference subset of the JVM instruction set
// the sample classes use. Rewritten classes are executed to check behavior
// instead of comparing byte sequences.

use std::collections::HashMap;

use jvmti_instrument::classfile::{ClassFile, CpInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Int(i32),
    Null,
    Ref(usize),
}

impl Value {
    pub fn int(self) -> i32 {
        match self {
            Value::Int(v) => v,
            other => panic!("expected int, got {other:?}"),
        }
    }

    pub fn reference(self) -> Option<usize> {
        match self {
            Value::Ref(r) => Some(r),
            Value::Null => None,
            other => panic!("expected reference, got {other:?}"),
        }
    }
}

#[derive(Debug, Default)]
pub struct Object {
    pub class: String,
    pub fields: HashMap<String, Value>,
}

type Native = Box<dyn Fn(&mut Machine, &[Value]) -> Option<Value>>;

#[derive(Default)]
pub struct Machine {
    classes: HashMap<String, ClassFile>,
    natives: HashMap<(String, String), Native>,
    pub heap: Vec<Object>,
    pub statics: HashMap<String, Value>,
}

fn default_value(descriptor: &str) -> Value {
    if descriptor == "I" || descriptor == "Z" || descriptor == "B" || descriptor == "S" || descriptor == "C" {
        Value::Int(0)
    } else {
        Value::Null
    }
}

fn argument_count(descriptor: &str) -> usize {
    let params = &descriptor[1..descriptor.find(')').unwrap()];
    let mut count = 0;
    let mut chars = params.chars();
    while let Some(c) = chars.next() {
        match c {
            'L' => {
                for c in chars.by_ref() {
                    if c == ';' {
                        break;
                    }
                }
            }
            '[' => continue,
            'J' | 'D' => panic!("wide arguments aren't supported"),
            _ => {}
        }
        count += 1;
    }
    count
}

fn u2_at(code: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([code[at], code[at + 1]])
}

fn branch(code: &[u8], pc: usize) -> usize {
    (pc as i64 + i16::from_be_bytes([code[pc + 1], code[pc + 2]]) as i64) as usize
}

impl Machine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a class file; a class loaded twice replaces the earlier definition.
    pub fn load(&mut self, bytes: &[u8]) -> &mut Self {
        let class = ClassFile::parse(bytes).expect("loadable class");
        let name = class.this_class_name().unwrap().to_owned();
        self.classes.insert(name, class);
        self
    }

    /// Registers a native static method.
    pub fn native<F>(&mut self, class: &str, name: &str, f: F) -> &mut Self
    where
        F: Fn(&mut Machine, &[Value]) -> Option<Value> + 'static,
    {
        self.natives.insert((class.to_owned(), name.to_owned()), Box::new(f));
        self
    }

    pub fn alloc(&mut self, class: &str) -> Value {
        self.heap.push(Object { class: class.to_owned(), fields: HashMap::new() });
        Value::Ref(self.heap.len() - 1)
    }

    pub fn object(&self, value: Value) -> &Object {
        &self.heap[value.reference().expect("non-null reference")]
    }

    pub fn field(&self, value: Value, name: &str) -> Option<Value> {
        self.object(value).fields.get(name).copied()
    }

    /// Allocates `class` and runs its `descriptor` constructor.
    pub fn construct(&mut self, class: &str, descriptor: &str, args: &[Value]) -> Value {
        let object = self.alloc(class);
        let mut all = vec![object];
        all.extend_from_slice(args);
        self.invoke(class, "<init>", descriptor, &all);
        object
    }

    pub fn invoke(&mut self, class: &str, name: &str, descriptor: &str, args: &[Value]) -> Option<Value> {
        let key = (class.to_owned(), name.to_owned());
        if let Some(native) = self.natives.remove(&key) {
            let result = native(self, args);
            self.natives.insert(key, native);
            return result;
        }
        if class == "java/lang/Object" && name == "<init>" {
            return None;
        }
        let file = self.classes.get(class).unwrap_or_else(|| panic!("class {class} isn't loaded")).clone();
        let index = file
            .find_method(name, Some(descriptor))
            .unwrap_or_else(|| panic!("{class}.{name}{descriptor} doesn't exist"));
        self.execute(&file, index, args)
    }

    fn member(file: &ClassFile, index: u16) -> (String, String, String) {
        let member = file.constant_pool.member_ref(index).unwrap();
        (member.class.to_owned(), member.name.to_owned(), member.descriptor.to_owned())
    }

    fn static_key(class: &str, name: &str) -> String {
        format!("{class}.{name}")
    }

    fn execute(&mut self, file: &ClassFile, method: usize, args: &[Value]) -> Option<Value> {
        let code = file.methods[method].code().expect("method with code");
        let bytes = &code.code;
        let mut locals = vec![Value::Null; code.max_locals as usize];
        locals[..args.len()].copy_from_slice(args);
        let mut stack: Vec<Value> = Vec::with_capacity(code.max_stack as usize);
        let mut pc = 0usize;

        loop {
            assert!(stack.len() <= code.max_stack as usize, "operand stack exceeds max_stack at pc {pc}");
            let opcode = bytes[pc];
            match opcode {
                0x00 => pc += 1,
                0x01 => {
                    stack.push(Value::Null);
                    pc += 1;
                }
                0x02..=0x08 => {
                    stack.push(Value::Int(opcode as i32 - 0x03));
                    pc += 1;
                }
                0x10 => {
                    stack.push(Value::Int(bytes[pc + 1] as i8 as i32));
                    pc += 2;
                }
                0x11 => {
                    stack.push(Value::Int(i16::from_be_bytes([bytes[pc + 1], bytes[pc + 2]]) as i32));
                    pc += 3;
                }
                0x12 | 0x13 => {
                    let index = if opcode == 0x12 { bytes[pc + 1] as u16 } else { u2_at(bytes, pc + 1) };
                    match file.constant_pool.get(index).unwrap() {
                        CpInfo::Integer(v) => stack.push(Value::Int(*v)),
                        other => panic!("unsupported constant {other:?}"),
                    }
                    pc += if opcode == 0x12 { 2 } else { 3 };
                }
                0x15 | 0x19 => {
                    stack.push(locals[bytes[pc + 1] as usize]);
                    pc += 2;
                }
                0x1a..=0x1d => {
                    stack.push(locals[(opcode - 0x1a) as usize]);
                    pc += 1;
                }
                0x2a..=0x2d => {
                    stack.push(locals[(opcode - 0x2a) as usize]);
                    pc += 1;
                }
                0x36 | 0x3a => {
                    locals[bytes[pc + 1] as usize] = stack.pop().unwrap();
                    pc += 2;
                }
                0x3b..=0x3e => {
                    locals[(opcode - 0x3b) as usize] = stack.pop().unwrap();
                    pc += 1;
                }
                0x4b..=0x4e => {
                    locals[(opcode - 0x4b) as usize] = stack.pop().unwrap();
                    pc += 1;
                }
                0x57 => {
                    stack.pop().unwrap();
                    pc += 1;
                }
                0x59 => {
                    let top = *stack.last().unwrap();
                    stack.push(top);
                    pc += 1;
                }
                0x60 | 0x64 | 0x68 => {
                    let b = stack.pop().unwrap().int();
                    let a = stack.pop().unwrap().int();
                    stack.push(Value::Int(match opcode {
                        0x60 => a.wrapping_add(b),
                        0x64 => a.wrapping_sub(b),
                        _ => a.wrapping_mul(b),
                    }));
                    pc += 1;
                }
                0x84 => {
                    let slot = bytes[pc + 1] as usize;
                    let delta = bytes[pc + 2] as i8 as i32;
                    locals[slot] = Value::Int(locals[slot].int().wrapping_add(delta));
                    pc += 3;
                }
                0x99 | 0x9a => {
                    let v = stack.pop().unwrap().int();
                    let taken = if opcode == 0x99 { v == 0 } else { v != 0 };
                    pc = if taken { branch(bytes, pc) } else { pc + 3 };
                }
                0xa1 | 0xa2 => {
                    let b = stack.pop().unwrap().int();
                    let a = stack.pop().unwrap().int();
                    let taken = if opcode == 0xa1 { a < b } else { a >= b };
                    pc = if taken { branch(bytes, pc) } else { pc + 3 };
                }
                0xa7 => pc = branch(bytes, pc),
                0xac | 0xb0 => return stack.pop(),
                0xb1 => return None,
                0xb2 => {
                    let (class, name, descriptor) = Self::member(file, u2_at(bytes, pc + 1));
                    let value = self.statics.get(&Self::static_key(&class, &name)).copied();
                    stack.push(value.unwrap_or_else(|| default_value(&descriptor)));
                    pc += 3;
                }
                0xb3 => {
                    let (class, name, _) = Self::member(file, u2_at(bytes, pc + 1));
                    let value = stack.pop().unwrap();
                    self.statics.insert(Self::static_key(&class, &name), value);
                    pc += 3;
                }
                0xb4 => {
                    let (_, name, descriptor) = Self::member(file, u2_at(bytes, pc + 1));
                    let object = stack.pop().unwrap();
                    let value = self.field(object, &name).unwrap_or_else(|| default_value(&descriptor));
                    stack.push(value);
                    pc += 3;
                }
                0xb5 => {
                    let (_, name, _) = Self::member(file, u2_at(bytes, pc + 1));
                    let value = stack.pop().unwrap();
                    let object = stack.pop().unwrap().reference().expect("putfield on null");
                    self.heap[object].fields.insert(name, value);
                    pc += 3;
                }
                0xb6 | 0xb7 | 0xb8 => {
                    let (class, name, descriptor) = Self::member(file, u2_at(bytes, pc + 1));
                    let count = argument_count(&descriptor) + usize::from(opcode != 0xb8);
                    let args = stack.split_off(stack.len() - count);
                    let target = if opcode == 0xb6 {
                        self.object(args[0]).class.clone()
                    } else {
                        class
                    };
                    if let Some(result) = self.invoke(&target, &name, &descriptor, &args) {
                        stack.push(result);
                    }
                    pc += 3;
                }
                0xbb => {
                    let class = file.constant_pool.class_name(u2_at(bytes, pc + 1)).unwrap().to_owned();
                    let object = self.alloc(&class);
                    stack.push(object);
                    pc += 3;
                }
                0xc0 => pc += 3,
                other => panic!("opcode {other:#04x} isn't supported at pc {pc}"),
            }
        }
    }
}
