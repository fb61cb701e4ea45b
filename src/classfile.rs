//! Class file model with a parser and a writer.
//!
//! The model is editable: the constant pool can be extended with interned
//! entries and method bodies can be replaced. Attributes that carry no meaning
//! for editing are kept as opaque byte blobs, so a class that is parsed and
//! written back without edits reproduces its input exactly.

use thiserror::Error;

pub const MAGIC: u32 = 0xCAFE_BABE;

pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_NATIVE: u16 = 0x0100;
pub const ACC_ABSTRACT: u16 = 0x0400;

#[derive(Debug, Clone, PartialEq)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: u16,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodInfo {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<Attribute>,
}

impl MethodInfo {
    pub fn name<'a>(&self, cp: &'a ConstantPool) -> Result<&'a str, ClassFileError> {
        cp.get_utf8(self.name_index)
    }

    pub fn descriptor<'a>(&self, cp: &'a ConstantPool) -> Result<&'a str, ClassFileError> {
        cp.get_utf8(self.descriptor_index)
    }

    pub fn code(&self) -> Option<&CodeAttribute> {
        self.attributes.iter().find_map(|a| match &a.info {
            AttributeInfo::Code(code) => Some(code),
            _ => None,
        })
    }

    pub fn code_mut(&mut self) -> Option<&mut CodeAttribute> {
        self.attributes.iter_mut().find_map(|a| match &mut a.info {
            AttributeInfo::Code(code) => Some(code),
            _ => None,
        })
    }
}

impl FieldInfo {
    pub fn name<'a>(&self, cp: &'a ConstantPool) -> Result<&'a str, ClassFileError> {
        cp.get_utf8(self.name_index)
    }

    pub fn descriptor<'a>(&self, cp: &'a ConstantPool) -> Result<&'a str, ClassFileError> {
        cp.get_utf8(self.descriptor_index)
    }
}

/// A symbolic field or method reference resolved out of the constant pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRef<'a> {
    pub class: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstantPool {
    entries: Vec<Option<CpInfo>>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPool {
    pub fn new() -> Self {
        Self { entries: vec![None] }
    }

    /// Value written as `constant_pool_count`.
    pub fn count(&self) -> u16 {
        self.entries.len() as u16
    }

    pub fn get(&self, index: u16) -> Result<&CpInfo, ClassFileError> {
        if index == 0 {
            return Err(ClassFileError::InvalidConstantPoolIndex(index));
        }
        self.entries
            .get(index as usize)
            .and_then(|e| e.as_ref())
            .ok_or(ClassFileError::InvalidConstantPoolIndex(index))
    }

    pub fn get_utf8(&self, index: u16) -> Result<&str, ClassFileError> {
        match self.get(index)? {
            CpInfo::Utf8(s) => Ok(s.as_str()),
            _ => Err(ClassFileError::InvalidConstantPoolIndex(index)),
        }
    }

    pub fn class_name(&self, index: u16) -> Result<&str, ClassFileError> {
        match self.get(index)? {
            CpInfo::Class { name_index } => self.get_utf8(*name_index),
            _ => Err(ClassFileError::InvalidConstantPoolIndex(index)),
        }
    }

    pub fn name_and_type(&self, index: u16) -> Result<(&str, &str), ClassFileError> {
        match self.get(index)? {
            CpInfo::NameAndType { name_index, descriptor_index } => {
                Ok((self.get_utf8(*name_index)?, self.get_utf8(*descriptor_index)?))
            }
            _ => Err(ClassFileError::InvalidConstantPoolIndex(index)),
        }
    }

    /// Resolves a `Fieldref`, `Methodref` or `InterfaceMethodref` entry.
    pub fn member_ref(&self, index: u16) -> Result<MemberRef<'_>, ClassFileError> {
        let (class_index, nat_index) = match self.get(index)? {
            CpInfo::Fieldref { class_index, name_and_type_index }
            | CpInfo::Methodref { class_index, name_and_type_index }
            | CpInfo::InterfaceMethodref { class_index, name_and_type_index } => {
                (*class_index, *name_and_type_index)
            }
            _ => return Err(ClassFileError::InvalidConstantPoolIndex(index)),
        };
        let (name, descriptor) = self.name_and_type(nat_index)?;
        Ok(MemberRef { class: self.class_name(class_index)?, name, descriptor })
    }

    fn find(&self, entry: &CpInfo) -> Option<u16> {
        self.entries
            .iter()
            .position(|e| e.as_ref() == Some(entry))
            .map(|i| i as u16)
    }

    fn push(&mut self, entry: CpInfo) -> Result<u16, ClassFileError> {
        let wide = matches!(entry, CpInfo::Long(_) | CpInfo::Double(_));
        let needed = if wide { 2 } else { 1 };
        if self.entries.len() + needed > u16::MAX as usize {
            return Err(ClassFileError::ConstantPoolOverflow);
        }
        let index = self.entries.len() as u16;
        self.entries.push(Some(entry));
        if wide {
            self.entries.push(None);
        }
        Ok(index)
    }

    fn intern(&mut self, entry: CpInfo) -> Result<u16, ClassFileError> {
        match self.find(&entry) {
            Some(index) => Ok(index),
            None => self.push(entry),
        }
    }

    pub fn add_utf8(&mut self, value: &str) -> Result<u16, ClassFileError> {
        self.intern(CpInfo::Utf8(value.to_owned()))
    }

    pub fn add_integer(&mut self, value: i32) -> Result<u16, ClassFileError> {
        self.intern(CpInfo::Integer(value))
    }

    pub fn add_class(&mut self, internal_name: &str) -> Result<u16, ClassFileError> {
        let name_index = self.add_utf8(internal_name)?;
        self.intern(CpInfo::Class { name_index })
    }

    pub fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16, ClassFileError> {
        let name_index = self.add_utf8(name)?;
        let descriptor_index = self.add_utf8(descriptor)?;
        self.intern(CpInfo::NameAndType { name_index, descriptor_index })
    }

    pub fn add_fieldref(&mut self, class: &str, name: &str, descriptor: &str) -> Result<u16, ClassFileError> {
        let class_index = self.add_class(class)?;
        let name_and_type_index = self.add_name_and_type(name, descriptor)?;
        self.intern(CpInfo::Fieldref { class_index, name_and_type_index })
    }

    pub fn add_methodref(&mut self, class: &str, name: &str, descriptor: &str) -> Result<u16, ClassFileError> {
        let class_index = self.add_class(class)?;
        let name_and_type_index = self.add_name_and_type(name, descriptor)?;
        self.intern(CpInfo::Methodref { class_index, name_and_type_index })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CpInfo {
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class { name_index: u16 },
    String { string_index: u16 },
    Fieldref { class_index: u16, name_and_type_index: u16 },
    Methodref { class_index: u16, name_and_type_index: u16 },
    InterfaceMethodref { class_index: u16, name_and_type_index: u16 },
    NameAndType { name_index: u16, descriptor_index: u16 },
    MethodHandle { reference_kind: u8, reference_index: u16 },
    MethodType { descriptor_index: u16 },
    Dynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    InvokeDynamic { bootstrap_method_attr_index: u16, name_and_type_index: u16 },
    Module { name_index: u16 },
    Package { name_index: u16 },
}

/// An attribute together with the constant-pool index of its name.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name_index: u16,
    pub info: AttributeInfo,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeInfo {
    ConstantValue { constantvalue_index: u16 },
    Code(CodeAttribute),
    StackMapTable(StackMapTableAttribute),
    Exceptions { exception_index_table: Vec<u16> },
    Signature { signature_index: u16 },
    SourceFile { sourcefile_index: u16 },
    LineNumberTable { entries: Vec<LineNumberEntry> },
    LocalVariableTable { entries: Vec<LocalVariableTableEntry> },
    LocalVariableTypeTable { entries: Vec<LocalVariableTypeTableEntry> },
    Deprecated,
    Synthetic,
    /// Any attribute the editor does not interpret, kept byte for byte.
    Opaque { name: String, info: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionTableEntry>,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StackMapTableAttribute {
    pub entries: Vec<StackMapFrame>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StackMapFrame {
    Same { offset_delta: u16 },
    SameLocals1StackItem { offset_delta: u16, stack: VerificationTypeInfo },
    SameLocals1StackItemExtended { offset_delta: u16, stack: VerificationTypeInfo },
    Chop { offset_delta: u16, k: u8 },
    SameExtended { offset_delta: u16 },
    Append { offset_delta: u16, locals: Vec<VerificationTypeInfo> },
    Full { offset_delta: u16, locals: Vec<VerificationTypeInfo>, stack: Vec<VerificationTypeInfo> },
}

impl StackMapFrame {
    pub fn offset_delta(&self) -> u16 {
        match self {
            StackMapFrame::Same { offset_delta }
            | StackMapFrame::SameLocals1StackItem { offset_delta, .. }
            | StackMapFrame::SameLocals1StackItemExtended { offset_delta, .. }
            | StackMapFrame::Chop { offset_delta, .. }
            | StackMapFrame::SameExtended { offset_delta }
            | StackMapFrame::Append { offset_delta, .. }
            | StackMapFrame::Full { offset_delta, .. } => *offset_delta,
        }
    }

    pub fn set_offset_delta(&mut self, delta: u16) {
        match self {
            StackMapFrame::Same { offset_delta }
            | StackMapFrame::SameLocals1StackItem { offset_delta, .. }
            | StackMapFrame::SameLocals1StackItemExtended { offset_delta, .. }
            | StackMapFrame::Chop { offset_delta, .. }
            | StackMapFrame::SameExtended { offset_delta }
            | StackMapFrame::Append { offset_delta, .. }
            | StackMapFrame::Full { offset_delta, .. } => *offset_delta = delta,
        }
    }

    /// All verification types mentioned by the frame, locals first.
    pub fn types_mut(&mut self) -> Vec<&mut VerificationTypeInfo> {
        match self {
            StackMapFrame::SameLocals1StackItem { stack, .. }
            | StackMapFrame::SameLocals1StackItemExtended { stack, .. } => vec![stack],
            StackMapFrame::Append { locals, .. } => locals.iter_mut().collect(),
            StackMapFrame::Full { locals, stack, .. } => locals.iter_mut().chain(stack.iter_mut()).collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationTypeInfo {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    Object(u16),
    Uninitialized(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumberEntry {
    pub start_pc: u16,
    pub line_number: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalVariableTableEntry {
    pub start_pc: u16,
    pub length: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub index: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalVariableTypeTableEntry {
    pub start_pc: u16,
    pub length: u16,
    pub name_index: u16,
    pub signature_index: u16,
    pub index: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClassFileError {
    #[error("unexpected end of class data")]
    UnexpectedEof,
    #[error("invalid magic: {0:#x}")]
    InvalidMagic(u32),
    #[error("invalid constant pool index: {0}")]
    InvalidConstantPoolIndex(u16),
    #[error("invalid constant pool tag: {0}")]
    InvalidConstantPoolTag(u8),
    #[error("invalid modified UTF-8 in constant pool")]
    InvalidUtf8,
    #[error("invalid attribute: {0}")]
    InvalidAttribute(String),
    #[error("constant pool is full")]
    ConstantPoolOverflow,
    #[error("{0} trailing bytes after class data")]
    TrailingBytes(usize),
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn read_u1(&mut self) -> Result<u8, ClassFileError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u2(&mut self) -> Result<u16, ClassFileError> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u4(&mut self) -> Result<u32, ClassFileError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ClassFileError> {
        if self.remaining() < len {
            return Err(ClassFileError::UnexpectedEof);
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }
}

#[derive(Default)]
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn u1(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn u2(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn u4(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }
}

impl ClassFile {
    pub fn parse(bytes: &[u8]) -> Result<Self, ClassFileError> {
        let mut r = Reader::new(bytes);
        let magic = r.read_u4()?;
        if magic != MAGIC {
            return Err(ClassFileError::InvalidMagic(magic));
        }

        let minor_version = r.read_u2()?;
        let major_version = r.read_u2()?;

        let constant_pool = parse_constant_pool(&mut r)?;

        let access_flags = r.read_u2()?;
        let this_class = r.read_u2()?;
        let super_class = r.read_u2()?;

        let interfaces_count = r.read_u2()?;
        let mut interfaces = Vec::with_capacity(interfaces_count as usize);
        for _ in 0..interfaces_count {
            interfaces.push(r.read_u2()?);
        }

        let fields_count = r.read_u2()?;
        let mut fields = Vec::with_capacity(fields_count as usize);
        for _ in 0..fields_count {
            let access_flags = r.read_u2()?;
            let name_index = r.read_u2()?;
            let descriptor_index = r.read_u2()?;
            let attributes = parse_attributes(&mut r, &constant_pool)?;
            fields.push(FieldInfo { access_flags, name_index, descriptor_index, attributes });
        }

        let methods_count = r.read_u2()?;
        let mut methods = Vec::with_capacity(methods_count as usize);
        for _ in 0..methods_count {
            let access_flags = r.read_u2()?;
            let name_index = r.read_u2()?;
            let descriptor_index = r.read_u2()?;
            let attributes = parse_attributes(&mut r, &constant_pool)?;
            methods.push(MethodInfo { access_flags, name_index, descriptor_index, attributes });
        }

        let attributes = parse_attributes(&mut r, &constant_pool)?;

        if r.remaining() > 0 {
            return Err(ClassFileError::TrailingBytes(r.remaining()));
        }

        Ok(Self {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    /// Serializes the class. Unedited classes come back byte-identical.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::default();
        w.u4(MAGIC);
        w.u2(self.minor_version);
        w.u2(self.major_version);
        write_constant_pool(&mut w, &self.constant_pool);
        w.u2(self.access_flags);
        w.u2(self.this_class);
        w.u2(self.super_class);
        w.u2(self.interfaces.len() as u16);
        for interface in &self.interfaces {
            w.u2(*interface);
        }
        w.u2(self.fields.len() as u16);
        for field in &self.fields {
            w.u2(field.access_flags);
            w.u2(field.name_index);
            w.u2(field.descriptor_index);
            write_attributes(&mut w, &field.attributes);
        }
        w.u2(self.methods.len() as u16);
        for method in &self.methods {
            w.u2(method.access_flags);
            w.u2(method.name_index);
            w.u2(method.descriptor_index);
            write_attributes(&mut w, &method.attributes);
        }
        write_attributes(&mut w, &self.attributes);
        w.buf
    }

    /// Internal (slash separated) name of this class.
    pub fn this_class_name(&self) -> Result<&str, ClassFileError> {
        self.constant_pool.class_name(self.this_class)
    }

    pub fn find_method(&self, name: &str, descriptor: Option<&str>) -> Option<usize> {
        self.methods.iter().position(|m| {
            m.name(&self.constant_pool).ok() == Some(name)
                && descriptor.map_or(true, |d| m.descriptor(&self.constant_pool).ok() == Some(d))
        })
    }
}

fn parse_constant_pool(r: &mut Reader) -> Result<ConstantPool, ClassFileError> {
    let count = r.read_u2()? as usize;
    let mut entries: Vec<Option<CpInfo>> = Vec::with_capacity(count.max(1));
    entries.push(None); // index 0 is unused

    while entries.len() < count {
        let tag = r.read_u1()?;
        let entry = match tag {
            1 => {
                let len = r.read_u2()? as usize;
                CpInfo::Utf8(decode_modified_utf8(r.read_bytes(len)?)?)
            }
            3 => CpInfo::Integer(r.read_u4()? as i32),
            4 => CpInfo::Float(f32::from_bits(r.read_u4()?)),
            5 | 6 => {
                let high = r.read_u4()? as u64;
                let low = r.read_u4()? as u64;
                let bits = (high << 32) | low;
                let entry = if tag == 5 { CpInfo::Long(bits as i64) } else { CpInfo::Double(f64::from_bits(bits)) };
                entries.push(Some(entry));
                entries.push(None);
                continue;
            }
            7 => CpInfo::Class { name_index: r.read_u2()? },
            8 => CpInfo::String { string_index: r.read_u2()? },
            9 => CpInfo::Fieldref { class_index: r.read_u2()?, name_and_type_index: r.read_u2()? },
            10 => CpInfo::Methodref { class_index: r.read_u2()?, name_and_type_index: r.read_u2()? },
            11 => CpInfo::InterfaceMethodref { class_index: r.read_u2()?, name_and_type_index: r.read_u2()? },
            12 => CpInfo::NameAndType { name_index: r.read_u2()?, descriptor_index: r.read_u2()? },
            15 => CpInfo::MethodHandle { reference_kind: r.read_u1()?, reference_index: r.read_u2()? },
            16 => CpInfo::MethodType { descriptor_index: r.read_u2()? },
            17 => CpInfo::Dynamic { bootstrap_method_attr_index: r.read_u2()?, name_and_type_index: r.read_u2()? },
            18 => CpInfo::InvokeDynamic { bootstrap_method_attr_index: r.read_u2()?, name_and_type_index: r.read_u2()? },
            19 => CpInfo::Module { name_index: r.read_u2()? },
            20 => CpInfo::Package { name_index: r.read_u2()? },
            _ => return Err(ClassFileError::InvalidConstantPoolTag(tag)),
        };
        entries.push(Some(entry));
    }

    if entries.len() > count.max(1) {
        // a trailing Long/Double claimed a slot past the declared count
        return Err(ClassFileError::InvalidConstantPoolIndex(count as u16));
    }

    Ok(ConstantPool { entries })
}

fn write_constant_pool(w: &mut Writer, cp: &ConstantPool) {
    w.u2(cp.count());
    for entry in cp.entries.iter().flatten() {
        match entry {
            CpInfo::Utf8(s) => {
                let bytes = encode_modified_utf8(s);
                w.u1(1);
                w.u2(bytes.len() as u16);
                w.bytes(&bytes);
            }
            CpInfo::Integer(v) => {
                w.u1(3);
                w.u4(*v as u32);
            }
            CpInfo::Float(v) => {
                w.u1(4);
                w.u4(v.to_bits());
            }
            CpInfo::Long(v) => {
                w.u1(5);
                w.bytes(&v.to_be_bytes());
            }
            CpInfo::Double(v) => {
                w.u1(6);
                w.bytes(&v.to_bits().to_be_bytes());
            }
            CpInfo::Class { name_index } => {
                w.u1(7);
                w.u2(*name_index);
            }
            CpInfo::String { string_index } => {
                w.u1(8);
                w.u2(*string_index);
            }
            CpInfo::Fieldref { class_index, name_and_type_index } => {
                w.u1(9);
                w.u2(*class_index);
                w.u2(*name_and_type_index);
            }
            CpInfo::Methodref { class_index, name_and_type_index } => {
                w.u1(10);
                w.u2(*class_index);
                w.u2(*name_and_type_index);
            }
            CpInfo::InterfaceMethodref { class_index, name_and_type_index } => {
                w.u1(11);
                w.u2(*class_index);
                w.u2(*name_and_type_index);
            }
            CpInfo::NameAndType { name_index, descriptor_index } => {
                w.u1(12);
                w.u2(*name_index);
                w.u2(*descriptor_index);
            }
            CpInfo::MethodHandle { reference_kind, reference_index } => {
                w.u1(15);
                w.u1(*reference_kind);
                w.u2(*reference_index);
            }
            CpInfo::MethodType { descriptor_index } => {
                w.u1(16);
                w.u2(*descriptor_index);
            }
            CpInfo::Dynamic { bootstrap_method_attr_index, name_and_type_index } => {
                w.u1(17);
                w.u2(*bootstrap_method_attr_index);
                w.u2(*name_and_type_index);
            }
            CpInfo::InvokeDynamic { bootstrap_method_attr_index, name_and_type_index } => {
                w.u1(18);
                w.u2(*bootstrap_method_attr_index);
                w.u2(*name_and_type_index);
            }
            CpInfo::Module { name_index } => {
                w.u1(19);
                w.u2(*name_index);
            }
            CpInfo::Package { name_index } => {
                w.u1(20);
                w.u2(*name_index);
            }
        }
    }
}

fn parse_attributes(r: &mut Reader, cp: &ConstantPool) -> Result<Vec<Attribute>, ClassFileError> {
    let count = r.read_u2()?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_index = r.read_u2()?;
        let length = r.read_u4()? as usize;
        let data = r.read_bytes(length)?;
        let name = cp.get_utf8(name_index)?;
        let mut sub = Reader::new(data);
        let info = parse_attribute_body(name, &mut sub, cp)?;
        if sub.remaining() != 0 {
            return Err(ClassFileError::InvalidAttribute(name.to_owned()));
        }
        attributes.push(Attribute { name_index, info });
    }
    Ok(attributes)
}

fn parse_attribute_body(name: &str, r: &mut Reader, cp: &ConstantPool) -> Result<AttributeInfo, ClassFileError> {
    let info = match name {
        "ConstantValue" => AttributeInfo::ConstantValue { constantvalue_index: r.read_u2()? },
        "Code" => AttributeInfo::Code(parse_code_attribute(r, cp)?),
        "StackMapTable" => AttributeInfo::StackMapTable(parse_stack_map_table(r)?),
        "Exceptions" => {
            let n = r.read_u2()?;
            let mut exception_index_table = Vec::with_capacity(n as usize);
            for _ in 0..n {
                exception_index_table.push(r.read_u2()?);
            }
            AttributeInfo::Exceptions { exception_index_table }
        }
        "Signature" => AttributeInfo::Signature { signature_index: r.read_u2()? },
        "SourceFile" => AttributeInfo::SourceFile { sourcefile_index: r.read_u2()? },
        "LineNumberTable" => {
            let n = r.read_u2()?;
            let mut entries = Vec::with_capacity(n as usize);
            for _ in 0..n {
                entries.push(LineNumberEntry { start_pc: r.read_u2()?, line_number: r.read_u2()? });
            }
            AttributeInfo::LineNumberTable { entries }
        }
        "LocalVariableTable" => {
            let n = r.read_u2()?;
            let mut entries = Vec::with_capacity(n as usize);
            for _ in 0..n {
                entries.push(LocalVariableTableEntry {
                    start_pc: r.read_u2()?,
                    length: r.read_u2()?,
                    name_index: r.read_u2()?,
                    descriptor_index: r.read_u2()?,
                    index: r.read_u2()?,
                });
            }
            AttributeInfo::LocalVariableTable { entries }
        }
        "LocalVariableTypeTable" => {
            let n = r.read_u2()?;
            let mut entries = Vec::with_capacity(n as usize);
            for _ in 0..n {
                entries.push(LocalVariableTypeTableEntry {
                    start_pc: r.read_u2()?,
                    length: r.read_u2()?,
                    name_index: r.read_u2()?,
                    signature_index: r.read_u2()?,
                    index: r.read_u2()?,
                });
            }
            AttributeInfo::LocalVariableTypeTable { entries }
        }
        "Deprecated" => AttributeInfo::Deprecated,
        "Synthetic" => AttributeInfo::Synthetic,
        _ => AttributeInfo::Opaque { name: name.to_owned(), info: r.read_bytes(r.remaining())?.to_vec() },
    };
    Ok(info)
}

fn parse_code_attribute(r: &mut Reader, cp: &ConstantPool) -> Result<CodeAttribute, ClassFileError> {
    let max_stack = r.read_u2()?;
    let max_locals = r.read_u2()?;
    let code_length = r.read_u4()? as usize;
    let code = r.read_bytes(code_length)?.to_vec();
    let exception_table_length = r.read_u2()?;
    let mut exception_table = Vec::with_capacity(exception_table_length as usize);
    for _ in 0..exception_table_length {
        exception_table.push(ExceptionTableEntry {
            start_pc: r.read_u2()?,
            end_pc: r.read_u2()?,
            handler_pc: r.read_u2()?,
            catch_type: r.read_u2()?,
        });
    }
    let attributes = parse_attributes(r, cp)?;
    Ok(CodeAttribute { max_stack, max_locals, code, exception_table, attributes })
}

fn parse_stack_map_table(r: &mut Reader) -> Result<StackMapTableAttribute, ClassFileError> {
    let n = r.read_u2()?;
    let mut entries = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let frame_type = r.read_u1()?;
        let frame = match frame_type {
            0..=63 => StackMapFrame::Same { offset_delta: frame_type as u16 },
            64..=127 => StackMapFrame::SameLocals1StackItem {
                offset_delta: (frame_type - 64) as u16,
                stack: parse_verification_type_info(r)?,
            },
            247 => StackMapFrame::SameLocals1StackItemExtended {
                offset_delta: r.read_u2()?,
                stack: parse_verification_type_info(r)?,
            },
            248..=250 => StackMapFrame::Chop { offset_delta: r.read_u2()?, k: 251 - frame_type },
            251 => StackMapFrame::SameExtended { offset_delta: r.read_u2()? },
            252..=254 => {
                let offset_delta = r.read_u2()?;
                let mut locals = Vec::with_capacity((frame_type - 251) as usize);
                for _ in 0..(frame_type - 251) {
                    locals.push(parse_verification_type_info(r)?);
                }
                StackMapFrame::Append { offset_delta, locals }
            }
            255 => {
                let offset_delta = r.read_u2()?;
                let locals_count = r.read_u2()?;
                let mut locals = Vec::with_capacity(locals_count as usize);
                for _ in 0..locals_count {
                    locals.push(parse_verification_type_info(r)?);
                }
                let stack_count = r.read_u2()?;
                let mut stack = Vec::with_capacity(stack_count as usize);
                for _ in 0..stack_count {
                    stack.push(parse_verification_type_info(r)?);
                }
                StackMapFrame::Full { offset_delta, locals, stack }
            }
            _ => return Err(ClassFileError::InvalidAttribute(format!("StackMapTable frame type {frame_type}"))),
        };
        entries.push(frame);
    }
    Ok(StackMapTableAttribute { entries })
}

fn parse_verification_type_info(r: &mut Reader) -> Result<VerificationTypeInfo, ClassFileError> {
    let tag = r.read_u1()?;
    Ok(match tag {
        0 => VerificationTypeInfo::Top,
        1 => VerificationTypeInfo::Integer,
        2 => VerificationTypeInfo::Float,
        3 => VerificationTypeInfo::Double,
        4 => VerificationTypeInfo::Long,
        5 => VerificationTypeInfo::Null,
        6 => VerificationTypeInfo::UninitializedThis,
        7 => VerificationTypeInfo::Object(r.read_u2()?),
        8 => VerificationTypeInfo::Uninitialized(r.read_u2()?),
        _ => return Err(ClassFileError::InvalidAttribute(format!("verification type tag {tag}"))),
    })
}

fn write_attributes(w: &mut Writer, attributes: &[Attribute]) {
    w.u2(attributes.len() as u16);
    for attribute in attributes {
        let mut body = Writer::default();
        write_attribute_body(&mut body, &attribute.info);
        w.u2(attribute.name_index);
        w.u4(body.buf.len() as u32);
        w.bytes(&body.buf);
    }
}

fn write_attribute_body(w: &mut Writer, info: &AttributeInfo) {
    match info {
        AttributeInfo::ConstantValue { constantvalue_index } => w.u2(*constantvalue_index),
        AttributeInfo::Code(code) => {
            w.u2(code.max_stack);
            w.u2(code.max_locals);
            w.u4(code.code.len() as u32);
            w.bytes(&code.code);
            w.u2(code.exception_table.len() as u16);
            for e in &code.exception_table {
                w.u2(e.start_pc);
                w.u2(e.end_pc);
                w.u2(e.handler_pc);
                w.u2(e.catch_type);
            }
            write_attributes(w, &code.attributes);
        }
        AttributeInfo::StackMapTable(table) => {
            w.u2(table.entries.len() as u16);
            for frame in &table.entries {
                write_stack_map_frame(w, frame);
            }
        }
        AttributeInfo::Exceptions { exception_index_table } => {
            w.u2(exception_index_table.len() as u16);
            for index in exception_index_table {
                w.u2(*index);
            }
        }
        AttributeInfo::Signature { signature_index } => w.u2(*signature_index),
        AttributeInfo::SourceFile { sourcefile_index } => w.u2(*sourcefile_index),
        AttributeInfo::LineNumberTable { entries } => {
            w.u2(entries.len() as u16);
            for e in entries {
                w.u2(e.start_pc);
                w.u2(e.line_number);
            }
        }
        AttributeInfo::LocalVariableTable { entries } => {
            w.u2(entries.len() as u16);
            for e in entries {
                w.u2(e.start_pc);
                w.u2(e.length);
                w.u2(e.name_index);
                w.u2(e.descriptor_index);
                w.u2(e.index);
            }
        }
        AttributeInfo::LocalVariableTypeTable { entries } => {
            w.u2(entries.len() as u16);
            for e in entries {
                w.u2(e.start_pc);
                w.u2(e.length);
                w.u2(e.name_index);
                w.u2(e.signature_index);
                w.u2(e.index);
            }
        }
        AttributeInfo::Deprecated | AttributeInfo::Synthetic => {}
        AttributeInfo::Opaque { info, .. } => w.bytes(info),
    }
}

// Compact frame forms are kept unless the (relocated) delta no longer fits.
fn write_stack_map_frame(w: &mut Writer, frame: &StackMapFrame) {
    match frame {
        StackMapFrame::Same { offset_delta } if *offset_delta <= 63 => w.u1(*offset_delta as u8),
        StackMapFrame::Same { offset_delta } | StackMapFrame::SameExtended { offset_delta } => {
            w.u1(251);
            w.u2(*offset_delta);
        }
        StackMapFrame::SameLocals1StackItem { offset_delta, stack } if *offset_delta <= 63 => {
            w.u1(64 + *offset_delta as u8);
            write_verification_type_info(w, stack);
        }
        StackMapFrame::SameLocals1StackItem { offset_delta, stack }
        | StackMapFrame::SameLocals1StackItemExtended { offset_delta, stack } => {
            w.u1(247);
            w.u2(*offset_delta);
            write_verification_type_info(w, stack);
        }
        StackMapFrame::Chop { offset_delta, k } => {
            w.u1(251 - *k);
            w.u2(*offset_delta);
        }
        StackMapFrame::Append { offset_delta, locals } => {
            w.u1(251 + locals.len() as u8);
            w.u2(*offset_delta);
            for local in locals {
                write_verification_type_info(w, local);
            }
        }
        StackMapFrame::Full { offset_delta, locals, stack } => {
            w.u1(255);
            w.u2(*offset_delta);
            w.u2(locals.len() as u16);
            for local in locals {
                write_verification_type_info(w, local);
            }
            w.u2(stack.len() as u16);
            for item in stack {
                write_verification_type_info(w, item);
            }
        }
    }
}

fn write_verification_type_info(w: &mut Writer, info: &VerificationTypeInfo) {
    match info {
        VerificationTypeInfo::Top => w.u1(0),
        VerificationTypeInfo::Integer => w.u1(1),
        VerificationTypeInfo::Float => w.u1(2),
        VerificationTypeInfo::Double => w.u1(3),
        VerificationTypeInfo::Long => w.u1(4),
        VerificationTypeInfo::Null => w.u1(5),
        VerificationTypeInfo::UninitializedThis => w.u1(6),
        VerificationTypeInfo::Object(index) => {
            w.u1(7);
            w.u2(*index);
        }
        VerificationTypeInfo::Uninitialized(offset) => {
            w.u1(8);
            w.u2(*offset);
        }
    }
}

/// Decodes the JVM's modified UTF-8. Unpaired surrogates become U+FFFD.
pub fn decode_modified_utf8(bytes: &[u8]) -> Result<String, ClassFileError> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b0 = bytes[i];
        match b0 {
            0x01..=0x7F => {
                units.push(b0 as u16);
                i += 1;
            }
            0xC0..=0xDF => {
                let b1 = *bytes.get(i + 1).ok_or(ClassFileError::InvalidUtf8)?;
                if b1 & 0xC0 != 0x80 {
                    return Err(ClassFileError::InvalidUtf8);
                }
                units.push((((b0 & 0x1F) as u16) << 6) | (b1 & 0x3F) as u16);
                i += 2;
            }
            0xE0..=0xEF => {
                let b1 = *bytes.get(i + 1).ok_or(ClassFileError::InvalidUtf8)?;
                let b2 = *bytes.get(i + 2).ok_or(ClassFileError::InvalidUtf8)?;
                if b1 & 0xC0 != 0x80 || b2 & 0xC0 != 0x80 {
                    return Err(ClassFileError::InvalidUtf8);
                }
                units.push((((b0 & 0x0F) as u16) << 12) | (((b1 & 0x3F) as u16) << 6) | (b2 & 0x3F) as u16);
                i += 3;
            }
            _ => return Err(ClassFileError::InvalidUtf8),
        }
    }
    Ok(char::decode_utf16(units).map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER)).collect())
}

pub fn encode_modified_utf8(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}
