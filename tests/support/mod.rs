// Shared helpers for the integration tests: a class-file byte builder,
// in-memory class loaders and search-path fixtures.
#![allow(dead_code)]

pub mod interp;

use std::any::Any;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use jvmti_instrument::class_path::ClassLoaderHandle;

pub fn u1(out: &mut Vec<u8>, v: u8) {
    out.push(v);
}

pub fn u2(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn u4(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn push_attr(out: &mut Vec<u8>, name_index: u16, info: &[u8]) {
    u2(out, name_index);
    u4(out, info.len() as u32);
    out.extend_from_slice(info);
}

/// Constant pool under construction. Identical entries are shared.
#[derive(Default)]
pub struct CpBuilder {
    pub entries: Vec<Vec<u8>>,
    interned: HashMap<Vec<u8>, u16>,
}

impl CpBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, entry: Vec<u8>) -> u16 {
        if let Some(&index) = self.interned.get(&entry) {
            return index;
        }
        self.entries.push(entry.clone());
        let index = self.entries.len() as u16;
        self.interned.insert(entry, index);
        index
    }

    pub fn utf8(&mut self, s: &str) -> u16 {
        let mut entry = vec![1];
        u2(&mut entry, s.len() as u16);
        entry.extend_from_slice(s.as_bytes());
        self.push(entry)
    }

    pub fn integer(&mut self, value: i32) -> u16 {
        let mut entry = vec![3];
        entry.extend_from_slice(&value.to_be_bytes());
        self.push(entry)
    }

    pub fn class(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        let mut entry = vec![7];
        u2(&mut entry, name_index);
        self.push(entry)
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        let mut entry = vec![12];
        u2(&mut entry, name_index);
        u2(&mut entry, descriptor_index);
        self.push(entry)
    }

    fn member(&mut self, tag: u8, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(class);
        let nat_index = self.name_and_type(name, descriptor);
        let mut entry = vec![tag];
        u2(&mut entry, class_index);
        u2(&mut entry, nat_index);
        self.push(entry)
    }

    pub fn fieldref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        self.member(9, class, name, descriptor)
    }

    pub fn methodref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        self.member(10, class, name, descriptor)
    }

    pub fn count(&self) -> u16 {
        (self.entries.len() + 1) as u16
    }
}

struct MethodDef {
    access_flags: u16,
    name: u16,
    descriptor: u16,
    max_stack: u16,
    max_locals: u16,
    code: Vec<u8>,
    code_attributes: Vec<u8>,
    code_attribute_count: u16,
}

/// Builds a class file. Constant-pool indices for code operands come from [`ClassBuilder::cp`].
pub struct ClassBuilder {
    pub cp: CpBuilder,
    this_class: u16,
    super_class: u16,
    fields: Vec<(u16, u16, u16)>,
    methods: Vec<MethodDef>,
}

impl ClassBuilder {
    /// `name` in internal form; the superclass is `java/lang/Object`.
    pub fn new(name: &str) -> Self {
        let mut cp = CpBuilder::new();
        let this_class = cp.class(name);
        let super_class = cp.class("java/lang/Object");
        Self { cp, this_class, super_class, fields: Vec::new(), methods: Vec::new() }
    }

    pub fn field(&mut self, access_flags: u16, name: &str, descriptor: &str) -> &mut Self {
        let name = self.cp.utf8(name);
        let descriptor = self.cp.utf8(descriptor);
        self.fields.push((access_flags, name, descriptor));
        self
    }

    pub fn method(&mut self, access_flags: u16, name: &str, descriptor: &str, max_stack: u16, max_locals: u16, code: Vec<u8>) -> &mut Self {
        self.method_with(access_flags, name, descriptor, max_stack, max_locals, code, Vec::new())
    }

    /// Like [`method`](Self::method) with extra `Code` sub-attributes, each `(name, info)`.
    #[allow(clippy::too_many_arguments)]
    pub fn method_with(
        &mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
        max_stack: u16,
        max_locals: u16,
        code: Vec<u8>,
        code_attributes: Vec<(&str, Vec<u8>)>,
    ) -> &mut Self {
        let name = self.cp.utf8(name);
        let descriptor = self.cp.utf8(descriptor);
        let mut encoded = Vec::new();
        for (attr_name, info) in &code_attributes {
            let index = self.cp.utf8(attr_name);
            push_attr(&mut encoded, index, info);
        }
        self.methods.push(MethodDef {
            access_flags,
            name,
            descriptor,
            max_stack,
            max_locals,
            code,
            code_attributes: encoded,
            code_attribute_count: code_attributes.len() as u16,
        });
        self
    }

    /// The default constructor `aload_0; invokespecial Object.<init>; return`.
    pub fn default_constructor(&mut self) -> &mut Self {
        let init = self.cp.methodref("java/lang/Object", "<init>", "()V");
        let [hi, lo] = init.to_be_bytes();
        self.method(0x0001, "<init>", "()V", 1, 1, vec![0x2a, 0xb7, hi, lo, 0xb1])
    }

    pub fn build(&mut self) -> Vec<u8> {
        let code_name = self.cp.utf8("Code");

        let mut bytes = Vec::new();
        u4(&mut bytes, 0xCAFEBABE);
        u2(&mut bytes, 0);
        u2(&mut bytes, 52);
        u2(&mut bytes, self.cp.count());
        for entry in &self.cp.entries {
            bytes.extend_from_slice(entry);
        }

        u2(&mut bytes, 0x0021);
        u2(&mut bytes, self.this_class);
        u2(&mut bytes, self.super_class);
        u2(&mut bytes, 0);

        u2(&mut bytes, self.fields.len() as u16);
        for &(flags, name, descriptor) in &self.fields {
            u2(&mut bytes, flags);
            u2(&mut bytes, name);
            u2(&mut bytes, descriptor);
            u2(&mut bytes, 0);
        }

        u2(&mut bytes, self.methods.len() as u16);
        for method in &self.methods {
            u2(&mut bytes, method.access_flags);
            u2(&mut bytes, method.name);
            u2(&mut bytes, method.descriptor);
            u2(&mut bytes, 1);

            let mut code_info = Vec::new();
            u2(&mut code_info, method.max_stack);
            u2(&mut code_info, method.max_locals);
            u4(&mut code_info, method.code.len() as u32);
            code_info.extend_from_slice(&method.code);
            u2(&mut code_info, 0);
            u2(&mut code_info, method.code_attribute_count);
            code_info.extend_from_slice(&method.code_attributes);
            push_attr(&mut bytes, code_name, &code_info);
        }

        u2(&mut bytes, 0);
        bytes
    }
}

/// Two-byte big-endian operand.
pub fn be(index: u16) -> [u8; 2] {
    index.to_be_bytes()
}

// --- Sample classes -------------------------------------------------------

pub const COUNTER: &str = "com/example/Counter";
pub const ITEM: &str = "com/example/Item";
pub const SHOP: &str = "com/example/Shop";
pub const SERVICE: &str = "com/example/Service";
pub const ITEM_FACTORY: &str = "com/example/ItemFactory";
pub const PROXIES: &str = "com/example/Proxies";

/// `Counter { int counter; static int total; void increment(int); static void bump(int); int get(); }`
pub fn counter_class() -> Vec<u8> {
    let mut class = ClassBuilder::new(COUNTER);
    class.field(0x0001, "counter", "I").field(0x0009, "total", "I").field(0x0001, "label", "Ljava/lang/String;");
    let counter = class.cp.fieldref(COUNTER, "counter", "I");
    let total = class.cp.fieldref(COUNTER, "total", "I");
    let label = class.cp.fieldref(COUNTER, "label", "Ljava/lang/String;");
    let [c1, c2] = be(counter);
    let [t1, t2] = be(total);
    let [l1, l2] = be(label);
    class.default_constructor();
    // this.counter = v; this.label = null
    class.method(0x0001, "increment", "(I)V", 2, 2, vec![0x2a, 0x1b, 0xb5, c1, c2, 0x2a, 0x01, 0xb5, l1, l2, 0xb1]);
    // total = v
    class.method(0x0009, "bump", "(I)V", 1, 1, vec![0x1a, 0xb3, t1, t2, 0xb1]);
    class.method(0x0001, "get", "()I", 1, 1, vec![0x2a, 0xb4, c1, c2, 0xac]);
    class.method(0x0009, "total", "()I", 1, 0, vec![0xb2, t1, t2, 0xac]);
    class.build()
}

/// `Item { int value; Item(int v) { this.value = v; } }`
pub fn item_class() -> Vec<u8> {
    let mut class = ClassBuilder::new(ITEM);
    class.field(0x0001, "value", "I");
    let object_init = class.cp.methodref("java/lang/Object", "<init>", "()V");
    let value = class.cp.fieldref(ITEM, "value", "I");
    let [o1, o2] = be(object_init);
    let [v1, v2] = be(value);
    class.method(0x0001, "<init>", "(I)V", 2, 2, vec![0x2a, 0xb7, o1, o2, 0x2a, 0x1b, 0xb5, v1, v2, 0xb1]);
    class.build()
}

/// `Shop { Item make() { return new Item(7); } Item pair() { Item a = new Item(1); return new Item(a.value + 1); } }`
pub fn shop_class() -> Vec<u8> {
    let mut class = ClassBuilder::new(SHOP);
    let item = class.cp.class(ITEM);
    let init = class.cp.methodref(ITEM, "<init>", "(I)V");
    let value = class.cp.fieldref(ITEM, "value", "I");
    let [i1, i2] = be(item);
    let [n1, n2] = be(init);
    let [v1, v2] = be(value);
    class.default_constructor();
    class.method(0x0001, "make", "()Lcom/example/Item;", 3, 1, vec![0xbb, i1, i2, 0x59, 0x10, 7, 0xb7, n1, n2, 0xb0]);
    class.method(
        0x0001,
        "pair",
        "()Lcom/example/Item;",
        4,
        2,
        vec![
            0xbb, i1, i2, 0x59, 0x04, 0xb7, n1, n2, 0x4c, // a = new Item(1)
            0xbb, i1, i2, 0x59, 0x2b, 0xb4, v1, v2, 0x04, 0x60, 0xb7, n1, n2, // new Item(a.value + 1)
            0xb0,
        ],
    );
    class.build()
}

/// `Shop` with a valid `make()` followed by `broken()`, whose `new Item` is discarded unconstructed.
pub fn broken_shop_class() -> Vec<u8> {
    let mut class = ClassBuilder::new(SHOP);
    let item = class.cp.class(ITEM);
    let init = class.cp.methodref(ITEM, "<init>", "(I)V");
    let [i1, i2] = be(item);
    let [n1, n2] = be(init);
    class.default_constructor();
    class.method(0x0001, "make", "()Lcom/example/Item;", 3, 1, vec![0xbb, i1, i2, 0x59, 0x10, 7, 0xb7, n1, n2, 0xb0]);
    class.method(0x0001, "broken", "()Lcom/example/Item;", 1, 1, vec![0xbb, i1, i2, 0x57, 0x01, 0xb0]);
    class.build()
}

/// `Service { Item cached; Item lookup(int hit) { if (hit != 0) return cached; return null; } int size() }`
///
/// `lookup` carries a StackMapTable with one frame at the `aconst_null`.
pub fn service_class() -> Vec<u8> {
    let mut class = ClassBuilder::new(SERVICE);
    class.field(0x0001, "cached", "Lcom/example/Item;");
    let cached = class.cp.fieldref(SERVICE, "cached", "Lcom/example/Item;");
    let [c1, c2] = be(cached);
    class.default_constructor();
    let mut frames = Vec::new();
    u2(&mut frames, 1);
    u1(&mut frames, 9); // same_frame, offset_delta 9
    class.method_with(
        0x0001,
        "lookup",
        "(I)Lcom/example/Item;",
        1,
        2,
        vec![0x1b, 0x99, 0x00, 0x08, 0x2a, 0xb4, c1, c2, 0xb0, 0x01, 0xb0],
        vec![("StackMapTable", frames)],
    );
    class.method(0x0001, "size", "()I", 1, 1, vec![0x04, 0xac]);
    class.build()
}

// --- Search-path fixtures -------------------------------------------------

/// Writes `bytes` as the class file of `internal_name` below `root`.
pub fn write_class(root: &Path, internal_name: &str, bytes: &[u8]) {
    let path = root.join(format!("{internal_name}.class"));
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, bytes).unwrap();
}

/// A directory holding every sample class.
pub fn sample_classes() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_class(dir.path(), COUNTER, &counter_class());
    write_class(dir.path(), ITEM, &item_class());
    write_class(dir.path(), SHOP, &shop_class());
    write_class(dir.path(), SERVICE, &service_class());
    dir
}

/// An in-memory class loader. Loaders with the same `id` are the same loader.
pub struct MemoryLoader {
    pub id: u32,
    resources: HashMap<String, Vec<u8>>,
    pub lookups: AtomicUsize,
}

impl MemoryLoader {
    pub fn new(id: u32) -> Self {
        Self { id, resources: HashMap::new(), lookups: AtomicUsize::new(0) }
    }

    pub fn with_class(mut self, internal_name: &str, bytes: Vec<u8>) -> Self {
        self.resources.insert(format!("{internal_name}.class"), bytes);
        self
    }

    pub fn shared(self) -> Arc<dyn ClassLoaderHandle> {
        Arc::new(self)
    }
}

impl ClassLoaderHandle for MemoryLoader {
    fn find_resource(&self, resource: &str) -> io::Result<Option<Vec<u8>>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.resources.get(resource).cloned())
    }

    fn same_loader(&self, other: &dyn ClassLoaderHandle) -> bool {
        other.as_any().downcast_ref::<MemoryLoader>().map_or(false, |o| o.id == self.id)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn describe(&self) -> String {
        format!("memory loader #{}", self.id)
    }
}
