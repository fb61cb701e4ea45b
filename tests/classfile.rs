use jvmti_instrument::classfile::{Attribute, AttributeInfo, ClassFile, ClassFileError, StackMapFrame};

struct CpBuilder {
    entries: Vec<Vec<u8>>,
}

impl CpBuilder {
    fn new() -> Self {
        Self { entries: Vec::new() }
    }

    fn push(&mut self, entry: Vec<u8>) -> u16 {
        self.entries.push(entry);
        self.entries.len() as u16
    }

    fn utf8(&mut self, s: &str) -> u16 {
        let mut entry = Vec::new();
        entry.push(1);
        entry.extend_from_slice(&(s.len() as u16).to_be_bytes());
        entry.extend_from_slice(s.as_bytes());
        self.push(entry)
    }

    fn class(&mut self, name_index: u16) -> u16 {
        let mut entry = Vec::new();
        entry.push(7);
        entry.extend_from_slice(&name_index.to_be_bytes());
        self.push(entry)
    }

    fn name_and_type(&mut self, name_index: u16, descriptor_index: u16) -> u16 {
        let mut entry = Vec::new();
        entry.push(12);
        entry.extend_from_slice(&name_index.to_be_bytes());
        entry.extend_from_slice(&descriptor_index.to_be_bytes());
        self.push(entry)
    }

    fn methodref(&mut self, class_index: u16, name_and_type_index: u16) -> u16 {
        let mut entry = Vec::new();
        entry.push(10);
        entry.extend_from_slice(&class_index.to_be_bytes());
        entry.extend_from_slice(&name_and_type_index.to_be_bytes());
        self.push(entry)
    }

    fn integer(&mut self, value: i32) -> u16 {
        let mut entry = Vec::new();
        entry.push(3);
        entry.extend_from_slice(&value.to_be_bytes());
        self.push(entry)
    }

    fn module(&mut self, name_index: u16) -> u16 {
        let mut entry = Vec::new();
        entry.push(19);
        entry.extend_from_slice(&name_index.to_be_bytes());
        self.push(entry)
    }

    fn package(&mut self, name_index: u16) -> u16 {
        let mut entry = Vec::new();
        entry.push(20);
        entry.extend_from_slice(&name_index.to_be_bytes());
        self.push(entry)
    }
}

fn u1(out: &mut Vec<u8>, v: u8) {
    out.push(v);
}

fn u2(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn u4(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn push_attr(out: &mut Vec<u8>, name_index: u16, info: &[u8]) {
    u2(out, name_index);
    u4(out, info.len() as u32);
    out.extend_from_slice(info);
}

fn build_test_class() -> Vec<u8> {
    let mut cp = CpBuilder::new();

    let utf_test = cp.utf8("Test");
    let utf_object = cp.utf8("java/lang/Object");
    let class_test = cp.class(utf_test);
    let class_object = cp.class(utf_object);

    let utf_init = cp.utf8("<init>");
    let utf_void = cp.utf8("()V");
    let nat_init = cp.name_and_type(utf_init, utf_void);
    let mref_object_init = cp.methodref(class_object, nat_init);

    let utf_field_name = cp.utf8("value");
    let utf_int_desc = cp.utf8("I");
    let const_int = cp.integer(123);

    let utf_code = cp.utf8("Code");
    let utf_lnt = cp.utf8("LineNumberTable");
    let utf_lvt = cp.utf8("LocalVariableTable");
    let utf_lvtt = cp.utf8("LocalVariableTypeTable");
    let utf_smt = cp.utf8("StackMapTable");

    let utf_source_file = cp.utf8("SourceFile");
    let utf_source_name = cp.utf8("Test.java");
    let utf_source_debug = cp.utf8("SourceDebugExtension");
    let utf_signature = cp.utf8("Signature");
    let utf_signature_val = cp.utf8("Ljava/lang/Object;");
    let utf_deprecated = cp.utf8("Deprecated");
    let utf_synthetic = cp.utf8("Synthetic");
    let utf_exceptions = cp.utf8("Exceptions");
    let utf_constant_value = cp.utf8("ConstantValue");

    let utf_rva = cp.utf8("RuntimeVisibleAnnotations");
    let utf_method_params = cp.utf8("MethodParameters");
    let utf_inner_classes = cp.utf8("InnerClasses");
    let utf_nest_host = cp.utf8("NestHost");
    let utf_unknown = cp.utf8("UnknownAttr");

    let utf_anno_type = cp.utf8("LMyAnno;");
    let utf_this = cp.utf8("this");
    let utf_this_desc = cp.utf8("LTest;");
    let utf_module_name = cp.utf8("my.module");
    let utf_pkg_name = cp.utf8("my/pkg");
    let _module_index = cp.module(utf_module_name);
    let _package_index = cp.package(utf_pkg_name);

    let cp_count = (cp.entries.len() + 1) as u16;

    let mut bytes = Vec::new();
    u4(&mut bytes, 0xCAFEBABE);
    u2(&mut bytes, 0);
    u2(&mut bytes, 52);
    u2(&mut bytes, cp_count);
    for entry in cp.entries {
        bytes.extend_from_slice(&entry);
    }

    u2(&mut bytes, 0x0021);
    u2(&mut bytes, class_test);
    u2(&mut bytes, class_object);

    u2(&mut bytes, 0);

    u2(&mut bytes, 1);
    u2(&mut bytes, 0x0019);
    u2(&mut bytes, utf_field_name);
    u2(&mut bytes, utf_int_desc);
    u2(&mut bytes, 1);
    let mut cv_info = Vec::new();
    u2(&mut cv_info, const_int);
    push_attr(&mut bytes, utf_constant_value, &cv_info);

    u2(&mut bytes, 1);
    u2(&mut bytes, 0x0001);
    u2(&mut bytes, utf_init);
    u2(&mut bytes, utf_void);

    let mut method_attrs = Vec::new();

    // aload_0; invokespecial Object.<init>; return
    let [m1, m2] = mref_object_init.to_be_bytes();
    let code = [0x2a, 0xb7, m1, m2, 0xb1];
    let mut code_info = Vec::new();
    u2(&mut code_info, 1);
    u2(&mut code_info, 1);
    u4(&mut code_info, code.len() as u32);
    code_info.extend_from_slice(&code);
    u2(&mut code_info, 0);

    let mut code_sub_attrs = Vec::new();
    let mut lnt_info = Vec::new();
    u2(&mut lnt_info, 2);
    u2(&mut lnt_info, 0);
    u2(&mut lnt_info, 1);
    u2(&mut lnt_info, 4);
    u2(&mut lnt_info, 2);
    push_attr(&mut code_sub_attrs, utf_lnt, &lnt_info);

    let mut lvt_info = Vec::new();
    u2(&mut lvt_info, 1);
    u2(&mut lvt_info, 0);
    u2(&mut lvt_info, 5);
    u2(&mut lvt_info, utf_this);
    u2(&mut lvt_info, utf_this_desc);
    u2(&mut lvt_info, 0);
    push_attr(&mut code_sub_attrs, utf_lvt, &lvt_info);

    let mut lvtt_info = Vec::new();
    u2(&mut lvtt_info, 1);
    u2(&mut lvtt_info, 0);
    u2(&mut lvtt_info, 5);
    u2(&mut lvtt_info, utf_this);
    u2(&mut lvtt_info, utf_signature_val);
    u2(&mut lvtt_info, 0);
    push_attr(&mut code_sub_attrs, utf_lvtt, &lvtt_info);

    // same_frame at 4, then same_locals_1_stack_item(Object Test) at 4
    let mut smt_info = Vec::new();
    u2(&mut smt_info, 2);
    u1(&mut smt_info, 4);
    u1(&mut smt_info, 64);
    u1(&mut smt_info, 7);
    u2(&mut smt_info, class_test);
    push_attr(&mut code_sub_attrs, utf_smt, &smt_info);

    u2(&mut code_info, 4);
    code_info.extend_from_slice(&code_sub_attrs);
    push_attr(&mut method_attrs, utf_code, &code_info);

    let mut exc_info = Vec::new();
    u2(&mut exc_info, 1);
    u2(&mut exc_info, class_object);
    push_attr(&mut method_attrs, utf_exceptions, &exc_info);

    let mut params_info = Vec::new();
    u1(&mut params_info, 1);
    u2(&mut params_info, utf_this);
    u2(&mut params_info, 0);
    push_attr(&mut method_attrs, utf_method_params, &params_info);

    u2(&mut bytes, 3);
    bytes.extend_from_slice(&method_attrs);

    let mut class_attrs = Vec::new();

    let mut sf_info = Vec::new();
    u2(&mut sf_info, utf_source_name);
    push_attr(&mut class_attrs, utf_source_file, &sf_info);

    push_attr(&mut class_attrs, utf_source_debug, b"debug");

    let mut sig_info = Vec::new();
    u2(&mut sig_info, utf_signature_val);
    push_attr(&mut class_attrs, utf_signature, &sig_info);

    push_attr(&mut class_attrs, utf_deprecated, &[]);
    push_attr(&mut class_attrs, utf_synthetic, &[]);

    let mut rva_info = Vec::new();
    u2(&mut rva_info, 1);
    u2(&mut rva_info, utf_anno_type);
    u2(&mut rva_info, 0);
    push_attr(&mut class_attrs, utf_rva, &rva_info);

    let mut inner_info = Vec::new();
    u2(&mut inner_info, 1);
    u2(&mut inner_info, class_test);
    u2(&mut inner_info, class_object);
    u2(&mut inner_info, utf_test);
    u2(&mut inner_info, 0x0001);
    push_attr(&mut class_attrs, utf_inner_classes, &inner_info);

    let mut nest_host_info = Vec::new();
    u2(&mut nest_host_info, class_object);
    push_attr(&mut class_attrs, utf_nest_host, &nest_host_info);

    push_attr(&mut class_attrs, utf_unknown, b"data");

    u2(&mut bytes, 9);
    bytes.extend_from_slice(&class_attrs);

    bytes
}

fn opaque_name(attribute: &Attribute) -> Option<&str> {
    match &attribute.info {
        AttributeInfo::Opaque { name, .. } => Some(name.as_str()),
        _ => None,
    }
}

#[test]
fn parses_interpreted_attributes() {
    let bytes = build_test_class();
    let classfile = ClassFile::parse(&bytes).expect("parse class file");
    assert_eq!(classfile.this_class_name().unwrap(), "Test");
    assert_eq!(classfile.major_version, 52);

    let class_attrs: Vec<&AttributeInfo> = classfile.attributes.iter().map(|a| &a.info).collect();
    assert!(class_attrs.iter().any(|a| matches!(a, AttributeInfo::SourceFile { .. })));
    assert!(class_attrs.iter().any(|a| matches!(a, AttributeInfo::Signature { .. })));
    assert!(class_attrs.iter().any(|a| matches!(a, AttributeInfo::Deprecated)));
    assert!(class_attrs.iter().any(|a| matches!(a, AttributeInfo::Synthetic)));

    let field_attrs = &classfile.fields[0].attributes;
    assert!(matches!(field_attrs[0].info, AttributeInfo::ConstantValue { .. }));

    let method = &classfile.methods[0];
    assert!(method.attributes.iter().any(|a| matches!(a.info, AttributeInfo::Exceptions { .. })));

    let code = method.code().expect("code attr");
    assert_eq!(code.code.len(), 5);
    let sub: Vec<&AttributeInfo> = code.attributes.iter().map(|a| &a.info).collect();
    assert!(sub.iter().any(|a| matches!(a, AttributeInfo::LineNumberTable { entries } if entries.len() == 2)));
    assert!(sub.iter().any(|a| matches!(a, AttributeInfo::LocalVariableTable { .. })));
    assert!(sub.iter().any(|a| matches!(a, AttributeInfo::LocalVariableTypeTable { .. })));

    let frames = sub
        .iter()
        .find_map(|a| match a {
            AttributeInfo::StackMapTable(table) => Some(&table.entries),
            _ => None,
        })
        .expect("stack map table");
    assert_eq!(frames.len(), 2);
    assert!(matches!(frames[0], StackMapFrame::Same { offset_delta: 4 }));
    assert!(matches!(frames[1], StackMapFrame::SameLocals1StackItem { offset_delta: 0, .. }));
}

#[test]
fn keeps_other_attributes_by_name() {
    let classfile = ClassFile::parse(&build_test_class()).unwrap();

    let class_opaque: Vec<&str> = classfile.attributes.iter().filter_map(opaque_name).collect();
    assert_eq!(
        class_opaque,
        ["SourceDebugExtension", "RuntimeVisibleAnnotations", "InnerClasses", "NestHost", "UnknownAttr"]
    );
    let method_opaque: Vec<&str> = classfile.methods[0].attributes.iter().filter_map(opaque_name).collect();
    assert_eq!(method_opaque, ["MethodParameters"]);
}

#[test]
fn unedited_class_is_written_back_unchanged() {
    let bytes = build_test_class();
    let classfile = ClassFile::parse(&bytes).unwrap();
    assert_eq!(classfile.to_bytes(), bytes);
}

#[test]
fn rejects_malformed_input() {
    let bytes = build_test_class();

    let mut bad_magic = bytes.clone();
    bad_magic[0] = 0xCB;
    assert!(matches!(ClassFile::parse(&bad_magic), Err(ClassFileError::InvalidMagic(_))));

    assert!(matches!(ClassFile::parse(&bytes[..bytes.len() - 3]), Err(ClassFileError::UnexpectedEof)));
    assert!(matches!(ClassFile::parse(&bytes[..6]), Err(ClassFileError::UnexpectedEof)));

    let mut trailing = bytes;
    trailing.extend_from_slice(&[0, 0]);
    assert!(matches!(ClassFile::parse(&trailing), Err(ClassFileError::TrailingBytes(2))));
}
