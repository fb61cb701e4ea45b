mod support;

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use jvmti_instrument::class_path::{ClassLoaderHandle, ClassPath};
use jvmti_instrument::classfile::{AttributeInfo, ClassFile};
use jvmti_instrument::error::{ErrorKind, Result};
use jvmti_instrument::facade::ClassAccessFacade;
use jvmti_instrument::structured::SharedClass;
use jvmti_instrument::transform::{
    self, ClassTransformer, FieldWriteRewrite, FrozenPolicy, ReplaceNewRewrite, TransformRequest, TransformerChain,
    WrapReturnRewrite,
};

use support::interp::{Machine, Value};
use support::*;

fn facade_over(dir: &tempfile::TempDir) -> ClassAccessFacade {
    let facade = ClassAccessFacade::default();
    facade.append_search_path(ClassPath::from_path(dir.path()));
    facade
}

fn run(rewrite: &dyn ClassTransformer, facade: &ClassAccessFacade, class: &str, original: &[u8]) -> Result<Option<Vec<u8>>> {
    transform::transform(rewrite, facade, &TransformRequest::new(None, class, original))
}

#[test]
fn field_write_adds_the_increment_instead_of_assigning() {
    let dir = sample_classes();
    let facade = facade_over(&dir);
    let original = counter_class();

    let rewrite = FieldWriteRewrite::new(COUNTER, "increment", 2);
    let rewritten = run(&rewrite, &facade, COUNTER, &original).unwrap().expect("class was rewritten");

    let mut vm = Machine::new();
    vm.load(&rewritten);
    let counter = vm.construct(COUNTER, "()V", &[]);
    vm.invoke(COUNTER, "increment", "(I)V", &[counter, Value::Int(40)]);
    vm.invoke(COUNTER, "increment", "(I)V", &[counter, Value::Int(40)]);
    assert_eq!(vm.invoke(COUNTER, "get", "()I", &[counter]), Some(Value::Int(4)));
    // the reference field written in the same method is left alone
    assert_eq!(vm.field(counter, "label"), Some(Value::Null));

    let mut untouched = Machine::new();
    untouched.load(&original);
    let counter = untouched.construct(COUNTER, "()V", &[]);
    untouched.invoke(COUNTER, "increment", "(I)V", &[counter, Value::Int(40)]);
    assert_eq!(untouched.invoke(COUNTER, "get", "()I", &[counter]), Some(Value::Int(40)));
}

#[test]
fn field_write_handles_static_fields() {
    let dir = sample_classes();
    let facade = facade_over(&dir);

    let rewrite = FieldWriteRewrite::new(COUNTER, "bump(I)V", 300);
    let rewritten = run(&rewrite, &facade, COUNTER, &counter_class()).unwrap().unwrap();

    let mut vm = Machine::new();
    vm.load(&rewritten);
    vm.invoke(COUNTER, "bump", "(I)V", &[Value::Int(9)]);
    vm.invoke(COUNTER, "bump", "(I)V", &[Value::Int(9)]);
    assert_eq!(vm.invoke(COUNTER, "total", "()I", &[]), Some(Value::Int(600)));
}

#[test]
fn field_write_only_touches_the_named_method() {
    let dir = sample_classes();
    let facade = facade_over(&dir);

    let rewritten = run(&FieldWriteRewrite::new(COUNTER, "increment", 2), &facade, COUNTER, &counter_class())
        .unwrap()
        .unwrap();

    let mut vm = Machine::new();
    vm.load(&rewritten);
    vm.invoke(COUNTER, "bump", "(I)V", &[Value::Int(9)]);
    assert_eq!(vm.invoke(COUNTER, "total", "()I", &[]), Some(Value::Int(9)));
}

fn item_factory(vm: &mut Machine, calls: Rc<Cell<usize>>) {
    vm.native(ITEM_FACTORY, "create", move |vm, args| {
        calls.set(calls.get() + 1);
        let item = vm.construct(ITEM, "(I)V", args);
        let tag = vm.alloc("factory-tag");
        vm.heap[item.reference().unwrap()].fields.insert("tag".into(), tag);
        Some(item)
    });
}

#[test]
fn replace_new_routes_construction_through_the_factory() {
    let dir = sample_classes();
    let facade = facade_over(&dir);

    let rewrite = ReplaceNewRewrite::new(SHOP, ITEM, ITEM_FACTORY, "create");
    let rewritten = run(&rewrite, &facade, SHOP, &shop_class()).unwrap().expect("class was rewritten");

    let calls = Rc::new(Cell::new(0));
    let mut vm = Machine::new();
    vm.load(&rewritten).load(&item_class());
    item_factory(&mut vm, Rc::clone(&calls));

    let shop = vm.construct(SHOP, "()V", &[]);
    let item = vm.invoke(SHOP, "make", "()Lcom/example/Item;", &[shop]).unwrap();
    assert_eq!(vm.field(item, "value"), Some(Value::Int(7)));
    assert!(vm.field(item, "tag").is_some());

    let item = vm.invoke(SHOP, "pair", "()Lcom/example/Item;", &[shop]).unwrap();
    assert_eq!(vm.field(item, "value"), Some(Value::Int(2)));
    assert_eq!(calls.get(), 3);
}

#[test]
fn replace_new_leaves_other_types_alone() {
    let dir = sample_classes();
    let facade = facade_over(&dir);

    let rewrite = ReplaceNewRewrite::new(SHOP, "com/example/Other", ITEM_FACTORY, "create");
    assert_eq!(run(&rewrite, &facade, SHOP, &shop_class()).unwrap(), None);
}

#[test]
fn wrap_return_passes_every_returned_value_through_the_factory() {
    let dir = sample_classes();
    let facade = facade_over(&dir);

    let rewrite = WrapReturnRewrite::new(SERVICE, "lookup", PROXIES, "wrap");
    let rewritten = run(&rewrite, &facade, SERVICE, &service_class()).unwrap().expect("class was rewritten");

    let calls = Rc::new(Cell::new(0));
    let mut vm = Machine::new();
    vm.load(&rewritten).load(&item_class());
    let counted = Rc::clone(&calls);
    vm.native(PROXIES, "wrap", move |vm, args| {
        counted.set(counted.get() + 1);
        if args[0] == Value::Null {
            return Some(Value::Null);
        }
        let proxy = vm.alloc(ITEM);
        vm.heap[proxy.reference().unwrap()].fields.insert("target".into(), args[0]);
        Some(proxy)
    });

    let service = vm.construct(SERVICE, "()V", &[]);
    let cached = vm.construct(ITEM, "(I)V", &[Value::Int(5)]);
    vm.heap[service.reference().unwrap()].fields.insert("cached".into(), cached);

    let hit = vm.invoke(SERVICE, "lookup", "(I)Lcom/example/Item;", &[service, Value::Int(1)]).unwrap();
    assert_ne!(hit, cached);
    assert_eq!(vm.field(hit, "target"), Some(cached));

    let miss = vm.invoke(SERVICE, "lookup", "(I)Lcom/example/Item;", &[service, Value::Int(0)]);
    assert_eq!(miss, Some(Value::Null));
    assert_eq!(calls.get(), 2);
}

#[test]
fn wrap_return_relocates_branches_and_frames() {
    let dir = sample_classes();
    let facade = facade_over(&dir);

    let rewritten = run(&WrapReturnRewrite::new(SERVICE, "lookup", PROXIES, "wrap"), &facade, SERVICE, &service_class())
        .unwrap()
        .unwrap();
    let file = ClassFile::parse(&rewritten).unwrap();
    let lookup = file.find_method("lookup", None).unwrap();
    let code = file.methods[lookup].code().unwrap();

    // ifeq now skips the inserted call as well
    assert_eq!(&code.code[1..4], &[0x99, 0x00, 0x0b]);
    assert_eq!(code.code.len(), 17);
    let frames = code
        .attributes
        .iter()
        .find_map(|a| match &a.info {
            AttributeInfo::StackMapTable(table) => Some(table),
            _ => None,
        })
        .expect("stack map kept");
    assert_eq!(frames.entries.len(), 1);
    assert_eq!(frames.entries[0].offset_delta(), 12);
}

#[test]
fn wrap_return_rejects_primitive_returns() {
    let dir = sample_classes();
    let facade = facade_over(&dir);

    let err = run(&WrapReturnRewrite::new(SERVICE, "size", PROXIES, "wrap"), &facade, SERVICE, &service_class())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CompileError);
    assert!(err.to_string().contains("com.example.Service"));
}

#[test]
fn missing_method_is_reported() {
    let dir = sample_classes();
    let facade = facade_over(&dir);

    let err = run(&FieldWriteRewrite::new(COUNTER, "decrement", 2), &facade, COUNTER, &counter_class()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

/// Accepts nothing, and fails loudly if asked to rewrite.
struct RejectAll;

impl ClassTransformer for RejectAll {
    fn name(&self) -> &str {
        "reject-all"
    }

    fn accept(&self, _loader: Option<&Arc<dyn ClassLoaderHandle>>, _class_name: &str) -> bool {
        false
    }

    fn rewrite(&self, _facade: &ClassAccessFacade, _class: &SharedClass) -> Result<Option<Vec<u8>>> {
        panic!("rewrite called for a rejected class");
    }
}

#[test]
fn rejected_classes_never_reach_the_pool() {
    let facade = ClassAccessFacade::default();
    let loader = MemoryLoader::new(1).shared();
    let request = TransformRequest::new(Some(&loader), "com/example/Missing", &[]);

    assert_eq!(transform::transform(&RejectAll, &facade, &request).unwrap(), None);
    assert_eq!(facade.repository().get_pool().cached_classes(), 0);
    assert!(facade.search_path().is_empty());
}

#[test]
fn accepted_but_unknown_class_is_not_found() {
    let facade = ClassAccessFacade::default();
    let rewrite = FieldWriteRewrite::new("com/example/Missing", "increment", 2);

    let err = run(&rewrite, &facade, "com/example/Missing", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.to_string(), "Can't find class 'com.example.Missing' in the class pool");
}

#[test]
fn classes_of_an_unseen_loader_are_found_through_it() {
    let facade = ClassAccessFacade::default();
    let loader = MemoryLoader::new(7).with_class(COUNTER, counter_class()).shared();
    let request = TransformRequest::new(Some(&loader), COUNTER, &[]);

    let rewritten = transform::transform(&FieldWriteRewrite::new(COUNTER, "increment", 2), &facade, &request).unwrap();
    assert!(rewritten.is_some());
    assert_eq!(facade.search_path().len(), 1);
}

#[test]
fn frozen_classes_are_skipped_by_default() {
    let dir = sample_classes();
    let facade = facade_over(&dir);
    let rewrite = FieldWriteRewrite::new(COUNTER, "increment", 2);

    assert!(run(&rewrite, &facade, COUNTER, &counter_class()).unwrap().is_some());
    assert!(facade.get_class(COUNTER).unwrap().lock().is_frozen());
    assert_eq!(run(&rewrite, &facade, COUNTER, &counter_class()).unwrap(), None);
}

#[test]
fn frozen_classes_can_be_defrosted_explicitly() {
    let dir = sample_classes();
    let facade = facade_over(&dir);
    let rewrite = FieldWriteRewrite::new(COUNTER, "increment", 2).with_frozen_policy(FrozenPolicy::Defrost);

    assert!(run(&rewrite, &facade, COUNTER, &counter_class()).unwrap().is_some());
    assert!(run(&rewrite, &facade, COUNTER, &counter_class()).unwrap().is_some());
}

#[test]
fn chain_keeps_the_last_buffer_produced() {
    let dir = sample_classes();
    let facade = facade_over(&dir);
    let original = counter_class();

    let mut chain = TransformerChain::new();
    chain.push(Box::new(FieldWriteRewrite::new(COUNTER, "increment", 2)));
    chain.push(Box::new(RejectAll));
    // sees the class frozen by the first rewrite
    chain.push(Box::new(FieldWriteRewrite::new(COUNTER, "bump", 5)));
    assert_eq!(chain.len(), 3);

    let rewritten = chain.transform(&facade, &TransformRequest::new(None, COUNTER, &original)).unwrap();
    let mut vm = Machine::new();
    vm.load(&rewritten);
    vm.invoke(COUNTER, "bump", "(I)V", &[Value::Int(9)]);
    assert_eq!(vm.invoke(COUNTER, "total", "()I", &[]), Some(Value::Int(9)));
}

#[test]
fn chain_ignores_failing_transformers() {
    let dir = sample_classes();
    let facade = facade_over(&dir);

    let mut chain = TransformerChain::new();
    chain.push(Box::new(FieldWriteRewrite::new(COUNTER, "decrement", 2)));
    assert_eq!(chain.transform(&facade, &TransformRequest::new(None, COUNTER, &counter_class())), None);
}

#[test]
fn chain_prefilters_on_the_class_name_alone() {
    let mut chain = TransformerChain::new();
    assert!(!chain.wants(COUNTER));

    chain.push(Box::new(FieldWriteRewrite::new(COUNTER, "increment", 2)));
    chain.push(Box::new(WrapReturnRewrite::new(SHOP, "make", PROXIES, "wrap")));
    assert!(chain.wants(COUNTER));
    assert!(chain.wants(SHOP));
    assert!(!chain.wants(ITEM));

    // transformers without a name filter are always consulted
    chain.push(Box::new(RejectAll));
    assert!(chain.wants(ITEM));
}

#[test]
fn failed_rewrite_leaves_no_edits_behind() {
    let dir = tempfile::tempdir().unwrap();
    write_class(dir.path(), SHOP, &broken_shop_class());
    let facade = facade_over(&dir);
    let replace = ReplaceNewRewrite::new(SHOP, ITEM, ITEM_FACTORY, "create");

    let err = run(&replace, &facade, SHOP, &broken_shop_class()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CompileError);
    let pooled = facade.get_class(SHOP).unwrap();
    assert!(!pooled.lock().is_modified());
    assert!(!pooled.lock().is_frozen());

    let mut chain = TransformerChain::new();
    chain.push(Box::new(replace));
    chain.push(Box::new(WrapReturnRewrite::new(SHOP, "make", PROXIES, "wrap")));
    let rewritten = chain.transform(&facade, &TransformRequest::new(None, SHOP, &broken_shop_class())).unwrap();

    let file = ClassFile::parse(&rewritten).unwrap();
    let make = file.find_method("make", None).unwrap();
    let code = &file.methods[make].code().unwrap().code;
    // the allocation is still there; only the return was wrapped
    assert_eq!(code[0], 0xbb);
    assert_eq!(code[3], 0x59);
    assert_eq!(code[6], 0xb7);
    assert_eq!(code.len(), 13);
}
