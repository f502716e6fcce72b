use std::fs;

use dexmerge_dex_file::{
    AccessFlags, FieldKey, Instruction, Key, MethodKey, Opcode, Operand, SectionKind,
    SectionLimits, StringKey, TypeKey,
};
use dexmerge_dex_model::{
    ClassRepository, DexDirectory, DexFile, DexModelError, EntryMap, MergePolicy, TypeRename,
};

fn method(s: &str) -> MethodKey {
    s.parse().unwrap()
}

fn add_class(file: &mut DexFile, key: &str) {
    let key = TypeKey::new(key);
    file.get_or_create_class(&key);
    file.get_or_create_method(
        &MethodKey::new(key, "run", vec![], TypeKey::new("V")),
        AccessFlags::PUBLIC,
    )
    .unwrap();
}

fn file_with(classes: &[&str]) -> DexFile {
    let mut file = DexFile::new("", SectionLimits::default());
    for class in classes {
        add_class(&mut file, class);
    }
    file
}

fn with_directory(f: impl FnOnce(DexDirectory)) {
    let _ = pretty_env_logger::try_init();

    let mut app = file_with(&["La/b/C;", "La/b/C$Inner;", "La/b/CFoo;", "La/b/User;"]);
    app.class_mut(&TypeKey::new("La/b/C$Inner;"))
        .unwrap()
        .create_dalvik_inner_class_name("Inner")
        .unwrap();

    let array = app
        .container_mut()
        .intern_type(&TypeKey::new("[La/b/C;"));
    let source_name = app.container_mut().intern_string("a.b.C");
    let user = method("La/b/User;->run()V");
    let mut body = app.method_mut(&user).unwrap();
    body.add_instruction(Instruction::new(
        Opcode::ConstString,
        vec![0],
        Operand::String(source_name),
    ))
    .unwrap();
    body.add_instruction(Instruction::new(
        Opcode::NewArray,
        vec![0, 1],
        Operand::Type(array),
    ))
    .unwrap();
    body.add_instruction(Instruction::simple(Opcode::ReturnVoid))
        .unwrap();

    let library = file_with(&["Lx/Lib;"]);
    f(DexDirectory::from_files([app, library]).unwrap());
}

#[test]
fn test_resolve_classes_across_containers() {
    with_directory(|directory| {
        assert_eq!(2, directory.len());
        assert_eq!(5, directory.class_count());
        assert_eq!(Some(1), directory.locate(&TypeKey::new("Lx/Lib;")));
        let class = directory.get_class(&TypeKey::new("La/b/C$Inner;")).unwrap();
        assert_eq!(Some("Inner"), class.dalvik_inner_class_name());
    });
}

#[test]
fn test_merge_directories() {
    with_directory(|mut directory| {
        let mut other = DexDirectory::from_files([file_with(&["La/b/C;", "Ly/New;"])]).unwrap();
        let mut policy = MergePolicy::new();

        directory.merge(&mut policy, &mut other).unwrap();

        assert_eq!(vec![TypeKey::new("La/b/C;")], policy.duplicates());
        assert_eq!(vec![TypeKey::new("Ly/New;")], policy.merged());
        assert_eq!(6, directory.class_count());
        assert_eq!(2, directory.len());
    });
}

#[test]
fn test_merge_overflow_into_new_containers() {
    let limits = SectionLimits::default()
        .with_reserve(0)
        .with_limit(SectionKind::MethodId, 2);
    let mut directory = DexDirectory::with_limits(limits);
    let index = directory.create_default().unwrap();
    add_class(directory.get_mut(index).unwrap().unwrap(), "La/A;");
    let mut other =
        DexDirectory::from_files([file_with(&["Lb/B;", "Lb/C;", "Lb/D;", "Lb/E;"])]).unwrap();
    let mut policy = MergePolicy::new();

    directory.merge(&mut policy, &mut other).unwrap();

    assert_eq!(3, directory.len());
    assert_eq!(4, policy.merged().len());
    for key in ["La/A;", "Lb/B;", "Lb/C;", "Lb/D;", "Lb/E;"] {
        assert!(directory.get_class(&TypeKey::new(key)).is_some(), "{}", key);
    }
}

#[test]
fn test_rename_type_everywhere() {
    with_directory(|mut directory| {
        let renames = TypeRename::new()
            .rename(TypeKey::new("La/b/C;"), TypeKey::new("La/b/D;"))
            .with_source_names(true);

        directory.rename_types(&renames).unwrap();

        assert!(directory.contains_class(&TypeKey::new("La/b/D;")));
        assert!(directory.contains_class(&TypeKey::new("La/b/CFoo;")));
        assert!(!directory.contains_class(&TypeKey::new("La/b/C;")));
        let inner = directory.get_class(&TypeKey::new("La/b/D$Inner;")).unwrap();
        assert_eq!(Some("Inner"), inner.dalvik_inner_class_name());

        let user = directory
            .declared_method(&method("La/b/User;->run()V"), false)
            .unwrap();
        assert_eq!(
            Some(Key::String(StringKey::new("a.b.D"))),
            user.instruction(0).unwrap().key()
        );
        assert_eq!(
            Some(Key::Type(TypeKey::new("[La/b/D;"))),
            user.instruction(1).unwrap().key()
        );
    });
}

#[test]
fn test_rename_single_type_with_source_names() {
    with_directory(|mut directory| {
        let rewritten = directory
            .rename(&TypeKey::new("La/b/C;"), &TypeKey::new("La/b/D;"))
            .unwrap();

        assert!(rewritten > 0);
        assert!(directory.contains_class(&TypeKey::new("La/b/D$Inner;")));
        let user = directory
            .declared_method(&method("La/b/User;->run()V"), false)
            .unwrap();
        assert_eq!(
            Some(Key::String(StringKey::new("a.b.D"))),
            user.instruction(0).unwrap().key()
        );
    });
}

#[test]
fn test_rename_method_conflict() {
    let mut file = file_with(&["La/A;", "La/B;"]);
    file.class_mut(&TypeKey::new("La/B;"))
        .unwrap()
        .set_super_class(Some(&TypeKey::new("La/A;")))
        .unwrap();
    file.get_or_create_method(&method("La/A;->stop()V"), AccessFlags::PUBLIC)
        .unwrap();
    let mut directory = DexDirectory::from_files([file]).unwrap();

    let result = directory.rename_method(&method("La/B;->run()V"), "stop");

    assert!(matches!(result, Err(DexModelError::Conflict(_))));
    assert!(directory.contains(&Key::Method(method("La/A;->run()V"))));
    assert!(directory.contains(&Key::Method(method("La/B;->run()V"))));
    assert!(directory.contains(&Key::Method(method("La/A;->stop()V"))));
}

#[test]
fn test_rename_method_through_hierarchy() {
    let mut file = file_with(&["La/A;", "La/B;"]);
    file.class_mut(&TypeKey::new("La/B;"))
        .unwrap()
        .set_super_class(Some(&TypeKey::new("La/A;")))
        .unwrap();
    let mut directory = DexDirectory::from_files([file]).unwrap();

    let renamed = directory
        .rename_method(&method("La/B;->run()V"), "start")
        .unwrap();

    assert!(renamed.contains(&method("La/A;->start()V")));
    assert!(renamed.contains(&method("La/B;->start()V")));
    assert!(!directory.contains(&Key::Method(method("La/A;->run()V"))));
}

#[test]
fn test_widen_inaccessible_declarations() {
    let mut library = DexFile::new("", SectionLimits::default());
    library.get_or_create_class(&TypeKey::new("La/A;"));
    library
        .class_mut(&TypeKey::new("La/A;"))
        .unwrap()
        .set_access_flags(AccessFlags::empty())
        .unwrap();
    let run = method("La/A;->run()V");
    library.get_or_create_method(&run, AccessFlags::empty()).unwrap();
    let count: FieldKey = "La/A;->count:I".parse().unwrap();
    library.get_or_create_field(&count, AccessFlags::empty()).unwrap();

    let mut caller = file_with(&["Lb/B;"]);
    let invoked = caller.container_mut().intern_method(&run);
    let read = caller.container_mut().intern_field(&count);
    let mut body = caller.method_mut(&method("Lb/B;->run()V")).unwrap();
    body.add_instruction(Instruction::new(
        Opcode::InvokeVirtual,
        vec![0],
        Operand::Method(invoked),
    ))
    .unwrap();
    body.add_instruction(Instruction::new(
        Opcode::Iget,
        vec![1, 0],
        Operand::Field(read),
    ))
    .unwrap();
    let mut directory = DexDirectory::from_files([library, caller]).unwrap();

    let widened = directory.fix_accessibility(&TypeKey::new("Lb/B;"));

    assert!(widened.contains(&Key::Type(TypeKey::new("La/A;"))));
    assert!(widened.contains(&Key::Method(run.clone())));
    assert!(widened.contains(&Key::Field(count.clone())));
    let library = directory.first().unwrap().unwrap();
    for key in [Key::Method(run), Key::Field(count)] {
        assert!(library
            .access_flags(&key)
            .unwrap()
            .contains(AccessFlags::PUBLIC));
    }
    assert!(directory.fix_accessibility(&TypeKey::new("Lb/B;")).is_empty());
}

#[test]
fn test_instruction_handles_follow_edits() {
    let mut file = file_with(&["La/A;"]);
    let key = method("La/A;->run()V");
    let mut body = file.method_mut(&key).unwrap();
    for literal in 0..12 {
        body.add_instruction(Instruction::new(
            Opcode::Const16,
            vec![0],
            Operand::Literal(literal),
        ))
        .unwrap();
    }
    body.add_instruction(Instruction::simple(Opcode::ReturnVoid))
        .unwrap();
    let fifth = file.instruction_ref(&key, 5).unwrap();
    let tenth = file.instruction_ref(&key, 10).unwrap();
    let third = file.instruction_ref(&key, 3).unwrap();

    third
        .insert_before(&mut file, Instruction::simple(Opcode::Nop))
        .unwrap();

    assert_eq!(6, fifth.position(&file).unwrap());
    assert_eq!(11, tenth.position(&file).unwrap());
    assert_eq!(&Operand::Literal(5), fifth.view(&file).unwrap().operand());
    assert_eq!(&Operand::Literal(10), tenth.view(&file).unwrap().operand());
    assert_eq!(21, tenth.view(&file).unwrap().address());

    file.shrink();

    assert!(!fifth.is_attached(&file));
}

#[test]
fn test_refuse_cyclic_merge() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("classes.dex"),
        file_with(&["La/A;"]).to_bytes().unwrap(),
    )
    .unwrap();
    let mut directory = DexDirectory::open(dir.path()).unwrap();
    let mut same = DexDirectory::open(dir.path()).unwrap();

    let result = directory.merge(&mut MergePolicy::new(), &mut same);

    assert!(matches!(result, Err(DexModelError::CyclicMerge)));
}

#[test]
fn test_distribute_classes() {
    let mut directory = DexDirectory::from_files([file_with(&[
        "La/A;", "La/B;", "La/C;", "La/D;", "La/E;", "La/F;",
    ])])
    .unwrap();

    let moved = directory.distribute_classes(2).unwrap();

    assert_eq!(4, moved);
    assert_eq!(3, directory.len());
    for index in 0..3 {
        assert_eq!(
            2,
            directory.get(index).unwrap().unwrap().container().class_count()
        );
    }
    assert_eq!(6, directory.class_count());
}

#[test]
fn test_save_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let mut directory = DexDirectory::open(dir.path()).unwrap();
    assert!(directory.is_empty());
    directory.create_default().unwrap();
    directory.create_default().unwrap();
    add_class(directory.get_mut(0).unwrap().unwrap(), "La/A;");
    add_class(directory.get_mut(1).unwrap().unwrap(), "La/B;");

    directory.save().unwrap();
    directory.close();

    assert!(dir.path().join("classes.dex").is_file());
    assert!(dir.path().join("classes2.dex").is_file());
    let mut reopened = DexDirectory::open(dir.path()).unwrap();
    assert_eq!(2, reopened.len());
    assert!(reopened.contains_class(&TypeKey::new("La/B;")));

    reopened.remove_class(&TypeKey::new("La/B;"));
    reopened.save().unwrap();

    assert!(!dir.path().join("classes2.dex").exists());
    assert_eq!(1, reopened.len());

    let copy = tempfile::tempdir().unwrap();
    reopened.save_to(copy.path()).unwrap();
    assert!(copy.path().join("classes.dex").is_file());
}

#[test]
fn test_load_from_entries() {
    let map = EntryMap::new();
    map.insert("assets/classes.dex", file_with(&["La/A;"]).to_bytes().unwrap());
    map.insert("assets/classes2.dex", file_with(&["La/B;"]).to_bytes().unwrap());
    map.insert("classes.dex", file_with(&["La/Outside;"]).to_bytes().unwrap());

    let mut directory = DexDirectory::from_entries(&map, "assets").unwrap();

    assert_eq!(2, directory.len());
    assert!(directory.contains_class(&TypeKey::new("La/B;")));
    assert!(!directory.contains_class(&TypeKey::new("La/Outside;")));

    let index = directory.create_default().unwrap();
    add_class(directory.get_mut(index).unwrap().unwrap(), "La/C;");
    directory.save().unwrap();

    assert!(map.contains("assets/classes3.dex"));
}

#[test]
fn test_fail_on_unreadable_container() {
    let map = EntryMap::new();
    map.insert("classes.dex", file_with(&["La/A;"]).to_bytes().unwrap());
    map.insert("classes2.dex", b"not a container".to_vec());

    let result = DexDirectory::from_entries(&map, "");

    assert!(matches!(result, Err(DexModelError::DexFile(_))));
}
