use std::{env, path::PathBuf};

use dexmerge_dex_model::{ClassRepository, DexDirectory, MergePolicy};

fn main() {
    pretty_env_logger::init();

    let mut args = env::args().skip(1).map(PathBuf::from);
    let Some(target) = args.next() else {
        eprintln!("Usage: dexmerge <target dir> <source dir>...");
        return;
    };

    let mut directory = DexDirectory::open(&target).unwrap();
    let mut policy = MergePolicy::new();
    for source in args {
        let mut other = DexDirectory::open(&source).unwrap();
        if let Err(e) = directory.merge(&mut policy, &mut other) {
            log::warn!("Skipped {}: {}", source.display(), e);
        }
    }

    println!("Merged: {}", policy.merged().len());
    println!("Duplicates: {}", policy.duplicates().len());
    for (container, key, kind) in policy.overflows() {
        println!("    {} refused {} ({})", container, key, kind);
    }

    directory.save().unwrap();
    for index in 0..directory.len() {
        let Ok(Some(file)) = directory.get(index) else {
            continue;
        };
        println!("{}: {} classes", file.name(), file.container().class_count());
    }
    println!("Total: {} classes", directory.class_count());
}
