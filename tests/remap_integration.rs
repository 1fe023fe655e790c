use anyhow::Result;
use byteorder::{BigEndian, WriteBytesExt};
use serde_json::Value;
use std::io::Write;
use std::path::Path;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use jremap::location::{FieldReference, FileLocation, MethodReference};
use jremap::rangemap::RangeMapBuilder;
use jremap::wire;

fn temp_dir(name: &str) -> std::path::PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!(
        "jremap_it_{}_{}_{}",
        std::process::id(),
        nanos,
        name
    ))
}

fn write_file(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

fn write_jar(path: &Path, entries: &[(&str, &[u8])]) -> Result<()> {
    use zip::write::FileOptions;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, content) in entries {
        zip.start_file(*name, options)?;
        zip.write_all(content)?;
    }
    zip.finish()?;
    Ok(())
}

/// A `.srg.dat` file renaming `Foo` -> `Qux`, `Foo.bar` -> `baz`, and
/// `Foo.run()V` -> `go`.
fn write_mappings_file(path: &Path) -> Result<()> {
    let mut data = Vec::new();
    data.extend_from_slice(b"SuperSrg binary mappings");
    data.push(0);
    data.write_u32::<BigEndian>(1)?;
    data.write_u16::<BigEndian>(0)?; // uncompressed

    data.write_u32::<BigEndian>(1)?; // one class
    wire::write_prefixed_str(&mut data, "Foo")?;
    wire::write_prefixed_str(&mut data, "Qux")?;
    data.write_u32::<BigEndian>(1)?; // one method
    wire::write_prefixed_str(&mut data, "run")?;
    wire::write_prefixed_str(&mut data, "go")?;
    wire::write_prefixed_str(&mut data, "()V")?;
    wire::write_prefixed_str(&mut data, "")?;
    data.write_u32::<BigEndian>(1)?; // one field
    wire::write_prefixed_str(&mut data, "bar")?;
    wire::write_prefixed_str(&mut data, "baz")?;

    write_file(path, &data)
}

/// A minimal class file: one FieldRef `Foo.bar:I`, a short tail after the
/// constant pool.
fn foo_class_file() -> Vec<u8> {
    let mut data = Vec::new();
    data.write_u32::<BigEndian>(0xCAFE_BABE).unwrap();
    data.write_u16::<BigEndian>(0).unwrap(); // minor
    data.write_u16::<BigEndian>(52).unwrap(); // major
    data.write_u16::<BigEndian>(7).unwrap(); // constant count

    // 1: Utf8 "Foo"
    data.push(1);
    data.write_u16::<BigEndian>(3).unwrap();
    data.extend_from_slice(b"Foo");
    // 2: Class -> #1
    data.push(7);
    data.write_u16::<BigEndian>(1).unwrap();
    // 3: Utf8 "bar"
    data.push(1);
    data.write_u16::<BigEndian>(3).unwrap();
    data.extend_from_slice(b"bar");
    // 4: Utf8 "I"
    data.push(1);
    data.write_u16::<BigEndian>(1).unwrap();
    data.extend_from_slice(b"I");
    // 5: NameAndType #3:#4
    data.push(12);
    data.write_u16::<BigEndian>(3).unwrap();
    data.write_u16::<BigEndian>(4).unwrap();
    // 6: FieldRef #2.#5
    data.push(9);
    data.write_u16::<BigEndian>(2).unwrap();
    data.write_u16::<BigEndian>(5).unwrap();

    // Post-pool bytes: access flags, this/super class, zeroed counts.
    data.extend_from_slice(&[0x00, 0x21, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    data
}

fn run_json(args: &[&str]) -> Result<Value> {
    let output = Command::new(env!("CARGO_BIN_EXE_jremap")).args(args).output()?;
    anyhow::ensure!(
        output.status.success(),
        "jremap {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(serde_json::from_slice(&output.stdout)?)
}

#[test]
fn apply_rewrites_a_source_tree_end_to_end() -> Result<()> {
    let base = temp_dir("apply");
    let source_dir = base.join("src");
    let output_dir = base.join("out");
    write_file(
        &source_dir.join("com/example/Foo.java"),
        b"class Foo {\n    int bar;\n    void run() { this.bar = 1; }\n}\n",
    )?;
    write_file(&source_dir.join("notes.txt"), b"left alone\n")?;

    // Reference offsets into the file above: the declaration of `bar`, the
    // declaration of `run`, and the `bar` in `this.bar`.
    let content = std::fs::read_to_string(source_dir.join("com/example/Foo.java"))?;
    let bar_decl = content.find("bar").unwrap() as u32;
    let run_decl = content.find("run").unwrap() as u32;
    let bar_use = content.rfind("bar").unwrap() as u32;

    let mut builder = RangeMapBuilder::new();
    builder.add_field_reference(
        "com/example/Foo.java",
        FieldReference::new(FileLocation::new(bar_decl, bar_decl + 3), "Foo", "bar"),
    );
    builder.add_method_reference(
        "com/example/Foo.java",
        MethodReference::new(FileLocation::new(run_decl, run_decl + 3), "Foo", "run", "()V"),
    );
    builder.add_field_reference(
        "com/example/Foo.java",
        FieldReference::new(FileLocation::new(bar_use, bar_use + 3), "Foo", "bar"),
    );
    let range_map_path = base.join("ranges.dat");
    builder.build().save(&range_map_path)?;

    let mappings_path = base.join("renames.srg.dat");
    write_mappings_file(&mappings_path)?;

    let output = run_json(&[
        "apply",
        source_dir.to_str().unwrap(),
        output_dir.to_str().unwrap(),
        range_map_path.to_str().unwrap(),
        mappings_path.to_str().unwrap(),
    ])?;
    assert_eq!(output["files"], 2);
    assert_eq!(output["renamed_references"], 3);

    let rewritten = std::fs::read_to_string(output_dir.join("com/example/Foo.java"))?;
    assert_eq!(
        rewritten,
        "class Foo {\n    int baz;\n    void go() { this.baz = 1; }\n}\n"
    );
    assert_eq!(
        std::fs::read_to_string(output_dir.join("notes.txt"))?,
        "left alone\n"
    );

    let _ = std::fs::remove_dir_all(base);
    Ok(())
}

#[test]
fn remap_jar_renames_classes_end_to_end() -> Result<()> {
    let base = temp_dir("remap_jar");
    let input_jar = base.join("in.jar");
    let output_jar = base.join("out.jar");
    let class = foo_class_file();
    write_jar(
        &input_jar,
        &[
            ("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n"),
            ("Foo.class", &class),
        ],
    )?;
    let mappings_path = base.join("renames.srg.dat");
    write_mappings_file(&mappings_path)?;

    let output = run_json(&[
        "remap-jar",
        input_jar.to_str().unwrap(),
        output_jar.to_str().unwrap(),
        mappings_path.to_str().unwrap(),
    ])?;
    assert_eq!(output["entries"], 2);
    assert_eq!(output["remapped_classes"], 1);
    assert_eq!(output["renamed_entries"], 1);

    let file = std::fs::File::open(&output_jar)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let mut remapped = Vec::new();
    std::io::Read::read_to_end(&mut archive.by_name("Qux.class")?, &mut remapped)?;

    // Three appended constants: UTF8 "Qux", UTF8 "baz", and a NameAndType.
    assert_eq!(&remapped[8..10], &10u16.to_be_bytes());
    let tail = &class[class.len() - 10..];
    assert_eq!(&remapped[remapped.len() - 10..], tail);
    let appended = &remapped[..remapped.len() - 10];
    assert!(
        appended
            .windows(3)
            .any(|window| window == b"Qux"),
        "appended pool should contain Qux"
    );
    assert!(appended.windows(3).any(|window| window == b"baz"));

    let _ = std::fs::remove_dir_all(base);
    Ok(())
}

#[test]
fn extract_tracks_changed_files_between_runs() -> Result<()> {
    let base = temp_dir("extract");
    let source_dir = base.join("src");
    write_file(&source_dir.join("A.java"), b"class A {}\n")?;
    write_file(&source_dir.join("B.java"), b"class B {}\n")?;
    let range_map_path = base.join("ranges.dat");

    let output = run_json(&[
        "extract",
        source_dir.to_str().unwrap(),
        range_map_path.to_str().unwrap(),
    ])?;
    assert_eq!(output["scanned_files"], 2);
    assert_eq!(output["changed_files"], 2);

    let output = run_json(&[
        "extract",
        source_dir.to_str().unwrap(),
        range_map_path.to_str().unwrap(),
    ])?;
    assert_eq!(output["changed_files"], 0);
    assert_eq!(output["skipped_files"], 2);

    write_file(&source_dir.join("B.java"), b"class B { int x; }\n")?;
    let output = run_json(&[
        "extract",
        source_dir.to_str().unwrap(),
        range_map_path.to_str().unwrap(),
    ])?;
    assert_eq!(output["changed_files"], 1);

    let _ = std::fs::remove_dir_all(base);
    Ok(())
}

#[test]
fn inspect_dumps_the_range_map_as_json() -> Result<()> {
    let base = temp_dir("inspect");
    std::fs::create_dir_all(&base)?;
    let mut builder = RangeMapBuilder::new();
    builder.add_field_reference(
        "Foo.java",
        FieldReference::new(FileLocation::new(16, 19), "Foo", "bar"),
    );
    let range_map_path = base.join("ranges.dat");
    builder.build().save(&range_map_path)?;

    let output = run_json(&["inspect", range_map_path.to_str().unwrap()])?;
    assert_eq!(output["fieldReferences"]["Foo.java"][0], "Foo/bar@16:19");

    let _ = std::fs::remove_dir_all(base);
    Ok(())
}
