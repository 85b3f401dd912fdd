use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{Cursor, Read, Write};
use std::sync::Arc;

use tempfile::tempdir;
use tinybundle::jar::Jar;
use tinybundle::manifest::MANIFEST_PATH;
use tinybundle::{
    AnalyzerPlugin, AssemblyConfig, BuildStrategy, BundleAssembler, BundleError, Headers, Manifest, ResourceStore,
    WriteMode,
};
use zip::write::SimpleFileOptions;
use zip::ZipArchive;

fn config(mode: WriteMode) -> AssemblyConfig {
    AssemblyConfig { write_mode: mode, ..AssemblyConfig::default() }
}

fn entry_names(bytes: &[u8]) -> BTreeSet<String> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    (0..archive.len()).map(|i| archive.by_index(i).unwrap().name().to_string()).collect()
}

fn read_entry(bytes: &[u8], name: &str) -> Vec<u8> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut out = Vec::new();
    archive.by_name(name).unwrap().read_to_end(&mut out).unwrap();
    out
}

fn manifest_of(bytes: &[u8]) -> Manifest {
    Jar::read_manifest(Cursor::new(bytes)).unwrap().expect("artifact has a manifest")
}

fn demo_store() -> ResourceStore {
    let mut store = ResourceStore::new();
    store.add_bytes("org/demo/api/Service.class", vec![0xca, 0xfe, 0xba, 0xbe]);
    store.add_bytes("org/demo/impl/ServiceImpl.class", vec![0xca, 0xfe, 0xba, 0xbe, 0x01]);
    store.add_bytes("readme.txt", b"hello bundle".to_vec());
    store
}

#[test]
fn buffered_bundle_roundtrip() {
    let mut store = demo_store();
    store.set_header("Bundle-SymbolicName", "org.demo");
    store.set_header("Bundle-Version", "1.2.3");

    let assembler = BundleAssembler::new(config(WriteMode::Buffered));
    let artifact = assembler.build(&store).unwrap();
    assert!(artifact.is_buffered());
    let bytes = artifact.into_bytes().unwrap();

    let expected: BTreeSet<String> = [
        MANIFEST_PATH,
        "org/demo/api/Service.class",
        "org/demo/impl/ServiceImpl.class",
        "readme.txt",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    assert_eq!(entry_names(&bytes), expected);
    assert_eq!(read_entry(&bytes, "readme.txt"), b"hello bundle");

    let manifest = manifest_of(&bytes);
    assert_eq!(manifest.get("Bundle-SymbolicName"), Some("org.demo"));
    assert_eq!(manifest.get("Bundle-Version"), Some("1.2.3"));
    assert_eq!(manifest.get("Bundle-ManifestVersion"), Some("2"));
    assert_eq!(manifest.get("Private-Package"), Some("org.demo.api,org.demo.impl"));

    let raw = read_entry(&bytes, MANIFEST_PATH);
    assert!(raw.starts_with(b"Manifest-Version: 1.0\r\n"));
}

#[test]
fn manifest_is_the_first_entry() {
    let store = demo_store();
    let bytes = BundleAssembler::new(config(WriteMode::Pipelined)).build(&store).unwrap().into_bytes().unwrap();
    let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    assert_eq!(archive.by_index(0).unwrap().name(), MANIFEST_PATH);
}

#[test]
fn missing_symbolic_name_gets_sanitized_default() {
    let config = AssemblyConfig { identifier_prefix: "Build By:".into(), ..config(WriteMode::Buffered) };
    let assembler = BundleAssembler::new(config);

    let first = assembler.build(&demo_store()).unwrap().into_bytes().unwrap();
    let second = assembler.build(&demo_store()).unwrap().into_bytes().unwrap();
    assert_eq!(manifest_of(&first).get("Bundle-SymbolicName"), Some("Build_By_0"));
    assert_eq!(manifest_of(&second).get("Bundle-SymbolicName"), Some("Build_By_1"));
}

#[test]
fn blank_symbolic_name_is_replaced() {
    let mut store = demo_store();
    store.set_header("Bundle-SymbolicName", "   ");
    let bytes = BundleAssembler::new(config(WriteMode::Buffered)).build(&store).unwrap().into_bytes().unwrap();
    assert_eq!(manifest_of(&bytes).get("Bundle-SymbolicName"), Some("BuildByTinyBundles0"));
}

#[test]
fn pipelined_output_matches_buffered() {
    let mut store = demo_store();
    store.set_header("Bundle-SymbolicName", "org.demo");
    let mut big = vec![0u8; 3 * 1024 * 1024];
    rand::Rng::fill(&mut rand::thread_rng(), &mut big[..]);
    store.add_bytes("data/big.bin", big.clone());

    let buffered = BundleAssembler::new(config(WriteMode::Buffered)).build(&store).unwrap().into_bytes().unwrap();
    let piped = BundleAssembler::new(config(WriteMode::Pipelined)).build(&store).unwrap().into_bytes().unwrap();
    assert!(buffered == piped);
    assert!(read_entry(&piped, "data/big.bin") == big);
}

#[test]
fn explicit_headers_override_store_headers() {
    let mut store = demo_store();
    store.set_header("Bundle-SymbolicName", "from.store");
    let mut headers = Headers::new();
    headers.insert("Bundle-SymbolicName".into(), "from.call".into());
    headers.insert("-noise".into(), "directive".into());

    let bytes = BundleAssembler::new(config(WriteMode::Buffered))
        .build_with(&store, &headers)
        .unwrap()
        .into_bytes()
        .unwrap();
    let manifest = manifest_of(&bytes);
    assert_eq!(manifest.get("Bundle-SymbolicName"), Some("from.call"));
    assert_eq!(manifest.get("-noise"), None);
}

fn existing_jar() -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file(MANIFEST_PATH, SimpleFileOptions::default()).unwrap();
    zip.write_all(b"Manifest-Version: 1.0\r\nBundle-SymbolicName: legacy.lib\r\nImport-Package: org.slf4j\r\nCreated-By: hand\r\n\r\n")
        .unwrap();
    zip.start_file("legacy/Lib.class", SimpleFileOptions::default()).unwrap();
    zip.write_all(&[0xca, 0xfe]).unwrap();
    zip.start_file("legacy/lib.properties", SimpleFileOptions::default()).unwrap();
    zip.write_all(b"a=b").unwrap();
    zip.finish().unwrap().into_inner()
}

#[test]
fn wrapping_keeps_existing_headers_and_entries() {
    let mut headers = Headers::new();
    headers.insert("Bundle-Version".into(), "4.0.0".into());
    headers.insert("-removeheaders".into(), "Import-Package, Created-By".into());

    let assembler = BundleAssembler::new(config(WriteMode::Pipelined));
    let bytes = assembler.wrap(&existing_jar(), &headers).unwrap().into_bytes().unwrap();

    let manifest = manifest_of(&bytes);
    assert_eq!(manifest.get("Bundle-SymbolicName"), Some("legacy.lib"));
    assert_eq!(manifest.get("Bundle-Version"), Some("4.0.0"));
    assert_eq!(manifest.get("Import-Package"), None);
    assert_eq!(manifest.get("Created-By"), None);
    assert_eq!(read_entry(&bytes, "legacy/lib.properties"), b"a=b");
    assert_eq!(entry_names(&bytes).len(), 3);
}

#[test]
fn wrapping_garbage_is_an_analysis_error() {
    let assembler = BundleAssembler::new(AssemblyConfig::default());
    let err = assembler.wrap(b"definitely not a zip", &Headers::new()).err().unwrap();
    assert!(matches!(err, BundleError::Analysis(_)), "got {err}");
}

#[test]
fn manifest_resource_in_store_is_merged_not_duplicated() {
    let mut store = demo_store();
    store.add_bytes(MANIFEST_PATH, b"Manifest-Version: 1.0\r\nX-Legacy: kept\r\n\r\n".to_vec());
    let bytes = BundleAssembler::new(config(WriteMode::Buffered)).build(&store).unwrap().into_bytes().unwrap();

    let mut archive = ZipArchive::new(Cursor::new(&bytes[..])).unwrap();
    let manifests = (0..archive.len()).filter(|&i| archive.by_index(i).unwrap().name() == MANIFEST_PATH).count();
    assert_eq!(manifests, 1);
    assert_eq!(manifest_of(&bytes).get("X-Legacy"), Some("kept"));
}

#[test]
fn broken_manifest_resource_fails_analysis() {
    let mut store = demo_store();
    store.add_bytes(MANIFEST_PATH, b" orphan continuation\r\n".to_vec());
    let err = BundleAssembler::new(AssemblyConfig::default()).build(&store).err().unwrap();
    assert!(matches!(err, BundleError::Analysis(_)), "got {err}");
}

#[test]
fn raw_strategy_writes_headers_verbatim() {
    let mut store = demo_store();
    store.set_header("X-Only", "this");
    let assembler = BundleAssembler::builder(config(WriteMode::Buffered))
        .strategy(BuildStrategy::Raw)
        .build()
        .unwrap();
    let manifest = manifest_of(&assembler.build(&store).unwrap().into_bytes().unwrap());
    assert_eq!(manifest.get("X-Only"), Some("this"));
    assert_eq!(manifest.get("Bundle-SymbolicName"), None);
    assert_eq!(manifest.get("Bundle-ManifestVersion"), None);
    assert_eq!(manifest.get("Manifest-Version"), Some("1.0"));
}

#[test]
fn directory_contents_are_bundled_lazily() {
    let dir = tempdir().unwrap();
    fs::create_dir_all(dir.path().join("sub")).unwrap();
    File::create(dir.path().join("a.txt")).unwrap().write_all(b"first").unwrap();
    File::create(dir.path().join("sub/b.txt")).unwrap().write_all(b"second").unwrap();

    let mut store = ResourceStore::new();
    assert_eq!(store.add_directory(dir.path(), "res/").unwrap(), 2);
    // content is read at build time, not at registration
    File::create(dir.path().join("a.txt")).unwrap().write_all(b"rewritten").unwrap();

    let bytes = BundleAssembler::new(config(WriteMode::Pipelined)).build(&store).unwrap().into_bytes().unwrap();
    assert_eq!(read_entry(&bytes, "res/a.txt"), b"rewritten");
    assert_eq!(read_entry(&bytes, "res/sub/b.txt"), b"second");
}

#[test]
fn deleted_file_fails_the_build() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("gone.txt");
    File::create(&path).unwrap().write_all(b"x").unwrap();
    let mut store = ResourceStore::new();
    store.add_file("gone.txt", &path);
    fs::remove_file(&path).unwrap();

    let err = BundleAssembler::new(config(WriteMode::Buffered)).build(&store).err().unwrap();
    match err {
        BundleError::Build(msg) => assert!(msg.contains("gone.txt")),
        other => panic!("unexpected error: {other}"),
    }
}

struct Stamp;

impl AnalyzerPlugin for Stamp {
    fn name(&self) -> &str {
        "stamp"
    }

    fn apply(&self, jar: &Jar, headers: &mut Headers) -> tinybundle::Result<()> {
        headers.insert("X-Entry-Count".into(), jar.len().to_string());
        headers.insert("Bundle-Vendor".into(), "plugin".into());
        Ok(())
    }
}

struct Broken;

impl AnalyzerPlugin for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    fn apply(&self, _jar: &Jar, _headers: &mut Headers) -> tinybundle::Result<()> {
        Err(BundleError::Other("refusing".into()))
    }
}

#[test]
fn plugins_contribute_headers_below_instructions() {
    let mut store = demo_store();
    store.set_header("Bundle-Vendor", "explicit");
    let assembler = BundleAssembler::builder(config(WriteMode::Buffered)).plugin(Arc::new(Stamp)).build().unwrap();
    let manifest = manifest_of(&assembler.build(&store).unwrap().into_bytes().unwrap());
    assert_eq!(manifest.get("X-Entry-Count"), Some("3"));
    assert_eq!(manifest.get("Bundle-Vendor"), Some("explicit"));
}

#[test]
fn failing_plugin_is_reported_by_name() {
    let assembler = BundleAssembler::builder(AssemblyConfig::default()).plugin(Arc::new(Broken)).build().unwrap();
    match assembler.build(&demo_store()).err().unwrap() {
        BundleError::Analysis(msg) => assert!(msg.contains("broken")),
        other => panic!("unexpected error: {other}"),
    }
}
