//! End-to-end pipeline behavior over mock package images and an in-memory
//! sink: expansion, filtering, ordering properties, failure policy, and
//! temp-file hygiene.

use xunfold::archive::TarWriter;
use xunfold::fetch::{FetchError, ImageDescriptor, ImageFetcher, ImageRef, LayerInfo};
use xunfold::sink::FailingSink;
use xunfold::{Config, EmitMode, Error, Pipeline, Unpacker, VecSink};

use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

// ============================================================================
// Mock artifacts
// ============================================================================

/// In-memory registry: repository -> layer blobs (or a forced failure).
/// Records the order repositories were fetched in.
struct MockRegistry {
    artifacts: HashMap<String, Vec<Vec<u8>>>,
    failing: Vec<String>,
    calls: Mutex<Vec<String>>,
}

impl MockRegistry {
    fn new() -> Self {
        Self {
            artifacts: HashMap::new(),
            failing: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn with_artifact(mut self, repository: &str, blobs: Vec<Vec<u8>>) -> Self {
        self.artifacts.insert(repository.to_string(), blobs);
        self
    }

    fn with_failing(mut self, repository: &str) -> Self {
        self.failing.push(repository.to_string());
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl ImageFetcher for MockRegistry {
    fn fetch(&self, image: &ImageRef, dest: &mut File) -> Result<ImageDescriptor, FetchError> {
        self.calls.lock().unwrap().push(image.repository.clone());

        if self.failing.contains(&image.repository) {
            return Err(FetchError::Manifest("mock registry failure".to_string()));
        }
        let blobs = self.artifacts.get(&image.repository).ok_or_else(|| {
            FetchError::Manifest(format!("no mock artifact for {}", image.repository))
        })?;

        let mut tar = TarWriter::new(dest);
        let mut descriptor = ImageDescriptor::default();
        for (i, blob) in blobs.iter().enumerate() {
            tar.append(&format!("blobs/sha256/{i:064x}"), blob)?;
            descriptor.layers.push(LayerInfo {
                digest: format!("sha256:{i:064x}"),
                size: blob.len() as u64,
            });
        }
        tar.finish()?;
        Ok(descriptor)
    }
}

fn layer_tar(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut w = TarWriter::new(&mut buf);
    for (name, data) in entries {
        w.append(name, data).unwrap();
    }
    w.finish().unwrap();
    buf
}

fn gz(data: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

/// One gzip layer carrying the given package manifest.
fn package_blobs(manifest: &str) -> Vec<Vec<u8>> {
    vec![gz(&layer_tar(&[("package.yaml", manifest.as_bytes())]))]
}

// ============================================================================
// Pipeline wiring
// ============================================================================

fn pipeline_with(
    registry: Arc<MockRegistry>,
    sink: Arc<VecSink>,
    config: Config,
    temp_root: &Path,
) -> Pipeline {
    let unpacker = Arc::new(Unpacker::new(registry).with_temp_root(temp_root));
    Pipeline::new(config, unpacker, sink)
}

fn provider_doc(name: &str, repository: &str) -> String {
    format!(
        "---\napiVersion: pkg.crossplane.io/v1\nkind: Provider\nmetadata:\n  name: {name}\nspec:\n  package: example.com/{repository}:v1\n"
    )
}

/// Parse an emitted stream back into a multiset of documents.
fn parse_stream(bytes: &[u8]) -> Vec<serde_yaml::Value> {
    String::from_utf8(bytes.to_vec())
        .unwrap()
        .split("---")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| serde_yaml::from_str(s).unwrap())
        .collect()
}

fn doc(yaml: &str) -> serde_yaml::Value {
    serde_yaml::from_str(yaml).unwrap()
}

fn config(workers: usize) -> Config {
    Config {
        workers,
        ..Config::default()
    }
}

// ============================================================================
// Empty and drop-only inputs
// ============================================================================

#[test]
fn empty_input_emits_nothing_and_succeeds() {
    for input in ["", "---\n", "---\n\n---\n"] {
        let root = tempfile::tempdir().unwrap();
        let sink = Arc::new(VecSink::new());
        let p = pipeline_with(
            Arc::new(MockRegistry::new()),
            Arc::clone(&sink),
            config(2),
            root.path(),
        );
        p.run(&mut input.as_bytes()).unwrap();
        assert!(sink.is_empty(), "input {input:?} produced output");
    }
}

#[test]
fn unrecognized_kind_documents_are_dropped() {
    let input = "\
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: cm
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: d
";
    let root = tempfile::tempdir().unwrap();
    let sink = Arc::new(VecSink::new());
    let p = pipeline_with(
        Arc::new(MockRegistry::new()),
        Arc::clone(&sink),
        config(2),
        root.path(),
    );
    p.run(&mut input.as_bytes()).unwrap();
    assert!(sink.is_empty());
}

#[test]
fn undecodable_top_level_documents_are_skipped_silently() {
    let input = "---\n:::: not yaml at all {[\n---\njust: scalars\n";
    let root = tempfile::tempdir().unwrap();
    let sink = Arc::new(VecSink::new());
    let p = pipeline_with(
        Arc::new(MockRegistry::new()),
        Arc::clone(&sink),
        config(2),
        root.path(),
    );
    p.run(&mut input.as_bytes()).unwrap();
    assert!(sink.is_empty());
}

// ============================================================================
// Package expansion
// ============================================================================

const PKG_ONE_MANIFEST: &str = "\
---
apiVersion: meta.pkg.crossplane.io/v1
kind: Provider
metadata:
  name: meta-one
---
apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
metadata:
  name: widgets.one.example.org
---
apiVersion: one.example.org/v1
kind: Widget
metadata:
  name: sample-one
";

const PKG_TWO_MANIFEST: &str = "\
---
apiVersion: meta.pkg.crossplane.io/v1
kind: Provider
metadata:
  name: meta-two
---
apiVersion: two.example.org/v1
kind: Gadget
metadata:
  name: sample-two
";

fn two_package_registry() -> MockRegistry {
    MockRegistry::new()
        .with_artifact("pkg/one", package_blobs(PKG_ONE_MANIFEST))
        .with_artifact("pkg/two", package_blobs(PKG_TWO_MANIFEST))
}

fn expected_union() -> Vec<serde_yaml::Value> {
    vec![
        doc("apiVersion: apiextensions.k8s.io/v1\nkind: CustomResourceDefinition\nmetadata:\n  name: widgets.one.example.org"),
        doc("apiVersion: one.example.org/v1\nkind: Widget\nmetadata:\n  name: sample-one"),
        doc("apiVersion: two.example.org/v1\nkind: Gadget\nmetadata:\n  name: sample-two"),
    ]
}

fn assert_same_set(mut got: Vec<serde_yaml::Value>, mut want: Vec<serde_yaml::Value>) {
    let key = |v: &serde_yaml::Value| serde_yaml::to_string(v).unwrap();
    got.sort_by_key(key);
    want.sort_by_key(key);
    assert_eq!(got, want);
}

#[test]
fn packages_expand_to_the_union_of_non_meta_sub_documents() {
    let input = format!(
        "{}{}",
        provider_doc("one", "pkg/one"),
        provider_doc("two", "pkg/two")
    );

    let root = tempfile::tempdir().unwrap();
    let sink = Arc::new(VecSink::new());
    let p = pipeline_with(
        Arc::new(two_package_registry()),
        Arc::clone(&sink),
        config(4),
        root.path(),
    );
    p.run(&mut input.as_bytes()).unwrap();

    assert_same_set(parse_stream(&sink.take()), expected_union());
}

#[test]
fn output_set_is_invariant_under_worker_count() {
    let input = format!(
        "{}{}",
        provider_doc("one", "pkg/one"),
        provider_doc("two", "pkg/two")
    );

    let mut sets = Vec::new();
    for workers in [1, 4] {
        let root = tempfile::tempdir().unwrap();
        let sink = Arc::new(VecSink::new());
        let p = pipeline_with(
            Arc::new(two_package_registry()),
            Arc::clone(&sink),
            config(workers),
            root.path(),
        );
        p.run(&mut input.as_bytes()).unwrap();

        let key = |v: &serde_yaml::Value| serde_yaml::to_string(v).unwrap();
        let mut docs = parse_stream(&sink.take());
        docs.sort_by_key(key);
        sets.push(docs);
    }
    assert_eq!(sets[0], sets[1]);
}

#[test]
fn sub_document_order_within_one_package_is_preserved() {
    let input = provider_doc("one", "pkg/one");
    let root = tempfile::tempdir().unwrap();
    let sink = Arc::new(VecSink::new());
    let p = pipeline_with(
        Arc::new(two_package_registry()),
        Arc::clone(&sink),
        config(4),
        root.path(),
    );
    p.run(&mut input.as_bytes()).unwrap();

    let docs = parse_stream(&sink.take());
    let kinds: Vec<&str> = docs
        .iter()
        .map(|d| d.get("kind").unwrap().as_str().unwrap())
        .collect();
    assert_eq!(kinds, ["CustomResourceDefinition", "Widget"]);
}

#[test]
fn decoded_emit_mode_re_renders_registered_sub_documents() {
    // A package embedding a registered kind: in decoded mode it is emitted
    // as a re-rendered object, and unknown kinds still pass through.
    let manifest = "\
---
apiVersion: pkg.crossplane.io/v1
kind: Provider
metadata:
  name: nested
spec:
  package: example.com/pkg/nested:v1
---
apiVersion: one.example.org/v1
kind: Widget
metadata:
  name: w
";
    let registry =
        MockRegistry::new().with_artifact("pkg/main", package_blobs(manifest));

    let root = tempfile::tempdir().unwrap();
    let sink = Arc::new(VecSink::new());
    let p = pipeline_with(
        Arc::new(registry),
        Arc::clone(&sink),
        Config {
            workers: 2,
            emit: EmitMode::Decoded,
            ..Config::default()
        },
        root.path(),
    );
    p.run(&mut provider_doc("main", "pkg/main").as_bytes())
        .unwrap();

    let docs = parse_stream(&sink.take());
    assert_same_set(
        docs,
        vec![
            doc("apiVersion: pkg.crossplane.io/v1\nkind: Provider\nmetadata:\n  name: nested\nspec:\n  package: example.com/pkg/nested:v1"),
            doc("apiVersion: one.example.org/v1\nkind: Widget\nmetadata:\n  name: w"),
        ],
    );
}

#[test]
fn malformed_sub_document_fails_the_package_task() {
    let registry = MockRegistry::new()
        .with_artifact("pkg/bad", package_blobs("---\n:::: garbage {[\n"));

    let root = tempfile::tempdir().unwrap();
    let sink = Arc::new(VecSink::new());
    let p = pipeline_with(
        Arc::new(registry),
        Arc::clone(&sink),
        config(2),
        root.path(),
    );
    let err = p
        .run(&mut provider_doc("bad", "pkg/bad").as_bytes())
        .unwrap_err();
    assert!(matches!(err, Error::Decode(_)), "got {err}");
}

#[test]
fn missing_package_manifest_surfaces_not_found() {
    let registry = MockRegistry::new()
        .with_artifact("pkg/hollow", vec![gz(&layer_tar(&[("readme.txt", b"hi")]))]);

    let root = tempfile::tempdir().unwrap();
    let sink = Arc::new(VecSink::new());
    let p = pipeline_with(
        Arc::new(registry),
        Arc::clone(&sink),
        config(2),
        root.path(),
    );
    let err = p
        .run(&mut provider_doc("hollow", "pkg/hollow").as_bytes())
        .unwrap_err();
    assert!(err.is_not_found(), "got {err}");
}

// ============================================================================
// Composite definitions
// ============================================================================

const XRD_WITH_CLAIM: &str = "\
---
apiVersion: apiextensions.crossplane.io/v1
kind: CompositeResourceDefinition
metadata:
  name: xbuckets.example.org
spec:
  group: example.org
  names:
    plural: xbuckets
    kind: XBucket
  claimNames:
    plural: buckets
    kind: Bucket
  versions:
    - name: v1
      served: true
      referenceable: true
";

const XRD_WITHOUT_CLAIM: &str = "\
---
apiVersion: apiextensions.crossplane.io/v1
kind: CompositeResourceDefinition
metadata:
  name: xbuckets.example.org
spec:
  group: example.org
  names:
    plural: xbuckets
    kind: XBucket
  versions:
    - name: v1
      served: true
      referenceable: true
";

#[test]
fn definition_with_claim_identity_yields_two_documents() {
    let root = tempfile::tempdir().unwrap();
    let sink = Arc::new(VecSink::new());
    let p = pipeline_with(
        Arc::new(MockRegistry::new()),
        Arc::clone(&sink),
        config(2),
        root.path(),
    );
    p.run(&mut XRD_WITH_CLAIM.as_bytes()).unwrap();

    let docs = parse_stream(&sink.take());
    assert_eq!(docs.len(), 2);
    for d in &docs {
        assert_eq!(
            d.get("kind").unwrap().as_str().unwrap(),
            "CustomResourceDefinition"
        );
        assert_eq!(
            d.get("apiVersion").unwrap().as_str().unwrap(),
            "apiextensions.k8s.io/v1"
        );
        let metadata = d.get("metadata").unwrap();
        assert!(
            metadata.get("ownerReferences").is_none(),
            "synthesized output must not carry an owner link"
        );
    }
    let names: Vec<&str> = docs
        .iter()
        .map(|d| d.get("metadata").unwrap().get("name").unwrap().as_str().unwrap())
        .collect();
    assert!(names.contains(&"xbuckets.example.org"));
    assert!(names.contains(&"buckets.example.org"));
}

#[test]
fn definition_without_claim_identity_yields_one_document() {
    let root = tempfile::tempdir().unwrap();
    let sink = Arc::new(VecSink::new());
    let p = pipeline_with(
        Arc::new(MockRegistry::new()),
        Arc::clone(&sink),
        config(2),
        root.path(),
    );
    p.run(&mut XRD_WITHOUT_CLAIM.as_bytes()).unwrap();
    assert_eq!(parse_stream(&sink.take()).len(), 1);
}

// ============================================================================
// Failure policy
// ============================================================================

#[test]
fn fail_fast_prevents_later_extractions() {
    let registry = Arc::new(
        two_package_registry().with_failing("pkg/broken"),
    );
    let input = format!(
        "{}{}{}",
        provider_doc("one", "pkg/one"),
        provider_doc("broken", "pkg/broken"),
        provider_doc("two", "pkg/two")
    );

    let root = tempfile::tempdir().unwrap();
    let sink = Arc::new(VecSink::new());
    let p = pipeline_with(
        Arc::clone(&registry),
        Arc::clone(&sink),
        Config {
            workers: 1, // sequential task order makes the cut-off observable
            fail_fast: true,
            ..Config::default()
        },
        root.path(),
    );
    let err = p.run(&mut input.as_bytes()).unwrap_err();
    assert!(!err.is_cancelled());

    let calls = registry.calls();
    assert_eq!(calls, ["pkg/one", "pkg/broken"], "task 3 must not fetch");
}

#[test]
fn without_fail_fast_later_tasks_complete_normally() {
    let registry = Arc::new(
        two_package_registry().with_failing("pkg/broken"),
    );
    let input = format!(
        "{}{}{}",
        provider_doc("one", "pkg/one"),
        provider_doc("broken", "pkg/broken"),
        provider_doc("two", "pkg/two")
    );

    let root = tempfile::tempdir().unwrap();
    let sink = Arc::new(VecSink::new());
    let p = pipeline_with(
        Arc::clone(&registry),
        Arc::clone(&sink),
        Config {
            workers: 1,
            fail_fast: false,
            ..Config::default()
        },
        root.path(),
    );
    let err = p.run(&mut input.as_bytes()).unwrap_err();
    assert!(!err.is_cancelled());

    assert_eq!(registry.calls(), ["pkg/one", "pkg/broken", "pkg/two"]);
    // Output from the healthy packages is kept, not rolled back.
    assert_same_set(parse_stream(&sink.take()), expected_union());
}

#[test]
fn allow_failure_swallows_the_run_error_but_keeps_output() {
    let registry = Arc::new(
        two_package_registry().with_failing("pkg/broken"),
    );
    let input = format!(
        "{}{}",
        provider_doc("broken", "pkg/broken"),
        provider_doc("one", "pkg/one")
    );

    let root = tempfile::tempdir().unwrap();
    let sink = Arc::new(VecSink::new());
    let p = pipeline_with(
        Arc::clone(&registry),
        Arc::clone(&sink),
        Config {
            workers: 1,
            allow_failure: true,
            ..Config::default()
        },
        root.path(),
    );
    p.run(&mut input.as_bytes()).unwrap();
    assert!(!parse_stream(&sink.take()).is_empty());
}

#[test]
fn sink_write_failure_aborts_even_without_fail_fast() {
    let registry = Arc::new(two_package_registry());
    let input = format!(
        "{}{}",
        provider_doc("one", "pkg/one"),
        provider_doc("two", "pkg/two")
    );

    let root = tempfile::tempdir().unwrap();
    let unpacker = Arc::new(Unpacker::new(registry).with_temp_root(root.path()));
    let p = Pipeline::new(
        Config {
            workers: 2,
            fail_fast: false,
            ..Config::default()
        },
        unpacker,
        Arc::new(FailingSink),
    );
    let err = p.run(&mut input.as_bytes()).unwrap_err();
    assert!(matches!(err, Error::Io(_)), "got {err}");
}

// ============================================================================
// Temp-file hygiene
// ============================================================================

#[test]
fn runs_leave_no_temporary_files_behind() {
    let registry = Arc::new(
        two_package_registry()
            .with_failing("pkg/broken")
            .with_artifact("pkg/hollow", vec![gz(&layer_tar(&[("readme.txt", b"hi")]))]),
    );
    // Success, fetch failure, and not-found paths all in one run.
    let input = format!(
        "{}{}{}",
        provider_doc("one", "pkg/one"),
        provider_doc("broken", "pkg/broken"),
        provider_doc("hollow", "pkg/hollow")
    );

    let root = tempfile::tempdir().unwrap();
    let sink = Arc::new(VecSink::new());
    let p = pipeline_with(registry, Arc::clone(&sink), config(3), root.path());
    let _ = p.run(&mut input.as_bytes());

    let leftover: Vec<_> = std::fs::read_dir(root.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert!(leftover.is_empty(), "leaked temp entries: {leftover:?}");
}
