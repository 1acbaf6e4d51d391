//! End-to-end runs against in-memory collaborators.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;
use std::time::Duration;

use futures::stream::{self, StreamExt};

use assetweave_core::{
    FileSource, FileStream, MapStage, PatternMatcher, RetrieveOptions, RunSummary, Stage, Useref,
    UserefOptions,
};
use assetweave_extract::{ExtractOptions, ReferenceExtractor};
use assetweave_shared::{
    AssetGroup, AssetweaveError, Contents, Extraction, GroupSpec, Result, StreamBody, VFile,
};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

type Disk = Arc<HashMap<String, Vec<u8>>>;

fn disk(files: &[(&str, &str)]) -> Disk {
    Arc::new(
        files
            .iter()
            .map(|(p, c)| (p.to_string(), c.as_bytes().to_vec()))
            .collect(),
    )
}

/// Matches a pattern only if the exact path is on the fake disk.
struct DiskMatcher(Disk);

impl PatternMatcher for DiskMatcher {
    fn expand(&self, pattern: &str) -> Result<Vec<String>> {
        Ok(self
            .0
            .contains_key(pattern)
            .then(|| vec![pattern.to_string()])
            .unwrap_or_default())
    }
}

/// Wraps [`DiskMatcher`] and records the thread each expansion ran on.
struct ThreadRecordingMatcher {
    inner: DiskMatcher,
    threads: Arc<Mutex<Vec<ThreadId>>>,
}

impl PatternMatcher for ThreadRecordingMatcher {
    fn expand(&self, pattern: &str) -> Result<Vec<String>> {
        self.threads.lock().unwrap().push(std::thread::current().id());
        self.inner.expand(pattern)
    }
}

/// Serves files from the fake disk and records every requested pattern.
#[derive(Clone)]
struct RecordingSource {
    disk: Disk,
    requested: Arc<Mutex<Vec<String>>>,
    reverse: bool,
    delay: Option<Duration>,
}

impl RecordingSource {
    fn new(disk: Disk) -> Self {
        Self {
            disk,
            requested: Arc::default(),
            reverse: false,
            delay: None,
        }
    }

    fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

impl FileSource for RecordingSource {
    fn retrieve(&self, patterns: Vec<String>, opts: RetrieveOptions) -> FileStream {
        self.requested.lock().unwrap().extend(patterns.iter().cloned());

        let mut items: Vec<Result<VFile>> = patterns
            .into_iter()
            .map(|p| match self.disk.get(&p) {
                Some(bytes) => Ok(VFile::new(&opts.cwd, &p, bytes.clone()).with_base(&opts.base)),
                None => Err(AssetweaveError::retrieval(&p, "file not found")),
            })
            .collect();
        if self.reverse {
            items.reverse();
        }

        let delay = self.delay;
        stream::iter(items)
            .then(move |item| async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                item
            })
            .boxed()
    }
}

/// Returns the same groups for every document.
struct FixedExtractor(Vec<AssetGroup>);

impl ReferenceExtractor for FixedExtractor {
    fn extract(&self, content: &str, _opts: &ExtractOptions) -> Result<Extraction> {
        Ok(Extraction {
            rewritten: content.to_string(),
            groups: self.0.clone(),
        })
    }
}

/// Understands `<!-- ref <name> -->a.css, b.css<!-- end -->`. The group type
/// comes from the first reference's extension.
struct CommentListExtractor;

impl ReferenceExtractor for CommentListExtractor {
    fn extract(&self, content: &str, opts: &ExtractOptions) -> Result<Extraction> {
        let parse_err = || AssetweaveError::parse("unterminated ref block");
        let mut rewritten = String::new();
        let mut groups = Vec::new();
        let mut rest = content;

        while let Some(start) = rest.find("<!-- ref ") {
            rewritten.push_str(&rest[..start]);
            let after = &rest[start + "<!-- ref ".len()..];
            let close = after.find("-->").ok_or_else(parse_err)?;
            let name = after[..close].trim();
            let body_start = &after[close + 3..];
            let end = body_start.find("<!-- end -->").ok_or_else(parse_err)?;

            let assets: Vec<String> = body_start[..end]
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            let kind = assets
                .first()
                .and_then(|a| a.rsplit_once('.'))
                .map(|(_, ext)| ext.to_string())
                .unwrap_or_default();
            let target = format!("{name}.{kind}");

            rewritten.push_str(&opts.render(&kind, &target).unwrap_or_default());
            groups.push(AssetGroup {
                kind,
                name: target,
                spec: GroupSpec {
                    assets,
                    search_paths: None,
                },
            });
            rest = &body_start[end + "<!-- end -->".len()..];
        }
        rewritten.push_str(rest);

        Ok(Extraction { rewritten, groups })
    }
}

fn group(kind: &str, name: &str, assets: &[&str]) -> AssetGroup {
    AssetGroup {
        kind: kind.to_string(),
        name: name.to_string(),
        spec: GroupSpec {
            assets: assets.iter().map(|a| a.to_string()).collect(),
            search_paths: None,
        },
    }
}

fn doc(path: &str, html: &str) -> VFile {
    VFile::new("/site", path, html.as_bytes().to_vec())
}

fn external(path: &str, body: &str) -> FileStream {
    let files: Vec<Result<VFile>> = vec![Ok(VFile::new("/gen", path, body.as_bytes().to_vec()))];
    stream::iter(files).boxed()
}

fn useref(options: UserefOptions, source: &RecordingSource) -> Useref {
    Useref::new(options)
        .matcher(DiskMatcher(Arc::clone(&source.disk)))
        .file_source(source.clone())
}

async fn run(useref: Useref, docs: Vec<VFile>) -> (Vec<Result<VFile>>, RunSummary) {
    tokio::time::timeout(Duration::from_secs(5), useref.run(stream::iter(docs)).collect())
        .await
        .expect("run should complete")
        .expect("run summary")
}

fn files(items: &[Result<VFile>]) -> Vec<&VFile> {
    items.iter().filter_map(|i| i.as_ref().ok()).collect()
}

fn errors(items: &[Result<VFile>]) -> Vec<&AssetweaveError> {
    items.iter().filter_map(|i| i.as_ref().err()).collect()
}

fn find<'a>(items: &'a [Result<VFile>], path: &str) -> &'a VFile {
    files(items)
        .into_iter()
        .find(|f| f.path == PathBuf::from(path))
        .unwrap_or_else(|| panic!("{path} not emitted"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn comment_list_document_concatenates_in_order() {
    let source = RecordingSource::new(disk(&[("/site/a.css", "A"), ("/site/b.css", "B")]));
    let html = "<head><!-- ref styles -->a.css, b.css<!-- end --></head>";

    let (items, summary) = run(
        useref(UserefOptions::default(), &source).extractor(CommentListExtractor),
        vec![doc("/site/index.html", html)],
    )
    .await;

    let page = find(&items, "/site/index.html");
    assert_eq!(
        page.contents_str(),
        "<head><link rel=\"stylesheet\" href=\"styles.css\"></head>"
    );

    let styles = find(&items, "/site/styles.css");
    assert_eq!(styles.contents_str(), "A\nB");
    assert_eq!(styles.relative(), PathBuf::from("styles.css"));

    assert_eq!(summary.documents, 1);
    assert_eq!(summary.groups_started, 1);
    assert_eq!(summary.files_emitted, 2);
    assert_eq!(summary.errors, 0);
}

#[tokio::test]
async fn every_group_keeps_declaration_order() {
    let source = RecordingSource::new(disk(&[
        ("/site/c.css", "C"),
        ("/site/a.css", "A"),
        ("/site/b.css", "B"),
        ("/site/z.js", "Z"),
        ("/site/y.js", "Y"),
    ]));
    let extractor = FixedExtractor(vec![
        group("css", "all.css", &["c.css", "a.css", "b.css"]),
        group("js", "all.js", &["z.js", "y.js"]),
    ]);

    let (items, _) = run(
        useref(UserefOptions::default(), &source).extractor(extractor),
        vec![doc("/site/index.html", "<html>")],
    )
    .await;

    assert_eq!(find(&items, "/site/all.css").contents_str(), "C\nA\nB");
    assert_eq!(find(&items, "/site/all.js").contents_str(), "Z\nY");
}

#[tokio::test]
async fn external_files_fill_slots_and_trail_unmatched() {
    let mut source = RecordingSource::new(disk(&[("/site/a.css", "A"), ("/site/c.css", "C")]));
    source.reverse = true;
    let extractor = FixedExtractor(vec![group("css", "app.css", &["a.css", "b.css", "c.css"])]);
    let options = UserefOptions {
        noconcat: true,
        ..UserefOptions::default()
    };

    let (items, summary) = run(
        useref(options, &source)
            .extractor(extractor)
            .additional_stream(external("/site/b.css", "B-ext"))
            .additional_stream(external("/gen/x.css", "X")),
        vec![doc("/site/index.html", "<html>")],
    )
    .await;

    let order: Vec<PathBuf> = files(&items)
        .into_iter()
        .skip(1)
        .map(|f| f.path.clone())
        .collect();
    assert_eq!(
        order,
        ["/site/a.css", "/site/b.css", "/site/c.css", "/gen/x.css"]
            .map(PathBuf::from)
            .to_vec()
    );
    assert_eq!(find(&items, "/site/b.css").contents_str(), "B-ext");
    assert!(!source.requested().contains(&"/site/b.css".to_string()));
    assert_eq!(summary.errors, 0);
}

#[tokio::test]
async fn empty_group_is_not_started() {
    let source = RecordingSource::new(disk(&[]));
    let extractor = FixedExtractor(vec![group("css", "empty.css", &[])]);

    let (items, summary) = run(
        useref(UserefOptions::default(), &source).extractor(extractor),
        vec![doc("/site/index.html", "<html>")],
    )
    .await;

    assert_eq!(items.len(), 1);
    assert_eq!(summary.groups_started, 0);
    assert!(source.requested().is_empty());
}

#[tokio::test]
async fn no_assets_emits_documents_only() {
    let source = RecordingSource::new(disk(&[("/site/a.js", "A")]));
    let options = UserefOptions {
        no_assets: true,
        ..UserefOptions::default()
    };
    let html = "<!-- build:js app.js --><script src=\"a.js\"></script><!-- endbuild -->";

    let (items, summary) = run(
        useref(options, &source),
        vec![doc("/site/index.html", html), doc("/site/about.html", html)],
    )
    .await;

    assert_eq!(items.len(), 2);
    assert_eq!(summary.groups_started, 0);
    for page in files(&items) {
        assert_eq!(page.contents_str(), "<script src=\"app.js\"></script>");
    }
    assert!(source.requested().is_empty());
}

#[tokio::test]
async fn noconcat_emits_each_file() {
    let source = RecordingSource::new(disk(&[("/site/a.js", "A"), ("/site/b.js", "B")]));
    let options = UserefOptions {
        noconcat: true,
        ..UserefOptions::default()
    };
    let extractor = FixedExtractor(vec![group("js", "app.js", &["a.js", "b.js"])]);

    let (items, summary) = run(
        useref(options, &source).extractor(extractor),
        vec![doc("/site/index.html", "<html>")],
    )
    .await;

    assert_eq!(summary.files_emitted, 3);
    assert_eq!(find(&items, "/site/a.js").contents_str(), "A");
    assert_eq!(find(&items, "/site/b.js").contents_str(), "B");
}

#[tokio::test]
async fn remote_references_never_hit_the_source() {
    let source = RecordingSource::new(disk(&[("/site/local.js", "L")]));
    let options = UserefOptions {
        noconcat: true,
        ..UserefOptions::default()
    };
    let extractor = FixedExtractor(vec![group(
        "js",
        "app.js",
        &["https://cdn.example.com/lib.js", "//cdn.example.com/x.js", "local.js"],
    )]);

    let (items, _) = run(
        useref(options, &source)
            .extractor(extractor)
            .additional_stream(external("/vendor/lib.js", "LIB")),
        vec![doc("/site/index.html", "<html>")],
    )
    .await;

    assert_eq!(source.requested(), vec!["/site/local.js"]);
    // Still delivered when supplied from outside.
    assert_eq!(find(&items, "/vendor/lib.js").contents_str(), "LIB");
    assert_eq!(find(&items, "/site/local.js").contents_str(), "L");
}

#[tokio::test]
async fn missing_file_is_reported_and_group_continues() {
    let source = RecordingSource::new(disk(&[("/site/a.css", "A")]));
    let extractor = FixedExtractor(vec![group("css", "app.css", &["a.css", "gone.css"])]);

    let (items, summary) = run(
        useref(UserefOptions::default(), &source).extractor(extractor),
        vec![doc("/site/index.html", "<html>")],
    )
    .await;

    assert_eq!(source.requested(), vec!["/site/a.css", "/site/gone.css"]);
    assert!(matches!(
        errors(&items).as_slice(),
        [AssetweaveError::Retrieval { .. }]
    ));
    assert_eq!(find(&items, "/site/app.css").contents_str(), "A");
    assert_eq!(summary.errors, 1);
}

#[tokio::test]
async fn failing_stage_ends_group_without_stalling() {
    let source = RecordingSource::new(disk(&[
        ("/site/a.js", "A"),
        ("/site/b.js", "B"),
        ("/site/c.js", "C"),
    ]));
    let extractor = FixedExtractor(vec![group("js", "app.js", &["a.js", "b.js", "c.js"])]);
    let failing = |group: &str| -> Box<dyn Stage> {
        let group = group.to_string();
        MapStage::new(move |file: VFile| {
            if file.path.ends_with("b.js") {
                return Err(AssetweaveError::transform(group.as_str(), "minifier choked"));
            }
            Ok(file)
        })
        .boxed()
    };

    let (items, _) = run(
        useref(UserefOptions::default(), &source)
            .extractor(extractor)
            .stage(failing),
        vec![doc("/site/index.html", "<html>")],
    )
    .await;

    match errors(&items).as_slice() {
        [AssetweaveError::Transform { group, message }] => {
            assert_eq!(group, "app.js");
            assert_eq!(message, "minifier choked");
        }
        other => panic!("unexpected errors: {other:?}"),
    }
    assert_eq!(find(&items, "/site/app.js").contents_str(), "A");
}

#[tokio::test]
async fn panicking_stage_still_completes() {
    let source = RecordingSource::new(disk(&[("/site/a.js", "A")]));
    let extractor = FixedExtractor(vec![
        group("css", "app.css", &["a.css"]),
        group("js", "app.js", &["a.js"]),
    ]);
    let exploding = |group: &str| -> Box<dyn Stage> {
        let explode = group.ends_with(".js");
        MapStage::new(move |file: VFile| {
            if explode {
                panic!("stage bug");
            }
            Ok(file)
        })
        .boxed()
    };

    let (items, summary) = run(
        useref(UserefOptions::default(), &source)
            .extractor(extractor)
            .stage(exploding),
        vec![doc("/site/index.html", "<html>")],
    )
    .await;

    assert_eq!(summary.groups_started, 2);
    assert!(errors(&items).iter().any(|e| matches!(
        e,
        AssetweaveError::Transform { group, .. } if group == "app.js"
    )));
}

#[tokio::test]
async fn streaming_document_is_rejected_and_run_continues() {
    let source = RecordingSource::new(disk(&[]));
    let streaming = VFile::new("/site", "/site/live.html", vec![])
        .with_contents(Contents::Stream(StreamBody::new(std::io::empty())));

    let (items, summary) = run(
        useref(UserefOptions::default(), &source),
        vec![streaming, doc("/site/index.html", "<p>ok</p>")],
    )
    .await;

    assert!(matches!(
        errors(&items).as_slice(),
        [AssetweaveError::UnsupportedInput { .. }]
    ));
    assert_eq!(find(&items, "/site/index.html").contents_str(), "<p>ok</p>");
    assert_eq!(summary.documents, 2);
}

#[tokio::test]
async fn base_relocates_group_output() {
    let source = RecordingSource::new(disk(&[("/site/css/a.css", "A")]));
    let options = UserefOptions {
        base: Some(PathBuf::from("/dist")),
        ..UserefOptions::default()
    };
    let html = "<!-- build:css css/site.css --><link href=\"css/a.css\"><!-- endbuild -->";

    let (items, _) = run(useref(options, &source), vec![doc("/site/index.html", html)]).await;

    let out = find(&items, "/dist/css/site.css");
    assert_eq!(out.relative(), PathBuf::from("css/site.css"));
    assert_eq!(out.contents_str(), "A");
}

#[tokio::test]
async fn completes_once_all_slow_groups_finish() {
    let mut entries = Vec::new();
    for i in 0..3 {
        entries.push((format!("/site/s{i}.css"), format!("S{i}")));
        entries.push((format!("/site/j{i}.js"), format!("J{i}")));
    }
    let refs: Vec<(&str, &str)> = entries.iter().map(|(p, c)| (p.as_str(), c.as_str())).collect();
    let mut source = RecordingSource::new(disk(&refs));
    source.delay = Some(Duration::from_millis(5));

    let extractor = FixedExtractor(vec![
        group("css", "all.css", &["s0.css", "s1.css", "s2.css"]),
        group("js", "all.js", &["j0.js", "j1.js", "j2.js"]),
    ]);
    let docs: Vec<VFile> = (0..10)
        .map(|i| doc(&format!("/site/page{i}.html"), "<html>"))
        .collect();

    let pipeline = useref(UserefOptions::default(), &source).extractor(extractor);
    let (items, summary) = run(pipeline, docs).await;

    assert_eq!(summary.documents, 10);
    assert_eq!(summary.groups_started, 20);
    assert_eq!(summary.files_emitted, 30);
    assert_eq!(items.len(), 30);
    for out in files(&items).iter().filter(|f| f.path.ends_with("all.css")) {
        assert_eq!(out.contents_str(), "S0\nS1\nS2");
    }
}

#[tokio::test]
async fn slow_additional_stream_gates_first_document() {
    let source = RecordingSource::new(disk(&[]));
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Result<VFile>>();
    let late: FileStream = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .boxed();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(Ok(VFile::new("/gen", "/site/gen.js", b"G".to_vec()))).ok();
    });

    let extractor = FixedExtractor(vec![group("js", "app.js", &["gen.js"])]);
    let (items, summary) = run(
        useref(UserefOptions::default(), &source)
            .extractor(extractor)
            .additional_stream(late),
        vec![doc("/site/index.html", "<html>")],
    )
    .await;

    assert!(source.requested().is_empty());
    assert_eq!(find(&items, "/site/app.js").contents_str(), "G");
    assert_eq!(summary.errors, 0);
}

#[tokio::test]
async fn dropped_output_fails_the_run() {
    let mut source = RecordingSource::new(disk(&[("/site/a.js", "A")]));
    source.delay = Some(Duration::from_millis(30));
    let extractor = FixedExtractor(vec![group("js", "app.js", &["a.js"])]);

    let handle = useref(UserefOptions::default(), &source)
        .extractor(extractor)
        .run(stream::iter(vec![doc("/site/index.html", "<html>")]));
    let mut output = handle.output;

    let first = output.next().await.expect("document").expect("no error");
    assert_eq!(first.path, PathBuf::from("/site/index.html"));
    drop(output);

    let summary = tokio::time::timeout(Duration::from_secs(5), handle.summary)
        .await
        .expect("run should complete")
        .expect("driver task");
    assert!(
        matches!(summary, Err(AssetweaveError::Emit { .. })),
        "expected emit error, got {summary:?}"
    );
}

#[tokio::test]
async fn pattern_resolution_runs_off_the_runtime_thread() {
    let source = RecordingSource::new(disk(&[("/site/a.css", "A")]));
    let threads = Arc::new(Mutex::new(Vec::new()));
    let matcher = ThreadRecordingMatcher {
        inner: DiskMatcher(Arc::clone(&source.disk)),
        threads: Arc::clone(&threads),
    };

    let pipeline = useref(UserefOptions::default(), &source)
        .matcher(matcher)
        .extractor(FixedExtractor(vec![group("css", "site.css", &["a.css"])]));
    let (items, _) = run(pipeline, vec![doc("/site/index.html", "<html>")]).await;

    assert_eq!(find(&items, "/site/site.css").contents_str(), "A");
    let threads = threads.lock().unwrap();
    assert!(!threads.is_empty());
    assert!(threads.iter().all(|id| *id != std::thread::current().id()));
}
