//! Shared fixtures for block integration tests
//!
//! Builds blocks on a temporary filesystem backend the same way a caller
//! would: `StreamingBlock` -> periodic `flush` -> `complete`.

#![allow(dead_code)]

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;
use traceblock::{
    Attribute, BackendBlock, BlockConfig, BlockMeta, BufferedAppendWriter, CancellationToken,
    Encoding, Ils, InstrumentationLibrary, OpendalBackend, Resource, ResourceSpans, Span,
    StatusCode, StreamingBlock, Trace, TRACE_ID_LEN, VERSION_STRING,
};
use uuid::Uuid;

pub const TENANT: &str = "fake";

/// A block on disk plus the tempdir that keeps it alive.
pub struct Fixture {
    pub dir: TempDir,
    pub backend: Arc<OpendalBackend>,
    pub block: BackendBlock,
}

pub fn fs_backend(dir: &TempDir) -> Arc<OpendalBackend> {
    let builder = opendal::services::Fs::default().root(&dir.path().to_string_lossy());
    let op = opendal::Operator::new(builder)
        .expect("fs operator")
        .finish();
    Arc::new(OpendalBackend::new(op))
}

pub fn block_config() -> BlockConfig {
    BlockConfig {
        bloom_fp: 0.01,
        bloom_shard_size_bytes: 100 * 1024,
        ..Default::default()
    }
}

pub fn new_streaming_block(backend: &Arc<OpendalBackend>) -> StreamingBlock {
    let mut meta = BlockMeta::new(TENANT, Uuid::new_v4(), VERSION_STRING, Encoding::None, "");
    meta.total_objects = 1;

    StreamingBlock::new(
        &block_config(),
        meta,
        backend.clone(),
        backend.clone(),
        BufferedAppendWriter::boxed,
    )
    .expect("streaming block")
}

/// Write `traces` into a fresh block, flushing every 100 traces.
pub async fn build_block(traces: Vec<Trace>) -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = fs_backend(&dir);
    let cancel = CancellationToken::new();

    let mut streaming = new_streaming_block(&backend);
    for (i, trace) in traces.into_iter().enumerate() {
        streaming.add(trace, 0, 0).expect("add trace");
        if i % 100 == 0 {
            streaming.flush(&cancel).await.expect("flush");
        }
    }
    streaming.complete(&cancel).await.expect("complete");

    let block = streaming.into_backend_block().expect("backend block");
    Fixture {
        dir,
        backend,
        block,
    }
}

/// The fully populated trace every search predicate is checked against.
pub fn wanted_trace(rng: &mut StdRng) -> Trace {
    Trace {
        trace_id: random_trace_id(rng),
        start_time_unix_nano: 1000 * 1_000_000_000,
        end_time_unix_nano: 2000 * 1_000_000_000,
        duration_nanos: 100 * 1_000_000,
        root_service_name: "RootService".into(),
        root_span_name: "RootSpan".into(),
        resource_spans: vec![ResourceSpans {
            resource: Resource {
                service_name: Some("myservice".into()),
                cluster: Some("cluster".into()),
                namespace: Some("namespace".into()),
                pod: Some("pod".into()),
                container: Some("container".into()),
                k8s_cluster_name: Some("k8scluster".into()),
                k8s_namespace_name: Some("k8snamespace".into()),
                k8s_pod_name: Some("k8spod".into()),
                k8s_container_name: Some("k8scontainer".into()),
                attrs: vec![Attribute::new("bat", "baz")],
            },
            instrumentation_library_spans: vec![Ils {
                instrumentation_library: InstrumentationLibrary::default(),
                spans: vec![Span {
                    name: "hello".into(),
                    http_method: Some("get".into()),
                    http_url: Some("url/hello/world".into()),
                    http_status_code: Some(500),
                    status_code: StatusCode::Error.as_i32(),
                    attrs: vec![Attribute::new("foo", "bar")],
                    ..Default::default()
                }],
            }],
        }],
    }
}

/// Unremarkable trace starting `offset_secs` after 10000s.
pub fn filler_trace(rng: &mut StdRng, offset_secs: u64) -> Trace {
    let start = (10_000 + offset_secs) * 1_000_000_000;
    let duration = 5 * 1_000_000;

    let spans = (0..10)
        .map(|i| Span {
            id: rng.gen::<[u8; 8]>().to_vec(),
            name: format!("span-{}", i),
            kind: 1,
            start_unix_nanos: start,
            end_unix_nanos: start + duration,
            status_code: StatusCode::Ok.as_i32(),
            http_method: Some("post".into()),
            attrs: vec![Attribute::new("index", i.to_string())],
            ..Default::default()
        })
        .collect();

    Trace {
        trace_id: random_trace_id(rng),
        start_time_unix_nano: start,
        end_time_unix_nano: start + duration,
        duration_nanos: duration,
        root_service_name: "filler".into(),
        root_span_name: "span-0".into(),
        resource_spans: vec![ResourceSpans {
            resource: Resource {
                service_name: Some("filler".into()),
                ..Default::default()
            },
            instrumentation_library_spans: vec![Ils {
                instrumentation_library: InstrumentationLibrary {
                    name: "lib".into(),
                    version: "1.0".into(),
                },
                spans,
            }],
        }],
    }
}

pub fn random_trace_id(rng: &mut StdRng) -> Vec<u8> {
    let mut id = vec![0u8; TRACE_ID_LEN];
    rng.fill(id.as_mut_slice());
    id
}

/// `total` traces with the wanted trace at a random position.
pub fn corpus(seed: u64, total: usize) -> (Trace, Vec<Trace>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let wanted = wanted_trace(&mut rng);
    let insert_at = rng.gen_range(0..total);

    let traces = (0..total)
        .map(|i| {
            if i == insert_at {
                wanted.clone()
            } else {
                filler_trace(&mut rng, i as u64)
            }
        })
        .collect();
    (wanted, traces)
}
