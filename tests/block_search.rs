// Search integration tests
//
// One block of 1000 traces, one of which carries every well-known label.
// Each request either must or must not return that trace.

mod harness;

use std::collections::HashMap;

use traceblock::labels::*;
use traceblock::{
    trace_id_to_hex, BlockError, CancellationToken, SearchOptions, SearchRequest,
    TraceSearchMetadata,
};

fn search_options() -> SearchOptions {
    SearchOptions {
        chunk_size_bytes: 1_000_000,
        read_buffer_count: 8,
        read_buffer_size: 4 * 1024 * 1024,
    }
}

fn tag(key: &str, value: &str) -> SearchRequest {
    SearchRequest {
        tags: HashMap::from([(key.to_string(), value.to_string())]),
        ..Default::default()
    }
}

fn find<'a>(id: &str, results: &'a [TraceSearchMetadata]) -> Option<&'a TraceSearchMetadata> {
    results.iter().find(|r| r.trace_id == id)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_backend_block_search() {
    let (wanted, traces) = harness::corpus(42, 1000);
    let fixture = harness::build_block(traces).await;
    let cancel = CancellationToken::new();

    let expected = TraceSearchMetadata {
        trace_id: trace_id_to_hex(&wanted.trace_id),
        start_time_unix_nano: wanted.start_time_unix_nano,
        duration_ms: 100,
        root_service_name: "RootService".into(),
        root_trace_name: "RootSpan".into(),
    };

    let matching = vec![
        SearchRequest::default(),
        SearchRequest {
            min_duration_ms: 99,
            max_duration_ms: 101,
            ..Default::default()
        },
        SearchRequest {
            start: 1000,
            end: 2000,
            ..Default::default()
        },
        // overlaps start
        SearchRequest {
            start: 999,
            end: 1001,
            ..Default::default()
        },
        // overlaps end
        SearchRequest {
            start: 1999,
            end: 2001,
            ..Default::default()
        },
        tag(LABEL_SERVICE_NAME, "myservice"),
        tag(LABEL_CLUSTER, "cluster"),
        tag(LABEL_NAMESPACE, "namespace"),
        tag(LABEL_POD, "pod"),
        tag(LABEL_CONTAINER, "container"),
        tag(LABEL_K8S_CLUSTER_NAME, "k8scluster"),
        tag(LABEL_K8S_NAMESPACE_NAME, "k8snamespace"),
        tag(LABEL_K8S_POD_NAME, "k8spod"),
        tag(LABEL_K8S_CONTAINER_NAME, "k8scontainer"),
        tag(LABEL_NAME, "ell"),
        tag(LABEL_HTTP_METHOD, "get"),
        tag(LABEL_HTTP_URL, "hello"),
        tag(LABEL_HTTP_STATUS_CODE, "500"),
        tag(STATUS_CODE_TAG, STATUS_CODE_ERROR),
        tag(STATUS_CODE_TAG, "2"),
        tag("foo", "bar"),
        tag("bat", "baz"),
        SearchRequest {
            tags: HashMap::from([
                (LABEL_SERVICE_NAME.to_string(), "myservice".to_string()),
                (LABEL_HTTP_METHOD.to_string(), "get".to_string()),
                ("foo".to_string(), "bar".to_string()),
            ]),
            start: 1500,
            end: 1600,
            ..Default::default()
        },
    ];

    for req in &matching {
        let res = fixture
            .block
            .search(&cancel, req, &search_options())
            .await
            .unwrap();
        let found = find(&expected.trace_id, &res.traces);
        assert_eq!(found, Some(&expected), "request: {:?}", req);
    }

    let excluding = vec![
        SearchRequest {
            min_duration_ms: 101,
            ..Default::default()
        },
        SearchRequest {
            max_duration_ms: 99,
            ..Default::default()
        },
        SearchRequest {
            start: 100,
            end: 200,
            ..Default::default()
        },
        SearchRequest {
            start: 3000,
            end: 4000,
            ..Default::default()
        },
        tag(LABEL_SERVICE_NAME, "foo"),
        // resource labels are not substring matches
        tag(LABEL_SERVICE_NAME, "service"),
        tag(LABEL_CLUSTER, "foo"),
        tag(LABEL_NAMESPACE, "foo"),
        tag(LABEL_POD, "foo"),
        tag(LABEL_CONTAINER, "foo"),
        tag(LABEL_HTTP_METHOD, "post"),
        tag(LABEL_HTTP_URL, "asdf"),
        tag(LABEL_HTTP_STATUS_CODE, "200"),
        tag(STATUS_CODE_TAG, STATUS_CODE_OK),
        tag(STATUS_CODE_TAG, "bogus"),
        tag("foo", "baz"),
        tag("missing", "value"),
        SearchRequest {
            tags: HashMap::from([
                (LABEL_SERVICE_NAME.to_string(), "myservice".to_string()),
                ("foo".to_string(), "baz".to_string()),
            ]),
            ..Default::default()
        },
    ];

    for req in &excluding {
        let res = fixture
            .block
            .search(&cancel, req, &search_options())
            .await
            .unwrap();
        assert!(
            find(&expected.trace_id, &res.traces).is_none(),
            "request: {:?}",
            req
        );
    }
}

#[tokio::test]
async fn test_empty_request_returns_every_trace_sorted() {
    let (_, traces) = harness::corpus(7, 250);
    let fixture = harness::build_block(traces).await;

    let res = fixture
        .block
        .search(
            &CancellationToken::new(),
            &SearchRequest::default(),
            &search_options(),
        )
        .await
        .unwrap();

    assert_eq!(res.traces.len(), 250);
    assert!(!res.truncated);
    assert_eq!(res.metrics.inspected_traces, 250);
    assert!(res.metrics.inspected_bytes > 0);
    assert!(res
        .traces
        .windows(2)
        .all(|w| w[0].start_time_unix_nano >= w[1].start_time_unix_nano));
}

#[tokio::test]
async fn test_window_end_excludes_later_sub_second_start() {
    use rand::SeedableRng;

    let mut rng = rand::rngs::StdRng::seed_from_u64(17);
    let early = harness::wanted_trace(&mut rng);
    let mut late = harness::wanted_trace(&mut rng);
    late.start_time_unix_nano = 2000 * 1_000_000_000 + 500_000_000;
    late.end_time_unix_nano = 2001 * 1_000_000_000;
    let fixture = harness::build_block(vec![early.clone(), late.clone()]).await;
    let cancel = CancellationToken::new();
    let early_id = trace_id_to_hex(&early.trace_id);
    let late_id = trace_id_to_hex(&late.trace_id);

    let res = fixture
        .block
        .search(
            &cancel,
            &SearchRequest::default().with_window(1500, 2000),
            &search_options(),
        )
        .await
        .unwrap();
    assert!(find(&early_id, &res.traces).is_some());
    assert!(find(&late_id, &res.traces).is_none());

    let res = fixture
        .block
        .search(
            &cancel,
            &SearchRequest::default().with_window(1500, 2001),
            &search_options(),
        )
        .await
        .unwrap();
    assert!(find(&late_id, &res.traces).is_some());
}

#[tokio::test]
async fn test_limit_truncates() {
    let (_, traces) = harness::corpus(11, 300);
    let fixture = harness::build_block(traces).await;

    let req = SearchRequest {
        tags: HashMap::from([(LABEL_SERVICE_NAME.to_string(), "filler".to_string())]),
        limit: 5,
        ..Default::default()
    };
    let res = fixture
        .block
        .search(&CancellationToken::new(), &req, &search_options())
        .await
        .unwrap();

    assert_eq!(res.traces.len(), 5);
    assert!(res.truncated);
    assert!(res
        .traces
        .iter()
        .all(|t| t.root_service_name == "filler"));
}

#[tokio::test]
async fn test_io_shaping_does_not_change_results() {
    let (_, traces) = harness::corpus(3, 400);
    let fixture = harness::build_block(traces).await;
    let cancel = CancellationToken::new();
    let req = tag(LABEL_NAME, "span-3");

    let baseline = fixture
        .block
        .search(&cancel, &req, &search_options())
        .await
        .unwrap();

    let tiny = SearchOptions {
        chunk_size_bytes: 512,
        read_buffer_count: 1,
        read_buffer_size: 1,
    };
    let shaped = fixture.block.search(&cancel, &req, &tiny).await.unwrap();

    assert_eq!(baseline.traces, shaped.traces);
    assert_eq!(baseline.traces.len(), 399);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_searches_share_a_block() {
    let (wanted, traces) = harness::corpus(5, 500);
    let fixture = harness::build_block(traces).await;
    let wanted_id = trace_id_to_hex(&wanted.trace_id);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let block = fixture.block.clone();
            let req = if i % 2 == 0 {
                tag("foo", "bar")
            } else {
                tag(LABEL_K8S_POD_NAME, "k8spod")
            };
            tokio::spawn(async move {
                block
                    .search(&CancellationToken::new(), &req, &search_options())
                    .await
            })
        })
        .collect();

    for handle in futures::future::join_all(handles).await {
        let res = handle.unwrap().unwrap();
        assert_eq!(res.traces.len(), 1);
        assert_eq!(res.traces[0].trace_id, wanted_id);
    }
}

#[tokio::test]
async fn test_cancelled_search_returns_no_results() {
    let (_, traces) = harness::corpus(9, 200);
    let fixture = harness::build_block(traces).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = fixture
        .block
        .search(&cancel, &SearchRequest::default(), &search_options())
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(matches!(err, BlockError::Cancelled { .. }));
}

#[tokio::test]
async fn test_invalid_search_options_rejected() {
    let (_, traces) = harness::corpus(1, 10);
    let fixture = harness::build_block(traces).await;

    let options = SearchOptions {
        read_buffer_count: 0,
        ..search_options()
    };
    let err = fixture
        .block
        .search(&CancellationToken::new(), &SearchRequest::default(), &options)
        .await
        .unwrap_err();
    assert!(matches!(err, BlockError::InvalidConfig { .. }));
}
