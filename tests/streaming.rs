//! Streaming-path tests: fragment transparency, exact output accounting,
//! abandoned streams, and mid-sequence failure recording.

use std::sync::Arc;

use futures::StreamExt;
use llm_gateway::{
    run_with_gateway, simple_request, spawn_log_worker, Attribution, CallStatus, FaultyProvider,
    InstrumentedStreamProvider, MemorySink, ProviderConfig, ScriptedProvider, StreamProvider,
};

const FRAGMENTS: [&str; 4] = ["The ", "quick ", "brown ", "fox"];

#[tokio::test]
async fn instrumented_stream_yields_the_uninstrumented_fragments() {
    let sink = Arc::new(MemorySink::new());
    let log = spawn_log_worker(sink.clone(), 16);

    let bare = ScriptedProvider::new(FRAGMENTS);
    let bare_text: String = bare
        .stream(simple_request("sys", "go"))
        .await
        .unwrap()
        .map(|item| item.unwrap())
        .collect::<Vec<_>>()
        .await
        .concat();

    let wrapped =
        InstrumentedStreamProvider::new(ScriptedProvider::new(FRAGMENTS), ProviderConfig::default(), log.clone());
    let run = run_with_gateway(Attribution::new("r1", "chat", "/chat"), async {
        let stream = wrapped.stream(simple_request("sys", "go")).await.unwrap();
        let handle = stream.record_handle();
        let text: String = stream
            .map(|item| item.unwrap())
            .collect::<Vec<_>>()
            .await
            .concat();
        (text, handle)
    })
    .await;

    let (text, handle) = run.result;
    assert_eq!(text, bare_text);
    assert_eq!(text, "The quick brown fox");

    // Exactly one record, with the exact fragment-length sum.
    assert_eq!(run.call_records.len(), 1);
    let rec = &run.call_records[0];
    assert_eq!(rec.response_chars, 19);
    assert_eq!(rec.status, CallStatus::Ok);
    assert!(rec.streamed);

    // The side channel carries the same record after the drain.
    assert_eq!(handle.get().unwrap().id, rec.id);

    log.flush().await;
    assert_eq!(sink.len(), 1);
}

#[tokio::test]
async fn abandoning_a_stream_leaves_no_record() {
    let sink = Arc::new(MemorySink::new());
    let log = spawn_log_worker(sink.clone(), 16);
    let wrapped = InstrumentedStreamProvider::new(
        ScriptedProvider::new(FRAGMENTS),
        ProviderConfig::default(),
        log.clone(),
    );

    let run = run_with_gateway(Attribution::new("r1", "chat", "/chat"), async {
        let mut stream = wrapped.stream(simple_request("sys", "go")).await.unwrap();
        let handle = stream.record_handle();
        // Pull two of four fragments, then walk away.
        assert_eq!(stream.next().await.unwrap().unwrap(), "The ");
        assert_eq!(stream.next().await.unwrap().unwrap(), "quick ");
        drop(stream);
        handle
    })
    .await;

    assert!(run.call_records.is_empty());
    assert!(run.result.get().is_none());
    log.flush().await;
    assert!(sink.is_empty());
}

#[tokio::test]
async fn mid_stream_failure_records_error_and_reraises_it() {
    let sink = Arc::new(MemorySink::new());
    let log = spawn_log_worker(sink.clone(), 16);
    let wrapped = InstrumentedStreamProvider::new(
        FaultyProvider::new(["ab", "cd"], "connection reset"),
        ProviderConfig::default(),
        log.clone(),
    );

    let run = run_with_gateway(Attribution::new("r1", "chat", "/chat"), async {
        let mut stream = wrapped.stream(simple_request("sys", "go")).await.unwrap();
        let mut fragments = Vec::new();
        let mut error = None;
        while let Some(item) = stream.next().await {
            match item {
                Ok(fragment) => fragments.push(fragment),
                Err(e) => error = Some(e),
            }
        }
        (fragments, error)
    })
    .await;

    let (fragments, error) = run.result;
    assert_eq!(fragments, vec!["ab".to_string(), "cd".to_string()]);
    // The original error reaches the consumer unchanged.
    assert_eq!(error.unwrap().to_string(), "connection reset");

    assert_eq!(run.call_records.len(), 1);
    let rec = &run.call_records[0];
    assert_eq!(rec.status, CallStatus::Error);
    assert_eq!(rec.error.as_deref(), Some("connection reset"));
    assert_eq!(rec.response_chars, 4); // what actually arrived
    assert!(rec.streamed);

    log.flush().await;
    assert_eq!(sink.len(), 1);
}

#[tokio::test]
async fn failed_stream_is_fused_after_the_error() {
    let sink = Arc::new(MemorySink::new());
    let log = spawn_log_worker(sink.clone(), 16);
    let wrapped = InstrumentedStreamProvider::new(
        FaultyProvider::new(["x"], "boom"),
        ProviderConfig::default(),
        log.clone(),
    );

    let run = run_with_gateway(Attribution::new("r1", "chat", "/chat"), async {
        let mut stream = wrapped.stream(simple_request("sys", "go")).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), "x");
        assert!(stream.next().await.unwrap().is_err());
        // Fused: no items, and no second record, after the terminal error.
        assert!(stream.next().await.is_none());
        assert!(stream.next().await.is_none());
    })
    .await;

    assert_eq!(run.call_records.len(), 1);
    log.flush().await;
    assert_eq!(sink.len(), 1);
}

#[tokio::test]
async fn two_streams_in_one_scope_both_record_in_order() {
    let sink = Arc::new(MemorySink::new());
    let log = spawn_log_worker(sink.clone(), 16);
    let wrapped = InstrumentedStreamProvider::new(
        ScriptedProvider::new(["one"]),
        ProviderConfig::default(),
        log.clone(),
    );

    let run = run_with_gateway(Attribution::new("r1", "chat", "/chat"), async {
        let mut req = simple_request("sys", "first");
        req.model = Some("gpt-4o".into());
        let s1 = wrapped.stream(req).await.unwrap();

        let mut req = simple_request("sys", "second");
        req.model = Some("gpt-4o-mini".into());
        let s2 = wrapped.stream(req).await.unwrap();

        // Drain in reverse of initiation.
        let _: Vec<_> = s2.collect().await;
        let _: Vec<_> = s1.collect().await;
    })
    .await;

    let models: Vec<_> = run
        .call_records
        .iter()
        .map(|r| r.model.as_str())
        .collect();
    assert_eq!(models, vec!["gpt-4o", "gpt-4o-mini"]);
}
