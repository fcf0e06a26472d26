//! Synthesis client and credit monitor against scripted HTTP replicas.

use futures_util::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use voice_dialogue::config::{CreditMonitorConfig, DialogueConfig};
use voice_dialogue::health::CreditMonitor;
use voice_dialogue::load_balancer::{EndpointHealth, EndpointPool, PoolError};
use voice_dialogue::observability::events::{EndpointEvent, EventBus};
use voice_dialogue::resilience::FailureClass;
use voice_dialogue::synthesis::{AudioFormat, SpeechSynthesizer, SynthesisClient, SynthesisError};

mod common;
use common::{endpoint, test_config, MockReply, RecordedRequest};

fn build(config: &DialogueConfig) -> (Arc<EndpointPool>, SynthesisClient, EventBus) {
    let events = EventBus::default();
    let pool = Arc::new(EndpointPool::from_config(&config.synthesis, events.clone()).unwrap());
    let client = SynthesisClient::new(pool.clone(), &config.synthesis);
    (pool, client, events)
}

async fn collect_audio(client: &SynthesisClient, text: &str) -> Result<Vec<u8>, SynthesisError> {
    let mut chunks = client.synthesize(text, AudioFormat::Mp3).await?;
    let mut audio = Vec::new();
    while let Some(chunk) = chunks.next().await {
        audio.extend_from_slice(&chunk?);
    }
    Ok(audio)
}

/// Replica that counts speech calls and always answers with `reply`.
async fn counting_backend(reply: MockReply) -> (std::net::SocketAddr, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let addr = common::start_synthesis_backend(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        reply.clone()
    })
    .await;
    (addr, calls)
}

#[tokio::test]
async fn test_temporary_failure_fails_over() {
    let (a, a_calls) = counting_backend(MockReply::status(503, "overloaded")).await;
    let (b, _) = counting_backend(MockReply::audio(Duration::ZERO, b"AUDIO")).await;
    let config = test_config(vec![endpoint("a", a), endpoint("b", b)], None);
    let (pool, client, events) = build(&config);
    let mut rx = events.subscribe();

    // Lowest credit goes first.
    pool.get("a").unwrap().set_credits(1.0);
    pool.get("b").unwrap().set_credits(5.0);

    let audio = collect_audio(&client, "Hello.").await.unwrap();
    assert_eq!(audio, b"AUDIO");
    assert_eq!(a_calls.load(Ordering::SeqCst), 1);
    assert_eq!(pool.get("a").unwrap().health(), EndpointHealth::TemporaryFailure);
    assert_eq!(pool.get("b").unwrap().health(), EndpointHealth::Healthy);
    assert_eq!(pool.total_active_requests(), 0);

    match rx.recv().await.unwrap() {
        EndpointEvent::Failure { endpoint_id, class, message, .. } => {
            assert_eq!(endpoint_id, "a");
            assert_eq!(class, FailureClass::Temporary);
            assert!(message.contains("503"));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_payment_required_is_permanent() {
    let (a, a_calls) = counting_backend(MockReply::status(402, "no credits")).await;
    let (b, b_calls) = counting_backend(MockReply::audio(Duration::ZERO, b"OK")).await;
    let config = test_config(vec![endpoint("a", a), endpoint("b", b)], None);
    let (pool, client, _) = build(&config);
    pool.get("a").unwrap().set_credits(1.0);
    pool.get("b").unwrap().set_credits(5.0);

    assert_eq!(collect_audio(&client, "One.").await.unwrap(), b"OK");
    assert_eq!(pool.get("a").unwrap().health(), EndpointHealth::PermanentFailure);

    for _ in 0..3 {
        assert_eq!(collect_audio(&client, "Again.").await.unwrap(), b"OK");
    }
    assert_eq!(a_calls.load(Ordering::SeqCst), 1);
    assert_eq!(b_calls.load(Ordering::SeqCst), 4);

    pool.reset("a").unwrap();
    assert_eq!(pool.get("a").unwrap().health(), EndpointHealth::Healthy);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let (a, _) = counting_backend(MockReply::status(400, "bad voice settings")).await;
    let (b, b_calls) = counting_backend(MockReply::audio(Duration::ZERO, b"OK")).await;
    let config = test_config(vec![endpoint("a", a), endpoint("b", b)], None);
    let (pool, client, events) = build(&config);
    let mut rx = events.subscribe();
    pool.get("a").unwrap().set_credits(1.0);
    pool.get("b").unwrap().set_credits(5.0);

    let err = collect_audio(&client, "Hi.").await.unwrap_err();
    assert!(matches!(err, SynthesisError::Status { status: 400, .. }));
    assert_eq!(b_calls.load(Ordering::SeqCst), 0);
    assert_eq!(pool.get("a").unwrap().health(), EndpointHealth::Healthy);

    let event = rx.recv().await.unwrap();
    assert!(matches!(
        event,
        EndpointEvent::Failure { class: FailureClass::ClientError, .. }
    ));
}

#[tokio::test]
async fn test_all_permanent_fails_outright() {
    let (a, _) = counting_backend(MockReply::status(401, "bad key")).await;
    let (b, _) = counting_backend(MockReply::status(403, "forbidden")).await;
    let config = test_config(vec![endpoint("a", a), endpoint("b", b)], None);
    let (_, client, _) = build(&config);

    let first = collect_audio(&client, "Hi.").await.unwrap_err();
    assert!(matches!(first, SynthesisError::Status { .. }));

    let second = collect_audio(&client, "Hi.").await.unwrap_err();
    assert!(matches!(second, SynthesisError::Pool(PoolError::AllPermanentlyFailed)));
}

#[tokio::test]
async fn test_request_wire_format() {
    let seen: Arc<Mutex<Vec<RecordedRequest>>> = Arc::default();
    let log = seen.clone();
    let addr = common::start_backend(move |request| {
        log.lock().unwrap().push(request.clone());
        MockReply::audio(Duration::ZERO, b"RIFF")
    })
    .await;
    let config = test_config(vec![endpoint("a", addr)], None);
    let (_, client, _) = build(&config);

    let mut chunks = client.synthesize("Good morning.", AudioFormat::Wav).await.unwrap();
    while chunks.next().await.is_some() {}

    let requests = seen.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.path, "/v1/text-to-speech/default/stream");
    assert_eq!(request.header("x-sup-api-key"), Some("a-key"));
    assert_eq!(request.header("accept"), Some("audio/wav"));

    let body = request.json();
    assert_eq!(body["text"], "Good morning.");
    assert_eq!(body["output_format"], "wav");
    assert_eq!(body["include_phonemes"], false);
    assert_eq!(body["voice_settings"]["speed"], 1.0);
}

#[tokio::test]
async fn test_dropping_audio_releases_slot() {
    let addr = common::start_synthesis_backend(|_| {
        MockReply::ok(
            "audio/mpeg",
            vec![
                (Duration::ZERO, b"first".to_vec()),
                (Duration::from_secs(5), b"late".to_vec()),
            ],
        )
    })
    .await;
    let config = test_config(vec![endpoint("a", addr)], None);
    let (pool, client, _) = build(&config);

    let mut chunks = client.synthesize("Long sentence.", AudioFormat::Mp3).await.unwrap();
    assert_eq!(&chunks.next().await.unwrap().unwrap()[..], b"first");
    assert_eq!(pool.total_active_requests(), 1);

    drop(chunks);
    assert_eq!(pool.total_active_requests(), 0);
    assert_eq!(pool.get("a").unwrap().health(), EndpointHealth::Healthy);
}

#[tokio::test]
async fn test_credit_monitor_flags_low_balance() {
    let credits_backend = |credits: f64| {
        common::start_backend(move |request| {
            if request.path == "/v1/credits" {
                MockReply::ok(
                    "application/json",
                    vec![(Duration::ZERO, format!("{{\"credits\":{credits}}}").into_bytes())],
                )
            } else {
                MockReply::status(404, "")
            }
        })
    };
    let poor = credits_backend(50.0).await;
    let rich = credits_backend(500.0).await;
    let config = test_config(vec![endpoint("poor", poor), endpoint("rich", rich)], None);
    let (pool, _, events) = build(&config);
    let mut rx = events.subscribe();

    let monitor = CreditMonitor::new(
        pool.clone(),
        CreditMonitorConfig {
            enabled: true,
            low_credit_threshold: 100.0,
            ..CreditMonitorConfig::default()
        },
        config.synthesis.api_key_header.clone(),
    );
    monitor.check_all().await;

    assert_eq!(pool.get("poor").unwrap().health(), EndpointHealth::PermanentFailure);
    assert_eq!(pool.get("rich").unwrap().health(), EndpointHealth::Healthy);
    assert_eq!(pool.get("rich").unwrap().credits(), 500.0);

    let mut saw_low_credit = false;
    while let Ok(event) = rx.try_recv() {
        if let EndpointEvent::LowCredit { endpoint_id, remaining_credits, threshold, .. } = event {
            assert_eq!(endpoint_id, "poor");
            assert_eq!(remaining_credits, 50.0);
            assert_eq!(threshold, 100.0);
            saw_low_credit = true;
        }
    }
    assert!(saw_low_credit);
}

#[tokio::test]
async fn test_credit_check_keeps_base_path() {
    let seen: Arc<Mutex<Vec<String>>> = Arc::default();
    let log = seen.clone();
    let addr = common::start_backend(move |request| {
        log.lock().unwrap().push(request.path.clone());
        MockReply::ok("application/json", vec![(Duration::ZERO, b"{\"credits\":900}".to_vec())])
    })
    .await;
    let mut prefixed = endpoint("a", addr);
    prefixed.base_url = format!("http://{addr}/tts");
    let config = test_config(vec![prefixed], None);
    let (pool, _, _) = build(&config);

    let monitor = CreditMonitor::new(
        pool.clone(),
        CreditMonitorConfig {
            enabled: true,
            ..CreditMonitorConfig::default()
        },
        config.synthesis.api_key_header.clone(),
    );
    monitor.check_all().await;

    assert_eq!(*seen.lock().unwrap(), ["/tts/v1/credits"]);
    assert_eq!(pool.get("a").unwrap().credits(), 900.0);
}
