mod testsupport;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use josef::prelude::{
    Error, KafkaCode, Producer, ProducerBuilder, ProducerRecord, Serializer, TopicPartition,
};
use testsupport::{
    metadata_response, produce_response, MockBroker, SeenRequest, API_KEY_METADATA,
    API_KEY_PRODUCE,
};

const TOPIC: &str = "purchases";

fn record(value: &'static [u8]) -> ProducerRecord<Bytes, Bytes> {
    ProducerRecord {
        topic: TOPIC.to_string(),
        partition: 0,
        key: Some(Bytes::from_static(b"key")),
        value: Some(Bytes::from_static(value)),
        timestamp: None,
    }
}

/// Spawn a broker whose metadata advertises the broker itself as the
/// leader of `purchases/0`. The listener port is only known after the
/// bind, so the script reads it from a cell filled in afterwards.
async fn leader_broker<P>(produce_script: P) -> MockBroker
where
    P: Fn(&SeenRequest) -> Vec<Bytes> + Send + Sync + 'static,
{
    let port = Arc::new(AtomicUsize::new(0));
    let script_port = port.clone();
    let broker = MockBroker::spawn(move |request: &SeenRequest| match request.api_key {
        API_KEY_METADATA => vec![metadata_response(
            request.correlation_id,
            &[(1, "127.0.0.1", script_port.load(Ordering::SeqCst) as i32)],
            &[(TOPIC, vec![(0, 1)])],
        )],
        API_KEY_PRODUCE => produce_script(request),
        _ => vec![],
    })
    .await;
    port.store(broker.addr.port() as usize, Ordering::SeqCst);
    broker
}

#[tokio::test]
async fn produces_and_reports_broker_coordinates() {
    let broker = leader_broker(|request: &SeenRequest| {
        vec![produce_response(
            request.correlation_id,
            TOPIC,
            0,
            KafkaCode::None,
            42,
            1_234,
        )]
    })
    .await;

    let producer = ProducerBuilder::new(broker.bootstrap())
        .unwrap()
        .build()
        .unwrap();
    let result = producer.send(record(b"first")).await.unwrap();

    assert_eq!(
        result.topic_partition,
        TopicPartition {
            topic: TOPIC.to_string(),
            partition: 0,
        }
    );
    assert_eq!(result.offset, 42);
    assert_eq!(result.timestamp, 1_234);
    assert_eq!(broker.metadata_requests.load(Ordering::SeqCst), 1);
    assert_eq!(broker.produce_requests.load(Ordering::SeqCst), 1);

    producer.close().await;
}

#[tokio::test]
async fn moved_leader_triggers_refresh_then_retry() {
    // first produce is refused with NotLeaderForPartition; after the
    // refresh the (scripted) new leader accepts
    let events: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let port = Arc::new(AtomicUsize::new(0));
    let script_port = port.clone();
    let script_events = events.clone();
    let produced = Arc::new(AtomicUsize::new(0));
    let broker = MockBroker::spawn(move |request: &SeenRequest| match request.api_key {
        API_KEY_METADATA => {
            script_events.lock().unwrap().push("metadata");
            // the leader id moves from 1 to 2 once the first produce
            // has been refused; both ids resolve to this broker
            let leader = if produced.load(Ordering::SeqCst) == 0 { 1 } else { 2 };
            let addr = ("127.0.0.1", script_port.load(Ordering::SeqCst) as i32);
            vec![metadata_response(
                request.correlation_id,
                &[(1, addr.0, addr.1), (2, addr.0, addr.1)],
                &[(TOPIC, vec![(0, leader)])],
            )]
        }
        API_KEY_PRODUCE => {
            script_events.lock().unwrap().push("produce");
            if produced.fetch_add(1, Ordering::SeqCst) == 0 {
                vec![produce_response(
                    request.correlation_id,
                    TOPIC,
                    0,
                    KafkaCode::NotLeaderForPartition,
                    -1,
                    -1,
                )]
            } else {
                vec![produce_response(
                    request.correlation_id,
                    TOPIC,
                    0,
                    KafkaCode::None,
                    7,
                    99,
                )]
            }
        }
        _ => vec![],
    })
    .await;
    port.store(broker.addr.port() as usize, Ordering::SeqCst);

    let producer = ProducerBuilder::new(broker.bootstrap())
        .unwrap()
        .retries(2)
        .retry_backoff_ms(10)
        .build()
        .unwrap();

    let result = producer.send(record(b"moved")).await.unwrap();
    assert_eq!(result.offset, 7);

    // the refresh happened between the two produce attempts
    assert_eq!(
        *events.lock().unwrap(),
        vec!["metadata", "produce", "metadata", "produce"]
    );

    producer.close().await;
}

#[tokio::test]
async fn acks_zero_resolves_without_any_response() {
    // the broker never acknowledges produces
    let broker = leader_broker(|_: &SeenRequest| vec![]).await;

    let producer = ProducerBuilder::new(broker.bootstrap())
        .unwrap()
        .required_acks(0)
        .build()
        .unwrap();

    let result = producer.send(record(b"fire and forget")).await.unwrap();
    assert_eq!(result.offset, -1);
    assert_eq!(result.timestamp, -1);

    // the frame still went out
    let mut waited = 0;
    while broker.produce_requests.load(Ordering::SeqCst) == 0 && waited < 50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += 1;
    }
    assert_eq!(broker.produce_requests.load(Ordering::SeqCst), 1);

    producer.close().await;
}

#[tokio::test]
async fn rejected_payloads_are_not_retried() {
    let broker = leader_broker(|request: &SeenRequest| {
        vec![produce_response(
            request.correlation_id,
            TOPIC,
            0,
            KafkaCode::CorruptMessage,
            -1,
            -1,
        )]
    })
    .await;

    let producer = ProducerBuilder::new(broker.bootstrap())
        .unwrap()
        .retries(5)
        .retry_backoff_ms(10)
        .build()
        .unwrap();

    let result = producer.send(record(b"rejected")).await;
    assert_eq!(result, Err(Error::KafkaError(KafkaCode::CorruptMessage)));

    // broker-rejected payloads burn no retries
    assert_eq!(broker.produce_requests.load(Ordering::SeqCst), 1);
    assert_eq!(broker.metadata_requests.load(Ordering::SeqCst), 1);

    producer.close().await;
}

#[tokio::test]
async fn leaderless_partitions_exhaust_retries_with_no_leader() {
    let port = Arc::new(AtomicUsize::new(0));
    let script_port = port.clone();
    let broker = MockBroker::spawn(move |request: &SeenRequest| match request.api_key {
        API_KEY_METADATA => vec![metadata_response(
            request.correlation_id,
            &[(1, "127.0.0.1", script_port.load(Ordering::SeqCst) as i32)],
            &[(TOPIC, vec![(0, -1)])],
        )],
        _ => vec![],
    })
    .await;
    port.store(broker.addr.port() as usize, Ordering::SeqCst);

    let producer = ProducerBuilder::new(broker.bootstrap())
        .unwrap()
        .retries(1)
        .retry_backoff_ms(10)
        .build()
        .unwrap();

    let result = producer.send(record(b"nowhere to go")).await;
    assert_eq!(result, Err(Error::NoLeader(TOPIC.to_string(), 0)));

    // one metadata fetch per attempt, no produce ever sent
    assert_eq!(broker.metadata_requests.load(Ordering::SeqCst), 2);
    assert_eq!(broker.produce_requests.load(Ordering::SeqCst), 0);

    producer.close().await;
}

#[tokio::test]
async fn oversize_records_fail_before_any_produce_io() {
    let broker = leader_broker(|request: &SeenRequest| {
        vec![produce_response(
            request.correlation_id,
            TOPIC,
            0,
            KafkaCode::None,
            0,
            0,
        )]
    })
    .await;

    let producer = ProducerBuilder::new(broker.bootstrap())
        .unwrap()
        .max_request_size(64)
        .build()
        .unwrap();

    static BIG: [u8; 1024] = [7; 1024];
    let result = producer.send(record(&BIG)).await;
    assert!(matches!(result, Err(Error::MessageTooLarge { .. })));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(broker.produce_requests.load(Ordering::SeqCst), 0);

    producer.close().await;
}

struct StringSerializer;

impl Serializer for StringSerializer {
    type Input = String;

    fn serialize(&self, value: &String) -> Result<Bytes, Error> {
        Ok(Bytes::from(value.clone()))
    }
}

struct RefusingSerializer;

impl Serializer for RefusingSerializer {
    type Input = String;

    fn serialize(&self, _value: &String) -> Result<Bytes, Error> {
        Err(Error::ArgError(String::from("not today")))
    }
}

#[tokio::test]
async fn custom_serializers_run_before_dispatch() {
    let broker = leader_broker(|request: &SeenRequest| {
        vec![produce_response(
            request.correlation_id,
            TOPIC,
            0,
            KafkaCode::None,
            3,
            0,
        )]
    })
    .await;

    let producer: Producer<StringSerializer, StringSerializer> =
        ProducerBuilder::new(broker.bootstrap())
            .unwrap()
            .key_serializer(StringSerializer)
            .value_serializer(StringSerializer)
            .build()
            .unwrap();

    let result = producer
        .send(ProducerRecord {
            topic: TOPIC.to_string(),
            partition: 0,
            key: None,
            value: Some(String::from("a value")),
            timestamp: Some(77),
        })
        .await
        .unwrap();
    assert_eq!(result.offset, 3);

    producer.close().await;
}

#[tokio::test]
async fn serializer_failures_reach_no_wire() {
    let broker = leader_broker(|_: &SeenRequest| vec![]).await;

    let producer = ProducerBuilder::new(broker.bootstrap())
        .unwrap()
        .value_serializer(RefusingSerializer)
        .build()
        .unwrap();

    let result = producer
        .send(ProducerRecord {
            topic: TOPIC.to_string(),
            partition: 0,
            key: Some(Bytes::from_static(b"key")),
            value: Some(String::from("nope")),
            timestamp: None,
        })
        .await;
    assert_eq!(result, Err(Error::ArgError(String::from("not today"))));

    assert_eq!(broker.metadata_requests.load(Ordering::SeqCst), 0);
    assert_eq!(broker.produce_requests.load(Ordering::SeqCst), 0);

    producer.close().await;
}
