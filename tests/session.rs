mod testsupport;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use josef::prelude::{protocol, BrokerAddress, Error, Session, SessionConfig};
use testsupport::{metadata_response, MockBroker, SeenRequest};

const CLIENT_ID: &str = "session integration test";

fn addr_of(broker: &MockBroker) -> BrokerAddress {
    broker.addr.to_string().parse().unwrap()
}

fn test_session(broker: &MockBroker) -> Session {
    Session::new(vec![addr_of(broker)], SessionConfig::default()).unwrap()
}

#[tokio::test]
async fn concurrent_senders_share_one_connection() {
    let broker = MockBroker::spawn(|request: &SeenRequest| {
        vec![metadata_response(request.correlation_id, &[], &[])]
    })
    .await;

    let session = Arc::new(test_session(&broker));
    let addr = addr_of(&broker);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let session = session.clone();
        let addr = addr.clone();
        tasks.push(tokio::spawn(async move {
            let topics: Vec<String> = vec![];
            session
                .send(&addr, true, |correlation_id| {
                    protocol::MetadataRequest::new(correlation_id, CLIENT_ID, &topics)
                })
                .await
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap().is_ok());
    }

    // eight concurrent first-senders, one TCP connect
    assert_eq!(broker.accepted.load(Ordering::SeqCst), 1);

    session.close().await;
}

#[tokio::test]
async fn closed_session_refuses_requests() {
    let broker = MockBroker::spawn(|request: &SeenRequest| {
        vec![metadata_response(request.correlation_id, &[], &[])]
    })
    .await;

    let session = test_session(&broker);
    let addr = addr_of(&broker);

    session.close().await;

    let topics: Vec<String> = vec![];
    let result = session
        .send(&addr, true, |correlation_id| {
            protocol::MetadataRequest::new(correlation_id, CLIENT_ID, &topics)
        })
        .await;
    assert_eq!(result.map(|_| ()), Err(Error::SessionClosed));
}

#[tokio::test]
async fn closing_a_session_cancels_outstanding_requests() {
    // the broker never answers, so the request is parked until close
    let broker = MockBroker::spawn(|_: &SeenRequest| vec![]).await;

    let session = Arc::new(test_session(&broker));
    let addr = addr_of(&broker);

    let pending = {
        let session = session.clone();
        let addr = addr.clone();
        tokio::spawn(async move {
            let topics: Vec<String> = vec![];
            session
                .send(&addr, true, |correlation_id| {
                    protocol::MetadataRequest::new(correlation_id, CLIENT_ID, &topics)
                })
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    session.close().await;

    assert_eq!(pending.await.unwrap().map(|_| ()), Err(Error::Canceled));
}

#[tokio::test]
async fn a_broken_connection_is_replaced_on_the_next_send() {
    let broker = MockBroker::spawn(|request: &SeenRequest| {
        vec![metadata_response(request.correlation_id, &[], &[])]
    })
    .await;

    let session = test_session(&broker);
    let addr = addr_of(&broker);

    let conn = session.connection(&addr).await.unwrap();
    conn.close().await;
    assert!(!conn.is_ready());

    // the pool hands out a fresh connection instead of the dead one
    let replacement = session.connection(&addr).await.unwrap();
    assert!(replacement.is_ready());
    assert_eq!(broker.accepted.load(Ordering::SeqCst), 2);

    session.close().await;
}
