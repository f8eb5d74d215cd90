//! Crawl worker end-to-end: request in, fetch logs and reply out

use crate::common::{fetcher, log_files, mount_site, settings, setup};
use std::sync::Arc;
use std::time::Duration;
use tidewater::fetchlog::{FetchRecord, LogReader};
use tidewater::mq::{CrawlRequest, MqInbox, MqMessageState, MqOutbox, Outbox, CRAWL_REQUEST};
use tidewater::process::{ProcessHeartbeater, CRAWLER_PROCESS};
use tidewater::worker::{log_path, CrawlWorker};
use wiremock::MockServer;

fn worker(s: &crate::common::Setup) -> CrawlWorker {
    CrawlWorker::new(
        MqInbox::new(s.db.clone(), CRAWLER_PROCESS),
        Arc::new(s.registry.clone()),
        Arc::new(fetcher()),
        ProcessHeartbeater::new(s.db.clone(), CRAWLER_PROCESS),
        settings(),
    )
}

fn responses(path: &std::path::Path) -> Vec<String> {
    LogReader::open(path)
        .unwrap()
        .filter_map(|r| match r.unwrap() {
            FetchRecord::Response(rsp) => Some(rsp.header.target_uri),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_crawl_request_produces_domain_log() {
    let server = MockServer::start().await;
    mount_site(&server).await;
    let s = setup(&server);

    let outbox = MqOutbox::new(s.db.clone(), CRAWLER_PROCESS, "supervisor");
    let request = CrawlRequest {
        crawl_spec: s.spec.id,
        crawl_storage: s.data.id,
    };
    let id = outbox
        .send_async(CRAWL_REQUEST, &serde_json::to_string(&request).unwrap())
        .await
        .unwrap();

    let worker = worker(&s);
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        worker
            .run(async {
                let _ = stopped.await;
            })
            .await
    });

    let reply = outbox.wait_response(id, Duration::from_secs(10)).await.unwrap();
    let _ = stop.send(());
    handle.await.unwrap().unwrap();

    assert_eq!(reply.state, MqMessageState::Ok);
    assert_eq!(reply.payload, r#"{"domains":1,"fetched":3,"failed":0}"#);

    let host = url::Url::parse(&server.uri()).unwrap().host_str().unwrap().to_string();
    let log = log_path(&s.data.path, &host);
    let mut fetched = responses(&log);
    fetched.sort();
    assert_eq!(
        fetched,
        vec![
            format!("{}/", server.uri()),
            format!("{}/a", server.uri()),
            format!("{}/b", server.uri()),
        ]
    );

    assert_eq!(
        log_files(&s.data.path),
        vec!["127.0.0.1.tlog".to_string(), "crawler.log".to_string()]
    );
}

#[tokio::test]
async fn test_repeated_crawl_resumes_from_log() {
    let server = MockServer::start().await;
    mount_site(&server).await;
    let s = setup(&server);
    let outbox = MqOutbox::new(s.db.clone(), CRAWLER_PROCESS, "supervisor");
    let payload = serde_json::to_string(&CrawlRequest {
        crawl_spec: s.spec.id,
        crawl_storage: s.data.id,
    })
    .unwrap();

    let worker = worker(&s);
    let inbox = MqInbox::new(s.db.clone(), CRAWLER_PROCESS);

    for _ in 0..2 {
        outbox.send_async(CRAWL_REQUEST, &payload).await.unwrap();
        for request in inbox.poll_new().unwrap() {
            worker.serve(&request).await.unwrap();
        }
    }

    // Everything was visited the first time round
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);

    let host = url::Url::parse(&server.uri()).unwrap().host_str().unwrap().to_string();
    assert_eq!(responses(&log_path(&s.data.path, &host)).len(), 3);

    let crawler_log = std::fs::read_to_string(s.data.path.join("crawler.log")).unwrap();
    assert_eq!(crawler_log.lines().count(), 2);
    assert!(crawler_log.lines().last().unwrap().contains("fetched=0"));
    assert!(s.dir.path().join("control.db").exists());
}
