//! Recrawl actor across supervisor and crawler restarts

use crate::common::{fetcher, mount_site, settings, setup, Setup};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tidewater::actor::{
    ActorCheckpoint, ActorError, ActorRunner, ActorStateStore, ActorStatus, SqliteActorStore, END,
};
use tidewater::fetchlog::{FetchRecord, LogReader};
use tidewater::mq::{MqInbox, MqOutbox, WaitPolicy};
use tidewater::process::{ProcessHeartbeater, ProcessService, CRAWLER_PROCESS, STATUS_RUNNING};
use tidewater::recrawl::{actor_name, recrawl_from_crawl_data, RecrawlActor, CRAWL, CRAWL_WAIT};
use tidewater::worker::{
    log_path, prepare_domain, read_crawl_spec, CrawlWorker, DomainCrawler, CRAWL_SPEC_FILE,
};
use wiremock::MockServer;

fn policy() -> WaitPolicy {
    WaitPolicy {
        launch_window: Duration::from_secs(10),
        liveness_poll: Duration::from_millis(20),
        response_timeout: Duration::from_millis(100),
    }
}

fn runner(s: &Setup, outbox: &Arc<MqOutbox>) -> ActorRunner<RecrawlActor, SqliteActorStore> {
    let actor = RecrawlActor::new(
        outbox.clone(),
        Arc::new(ProcessService::new(s.db.clone())),
        Arc::new(s.registry.clone()),
    )
    .with_wait_policy(policy());
    ActorRunner::new(&actor_name(s.data.id), actor, SqliteActorStore::new(s.db.clone())).unwrap()
}

async fn wait_for_state(store: &SqliteActorStore, name: &str, state: &str) {
    for _ in 0..500 {
        if let Some(cp) = store.load(name).unwrap() {
            if cp.state_name == state {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("actor {} never reached {}", name, state);
}

#[tokio::test]
async fn test_restart_during_wait_sends_one_request() {
    let server = MockServer::start().await;
    mount_site(&server).await;
    let s = setup(&server);
    let outbox = Arc::new(MqOutbox::new(s.db.clone(), CRAWLER_PROCESS, "supervisor"));
    let name = actor_name(s.data.id);

    // First supervisor: gets as far as waiting, then dies
    let first = runner(&s, &outbox);
    let start = recrawl_from_crawl_data(s.data.id);
    let task = tokio::spawn(async move { first.start(start).await });
    let store = SqliteActorStore::new(s.db.clone());
    wait_for_state(&store, &name, CRAWL_WAIT).await;
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());
    assert_eq!(outbox.sent_count().unwrap(), 1);

    // The crawler comes up and serves the request that is already queued
    let worker = CrawlWorker::new(
        MqInbox::new(s.db.clone(), CRAWLER_PROCESS),
        Arc::new(s.registry.clone()),
        Arc::new(fetcher()),
        ProcessHeartbeater::new(s.db.clone(), CRAWLER_PROCESS),
        settings(),
    );
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let worker_task = tokio::spawn(async move {
        worker
            .run(async {
                let _ = stopped.await;
            })
            .await
    });

    // Second supervisor resumes at CRAWL-WAIT
    let second = runner(&s, &outbox);
    let message = second.resume().await.unwrap();

    let _ = stop.send(());
    worker_task.await.unwrap().unwrap();

    assert_eq!(message.crawl_spec_id, Some(s.spec.id));
    assert!(message.crawler_msg_id > 0);
    assert_eq!(outbox.sent_count().unwrap(), 1);

    let checkpoint = store.load(&name).unwrap().unwrap();
    assert_eq!(checkpoint.state_name, END);
    assert_eq!(checkpoint.status, ActorStatus::Finished);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_crawler_dying_mid_crawl_is_finished_by_next_crawler() {
    let server = MockServer::start().await;
    mount_site(&server).await;
    let s = setup(&server);
    let outbox = Arc::new(MqOutbox::new(s.db.clone(), CRAWLER_PROCESS, "supervisor"));
    let name = actor_name(s.data.id);
    let store = SqliteActorStore::new(s.db.clone());

    let supervisor = runner(&s, &outbox);
    let start = recrawl_from_crawl_data(s.data.id);
    let supervisor_task = tokio::spawn(async move { supervisor.start(start).await });
    wait_for_state(&store, &name, CRAWL_WAIT).await;

    // First crawler claims the request, fetches one page and dies without replying
    let crashed = ProcessHeartbeater::new(s.db.clone(), CRAWLER_PROCESS);
    crashed.beat(STATUS_RUNNING).unwrap();
    let inbox = MqInbox::new(s.db.clone(), CRAWLER_PROCESS)
        .with_owner(&crashed.instance_id().to_string());
    assert_eq!(inbox.poll_new().unwrap().len(), 1);

    let record = read_crawl_spec(&s.spec.path.join(CRAWL_SPEC_FILE))
        .unwrap()
        .remove(0);
    std::fs::create_dir_all(&s.data.path).unwrap();
    let partial = fetcher();
    let prepared = prepare_domain(&s.data.path, &record, 1000).unwrap();
    let outcome = DomainCrawler::new(&partial, prepared, 1).crawl().await.unwrap();
    assert_eq!(outcome.fetched, 1);

    // The relaunched crawler takes the request back once the first one's heartbeat is stale
    let relaunched = CrawlWorker::new(
        MqInbox::new(s.db.clone(), CRAWLER_PROCESS),
        Arc::new(s.registry.clone()),
        Arc::new(fetcher()),
        ProcessHeartbeater::new(s.db.clone(), CRAWLER_PROCESS),
        settings(),
    );
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let worker_task = tokio::spawn(async move {
        relaunched
            .run(async {
                let _ = stopped.await;
            })
            .await
    });

    let message = tokio::time::timeout(Duration::from_secs(20), supervisor_task)
        .await
        .expect("supervisor never finished")
        .unwrap()
        .unwrap();

    let _ = stop.send(());
    worker_task.await.unwrap().unwrap();

    assert!(message.crawler_msg_id > 0);
    assert_eq!(outbox.sent_count().unwrap(), 1);
    let checkpoint = store.load(&name).unwrap().unwrap();
    assert_eq!(checkpoint.state_name, END);
    assert_eq!(checkpoint.status, ActorStatus::Finished);

    let mut fetched: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| r.url.path().to_string())
        .collect();
    fetched.sort();
    assert_eq!(fetched, vec!["/", "/a", "/b"]);

    let responses = LogReader::open(&log_path(&s.data.path, &record.domain))
        .unwrap()
        .filter(|r| matches!(r, Ok(FetchRecord::Response(_))))
        .count();
    assert_eq!(responses, 3);
}

#[tokio::test]
async fn test_restart_during_crawl_is_refused() {
    let server = MockServer::start().await;
    let s = setup(&server);
    let outbox = Arc::new(MqOutbox::new(s.db.clone(), CRAWLER_PROCESS, "supervisor"));
    let name = actor_name(s.data.id);

    // A supervisor that died between checkpointing CRAWL and sending
    let message = recrawl_from_crawl_data(s.data.id).with_crawl_spec_id(s.spec.id);
    let store = SqliteActorStore::new(s.db.clone());
    store
        .save(&ActorCheckpoint {
            actor_name: name.clone(),
            state_name: CRAWL.to_string(),
            message_json: serde_json::to_string(&message).unwrap(),
            status: ActorStatus::Running,
            error: None,
            updated_at: Utc::now(),
        })
        .unwrap();

    let err = runner(&s, &outbox).resume().await.unwrap_err();
    assert!(matches!(err, ActorError::ResumeForbidden(ref state) if state == CRAWL));
    assert_eq!(outbox.sent_count().unwrap(), 0);

    let checkpoint = store.load(&name).unwrap().unwrap();
    assert_eq!(checkpoint.status, ActorStatus::Failed);

    // Once failed, it stays failed
    assert!(matches!(
        runner(&s, &outbox).resume().await.unwrap_err(),
        ActorError::PreviouslyFailed { .. }
    ));
}

#[tokio::test]
async fn test_crawler_that_never_starts() {
    let server = MockServer::start().await;
    let s = setup(&server);
    let outbox = Arc::new(MqOutbox::new(s.db.clone(), CRAWLER_PROCESS, "supervisor"));

    let actor = RecrawlActor::new(
        outbox.clone(),
        Arc::new(ProcessService::new(s.db.clone())),
        Arc::new(s.registry.clone()),
    )
    .with_wait_policy(WaitPolicy {
        launch_window: Duration::from_millis(200),
        ..policy()
    });
    let runner = ActorRunner::new(
        &actor_name(s.data.id),
        actor,
        SqliteActorStore::new(s.db.clone()),
    )
    .unwrap();

    let err = runner
        .start(recrawl_from_crawl_data(s.data.id))
        .await
        .unwrap_err();
    assert!(matches!(err, ActorError::ProcessDidNotLaunch(_)));
    assert_eq!(runner.status().unwrap().unwrap().status, ActorStatus::Failed);
}
