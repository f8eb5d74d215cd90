use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tidewater::config::UserAgentConfig;
use tidewater::storage::{Database, FileStorage, FileStorageType, SqliteFileStorage};
use tidewater::worker::{
    build_http_client, write_crawl_spec, CrawlSpecRecord, HttpFetcher, WorkerSettings,
    CRAWL_SPEC_FILE,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Control database with one crawl spec and the crawl data produced from it
pub struct Setup {
    pub dir: TempDir,
    pub db: Database,
    pub registry: SqliteFileStorage,
    pub spec: FileStorage,
    pub data: FileStorage,
}

/// Registers a spec that crawls the mock server's host from its root
pub fn setup(server: &MockServer) -> Setup {
    let dir = TempDir::new().unwrap();
    let db = Database::open(&dir.path().join("control.db")).unwrap();
    let registry = SqliteFileStorage::new(db.clone());

    let host = url::Url::parse(&server.uri())
        .unwrap()
        .host_str()
        .unwrap()
        .to_string();

    let spec_dir = dir.path().join("spec");
    std::fs::create_dir_all(&spec_dir).unwrap();
    write_crawl_spec(
        &spec_dir.join(CRAWL_SPEC_FILE),
        &[CrawlSpecRecord {
            domain: host,
            urls: vec![format!("{}/", server.uri())],
        }],
    )
    .unwrap();

    let spec = registry
        .register(FileStorageType::CrawlSpec, &spec_dir, "test spec")
        .unwrap();
    let data = registry
        .register(FileStorageType::CrawlData, &dir.path().join("data"), "test data")
        .unwrap();
    registry.relate(spec.id, data.id).unwrap();

    Setup {
        dir,
        db,
        registry,
        spec,
        data,
    }
}

/// Serves a three page site: `/` links to `/a` and `/b`, `/a` links back
pub async fn mount_site(server: &MockServer) {
    let page = |body: &str| {
        ResponseTemplate::new(200)
            .insert_header("content-type", "text/html; charset=utf-8")
            .set_body_string(body.to_string())
    };

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(page(
            r#"<html><body><a href="/a">A</a> <a href="/b">B</a> <a href="https://elsewhere.org/">X</a></body></html>"#,
        ))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(page(r#"<html><body><a href="/">Home</a></body></html>"#))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(page("<html><body>Leaf</body></html>"))
        .mount(server)
        .await;
}

pub fn fetcher() -> HttpFetcher {
    let user_agent = UserAgentConfig {
        crawler_name: "TestBot".to_string(),
        crawler_version: "1.0.0".to_string(),
        contact_url: "https://example.com/contact".to_string(),
        contact_email: "test@example.com".to_string(),
    };
    HttpFetcher::new(build_http_client(&user_agent, Duration::from_secs(5)).unwrap())
}

pub fn settings() -> WorkerSettings {
    WorkerSettings {
        max_pages_per_domain: 50,
        max_known_urls: 1000,
        inbox_poll: Duration::from_millis(20),
        heartbeat_interval: Duration::from_millis(50),
        claim_staleness: Duration::from_millis(300),
    }
}

pub fn log_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}
