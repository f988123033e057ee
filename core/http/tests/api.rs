//! HTTP API against an in-process vault on a real listener.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{CONTENT_DISPOSITION, COOKIE, SET_COOKIE};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use vaultgate_app::{AppConfig, BrowsingService, RateLimitConfig};
use vaultgate_common::{Passphrase, VaultDescriptor, VaultId, VaultPath};
use vaultgate_crypto::KdfParams;
use vaultgate_vault::format::initialize;
use vaultgate_vault::{AdapterKind, MountConfig, VaultAdapter};

const PASSPHRASE: &str = "correct-horse";

struct TestServer {
    base: String,
    client: Client,
    service: Arc<BrowsingService>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
    _dir: TempDir,
}

impl TestServer {
    async fn start(tune: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("personal");
        let pass = Passphrase::new(PASSPHRASE);
        initialize(&root, &pass, KdfParams::minimal()).unwrap();

        let mut config = AppConfig {
            secret_key: "api-tests".to_string(),
            adapter: AdapterKind::InProcess,
            vaults: vec![VaultDescriptor::new(VaultId::new("personal").unwrap(), &root)],
            ..AppConfig::default()
        };
        tune(&mut config);
        config.validate().unwrap();

        let vault = config.vault("personal").unwrap().clone();
        let adapter = VaultAdapter::from_kind(AdapterKind::InProcess, MountConfig::default());
        let mut handle = adapter.open(&vault, &pass).unwrap();
        adapter
            .make_dir(&handle, &VaultPath::parse("/docs").unwrap())
            .unwrap();
        adapter
            .write_file(
                &handle,
                &VaultPath::parse("/docs/report final.txt").unwrap(),
                b"quarterly numbers",
            )
            .unwrap();
        adapter.close(&mut handle);

        let service = Arc::new(BrowsingService::from_config(&config));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(vaultgate_http::serve(
            listener,
            service.clone(),
            false,
            Duration::from_secs(60),
            async move {
                let _ = stopped.await;
            },
        ));

        Self {
            base,
            client: Client::new(),
            service,
            stop,
            task,
            _dir: dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn login(&self, vault: &str, passphrase: &str) -> reqwest::Response {
        self.client
            .post(self.url("/login"))
            .json(&json!({ "vault": vault, "passphrase": passphrase }))
            .send()
            .await
            .unwrap()
    }

    /// Log in and return the `Cookie` header value to send back.
    async fn cookie(&self) -> String {
        let response = self.login("personal", PASSPHRASE).await;
        assert_eq!(response.status(), StatusCode::OK);
        let set_cookie = response.headers()[SET_COOKIE].to_str().unwrap().to_string();
        assert!(set_cookie.contains("HttpOnly"));
        assert!(set_cookie.contains("SameSite=Strict"));
        set_cookie.split(';').next().unwrap().to_string()
    }

    async fn stop(self) {
        let TestServer {
            client,
            stop,
            task,
            _dir: dir,
            ..
        } = self;
        drop(client);
        let _ = stop.send(());
        task.await.unwrap().unwrap();
        drop(dir);
    }
}

#[tokio::test]
async fn test_vault_list_is_public() {
    let server = TestServer::start(|_| {}).await;
    let body: Value = server
        .client
        .get(server.url("/api/v1/vaults"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({ "vaults": ["personal"] }));
    server.stop().await;
}

#[tokio::test]
async fn test_browse_requires_session() {
    let server = TestServer::start(|_| {}).await;
    let response = server
        .client
        .get(server.url("/api/v1/fs/list?path=/"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = server
        .client
        .get(server.url("/api/v1/fs/list?path=/"))
        .header(COOKIE, "session=forged.token")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = server
        .client
        .get(server.url("/download?path=/../x"))
        .header(COOKIE, "session=forged.token")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    server.stop().await;
}

#[tokio::test]
async fn test_login_browse_download_logout() {
    let server = TestServer::start(|_| {}).await;
    let cookie = server.cookie().await;

    let listing: Value = server
        .client
        .get(server.url("/api/v1/fs/list?path=/docs"))
        .header(COOKIE, &cookie)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listing["path"], "/docs");
    assert_eq!(listing["entries"][0]["name"], "report final.txt");
    assert_eq!(listing["entries"][0]["size"], 17);

    let response = server
        .client
        .get(server.url("/download?path=/docs/report%20final.txt"))
        .header(COOKIE, &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[CONTENT_DISPOSITION],
        "attachment; filename*=UTF-8''report%20final%2Etxt"
    );
    assert_eq!(response.bytes().await.unwrap().as_ref(), b"quarterly numbers");

    let response = server
        .client
        .post(server.url("/logout"))
        .header(COOKIE, &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(server.service.sessions().is_empty());

    let response = server
        .client
        .get(server.url("/api/v1/fs/list?path=/"))
        .header(COOKIE, &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    server.stop().await;
}

#[tokio::test]
async fn test_error_statuses() {
    let server = TestServer::start(|_| {}).await;
    let cookie = server.cookie().await;

    let cases = [
        ("/api/v1/fs/list?path=/missing", StatusCode::NOT_FOUND),
        ("/api/v1/fs/list?path=/../../etc", StatusCode::NOT_FOUND),
        ("/download?path=/docs", StatusCode::BAD_REQUEST),
        ("/download?path=/nope.txt", StatusCode::NOT_FOUND),
    ];
    for (path, status) in cases {
        let response = server
            .client
            .get(server.url(path))
            .header(COOKIE, &cookie)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), status, "{}", path);
        let body: Value = response.json().await.unwrap();
        assert!(body["error"].is_string());
    }
    server.stop().await;
}

#[tokio::test]
async fn test_upload_mkdir_move_and_tree() {
    let server = TestServer::start(|_| {}).await;
    let cookie = server.cookie().await;

    let response = server
        .client
        .post(server.url("/api/v1/fs/mkdir"))
        .header(COOKIE, &cookie)
        .json(&json!({ "path": "/archive" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = server
        .client
        .put(server.url("/api/v1/fs/file?path=/&name=notes.md"))
        .header(COOKIE, &cookie)
        .body("# notes")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let entry: Value = response.json().await.unwrap();
    assert_eq!(entry["path"], "/notes.md");

    let response = server
        .client
        .put(server.url("/api/v1/fs/file?path=/&name=notes.md"))
        .header(COOKIE, &cookie)
        .body("replaced")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let entry: Value = response.json().await.unwrap();
    assert_eq!(entry["size"], 8);

    let response = server
        .client
        .post(server.url("/api/v1/fs/mkdir"))
        .header(COOKIE, &cookie)
        .json(&json!({ "path": "/archive" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let moved: Value = server
        .client
        .post(server.url("/api/v1/fs/move"))
        .header(COOKIE, &cookie)
        .json(&json!({ "source": "/notes.md", "destination": "/archive" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(moved, json!({ "path": "/archive/notes.md" }));

    let tree: Value = server
        .client
        .get(server.url("/api/v1/fs/tree"))
        .header(COOKIE, &cookie)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let dirs: Vec<_> = tree["children"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["path"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(dirs, vec!["/archive", "/docs"]);
    server.stop().await;
}

#[tokio::test]
async fn test_upload_over_limit_is_rejected() {
    let server = TestServer::start(|config| config.max_upload_bytes = 16).await;
    let cookie = server.cookie().await;

    let response = server
        .client
        .put(server.url("/api/v1/fs/file?path=/&name=big.bin"))
        .header(COOKIE, &cookie)
        .body(vec![0u8; 64])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    server.stop().await;
}

#[tokio::test]
async fn test_failed_logins_are_rate_limited() {
    let server = TestServer::start(|config| {
        config.rate_limit = RateLimitConfig {
            max_failures: 2,
            window_seconds: 300,
        }
    })
    .await;

    for _ in 0..2 {
        let response = server.login("personal", "wrong").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
    let response = server.login("no-such-vault", PASSPHRASE).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let response = server.login("personal", PASSPHRASE).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    server.stop().await;
}

#[tokio::test]
async fn test_unknown_vault_looks_like_wrong_passphrase() {
    let server = TestServer::start(|_| {}).await;
    let unknown = server.login("no-such-vault", PASSPHRASE).await;
    let wrong = server.login("personal", "wrong").await;
    assert_eq!(unknown.status(), wrong.status());
    assert_eq!(
        unknown.json::<Value>().await.unwrap(),
        wrong.json::<Value>().await.unwrap()
    );
    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_closes_sessions() {
    let server = TestServer::start(|_| {}).await;
    let _cookie = server.cookie().await;
    let service = server.service.clone();
    assert_eq!(service.sessions().len(), 1);
    server.stop().await;
    assert!(service.sessions().is_empty());
}
