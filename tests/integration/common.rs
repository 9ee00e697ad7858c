//! Shared fixtures: a throwaway state store, seeded tenants, SQLite source
//! files and a minimal HTTP endpoint that records what it receives.

use query_forwarder::config::AppConfig;
use query_forwarder::crypto::EncryptionService;
use query_forwarder::forwarder::Forwarder;
use query_forwarder::persistence::{tenants, Store, TenantConfigInput};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::{tempdir, TempDir};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const USERNAME: &str = "svc-acme";
pub const SECRET: &str = "correct-horse-battery-staple";

pub struct TestEnv {
    pub store: Store,
    pub key: [u8; 32],
    pub dir: TempDir,
}

impl TestEnv {
    pub async fn new() -> Self {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("state.db")).await.unwrap();
        Self {
            store,
            key: EncryptionService::generate_key(),
            dir,
        }
    }

    pub fn encryption(&self) -> EncryptionService {
        EncryptionService::new(&self.key).unwrap()
    }

    pub fn forwarder(&self) -> Forwarder {
        let mut config = AppConfig::default();
        config.query.timeout_secs = 5;
        config.delivery.timeout_secs = 5;
        Forwarder::new(self.store.clone(), self.encryption(), &config).unwrap()
    }

    /// Creates a tenant whose secret is encrypted under this env's key.
    pub async fn seed_tenant(
        &self,
        name: &str,
        db_uri: &str,
        query: &str,
        endpoint: &str,
        method: &str,
    ) -> i64 {
        let token = self.encryption().encrypt(SECRET).unwrap();
        self.seed_tenant_with_token(name, db_uri, query, endpoint, method, &token)
            .await
    }

    pub async fn seed_tenant_with_token(
        &self,
        name: &str,
        db_uri: &str,
        query: &str,
        endpoint: &str,
        method: &str,
        token: &str,
    ) -> i64 {
        let tenant = tenants::create_tenant(&self.store, name).await.unwrap();
        tenants::save_tenant_config(
            &self.store,
            tenant.id,
            &TenantConfigInput {
                db_uri,
                db_query: query,
                api_username: USERNAME,
                api_password_token: token,
                api_endpoint: endpoint,
                api_request_type: method,
            },
        )
        .await
        .unwrap();
        tenant.id
    }

    /// Creates a SQLite source database with an `orders` table.
    pub async fn source_db(&self) -> String {
        create_source_db(&self.dir.path().join("source.db")).await
    }
}

pub async fn create_source_db(path: &Path) -> String {
    let mut conn = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .connect()
        .await
        .unwrap();

    sqlx::query("CREATE TABLE orders (id INTEGER PRIMARY KEY, customer TEXT, total REAL)")
        .execute(&mut conn)
        .await
        .unwrap();
    sqlx::query("INSERT INTO orders VALUES (1, 'ada', 12.5), (2, 'grace', 7.25)")
        .execute(&mut conn)
        .await
        .unwrap();
    conn.close().await.unwrap();

    format!("sqlite://{}", path.display())
}

/// What the endpoint sends back.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Fixed status and body.
    Fixed(u16, String),
    /// 200 with the request body echoed back.
    EchoBody,
    /// 200 with the received Authorization header in the body and in an
    /// `X-Seen-Authorization` response header.
    EchoAuthorization,
}

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A one-route HTTP/1.1 server on 127.0.0.1.
pub struct TestServer {
    pub url: String,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn start(reply: Reply) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let captured = Arc::clone(&requests);
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let captured = Arc::clone(&captured);
                let reply = reply.clone();
                tokio::spawn(async move {
                    handle_connection(stream, &reply, &captured).await;
                });
            }
        });

        Self {
            url: format!("http://{addr}/ingest"),
            requests,
            handle,
        }
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    reply: &Reply,
    captured: &Mutex<Vec<CapturedRequest>>,
) -> Option<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();

    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(n, v)| (n.trim().to_string(), v.trim().to_string()))
        .collect();

    let content_length = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    let request = CapturedRequest {
        method,
        path,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    };

    let authorization = request.header("authorization").unwrap_or("").to_string();
    let (status, response_body, extra) = match reply {
        Reply::Fixed(status, body) => (*status, body.clone(), String::new()),
        Reply::EchoBody => (200, request.body.clone(), String::new()),
        Reply::EchoAuthorization => (
            200,
            format!("you sent {authorization}"),
            format!("X-Seen-Authorization: {authorization}\r\n"),
        ),
    };

    let response = format!(
        "HTTP/1.1 {status} Status\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\
         Connection: close\r\nX-Trace: a\r\nX-Trace: b\r\n{extra}\r\n{response_body}",
        response_body.len()
    );

    // Recorded before replying so a test never sees the response first.
    captured.lock().ok()?.push(request);

    stream.write_all(response.as_bytes()).await.ok()?;
    stream.shutdown().await.ok()
}

/// A URL on a local port with nothing listening.
pub async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}/ingest")
}
