#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lms_progress::certificate::{CertificateDocument, CertificateRenderer};
use lms_progress::{db, ProgressEngine};
use tokio::sync::Barrier;

/// Renderer that records how often it ran and can be made to fail or to wait
/// for a second concurrent render.
#[derive(Default)]
pub struct TestRenderer {
    pub calls: AtomicUsize,
    pub fail: bool,
    pub barrier: Option<Barrier>,
}

impl TestRenderer {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn rendezvous(parties: usize) -> Self {
        Self {
            barrier: Some(Barrier::new(parties)),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl CertificateRenderer for TestRenderer {
    async fn render(&self, doc: &CertificateDocument) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }
        if self.fail {
            anyhow::bail!("template missing");
        }
        Ok(format!("/content/certificates/{}.html", doc.code))
    }
}

pub async fn engine_with(renderer: Arc<TestRenderer>) -> ProgressEngine {
    let pool = db::memory().await.expect("Failed to create in-memory database");
    ProgressEngine::new(pool, renderer)
}

pub async fn engine() -> (ProgressEngine, Arc<TestRenderer>) {
    let renderer = Arc::new(TestRenderer::default());
    (engine_with(renderer.clone()).await, renderer)
}

/// Engine over a WAL database file in `dir`, with a multi-connection pool.
pub async fn file_engine(dir: &Path, max_connections: u32) -> ProgressEngine {
    let url = format!("sqlite://{}", dir.join("lms.db").display());
    let pool = db::connect(&url, max_connections)
        .await
        .expect("Failed to open database file");
    db::migrate(&pool).await.expect("Failed to run migrations");
    ProgressEngine::new(pool, Arc::new(TestRenderer::default()))
}

pub async fn count(engine: &ProgressEngine, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(engine.pool())
        .await
        .unwrap()
}
