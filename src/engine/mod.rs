//! Engine Module
//!
//! Composes the three caches and the task scheduler behind the
//! `load` / `get_page` / `render` entry points used by callers.
//!
//! Lookups go cache first; a miss submits a task, waits for its handle and
//! stores the result. Every eviction caused along the way is published as
//! an event.

mod backend;
mod types;

pub use backend::{kind, SyntheticBackend, BASE_HEIGHT, BASE_WIDTH, MAX_SCALE};
pub use types::{Document, Page, RenderOutput};

use std::sync::{Arc, Mutex, PoisonError};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{BoundedCache, CacheStats, Eviction};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::{Event, EventBus};
use crate::scheduler::{Priority, SchedulerStats, TaskOutput, TaskScheduler};
use crate::tasks::{spawn_idle_reaper, spawn_sweep_task, IDLE_CHECK_INTERVAL};
use crate::worker::{PoolStats, TaskHandler};
use types::{document_prefix, page_key, render_key};

type Shared<V> = Arc<RwLock<BoundedCache<Arc<V>>>>;

const DOCUMENTS: &str = "documents";
const PAGES: &str = "pages";
const RENDERS: &str = "renders";

/// Scale used by `preload`.
pub const PRELOAD_SCALE: f32 = 1.0;

/// Snapshot of every cache, the scheduler and the pool.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub documents: CacheStats,
    pub pages: CacheStats,
    pub renders: CacheStats,
    pub scheduler: SchedulerStats,
    pub pool: PoolStats,
}

/// Priority of a preload render by distance from the current page.
pub fn preload_priority(distance: usize) -> Priority {
    match distance {
        0 => Priority::Urgent,
        1 => Priority::High,
        2 => Priority::Normal,
        _ => Priority::Low,
    }
}

// == Engine ==
pub struct Engine {
    config: EngineConfig,
    documents: Shared<Document>,
    pages: Shared<Page>,
    renders: Shared<RenderOutput>,
    scheduler: TaskScheduler,
    events: EventBus,
    sweepers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl Engine {
    /// Builds the engine and starts its background sweeps. Must be called
    /// inside a tokio runtime.
    pub fn new(config: EngineConfig, handler: Arc<dyn TaskHandler>) -> Self {
        let events = EventBus::default();
        let documents = Arc::new(RwLock::new(BoundedCache::from_config(&config.documents)));
        let pages = Arc::new(RwLock::new(BoundedCache::from_config(&config.pages)));
        let renders = Arc::new(RwLock::new(BoundedCache::from_config(&config.renders)));
        let scheduler = TaskScheduler::new(config.scheduler.clone(), handler, events.clone());

        let mut sweepers = Vec::new();
        if !config.sweep_interval.is_zero() {
            let interval = config.sweep_interval;
            sweepers.push(spawn_sweep_task(DOCUMENTS, documents.clone(), interval, events.clone()));
            sweepers.push(spawn_sweep_task(PAGES, pages.clone(), interval, events.clone()));
            sweepers.push(spawn_sweep_task(RENDERS, renders.clone(), interval, events.clone()));
        }
        if let Some(idle_timeout) = config.scheduler.idle_timeout {
            let pool = Arc::clone(scheduler.pool());
            sweepers.push(spawn_idle_reaper(pool, idle_timeout.min(IDLE_CHECK_INTERVAL)));
        }

        Self {
            config,
            documents,
            pages,
            renders,
            scheduler,
            events,
            sweepers: Mutex::new(sweepers),
        }
    }

    /// Engine backed by [`SyntheticBackend`].
    pub fn synthetic(config: EngineConfig) -> Self {
        Self::new(config, Arc::new(SyntheticBackend))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    // == Load ==
    /// Decodes a document, or returns the cached one if the source is unchanged.
    ///
    /// Loading different source under a known id replaces the document and
    /// drops its cached pages and renders.
    pub async fn load(&self, document_id: &str, source: String) -> Result<Arc<Document>> {
        validate_document_id(document_id)?;

        let cached = self.documents.write().await.get(document_id).cloned();
        if let Some(document) = cached {
            if document.source == source {
                return Ok(document);
            }
            info!(document = %document_id, "Document source changed, reloading");
            self.invalidate(document_id).await;
        }

        let payload = json!({ "document_id": document_id, "source": source });
        let output = self.run(kind::DECODE, payload, Priority::High).await?;
        let page_count = output.data["page_count"]
            .as_u64()
            .filter(|&n| n > 0)
            .ok_or_else(|| EngineError::InvalidOutput("decode returned no page_count".to_string()))?
            as usize;
        let title = output.data["title"].as_str().map(str::to_string);

        let size = source.len();
        let document = Arc::new(Document {
            id: document_id.to_string(),
            source,
            page_count,
            title,
        });
        self.store(&self.documents, DOCUMENTS, document_id.to_string(), document.clone(), size)
            .await?;

        info!(document = %document_id, pages = page_count, "Document loaded");
        self.events.publish(Event::DocumentLoaded {
            document_id: document_id.to_string(),
            page_count,
            at: chrono::Utc::now(),
        });
        Ok(document)
    }

    /// A loaded document.
    pub async fn document(&self, document_id: &str) -> Result<Arc<Document>> {
        self.documents
            .write()
            .await
            .get(document_id)
            .cloned()
            .ok_or_else(|| EngineError::DocumentNotLoaded(document_id.to_string()))
    }

    /// Removes a document with its pages and renders. Returns false if it
    /// was not loaded.
    pub async fn unload(&self, document_id: &str) -> bool {
        let removed = self.documents.write().await.delete(document_id);
        self.invalidate(document_id).await;
        removed
    }

    // == Get Page ==
    pub async fn get_page(&self, document_id: &str, page: usize) -> Result<Arc<Page>> {
        let document = self.document(document_id).await?;
        check_page(&document, page)?;

        let key = page_key(document_id, page);
        if let Some(cached) = self.pages.write().await.get(&key).cloned() {
            return Ok(cached);
        }

        let payload = json!({ "source": document.source, "page": page });
        let output = self.run(kind::PAGE, payload, Priority::High).await?;
        let text = output.data["text"]
            .as_str()
            .ok_or_else(|| EngineError::InvalidOutput("page returned no text".to_string()))?
            .to_string();
        let line_count = output.data["line_count"].as_u64().unwrap_or(0) as usize;

        let size = text.len();
        let decoded = Arc::new(Page {
            document_id: document_id.to_string(),
            number: page,
            text,
            line_count,
        });
        self.store(&self.pages, PAGES, key, decoded.clone(), size).await?;

        self.events.publish(Event::PageDecoded {
            document_id: document_id.to_string(),
            page,
        });
        Ok(decoded)
    }

    // == Render ==
    /// Renders a page, or returns the cached raster.
    ///
    /// `scale` is rounded to hundredths first; the rounded value is what gets
    /// rendered, cached and reported.
    pub async fn render(
        &self,
        document_id: &str,
        page: usize,
        scale: f32,
        priority: Priority,
    ) -> Result<Arc<RenderOutput>> {
        let scale = normalize_scale(scale)?;
        let document = self.document(document_id).await?;
        check_page(&document, page)?;

        let key = render_key(document_id, page, scale);
        if let Some(cached) = self.renders.write().await.get(&key).cloned() {
            return Ok(cached);
        }

        let output = self
            .run(kind::RENDER, render_payload(&document, page, scale), priority)
            .await?;
        self.store_render(&document, page, scale, output).await
    }

    async fn store_render(
        &self,
        document: &Document,
        page: usize,
        scale: f32,
        output: TaskOutput,
    ) -> Result<Arc<RenderOutput>> {
        let data = output.data;
        let width = data["width"].as_u64().unwrap_or(0) as u32;
        let height = data["height"].as_u64().unwrap_or(0) as u32;
        let encoded = data["pixels"]
            .as_str()
            .ok_or_else(|| EngineError::InvalidOutput("render returned no pixels".to_string()))?;
        let pixels = BASE64
            .decode(encoded)
            .map_err(|e| EngineError::InvalidOutput(format!("undecodable raster: {e}")))?;
        if width == 0 || pixels.len() != (width as usize) * (height as usize) {
            return Err(EngineError::InvalidOutput(format!(
                "raster of {} bytes does not match {}x{}",
                pixels.len(),
                width,
                height
            )));
        }

        let size = pixels.len();
        let rendered = Arc::new(RenderOutput {
            document_id: document.id.clone(),
            page,
            scale,
            width,
            height,
            pixels,
        });
        let key = render_key(&document.id, page, scale);
        self.store(&self.renders, RENDERS, key, rendered.clone(), size).await?;

        debug!(document = %document.id, page, scale, "Page rendered");
        self.events.publish(Event::PageRendered {
            document_id: document.id.clone(),
            page,
            scale,
            width,
            height,
        });
        Ok(rendered)
    }

    // == Preload ==
    /// Renders the pages around `current_page` that are not cached yet,
    /// nearest first. Returns the pages rendered.
    ///
    /// All renders are submitted before any is awaited, so they run in
    /// parallel up to the pool size and in order of distance beyond it.
    /// A failed neighbour is logged and skipped.
    pub async fn preload(&self, document_id: &str, current_page: usize) -> Result<Vec<usize>> {
        let document = self.document(document_id).await?;
        check_page(&document, current_page)?;

        let distance = self.config.preload_distance;
        let first = current_page.saturating_sub(distance).max(1);
        let last = (current_page + distance).min(document.page_count);

        let mut pending = Vec::new();
        {
            let mut renders = self.renders.write().await;
            for page in first..=last {
                if renders.has(&render_key(document_id, page, PRELOAD_SCALE)) {
                    continue;
                }
                let priority = preload_priority(page.abs_diff(current_page));
                let handle = self.scheduler.submit(
                    kind::RENDER,
                    render_payload(&document, page, PRELOAD_SCALE),
                    priority,
                );
                pending.push((page, handle));
            }
        }

        let mut rendered = Vec::with_capacity(pending.len());
        for (page, handle) in pending {
            match handle.await {
                Ok(output) => {
                    self.store_render(&document, page, PRELOAD_SCALE, output).await?;
                    rendered.push(page);
                }
                Err(e) => warn!(document = %document_id, page, "Preload render failed: {}", e),
            }
        }
        Ok(rendered)
    }

    // == Stats ==
    pub async fn stats(&self) -> EngineStats {
        EngineStats {
            documents: self.documents.read().await.stats(),
            pages: self.pages.read().await.stats(),
            renders: self.renders.read().await.stats(),
            scheduler: self.scheduler.statistics().await,
            pool: self.scheduler.pool().stats(),
        }
    }

    // == Destroy ==
    /// Rejects queued and in-flight tasks, terminates every unit, stops the
    /// sweeps and clears the caches. Safe to call more than once.
    pub async fn destroy(&self) {
        let sweepers: Vec<JoinHandle<()>> = self
            .sweepers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for sweeper in sweepers {
            sweeper.abort();
        }

        self.scheduler.shutdown().await;

        self.documents.write().await.clear();
        self.pages.write().await.clear();
        self.renders.write().await.clear();
        info!("Engine destroyed");
    }

    // == Helpers ==
    async fn run(&self, kind: &str, payload: Value, priority: Priority) -> Result<TaskOutput> {
        Ok(self.scheduler.submit(kind, payload, priority).await?)
    }

    async fn store<V>(
        &self,
        cache: &Shared<V>,
        name: &str,
        key: String,
        value: Arc<V>,
        size: usize,
    ) -> Result<()> {
        let evictions = cache.write().await.set(key, value, size)?;
        self.publish_evictions(name, evictions);
        Ok(())
    }

    fn publish_evictions(&self, cache: &str, evictions: Vec<Eviction>) {
        for eviction in evictions {
            debug!(cache, key = %eviction.key, reason = ?eviction.reason, "Cache entry evicted");
            self.events.publish(Event::CacheEvicted {
                cache: cache.to_string(),
                key: eviction.key,
                reason: eviction.reason,
            });
        }
    }

    /// Drops cached pages and renders of a document.
    async fn invalidate(&self, document_id: &str) {
        let prefix = document_prefix(document_id);
        drop_prefixed(&mut *self.pages.write().await, &prefix);
        drop_prefixed(&mut *self.renders.write().await, &prefix);
    }
}

fn drop_prefixed<V>(cache: &mut BoundedCache<V>, prefix: &str) {
    for key in cache.keys() {
        if key.starts_with(prefix) {
            cache.delete(&key);
        }
    }
}

fn render_payload(document: &Document, page: usize, scale: f32) -> Value {
    json!({ "source": document.source, "page": page, "scale": scale })
}

fn check_page(document: &Document, page: usize) -> Result<()> {
    if page == 0 || page > document.page_count {
        return Err(EngineError::PageOutOfRange {
            document_id: document.id.clone(),
            page,
            page_count: document.page_count,
        });
    }
    Ok(())
}

/// Checks the range and rounds to the precision of the render cache key.
fn normalize_scale(scale: f32) -> Result<f32> {
    let rounded = (scale * 100.0).round() / 100.0;
    if !scale.is_finite() || rounded <= 0.0 || scale > MAX_SCALE {
        return Err(EngineError::InvalidRequest(format!(
            "scale must be in (0, {MAX_SCALE}], got {scale}"
        )));
    }
    Ok(rounded)
}

/// Ids become cache key prefixes, so the key separators are reserved.
fn validate_document_id(document_id: &str) -> Result<()> {
    if document_id.is_empty() || document_id.contains([':', '@']) {
        return Err(EngineError::InvalidRequest(format!(
            "invalid document id '{document_id}'"
        )));
    }
    Ok(())
}
