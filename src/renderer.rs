//! HTML to PDF rendering.
//!
//! The browser behind [`ChromeRenderer`] must not be driven from several
//! tasks at once. All renders therefore go through a [`RenderQueue`], a
//! single worker task that owns the renderer and handles one request at a
//! time.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams;
use chromiumoxide::{Browser, BrowserConfig};
use colored::*;
use futures_util::StreamExt;
use std::path::PathBuf;
use tempfile::NamedTempFile;
use tokio::fs;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

/// Paper size and margins, in inches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageLayout {
    pub paper_width: f64,
    pub paper_height: f64,
    pub margin_top: f64,
    pub margin_right: f64,
    pub margin_bottom: f64,
    pub margin_left: f64,
}

impl PageLayout {
    /// Same paper, no margins.
    pub fn full_bleed(&self) -> Self {
        Self {
            margin_top: 0.0,
            margin_right: 0.0,
            margin_bottom: 0.0,
            margin_left: 0.0,
            ..*self
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderRequest {
    /// Complete HTML document.
    pub html: String,
    /// Directory relative resources resolve against.
    pub base_dir: PathBuf,
    pub output: PathBuf,
    pub layout: PageLayout,
    pub header_template: Option<String>,
    pub footer_template: Option<String>,
}

#[async_trait]
pub trait PdfRenderer: Send {
    /// Renders `request.html` into `request.output`. The parent directory
    /// already exists.
    async fn render(&mut self, request: &RenderRequest) -> Result<()>;

    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Headless Chromium via the DevTools protocol. The browser is launched on
/// the first render, so fully cached builds never start it.
#[derive(Default)]
pub struct ChromeRenderer {
    browser: Option<Browser>,
    handler: Option<JoinHandle<()>>,
}

impl ChromeRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    async fn browser(&mut self) -> Result<&Browser> {
        if self.browser.is_none() {
            let config = BrowserConfig::builder()
                .no_sandbox()
                .build()
                .map_err(|e| anyhow!("Failed to create browser config: {}", e))?;

            let (browser, mut handler) = Browser::launch(config)
                .await
                .map_err(|e| anyhow!("Failed to launch browser: {}", e))?;

            self.handler = Some(tokio::spawn(async move {
                while let Some(h) = handler.next().await {
                    if let Err(err) = h {
                        let err_str = err.to_string();
                        if !err_str.contains("data did not match any variant")
                            && !err_str.contains("untagged enum Message")
                        {
                            error!("Browser handler error: {}", err);
                        } else {
                            debug!("Chrome protocol message ignored: {}", err);
                        }
                    }
                }
            }));
            debug!("Headless browser started");
            self.browser = Some(browser);
        }

        self.browser
            .as_ref()
            .ok_or_else(|| anyhow!("Browser is not running"))
    }
}

#[async_trait]
impl PdfRenderer for ChromeRenderer {
    async fn render(&mut self, request: &RenderRequest) -> Result<()> {
        debug!(
            "Rendering {} (resources from {})",
            request.output.display(),
            request.base_dir.display()
        );
        let browser = self.browser().await?;

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| anyhow!("Failed to create new page: {}", e))?;

        // Loaded from a file so the page has a file origin and may pull in
        // local images under its `<base href>`.
        let (_staged, url) = stage_page(request).await?;
        page.goto(url.as_str())
            .await
            .map_err(|e| anyhow!("Failed to load {}: {}", url, e))?;
        page.wait_for_navigation()
            .await
            .map_err(|e| anyhow!("Failed to wait for {}: {}", url, e))?;

        let layout = &request.layout;
        let with_margin_boxes =
            request.header_template.is_some() || request.footer_template.is_some();
        let params = PrintToPdfParams {
            paper_width: Some(layout.paper_width),
            paper_height: Some(layout.paper_height),
            margin_top: Some(layout.margin_top),
            margin_right: Some(layout.margin_right),
            margin_bottom: Some(layout.margin_bottom),
            margin_left: Some(layout.margin_left),
            print_background: Some(true),
            display_header_footer: Some(with_margin_boxes),
            // An empty template still suppresses Chrome's built-in one.
            header_template: Some(margin_box(&request.header_template)),
            footer_template: Some(margin_box(&request.footer_template)),
            ..Default::default()
        };

        let pdf_data = page
            .pdf(params)
            .await
            .map_err(|e| anyhow!("Failed to generate PDF {}: {}", request.output.display(), e))?;

        if let Err(e) = page.close().await {
            debug!("Failed to close page: {}", e);
        }

        fs::write(&request.output, pdf_data)
            .await
            .map_err(|e| anyhow!("Failed to write PDF to {}: {}", request.output.display(), e))?;

        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        if let Some(mut browser) = self.browser.take() {
            browser.close().await.ok();
            browser.wait().await.ok();
        }
        if let Some(handle) = self.handler.take() {
            handle.abort();
        }
        Ok(())
    }
}

/// Writes the request's HTML to a hidden temporary file beside the output
/// PDF. The file is removed when the returned handle is dropped.
async fn stage_page(request: &RenderRequest) -> Result<(NamedTempFile, Url)> {
    let dir = match request.output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::temp_dir(),
    };
    let staged = tempfile::Builder::new()
        .prefix(".bookbuilder-")
        .suffix(".html")
        .tempfile_in(&dir)
        .map_err(|e| anyhow!("Failed to stage page in {}: {}", dir.display(), e))?;
    fs::write(staged.path(), &request.html)
        .await
        .map_err(|e| anyhow!("Failed to write {}: {}", staged.path().display(), e))?;

    let path = if staged.path().is_absolute() {
        staged.path().to_path_buf()
    } else {
        std::env::current_dir()?.join(staged.path())
    };
    let url = Url::from_file_path(&path)
        .map_err(|_| anyhow!("Cannot build a file URL for {}", path.display()))?;
    Ok((staged, url))
}

fn margin_box(template: &Option<String>) -> String {
    template
        .clone()
        .unwrap_or_else(|| "<span></span>".to_string())
}

type RenderJob = (RenderRequest, oneshot::Sender<Result<()>>);

/// Serializes renders onto one worker task.
pub struct RenderQueue {
    sender: Option<mpsc::Sender<RenderJob>>,
    worker: Option<JoinHandle<()>>,
}

impl RenderQueue {
    pub fn spawn(mut renderer: Box<dyn PdfRenderer>) -> Self {
        let (sender, mut receiver) = mpsc::channel::<RenderJob>(1);

        let worker = tokio::spawn(async move {
            while let Some((request, reply)) = receiver.recv().await {
                let result = renderer.render(&request).await;
                if reply.send(result).is_err() {
                    warn!(
                        "Render result for {} was not collected",
                        request.output.display().to_string().blue()
                    );
                }
            }
            if let Err(e) = renderer.shutdown().await {
                warn!("Failed to shut down renderer: {}", e);
            }
        });

        Self {
            sender: Some(sender),
            worker: Some(worker),
        }
    }

    /// Queues a render and waits for its result.
    pub async fn render(&self, request: RenderRequest) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| anyhow!("Render queue is closed"))?;
        let (reply, result) = oneshot::channel();
        sender
            .send((request, reply))
            .await
            .map_err(|_| anyhow!("Render worker has stopped"))?;
        result
            .await
            .map_err(|_| anyhow!("Render worker dropped the request"))?
    }

    /// Drains the queue and shuts the renderer down.
    pub async fn shutdown(mut self) -> Result<()> {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            worker
                .await
                .map_err(|e| anyhow!("Render worker panicked: {}", e))?;
            info!("Renderer stopped");
        }
        Ok(())
    }
}
