//! Headless Chrome host backed by a dedicated worker thread
//!
//! `headless_chrome` is synchronous, so a worker thread owns the `Browser` and
//! every open tab. Async callers send commands over a channel and await the
//! reply on a oneshot.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use headless_chrome::browser::tab::Tab;
use headless_chrome::protocol::cdp::Page;
use headless_chrome::{Browser, LaunchOptions};
use log::{debug, info, warn};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::host::{jpeg_data_uri, PageOp, ScriptHost, VisibleCapture};
use crate::{Error, JpegQuality, Result, TabId, Viewport};

/// Launch settings for [`CdpHost`]
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub viewport: Viewport,
    pub headless: bool,
    /// Extra wait after navigation for late layout and web fonts
    pub load_settle: Duration,
    /// Default timeout for every CDP call on a tab
    pub timeout: Duration,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            headless: true,
            load_settle: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    OpenTab(String, Reply<TabId>),
    Execute(TabId, String, Reply<Vec<Value>>),
    Capture(TabId, u32, Reply<Vec<u8>>),
    CloseTab(TabId, Reply<()>),
    Shutdown(Reply<()>),
}

/// Browser state living on the worker thread
struct Worker {
    browser: Browser,
    config: BrowserConfig,
    tabs: HashMap<TabId, Arc<Tab>>,
    next_id: u32,
}

impl Worker {
    fn launch(config: BrowserConfig) -> Result<Self> {
        let options = LaunchOptions::default_builder()
            .headless(config.headless)
            .window_size(Some((config.viewport.width, config.viewport.height)))
            .build()
            .map_err(|e| Error::InitializationError(format!("Failed to build launch options: {}", e)))?;

        let browser =
            Browser::new(options).map_err(|e| Error::InitializationError(format!("Failed to launch browser: {}", e)))?;

        Ok(Self {
            browser,
            config,
            tabs: HashMap::new(),
            next_id: 1,
        })
    }

    fn tab(&self, id: TabId) -> Result<&Arc<Tab>> {
        self.tabs.get(&id).ok_or_else(|| Error::Other(format!("unknown {}", id)))
    }

    fn open_tab(&mut self, url: &str) -> Result<TabId> {
        let tab = self
            .browser
            .new_tab()
            .map_err(|e| Error::InitializationError(format!("Failed to create tab: {}", e)))?;
        tab.set_default_timeout(self.config.timeout);
        tab.navigate_to(url)
            .and_then(|t| t.wait_until_navigated())
            .map_err(|e| Error::Other(format!("Navigation to {} failed: {}", url, e)))?;

        if !self.config.load_settle.is_zero() {
            thread::sleep(self.config.load_settle);
        }

        let id = TabId(self.next_id);
        self.next_id += 1;
        self.tabs.insert(id, tab);
        debug!("{} opened at {}", id, url);
        Ok(id)
    }

    fn execute(&self, id: TabId, script: &str) -> Result<Vec<Value>> {
        let result = self
            .tab(id)?
            .evaluate(script, false)
            .map_err(|e| Error::ScriptError(format!("Evaluation failed: {}", e)))?;
        Ok(result.value.into_iter().collect())
    }

    fn capture(&self, id: TabId, quality: u32) -> Result<Vec<u8>> {
        self.tab(id)?
            .capture_screenshot(Page::CaptureScreenshotFormatOption::Jpeg, Some(quality), None, true)
            .map_err(|e| Error::CaptureFailed(e.to_string()))
    }

    fn close_tab(&mut self, id: TabId) -> Result<()> {
        let tab = self.tabs.remove(&id).ok_or_else(|| Error::Other(format!("unknown {}", id)))?;
        tab.close(false)?;
        debug!("{} closed", id);
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        for (id, tab) in self.tabs.drain() {
            if let Err(e) = tab.close(false) {
                warn!("closing {} failed: {}", id, e);
            }
        }
        Ok(())
    }

    /// Serve commands until shutdown or until every sender is gone
    fn run(mut self, commands: Receiver<Command>) {
        while let Ok(cmd) = commands.recv() {
            match cmd {
                Command::OpenTab(url, reply) => {
                    let _ = reply.send(self.open_tab(&url));
                }
                Command::Execute(tab, script, reply) => {
                    let _ = reply.send(self.execute(tab, &script));
                }
                Command::Capture(tab, quality, reply) => {
                    let _ = reply.send(self.capture(tab, quality));
                }
                Command::CloseTab(tab, reply) => {
                    let _ = reply.send(self.close_tab(tab));
                }
                Command::Shutdown(reply) => {
                    let _ = reply.send(self.shutdown());
                    break;
                }
            }
        }
        debug!("browser worker stopped");
    }
}

/// Page host driving a headless Chrome instance.
///
/// Cloning is cheap; every clone talks to the same browser.
#[derive(Clone)]
pub struct CdpHost {
    commands: Sender<Command>,
}

impl CdpHost {
    /// Launch Chrome on a new worker thread.
    pub async fn launch(config: BrowserConfig) -> Result<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
        let (init_tx, init_rx) = oneshot::channel::<Result<()>>();

        thread::Builder::new()
            .name("pagestitch-chrome".into())
            .spawn(move || match Worker::launch(config) {
                Ok(worker) => {
                    let _ = init_tx.send(Ok(()));
                    worker.run(cmd_rx);
                }
                Err(e) => {
                    let _ = init_tx.send(Err(e));
                }
            })?;

        init_rx
            .await
            .map_err(|e| Error::InitializationError(format!("Browser worker exited during launch: {}", e)))??;
        info!("headless Chrome launched");
        Ok(Self { commands: cmd_tx })
    }

    async fn request<T>(&self, what: &str, command: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .map_err(|_| Error::Other(format!("{}: browser worker has shut down", what)))?;
        rx.await.map_err(|e| Error::Other(format!("{} canceled: {}", what, e)))?
    }

    /// Open `url` in a new tab and wait for it to load
    pub async fn open_tab(&self, url: &str) -> Result<TabId> {
        let url = url.to_string();
        self.request("OpenTab", move |tx| Command::OpenTab(url, tx)).await
    }

    pub async fn close_tab(&self, tab: TabId) -> Result<()> {
        self.request("CloseTab", move |tx| Command::CloseTab(tab, tx)).await
    }

    /// Close every tab and stop the worker; dropping the browser ends Chrome.
    pub async fn close(self) -> Result<()> {
        self.request("Shutdown", Command::Shutdown).await
    }
}

impl ScriptHost for CdpHost {
    async fn execute(&self, tab: TabId, op: &PageOp) -> Result<Vec<Value>> {
        let script = op.script();
        self.request("Execute", move |tx| Command::Execute(tab, script, tx)).await
    }
}

impl VisibleCapture for CdpHost {
    async fn capture_visible(&self, tab: TabId, quality: JpegQuality) -> Result<String> {
        let q = u32::from(quality.get());
        let bytes = self.request("Capture", move |tx| Command::Capture(tab, q, tx)).await?;
        Ok(jpeg_data_uri(&bytes))
    }
}
