use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use pricewatch_core::error::WatchError;
use pricewatch_core::traits::TabRuntime;
use serde::de::DeserializeOwned;
use tokio::time::Instant;

/// Launch-time options for the controlled browser.
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub headless: bool,
    pub width: u32,
    pub height: u32,
    /// Base directory for persistent browser profiles.
    pub session_base_dir: PathBuf,
    /// Profile name; the user-data dir is `<session_base_dir>/<profile>`,
    /// so cookies and storage survive restarts.
    pub profile: String,
    /// Bound on opening a tab and completing navigation.
    pub nav_timeout: Duration,
    /// Bound on the interactive-ready wait after navigation.
    pub ready_timeout: Duration,
    /// Short pause after the page reports ready, for late-rendered prices.
    pub settle_delay: Duration,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            width: 1920,
            height: 900,
            session_base_dir: PathBuf::from("./session"),
            profile: "default".to_string(),
            nav_timeout: Duration::from_secs(60),
            ready_timeout: Duration::from_secs(30),
            settle_delay: Duration::from_millis(500),
        }
    }
}

/// The controlled runtime: one long-lived Chromium process shared by all
/// clones, driven over the Chrome DevTools Protocol.
///
/// Each [`TabRuntime::open_context`] call opens a fresh tab, navigates it,
/// and waits until the page is interactive; the tab lives until it is
/// passed back to [`TabRuntime::close_context`]. The browser itself is
/// never restarted here; callers observe its death as `RuntimeCrashed`
/// errors on subsequent opens.
#[derive(Clone)]
pub struct ChromiumRuntime {
    browser: Arc<Browser>,
    options: BrowserOptions,
}

impl ChromiumRuntime {
    /// Launches Chromium with a persistent user-data dir derived from the
    /// profile name.
    ///
    /// Requires a Chromium / Chrome binary reachable via `$PATH` (or the
    /// well-known locations checked by [`find_chrome_binary`]).
    pub async fn launch(options: BrowserOptions) -> Result<Self, WatchError> {
        let profile_dir = options.session_base_dir.join(&options.profile);
        std::fs::create_dir_all(&profile_dir).map_err(|e| {
            WatchError::ConfigError(format!(
                "cannot create profile dir {}: {e}",
                profile_dir.display()
            ))
        })?;
        tracing::info!(profile = %profile_dir.display(), "Using browser profile");

        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(options.width, options.height)
            .user_data_dir(&profile_dir);

        if !options.headless {
            builder = builder.with_head();
        }

        // Snap-packaged Chromium exposes a wrapper that rejects standard
        // Chrome CLI flags. Locate the real binary where we can, otherwise
        // let chromiumoxide do its own lookup.
        if let Some(bin) = find_chrome_binary() {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }

        let config = builder
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--disable-translate")
            .arg("--no-first-run")
            .build()
            .map_err(|e| WatchError::ConfigError(format!("browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| WatchError::RuntimeCrashed(format!("failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection
        // to work.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
            options,
        })
    }
}

impl TabRuntime for ChromiumRuntime {
    type Context = TabContext;

    async fn open_context(&self, url: &str) -> Result<TabContext, WatchError> {
        let nav_millis = self.options.nav_timeout.as_millis() as u64;

        let page = tokio::time::timeout(self.options.nav_timeout, self.browser.new_page(url))
            .await
            .map_err(|_| WatchError::NavigationTimeout(nav_millis))?
            .map_err(|e| {
                WatchError::RuntimeCrashed(format!("failed to open tab for {url}: {e}"))
            })?;
        let ctx = TabContext { page };

        // Dropping a TabContext does not close the CDP target, so a failed
        // ready wait must close the tab before the error propagates.
        if let Err(err) = ctx.wait_until_ready(self.options.ready_timeout).await {
            if let Err(close_err) = ctx.page.close().await {
                tracing::warn!(%url, error = %close_err, "Failed to close unready tab");
            }
            return Err(err);
        }
        if !self.options.settle_delay.is_zero() {
            tokio::time::sleep(self.options.settle_delay).await;
        }

        Ok(ctx)
    }

    async fn close_context(&self, ctx: TabContext) -> Result<(), WatchError> {
        ctx.page
            .close()
            .await
            .map_err(|e| WatchError::Generic(format!("failed to close tab: {e}")))
    }
}

/// One isolated tab, navigated and ready. Extractors drive it through
/// [`TabContext::eval`]; nothing else shares the underlying page.
pub struct TabContext {
    page: Page,
}

impl TabContext {
    /// Evaluate a JS expression in the page and deserialize its value.
    pub async fn eval<T: DeserializeOwned>(&self, expression: &str) -> Result<T, WatchError> {
        self.page
            .evaluate(expression)
            .await
            .map_err(|e| WatchError::ExtractionFailed(format!("page evaluation failed: {e}")))?
            .into_value()
            .map_err(|e| {
                WatchError::ExtractionFailed(format!("unexpected evaluation result: {e}"))
            })
    }

    /// Wait, bounded, until `<body>` exists and the document reports
    /// interactive or complete.
    async fn wait_until_ready(&self, timeout: Duration) -> Result<(), WatchError> {
        let timeout_millis = timeout.as_millis() as u64;
        let deadline = Instant::now() + timeout;

        tokio::time::timeout(timeout, self.page.find_element("body"))
            .await
            .map_err(|_| WatchError::NavigationTimeout(timeout_millis))?
            .map_err(|e| WatchError::HttpError(format!("page did not render body: {e}")))?;

        loop {
            let state: String = self
                .eval(r#"document.readyState"#)
                .await
                .unwrap_or_default();
            if state == "interactive" || state == "complete" {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(WatchError::NavigationTimeout(timeout_millis));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Tries to locate the real Chrome/Chromium binary.
///
/// On systems where Chromium is installed via snap, the wrapper at
/// `/snap/bin/chromium` strips unknown CLI flags, breaking headless mode.
/// We look for the real binary inside the snap first, then fall back to
/// well-known system paths. An explicit `CHROME_BIN` override wins.
fn find_chrome_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    let candidates: &[&str] = &[
        // Snap (Ubuntu default)
        "/snap/chromium/current/usr/lib/chromium-browser/chrome",
        // Flatpak
        "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
        // Common apt / manual installs
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ];

    candidates.iter().map(PathBuf::from).find(|p| p.exists())
}
