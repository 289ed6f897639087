use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chromiumoxide::browser::Browser as OxideBrowser;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams, DispatchMouseEventType,
    InsertTextParams, MouseButton,
};
use chromiumoxide::layout::Point;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::computer::{
    BrowserIntrospection, Computer, ComputerError, Environment, OperationFuture, OperationRegistry, ParamsExt,
};
use crate::items::{PageMetadata, Params};

#[derive(Clone)]
pub struct BrowserConfig {
    pub headless: bool,
    pub user_agent: Option<String>,
    pub viewport: (u32, u32),
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self { headless: true, user_agent: None, viewport: (1280, 800) }
    }
}

const METADATA_SCRIPT: &str = r#"
(() => {
  const canonical = document.querySelector('link[rel="canonical"]');
  return {
    title: document.title || null,
    domain: location.hostname || null,
    full_url: location.href,
    canonical_url: canonical ? canonical.href : null
  };
})()
"#;

// Keep navigation in the controlled tab.
const SINGLE_TAB_SCRIPT: &str = r#"
(() => {
  for (const a of document.querySelectorAll('a[target]')) { a.target = '_self'; }
  if (!window.__singleTab) {
    window.__singleTab = true;
    window.open = (url) => { if (url) { location.href = url; } return window; };
  }
})()
"#;

fn built<T>(r: std::result::Result<T, String>) -> Result<T> {
    r.map_err(|e| anyhow!(e))
}

async fn apply_viewport(page: &Page, (width, height): (u32, u32)) -> Result<()> {
    page.execute(built(
        SetDeviceMetricsOverrideParams::builder()
            .width(width as i64)
            .height(height as i64)
            .device_scale_factor(1.0)
            .mobile(false)
            .build(),
    )?)
    .await?;
    Ok(())
}

pub struct Browser {
    page: Page,
    viewport: (u32, u32),
    _browser: OxideBrowser,
}

impl Browser {
    pub async fn launch(cfg: BrowserConfig) -> Result<Self> {
        let mut builder = chromiumoxide::browser::BrowserConfig::builder();
        if !cfg.headless {
            builder = builder.with_head();
        }
        // Unique profile per run so rapid restarts don't trip the profile lock.
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let mut profile_dir: PathBuf = std::env::temp_dir();
        profile_dir.push(format!("glass-loop-profile-{}-{}", std::process::id(), ts));
        std::fs::create_dir_all(&profile_dir)?;
        let (width, height) = cfg.viewport;
        builder = builder
            .user_data_dir(profile_dir)
            .window_size(width, height)
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-extensions")
            .arg("--disable-file-system");
        let bcfg = builder.build().map_err(|e| anyhow!(e))?;
        let (browser, mut handler) = OxideBrowser::launch(bcfg).await?;
        tokio::spawn(async move {
            while let Some(_ev) = handler.next().await {}
        });
        let page = browser.new_page("about:blank").await?;
        Self::prepare(browser, page, cfg).await
    }

    /// Attach to an already running Chromium over its DevTools websocket.
    pub async fn connect(ws_url: &str, cfg: BrowserConfig) -> Result<Self> {
        let (browser, mut handler) = OxideBrowser::connect(ws_url).await?;
        tokio::spawn(async move {
            while let Some(_ev) = handler.next().await {}
        });
        let page = match browser.pages().await?.into_iter().next() {
            Some(page) => page,
            None => browser.new_page("about:blank").await?,
        };
        Self::prepare(browser, page, cfg).await
    }

    async fn prepare(browser: OxideBrowser, page: Page, cfg: BrowserConfig) -> Result<Self> {
        if let Some(ua) = cfg.user_agent {
            page.set_user_agent(ua).await?;
        }
        // non-zero viewport, otherwise screenshots fail with 0 width
        apply_viewport(&page, cfg.viewport).await?;
        Ok(Self { page, viewport: cfg.viewport, _browser: browser })
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    pub async fn goto(&self, url: &str) -> Result<()> {
        self.page.goto(url).await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    pub async fn back(&self) -> Result<()> {
        self.page.evaluate("history.back()").await?;
        self.wait_for_stable().await
    }

    pub async fn forward(&self) -> Result<()> {
        self.page.evaluate("history.forward()").await?;
        self.wait_for_stable().await
    }

    pub async fn url(&self) -> Result<String> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    pub async fn page_metadata(&self) -> Result<PageMetadata> {
        let metadata: PageMetadata = self.page.evaluate(METADATA_SCRIPT).await?.into_value()?;
        Ok(metadata)
    }

    pub async fn enable_single_tab_mode(&self) -> Result<()> {
        self.page.evaluate(SINGLE_TAB_SCRIPT).await?;
        Ok(())
    }

    pub async fn move_mouse(&self, x: i64, y: i64) -> Result<()> {
        self.page.move_mouse(Point { x: x as f64, y: y as f64 }).await?;
        Ok(())
    }

    pub async fn click(&self, x: i64, y: i64, button: &str, count: i64) -> Result<()> {
        let btn = match button {
            "back" => return self.back().await,
            "forward" => return self.forward().await,
            "right" => MouseButton::Right,
            "middle" | "wheel" => MouseButton::Middle,
            _ => MouseButton::Left,
        };
        let cmd = DispatchMouseEventParams::builder()
            .x(x as f64)
            .y(y as f64)
            .button(btn)
            .click_count(count);
        self.page
            .move_mouse(Point { x: x as f64, y: y as f64 })
            .await?
            .execute(built(cmd.clone().r#type(DispatchMouseEventType::MousePressed).build())?)
            .await?;
        self.page
            .execute(built(cmd.r#type(DispatchMouseEventType::MouseReleased).build())?)
            .await?;
        Ok(())
    }

    pub async fn scroll(&self, x: i64, y: i64, dx: i64, dy: i64) -> Result<()> {
        self.move_mouse(x, y).await?;
        self.page
            .evaluate(format!("window.scrollBy({dx}, {dy});"))
            .await?;
        Ok(())
    }

    pub async fn type_text(&self, text: &str) -> Result<()> {
        self.page
            .execute(InsertTextParams { text: text.to_string() })
            .await?;
        Ok(())
    }

    /// Press `keys` as one chord: keydown in order, keyup in reverse.
    pub async fn keypress(&self, keys: &[String]) -> Result<()> {
        let mapped: Vec<KeySpec> = keys.iter().map(|k| KeySpec::from_cua(k)).collect();
        let modifiers = mapped.iter().fold(0i64, |acc, k| acc | k.modifier);
        for key in &mapped {
            let mut down = DispatchKeyEventParams::builder()
                .r#type(DispatchKeyEventType::KeyDown)
                .key(key.key.clone())
                .code(key.code.clone())
                .windows_virtual_key_code(key.key_code)
                .modifiers(modifiers);
            if let Some(text) = key.typed_text(modifiers) {
                down = down.text(text);
            }
            self.page.execute(built(down.build())?).await?;
        }
        for key in mapped.iter().rev() {
            let up = DispatchKeyEventParams::builder()
                .r#type(DispatchKeyEventType::KeyUp)
                .key(key.key.clone())
                .code(key.code.clone())
                .windows_virtual_key_code(key.key_code)
                .modifiers(modifiers);
            self.page.execute(built(up.build())?).await?;
        }
        Ok(())
    }

    pub async fn drag_path(&self, points: &[(i64, i64)]) -> Result<()> {
        let Some((&(sx, sy), rest)) = points.split_first() else {
            return Ok(());
        };
        let down = DispatchMouseEventParams::builder()
            .x(sx as f64)
            .y(sy as f64)
            .button(MouseButton::Left)
            .click_count(1);
        self.page
            .move_mouse(Point { x: sx as f64, y: sy as f64 })
            .await?
            .execute(built(down.clone().r#type(DispatchMouseEventType::MousePressed).build())?)
            .await?;
        let (mut ex, mut ey) = (sx, sy);
        for &(x, y) in rest {
            self.page
                .move_mouse(Point { x: x as f64, y: y as f64 })
                .await?;
            (ex, ey) = (x, y);
        }
        let up = DispatchMouseEventParams::builder()
            .x(ex as f64)
            .y(ey as f64)
            .button(MouseButton::Left)
            .click_count(1);
        self.page
            .execute(built(up.r#type(DispatchMouseEventType::MouseReleased).build())?)
            .await?;
        Ok(())
    }

    pub async fn screenshot_b64(&self) -> Result<String> {
        let take = || async {
            self.page
                .screenshot(ScreenshotParams::builder().full_page(false).build())
                .await
        };
        match take().await {
            Ok(bytes) => Ok(STANDARD.encode(bytes)),
            Err(e) => {
                let msg = e.to_string();
                if msg.contains("0 width") || msg.contains("0 height") {
                    warn!("zero-sized viewport, forcing metrics and retrying screenshot");
                    apply_viewport(&self.page, self.viewport).await?;
                    sleep(Duration::from_millis(50)).await;
                    let bytes = take().await?;
                    return Ok(STANDARD.encode(bytes));
                }
                Err(anyhow!(e))
            }
        }
    }

    pub async fn wait_for_stable(&self) -> Result<()> {
        sleep(Duration::from_millis(400)).await;
        Ok(())
    }
}

struct KeySpec {
    key: String,
    code: String,
    key_code: i64,
    text: Option<String>,
    modifier: i64,
}

const SHIFT: i64 = 8;

impl KeySpec {
    /// Text the key inserts under `modifiers`. Any modifier other than shift suppresses it.
    fn typed_text(&self, modifiers: i64) -> Option<String> {
        if modifiers & !SHIFT != 0 {
            return None;
        }
        let text = self.text.as_deref()?;
        Some(if modifiers & SHIFT != 0 { text.to_uppercase() } else { text.to_string() })
    }

    /// Map a key name as the computer-use model spells it ("CTRL", "ENTER", "a") to the
    /// DevTools key event fields.
    fn from_cua(name: &str) -> Self {
        let named = |key: &str, code: &str, key_code: i64, text: Option<&str>, modifier: i64| KeySpec {
            key: key.into(),
            code: code.into(),
            key_code,
            text: text.map(str::to_string),
            modifier,
        };
        match name.to_ascii_uppercase().as_str() {
            "ALT" | "OPTION" => named("Alt", "AltLeft", 18, None, 1),
            "CTRL" | "CONTROL" => named("Control", "ControlLeft", 17, None, 2),
            "CMD" | "META" | "SUPER" | "WIN" => named("Meta", "MetaLeft", 91, None, 4),
            "SHIFT" => named("Shift", "ShiftLeft", 16, None, SHIFT),
            "ENTER" | "RETURN" => named("Enter", "Enter", 13, Some("\r"), 0),
            "TAB" => named("Tab", "Tab", 9, None, 0),
            "ESC" | "ESCAPE" => named("Escape", "Escape", 27, None, 0),
            "BACKSPACE" => named("Backspace", "Backspace", 8, None, 0),
            "DELETE" | "DEL" => named("Delete", "Delete", 46, None, 0),
            "SPACE" => named(" ", "Space", 32, Some(" "), 0),
            "HOME" => named("Home", "Home", 36, None, 0),
            "END" => named("End", "End", 35, None, 0),
            "PAGEUP" => named("PageUp", "PageUp", 33, None, 0),
            "PAGEDOWN" => named("PageDown", "PageDown", 34, None, 0),
            "LEFT" | "ARROWLEFT" => named("ArrowLeft", "ArrowLeft", 37, None, 0),
            "UP" | "ARROWUP" => named("ArrowUp", "ArrowUp", 38, None, 0),
            "RIGHT" | "ARROWRIGHT" => named("ArrowRight", "ArrowRight", 39, None, 0),
            "DOWN" | "ARROWDOWN" => named("ArrowDown", "ArrowDown", 40, None, 0),
            _ => {
                let mut chars = name.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if c.is_ascii_alphanumeric() => {
                        let upper = c.to_ascii_uppercase();
                        let code = if c.is_ascii_digit() { format!("Digit{c}") } else { format!("Key{upper}") };
                        KeySpec {
                            key: c.to_ascii_lowercase().to_string(),
                            code,
                            key_code: upper as i64,
                            text: Some(c.to_ascii_lowercase().to_string()),
                            modifier: 0,
                        }
                    }
                    _ => named(name, name, 0, None, 0),
                }
            }
        }
    }
}

// ========================= Chromium Adapter =========================

pub struct ChromiumComputer {
    browser: Browser,
}

impl ChromiumComputer {
    pub async fn launch(cfg: BrowserConfig) -> Result<Self> {
        Ok(Self { browser: Browser::launch(cfg).await? })
    }

    pub async fn connect(ws_url: &str, cfg: BrowserConfig) -> Result<Self> {
        Ok(Self { browser: Browser::connect(ws_url, cfg).await? })
    }

    pub async fn open_url(&self, url: &str) -> Result<()> {
        self.browser.goto(url).await?;
        self.settle().await
    }

    pub async fn page_metadata(&self) -> Result<PageMetadata> {
        self.browser.page_metadata().await
    }

    pub async fn current_url(&self) -> Result<String> {
        self.browser.url().await
    }

    async fn settle(&self) -> Result<()> {
        // actions may open new tabs; keep the controlled one
        if let Err(e) = self.browser.enable_single_tab_mode().await {
            debug!(error = %e, "single tab script failed");
        }
        self.browser.wait_for_stable().await
    }
}

fn op_click<'a>(c: &'a ChromiumComputer, p: Params) -> OperationFuture<'a> {
    Box::pin(async move {
        let (x, y) = (p.required_i64("x")?, p.required_i64("y")?);
        let button = p.optional_str("button").unwrap_or("left");
        c.browser.click(x, y, button, 1).await?;
        Ok(c.settle().await?)
    })
}

fn op_double_click<'a>(c: &'a ChromiumComputer, p: Params) -> OperationFuture<'a> {
    Box::pin(async move {
        let (x, y) = (p.required_i64("x")?, p.required_i64("y")?);
        c.browser.click(x, y, "left", 2).await?;
        Ok(c.settle().await?)
    })
}

fn op_scroll<'a>(c: &'a ChromiumComputer, p: Params) -> OperationFuture<'a> {
    Box::pin(async move {
        let (x, y) = (p.required_i64("x")?, p.required_i64("y")?);
        let dx = p.optional_i64("scroll_x")?.unwrap_or(0);
        let dy = p.optional_i64("scroll_y")?.unwrap_or(0);
        c.browser.scroll(x, y, dx, dy).await?;
        Ok(c.settle().await?)
    })
}

fn op_type<'a>(c: &'a ChromiumComputer, p: Params) -> OperationFuture<'a> {
    Box::pin(async move {
        c.browser.type_text(p.required_str("text")?).await?;
        Ok(())
    })
}

fn op_wait<'a>(_c: &'a ChromiumComputer, p: Params) -> OperationFuture<'a> {
    Box::pin(async move {
        let ms = p.optional_i64("ms")?.unwrap_or(1000).max(0) as u64;
        sleep(Duration::from_millis(ms)).await;
        Ok(())
    })
}

fn op_move<'a>(c: &'a ChromiumComputer, p: Params) -> OperationFuture<'a> {
    Box::pin(async move {
        c.browser
            .move_mouse(p.required_i64("x")?, p.required_i64("y")?)
            .await?;
        Ok(())
    })
}

fn op_keypress<'a>(c: &'a ChromiumComputer, p: Params) -> OperationFuture<'a> {
    Box::pin(async move {
        c.browser.keypress(&p.string_list("keys")?).await?;
        Ok(c.settle().await?)
    })
}

fn op_drag<'a>(c: &'a ChromiumComputer, p: Params) -> OperationFuture<'a> {
    Box::pin(async move {
        c.browser.drag_path(&p.points("path")?).await?;
        Ok(c.settle().await?)
    })
}

// The loop screenshots after every computer call anyway.
fn op_screenshot<'a>(_c: &'a ChromiumComputer, _p: Params) -> OperationFuture<'a> {
    Box::pin(async move { Ok(()) })
}

fn op_goto<'a>(c: &'a ChromiumComputer, p: Params) -> OperationFuture<'a> {
    Box::pin(async move {
        c.open_url(p.required_str("url")?).await?;
        Ok(())
    })
}

fn op_back<'a>(c: &'a ChromiumComputer, _p: Params) -> OperationFuture<'a> {
    Box::pin(async move {
        c.browser.back().await?;
        Ok(())
    })
}

fn op_forward<'a>(c: &'a ChromiumComputer, _p: Params) -> OperationFuture<'a> {
    Box::pin(async move {
        c.browser.forward().await?;
        Ok(())
    })
}

#[async_trait]
impl Computer for ChromiumComputer {
    fn environment(&self) -> Environment {
        Environment::Browser
    }

    fn dimensions(&self) -> (u32, u32) {
        self.browser.viewport()
    }

    async fn screenshot(&self) -> Result<String, ComputerError> {
        Ok(self.browser.screenshot_b64().await?)
    }

    fn operations() -> OperationRegistry<Self> {
        OperationRegistry::new()
            .register("click", op_click)
            .register("double_click", op_double_click)
            .register("scroll", op_scroll)
            .register("type", op_type)
            .register("wait", op_wait)
            .register("move", op_move)
            .register("keypress", op_keypress)
            .register("drag", op_drag)
            .register("screenshot", op_screenshot)
            .register("goto", op_goto)
            .register("back", op_back)
            .register("forward", op_forward)
    }

    fn browser(&self) -> Option<&dyn BrowserIntrospection> {
        Some(self)
    }
}

#[async_trait]
impl BrowserIntrospection for ChromiumComputer {
    async fn current_url(&self) -> Result<String, ComputerError> {
        Ok(self.browser.url().await?)
    }

    async fn page_metadata(&self) -> Result<Option<PageMetadata>, ComputerError> {
        Ok(Some(self.browser.page_metadata().await?))
    }
}
