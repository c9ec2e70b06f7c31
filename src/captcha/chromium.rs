//! Chromium backend driven over the DevTools protocol

use std::fmt::Display;
use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::fetch::{
    AuthChallengeResponse, AuthChallengeResponseResponse, ContinueRequestParams,
    ContinueWithAuthParams, EnableParams, EventAuthRequired, EventRequestPaused,
};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::browser::{Browser, BrowserContext, BrowserLauncher, ContextOptions, LaunchOptions};
use crate::error::{AppError, AppResult};
use crate::proxy::ProxyCredentials;

fn cdp_error(context: &str, e: impl Display) -> AppError {
    AppError::ChallengeUnavailable(format!("{}: {}", context, e))
}

/// Launches a local Chromium
#[derive(Debug, Default, Clone, Copy)]
pub struct ChromiumLauncher;

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self, options: LaunchOptions) -> AppResult<Arc<dyn Browser>> {
        let mut builder = BrowserConfig::builder()
            .window_size(options.window_size.0, options.window_size.1)
            .args(options.args.clone());
        if let Some(path) = &options.executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder
            .build()
            .map_err(|e| cdp_error("invalid browser configuration", e))?;

        let (browser, mut handler) = CdpBrowser::launch(config)
            .await
            .map_err(|e| cdp_error("failed to launch browser", e))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "DevTools handler event error");
                }
            }
        });

        Ok(Arc::new(ChromiumBrowser {
            inner: Arc::new(Inner {
                browser: RwLock::new(Some(browser)),
                handler: std::sync::Mutex::new(Some(handler_task)),
                user_agent: options.user_agent,
            }),
        }))
    }
}

struct Inner {
    browser: RwLock<Option<CdpBrowser>>,
    handler: std::sync::Mutex<Option<JoinHandle<()>>>,
    user_agent: String,
}

pub struct ChromiumBrowser {
    inner: Arc<Inner>,
}

#[async_trait]
impl Browser for ChromiumBrowser {
    async fn new_context(&self, options: ContextOptions) -> AppResult<Box<dyn BrowserContext>> {
        let guard = self.inner.browser.read().await;
        let browser = guard
            .as_ref()
            .ok_or_else(|| AppError::ChallengeUnavailable("browser already closed".to_string()))?;

        let params = CreateBrowserContextParams {
            dispose_on_detach: Some(true),
            proxy_server: options.proxy.as_ref().map(|p| p.server()),
            ..Default::default()
        };
        let context_id = browser
            .execute(params)
            .await
            .map_err(|e| cdp_error("failed to create browser context", e))?
            .result
            .browser_context_id;

        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .build()
            .map_err(|e| cdp_error("invalid target", e))?;
        let page = match browser.new_page(target).await {
            Ok(page) => page,
            Err(e) => {
                let _ = browser
                    .execute(DisposeBrowserContextParams::new(context_id))
                    .await;
                return Err(cdp_error("failed to open page", e));
            }
        };
        drop(guard);

        let mut context = ChromiumContext {
            inner: self.inner.clone(),
            context_id,
            page: Some(page),
            auth_task: None,
        };

        if let Err(e) = context.prepare(options.proxy.and_then(|p| p.credentials)).await {
            let _ = Box::new(context).close().await;
            return Err(e);
        }
        Ok(Box::new(context))
    }

    async fn is_alive(&self) -> bool {
        if self.inner.browser.read().await.is_none() {
            return false;
        }
        // The handler loop ends once the DevTools connection is gone.
        self.inner
            .handler
            .lock()
            .map(|handler| handler.as_ref().is_some_and(|task| !task.is_finished()))
            .unwrap_or(false)
    }

    async fn close(&self) -> AppResult<()> {
        let browser = self.inner.browser.write().await.take();
        let handler = self
            .inner
            .handler
            .lock()
            .ok()
            .and_then(|mut h| h.take());

        let result = match browser {
            Some(mut browser) => {
                let closed = browser.close().await.map(|_| ());
                let _ = browser.wait().await;
                closed.map_err(|e| cdp_error("failed to close browser", e))
            }
            None => Ok(()),
        };

        if let Some(handler) = handler {
            handler.abort();
        }
        result
    }
}

pub struct ChromiumContext {
    inner: Arc<Inner>,
    context_id: BrowserContextId,
    page: Option<Page>,
    auth_task: Option<JoinHandle<()>>,
}

impl ChromiumContext {
    fn page(&self) -> AppResult<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| AppError::ChallengeUnavailable("page already closed".to_string()))
    }

    async fn prepare(&mut self, credentials: Option<ProxyCredentials>) -> AppResult<()> {
        let page = self.page()?.clone();
        page.set_user_agent(SetUserAgentOverrideParams::new(self.inner.user_agent.clone()))
            .await
            .map_err(|e| cdp_error("failed to set user agent", e))?;

        let Some(credentials) = credentials else {
            return Ok(());
        };

        // Answer proxy authentication challenges for this page only.
        let mut auth_events = page
            .event_listener::<EventAuthRequired>()
            .await
            .map_err(|e| cdp_error("failed to listen for auth", e))?;
        let mut paused_events = page
            .event_listener::<EventRequestPaused>()
            .await
            .map_err(|e| cdp_error("failed to listen for requests", e))?;

        page.execute(EnableParams {
            patterns: None,
            handle_auth_requests: Some(true),
        })
        .await
        .map_err(|e| cdp_error("failed to enable request interception", e))?;

        let responder = page.clone();
        self.auth_task = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(event) = auth_events.next() => {
                        let answer = AuthChallengeResponse {
                            response: AuthChallengeResponseResponse::ProvideCredentials,
                            username: Some(credentials.username.clone()),
                            password: Some(credentials.password.clone()),
                        };
                        let params = ContinueWithAuthParams::new(event.request_id.clone(), answer);
                        if let Err(e) = responder.execute(params).await {
                            warn!(error = %e, "Failed to answer proxy auth challenge");
                        }
                    }
                    Some(event) = paused_events.next() => {
                        let params = ContinueRequestParams::new(event.request_id.clone());
                        if let Err(e) = responder.execute(params).await {
                            debug!(error = %e, "Failed to continue paused request");
                        }
                    }
                    else => break,
                }
            }
        }));
        Ok(())
    }
}

#[async_trait]
impl BrowserContext for ChromiumContext {
    async fn goto(&mut self, url: &str) -> AppResult<()> {
        self.page()?
            .goto(url)
            .await
            .map_err(|e| cdp_error("navigation failed", e))?;
        Ok(())
    }

    async fn evaluate(&mut self, script: &str) -> AppResult<serde_json::Value> {
        let params = EvaluateParams::builder()
            .expression(script)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(|e| cdp_error("invalid script", e))?;

        let result = self
            .page()?
            .evaluate_expression(params)
            .await
            .map_err(|e| cdp_error("script evaluation failed", e))?;

        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn close(mut self: Box<Self>) -> AppResult<()> {
        if let Some(task) = self.auth_task.take() {
            task.abort();
        }
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                debug!(error = %e, "Page close failed");
            }
        }

        let inner = self.inner.clone();
        let guard = inner.browser.read().await;
        let disposed = match guard.as_ref() {
            Some(browser) => browser
                .execute(DisposeBrowserContextParams::new(self.context_id.clone()))
                .await
                .map(|_| ())
                .map_err(|e| cdp_error("failed to dispose browser context", e)),
            None => Ok(()),
        };
        disposed
    }
}

impl Drop for ChromiumContext {
    /// Dispose a context that was dropped without `close`
    fn drop(&mut self) {
        if let Some(task) = self.auth_task.take() {
            task.abort();
        }
        let Some(page) = self.page.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let inner = self.inner.clone();
        let context_id = self.context_id.clone();
        handle.spawn(async move {
            let _ = page.close().await;
            if let Some(browser) = inner.browser.read().await.as_ref() {
                let _ = browser
                    .execute(DisposeBrowserContextParams::new(context_id))
                    .await;
            }
        });
    }
}
