//! Runtime hosting the browser
//!
//! On some platforms the host runtime cannot spawn the browser subprocess.
//! When a dedicated driver is requested, browser work runs on a separate
//! multi-threaded runtime owned by a background thread; `restore` tears it
//! down so later work runs on the host runtime again.

use std::future::Future;
use std::sync::Mutex;
use std::thread::JoinHandle as ThreadHandle;

use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};

struct Dedicated {
    handle: Handle,
    shutdown: oneshot::Sender<()>,
    thread: ThreadHandle<()>,
}

/// Chooses the runtime browser work is spawned on
pub struct DriverHost {
    dedicated: bool,
    active: Mutex<Option<Dedicated>>,
}

impl DriverHost {
    pub fn new(dedicated: bool) -> Self {
        Self {
            dedicated,
            active: Mutex::new(None),
        }
    }

    pub fn is_dedicated(&self) -> bool {
        self.dedicated
    }

    /// Start the dedicated runtime if configured and not yet running
    pub fn activate(&self) -> AppResult<()> {
        if !self.dedicated {
            return Ok(());
        }

        let mut active = self
            .active
            .lock()
            .map_err(|_| AppError::Internal(anyhow::anyhow!("driver lock poisoned")))?;
        if active.is_some() {
            return Ok(());
        }

        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("captcha-driver")
            .enable_all()
            .build()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to start browser driver: {}", e)))?;
        let handle = runtime.handle().clone();
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("captcha-driver-host".to_string())
            .spawn(move || {
                let _ = runtime.block_on(shutdown_rx);
                runtime.shutdown_timeout(std::time::Duration::from_secs(5));
            })
            .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to spawn driver thread: {}", e)))?;

        info!("Dedicated browser driver started");
        *active = Some(Dedicated {
            handle,
            shutdown,
            thread,
        });
        Ok(())
    }

    /// Handle browser work should be spawned on
    pub fn handle(&self) -> Handle {
        self.active
            .lock()
            .ok()
            .and_then(|active| active.as_ref().map(|d| d.handle.clone()))
            .unwrap_or_else(Handle::current)
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle().spawn(future)
    }

    /// Stop the dedicated runtime; later work runs on the host runtime
    pub async fn restore(&self) {
        let dedicated = match self.active.lock() {
            Ok(mut active) => active.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        let Some(dedicated) = dedicated else {
            return;
        };

        let _ = dedicated.shutdown.send(());
        let joined = tokio::task::spawn_blocking(move || dedicated.thread.join()).await;
        match joined {
            Ok(Ok(())) => debug!("Dedicated browser driver stopped"),
            _ => warn!("Dedicated browser driver did not stop cleanly"),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.lock().map(|a| a.is_some()).unwrap_or(false)
    }
}
