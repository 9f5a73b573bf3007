// ── Screen presenter ──
//
// Sends a display state only when it differs from the last one the
// screen accepted. The lock spans the compare and the send.

use futures_util::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::debug;

use crate::devices::Screen;
use crate::error::CoreError;
use crate::timer::IdleAction;

/// Idle screen state.
pub const WELCOME: &str = "WELCOME";

#[derive(Debug)]
pub struct ScreenPresenter {
    screen: Screen,
    last: Mutex<Option<String>>,
}

impl ScreenPresenter {
    pub fn new(screen: Screen) -> Self {
        Self {
            screen,
            last: Mutex::new(None),
        }
    }

    /// Display `state` unless it is already showing. Returns whether a
    /// request went out. A failed send leaves the remembered state alone.
    pub async fn show(&self, state: &str) -> Result<bool, CoreError> {
        let mut last = self.last.lock().await;
        if last.as_deref() == Some(state) {
            return Ok(false);
        }
        self.screen.display(state).await?;
        debug!(state, "screen updated");
        *last = Some(state.to_owned());
        Ok(true)
    }

    pub async fn show_welcome(&self) -> Result<bool, CoreError> {
        self.show(WELCOME).await
    }

    pub async fn last_shown(&self) -> Option<String> {
        self.last.lock().await.clone()
    }
}

impl IdleAction for ScreenPresenter {
    fn on_idle(&self, _label: &'static str) -> BoxFuture<'_, Result<(), CoreError>> {
        Box::pin(async move {
            self.show_welcome().await?;
            Ok(())
        })
    }
}
