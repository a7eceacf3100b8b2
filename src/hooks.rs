//! Session lifecycle hooks.
//!
//! Hooks fire at connection boundaries and whenever an error has no caller
//! waiting for it. They run outside every session lock, so a hook may call
//! back into the session.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::SessionError;

/// Handler invoked after the handshake succeeds.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
///
/// use futures::FutureExt;
/// use hermes_session::hooks::ConnectHandler;
///
/// let on_connect: ConnectHandler = Arc::new(|| async { println!("connected") }.boxed());
/// ```
pub type ConnectHandler = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Handler invoked after the session tears down a transport.
pub type DisconnectHandler = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Handler invoked for errors no caller observes.
///
/// These include failures of unobserved requests, failed SUB and UNSUB
/// requests, uncorrelated error frames and frames of unknown shape.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
///
/// use futures::FutureExt;
/// use hermes_session::{SessionError, hooks::ErrorHandler};
///
/// let on_error: ErrorHandler = Arc::new(|err: SessionError| {
///     async move {
///         eprintln!("session error: {err}");
///     }
///     .boxed()
/// });
/// ```
pub type ErrorHandler = Arc<dyn Fn(SessionError) -> BoxFuture<'static, ()> + Send + Sync>;

/// Hooks configured on a session builder.
#[expect(
    clippy::struct_field_names,
    reason = "on_ prefix is idiomatic for callback fields"
)]
#[derive(Clone, Default)]
pub(crate) struct LifecycleHooks {
    pub(crate) on_connect: Option<ConnectHandler>,
    pub(crate) on_disconnect: Option<DisconnectHandler>,
    pub(crate) on_error: Option<ErrorHandler>,
}

impl LifecycleHooks {
    pub(crate) async fn connected(&self) {
        if let Some(handler) = &self.on_connect {
            handler().await;
        }
    }

    pub(crate) async fn disconnected(&self) {
        if let Some(handler) = &self.on_disconnect {
            handler().await;
        }
    }

    pub(crate) async fn error(&self, error: SessionError) {
        if let Some(handler) = &self.on_error {
            handler(error).await;
        }
    }
}
