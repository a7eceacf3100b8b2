//! Builder for configuring a [`Session`].

use std::{future::Future, sync::Arc, time::Duration};

use futures::FutureExt;

use super::Session;
use crate::{
    config::SessionConfig,
    error::SessionError,
    hooks::LifecycleHooks,
    schema::{JsonSchemaCodec, SchemaCodec},
    transport::Connector,
};

/// Builder for [`Session`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use hermes_session::{Session, transport::MemoryConnector};
///
/// let (connector, _listener) = MemoryConnector::pair();
/// let session = Session::builder()
///     .connector(connector)
///     .heartbeat_interval(Duration::from_secs(60))
///     .build();
/// let _ = session;
/// ```
pub struct SessionBuilder {
    pub(crate) config: SessionConfig,
    pub(crate) schemas: Arc<dyn SchemaCodec>,
    pub(crate) connector: Option<Arc<dyn Connector>>,
    pub(crate) hooks: LifecycleHooks,
}

impl SessionBuilder {
    /// Create a builder with default settings.
    ///
    /// Records are encoded with [`JsonSchemaCodec`] until a schema codec is
    /// supplied. With the `websocket` feature the default connector opens
    /// WebSocket connections.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
            schemas: Arc::new(JsonSchemaCodec),
            connector: default_connector(),
            hooks: LifecycleHooks::default(),
        }
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Configure the heartbeat interval.
    #[must_use]
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config = self.config.heartbeat_interval(interval);
        self
    }

    /// Configure the multi-get size limit.
    #[must_use]
    pub fn max_multi_get(mut self, limit: usize) -> Self {
        self.config = self.config.max_multi_get(limit);
        self
    }

    /// Configure how many pushes each subscription handle buffers.
    #[must_use]
    pub fn push_buffer(mut self, capacity: usize) -> Self {
        self.config = self.config.push_buffer(capacity);
        self
    }

    /// Replace the codec used for Hermes headers and bodies.
    #[must_use]
    pub fn schema_codec(mut self, codec: impl SchemaCodec + 'static) -> Self {
        self.schemas = Arc::new(codec);
        self
    }

    /// Replace the connector used by [`Session::connect`].
    #[must_use]
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Register a callback invoked after each successful handshake.
    ///
    /// # Examples
    ///
    /// ```
    /// use hermes_session::Session;
    ///
    /// let builder = Session::builder().on_connect(|| async {
    ///     println!("connected");
    /// });
    /// let _ = builder;
    /// ```
    #[must_use]
    pub fn on_connect<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hooks.on_connect = Some(Arc::new(move || f().boxed()));
        self
    }

    /// Register a callback invoked after each teardown.
    #[must_use]
    pub fn on_disconnect<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hooks.on_disconnect = Some(Arc::new(move || f().boxed()));
        self
    }

    /// Register a callback for errors no caller observes.
    ///
    /// # Examples
    ///
    /// ```
    /// use hermes_session::Session;
    ///
    /// let builder = Session::builder().on_error(|err| async move {
    ///     eprintln!("session error: {err}");
    /// });
    /// let _ = builder;
    /// ```
    #[must_use]
    pub fn on_error<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(SessionError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hooks.on_error = Some(Arc::new(move |error: SessionError| f(error).boxed()));
        self
    }

    /// Finish configuration.
    #[must_use]
    pub fn build(self) -> Session { Session::from_builder(self) }
}

impl Default for SessionBuilder {
    fn default() -> Self { Self::new() }
}

#[cfg(feature = "websocket")]
fn default_connector() -> Option<Arc<dyn Connector>> {
    Some(Arc::new(crate::transport::WebSocketConnector))
}

#[cfg(not(feature = "websocket"))]
fn default_connector() -> Option<Arc<dyn Connector>> { None }
