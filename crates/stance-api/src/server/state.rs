#[derive(Clone)]
struct AppState {
    inner: std::sync::Arc<Mutex<ServerInner>>,
}

impl AppState {
    /// Starts with an open session so inspection works immediately.
    fn new(config: StanceConfig) -> Self {
        let api = SessionApi::from_config(config.clone(), DeliveryPolicy::default());
        Self {
            inner: std::sync::Arc::new(Mutex::new(ServerInner {
                config,
                api: Some(api),
            })),
        }
    }
}

#[derive(Debug)]
struct ServerInner {
    config: StanceConfig,
    api: Option<SessionApi>,
}

fn require_session(inner: &ServerInner) -> Result<&SessionApi, HttpApiError> {
    inner.api.as_ref().ok_or_else(HttpApiError::session_not_found)
}

fn require_session_mut(inner: &mut ServerInner) -> Result<&mut SessionApi, HttpApiError> {
    inner.api.as_mut().ok_or_else(HttpApiError::session_not_found)
}
