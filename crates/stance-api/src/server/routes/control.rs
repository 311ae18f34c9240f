#[derive(Debug, Default, Deserialize)]
struct CreateSessionRequest {
    config: Option<StanceConfig>,
    policy: Option<PolicyRequest>,
    observers: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
struct PolicyRequest {
    #[serde(default)]
    duplicate_requests: bool,
    #[serde(default)]
    reverse_order: bool,
}

impl From<PolicyRequest> for DeliveryPolicy {
    fn from(request: PolicyRequest) -> Self {
        Self {
            duplicate_requests: request.duplicate_requests,
            reverse_order: request.reverse_order,
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateSessionResponse {
    schema_version: String,
    replaced_existing_session: bool,
    observers: Vec<ConnectionId>,
    status: SessionStatus,
}

#[derive(Debug, Deserialize)]
struct StepRequest {
    ticks: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SpawnBodyRequest {
    owner: Option<ConnectionId>,
    object_name: Option<String>,
    base_name_token: Option<String>,
    initial_corruption: Option<f32>,
    corrupted: Option<bool>,
    with_controller: Option<bool>,
    select_toggle: Option<bool>,
}

#[derive(Debug, Serialize)]
struct SpawnBodyResponse {
    schema_version: String,
    entity_id: EntityId,
    owner: ConnectionId,
}

#[derive(Debug, Serialize)]
struct ObserverResponse {
    schema_version: String,
    connection_id: ConnectionId,
}

#[derive(Debug, Serialize)]
struct ToggleResponse {
    schema_version: String,
    accepted: bool,
    dispatch: Option<String>,
    entity: EntityStatus,
}

#[derive(Debug, Deserialize)]
struct StunRequest {
    duration_secs: f32,
}

#[derive(Debug, Serialize)]
struct StunResponse {
    schema_version: String,
    applied: bool,
    entity: EntityStatus,
}

async fn create_session(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<CreateSessionResponse>, HttpApiError> {
    let request = parse_optional_body::<CreateSessionRequest>(&body)?;
    let mut inner = state.inner.lock().await;

    let config = match request.config {
        Some(config) => {
            config.validate().map_err(|err| {
                HttpApiError::invalid_request("invalid stance config", Some(err.to_string()))
            })?;
            config
        }
        None => inner.config.clone(),
    };
    let policy: DeliveryPolicy = request.policy.unwrap_or_default().into();

    let mut api = SessionApi::from_config(config, policy);
    let observers: Vec<ConnectionId> = (0..request.observers.unwrap_or(0))
        .map(|_| api.add_observer())
        .collect();
    let status = api.status();
    let replaced_existing_session = inner.api.replace(api).is_some();

    info!(replaced_existing_session, ?policy, "session opened");
    Ok(Json(CreateSessionResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        replaced_existing_session,
        observers,
        status,
    }))
}

async fn close_session(State(state): State<AppState>) -> Result<Json<SessionStatus>, HttpApiError> {
    let mut inner = state.inner.lock().await;
    let api = inner.api.take().ok_or_else(HttpApiError::session_not_found)?;
    Ok(Json(api.status()))
}

async fn step_session(
    State(state): State<AppState>,
    Json(request): Json<StepRequest>,
) -> Result<Json<SessionStatus>, HttpApiError> {
    let ticks = request.ticks.unwrap_or(1);
    if ticks == 0 || ticks > MAX_STEP_TICKS {
        return Err(HttpApiError::invalid_request(
            "ticks is out of range",
            Some(format!("ticks={ticks} max={MAX_STEP_TICKS}")),
        ));
    }

    let mut inner = state.inner.lock().await;
    let api = require_session_mut(&mut inner)?;
    Ok(Json(api.step(ticks)?))
}

async fn set_policy(
    State(state): State<AppState>,
    Json(request): Json<PolicyRequest>,
) -> Result<Json<PolicyRequest>, HttpApiError> {
    let mut inner = state.inner.lock().await;
    let api = require_session_mut(&mut inner)?;
    api.set_delivery_policy(request.into());
    Ok(Json(request))
}

async fn add_observer(
    State(state): State<AppState>,
) -> Result<Json<ObserverResponse>, HttpApiError> {
    let mut inner = state.inner.lock().await;
    let api = require_session_mut(&mut inner)?;
    Ok(Json(ObserverResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        connection_id: api.add_observer(),
    }))
}

async fn spawn_body(
    State(state): State<AppState>,
    Json(request): Json<SpawnBodyRequest>,
) -> Result<Json<SpawnBodyResponse>, HttpApiError> {
    let owner = request.owner.unwrap_or(ConnectionId::AUTHORITY);
    let select_toggle = request.select_toggle.unwrap_or(true);
    let blueprint = blueprint_from_request(&request)?;

    let mut inner = state.inner.lock().await;
    let api = require_session_mut(&mut inner)?;
    let entity_id = api.spawn_body(&blueprint, owner, select_toggle)?;
    Ok(Json(SpawnBodyResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        entity_id,
        owner,
    }))
}

async fn despawn_body(
    Path(entity_id): Path<u64>,
    State(state): State<AppState>,
) -> Result<Json<SessionStatus>, HttpApiError> {
    let mut inner = state.inner.lock().await;
    let api = require_session_mut(&mut inner)?;
    api.despawn(EntityId(entity_id))?;
    Ok(Json(api.status()))
}

async fn toggle_entity(
    Path((connection_id, entity_id)): Path<(u32, u64)>,
    State(state): State<AppState>,
) -> Result<Json<ToggleResponse>, HttpApiError> {
    let (connection, entity) = (ConnectionId(connection_id), EntityId(entity_id));
    let mut inner = state.inner.lock().await;
    let api = require_session_mut(&mut inner)?;

    let dispatch = api.toggle(connection, entity)?;
    Ok(Json(ToggleResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        accepted: dispatch.is_some(),
        dispatch: dispatch.map(describe_dispatch),
        entity: api.entity_status(connection, entity)?,
    }))
}

async fn stun_entity(
    Path((connection_id, entity_id)): Path<(u32, u64)>,
    State(state): State<AppState>,
    Json(request): Json<StunRequest>,
) -> Result<Json<StunResponse>, HttpApiError> {
    let (connection, entity) = (ConnectionId(connection_id), EntityId(entity_id));
    let mut inner = state.inner.lock().await;
    let api = require_session_mut(&mut inner)?;

    let applied = api.stun(connection, entity, request.duration_secs)?;
    Ok(Json(StunResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        applied,
        entity: api.entity_status(connection, entity)?,
    }))
}
