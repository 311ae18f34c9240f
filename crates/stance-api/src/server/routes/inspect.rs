#[derive(Debug, Serialize)]
struct EntityListResponse {
    schema_version: String,
    connection_id: ConnectionId,
    entities: Vec<EntityStatus>,
}

#[derive(Debug, Serialize)]
struct DumpResponse {
    schema_version: String,
    connection_id: ConnectionId,
    entity_id: EntityId,
    dump: String,
    recorded_dumps: usize,
}

async fn get_status(State(state): State<AppState>) -> Result<Json<SessionStatus>, HttpApiError> {
    let inner = state.inner.lock().await;
    let api = require_session(&inner)?;
    Ok(Json(api.status()))
}

async fn list_entities(
    Path(connection_id): Path<u32>,
    State(state): State<AppState>,
) -> Result<Json<EntityListResponse>, HttpApiError> {
    let connection = ConnectionId(connection_id);
    let inner = state.inner.lock().await;
    let api = require_session(&inner)?;
    Ok(Json(EntityListResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        connection_id: connection,
        entities: api.entities(connection)?,
    }))
}

async fn get_entity(
    Path((connection_id, entity_id)): Path<(u32, u64)>,
    State(state): State<AppState>,
) -> Result<Json<EntityStatus>, HttpApiError> {
    let inner = state.inner.lock().await;
    let api = require_session(&inner)?;
    Ok(Json(api.entity_status(ConnectionId(connection_id), EntityId(entity_id))?))
}

async fn get_dump(
    Path((connection_id, entity_id)): Path<(u32, u64)>,
    State(state): State<AppState>,
) -> Result<Json<DumpResponse>, HttpApiError> {
    let (connection, entity) = (ConnectionId(connection_id), EntityId(entity_id));
    let inner = state.inner.lock().await;
    let api = require_session(&inner)?;
    Ok(Json(DumpResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        connection_id: connection,
        entity_id: entity,
        dump: api.dump(connection, entity)?,
        recorded_dumps: api.recorded_dumps().len(),
    }))
}
