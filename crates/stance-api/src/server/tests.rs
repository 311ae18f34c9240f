use super::*;

fn spawn_request(raw: &str) -> SpawnBodyRequest {
    serde_json::from_str(raw).expect("spawn request should parse")
}

#[test]
fn empty_body_parses_as_default_session_request() {
    let request = parse_optional_body::<CreateSessionRequest>(b"  \n").expect("default");
    assert!(request.config.is_none());
    assert!(request.observers.is_none());

    let err = parse_optional_body::<CreateSessionRequest>(b"{not json").unwrap_err();
    assert_eq!(err.status, StatusCode::BAD_REQUEST);
    assert_eq!(err.error.code, ErrorCode::InvalidRequest);
}

#[test]
fn spawn_request_builds_blueprints() {
    let survivor = blueprint_from_request(&spawn_request("{}")).expect("blueprint");
    assert_eq!(survivor, BodyBlueprint::void_survivor());

    let custom = blueprint_from_request(&spawn_request(
        r#"{"object_name":"CommandoBody(Clone)","initial_corruption":55.0,
            "with_controller":false}"#,
    ))
    .expect("blueprint");
    assert_eq!(custom.object_name, "CommandoBody(Clone)");
    assert_eq!(custom.initial_corruption, 55.0);
    assert!(!custom.with_controller);

    let err =
        blueprint_from_request(&spawn_request(r#"{"initial_corruption":140.0}"#)).unwrap_err();
    assert_eq!(err.status, StatusCode::BAD_REQUEST);
}

#[test]
fn api_error_codes_map_to_http_status() {
    let not_found: HttpApiError = ApiError::new(ErrorCode::EntityNotFound, "missing", None).into();
    assert_eq!(not_found.status, StatusCode::NOT_FOUND);

    let rejected: HttpApiError = ApiError::new(ErrorCode::BodyRejected, "rejected", None).into();
    assert_eq!(rejected.status, StatusCode::UNPROCESSABLE_ENTITY);

    let foreign: HttpApiError = ApiError::new(ErrorCode::NotOwner, "not owner", None).into();
    assert_eq!(foreign.status, StatusCode::FORBIDDEN);

    assert_eq!(HttpApiError::session_not_found().status, StatusCode::NOT_FOUND);
}

#[test]
fn dispatch_descriptions_are_stable() {
    assert_eq!(describe_dispatch(ToggleDispatch::Sent), "sent");
    assert_eq!(
        describe_dispatch(ToggleDispatch::Applied(contracts::StanceState::Corrupted)),
        "applied:corrupted"
    );
}
