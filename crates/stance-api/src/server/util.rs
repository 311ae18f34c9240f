fn apply_cors_headers(headers: &mut axum::http::HeaderMap) {
    headers.insert(
        HeaderName::from_static("access-control-allow-origin"),
        HeaderValue::from_static("*"),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-methods"),
        HeaderValue::from_static("GET,POST,OPTIONS,DELETE"),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-headers"),
        HeaderValue::from_static("*"),
    );
    headers.insert(
        HeaderName::from_static("access-control-max-age"),
        HeaderValue::from_static("3600"),
    );
}

/// Empty or whitespace-only bodies decode as the default request.
fn parse_optional_body<T>(body: &[u8]) -> Result<T, HttpApiError>
where
    T: Default + serde::de::DeserializeOwned,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|err| {
        HttpApiError::invalid_request("request body is not valid JSON", Some(err.to_string()))
    })
}

fn blueprint_from_request(request: &SpawnBodyRequest) -> Result<BodyBlueprint, HttpApiError> {
    let mut blueprint = match (&request.object_name, &request.base_name_token) {
        (None, None) => BodyBlueprint::void_survivor(),
        (name, token) => BodyBlueprint {
            object_name: name
                .clone()
                .unwrap_or_else(|| BodyBlueprint::void_survivor().object_name),
            base_name_token: token.clone().unwrap_or_default(),
            with_controller: true,
            ..BodyBlueprint::void_survivor()
        },
    };

    if let Some(value) = request.initial_corruption {
        if !(0.0..=100.0).contains(&value) {
            return Err(HttpApiError::invalid_request(
                "initial_corruption must be within 0..=100",
                Some(format!("initial_corruption={value}")),
            ));
        }
        blueprint = blueprint.with_corruption(value);
    }
    if request.corrupted.unwrap_or(false) {
        blueprint = blueprint.corrupted();
    }
    if !request.with_controller.unwrap_or(true) {
        blueprint = blueprint.without_controller();
    }
    Ok(blueprint)
}

fn describe_dispatch(dispatch: ToggleDispatch) -> String {
    match dispatch {
        ToggleDispatch::Applied(stance) => format!("applied:{stance}"),
        ToggleDispatch::Sent => "sent".to_string(),
    }
}
