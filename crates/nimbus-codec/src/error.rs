#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to parse YAML document: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("failed to parse JSON document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("empty input")]
    EmptyInput,
}
