use nimbus_kv::KvError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Kv(#[from] KvError),

    #[error("failed to decode {entity} at {key}: {source}")]
    Decode {
        entity: &'static str,
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("site {domain} state changed concurrently, retry the update")]
    SiteStateConflict { domain: String },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::Kv(err) if err.is_not_found())
    }
}
