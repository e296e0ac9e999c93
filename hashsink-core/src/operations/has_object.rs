use crate::backend::Backend;
use crate::error::SinkResult;
use crate::gate::ReadinessGate;
use crate::naming;
use std::sync::Arc;

#[derive(Clone)]
pub struct HasObjectOperation {
    backend: Arc<dyn Backend>,
    gate: Arc<ReadinessGate>,
}

#[derive(Debug, Clone)]
pub struct HasObjectOperationRequest {
    pub key: String,
}

impl HasObjectOperation {
    pub fn new(backend: Arc<dyn Backend>, gate: Arc<ReadinessGate>) -> Self {
        Self { backend, gate }
    }

    /// True only when the backend positively reports the object.
    pub async fn run(&self, request: HasObjectOperationRequest) -> SinkResult<bool> {
        let key = naming::require_key(&request.key)?;
        self.gate.ready().await?;

        let answer = self.backend.exists(key).await?;
        Ok(matches!(answer, Some(true)))
    }
}
