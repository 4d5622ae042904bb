use crate::inference::{GatewayError, InferenceRequest};
use crate::pipeline::structured::{parse_structured, ParseFailure};
use crate::pipeline::PipelineContext;
use serde::de::DeserializeOwned;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

const REPAIR_SUFFIX: &str = "\n\nYour previous reply could not be parsed. Reply with a single valid JSON object only, no prose and no code fences.";

#[derive(Debug, Clone, Error)]
pub enum QueryError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Parse(#[from] ParseFailure),
}

/// Sends `request` through the gateway and parses the reply into `T`.
///
/// A reply that fails to parse is re-asked once at temperature 0 with a
/// strict JSON-only instruction when `repair_retry` is enabled.
pub async fn query_structured<T: DeserializeOwned>(
    ctx: &PipelineContext,
    request: InferenceRequest,
) -> Result<T, QueryError> {
    let start = Instant::now();
    let label = request.label.clone();

    let response = ctx.gateway.infer(request.clone()).await?;
    let failure = match parse_structured::<T>(&response.content) {
        Ok(parsed) => {
            debug!(
                label = %label,
                duration_ms = start.elapsed().as_millis() as u64,
                "Structured response parsed"
            );
            return Ok(parsed);
        }
        Err(failure) => failure,
    };

    if !ctx.config.repair_retry {
        warn!(label = %label, error = %failure, "Discarding malformed response");
        return Err(failure.into());
    }

    debug!(label = %label, error = %failure, "Malformed response, asking for a repair");
    let repair = InferenceRequest {
        prompt: format!("{}{}", request.prompt, REPAIR_SUFFIX),
        temperature: 0.0,
        label: format!("{}+repair", label),
        ..request
    };

    let response = ctx.gateway.infer(repair).await?;
    parse_structured::<T>(&response.content).map_err(|failure| {
        warn!(
            label = %label,
            duration_ms = start.elapsed().as_millis() as u64,
            error = %failure,
            "Discarding malformed response after repair"
        );
        failure.into()
    })
}
