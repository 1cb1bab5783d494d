//! Sighting ingestion endpoints used by the scanning agents

use crate::{failure, ok, ApiResponse, ApiResult, AppState};
use automation_engine::BleAck;
use axum::{extract::State, http::HeaderMap, http::StatusCode, Json};
use presence_core::{BleSighting, CallerMetadata, IngestKind, Sighting};
use serde::Serialize;

/// Caller attribution, carried out-of-band in request headers
pub(crate) fn caller_metadata(headers: &HeaderMap) -> CallerMetadata {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    CallerMetadata {
        home: header("x-home"),
        api_key: header("x-api-key"),
        client: header("x-client"),
        agent_type: header("x-agent-type"),
    }
}

#[derive(Serialize)]
struct AddressAck {
    key: String,
    home: String,
    role: &'static str,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    moved_from: Option<String>,
}

#[derive(Serialize)]
struct BatchAck {
    applied: usize,
}

#[derive(Serialize)]
struct BleAckBody {
    id: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    scheduled: Option<usize>,
}

/// Report one network address
pub async fn report_address(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(sighting): Json<Sighting>,
) -> ApiResult {
    let caller = caller_metadata(&headers);
    match state.engine.report_address(&sighting, &caller).await {
        Ok(outcome) => {
            let (status, moved_from) = match outcome.kind {
                IngestKind::Created => ("created", None),
                IngestKind::Merged {
                    moved_from: Some(from),
                    ..
                } => ("moved", Some(from)),
                IngestKind::Merged { .. } => ("merged", None),
                IngestKind::Stale => ("stale", None),
            };
            ok(AddressAck {
                key: outcome.key,
                home: outcome.home,
                role: outcome.role.as_str(),
                status,
                moved_from,
            })
        }
        Err(e) => failure(e),
    }
}

/// Report a batch of network addresses
pub async fn report_addresses(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(batch): Json<Vec<Sighting>>,
) -> ApiResult {
    let caller = caller_metadata(&headers);
    tracing::debug!(
        "Batch of {} sightings from {}",
        batch.len(),
        caller.client.as_deref().unwrap_or("unknown client")
    );
    match state.engine.report_addresses(&batch, &caller).await {
        Ok(applied) => ok(BatchAck { applied }),
        Err(e) => failure(e),
    }
}

/// Report a BLE beacon
pub async fn report_ble(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(sighting): Json<BleSighting>,
) -> ApiResult {
    let caller = caller_metadata(&headers);
    let ack = match state.engine.report_ble(&sighting, &caller).await {
        Ok(ack) => ack,
        Err(e) => return failure(e),
    };

    let (status, scheduled) = match ack {
        BleAck::Unknown => {
            return (
                StatusCode::NOT_FOUND,
                Json(ApiResponse::error(format!(
                    "BLE device {} is not registered",
                    sighting.id
                ))),
            )
        }
        BleAck::Acknowledged => ("acknowledged", None),
        BleAck::Scheduled(n) => ("scheduled", Some(n)),
        BleAck::AlreadyPending => ("already_pending", None),
    };
    ok(BleAckBody {
        id: sighting.id,
        status,
        scheduled,
    })
}
