//! Administrative endpoints for the operator UI

use crate::{failure, ok, ApiResult, AppState};
use automation_engine::CreateTimedCommandRequest;
use axum::{
    extract::{Path, State},
    Json,
};
use presence_core::{Device, Person};
use serde::Serialize;

#[derive(Serialize)]
struct PowerBody {
    id: String,
    state: automation_engine::PowerState,
}

#[derive(Serialize)]
struct CountBody {
    count: u64,
}

/// List all devices
pub async fn list_devices(State(state): State<AppState>) -> ApiResult {
    match state.engine.devices().await {
        Ok(devices) => ok(devices),
        Err(e) => failure(e),
    }
}

/// Get a specific device
pub async fn get_device(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    match state.engine.device(&id).await {
        Ok(device) => ok(device),
        Err(e) => failure(e),
    }
}

/// Replace a device record
pub async fn update_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(device): Json<Device>,
) -> ApiResult {
    match state.engine.update_device(&id, device).await {
        Ok(device) => ok(device),
        Err(e) => failure(e),
    }
}

/// Delete a device and its liveness
pub async fn delete_device(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    match state.engine.delete_device(&id).await {
        Ok(device) => ok(device),
        Err(e) => failure(e),
    }
}

/// Ask the assistant for a device's power state
pub async fn device_power(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    match state.engine.device_power(&id).await {
        Ok(power) => ok(PowerBody { id, state: power }),
        Err(e) => failure(e),
    }
}

pub async fn list_people(State(state): State<AppState>) -> ApiResult {
    match state.engine.people().await {
        Ok(people) => ok(people),
        Err(e) => failure(e),
    }
}

pub async fn upsert_person(State(state): State<AppState>, Json(person): Json<Person>) -> ApiResult {
    match state.engine.upsert_person(person).await {
        Ok(person) => ok(person),
        Err(e) => failure(e),
    }
}

pub async fn delete_person(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult {
    match state.engine.delete_person(&name).await {
        Ok(()) => ok(serde_json::json!({ "name": name })),
        Err(e) => failure(e),
    }
}

/// Cached occupancy of every home
pub async fn list_homes(State(state): State<AppState>) -> ApiResult {
    match state.engine.homes().await {
        Ok(homes) => ok(homes),
        Err(e) => failure(e),
    }
}

pub async fn list_bles(State(state): State<AppState>) -> ApiResult {
    match state.engine.bles().await {
        Ok(bles) => ok(bles),
        Err(e) => failure(e),
    }
}

/// Pending timed commands in fire order
pub async fn list_commands(State(state): State<AppState>) -> ApiResult {
    match state.engine.commands().await {
        Ok(commands) => ok(commands),
        Err(e) => failure(e),
    }
}

pub async fn create_command(
    State(state): State<AppState>,
    Json(request): Json<CreateTimedCommandRequest>,
) -> ApiResult {
    match state.engine.create_command(request).await {
        Ok(command) => ok(command),
        Err(e) => failure(e),
    }
}

pub async fn delete_command(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    match state.engine.delete_command(&id).await {
        Ok(()) => ok(serde_json::json!({ "id": id })),
        Err(e) => failure(e),
    }
}

pub async fn delete_command_prefix(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
) -> ApiResult {
    match state.engine.delete_command_prefix(&prefix).await {
        Ok(count) => ok(CountBody { count }),
        Err(e) => failure(e),
    }
}

/// Make one timed command due on the next drain
pub async fn complete_command(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    match state.engine.complete_command(&id).await {
        Ok(command) => ok(command),
        Err(e) => failure(e),
    }
}

pub async fn complete_owner_commands(
    State(state): State<AppState>,
    Path(owner): Path<String>,
) -> ApiResult {
    match state.engine.complete_owner_commands(&owner).await {
        Ok(count) => ok(CountBody {
            count: count as u64,
        }),
        Err(e) => failure(e),
    }
}

/// Latest observation per device
pub async fn list_observations(State(state): State<AppState>) -> ApiResult {
    ok(state.observer.snapshot())
}
