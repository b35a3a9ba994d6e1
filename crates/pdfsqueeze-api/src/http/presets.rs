//! `GET /v1/presets`: the quality picker catalogue.

use std::sync::Arc;

use axum::{Json, extract::State};
use pdfsqueeze_pipeline::Preset;
use serde::Serialize;

use crate::state::ApiState;

#[derive(Debug, Serialize)]
pub(crate) struct PresetView {
    pub(crate) name: &'static str,
    pub(crate) resolution_hint: u32,
    pub(crate) description: &'static str,
    pub(crate) default: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct PresetsResponse {
    pub(crate) default: &'static str,
    pub(crate) policy: &'static str,
    pub(crate) presets: Vec<PresetView>,
}

pub(crate) async fn list_presets(State(state): State<Arc<ApiState>>) -> Json<PresetsResponse> {
    let presets = Preset::ALL
        .into_iter()
        .map(|preset| PresetView {
            name: preset.as_str(),
            resolution_hint: preset.resolution_hint(),
            description: preset.description(),
            default: preset == Preset::DEFAULT,
        })
        .collect();
    Json(PresetsResponse {
        default: Preset::DEFAULT.as_str(),
        policy: state.orchestrator.resolver().policy().as_str(),
        presets,
    })
}
