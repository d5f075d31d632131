//! `EventFrame`: unidad observable del stream multiplexado.
//!
//! - `scope_id` identifica al productor (run raíz o llamada anidada).
//! - `parent_scope_id` fija la relación de anidamiento que consumen los
//!   renderers; viaja en cada frame para que sobreviva a la serialización.
//! - `sequence` es estrictamente creciente dentro de un `scope_id`.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFrame {
    pub scope_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_scope_id: Option<Uuid>,
    pub sequence: u64,
    pub kind: String,
    pub data: Value,
    pub ts: DateTime<Utc>, // metadato, no participa del orden
}
