use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rating {
    pub ride_id: Uuid,
    pub customer_id: Uuid,
    pub driver_id: Uuid,
    pub score: f64,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}
