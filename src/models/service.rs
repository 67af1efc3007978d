use serde::{Deserialize, Serialize};

/// How many therapists a service needs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ServiceCategory {
    Single,
    Dual,
}

impl ServiceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceCategory::Single => "Single",
            ServiceCategory::Dual => "Dual",
        }
    }

    pub fn required_therapists(&self) -> usize {
        match self {
            ServiceCategory::Single => 1,
            ServiceCategory::Dual => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    pub name: String,
    pub category: ServiceCategory,
    pub duration_minutes: u32,
    pub price: f64,
    /// Paid to each therapist on the session.
    pub payout: f64,
}
