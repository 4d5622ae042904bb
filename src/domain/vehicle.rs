use serde::{Deserialize, Serialize};
use std::fmt;

/// Consensus vehicle identity for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleIdentity {
    pub make: String,
    pub model: String,
    pub year: Option<u16>,
    pub confidence: f64,
    /// Number of identification attempts that agreed on this identity.
    pub agreement_count: u32,
}

impl VehicleIdentity {
    pub fn unknown() -> Self {
        Self {
            make: "Unknown".to_string(),
            model: "Unknown".to_string(),
            year: None,
            confidence: 0.0,
            agreement_count: 0,
        }
    }

    pub fn is_known(&self) -> bool {
        self.agreement_count > 0
    }
}

impl Default for VehicleIdentity {
    fn default() -> Self {
        Self::unknown()
    }
}

impl fmt::Display for VehicleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.year {
            Some(year) => write!(f, "{} {} {}", self.make, self.model, year),
            None => write!(f, "{} {}", self.make, self.model),
        }
    }
}
