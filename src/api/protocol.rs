//! Wire types shared by the API client and the backend simulator.
//!
//! | Operation     | Route                              |
//! |---------------|------------------------------------|
//! | job status    | `GET /jobs/{id}/status`            |
//! | create job    | `POST /jobs`                       |
//! | submission    | `GET /submissions/{id}`            |
//! | list scenes   | `GET /videos/{id}/scenes`          |
//! | persist order | `PUT /videos/{id}/scenes/order`    |

use serde::{Deserialize, Serialize};

/// Body of a persist-order call: the complete new order, not a delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistOrderRequest {
    pub ordered_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateJobRequest {
    pub total: u32,
}

/// Error body returned with any non-2xx status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
