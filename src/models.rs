//! Response envelopes shared by every route

use serde::Serialize;

/// Generic success response. `data` is flattened, so it must serialize as a
/// JSON object.
#[derive(Serialize)]
pub struct SuccessResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    #[serde(flatten)]
    pub data: Option<T>,
}

impl<T: Serialize> SuccessResponse<T> {
    pub fn with_data(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Payload {
        count: usize,
    }

    #[test]
    fn test_data_is_flattened_into_envelope() {
        let body = serde_json::to_value(SuccessResponse::with_data("ok", Payload { count: 3 })).unwrap();
        assert_eq!(
            body,
            serde_json::json!({ "success": true, "message": "ok", "count": 3 })
        );
    }
}
