// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Routing keys for transactional messages, chosen by the payload `activity`.

use crate::errors::AmqpError;
use serde_json::Value;
use tracing::warn;

/// Binding key that catches every transactional routing key.
pub const TRANSACTIONAL_BINDING_KEY: &str = "*.*.transactional";

const ACTIVITY_FIELD: &str = "activity";

/// Maps the `activity` field of a JSON payload to its routing key.
pub fn transactional_routing_key(payload: &Value) -> Result<&'static str, AmqpError> {
    let Some(activity) = payload.get(ACTIVITY_FIELD).and_then(Value::as_str) else {
        warn!("payload has no activity");
        return Err(AmqpError::ParsePayloadError);
    };

    match activity {
        "user_register" => Ok("user.registration.transactional"),
        "user_password" => Ok("user.password_reset.transactional"),
        "campaign_signup" => Ok("campaign.signup.transactional"),
        "campaign_reportback" => Ok("campaign.report_back.transactional"),
        other => {
            warn!(activity = other, "no routing key for activity");
            Err(AmqpError::UnsupportedActivity(other.to_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn maps_known_activities() {
        let cases = [
            ("user_register", "user.registration.transactional"),
            ("user_password", "user.password_reset.transactional"),
            ("campaign_signup", "campaign.signup.transactional"),
            ("campaign_reportback", "campaign.report_back.transactional"),
        ];

        for (activity, key) in cases {
            assert_eq!(
                transactional_routing_key(&json!({ "activity": activity, "email": "a@b.c" })),
                Ok(key)
            );
        }
    }

    #[test]
    fn every_key_matches_the_transactional_binding() {
        let key = transactional_routing_key(&json!({ "activity": "campaign_signup" })).unwrap();
        let parts: Vec<&str> = key.split('.').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2], "transactional");
    }

    #[test]
    fn unknown_activity_is_rejected() {
        assert_eq!(
            transactional_routing_key(&json!({ "activity": "user_delete" })),
            Err(AmqpError::UnsupportedActivity("user_delete".to_owned()))
        );
    }

    #[test]
    fn missing_activity_is_rejected() {
        assert_eq!(
            transactional_routing_key(&json!({ "email": "a@b.c" })),
            Err(AmqpError::ParsePayloadError)
        );
        assert_eq!(
            transactional_routing_key(&json!({ "activity": 3 })),
            Err(AmqpError::ParsePayloadError)
        );
    }
}
