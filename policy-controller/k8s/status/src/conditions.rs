use crate::enforced::Enforcement;
use chrono::{DateTime, Utc};
use gateway_policy_controller_k8s_api::{
    policy::{CONDITION_ACCEPTED, CONDITION_ENFORCED},
    Condition, Time, CONDITION_FALSE, CONDITION_TRUE,
};

/// Why a policy is not accepted or not enforced.
///
/// The message of each variant is written into the policy's condition, and
/// [`PolicyError::reason`] becomes the condition's reason.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("target {0} was not found")]
    TargetNotFound(String),

    #[error("{kind} target is invalid: {message}")]
    Invalid { kind: String, message: String },

    #[error("{0} is not installed, please restart pod once dependency has been installed")]
    MissingDependency(String),

    #[error("{kind} is not in the path to any existing routes")]
    NoRoutes { kind: String },

    #[error("{kind} is overridden by [{}]", .overriders.join(" "))]
    Overridden {
        kind: String,
        overriders: Vec<String>,
    },

    #[error("{kind} waiting for the following components to sync: [{}]", .components.join(" "))]
    OutOfSync {
        kind: String,
        components: Vec<String>,
    },
}

// === impl PolicyError ===

impl PolicyError {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::TargetNotFound(_) => "TargetNotFound",
            Self::Invalid { .. } => "Invalid",
            Self::MissingDependency(_) => "MissingDependency",
            Self::NoRoutes { .. } => "NoRoutes",
            Self::Overridden { .. } => "Overridden",
            Self::OutOfSync { .. } => "OutOfSync",
        }
    }
}

pub fn accepted(
    kind: &str,
    result: Result<(), &PolicyError>,
    generation: Option<i64>,
    now: DateTime<Utc>,
) -> Condition {
    match result {
        Ok(()) => condition(
            CONDITION_ACCEPTED,
            CONDITION_TRUE,
            CONDITION_ACCEPTED,
            format!("{kind} has been accepted"),
            generation,
            now,
        ),
        Err(error) => failed(CONDITION_ACCEPTED, error, generation, now),
    }
}

pub fn enforced(
    kind: &str,
    result: Result<Enforcement, &PolicyError>,
    generation: Option<i64>,
    now: DateTime<Utc>,
) -> Condition {
    match result {
        Ok(enforcement) => {
            let message = match enforcement {
                Enforcement::Full => format!("{kind} has been successfully enforced"),
                Enforcement::Partial => format!("{kind} has been partially enforced"),
            };
            condition(
                CONDITION_ENFORCED,
                CONDITION_TRUE,
                CONDITION_ENFORCED,
                message,
                generation,
                now,
            )
        }
        Err(error) => failed(CONDITION_ENFORCED, error, generation, now),
    }
}

/// Sets a condition in the list, replacing any condition of the same type.
///
/// The transition time of an existing condition is kept unless its status
/// changes.
pub fn set_status_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) if existing.status == condition.status => {
            existing.reason = condition.reason;
            existing.message = condition.message;
            existing.observed_generation = condition.observed_generation;
        }
        Some(existing) => *existing = condition,
        None => conditions.push(condition),
    }
}

pub fn remove_condition(conditions: &mut Vec<Condition>, type_: &str) {
    conditions.retain(|c| c.type_ != type_);
}

fn failed(
    type_: &str,
    error: &PolicyError,
    generation: Option<i64>,
    now: DateTime<Utc>,
) -> Condition {
    condition(
        type_,
        CONDITION_FALSE,
        error.reason(),
        error.to_string(),
        generation,
        now,
    )
}

fn condition(
    type_: &str,
    status: &str,
    reason: &str,
    message: String,
    observed_generation: Option<i64>,
    now: DateTime<Utc>,
) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: status.to_string(),
        reason: reason.to_string(),
        message,
        observed_generation,
        last_transition_time: Time(now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
    }

    #[test]
    fn messages() {
        let overridden = PolicyError::Overridden {
            kind: "RateLimitPolicy".to_string(),
            overriders: vec!["ns/a".to_string(), "ns/b".to_string()],
        };
        assert_eq!(
            overridden.to_string(),
            "RateLimitPolicy is overridden by [ns/a ns/b]"
        );
        assert_eq!(overridden.reason(), "Overridden");

        let out_of_sync = PolicyError::OutOfSync {
            kind: "AuthPolicy".to_string(),
            components: vec!["Authorino".to_string()],
        };
        assert_eq!(
            out_of_sync.to_string(),
            "AuthPolicy waiting for the following components to sync: [Authorino]"
        );

        assert_eq!(
            PolicyError::MissingDependency("kuadrant".to_string()).to_string(),
            "kuadrant is not installed, please restart pod once dependency has been installed"
        );
    }

    #[test]
    fn transition_time_follows_status() {
        let mut conditions = vec![];
        set_status_condition(
            &mut conditions,
            enforced("RateLimitPolicy", Ok(Enforcement::Full), Some(1), at(100)),
        );

        // Same status, different message: the transition time is kept.
        set_status_condition(
            &mut conditions,
            enforced("RateLimitPolicy", Ok(Enforcement::Partial), Some(2), at(200)),
        );
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, Time(at(100)));
        assert_eq!(
            conditions[0].message,
            "RateLimitPolicy has been partially enforced"
        );
        assert_eq!(conditions[0].observed_generation, Some(2));

        let error = PolicyError::NoRoutes {
            kind: "RateLimitPolicy".to_string(),
        };
        set_status_condition(
            &mut conditions,
            enforced("RateLimitPolicy", Err(&error), Some(2), at(300)),
        );
        assert_eq!(conditions[0].status, CONDITION_FALSE);
        assert_eq!(conditions[0].reason, "NoRoutes");
        assert_eq!(conditions[0].last_transition_time, Time(at(300)));
    }

    #[test]
    fn remove_only_named_condition() {
        let mut conditions = vec![
            accepted("AuthPolicy", Ok(()), None, at(1)),
            enforced("AuthPolicy", Ok(Enforcement::Full), None, at(1)),
        ];
        remove_condition(&mut conditions, CONDITION_ENFORCED);
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].type_, CONDITION_ACCEPTED);
    }
}
