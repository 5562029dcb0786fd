use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;

pub const CONDITION_ACCEPTED: &str = "Accepted";
pub const CONDITION_ENFORCED: &str = "Enforced";

/// The status shared by all policy kinds.
#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}
