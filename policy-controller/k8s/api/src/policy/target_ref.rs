use gateway_policy_controller_core::TargetRef;

/// Targets a gateway API resource, or one of its sections, within the
/// policy's namespace.
#[derive(
    Clone, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct LocalPolicyTargetReference {
    pub group: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
}

impl LocalPolicyTargetReference {
    pub fn is_complete(&self) -> bool {
        !self.kind.is_empty() && !self.name.is_empty()
    }

    pub(crate) fn to_core(&self, namespace: &str) -> TargetRef {
        let mut target_ref =
            TargetRef::new(&*self.group, &*self.kind, &*self.name).in_namespace(namespace);
        target_ref.section = self.section_name.clone();
        target_ref
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_carries_over() {
        let t = LocalPolicyTargetReference {
            group: "gateway.networking.k8s.io".to_string(),
            kind: "Gateway".to_string(),
            name: "gw".to_string(),
            section_name: Some("http".to_string()),
        };
        assert!(t.is_complete());
        assert_eq!(
            t.to_core("ns"),
            TargetRef::new("gateway.networking.k8s.io", "Gateway", "gw")
                .in_namespace("ns")
                .with_section("http")
        );
    }

    #[test]
    fn core_service() {
        let t = LocalPolicyTargetReference {
            kind: "Service".to_string(),
            name: "web".to_string(),
            ..Default::default()
        };
        assert!(t.is_complete());
        assert_eq!(
            t.to_core("ns"),
            TargetRef::new("", "Service", "web").in_namespace("ns")
        );
    }

    #[test]
    fn missing_name_is_incomplete() {
        let t = LocalPolicyTargetReference {
            kind: "Service".to_string(),
            ..Default::default()
        };
        assert!(!t.is_complete());
    }
}
