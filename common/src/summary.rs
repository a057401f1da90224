use serde::{Deserialize, Serialize};

/// Wire name of the summary method
pub const GET_SERVER_SUMMARY: &str = "RPC.GetServerSummary";

/// Arguments of [`GET_SERVER_SUMMARY`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerSummaryQuery {
    pub server_name: String,
}

impl ServerSummaryQuery {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
        }
    }
}

/// Result of [`GET_SERVER_SUMMARY`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerSummary {
    pub server_name: String,
    pub qemu:        QemuVersion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QemuVersion {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn summary_uses_pascal_case_on_the_wire() {
        let summary = ServerSummary {
            server_name: "superserver".to_string(),
            qemu:        QemuVersion {
                major: 2,
                minor: 11,
                micro: 3,
            },
        };
        assert_eq!(
            serde_json::to_value(&summary).unwrap(),
            json!({"ServerName": "superserver", "Qemu": {"Major": 2, "Minor": 11, "Micro": 3}})
        );
        assert_eq!(
            serde_json::to_value(ServerSummaryQuery::new("superserver")).unwrap(),
            json!({"ServerName": "superserver"})
        );
    }
}
