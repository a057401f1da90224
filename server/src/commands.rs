use trirpc_common::summary::{QemuVersion, ServerSummary, ServerSummaryQuery, GET_SERVER_SUMMARY};

use crate::registry::{MethodError, MethodRegistry};

const SERVER_NAME: &str = "superserver";

/// Registers every method this server exposes.
pub fn register(registry: &mut MethodRegistry) {
    registry.register_fn(GET_SERVER_SUMMARY, get_server_summary);
}

pub async fn get_server_summary(query: ServerSummaryQuery) -> Result<ServerSummary, MethodError> {
    if query.server_name != SERVER_NAME {
        return Err(MethodError::failed(format_args!(
            "Unknown server name: {}",
            query.server_name
        )));
    }

    Ok(ServerSummary {
        server_name: query.server_name,
        qemu:        QemuVersion {
            major: 2,
            minor: 11,
            micro: 3,
        },
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn known_server_is_summarized() {
        let summary = get_server_summary(ServerSummaryQuery::new("superserver"))
            .await
            .unwrap();
        assert_eq!(summary.server_name, "superserver");
        assert_eq!(
            summary.qemu,
            QemuVersion {
                major: 2,
                minor: 11,
                micro: 3
            }
        );
    }

    #[tokio::test]
    async fn unknown_server_names_the_culprit() {
        let err = get_server_summary(ServerSummaryQuery::new("other"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Unknown server name: other");
    }

    #[tokio::test]
    async fn registered_under_its_wire_name() {
        let mut registry = MethodRegistry::new();
        register(&mut registry);

        let result = registry
            .dispatch(GET_SERVER_SUMMARY, json!({"ServerName": "superserver"}))
            .await
            .unwrap();
        assert_eq!(
            result,
            json!({"ServerName": "superserver", "Qemu": {"Major": 2, "Minor": 11, "Micro": 3}})
        );
    }
}
