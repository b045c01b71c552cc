//! Tenant-facing status of a node.

use crate::config::VerifierConfig;
use crate::record::NodeRecord;
use crate::types::{Metadata, OperationalState, PcrPolicy};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// Sanitized snapshot of a node record.
///
/// Whitelist contents are never included, only their count. The secret share
/// (`v`) is omitted unless `expose_secret_share_in_status` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusView {
    pub operational_state: OperationalState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v: Option<String>,
    pub ip: String,
    pub port: u16,
    pub tpm_policy: PcrPolicy,
    pub vtpm_policy: PcrPolicy,
    pub metadata: Metadata,
    pub ima_whitelist_len: usize,
}

pub fn project_status(record: &NodeRecord, config: &VerifierConfig) -> StatusView {
    StatusView {
        operational_state: record.operational_state,
        v: config
            .expose_secret_share_in_status
            .then(|| STANDARD.encode(record.secret_share.as_bytes())),
        ip: record.network.ip.clone(),
        port: record.network.port,
        tpm_policy: record.tpm_policy.clone(),
        vtpm_policy: record.vtpm_policy.clone(),
        metadata: record.metadata.clone(),
        ima_whitelist_len: record.runtime_whitelist.as_ref().map_or(0, |w| w.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::NodeRecordBuilder;
    use crate::types::{NodeId, RuntimeWhitelist, SecretShare};
    use proptest::prelude::*;

    fn record(share: Vec<u8>, paths: &[String]) -> NodeRecord {
        let mut whitelist = RuntimeWhitelist::default();
        for path in paths {
            whitelist.whitelist.insert(path.clone(), vec!["00".repeat(20)]);
        }
        NodeRecordBuilder::new()
            .node_id(NodeId("node-s".to_string()))
            .network("10.9.8.7", 8992)
            .secret_share(SecretShare(share))
            .tpm_policy(PcrPolicy::new("0x408000"))
            .runtime_whitelist(whitelist)
            .build()
            .unwrap()
    }

    #[test]
    fn test_default_view_redacts_share() {
        let record = record(b"hunter2hunter2".to_vec(), &["/bin/a".to_string(), "/bin/b".to_string()]);
        let view = project_status(&record, &VerifierConfig::default());

        assert_eq!(view.operational_state, OperationalState::Registered);
        assert_eq!(view.v, None);
        assert_eq!(view.ima_whitelist_len, 2);

        let wire = serde_json::to_value(&view).unwrap();
        assert!(wire.get("v").is_none());
        assert_eq!(wire["operational_state"], 0);
        assert_eq!(wire["ip"], "10.9.8.7");
        assert_eq!(wire["ima_whitelist_len"], 2);
    }

    #[test]
    fn test_legacy_view_includes_share() {
        let record = record(vec![1, 2, 3], &[]);
        let config = VerifierConfig {
            expose_secret_share_in_status: true,
            ..VerifierConfig::default()
        };
        let view = project_status(&record, &config);
        assert_eq!(view.v.as_deref(), Some("AQID"));
    }

    #[test]
    fn test_missing_whitelist_counts_zero() {
        let mut record = record(vec![1], &[]);
        record.runtime_whitelist = None;
        assert_eq!(project_status(&record, &VerifierConfig::default()).ima_whitelist_len, 0);
    }

    proptest! {
        #[test]
        fn prop_status_never_leaks(
            share in proptest::collection::vec(any::<u8>(), 16..48),
            paths in proptest::collection::btree_set("/[a-z]{4,12}/[a-z]{4,12}", 0..8),
        ) {
            let paths: Vec<String> = paths.into_iter().collect();
            let record = record(share.clone(), &paths);
            let json = serde_json::to_string(&project_status(&record, &VerifierConfig::default())).unwrap();

            prop_assert!(!json.contains(&STANDARD.encode(&share)));
            for path in &paths {
                prop_assert!(!json.contains(path.as_str()));
            }
            let expected_len = format!("\"ima_whitelist_len\":{}", paths.len());
            prop_assert!(json.contains(&expected_len));
        }
    }
}
