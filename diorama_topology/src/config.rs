use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// Process-wide operator configuration.
///
/// Lazily initialised to these defaults on first read and persisted as a
/// singleton thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomConfig {
    /// IPv4 address assigned to the first node; node `i` gets `base + i`.
    pub base_ip_address: Ipv4Addr,
    /// CIDR handed to the bridge network's IPAM pool.
    pub network_subnet: String,
    /// UDP port every node listens on inside the simulated network.
    pub base_port: u16,
    /// Whether every node's peer set implicitly includes its own nid.
    pub self_connected_nodes: bool,
}

impl Default for CustomConfig {
    fn default() -> Self {
        CustomConfig {
            base_ip_address: Ipv4Addr::new(172, 190, 0, 4),
            network_subnet: "172.190.0.0/16".to_owned(),
            base_port: 2000,
            self_connected_nodes: true,
        }
    }
}
