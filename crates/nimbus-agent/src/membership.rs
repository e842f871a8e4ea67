//! A static cluster roster supplied on the command line. The spec
//! leaves peer discovery to the deployment; this is the simplest
//! `MembershipClient` that satisfies it, good enough for a fixed-size
//! cluster started with one `--peer` flag per member.

use async_trait::async_trait;

use nimbus_health::{MembershipClient, PeerAddress};

pub struct StaticMembership {
    peers: Vec<PeerAddress>,
}

impl StaticMembership {
    pub fn new(peers: Vec<PeerAddress>) -> StaticMembership {
        StaticMembership { peers }
    }

    /// Parses one `--peer` value of the form `name@host:port@role`.
    pub fn parse_peer(raw: &str) -> Result<PeerAddress, String> {
        let mut parts = raw.splitn(3, '@');
        let name = parts.next().filter(|s| !s.is_empty());
        let addr = parts.next().filter(|s| !s.is_empty());
        let role = parts.next().filter(|s| !s.is_empty());
        let (name, addr, role) = match (name, addr, role) {
            (Some(name), Some(addr), Some(role)) => (name, addr, role),
            _ => {
                return Err(format!(
                    "invalid --peer value {raw:?}, expected name@host:port@role"
                ))
            }
        };
        let rpc_addr = addr
            .parse()
            .map_err(|err| format!("invalid peer address {addr:?} in {raw:?}: {err}"))?;
        Ok(PeerAddress {
            name: name.to_string(),
            rpc_addr,
            role: role.to_string(),
        })
    }
}

#[async_trait]
impl MembershipClient for StaticMembership {
    async fn members(&self) -> Vec<PeerAddress> {
        self.peers.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_well_formed_peer_flag_parses() {
        let peer = StaticMembership::parse_peer("n2@10.0.0.2:7777@master").unwrap();
        assert_eq!(peer.name, "n2");
        assert_eq!(peer.role, "master");
        assert_eq!(peer.rpc_addr.port(), 7777);
    }

    #[test]
    fn a_malformed_peer_flag_is_rejected() {
        assert!(StaticMembership::parse_peer("10.0.0.2:7777").is_err());
    }
}
