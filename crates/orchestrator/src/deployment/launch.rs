use std::collections::BTreeMap;

use db::{lease::Lease, order::Order, provider::Provider, OffsetDateTime};

use crate::runtime::LaunchSpec;

const DEFAULT_HTTP_PORT: u16 = 80;

/// Build the container launch specification of a lease.
pub(crate) fn launch_spec(prefix: &str, lease: &LeaseRef, order: &Order) -> LaunchSpec {
    let spec = &order.specification;

    let labels = BTreeMap::from([
        (String::from("lease.id"), lease.lease_id.to_string()),
        (String::from("order.id"), lease.order_id.to_string()),
        (String::from("provider.id"), lease.provider_id.to_string()),
        (
            String::from("deployment.time"),
            OffsetDateTime::now_utc().unix_timestamp().to_string(),
        ),
    ]);

    LaunchSpec {
        name: format!("{prefix}-{}-{}", lease.order_id, lease.lease_id),
        image: spec.image.clone(),
        labels,
        env: spec.env.clone(),
        command: spec.command.clone(),
        args: spec.args.clone(),
        ports: spec.ports.clone(),
        volumes: spec.volumes.clone(),
        memory: spec.memory,
        cpu: spec.cpu,
    }
}

/// Derive a best-effort externally reachable URL of a workload.
///
/// The port is taken from the first published port, then from a numeric image tag.
pub(crate) fn access_url(provider: &Provider, order: &Order) -> Option<String> {
    let hostname = provider.hostname.as_deref()?;
    let spec = &order.specification;

    let port = spec
        .ports
        .first()
        .map(|port| port.host_port.unwrap_or(port.container_port))
        .or_else(|| {
            spec.image
                .rsplit_once(':')
                .and_then(|(_, tag)| tag.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_HTTP_PORT);

    Some(format!("http://{hostname}:{port}"))
}

/// Identifiers tying a container to its lease.
#[derive(Clone, Copy, Debug)]
pub(crate) struct LeaseRef {
    pub lease_id: u64,
    pub order_id: u64,
    pub provider_id: u64,
}

impl From<&Lease> for LeaseRef {
    fn from(lease: &Lease) -> Self {
        Self {
            lease_id: lease.id,
            order_id: lease.order_id,
            provider_id: lease.provider_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use db::{
        amount::Amount,
        order::{self, ContainerSpec, PortMapping},
        provider::{self, Capacity},
    };

    use super::*;

    fn order(image: &str, ports: Vec<PortMapping>) -> Order {
        Order {
            id: 7,
            tenant: None,
            max_price: Amount::from(5),
            duration_blocks: 10,
            quantity: 1,
            trust_levels: vec![order::TrustLevel::One],
            specification: ContainerSpec {
                image: image.to_string(),
                cpu: 2.0,
                memory: 4,
                storage: None,
                env: Default::default(),
                ports,
                volumes: Vec::new(),
                command: None,
                args: None,
            },
            state: order::State::Active,
        }
    }

    fn provider(hostname: Option<&str>) -> Provider {
        Provider {
            id: 3,
            address: String::from("provider"),
            trust_level: order::TrustLevel::Three,
            status: provider::Status::Active,
            hostname: hostname.map(str::to_string),
            port: None,
            capacity: Capacity::default(),
        }
    }

    #[test]
    fn url_prefers_published_port() {
        let order = order(
            "nginx:1.25",
            vec![PortMapping {
                container_port: 80,
                host_port: Some(8080),
                protocol: None,
            }],
        );

        assert_eq!(
            access_url(&provider(Some("node.example.com")), &order).as_deref(),
            Some("http://node.example.com:8080")
        );
    }

    #[test]
    fn url_falls_back_to_numeric_tag_and_default_port() {
        assert_eq!(
            access_url(&provider(Some("node")), &order("app:3000", Vec::new())).as_deref(),
            Some("http://node:3000")
        );
        assert_eq!(
            access_url(&provider(Some("node")), &order("nginx:latest", Vec::new())).as_deref(),
            Some("http://node:80")
        );
        assert_eq!(access_url(&provider(None), &order("nginx", Vec::new())), None);
    }

    #[test]
    fn container_is_named_and_labeled_after_lease() {
        let lease = LeaseRef {
            lease_id: 1,
            order_id: 7,
            provider_id: 3,
        };

        let spec = launch_spec("lease", &lease, &order("nginx", Vec::new()));

        assert_eq!(spec.name, "lease-7-1");
        assert_eq!(spec.labels["lease.id"], "1");
        assert_eq!(spec.labels["order.id"], "7");
        assert_eq!(spec.memory, 4);
    }
}
