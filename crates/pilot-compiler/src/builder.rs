//! The cluster builder.
//!
//! Compiling is a pure function of its input and the mesh defaults; the only
//! side effects are counters.

use std::net::IpAddr;

use metrics::counter;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::assignment::{build_endpoint_assignment, EndpointAssignment};
use crate::cluster::{
    CircuitBreakers, ClusterDefinition, DiscoveryType, DnsLookupFamily, DnsSettings, EdsConfig,
    LbPolicy, UpstreamTls,
};
use crate::diagnostics::{CompileStats, Diagnostic, DiagnosticKind};
use crate::mesh::MeshConfig;
use crate::model::{Endpoint, Port, Service};
use crate::naming::{
    build_stat_prefix, dns_srv_subset_key, ClusterMode, TrafficDirection, BLACKHOLE_CLUSTER,
    INBOUND_PASSTHROUGH_BIND_IPV4, INBOUND_PASSTHROUGH_BIND_IPV6,
    INBOUND_PASSTHROUGH_CLUSTER_IPV4, INBOUND_PASSTHROUGH_CLUSTER_IPV6, PASSTHROUGH_CLUSTER,
};
use crate::policy::{
    resolve_policy, ConnectionPoolSettings, DestinationRule, SimpleLb, TlsMode, TlsSettings,
    TrafficPolicy,
};

/// Everything needed to compile the clusters of one service port.
#[derive(Clone, Copy, Debug)]
pub struct CompileInput<'a> {
    /// Service being compiled.
    pub service: &'a Service,
    /// Port of the service.
    pub port: &'a Port,
    /// Destination rule for the service host, if any.
    pub destination_rule: Option<&'a DestinationRule>,
    /// Locality-aware endpoints of the service.
    pub endpoints: &'a [Endpoint],
    /// Naming scheme.
    pub mode: ClusterMode,
}

/// Result of compiling one service port.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Compiled {
    /// Default cluster first, then subset clusters in rule order.
    pub clusters: Vec<ClusterDefinition>,
    /// Clusters that were skipped and why.
    pub diagnostics: Vec<Diagnostic>,
}

impl Compiled {
    /// Names of the compiled clusters.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.clusters.iter().map(|c| c.name.as_str())
    }

    /// Cluster with the given name.
    #[must_use]
    pub fn cluster(&self, name: &str) -> Option<&ClusterDefinition> {
        self.clusters.iter().find(|c| c.name == name)
    }
}

/// IP families a proxy listens on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IpFamilies {
    /// Has an IPv4 address.
    pub ipv4: bool,
    /// Has an IPv6 address.
    pub ipv6: bool,
}

impl IpFamilies {
    /// Families present in `addrs`.
    #[must_use]
    pub fn from_addrs(addrs: &[IpAddr]) -> Self {
        Self {
            ipv4: addrs.iter().any(IpAddr::is_ipv4),
            ipv6: addrs.iter().any(IpAddr::is_ipv6),
        }
    }
}

/// Per-cluster context for rendering a policy.
#[derive(Debug, Default)]
struct PolicyContext {
    istio_mtls_sni: Option<String>,
    simple_tls_sni: Option<String>,
}

/// Builds cluster definitions from services and policy.
///
/// # Example
///
/// ```rust
/// use pilot_compiler::{ClusterBuilder, ClusterMode, CompileInput, DestinationRule, MeshConfig,
///     Port, Protocol, Service, Subset};
///
/// let svc = Service::new("svc", "default").with_port(Port::new("http", 80, Protocol::Http));
/// let rule = DestinationRule::new("svc", "svc", "default")
///     .with_subset(Subset::new("v1").with_label("version", "v1"));
///
/// let builder = ClusterBuilder::new(MeshConfig::default());
/// let compiled = builder.compile(&CompileInput {
///     service: &svc,
///     port: &svc.ports[0],
///     destination_rule: Some(&rule),
///     endpoints: &[],
///     mode: ClusterMode::Default,
/// });
/// let names: Vec<_> = compiled.names().collect();
/// assert_eq!(names, ["outbound|80||svc", "outbound|80|v1|svc"]);
/// ```
#[derive(Debug, Default)]
pub struct ClusterBuilder {
    mesh: MeshConfig,
    stats: CompileStats,
}

impl ClusterBuilder {
    /// Create a builder with the given mesh defaults.
    pub fn new(mesh: MeshConfig) -> Self {
        Self {
            mesh,
            stats: CompileStats::new(),
        }
    }

    /// Mesh defaults.
    #[inline]
    pub fn mesh(&self) -> &MeshConfig {
        &self.mesh
    }

    /// Compile counters.
    #[inline]
    pub fn stats(&self) -> &CompileStats {
        &self.stats
    }

    /// Compile the default cluster and subset clusters of one service port.
    ///
    /// Clusters that cannot be built are left out and reported in
    /// [`Compiled::diagnostics`]; the rest of the batch is unaffected.
    #[instrument(level = "debug", skip_all, fields(service = %input.service.hostname, port = input.port.number))]
    pub fn compile(&self, input: &CompileInput<'_>) -> Compiled {
        let mut out = Compiled::default();
        let service = input.service;
        let host = service.hostname.as_str();
        let port = input.port;
        let rule = input.destination_rule;
        let rule_policy = rule.and_then(|r| r.traffic_policy.as_ref());

        let name = input.mode.cluster_name("", host, port.number);
        let discovery_type = service.resolution.discovery_type();
        let assignment = discovery_type
            .requires_inline_endpoints()
            .then(|| build_endpoint_assignment(&name, input.endpoints, &Default::default()));

        let mut default_cluster = match self.build_default_cluster(&name, discovery_type, assignment)
        {
            Ok(cluster) => cluster,
            Err(diagnostic) => {
                self.record(&mut out, diagnostic);
                self.stats.record_compile(0);
                return out;
            }
        };

        let ctx = self.policy_context(input, "");
        let default_policy = self.default_policy(discovery_type);
        self.apply_policy(
            &mut default_cluster,
            resolve_policy(&default_policy, rule_policy, None),
            &ctx,
        );
        self.finish_service_cluster(&mut default_cluster, input, "");
        default_cluster.metadata.config = rule.map(DestinationRule::config_path);

        // subsets inherit the discovery type after the rule policy is applied
        let subset_type = default_cluster.discovery_type;
        out.clusters.push(default_cluster);

        for subset in rule.map(|r| r.subsets.as_slice()).unwrap_or_default() {
            if subset.labels.is_empty() {
                self.record(
                    &mut out,
                    Diagnostic::new(
                        DiagnosticKind::EmptySubsetSelector,
                        host,
                        format!("subset {} has no label selector", subset.name),
                    ),
                );
                continue;
            }

            let name = input.mode.cluster_name(&subset.name, host, port.number);
            let assignment = subset_type
                .requires_inline_endpoints()
                .then(|| build_endpoint_assignment(&name, input.endpoints, &subset.labels));

            let mut cluster = match self.build_default_cluster(&name, subset_type, assignment) {
                Ok(cluster) => cluster,
                Err(diagnostic) => {
                    self.record(&mut out, diagnostic);
                    continue;
                }
            };

            let ctx = self.policy_context(input, &subset.name);
            let policy = resolve_policy(
                &default_policy,
                rule_policy,
                subset.traffic_policy.as_ref(),
            );
            self.apply_policy(&mut cluster, policy, &ctx);
            self.finish_service_cluster(&mut cluster, input, &subset.name);
            cluster.metadata.config = rule.map(DestinationRule::config_path);
            cluster.metadata.subset = Some(subset.name.clone());
            out.clusters.push(cluster);
        }

        self.stats.record_compile(out.clusters.len());
        debug!(
            clusters = out.clusters.len(),
            diagnostics = out.diagnostics.len(),
            "service compiled"
        );
        out
    }

    /// Policy every cluster of this discovery type starts from.
    #[must_use]
    pub fn default_policy(&self, discovery_type: DiscoveryType) -> TrafficPolicy {
        let lb = match discovery_type {
            DiscoveryType::OriginalDst => SimpleLb::Passthrough,
            _ => SimpleLb::RoundRobin,
        };
        TrafficPolicy {
            load_balancer: Some(lb),
            connection_pool: Some(ConnectionPoolSettings {
                connect_timeout: Some(self.mesh.connect_timeout),
                ..Default::default()
            }),
            outlier_detection: None,
            tls: None,
        }
    }

    /// Cluster that sends traffic nowhere; target of unmatched outbound routes.
    #[must_use]
    pub fn blackhole_cluster(&self) -> ClusterDefinition {
        let mut cluster = ClusterDefinition::new(
            BLACKHOLE_CLUSTER,
            DiscoveryType::Static,
            self.mesh.connect_timeout,
        );
        cluster.lb_policy = LbPolicy::RoundRobin;
        cluster
    }

    /// Cluster that forwards to the original destination address.
    #[must_use]
    pub fn passthrough_cluster(&self) -> ClusterDefinition {
        let mut cluster = ClusterDefinition::new(
            PASSTHROUGH_CLUSTER,
            DiscoveryType::OriginalDst,
            self.mesh.connect_timeout,
        );
        cluster.lb_policy = LbPolicy::ClusterProvided;
        cluster
    }

    /// Inbound passthrough clusters, one per IP family the proxy has.
    #[must_use]
    pub fn inbound_passthrough_clusters(&self, families: IpFamilies) -> Vec<ClusterDefinition> {
        let mut clusters = Vec::with_capacity(2);
        if families.ipv4 {
            let mut cluster = self.passthrough_cluster();
            cluster.name = INBOUND_PASSTHROUGH_CLUSTER_IPV4.to_string();
            cluster.upstream_bind_address = Some(INBOUND_PASSTHROUGH_BIND_IPV4);
            clusters.push(cluster);
        }
        if families.ipv6 {
            let mut cluster = self.passthrough_cluster();
            cluster.name = INBOUND_PASSTHROUGH_CLUSTER_IPV6.to_string();
            cluster.upstream_bind_address = Some(INBOUND_PASSTHROUGH_BIND_IPV6);
            clusters.push(cluster);
        }
        clusters
    }

    /// Synthetic clusters every sidecar gets.
    #[must_use]
    pub fn synthetic_clusters(&self, families: IpFamilies) -> Vec<ClusterDefinition> {
        let mut clusters = vec![self.blackhole_cluster(), self.passthrough_cluster()];
        clusters.extend(self.inbound_passthrough_clusters(families));
        clusters
    }

    fn build_default_cluster(
        &self,
        name: &str,
        discovery_type: DiscoveryType,
        assignment: Option<EndpointAssignment>,
    ) -> Result<ClusterDefinition, Diagnostic> {
        let mut cluster = ClusterDefinition::new(name, discovery_type, self.mesh.connect_timeout);

        match discovery_type {
            DiscoveryType::StrictDns | DiscoveryType::Static => {
                if discovery_type == DiscoveryType::StrictDns {
                    cluster.dns = Some(DnsSettings {
                        lookup_family: DnsLookupFamily::V4Only,
                        refresh_rate: self.mesh.dns_refresh_rate,
                        respect_dns_ttl: true,
                    });
                }
                match assignment {
                    Some(assignment) if !assignment.is_empty() => {
                        cluster.load_assignment = Some(assignment);
                    }
                    _ => {
                        return Err(Diagnostic::new(
                            DiagnosticKind::NoEndpoints,
                            name,
                            format!(
                                "{} cluster without endpoints {name} found while pushing CDS",
                                discovery_type.as_str()
                            ),
                        ));
                    }
                }
            }
            DiscoveryType::Eds | DiscoveryType::OriginalDst => {}
        }

        let policy = self.default_policy(discovery_type);
        self.apply_policy(&mut cluster, &policy, &PolicyContext::default());
        Ok(cluster)
    }

    fn policy_context(&self, input: &CompileInput<'_>, subset: &str) -> PolicyContext {
        match input.mode {
            ClusterMode::Default => PolicyContext {
                istio_mtls_sni: Some(dns_srv_subset_key(
                    TrafficDirection::Outbound,
                    subset,
                    &input.service.hostname,
                    input.port.number,
                )),
                simple_tls_sni: Some(input.service.hostname.clone()),
            },
            ClusterMode::SniDnat => PolicyContext::default(),
        }
    }

    /// Render `policy` onto the cluster, replacing whatever was there.
    fn apply_policy(
        &self,
        cluster: &mut ClusterDefinition,
        policy: &TrafficPolicy,
        ctx: &PolicyContext,
    ) {
        if policy.load_balancer == Some(SimpleLb::Passthrough) {
            cluster.discovery_type = DiscoveryType::OriginalDst;
            cluster.load_assignment = None;
            cluster.dns = None;
        }
        cluster.lb_policy = match (cluster.discovery_type, policy.load_balancer) {
            (DiscoveryType::OriginalDst, _) => LbPolicy::ClusterProvided,
            (_, Some(SimpleLb::LeastRequest)) => LbPolicy::LeastRequest,
            (_, Some(SimpleLb::Random)) => LbPolicy::Random,
            (_, Some(SimpleLb::RoundRobin | SimpleLb::Passthrough) | None) => LbPolicy::RoundRobin,
        };

        let pool = policy.connection_pool.as_ref();
        cluster.connect_timeout = pool
            .and_then(|p| p.connect_timeout)
            .unwrap_or(self.mesh.connect_timeout);
        cluster.circuit_breakers = pool.filter(|p| p.has_limits()).map(|p| CircuitBreakers {
            max_connections: p.max_connections,
            max_pending_requests: p.http1_max_pending_requests,
            max_requests: p.http2_max_requests,
            max_retries: p.max_retries,
        });
        cluster.outlier_detection = policy.outlier_detection.clone();
        cluster.tls = policy.tls.as_ref().and_then(|tls| render_tls(tls, ctx));
        cluster.traffic_policy = policy.clone();
    }

    fn finish_service_cluster(
        &self,
        cluster: &mut ClusterDefinition,
        input: &CompileInput<'_>,
        subset: &str,
    ) {
        cluster.http2 = input.port.protocol.is_http2();
        if let Some(pattern) = &self.mesh.outbound_cluster_stat_name {
            cluster.alt_stat_name = Some(build_stat_prefix(
                pattern,
                &input.service.hostname,
                &input.service.namespace,
                subset,
                input.port.number,
                &input.port.name,
            ));
        }
        // runs after policy because a passthrough load balancer changes the type
        if cluster.discovery_type == DiscoveryType::Eds {
            cluster.eds_config = Some(EdsConfig {
                service_name: cluster.name.clone(),
                ads: true,
                initial_fetch_timeout: self.mesh.initial_fetch_timeout,
            });
        }
    }

    fn record(&self, out: &mut Compiled, diagnostic: Diagnostic) {
        self.stats.record_diagnostic(diagnostic.kind);
        counter!("pilot_compile_diagnostics_total", "kind" => diagnostic.kind.as_str())
            .increment(1);
        if diagnostic.kind == DiagnosticKind::NoEndpoints {
            counter!("pilot_compile_no_endpoint_clusters_total").increment(1);
        }
        debug!(%diagnostic, "cluster skipped");
        out.diagnostics.push(diagnostic);
    }
}

fn render_tls(tls: &TlsSettings, ctx: &PolicyContext) -> Option<UpstreamTls> {
    let sni = match tls.mode {
        TlsMode::Disable => return None,
        TlsMode::Simple => tls.sni.clone().or_else(|| ctx.simple_tls_sni.clone()),
        TlsMode::Mutual => tls.sni.clone(),
        TlsMode::IstioMutual => tls.sni.clone().or_else(|| ctx.istio_mtls_sni.clone()),
    };
    Some(UpstreamTls {
        mode: tls.mode,
        sni,
        subject_alt_names: tls.subject_alt_names.clone(),
    })
}
