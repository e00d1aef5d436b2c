//! In-memory deployment model for one compiled module.
//!
//! Entities are filled in by the annotation processors, have their
//! cross-entity defaults resolved once every annotation was seen, and are
//! then validated and rendered. Entities point at each other by name or by
//! attachment identifier, never by reference.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{self, Display, Formatter},
    path::{Path, PathBuf},
    str::FromStr,
};

use crate::{
    error::Error,
    input::Origin,
    names::{get_valid_name, get_valid_name_with_postfix, DEPLOYMENT_POSTFIX},
};

pub const DEFAULT_BASE_IMAGE: &str = "debian:bookworm-slim";
pub const DEFAULT_IMAGE_TAG: &str = "latest";
pub const KUBERNETES_DIR: &str = "kubernetes";
pub const DOCKER_DIR: &str = "docker";
pub const CLOUD_CONFIG_FILE: &str = "Cloud.toml";

/// Set `slot` unless an inferred value would overwrite one that is already there.
pub fn assign<T>(slot: &mut Option<T>, value: T, origin: Origin) {
    if origin == Origin::Explicit || slot.is_none() {
        *slot = Some(value);
    }
}

/// Extend `map` with `entries`; inferred entries never replace existing keys.
pub fn merge_map(
    map: &mut BTreeMap<String, String>,
    entries: BTreeMap<String, String>,
    origin: Origin,
) {
    for (k, v) in entries {
        if origin == Origin::Explicit || !map.contains_key(&k) {
            map.insert(k, v);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    /// One yaml file per generated resource lands here.
    pub kubernetes: PathBuf,
    /// Image build context: Dockerfile plus copied executable and dependencies.
    pub docker: PathBuf,
    /// Recorded for the host tool; never read by the pipeline.
    pub cloud_config: PathBuf,
}

impl OutputPaths {
    pub fn for_module(root: &Path, module: &str) -> Self {
        let mut dir = get_valid_name(module);
        if dir.is_empty() {
            dir = "module".to_string();
        }
        Self {
            kubernetes: root.join(KUBERNETES_DIR).join(&dir),
            docker: root.join(DOCKER_DIR).join(&dir),
            cloud_config: root.join(CLOUD_CONFIG_FILE),
        }
    }
}

/// Aggregate root: everything generated for one module.
#[derive(Debug, Clone)]
pub struct ModuleContext {
    pub module: String,
    pub paths: OutputPaths,
    pub deployment: DeploymentModel,
    pub docker: DockerModel,
    /// Keyed by the identifier of the service or listener they were attached to.
    pub services: BTreeMap<String, ServiceModel>,
    pub hpa: Option<HpaModel>,
    /// Keyed by function name.
    pub jobs: BTreeMap<String, JobModel>,
    pub config_maps: Vec<ConfigMapModel>,
    pub secrets: Vec<SecretModel>,
    pub volume_claims: Vec<VolumeClaimModel>,
    /// Keyed by the identifier of the service or listener they route to.
    pub ingresses: BTreeMap<String, IngressModel>,
}

impl ModuleContext {
    pub fn new(module: impl Into<String>, paths: OutputPaths) -> Self {
        Self {
            module: module.into(),
            paths,
            deployment: DeploymentModel::default(),
            docker: DockerModel::default(),
            services: BTreeMap::new(),
            hpa: None,
            jobs: BTreeMap::new(),
            config_maps: Vec::new(),
            secrets: Vec::new(),
            volume_claims: Vec::new(),
            ingresses: BTreeMap::new(),
        }
    }

    pub fn deployment_name(&self) -> String {
        self.deployment
            .name
            .clone()
            .unwrap_or_else(|| get_valid_name_with_postfix(&self.module, DEPLOYMENT_POSTFIX))
    }

    /// Container ports of the workload: every service's target port.
    pub fn container_ports(&self) -> BTreeSet<u16> {
        self.services
            .values()
            .filter_map(|s| s.target_port.or(s.port))
            .collect()
    }

    /// Fill in every default that depends on more than one entity.
    pub fn resolve_defaults(&mut self) {
        if self.deployment.name.is_none() && self.deployment.declared {
            self.deployment.name = Some(self.deployment_name());
        }
        if self.docker.name.is_none() {
            self.docker.name = Some(get_valid_name(&self.module));
        }

        for svc in self.services.values_mut() {
            if svc.target_port.is_none() {
                svc.target_port = svc.port;
            }
        }
        self.docker.ports = self.container_ports();

        if let Some(hpa) = self.hpa.as_mut() {
            if hpa.target.is_none() {
                hpa.target = self.deployment.name.clone();
            }
        }

        for ingress in self.ingresses.values_mut() {
            if let Some(svc) = self.services.get(&ingress.backend) {
                ingress.service_name = svc.name.clone();
                ingress.service_port = svc.port;
                ingress.backend_https = svc.protocol.as_deref() == Some("https");
            }
        }

        let first_port = self.container_ports().into_iter().next();
        for probe in self.deployment.probes_mut() {
            if probe.port.is_none() && probe.action.needs_port() {
                probe.port = first_port;
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeploymentModel {
    /// Set once any annotation asks for a long running workload.
    pub declared: bool,
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub pod_annotations: BTreeMap<String, String>,
    pub replicas: Option<i32>,
    pub image_pull_policy: Option<String>,
    pub resources: ResourcesModel,
    pub env: BTreeMap<String, String>,
    pub liveness: Option<ProbeModel>,
    pub readiness: Option<ProbeModel>,
    pub image_pull_secrets: Vec<String>,
    pub service_account: Option<String>,
}

impl DeploymentModel {
    pub fn probes(&self) -> impl Iterator<Item = &ProbeModel> {
        self.liveness.iter().chain(self.readiness.iter())
    }

    pub fn probes_mut(&mut self) -> impl Iterator<Item = &mut ProbeModel> {
        self.liveness.iter_mut().chain(self.readiness.iter_mut())
    }

    pub fn set_probe(&mut self, probe: ProbeModel, origin: Origin) {
        let slot = match probe.kind {
            ProbeKind::Liveness => &mut self.liveness,
            ProbeKind::Readiness => &mut self.readiness,
        };
        assign(slot, probe, origin);
    }
}

/// Resource requests and limits. Unset quantities are left out of the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourcesModel {
    pub requests: Quantities,
    pub limits: Quantities,
}

impl ResourcesModel {
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.limits.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Quantities {
    pub cpu: Option<String>,
    pub memory: Option<String>,
}

impl Quantities {
    pub fn is_empty(&self) -> bool {
        self.cpu.is_none() && self.memory.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceType {
    ClusterIp,
    NodePort,
    LoadBalancer,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClusterIp => "ClusterIP",
            Self::NodePort => "NodePort",
            Self::LoadBalancer => "LoadBalancer",
        }
    }
}

impl FromStr for ServiceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "ClusterIP" => Ok(Self::ClusterIp),
            "NodePort" => Ok(Self::NodePort),
            "LoadBalancer" => Ok(Self::LoadBalancer),
            other => Err(Error::schema(format!(
                "invalid serviceType '{other}', expected ClusterIP, NodePort or LoadBalancer"
            ))),
        }
    }
}

impl Display for ServiceType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAffinity {
    None,
    ClientIp,
}

impl SessionAffinity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::ClientIp => "ClientIP",
        }
    }
}

impl FromStr for SessionAffinity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "None" => Ok(Self::None),
            "ClientIP" => Ok(Self::ClientIp),
            other => Err(Error::schema(format!(
                "invalid sessionAffinity '{other}', expected None or ClientIP"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceModel {
    /// Identifier of the service or listener this was attached to.
    pub attachment: String,
    pub name: Option<String>,
    pub protocol: Option<String>,
    pub port: Option<u16>,
    pub target_port: Option<u16>,
    pub node_port: Option<u16>,
    pub service_type: Option<ServiceType>,
    /// Set once a user annotation names the type; inferred types do not count.
    pub explicit_service_type: bool,
    pub session_affinity: Option<SessionAffinity>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

impl ServiceModel {
    pub fn new(attachment: impl Into<String>) -> Self {
        Self {
            attachment: attachment.into(),
            name: None,
            protocol: None,
            port: None,
            target_port: None,
            node_port: None,
            service_type: None,
            explicit_service_type: false,
            session_affinity: None,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }

    pub fn service_type(&self) -> ServiceType {
        self.service_type.unwrap_or(ServiceType::ClusterIp)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HpaModel {
    pub name: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    /// Name of the deployment to scale.
    pub target: Option<String>,
    pub min_replicas: Option<i32>,
    pub max_replicas: Option<i32>,
    pub cpu_percentage: Option<i32>,
    pub memory_percentage: Option<i32>,
}

pub const DEFAULT_HPA_MIN_REPLICAS: i32 = 1;
pub const DEFAULT_HPA_CPU_PERCENTAGE: i32 = 50;

impl HpaModel {
    pub fn min_replicas(&self) -> i32 {
        self.min_replicas.unwrap_or(DEFAULT_HPA_MIN_REPLICAS)
    }

    /// One more than the minimum unless set.
    pub fn max_replicas(&self) -> i32 {
        self.max_replicas
            .unwrap_or_else(|| self.min_replicas().saturating_add(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    OnFailure,
    Never,
}

impl RestartPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnFailure => "OnFailure",
            Self::Never => "Never",
        }
    }
}

impl FromStr for RestartPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "OnFailure" => Ok(Self::OnFailure),
            "Never" => Ok(Self::Never),
            other => Err(Error::schema(format!(
                "invalid restartPolicy '{other}', expected OnFailure or Never"
            ))),
        }
    }
}

pub const DEFAULT_JOB_BACKOFF_LIMIT: i32 = 3;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobModel {
    pub name: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub restart_policy: Option<RestartPolicy>,
    pub backoff_limit: Option<i32>,
    pub active_deadline_seconds: Option<i64>,
    /// Cron schedule. Present means a CronJob, absent a one-shot Job.
    pub schedule: Option<String>,
    pub env: BTreeMap<String, String>,
    pub image_pull_policy: Option<String>,
}

impl JobModel {
    pub fn is_cron(&self) -> bool {
        self.schedule.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigMapModel {
    pub name: String,
    pub mount_path: Option<String>,
    pub read_only: bool,
    pub default_mode: Option<i32>,
    pub data: BTreeMap<String, String>,
    /// Files the payload was read from.
    pub sources: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SecretModel {
    pub name: String,
    pub mount_path: Option<String>,
    pub read_only: bool,
    pub default_mode: Option<i32>,
    pub data: BTreeMap<String, Vec<u8>>,
    pub sources: Vec<PathBuf>,
}

pub const DEFAULT_ACCESS_MODE: &str = "ReadWriteOnce";

#[derive(Debug, Clone, PartialEq)]
pub struct VolumeClaimModel {
    pub name: String,
    pub mount_path: String,
    pub access_mode: String,
    pub size: String,
    pub read_only: bool,
    pub annotations: BTreeMap<String, String>,
}

pub const DEFAULT_INGRESS_CLASS: &str = "nginx";

#[derive(Debug, Clone, PartialEq)]
pub struct IngressModel {
    pub name: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub hostname: Option<String>,
    pub path: Option<String>,
    pub target_path: Option<String>,
    pub ingress_class: Option<String>,
    pub tls: bool,
    /// Identifier of the service or listener whose Service this routes to.
    pub backend: String,
    pub service_name: Option<String>,
    pub service_port: Option<u16>,
    pub backend_https: bool,
}

impl IngressModel {
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            name: None,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            hostname: None,
            path: None,
            target_path: None,
            ingress_class: None,
            tls: false,
            backend: backend.into(),
            service_name: None,
            service_port: None,
            backend_https: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    Liveness,
    Readiness,
}

impl ProbeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Liveness => "liveness",
            Self::Readiness => "readiness",
        }
    }

    pub fn default_initial_delay(&self) -> i32 {
        match self {
            Self::Liveness => 10,
            Self::Readiness => 3,
        }
    }

    pub fn default_period(&self) -> i32 {
        match self {
            Self::Liveness => 5,
            Self::Readiness => 1,
        }
    }
}

impl FromStr for ProbeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "liveness" => Ok(Self::Liveness),
            "readiness" => Ok(Self::Readiness),
            other => Err(Error::schema(format!(
                "invalid probe kind '{other}', expected liveness or readiness"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeAction {
    TcpSocket,
    HttpGet { path: String },
    Exec { command: Vec<String> },
}

impl ProbeAction {
    pub fn needs_port(&self) -> bool {
        !matches!(self, Self::Exec { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeModel {
    pub kind: ProbeKind,
    pub port: Option<u16>,
    pub action: ProbeAction,
    pub initial_delay_seconds: i32,
    pub period_seconds: i32,
}

impl ProbeModel {
    pub fn new(kind: ProbeKind) -> Self {
        Self {
            kind,
            port: None,
            action: ProbeAction::TcpSocket,
            initial_delay_seconds: kind.default_initial_delay(),
            period_seconds: kind.default_period(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CopyFile {
    pub source: PathBuf,
    /// Absolute path inside the image.
    pub target: String,
}

/// Image build spec.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DockerModel {
    pub name: Option<String>,
    /// Full image reference; overrides registry/name/tag.
    pub image: Option<String>,
    pub registry: Option<String>,
    pub tag: Option<String>,
    pub base_image: Option<String>,
    pub entrypoint: Option<Vec<String>>,
    pub cmd: Option<String>,
    pub env: BTreeMap<String, String>,
    /// Derived from every service of the module.
    pub ports: BTreeSet<u16>,
    pub executable: PathBuf,
    pub dependencies: BTreeSet<PathBuf>,
    /// Single self-contained executable; no dependency staging.
    pub uber: bool,
    pub copy_files: Vec<CopyFile>,
}

impl DockerModel {
    /// `registry/name:tag`
    pub fn image_reference(&self) -> String {
        if let Some(image) = &self.image {
            return image.clone();
        }
        let name = self.name.as_deref().unwrap_or("app");
        let tag = self.tag.as_deref().unwrap_or(DEFAULT_IMAGE_TAG);
        match &self.registry {
            Some(registry) => format!("{registry}/{name}:{tag}"),
            None => format!("{name}:{tag}"),
        }
    }

    pub fn base_image(&self) -> &str {
        self.base_image.as_deref().unwrap_or(DEFAULT_BASE_IMAGE)
    }

    /// File name of the executable inside the build context.
    pub fn executable_name(&self) -> String {
        self.executable
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "app".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ModuleContext {
        ModuleContext::new("hello", OutputPaths::for_module(Path::new("/out"), "hello"))
    }

    #[test]
    fn inferred_values_never_overwrite() {
        let mut slot = Some(80);
        assign(&mut slot, 9090, Origin::Inferred);
        assert_eq!(slot, Some(80));
        assign(&mut slot, 9091, Origin::Explicit);
        assert_eq!(slot, Some(9091));

        let mut empty = None;
        assign(&mut empty, 1, Origin::Inferred);
        assert_eq!(empty, Some(1));
    }

    #[test]
    fn output_paths_are_per_module() {
        let paths = OutputPaths::for_module(Path::new("/out"), "Hello_World");
        assert_eq!(paths.kubernetes, Path::new("/out/kubernetes/hello-world"));
        assert_eq!(paths.docker, Path::new("/out/docker/hello-world"));
        assert_eq!(paths.cloud_config, Path::new("/out/Cloud.toml"));
    }

    #[test]
    fn resolve_defaults_links_entities() {
        let mut ctx = context();
        ctx.deployment.declared = true;
        let mut svc = ServiceModel::new("helloEp");
        svc.name = Some("helloep-svc".into());
        svc.port = Some(80);
        svc.protocol = Some("https".into());
        ctx.services.insert("helloEp".into(), svc);
        ctx.hpa = Some(HpaModel::default());
        ctx.ingresses
            .insert("helloEp".into(), IngressModel::new("helloEp"));
        ctx.deployment
            .set_probe(ProbeModel::new(ProbeKind::Liveness), Origin::Explicit);

        ctx.resolve_defaults();

        assert_eq!(ctx.deployment.name.as_deref(), Some("hello-deployment"));
        assert_eq!(ctx.services["helloEp"].target_port, Some(80));
        assert_eq!(ctx.docker.ports, [80].into());
        assert_eq!(
            ctx.hpa.as_ref().unwrap().target.as_deref(),
            Some("hello-deployment")
        );
        let ingress = &ctx.ingresses["helloEp"];
        assert_eq!(ingress.service_name.as_deref(), Some("helloep-svc"));
        assert_eq!(ingress.service_port, Some(80));
        assert!(ingress.backend_https);
        assert_eq!(ctx.deployment.liveness.as_ref().unwrap().port, Some(80));
    }

    #[test]
    fn undeclared_deployment_stays_unnamed() {
        let mut ctx = context();
        ctx.hpa = Some(HpaModel::default());
        ctx.resolve_defaults();
        assert_eq!(ctx.deployment.name, None);
        assert_eq!(ctx.hpa.unwrap().target, None);
    }

    #[test]
    fn image_reference() {
        let mut docker = DockerModel {
            name: Some("hello".into()),
            ..Default::default()
        };
        assert_eq!(docker.image_reference(), "hello:latest");
        docker.registry = Some("registry.example.com".into());
        docker.tag = Some("v1".into());
        assert_eq!(docker.image_reference(), "registry.example.com/hello:v1");
        docker.image = Some("custom/img:2".into());
        assert_eq!(docker.image_reference(), "custom/img:2");
    }

    #[test]
    fn hpa_defaults() {
        let hpa = HpaModel {
            min_replicas: Some(3),
            ..Default::default()
        };
        assert_eq!(hpa.min_replicas(), 3);
        assert_eq!(hpa.max_replicas(), 4);
        assert_eq!(HpaModel::default().max_replicas(), 2);
    }
}
