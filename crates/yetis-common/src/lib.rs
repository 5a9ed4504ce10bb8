pub mod config;
pub mod env;
pub mod naming;
pub mod spec;

pub use config::{ApplyDocument, ConfigError, ServerConfig, read_apply_file};
pub use naming::{age_string, root_name, upgrade_name};
pub use spec::{
    DeploymentSpec, DeploymentStrategy, EnvVar, Kind, LivenessProbe, ProxySpec, ServiceSelector,
    ServiceSpec, StrategyType, TcpSocket, ValidationError,
};
