//! Operator configuration from flags and environment
//!
//! Every flag can also be set through a `TCPMAP_*` environment variable. The
//! parsed values are validated once at startup and folded into an immutable
//! [`MappingConfig`] for the engine.

use clap::{ArgAction, Args, Parser, ValueEnum};

use tcpmap_common::telemetry::LogFormat;
use tcpmap_common::Error;
use tcpmap_controller::config::{MappingConfig, PortRange, DEFAULT_MAX_PORT, DEFAULT_MIN_PORT};
use tcpmap_controller::reference::ResourceRef;

/// tcpmap - elects TCP ports for backend Services and registers them with a TCP proxy
#[derive(Parser, Debug)]
#[command(name = "tcpmap", version, about, long_about = None)]
pub struct Cli {
    /// Print the TCPIngressMapping CRD as YAML and exit
    #[arg(long)]
    pub crd: bool,

    /// Controller settings
    #[command(flatten)]
    pub operator: OperatorArgs,
}

/// Log output format
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    /// One JSON object per line
    Json,
    /// Plain text
    Text,
}

impl From<LogFormatArg> for LogFormat {
    fn from(format: LogFormatArg) -> Self {
        match format {
            LogFormatArg::Json => LogFormat::Json,
            LogFormatArg::Text => LogFormat::Text,
        }
    }
}

/// Settings for the mapping controller
#[derive(Args, Debug, Clone)]
pub struct OperatorArgs {
    /// Lowest port that may be elected
    #[arg(long, env = "TCPMAP_MIN_PORT", default_value_t = DEFAULT_MIN_PORT)]
    pub min_port: i32,

    /// Highest port that may be elected
    #[arg(long, env = "TCPMAP_MAX_PORT", default_value_t = DEFAULT_MAX_PORT)]
    pub max_port: i32,

    /// Default frontend Service as `[namespace/]name`
    #[arg(long, env = "TCPMAP_FRONTEND_SERVICE")]
    pub frontend_service: Option<ResourceRef>,

    /// Default TCP services ConfigMap as `[namespace/]name`
    #[arg(long, env = "TCPMAP_TCP_SERVICES_CONFIGMAP")]
    pub tcp_services_configmap: Option<ResourceRef>,

    /// Maximum number of mappings reconciled in parallel
    #[arg(long, env = "TCPMAP_CONCURRENT", default_value_t = 4)]
    pub concurrent: u16,

    /// Watch mappings in all namespaces instead of only the runtime namespace
    #[arg(
        long,
        env = "TCPMAP_WATCH_ALL_NAMESPACES",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub watch_all_namespaces: bool,

    /// Namespace the operator runs in, watched when not watching all namespaces
    #[arg(long, env = "RUNTIME_NAMESPACE")]
    pub runtime_namespace: Option<String>,

    /// Only reconcile mappings matching this label selector
    #[arg(long, env = "TCPMAP_WATCH_LABEL_SELECTOR")]
    pub watch_label_selector: Option<String>,

    /// Log output format
    #[arg(long, env = "TCPMAP_LOG_FORMAT", value_enum, default_value_t = LogFormatArg::Json)]
    pub log_format: LogFormatArg,

    /// Apply the TCPIngressMapping CRD at startup
    #[arg(long, env = "TCPMAP_INSTALL_CRDS")]
    pub install_crds: bool,
}

/// Which mappings the controller watches
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WatchScope {
    /// Restrict to one namespace, or all namespaces when `None`
    pub namespace: Option<String>,
    /// Label selector applied to the mapping watch
    pub label_selector: Option<String>,
}

impl OperatorArgs {
    /// Validate the port range and fold defaults into the engine configuration
    pub fn mapping_config(&self) -> Result<MappingConfig, Error> {
        let mut config = MappingConfig::with_ports(PortRange::new(self.min_port, self.max_port)?);
        config.default_frontend = self.frontend_service.clone();
        config.default_config_store = self.tcp_services_configmap.clone();
        Ok(config)
    }

    /// Resolve the watched namespace and selector
    pub fn watch_scope(&self) -> Result<WatchScope, Error> {
        let namespace = if self.watch_all_namespaces {
            None
        } else {
            let ns = self
                .runtime_namespace
                .clone()
                .filter(|ns| !ns.is_empty())
                .ok_or_else(|| {
                    Error::config("RUNTIME_NAMESPACE must be set when not watching all namespaces")
                })?;
            Some(ns)
        };

        Ok(WatchScope {
            namespace,
            label_selector: self
                .watch_label_selector
                .clone()
                .filter(|s| !s.is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("tcpmap").chain(args.iter().copied()))
            .expect("arguments should parse")
    }

    #[test]
    fn defaults_watch_everything_with_unprivileged_range() {
        let cli = parse(&[]);
        let config = cli.operator.mapping_config().unwrap();

        assert_eq!(config.ports, PortRange::default());
        assert!(config.default_frontend.is_none());
        assert!(config.default_config_store.is_none());
        assert_eq!(cli.operator.concurrent, 4);
        assert_eq!(cli.operator.log_format, LogFormatArg::Json);
        assert_eq!(cli.operator.watch_scope().unwrap(), WatchScope::default());
    }

    #[test]
    fn default_references_are_parsed() {
        let cli = parse(&[
            "--frontend-service",
            "ingress-nginx/ingress-nginx-controller",
            "--tcp-services-configmap",
            "tcp-services",
        ]);
        let config = cli.operator.mapping_config().unwrap();

        assert_eq!(
            config.default_frontend,
            Some(ResourceRef::new(
                Some("ingress-nginx".to_string()),
                "ingress-nginx-controller"
            ))
        );
        assert_eq!(
            config.default_config_store,
            Some(ResourceRef::new(None, "tcp-services"))
        );
    }

    #[test]
    fn malformed_reference_is_rejected_at_parse_time() {
        let result = Cli::try_parse_from(["tcpmap", "--frontend-service", "a/b/c"]);
        assert!(result.is_err());
    }

    #[test]
    fn inverted_port_range_is_a_config_error() {
        let cli = parse(&["--min-port", "3000", "--max-port", "2000"]);
        let err = cli.operator.mapping_config().unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn namespaced_watch_needs_runtime_namespace() {
        let cli = parse(&["--watch-all-namespaces", "false"]);
        assert!(cli.operator.watch_scope().is_err());

        let cli = parse(&[
            "--watch-all-namespaces",
            "false",
            "--runtime-namespace",
            "ingress",
            "--watch-label-selector",
            "tcpmap.infra.doodle.com/managed=true",
        ]);
        assert_eq!(
            cli.operator.watch_scope().unwrap(),
            WatchScope {
                namespace: Some("ingress".to_string()),
                label_selector: Some("tcpmap.infra.doodle.com/managed=true".to_string()),
            }
        );
    }

    #[test]
    fn text_log_format() {
        let cli = parse(&["--log-format", "text", "--crd"]);
        assert!(cli.crd);
        assert_eq!(LogFormat::from(cli.operator.log_format), LogFormat::Text);
    }
}
