use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context as _, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};

use kawait_awaiter::{AwaitConfig, Awaiter};
use kawait_condition::{
    expression::{eval_condition, ConditionExpr},
    kstatus, overrides, All, DeletionSource, DynamicSource, EventAggregator, Observer, Ready, Satisfier, Source,
};
use kawait_core::{
    Context, DedupLogger, EventKind, GetError, Gvk, Logger, ObjectGetter, ResourceSnapshot, Status, SubscriptionFactory,
    TracingLogger,
};
use kawait_kubehub::{Factories, KubeGetter};

#[derive(Parser, Debug)]
#[command(name = "kawaitctl", version, about = "Wait for Kubernetes objects to reach a condition")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Kubernetes namespace (default: current context)
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Block until an object satisfies a condition
    Wait {
        /// GVK key, e.g. "apps/v1/Deployment" or "v1/Pod"
        gvk: String,
        name: String,
        /// `delete`, `ready`, `condition=Type[=Status]` or `jsonpath={.path}[=value]`; repeat to require all
        #[arg(long = "for")]
        conditions: Vec<String>,
        /// Timeout in seconds (default: object annotation, then KAWAIT_TIMEOUT_SECS)
        #[arg(long = "timeout")]
        timeout: Option<u64>,
        /// Do not surface cluster events about the object
        #[arg(long = "no-events", action = ArgAction::SetTrue)]
        no_events: bool,
    },
    /// Watch objects for a GVK and print +/~/- events
    Watch {
        /// GVK key, e.g. "v1/ConfigMap" or "cert-manager.io/v1/Certificate"
        gvk: String,
    },
    /// Evaluate conditions against a YAML or JSON manifest offline
    Check {
        file: std::path::PathBuf,
        /// `ready`, a condition expression, or a JSON condition tree; repeat to require all
        #[arg(long = "for", required = true)]
        conditions: Vec<String>,
    },
}

fn init_tracing() {
    let env = std::env::var("KAWAIT_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KAWAIT_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid KAWAIT_METRICS_ADDR; expected host:port");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Wait { ref gvk, ref name, ref conditions, timeout, no_events } => {
            let gvk = parse_gvk(gvk)?;
            let args = WaitArgs { gvk, name: name.clone(), conditions: conditions.clone(), timeout, events: !no_events };
            wait(&cli, args).await
        }
        Commands::Watch { ref gvk } => watch(&cli, parse_gvk(gvk)?).await,
        Commands::Check { ref file, ref conditions } => {
            let obj = load_manifest(file)?;
            let report = check(&obj, conditions)?;
            match cli.output {
                Output::Human => {
                    for r in &report.results {
                        let mark = if r.satisfied { "✓" } else { "✗" };
                        match &r.detail {
                            Some(detail) => println!("{} {} ({})", mark, r.condition, detail),
                            None => println!("{} {}", mark, r.condition),
                        }
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            }
            if !report.satisfied {
                bail!("{} does not satisfy every condition", report.object);
            }
            Ok(())
        }
    }
}

fn parse_gvk(key: &str) -> Result<Gvk> {
    Gvk::parse_key(key).ok_or_else(|| anyhow!("invalid gvk key: {} (expect v1/Kind or group/v1/Kind)", key))
}

fn json_key(obj: &ResourceSnapshot) -> String {
    match obj.namespace() {
        Some(ns) => format!("{}/{}", ns, obj.name()),
        None => obj.name().to_string(),
    }
}

/// Cancel `ctx` on Ctrl-C.
fn cancel_on_ctrl_c(ctx: &Context) {
    let ctx = ctx.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received; cancelling");
            ctx.cancel();
        }
    });
}

// ---- wait ----

struct WaitArgs {
    gvk: Gvk,
    name: String,
    conditions: Vec<String>,
    timeout: Option<u64>,
    events: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ForExpr {
    Delete,
    Ready,
    Expr(String),
}

impl FromStr for ForExpr {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("delete") {
            Ok(ForExpr::Delete)
        } else if s.eq_ignore_ascii_case("ready") {
            Ok(ForExpr::Ready)
        } else if s.starts_with("condition=") || s.starts_with("jsonpath=") {
            Ok(ForExpr::Expr(s.to_string()))
        } else {
            bail!("unrecognized --for value {:?}: expected delete, ready, condition=... or jsonpath=...", s)
        }
    }
}

/// Stand-in for an object that is already gone, so a delete wait can still
/// be expressed against it.
fn placeholder(gvk: &Gvk, name: &str, namespace: &str) -> ResourceSnapshot {
    ResourceSnapshot::new(json!({
        "apiVersion": gvk.api_version(),
        "kind": gvk.kind,
        "metadata": {"name": name, "namespace": namespace}
    }))
}

async fn wait(cli: &Cli, args: WaitArgs) -> Result<()> {
    let config = AwaitConfig::from_env();
    let wants = args.conditions.iter().map(|c| c.parse::<ForExpr>()).collect::<Result<Vec<_>>>()?;
    let deleting = wants.contains(&ForExpr::Delete);

    let client = kawait_kubehub::client().await?;
    let namespace = cli.namespace.clone().unwrap_or_else(|| client.default_namespace().to_string());
    let getter = Arc::new(KubeGetter::for_gvk(client.clone(), &args.gvk, Some(&namespace)).await?);
    let live = match getter.get(&Context::background(), &args.name).await {
        Ok(obj) => obj,
        Err(GetError::NotFound(_)) if deleting => placeholder(&args.gvk, &args.name, &namespace),
        Err(err) => return Err(anyhow::Error::new(err).context(format!("reading {} {}", args.gvk, args.name))),
    };
    info!(gvk = %args.gvk, name = %args.name, namespace = %namespace, "wait invoked");

    let timeout = args.timeout.map(Duration::from_secs).or_else(|| overrides::timeout(&live)).unwrap_or(config.timeout);
    let ctx = Context::background().with_timeout(timeout);
    cancel_on_ctrl_c(&ctx);

    let factories = Factories::new(client);
    let factory: Arc<dyn SubscriptionFactory> = factories.for_namespace(Some(&namespace));
    let source: Arc<dyn Source> = Arc::new(DynamicSource::new(factory, config.event_buffer));
    let logger: Arc<dyn Logger> = Arc::new(DedupLogger::new(Arc::new(TracingLogger)));

    let mut conditions: Vec<Arc<dyn Satisfier>> = Vec::with_capacity(wants.len());
    for want in &wants {
        let condition: Arc<dyn Satisfier> = match want {
            ForExpr::Delete => {
                let deletion: Arc<dyn Source> = Arc::new(DeletionSource::new(source.clone(), getter.clone(), live.clone()));
                overrides::deleted_condition(&ctx, deletion, getter.clone(), logger.clone(), &live, &live)
            }
            ForExpr::Ready => Arc::new(Ready::new(&ctx, source.clone(), logger.clone(), live.clone())),
            ForExpr::Expr(expr) => overrides::condition_for_expr(&ctx, source.clone(), logger.clone(), &live, expr)?,
        };
        conditions.push(condition);
    }
    let condition: Arc<dyn Satisfier> = match conditions.len() {
        0 => overrides::ready_condition(&ctx, source.clone(), logger.clone(), &live, &live, config.await_all)?,
        1 => conditions.remove(0),
        _ => Arc::new(All::new(conditions)?),
    };

    let mut observers: Vec<Arc<dyn Observer>> = Vec::new();
    if args.events && !live.uid().is_empty() {
        observers.push(Arc::new(EventAggregator::new(&ctx, source.clone(), logger.clone(), &live)));
    }

    let awaiter = Awaiter::new()
        .with_logger(logger)
        .with_namespace(namespace)
        .with_condition(condition)
        .with_observers(observers);
    let res = awaiter.wait(&ctx).await;
    factories.shutdown();

    match res {
        Ok(obj) => {
            match cli.output {
                Output::Human => println!("{} {} condition met", args.gvk, json_key(&obj)),
                Output::Json => println!("{}", serde_json::to_string_pretty(obj.value())?),
            }
            Ok(())
        }
        Err(err) => {
            if let (Output::Json, Some(obj)) = (cli.output, err.object()) {
                println!("{}", serde_json::to_string_pretty(obj.value())?);
            }
            Err(anyhow::Error::new(err).context(format!("waiting for {} {}", args.gvk, args.name)))
        }
    }
}

// ---- watch ----

async fn watch(cli: &Cli, gvk: Gvk) -> Result<()> {
    let config = AwaitConfig::from_env();
    let client = kawait_kubehub::client().await?;
    let factories = Factories::new(client);
    let factory = factories.for_namespace(cli.namespace.as_deref());
    info!(gvk = %gvk, ns = ?cli.namespace, "watch invoked");

    let (tx, mut rx) = mpsc::channel(config.event_buffer);
    let _sub = factory.subscribe(&gvk, tx).await?;
    loop {
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(ev) => match cli.output {
                    Output::Human => {
                        let mark = match ev.kind {
                            EventKind::Added => '+',
                            EventKind::Modified => '~',
                            EventKind::Deleted => '-',
                        };
                        println!("{} {}", mark, json_key(&ev.object));
                    }
                    Output::Json => println!("{}", serde_json::to_string(&ev)?),
                },
                None => {
                    warn!("event channel closed; exiting watch loop");
                    break;
                }
            },
            _ = signal::ctrl_c() => {
                info!("Ctrl-C received; shutting down watch loop");
                break;
            }
        }
    }
    factories.shutdown();
    Ok(())
}

// ---- check ----

fn load_manifest(path: &Path) -> Result<ResourceSnapshot> {
    let contents = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let value: Value = serde_yaml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
    if !value.is_object() {
        bail!("{} does not contain an object", path.display());
    }
    Ok(ResourceSnapshot::new(value))
}

#[derive(Debug, Serialize)]
struct CheckReport {
    object: String,
    satisfied: bool,
    results: Vec<CheckResult>,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    condition: String,
    satisfied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

fn check(obj: &ResourceSnapshot, conditions: &[String]) -> Result<CheckReport> {
    let mut results = Vec::with_capacity(conditions.len());
    for cond in conditions {
        let trimmed = cond.trim();
        let (satisfied, detail) = if trimmed.eq_ignore_ascii_case("ready") {
            let res = kstatus::compute(obj);
            let detail = if res.message.is_empty() { res.status.to_string() } else { format!("{}: {}", res.status, res.message) };
            (res.status == Status::Current, Some(detail))
        } else if trimmed.starts_with('{') || trimmed.starts_with('[') {
            let tree: Value = serde_json::from_str(trimmed).with_context(|| format!("parsing condition tree {}", trimmed))?;
            (eval_condition(obj, &tree)?, None)
        } else {
            (ConditionExpr::parse_str(trimmed)?.eval(obj)?, None)
        };
        results.push(CheckResult { condition: cond.clone(), satisfied, detail });
    }
    let satisfied = results.iter().all(|r| r.satisfied);
    Ok(CheckReport { object: format!("{} {}", obj.gvk(), json_key(obj)), satisfied, results })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn deployment() -> ResourceSnapshot {
        ResourceSnapshot::new(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "prod", "generation": 2},
            "spec": {"replicas": 2},
            "status": {
                "observedGeneration": 2,
                "replicas": 2, "updatedReplicas": 2, "readyReplicas": 2, "availableReplicas": 2,
                "conditions": [{"type": "Available", "status": "True"}]
            }
        }))
    }

    #[test]
    fn for_values() {
        assert_eq!("delete".parse::<ForExpr>().expect("ok"), ForExpr::Delete);
        assert_eq!(" Ready ".parse::<ForExpr>().expect("ok"), ForExpr::Ready);
        assert_eq!(
            "condition=Available".parse::<ForExpr>().expect("ok"),
            ForExpr::Expr("condition=Available".to_string())
        );
        assert!("available".parse::<ForExpr>().is_err());
    }

    #[test]
    fn check_reports_each_condition() {
        let report = check(
            &deployment(),
            &[
                "ready".to_string(),
                "condition=Available".to_string(),
                "jsonpath={.spec.replicas}=3".to_string(),
            ],
        )
        .expect("ok");

        assert_eq!(report.object, "apps/v1/Deployment prod/web");
        assert!(!report.satisfied);
        let flags: Vec<bool> = report.results.iter().map(|r| r.satisfied).collect();
        assert_eq!(flags, vec![true, true, false]);
        assert_eq!(report.results[0].detail.as_deref(), Some("Current: Deployment is available. Replicas: 2"));
    }

    #[test]
    fn check_accepts_condition_trees() {
        let tree = r#"{"operator": "or", "conditions": ["condition=Missing", "jsonpath={.spec.replicas}=2"]}"#;
        let report = check(&deployment(), &[tree.to_string()]).expect("ok");
        assert!(report.satisfied);
    }

    #[test]
    fn check_rejects_unknown_prefixes() {
        assert!(check(&deployment(), &["available".to_string()]).is_err());
    }

    #[test]
    fn manifests_load_from_yaml() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: settings\ndata:\n  mode: fast").expect("write");
        let obj = load_manifest(file.path()).expect("load");
        assert_eq!(obj.gvk(), Gvk::new("", "v1", "ConfigMap"));
        assert_eq!(obj.get_str(&["data", "mode"]), Some("fast"));

        let mut scalar = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(scalar, "just text").expect("write");
        assert!(load_manifest(scalar.path()).is_err());
    }

    #[test]
    fn placeholder_keeps_identity() {
        let obj = placeholder(&Gvk::new("apps", "v1", "Deployment"), "web", "prod");
        assert_eq!(obj.gvk(), Gvk::new("apps", "v1", "Deployment"));
        assert_eq!(json_key(&obj), "prod/web");
    }
}
