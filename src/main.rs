use fil_trace_audit::audit::{AuditContext, CheckDriver, CheckError, RunStats, build_check, load_addresses};
use fil_trace_audit::chain::LotusClient;
use fil_trace_audit::checkpoint::CheckpointStore;
use fil_trace_audit::config::AuditConfig;
use fil_trace_audit::trace::{DirectoryTraceSource, InvocationParser};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info, warn};
use url::Url;

#[tokio::main(flavor = "current_thread")]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	// config path: first argument, then AUDIT_CONFIG
	let config_path = std::env::args()
		.nth(1)
		.or_else(|| std::env::var("AUDIT_CONFIG").ok())
		.map(PathBuf::from);

	let config = match AuditConfig::load(config_path.as_deref()) {
		Ok(config) => config,
		Err(e) => {
			error!("Invalid configuration: {}", e);
			std::process::exit(2);
		}
	};

	info!("Starting {} audit", config.check.kind.as_str());

	match run(&config).await {
		Ok(stats) if stats.has_failures() => {
			warn!("Audit finished with {} failed records", stats.records_failed);
			std::process::exit(1);
		}
		Ok(_) => info!("Audit finished without failures"),
		Err(e) => {
			error!("Audit aborted: {}", e);
			std::process::exit(1);
		}
	}
}

async fn run(config: &AuditConfig) -> Result<RunStats, CheckError> {
	let url = Url::parse(&config.node.url)
		.map_err(|e| CheckError::InputError(format!("Invalid node url {:?}: {}", config.node.url, e)))?;
	let chain = Arc::new(LotusClient::new(url, config.node.token.clone(), config.call_timeout())?);
	info!("Created node client for {}", config.node.url);

	let traces = Arc::new(DirectoryTraceSource::new(config.traces.dir.clone()));
	info!("Reading traces from {:?}", config.traces.dir);

	let mut ctx = AuditContext::new(chain, traces, Arc::new(InvocationParser::new()), config.call_timeout());
	if let Some(budget) = config.deadline() {
		info!("Run deadline in {:?}", budget);
		ctx = ctx.with_deadline(Instant::now() + budget);
	}

	let addresses = load_addresses(&config.check).await?;
	let mut check = build_check(config, addresses)?;

	let store = CheckpointStore::open(&config.checkpoint.dir, config.check.kind.as_str()).await?;
	let driver = CheckDriver::new(Arc::new(ctx), store);
	driver.run(check.as_mut()).await
}
