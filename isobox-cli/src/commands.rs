//! CLI command implementations

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use isobox_sandbox::{
    CodeOptions, ExecutionRequest, ExecutionResult, HostRequest, HttpWorkerLoader, SandboxConfig,
    SandboxLoader, WorkerDefinition, WorkerLoader, WorkersClient,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::WorkersCommand;

/// Arguments of the `run` command
#[derive(Debug)]
pub struct RunArgs {
    pub script: PathBuf,
    pub module: Option<PathBuf>,
    pub env: Vec<String>,
    pub capture_console: bool,
    pub legacy: bool,
    pub local: bool,
    pub loader_url: Option<String>,
}

/// Load the config file when given, defaults otherwise
pub fn load_config(path: Option<&Path>) -> Result<SandboxConfig> {
    match path {
        Some(path) => {
            let config = SandboxConfig::load(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            debug!(path = %path.display(), "Loaded configuration");
            Ok(config)
        }
        None => Ok(SandboxConfig::default()),
    }
}

/// Read a source file, or stdin for `-`
fn read_source(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut source = String::new();
        std::io::stdin()
            .read_to_string(&mut source)
            .context("Failed to read script from stdin")?;
        return Ok(source);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Split `KEY=VALUE` pairs
fn parse_pairs(pairs: &[String]) -> Result<Vec<(String, String)>> {
    pairs
        .iter()
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("Expected KEY=VALUE, got '{}'", pair))?;
            if key.is_empty() {
                bail!("Empty key in '{}'", pair);
            }
            Ok((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Env values are JSON when they parse as JSON, plain strings otherwise
fn parse_env(pairs: &[String]) -> Result<Map<String, Value>> {
    Ok(parse_pairs(pairs)?
        .into_iter()
        .map(|(key, value)| {
            let value = serde_json::from_str(&value).unwrap_or(Value::String(value));
            (key, value)
        })
        .collect())
}

fn select_loader(config: &SandboxConfig, args: &RunArgs) -> Result<Arc<dyn WorkerLoader>> {
    if args.local {
        return local_loader(config);
    }

    let url = args
        .loader_url
        .as_deref()
        .or(config.loader_url.as_deref())
        .ok_or_else(|| anyhow!("No loader URL configured; pass --loader-url or --local"))?;
    Ok(Arc::new(HttpWorkerLoader::new(url)?))
}

#[cfg(feature = "v8")]
fn local_loader(config: &SandboxConfig) -> Result<Arc<dyn WorkerLoader>> {
    Ok(Arc::new(isobox_sandbox::V8WorkerLoader::with_limits(
        config.local.clone(),
    )))
}

#[cfg(not(feature = "v8"))]
fn local_loader(_config: &SandboxConfig) -> Result<Arc<dyn WorkerLoader>> {
    bail!("--local requires isobox to be built with the `v8` feature")
}

/// Execute the `run` command
pub async fn execute_run(config: &SandboxConfig, args: RunArgs) -> Result<ExecutionResult> {
    let script = read_source(&args.script)?;
    let loader = select_loader(config, &args)?;
    let sandbox = SandboxLoader::from_arc(loader, config);

    #[cfg(feature = "v8")]
    let sandbox = if args.local {
        sandbox.with_syntax_checker(isobox_sandbox::V8SyntaxChecker::new())
    } else {
        sandbox
    };

    info!(loader = sandbox.loader_name(), legacy = args.legacy, "Running script");

    if args.legacy {
        if args.module.is_some() || !args.env.is_empty() {
            bail!("--legacy does not accept --module or --env");
        }
        let options = CodeOptions {
            capture_console: args.capture_console,
        };
        return Ok(sandbox.execute_code(&script, options).await);
    }

    let mut request = ExecutionRequest::new(script).capture_console(args.capture_console);
    if let Some(module) = &args.module {
        request = request.with_module(read_source(module)?);
    }
    request.env = parse_env(&args.env)?;

    Ok(sandbox.execute_in_sandbox(request).await)
}

/// Execute a `workers` subcommand and render its output
pub async fn execute_workers(config: &SandboxConfig, command: WorkersCommand) -> Result<String> {
    let client = WorkersClient::new(config);

    let value = match command {
        WorkersCommand::Create {
            id,
            script,
            module,
            env,
            no_console,
        } => {
            let mut definition = WorkerDefinition::new(id, read_source(&script)?);
            if let Some(module) = &module {
                definition = definition.with_module(read_source(module)?);
            }
            definition.env = parse_env(&env)?;
            definition.capture_console = Some(!no_console);
            client.create_worker(definition).await?
        }
        WorkersCommand::Get { id } => client.get_worker(&id).await?,
        WorkersCommand::Delete { id } => client.delete_worker(&id).await?,
        WorkersCommand::List => client.list_workers().await?,
        WorkersCommand::Execute { id, body, headers } => {
            let mut request = HostRequest::new("POST", format!("https://{}.workers.internal/", id));
            for (name, value) in parse_pairs(&headers)? {
                request = request.with_header(name, value);
            }
            if let Some(body) = body {
                request = request.with_body(body);
            }
            let response = client.execute_worker(&id, request).await?;
            debug!(status = response.status, "Worker responded");
            return Ok(response.body);
        }
    };

    Ok(serde_json::to_string_pretty(&value)?)
}
