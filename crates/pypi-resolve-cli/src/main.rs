use std::collections::HashSet;
use std::io::Read;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use clap::Parser;
use indexmap::IndexMap;
use miette::{Context, IntoDiagnostic};
use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pypi_resolve::cache::CacheSet;
use pypi_resolve::hooks::{Override, TestProfile};
use pypi_resolve::index::{HttpArtifactStore, HttpIndex};
use pypi_resolve::introspect::SubprocessIntrospector;
use pypi_resolve::orchestrator::Orchestrator;
use pypi_resolve::output::ResolveOutput;
use pypi_resolve::spec::Spec;

/// Resolve a pinned, hashed transitive dependency closure for a PyPI-hosted
/// package set.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Speclines JSON document (a file path, or `-` for stdin).
    #[clap(long)]
    json: PathBuf,

    /// Comma-separated `name|interpreter-path|search-path` triples; each
    /// defines one resolve environment. Defaults to a single `default` env
    /// using the `python3` on PATH.
    #[clap(long, value_delimiter = ',')]
    envs: Vec<String>,

    /// Restrict the resolve to this subset of declared env names.
    #[clap(long, value_delimiter = ',')]
    enabled_envs: Vec<String>,

    /// Extra requirement lines, parsed as additional top-level specs applied
    /// to every resolved environment.
    #[clap(long, value_delimiter = ',')]
    extra: Vec<String>,

    /// Path to a JSON object of `{name: override}` applied on top of any
    /// per-specline overrides.
    #[clap(long)]
    overrides: Option<PathBuf>,

    /// Root directory for the persistent metadata caches.
    #[clap(long, default_value = "pypi-resolve-cache")]
    cache_root: PathBuf,

    /// Root directory for downloaded artifacts.
    #[clap(long, default_value = "pypi-resolve-cache/downloads")]
    download_cache_root: PathBuf,

    /// Invalidate the shared link cache before resolving.
    #[clap(long)]
    update: bool,

    /// Test-section inclusion policy.
    #[clap(long, default_value = "top_level")]
    test_profile: String,

    #[clap(short, long)]
    verbose: bool,
}

struct EnvDef {
    name: String,
    interpreter: String,
}

fn parse_envs(raw: &[String]) -> Vec<EnvDef> {
    if raw.is_empty() {
        return vec![EnvDef {
            name: "default".to_string(),
            interpreter: "python3".to_string(),
        }];
    }
    raw.iter()
        .map(|entry| {
            let mut parts = entry.splitn(3, '|');
            let name = parts.next().unwrap_or("default").to_string();
            let interpreter = parts.next().unwrap_or("python3").to_string();
            EnvDef { name, interpreter }
        })
        .collect()
}

/// One entry of the input speclines document (SPEC_FULL.md §6): either a
/// bare requirement line, or an object carrying per-specline overrides and
/// an env scope.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SpeclineInput {
    Line(String),
    Object {
        name: Option<String>,
        spec: String,
        #[serde(default)]
        versions: Vec<String>,
        #[serde(default)]
        overrides: IndexMap<String, Override>,
        #[serde(rename = "override")]
        override_: Option<Override>,
        #[serde(default)]
        envs: Option<EnvsField>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EnvsField {
    List(Vec<String>),
    Map(IndexMap<String, String>),
}

struct NormalizedSpecline {
    spec: Spec,
    versions: Vec<String>,
    overrides: IndexMap<String, Override>,
    envs: Option<Vec<String>>,
}

fn normalize_specline(input: SpeclineInput) -> miette::Result<NormalizedSpecline> {
    match input {
        SpeclineInput::Line(line) => {
            let spec = Spec::parse(&line, "speclines").into_diagnostic()?;
            Ok(NormalizedSpecline {
                spec,
                versions: Vec::new(),
                overrides: IndexMap::new(),
                envs: None,
            })
        }
        SpeclineInput::Object {
            name,
            spec,
            versions,
            mut overrides,
            override_,
            envs,
        } => {
            let parsed = Spec::parse(&spec, "speclines").into_diagnostic()?;
            let target_name = name.unwrap_or_else(|| parsed.name.clone());
            if let Some(ov) = override_ {
                overrides.entry(target_name).or_insert(ov);
            }
            let envs = envs.map(|e| match e {
                EnvsField::List(list) => list,
                EnvsField::Map(map) => map.into_keys().collect(),
            });
            Ok(NormalizedSpecline {
                spec: parsed,
                versions,
                overrides,
                envs,
            })
        }
    }
}

fn read_json_input(path: &PathBuf) -> miette::Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .into_diagnostic()
            .wrap_err("failed to read speclines JSON from stdin")?;
        Ok(buf)
    } else {
        std::fs::read_to_string(path)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to read speclines JSON from {}", path.display()))
    }
}

#[derive(Debug, Serialize)]
struct CliOutput {
    envs: IndexMap<String, ResolveOutput>,
}

async fn actual_main() -> miette::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| get_default_env_filter(args.verbose)),
        )
        .init();

    let test_profile = match args.test_profile.as_str() {
        "none" => TestProfile::None,
        "all" => TestProfile::All,
        _ => TestProfile::TopLevel,
    };

    let env_defs = parse_envs(&args.envs);
    let enabled: Option<HashSet<String>> = if args.enabled_envs.is_empty() {
        None
    } else {
        Some(args.enabled_envs.iter().cloned().collect())
    };

    let raw = read_json_input(&args.json)?;
    let speclines: Vec<SpeclineInput> = serde_json::from_str(&raw)
        .into_diagnostic()
        .wrap_err("failed to parse speclines JSON")?;

    let cli_overrides: IndexMap<String, Override> = match &args.overrides {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .into_diagnostic()
                .wrap_err_with(|| format!("failed to read overrides from {}", path.display()))?;
            serde_json::from_str(&raw)
                .into_diagnostic()
                .wrap_err("failed to parse overrides JSON")?
        }
        None => IndexMap::new(),
    };

    let extra_specs: Vec<Spec> = args
        .extra
        .iter()
        .map(|line| Spec::parse(line, "extra").into_diagnostic())
        .collect::<miette::Result<Vec<_>>>()
        .wrap_err("failed to parse --extra requirement line")?;

    let mut per_env: IndexMap<String, (Vec<Spec>, IndexMap<String, Override>, Vec<String>)> =
        IndexMap::new();
    for env in &env_defs {
        if enabled.as_ref().map(|e| e.contains(&env.name)).unwrap_or(true) {
            per_env.insert(
                env.name.clone(),
                (extra_specs.clone(), cli_overrides.clone(), Vec::new()),
            );
        }
    }

    for line in speclines {
        let normalized = normalize_specline(line)?;
        let target_envs: Vec<String> = match &normalized.envs {
            Some(list) if !list.iter().any(|e| e == "*") => list.clone(),
            _ => per_env.keys().cloned().collect(),
        };
        for env_name in target_envs {
            let Some((specs, overrides, versions)) = per_env.get_mut(&env_name) else {
                continue;
            };
            specs.push(normalized.spec.clone());
            for (name, ov) in &normalized.overrides {
                overrides.insert(name.clone(), ov.clone());
            }
            versions.extend(normalized.versions.clone());
        }
    }

    let mut outputs = IndexMap::new();
    for env in &env_defs {
        let Some((specs, overrides, versions)) = per_env.remove(&env.name) else {
            continue;
        };
        if specs.is_empty() {
            continue;
        }

        let cache_dir = args.cache_root.join(&env.name);
        let caches = CacheSet::open(&cache_dir, &env.name);
        if args.update {
            caches.invalidate_links().into_diagnostic()?;
        }

        let http = reqwest::Client::new();
        let index_url = url::Url::parse("https://pypi.org/simple/").into_diagnostic()?;
        let index = Arc::new(HttpIndex::new(http.clone(), index_url));
        let artifacts = Arc::new(HttpArtifactStore::new(
            http.clone(),
            args.download_cache_root.clone(),
        ));
        let introspector = Arc::new(SubprocessIntrospector::new(env.interpreter.clone()));

        let orchestrator = Orchestrator::new(index, artifacts, introspector, http, test_profile, true);
        let result = orchestrator
            .resolve(caches, specs, overrides, versions)
            .await
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to resolve environment {}", env.name))?;
        outputs.insert(env.name.clone(), result);
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&CliOutput { envs: outputs }).into_diagnostic()?
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = actual_main().await {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

/// Mirrors the teacher's `get_default_env_filter`: info-level for this
/// crate's own events, with `-v` additionally surfacing `pypi_resolve`
/// debug-level cache/hook activity.
fn get_default_env_filter(verbose: bool) -> EnvFilter {
    let mut result = EnvFilter::new("pypi_resolve_cli=info")
        .add_directive(Directive::from_str("pypi_resolve=info").unwrap());
    if verbose {
        result = result.add_directive(Directive::from_str("pypi_resolve=debug").unwrap());
    }
    result
}
