//! Layer Guard CLI - Command-line interface for layering checks
//!
//! Architecture: Application Layer - CLI coordinates user interactions with domain services
//! - Translates user commands to checker operations
//! - Handles external concerns like file I/O, process exit codes, and terminal output

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use layer_guard::config::DEFAULT_CONFIG_FILES;
use layer_guard::{
    CheckStatus, LayerConfig, LayerError, LayerGuard, LayerResult, NamespacePath, OutputFormat,
    ReportFormatter, ReportOptions, ScanOptions, Severity, TestCodePolicy,
};
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

/// Layer Guard - Keep dependency directions between code layers honest
#[derive(Parser)]
#[command(name = "layer-guard")]
#[command(version)]
#[command(about = "Checks that service and repository code never depends on the web layer")]
#[command(long_about = "Layer Guard builds a dependency snapshot of a Rust crate, groups its modules and items into layers by namespace pattern, and reports every reference that crosses a forbidden direction. Designed for CI pipelines and test harnesses.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a crate for layering violations
    Check(CheckArgs),

    /// Write the dependency snapshot of a crate as JSON
    Snapshot {
        /// Crate directory or source file (defaults to current directory)
        path: Option<PathBuf>,

        /// Root namespace (defaults to the configured root or the directory name)
        #[arg(long)]
        root: Option<String>,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Additional exclude patterns
        #[arg(long, action = clap::ArgAction::Append)]
        exclude: Vec<String>,
    },

    /// Validate configuration file
    ValidateConfig {
        /// Configuration file to validate
        config_file: Option<PathBuf>,
    },

    /// List configured groups and rules
    Rules {
        /// Show only enabled rules
        #[arg(long)]
        enabled_only: bool,
    },

    /// Explain a rule id, or which groups and rules apply to a namespace
    Explain {
        /// Rule id or namespace such as `shop::service::OrderService`
        target: String,
    },
}

#[derive(Args)]
struct CheckArgs {
    /// Crate directory, source file or JSON snapshot (defaults to current directory)
    path: Option<PathBuf>,

    /// Treat PATH as a JSON snapshot regardless of its extension
    #[arg(long)]
    snapshot: bool,

    /// Whether test code takes part in the check (required without a config file)
    #[arg(long, value_enum)]
    tests: Option<TestsArg>,

    /// Root namespace (defaults to the configured root or the directory name)
    #[arg(long)]
    root: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "human")]
    format: OutputFormatArg,

    /// Minimum severity level to report
    #[arg(short, long, value_enum)]
    severity: Option<SeverityArg>,

    /// Maximum number of violations to report
    #[arg(long)]
    max_violations: Option<usize>,

    /// Additional exclude patterns
    #[arg(long, action = clap::ArgAction::Append)]
    exclude: Vec<String>,

    /// Ignore .layerguardignore files
    #[arg(long)]
    no_ignore: bool,

    /// Disable parallel parsing
    #[arg(long)]
    no_parallel: bool,

    /// Fail on the first unparseable file
    #[arg(long)]
    fail_fast: bool,
}

#[derive(Copy, Clone, ValueEnum, PartialEq, Debug)]
enum OutputFormatArg {
    Human,
    Json,
    Junit,
    Sarif,
    Github,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Human => OutputFormat::Human,
            OutputFormatArg::Json => OutputFormat::Json,
            OutputFormatArg::Junit => OutputFormat::Junit,
            OutputFormatArg::Sarif => OutputFormat::Sarif,
            OutputFormatArg::Github => OutputFormat::GitHub,
        }
    }
}

#[derive(Copy, Clone, ValueEnum, Debug)]
enum SeverityArg {
    Info,
    Warning,
    Error,
}

impl From<SeverityArg> for Severity {
    fn from(arg: SeverityArg) -> Self {
        match arg {
            SeverityArg::Info => Severity::Info,
            SeverityArg::Warning => Severity::Warning,
            SeverityArg::Error => Severity::Error,
        }
    }
}

#[derive(Copy, Clone, ValueEnum, PartialEq, Debug)]
enum TestsArg {
    Exclude,
    Include,
}

impl From<TestsArg> for TestCodePolicy {
    fn from(arg: TestsArg) -> Self {
        match arg {
            TestsArg::Exclude => TestCodePolicy::Exclude,
            TestsArg::Include => TestCodePolicy::Include,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match run_command(cli).context("layer-guard failed") {
        Ok(exit_code) => process::exit(exit_code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}

fn run_command(cli: Cli) -> LayerResult<i32> {
    let use_colors = !cli.no_color;
    match cli.command {
        Commands::Check(args) => run_check(cli.config, args, use_colors),
        Commands::Snapshot { path, root, output, exclude } => {
            run_snapshot(cli.config, path, root, output, exclude)
        }
        Commands::ValidateConfig { config_file } => run_validate_config(config_file.or(cli.config)),
        Commands::Rules { enabled_only } => run_list_rules(cli.config, enabled_only),
        Commands::Explain { target } => run_explain(cli.config, &target),
    }
}

/// Load the explicit config file, or one of the default names in the working directory
fn load_config(config_path: Option<PathBuf>) -> LayerResult<Option<LayerConfig>> {
    match config_path {
        Some(path) => LayerConfig::load_from_file(path).map(Some),
        None => LayerConfig::discover("."),
    }
}

/// Guess a root namespace from a crate directory name
fn root_from_dir(path: &Path) -> String {
    let dir = if path.is_file() { path.parent().unwrap_or(path) } else { path };
    let dir = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    let name = match dir.file_name().and_then(|n| n.to_str()) {
        Some("src") => dir.parent().and_then(|p| p.file_name()).and_then(|n| n.to_str()),
        other => other,
    }
    .unwrap_or("crate_root");

    let mut root: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if root.is_empty() || root.starts_with(|c: char| c.is_ascii_digit()) {
        root.insert(0, '_');
    }
    tracing::debug!("No root namespace given, using '{}'", root);
    root
}

/// Build the effective configuration for a check from file and flags
fn resolve_config(
    config_path: Option<PathBuf>,
    target: &Path,
    root: Option<String>,
    tests: Option<TestsArg>,
) -> LayerResult<LayerConfig> {
    let mut config = match load_config(config_path)? {
        Some(config) => config,
        None => {
            let tests = tests.ok_or_else(|| {
                LayerError::config(format!(
                    "No configuration file found ({}) and no --tests option given; \
                     choose --tests exclude or --tests include",
                    DEFAULT_CONFIG_FILES.join(", ")
                ))
            })?;
            let root = root.clone().unwrap_or_else(|| root_from_dir(target));
            LayerConfig::with_defaults(root, tests.into())
        }
    };

    if let Some(root) = root {
        config.root = root;
    }
    if let Some(tests) = tests {
        config.test_code = tests.into();
    }
    config.validate()?;
    Ok(config)
}

fn run_check(config_path: Option<PathBuf>, args: CheckArgs, use_colors: bool) -> LayerResult<i32> {
    let path = args.path.unwrap_or_else(|| PathBuf::from("."));
    let config = resolve_config(config_path, &path, args.root, args.tests)?;

    let guard = LayerGuard::new_with_config(config)?.with_report_formatter(ReportFormatter::new(
        ReportOptions {
            use_colors,
            max_violations: args.max_violations,
            min_severity: args.severity.map(Into::into),
            ..Default::default()
        },
    ));

    let report = if args.snapshot {
        guard.check_snapshot_file(&path)?
    } else {
        let options = ScanOptions {
            parallel: !args.no_parallel,
            fail_fast: args.fail_fast,
            exclude_patterns: args.exclude,
            ignore_ignore_files: args.no_ignore,
        };
        guard.check_source(&path, &options)?
    };

    let formatted = guard.format_report(&report, args.format.into())?;
    println!("{}", formatted);

    Ok(exit_code(report.status()))
}

fn exit_code(status: CheckStatus) -> i32 {
    match status {
        CheckStatus::Conformant => 0,
        CheckStatus::NonConformant => 1,
        CheckStatus::NothingChecked => 2,
    }
}

fn run_snapshot(
    config_path: Option<PathBuf>,
    path: Option<PathBuf>,
    root: Option<String>,
    output: Option<PathBuf>,
    exclude: Vec<String>,
) -> LayerResult<i32> {
    let path = path.unwrap_or_else(|| PathBuf::from("."));
    // Test units stay in the snapshot, flagged; the policy only matters when checking.
    let config = resolve_config(config_path, &path, root, Some(TestsArg::Include))?;
    let guard = LayerGuard::new_with_config(config)?;

    let options = ScanOptions { exclude_patterns: exclude, ..Default::default() };
    let outcome = guard.build_snapshot(&path, &options)?;
    for warning in &outcome.warnings {
        eprintln!("⚠️  {}", warning.format_display());
    }

    let json = outcome.snapshot.to_json()?;
    match output {
        Some(output) => {
            std::fs::write(&output, json)?;
            eprintln!(
                "📦 Wrote {} units and {} references from {} files to {}",
                outcome.snapshot.len(),
                outcome.snapshot.reference_count(),
                outcome.files_scanned,
                output.display()
            );
        }
        None => println!("{}", json),
    }

    Ok(0)
}

fn run_validate_config(config_path: Option<PathBuf>) -> LayerResult<i32> {
    let config_path = config_path
        .or_else(|| {
            DEFAULT_CONFIG_FILES
                .iter()
                .map(PathBuf::from)
                .find(|candidate| candidate.is_file())
        })
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILES[0]));

    println!("Validating configuration: {}", config_path.display());

    match LayerConfig::load_from_file(&config_path) {
        Ok(config) => {
            println!("✅ Configuration is valid");

            let enabled_rules = config.enabled_rules().count();
            let patterns: usize = config.groups.values().map(|g| g.patterns.len()).sum();

            println!("📊 Configuration summary:");
            println!("  Root: {} (test code: {})", config.root, config.test_code.as_str());
            println!("  Groups: {} ({} patterns)", config.groups.len(), patterns);
            println!("  Rules: {} total, {} enabled", config.rules.len(), enabled_rules);
            println!("  Path patterns: {}", config.paths.patterns.len());
            println!("  Fingerprint: {}", config.fingerprint());

            Ok(0)
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed: {}", e);
            Ok(1)
        }
    }
}

/// Configuration used by the informational commands
fn informational_config(config_path: Option<PathBuf>) -> LayerResult<LayerConfig> {
    match load_config(config_path)? {
        Some(config) => Ok(config),
        None => Ok(LayerConfig::with_defaults(root_from_dir(Path::new(".")), TestCodePolicy::Exclude)),
    }
}

fn run_list_rules(config_path: Option<PathBuf>, enabled_only: bool) -> LayerResult<i32> {
    let config = informational_config(config_path)?;

    println!("📂 Groups (root '{}')\n", config.root);
    for (name, group) in &config.groups {
        let description = group.description.as_deref().unwrap_or("");
        println!("  {} {}", name, description);
        for pattern in &group.patterns {
            println!("    - {}", pattern);
        }
    }

    println!("\n📋 Rules\n");
    for rule in &config.rules {
        if enabled_only && !rule.enabled {
            continue;
        }

        let status = if rule.enabled { "✅" } else { "❌" };
        println!(
            "  {}🔍 {} [{}] {} -/-> {}",
            status,
            rule.id,
            rule.severity.as_str(),
            rule.sources.join(", "),
            rule.forbidden.join(", ")
        );
        println!("      {}", rule.because);
    }

    Ok(0)
}

fn run_explain(config_path: Option<PathBuf>, target: &str) -> LayerResult<i32> {
    let config = informational_config(config_path)?;

    if let Some(rule) = config.find_rule(target) {
        println!("📖 Rule: {}", rule.id);
        println!("⚠️ Severity: {}", rule.severity.as_str());
        println!("✅ Enabled: {}", rule.enabled);
        println!();
        println!("📝 Because:");
        println!("   {}", rule.because);
        println!();
        println!("🚫 Units in [{}] must not reference units in [{}]", rule.sources.join(", "), rule.forbidden.join(", "));
        for group in rule.sources.iter().chain(&rule.forbidden) {
            if let Some(config) = config.groups.get(group) {
                println!("   {}: {}", group, config.patterns.join(", "));
            }
        }
        return Ok(0);
    }

    if target.contains("::") {
        let guard = LayerGuard::new_with_config(config)?;
        let namespace = NamespacePath::parse(target);
        let groups = guard.checker().groups_matching(&namespace);

        println!("🔎 Namespace: {}", namespace);
        if groups.is_empty() {
            println!("   Not in any group; no rule restricts it");
            return Ok(0);
        }
        println!("   Groups: {}", groups.join(", "));

        for rule in guard.checker().config().enabled_rules() {
            if rule.sources.iter().any(|s| groups.contains(&s.as_str())) {
                println!("   ➡️  {}: must not reference [{}]", rule.id, rule.forbidden.join(", "));
            }
            if rule.forbidden.iter().any(|f| groups.contains(&f.as_str())) {
                println!("   ⬅️  {}: must not be referenced from [{}]", rule.id, rule.sources.join(", "));
            }
        }
        return Ok(0);
    }

    eprintln!("❌ '{}' is neither a rule id nor a namespace", target);
    println!();
    println!("Available rules:");
    for rule in &config.rules {
        println!("  - {}", rule.id);
    }

    Ok(1)
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn shop_crate(service_body: &str) -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        fs::create_dir_all(&src).unwrap();

        fs::write(src.join("lib.rs"), "pub mod service;\npub mod web;\n").unwrap();
        fs::write(src.join("web.rs"), "pub struct OrderController;\n").unwrap();
        fs::write(src.join("service.rs"), service_body).unwrap();

        temp_dir
    }

    fn check_args(path: &Path, tests: Option<TestsArg>) -> CheckArgs {
        CheckArgs {
            path: Some(path.to_path_buf()),
            snapshot: false,
            tests,
            root: Some("shop".to_string()),
            format: OutputFormatArg::Json,
            severity: None,
            max_violations: None,
            exclude: vec![],
            no_ignore: false,
            no_parallel: false,
            fail_fast: false,
        }
    }

    #[test]
    fn test_parse_check_arguments() {
        let cli = Cli::try_parse_from([
            "layer-guard", "--no-color", "check", "crates/shop", "--tests", "include",
            "--format", "sarif", "--exclude", "generated/", "--no-parallel",
        ])
        .unwrap();

        assert!(cli.no_color);
        match cli.command {
            Commands::Check(args) => {
                assert_eq!(args.path, Some(PathBuf::from("crates/shop")));
                assert_eq!(args.tests, Some(TestsArg::Include));
                assert_eq!(args.format, OutputFormatArg::Sarif);
                assert_eq!(args.exclude, vec!["generated/".to_string()]);
                assert!(args.no_parallel);
            }
            _ => panic!("expected check command"),
        }

        assert!(Cli::try_parse_from(["layer-guard", "check", "--tests", "sometimes"]).is_err());
    }

    #[test]
    fn test_check_exit_codes() {
        let clean = shop_crate("pub struct OrderService;\n");
        let result = run_check(None, check_args(clean.path(), Some(TestsArg::Exclude)), false);
        assert_eq!(result.unwrap(), 0);

        let violating = shop_crate("pub struct OrderService(crate::web::OrderController);\n");
        let result = run_check(None, check_args(violating.path(), Some(TestsArg::Exclude)), false);
        assert_eq!(result.unwrap(), 1);

        let empty = TempDir::new().unwrap();
        let result = run_check(None, check_args(empty.path(), Some(TestsArg::Exclude)), false);
        assert_eq!(result.unwrap(), 2);
    }

    #[test]
    fn test_check_requires_test_scoping() {
        let temp_dir = shop_crate("pub struct OrderService;\n");
        let missing = temp_dir.path().join("no_such_config.yaml");

        // An explicit but missing config file is an error, not a silent default
        assert!(run_check(Some(missing), check_args(temp_dir.path(), None), false).is_err());

        let config_path = temp_dir.path().join("layer_guard.yaml");
        let config = LayerConfig::with_defaults("shop", TestCodePolicy::Include);
        fs::write(&config_path, config.to_yaml().unwrap()).unwrap();

        let result = run_check(Some(config_path), check_args(temp_dir.path(), None), false);
        assert_eq!(result.unwrap(), 0);
    }

    #[test]
    fn test_snapshot_then_check() {
        let temp_dir = shop_crate("pub fn render() -> crate::web::OrderController {\n    crate::web::OrderController\n}\n");
        let output = temp_dir.path().join("graph.json");

        let result = run_snapshot(None, Some(temp_dir.path().to_path_buf()), Some("shop".to_string()), Some(output.clone()), vec![]);
        assert_eq!(result.unwrap(), 0);
        assert!(output.is_file());

        let mut args = check_args(&output, Some(TestsArg::Exclude));
        args.snapshot = true;
        assert_eq!(run_check(None, args, false).unwrap(), 1);
    }

    #[test]
    fn test_validate_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("layer_guard.yaml");

        let config = LayerConfig::with_defaults("shop", TestCodePolicy::Exclude);
        fs::write(&config_file, config.to_yaml().unwrap()).unwrap();
        assert_eq!(run_validate_config(Some(config_file.clone())).unwrap(), 0);

        fs::write(&config_file, "version: \"1.0\"\nroot: shop\ngroups: {}\nrules: []\n").unwrap();
        assert_eq!(run_validate_config(Some(config_file)).unwrap(), 1);
    }

    #[test]
    fn test_explain() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("layer_guard.yaml");
        let config = LayerConfig::with_defaults("shop", TestCodePolicy::Exclude);
        fs::write(&config_file, config.to_yaml().unwrap()).unwrap();

        let explain = |target: &str| run_explain(Some(config_file.clone()), target).unwrap();
        assert_eq!(explain("services_and_repositories_must_not_depend_on_web"), 0);
        assert_eq!(explain("shop::service::OrderService"), 0);
        assert_eq!(explain("nonexistent_rule"), 1);

        assert_eq!(run_list_rules(Some(config_file.clone()), true).unwrap(), 0);
    }

    #[test]
    fn test_root_from_dir() {
        let temp_dir = TempDir::new().unwrap();
        let crate_dir = temp_dir.path().join("order-service");
        fs::create_dir_all(crate_dir.join("src")).unwrap();

        assert_eq!(root_from_dir(&crate_dir), "order_service");
        assert_eq!(root_from_dir(&crate_dir.join("src")), "order_service");
    }
}
