mod cli;

use relmap::scenarios::{Report, Scenario};
use relmap_common::Config;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};

fn print_report(report: &Report, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{report}");
    }
    Ok(())
}

fn run_scenarios(scenarios: &[Scenario], config_path: Option<&std::path::Path>, json: bool) -> Result<()> {
    let config = Config::load_or_default(config_path)?;
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    if json && scenarios.len() > 1 {
        let mut reports = serde_json::Map::new();
        for scenario in scenarios {
            let report = scenario.run(&config.database)?;
            reports.insert(scenario.name().to_string(), serde_json::to_value(&report)?);
        }
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    for scenario in scenarios {
        if !json && scenarios.len() > 1 {
            println!("=== {}", scenario.name());
        }
        let report = scenario.run(&config.database)?;
        print_report(&report, json)?;
    }
    Ok(())
}

fn validate_config(path: Option<&std::path::Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            Config::load(p)?
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    let warnings = config.validate();
    if warnings.is_empty() {
        println!("✓ Configuration is valid");
    } else {
        for warning in &warnings {
            println!("⚠ {}", warning);
        }
    }
    match config.database.path {
        Some(ref db) => println!("  Database: {}", db.display()),
        None => println!("  Database: in-memory"),
    }
    println!("  Pool size: {}", config.database.pool_size);
    println!("  Foreign keys: {}", config.database.foreign_keys);
    println!("  Echo SQL: {}", config.database.echo);

    if warnings.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("{} configuration problem(s)", warnings.len())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "relmap=debug,relmap_db=debug,relmap_common=debug,relmap::sql=debug".to_string()
        } else {
            "relmap=warn,relmap_db=warn,relmap_common=warn,relmap::sql=debug".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_deref();
    match cli.command {
        Commands::EagerLoading => run_scenarios(&[Scenario::EagerLoading], config, cli.json),
        Commands::ManyToMany => run_scenarios(&[Scenario::ManyToMany], config, cli.json),
        Commands::All => run_scenarios(&Scenario::ALL, config, cli.json),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("relmap {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
