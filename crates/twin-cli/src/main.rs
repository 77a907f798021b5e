//! `twin` command line
//!
//! - `abstract`: crawled records → dual graph snapshot
//! - `reconcile`: snapshot + target scan → classification report
//! - `seed`: show or create a tenant seed

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

mod commands;
mod logging;

fn cli() -> Command {
    let tenant = Arg::new("tenant")
        .long("tenant")
        .required(true)
        .help("Source tenant id");
    let snapshot = Arg::new("snapshot")
        .long("snapshot")
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("Graph snapshot file");

    Command::new("twin")
        .version(twin_core::VERSION)
        .about("Tenant digital twin: dual-graph abstraction and cross-tenant reconciliation")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("abstract")
                .about("Abstract crawled resources into the dual graph")
                .arg(tenant.clone())
                .arg(
                    Arg::new("input")
                        .long("input")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("JSON array of crawled resource records"),
                )
                .arg(snapshot.clone().help("Graph snapshot file (created if missing)")),
        )
        .subcommand(
            Command::new("reconcile")
                .about("Classify a tenant's abstracted resources against a target scan")
                .arg(tenant.clone())
                .arg(snapshot)
                .arg(
                    Arg::new("target")
                        .long("target")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("JSON array of target resources"),
                )
                .arg(
                    Arg::new("target-subscription")
                        .long("target-subscription")
                        .help("Subscription to rewrite resolved ids to"),
                )
                .arg(
                    Arg::new("output")
                        .long("output")
                        .value_parser(value_parser!(PathBuf))
                        .help("Write the full report as JSON"),
                )
                .arg(
                    Arg::new("plan")
                        .long("plan")
                        .value_parser(value_parser!(PathBuf))
                        .help("Write the import plan as JSON"),
                ),
        )
        .subcommand(
            Command::new("seed")
                .about("Show or create a tenant's abstraction seed")
                .arg(tenant),
        )
}

fn required<'a>(args: &'a ArgMatches, name: &str) -> anyhow::Result<&'a PathBuf> {
    args.get_one::<PathBuf>(name)
        .with_context(|| format!("--{name} is required"))
}

fn tenant_arg(args: &ArgMatches) -> anyhow::Result<twin_identity::TenantId> {
    let raw = args.get_one::<String>("tenant").context("--tenant is required")?;
    twin_identity::TenantId::new(raw.as_str()).context("invalid --tenant")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    logging::init(matches.get_flag("log-json"))?;

    let config = commands::load_config(matches.get_one::<PathBuf>("config")).await?;

    match matches.subcommand() {
        Some(("abstract", args)) => {
            let tenant = tenant_arg(args)?;
            commands::run_abstract(&config, &tenant, required(args, "input")?, required(args, "snapshot")?).await
        }
        Some(("reconcile", args)) => {
            let options = commands::ReconcileOptions {
                tenant: tenant_arg(args)?,
                snapshot: required(args, "snapshot")?.clone(),
                target: required(args, "target")?.clone(),
                target_subscription: args.get_one::<String>("target-subscription").cloned(),
                output: args.get_one::<PathBuf>("output").cloned(),
                plan: args.get_one::<PathBuf>("plan").cloned(),
            };
            commands::run_reconcile(config, options).await
        }
        Some(("seed", args)) => commands::run_seed(&config, &tenant_arg(args)?).await,
        _ => anyhow::bail!("unknown subcommand"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn reconcile_arguments_parse() {
        let matches = cli()
            .try_get_matches_from([
                "twin",
                "--log-json",
                "reconcile",
                "--tenant",
                "contoso",
                "--snapshot",
                "graph.json",
                "--target",
                "target.json",
                "--target-subscription",
                "S2",
            ])
            .unwrap();

        assert!(matches.get_flag("log-json"));
        let (name, args) = matches.subcommand().unwrap();
        assert_eq!(name, "reconcile");
        assert_eq!(tenant_arg(args).unwrap().as_str(), "contoso");
        assert_eq!(args.get_one::<String>("target-subscription").map(String::as_str), Some("S2"));
    }

    #[test]
    fn abstract_requires_input() {
        let result = cli().try_get_matches_from(["twin", "abstract", "--tenant", "t", "--snapshot", "g.json"]);
        assert!(result.is_err());
    }
}
