//! CLI tests

use crate::{Cli, Commands, ConfigAction, OutputFormat};
use clap::{CommandFactory, Parser};
use std::path::PathBuf;

#[test]
fn test_cli_definition_is_valid() {
    Cli::command().debug_assert();
}

#[test]
fn test_parse_load_with_dump_dir() {
    let cli = Cli::try_parse_from(["softkb", "load", "--dump-dir", "dumps"]).unwrap();
    match cli.command {
        Commands::Load { dump_dir } => assert_eq!(dump_dir, Some(PathBuf::from("dumps"))),
        _ => panic!("expected load"),
    }
}

#[test]
fn test_parse_reset_flags() {
    let cli = Cli::try_parse_from(["softkb", "reset", "--raw"]).unwrap();
    match cli.command {
        Commands::Reset { raw, cache } => {
            assert!(raw);
            assert!(!cache);
        }
        _ => panic!("expected reset"),
    }
}

#[test]
fn test_parse_show_with_global_flags() {
    let args = ["softkb", "show", "software/Q42", "--staging", "--format", "json", "-q"];
    let cli = Cli::try_parse_from(args).unwrap();
    assert_eq!(cli.format, OutputFormat::Json);
    assert!(cli.quiet);
    match cli.command {
        Commands::Show { id, staging } => {
            assert_eq!(id, "software/Q42");
            assert!(staging);
        }
        _ => panic!("expected show"),
    }
}

#[test]
fn test_parse_config_set() {
    let args = ["softkb", "config", "set", "pipeline.page_size", "250"];
    let cli = Cli::try_parse_from(args).unwrap();
    match cli.command {
        Commands::Config {
            action: ConfigAction::Set { key, value },
        } => {
            assert_eq!(key, "pipeline.page_size");
            assert_eq!(value, "250");
        }
        _ => panic!("expected config set"),
    }
}

#[test]
fn test_unknown_subcommand_rejected() {
    assert!(Cli::try_parse_from(["softkb", "watch"]).is_err());
}
