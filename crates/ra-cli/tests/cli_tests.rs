use ra_cli::{
    annotator::AnnotatorCommands, export::ExportsCommands, lease::LeaseCommands,
    tasks::{StatusFilter, TaskCommands},
    Cli, Commands, Parser,
};
use ra_core::TaskId;
use std::path::PathBuf;

#[test]
fn test_cli_parsing_global_options() {
    let cli = Cli::try_parse_from(["ra", "--home", "/srv/ra", "exports", "list", "--log-level", "debug"])
        .unwrap();
    assert_eq!(cli.home, Some(PathBuf::from("/srv/ra")));
    assert_eq!(cli.log_level, "debug");
    assert!(matches!(
        cli.command,
        Commands::Exports {
            subcommand: ExportsCommands::List
        }
    ));
}

#[test]
fn test_cli_parsing_ingest_requires_files() {
    let cli = Cli::try_parse_from(["ra", "ingest", "a.jpg", "b.png"]).unwrap();
    match cli.command {
        Commands::Ingest(args) => assert_eq!(args.files.len(), 2),
        _ => panic!("expected ingest"),
    }
    assert!(Cli::try_parse_from(["ra", "ingest"]).is_err());
}

#[test]
fn test_cli_parsing_tasks_list() {
    let cli = Cli::try_parse_from(["ra", "tasks", "list", "--page", "2", "--status", "completed"])
        .unwrap();
    match cli.command {
        Commands::Tasks {
            subcommand: TaskCommands::List(args),
        } => {
            assert_eq!(args.page, 2);
            assert_eq!(args.page_size, 10);
            assert_eq!(args.status, Some(StatusFilter::Completed));
        }
        _ => panic!("expected tasks list"),
    }
    assert!(Cli::try_parse_from(["ra", "tasks", "list", "--status", "leased"]).is_err());
}

#[test]
fn test_cli_parsing_tasks_reset() {
    let cli = Cli::try_parse_from(["ra", "tasks", "reset", "7", "--keep-annotations"]).unwrap();
    assert!(matches!(
        cli.command,
        Commands::Tasks {
            subcommand: TaskCommands::Reset {
                id: 7,
                keep_annotations: true
            }
        }
    ));
}

#[test]
fn test_cli_parsing_lease_acquire() {
    let cli = Cli::try_parse_from([
        "ra",
        "lease",
        "acquire",
        "--annotator",
        "3",
        "--lease-minutes",
        "0.5",
    ])
    .unwrap();
    match cli.command {
        Commands::Lease {
            subcommand:
                LeaseCommands::Acquire {
                    annotator,
                    lease_minutes,
                },
        } => {
            assert_eq!(annotator, 3);
            assert_eq!(lease_minutes, Some(0.5));
        }
        _ => panic!("expected lease acquire"),
    }
}

#[test]
fn test_cli_parsing_lease_complete() {
    let cli = Cli::try_parse_from(["ra", "lease", "complete", "9", "--annotator", "2"]).unwrap();
    assert!(matches!(
        cli.command,
        Commands::Lease {
            subcommand: LeaseCommands::Complete {
                task: 9,
                annotator: Some(2)
            }
        }
    ));

    let cli = Cli::try_parse_from(["ra", "lease", "release-all", "--annotator", "2"]).unwrap();
    assert!(matches!(
        cli.command,
        Commands::Lease {
            subcommand: LeaseCommands::ReleaseAll { annotator: 2 }
        }
    ));
}

#[test]
fn test_cli_parsing_submit_content_sources() {
    let cli = Cli::try_parse_from(["ra", "submit", "--annotator", "1", "--content", "{}"]).unwrap();
    assert!(matches!(cli.command, Commands::Submit(_)));

    let cli =
        Cli::try_parse_from(["ra", "submit", "--annotator", "1", "--content-file", "a.json"]).unwrap();
    assert!(matches!(cli.command, Commands::Submit(_)));

    assert!(Cli::try_parse_from(["ra", "submit", "--annotator", "1"]).is_err());
    assert!(Cli::try_parse_from([
        "ra",
        "submit",
        "--annotator",
        "1",
        "--content",
        "{}",
        "--content-file",
        "a.json"
    ])
    .is_err());
}

#[test]
fn test_cli_parsing_export_request() {
    let cli = Cli::try_parse_from([
        "ra",
        "export",
        "--start",
        "2024-05-01T00:00:00Z",
        "--ids",
        "3,1,3",
        "--filter",
        "basalt",
    ])
    .unwrap();
    let Commands::Export(args) = cli.command else {
        panic!("expected export");
    };
    let request = args.request().unwrap();
    assert_eq!(request.ids, Some(vec![TaskId(3), TaskId(1), TaskId(3)]));
    assert!(request.only_unexported);
    assert!(request.range.start.is_some());
    assert_eq!(request.range.end, None);
    assert_eq!(request.filename_filter.as_deref(), Some("basalt"));
}

#[test]
fn test_cli_parsing_export_defaults_and_all() {
    let cli = Cli::try_parse_from(["ra", "export", "--all"]).unwrap();
    let Commands::Export(args) = cli.command else {
        panic!("expected export");
    };
    let request = args.request().unwrap();
    assert_eq!(request.ids, None);
    assert!(!request.only_unexported);

    let cli = Cli::try_parse_from([
        "ra",
        "export",
        "--start",
        "2024-05-02T00:00:00Z",
        "--end",
        "2024-05-01T00:00:00Z",
    ])
    .unwrap();
    let Commands::Export(args) = cli.command else {
        panic!("expected export");
    };
    assert!(args.request().is_err());
    assert!(Cli::try_parse_from(["ra", "export", "--start", "yesterday"]).is_err());
}

#[test]
fn test_cli_parsing_annotator_add() {
    let cli =
        Cli::try_parse_from(["ra", "annotator", "add", "ana", "--password", "granite"]).unwrap();
    assert!(matches!(
        cli.command,
        Commands::Annotator {
            subcommand: AnnotatorCommands::Add { .. }
        }
    ));
    assert!(Cli::try_parse_from(["ra", "annotator", "add", "ana"]).is_err());
}

#[tokio::test]
async fn test_cli_runs_against_a_fresh_home() {
    let home = tempfile::TempDir::new().unwrap();
    let home_arg = home.path().to_str().unwrap();

    for args in [
        vec!["ra", "--home", home_arg, "annotator", "add", "ana", "--password", "granite"],
        vec!["ra", "--home", home_arg, "lease", "acquire", "--annotator", "1"],
        vec!["ra", "--home", home_arg, "export"],
        vec!["ra", "--home", home_arg, "exports", "list"],
    ] {
        Cli::try_parse_from(args).unwrap().run().await.unwrap();
    }

    assert!(home.path().join("state.db").is_file());
    let archives = std::fs::read_dir(home.path().join("downloads")).unwrap().count();
    assert_eq!(archives, 1);

    let duplicate = Cli::try_parse_from([
        "ra", "--home", home_arg, "annotator", "add", "ana", "--password", "x",
    ])
    .unwrap();
    assert!(duplicate.run().await.is_err());
}
