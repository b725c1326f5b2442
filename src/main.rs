use anyhow::{bail, Context, Result};
use std::path::PathBuf;

use curio::config::Config;
use curio::db::{Database, FilterCriteria};
use curio::logging;
use curio::tasks::{RegisterImagesTask, SearchTask, TaskEvent, TaskManager, TaskOutput};

enum Command {
    Search { criteria: FilterCriteria, json: bool },
    Register { directory: PathBuf },
}

struct Cli {
    config_path: Option<PathBuf>,
    command: Command,
}

fn value_of(args: &[String], i: usize, flag: &str) -> Result<String> {
    args.get(i + 1)
        .cloned()
        .with_context(|| format!("{flag} requires an argument"))
}

fn parse_search(args: &[String]) -> Result<Command> {
    let mut tags = Vec::new();
    let mut criteria = FilterCriteria::new();
    let mut json = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--tag" | "-t" => {
                tags.push(value_of(args, i, "--tag")?);
                i += 1;
            }
            "--any" => criteria = criteria.match_any(),
            "--caption" => {
                criteria = criteria.with_caption(value_of(args, i, "--caption")?);
                i += 1;
            }
            "--resolution" | "-r" => {
                let value = value_of(args, i, "--resolution")?;
                let resolution = value
                    .parse::<u32>()
                    .with_context(|| format!("invalid resolution {value:?}"))?;
                criteria = criteria.with_resolution(resolution);
                i += 1;
            }
            "--untagged" => criteria = criteria.untagged_only(),
            "--nsfw" => criteria = criteria.with_nsfw(true),
            "--rating" => {
                criteria = criteria.with_manual_rating(value_of(args, i, "--rating")?);
                i += 1;
            }
            "--json" => json = true,
            other => bail!("Unknown search argument: {other}"),
        }
        i += 1;
    }

    Ok(Command::Search {
        criteria: criteria.with_tags(tags),
        json,
    })
}

fn parse_args() -> Result<Cli> {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("curio {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                config_path = Some(PathBuf::from(value_of(&args, i, "--config")?));
                i += 1;
            }
            "search" => {
                let command = parse_search(&args[i + 1..])?;
                return Ok(Cli {
                    config_path,
                    command,
                });
            }
            "register" => {
                let directory = PathBuf::from(value_of(&args, i, "register")?);
                if i + 2 < args.len() {
                    bail!("Unexpected argument: {}", args[i + 2]);
                }
                return Ok(Cli {
                    config_path,
                    command: Command::Register { directory },
                });
            }
            other => bail!("Unknown argument: {other}"),
        }
        i += 1;
    }

    bail!("No command given, see --help")
}

fn print_help() {
    println!(
        r#"curio - image dataset catalogue

USAGE:
    curio [OPTIONS] search [SEARCH OPTIONS]
    curio [OPTIONS] register DIR

OPTIONS:
    --config, -c PATH     Path to config file
    --version, -V         Show version
    --help, -h            Show this help message

SEARCH OPTIONS:
    --tag, -t TAG         Tag term (repeatable); "quoted" for exact, * as wildcard
    --any                 Match any tag instead of all
    --caption TEXT        Caption term
    --resolution, -r N    Long edge of the wanted variant (0 = original)
    --untagged            Only images without tags
    --nsfw                Include R/X/XXX rated images
    --rating R            Manual rating filter
    --json                Print results as JSON

ENVIRONMENT:
    CURIO_CONFIG          Path to config file (overrides default location)
    CURIO_LOG             Log filter (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/curio/config.toml"#
    );
}

fn print_output(output: &TaskOutput, json: bool) -> Result<()> {
    match output {
        TaskOutput::Search { records, count } => {
            if json {
                println!("{}", serde_json::to_string_pretty(records)?);
            } else {
                for record in records {
                    println!(
                        "{}\t{}x{}\t{}",
                        record.image_id, record.width, record.height, record.stored_image_path
                    );
                }
                eprintln!("{count} images");
            }
        }
        TaskOutput::Registered(summary) => {
            println!(
                "{} new, {} already registered, {} failed",
                summary.created,
                summary.existing,
                summary.failed.len()
            );
            for (path, error) in &summary.failed {
                eprintln!("  {}: {}", path.display(), error);
            }
        }
        TaskOutput::Thumbnails(batch) => {
            println!(
                "{} thumbnails, {} failed",
                batch.thumbnails.len(),
                batch.failed.len()
            );
            for (image_id, error) in &batch.failed {
                eprintln!("  image {image_id}: {error}");
            }
        }
        TaskOutput::Annotated(summary) => {
            println!("{} annotated, {} failed", summary.annotated, summary.failed)
        }
        TaskOutput::Message(message) => println!("{message}"),
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = match parse_args() {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("Error: {e:#}");
            print_help();
            std::process::exit(1);
        }
    };

    if let Err(e) = logging::init(Some(Config::config_dir().join("logs"))) {
        eprintln!("Warning: logging disabled: {e:#}");
    }

    let config = match cli.config_path {
        Some(ref path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let db = Database::open_initialized(&config.db_path)
        .with_context(|| format!("opening database {}", config.db_path.display()))?;
    let manager = TaskManager::new(&config.tasks);
    let events = manager.subscribe();

    let json = match cli.command {
        Command::Search { criteria, json } => {
            manager.start("search-1", SearchTask::new(db, criteria));
            json
        }
        Command::Register { directory } => {
            let task =
                RegisterImagesTask::from_directory(db, &directory, &config.scanner.image_extensions)?;
            manager.start("register-1", task);
            false
        }
    };

    let mut failed = false;
    for event in events.iter() {
        match event {
            TaskEvent::Progress { progress, .. } if !json => {
                eprintln!("[{:>3}%] {}", progress.percentage, progress.message);
            }
            TaskEvent::Completed { output, .. } => print_output(&output, json)?,
            TaskEvent::Failed { error, .. } => {
                eprintln!("Error: {error}");
                failed = true;
            }
            TaskEvent::Canceled { id } => eprintln!("{id} canceled"),
            TaskEvent::AllFinished => break,
            _ => {}
        }
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}
