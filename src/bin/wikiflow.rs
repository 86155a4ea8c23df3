//! Command-line interface for wikiflow
//! Runs wiki markup (or a JSON token stream) through a named recipe and prints the result.
//!
//! Usage:
//!   wikiflow tokens `<path>` [--recipe `<recipe>`] [--config `<yaml>`] [--templates `<dir>`] [--format json|compact]
//!   wikiflow list-recipes                                   - List the registered recipes
//!
//! Logging goes to stderr; `--verbose` enables debug output, otherwise `RUST_LOG` applies.

use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::Path;
use std::rc::Rc;
use tracing_subscriber::EnvFilter;
use wikiflow::wikitext::config::PipelineOptions;
use wikiflow::wikitext::data_access::{DataAccess, DirDataAccess, MockDataAccess};
use wikiflow::wikitext::pipeline::config::InputKind;
use wikiflow::wikitext::pipeline::{recipes, PipelineExecutor};
use wikiflow::wikitext::token::utils::to_compact_string;
use wikiflow::wikitext::token::Token;

fn main() {
    let matches = Command::new("wikiflow")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Turns wiki markup into an HTML-shaped token stream")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Log pipeline activity at debug level"),
        )
        .subcommand(
            Command::new("tokens")
                .about("Run a recipe over a file")
                .arg(
                    Arg::new("path")
                        .help("Wikitext file, or a JSON token array for token recipes")
                        .required(true)
                        .index(1),
                )
                .arg(
                    Arg::new("recipe")
                        .long("recipe")
                        .short('r')
                        .help("Recipe name (see list-recipes)")
                        .default_value(recipes::TEXT_FULL),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .short('c')
                        .help("YAML file with pipeline options"),
                )
                .arg(
                    Arg::new("templates")
                        .long("templates")
                        .short('t')
                        .help("Directory holding template sources (Template:Foo -> Foo.wiki)"),
                )
                .arg(
                    Arg::new("format")
                        .long("format")
                        .short('f')
                        .help("Output format ('compact' or 'json')")
                        .value_parser(["compact", "json"])
                        .default_value("compact"),
                ),
        )
        .subcommand(Command::new("list-recipes").about("List available recipes"))
        .get_matches();

    init_logging(matches.get_flag("verbose"));

    let result = match matches.subcommand() {
        Some(("tokens", tokens_matches)) => handle_tokens_command(tokens_matches),
        Some(("list-recipes", _)) => {
            handle_list_recipes_command();
            Ok(())
        }
        _ => unreachable!(),
    };

    if let Err(message) = result {
        eprintln!("Error: {}", message);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("wikiflow=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Handle the tokens command
fn handle_tokens_command(matches: &ArgMatches) -> Result<(), String> {
    let path = matches
        .get_one::<String>("path")
        .ok_or("missing input path")?;
    let recipe = matches
        .get_one::<String>("recipe")
        .map(String::as_str)
        .unwrap_or(recipes::TEXT_FULL);
    let format = matches
        .get_one::<String>("format")
        .map(String::as_str)
        .unwrap_or("compact");

    let options = match matches.get_one::<String>("config") {
        Some(config) => PipelineOptions::load(Path::new(config)).map_err(|e| e.to_string())?,
        None => PipelineOptions::default(),
    };
    let data_access: Rc<dyn DataAccess> = match matches.get_one::<String>("templates") {
        Some(dir) => Rc::new(DirDataAccess::new(dir)),
        None => Rc::new(MockDataAccess::new()),
    };
    let executor = PipelineExecutor::with_options(options, data_access);

    let input = executor
        .registry()
        .get(recipe)
        .map(|r| r.input)
        .ok_or_else(|| format!("unknown recipe '{}'", recipe))?;
    let source =
        std::fs::read_to_string(path).map_err(|e| format!("reading {}: {}", path, e))?;

    let output = match input {
        InputKind::Text => executor.execute(recipe, &source),
        InputKind::Tokens => {
            let tokens: Vec<Token> = serde_json::from_str(&source)
                .map_err(|e| format!("{} is not a JSON token array: {}", path, e))?;
            executor.execute_tokens(recipe, tokens, "")
        }
    }
    .map_err(|e| e.to_string())?;

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(&output).map_err(|e| e.to_string())?;
            println!("{}", json);
        }
        _ => println!("{}", to_compact_string(&output)),
    }
    Ok(())
}

/// Handle the list-recipes command
fn handle_list_recipes_command() {
    let executor = PipelineExecutor::new();
    println!("Available recipes:\n");
    for recipe in executor.list_recipes() {
        println!("  {}", recipe.name);
        println!("    {}", recipe.description);
    }
}
