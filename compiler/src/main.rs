extern crate slatec;
extern crate toml;
extern crate serde;
extern crate clap;

use std::fs::{File, read_to_string};
use std::io::{self, BufWriter, Write};
use std::process::exit;

use clap::{Arg, App};
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use slatec::codegen::write_x86;
use slatec::frontend;
use slatec::interpreter::eval;


const DEFAULT_CONFIG: &str = "slatec.toml";

#[derive(Deserialize, Clone, Copy, Debug, PartialEq)]
enum Backend {
    X86,
    Evaluator,
}

impl Default for Backend {
    fn default() -> Backend {
        Backend::X86
    }
}

#[derive(Deserialize, Default, Debug)]
#[serde(default)]
struct Config {
    backend: Backend,
    verbose: bool,
}


fn load_config(path: Option<&str>) -> Config {
    let config_str = match path {
        Some(path) => read_to_string(path).unwrap_or_else(|err| {
            eprintln!("could not read config file: {}", err);
            exit(1);
        }),
        None => match read_to_string(DEFAULT_CONFIG) {
            Ok(s) => s,
            Err(_) => return Config::default(),
        },
    };
    toml::from_str(&config_str).unwrap_or_else(|err| {
        eprintln!("incorrect configuration: {}", err);
        exit(1);
    })
}


fn init_tracing(verbose: bool) {
    let default = if verbose { LevelFilter::DEBUG } else { LevelFilter::WARN };
    let env_filter = EnvFilter::builder()
        .with_default_directive(default.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .init();
}


fn asm_path(input_path: &str) -> String {
    match input_path.strip_suffix(".sl") {
        Some(base) => format!("{}.asm", base),
        None => format!("{}.asm", input_path),
    }
}


fn main() -> io::Result<()> {
    let arg_matches = App::new("Slate compiler")
        .author("Pawel Stiasny <pawelstiasny@gmail.com>")
        .about("Compiler and evaluator for the Slate language")
        .arg(Arg::with_name("config")
             .short("-c")
             .value_name("FILE")
             .help("Compiler config TOML file")
             .takes_value(true))
        .arg(Arg::with_name("INPUT")
            .help("Source file")
            .required(true)
            .index(1))
        .arg(Arg::with_name("output")
             .short("-o")
             .value_name("FILE")
             .help("Assembly file path")
             .takes_value(true))
        .arg(Arg::with_name("eval")
             .short("-e")
             .long("eval")
             .help("Run the program with the evaluator instead of compiling it"))
        .arg(Arg::with_name("verbose")
             .short("-v")
             .help("Verbose output"))
        .get_matches();

    let config = load_config(arg_matches.value_of("config"));
    init_tracing(config.verbose || arg_matches.occurrences_of("verbose") > 0);

    let backend = if arg_matches.is_present("eval") {
        Backend::Evaluator
    } else {
        config.backend
    };

    let input_path = arg_matches.value_of("INPUT").unwrap_or_default();
    let input = read_to_string(input_path).unwrap_or_else(|err| {
        eprintln!("could not read source file: {}", err);
        exit(1);
    });

    let program = frontend(&input, Some(input_path)).unwrap_or_else(|diagnostic| {
        eprintln!("{}", diagnostic.render(&input));
        exit(1);
    });

    match backend {
        Backend::Evaluator => {
            let status = eval(program, io::stdout()).unwrap_or_else(|err| {
                eprintln!("[error] {}", err);
                exit(1);
            });
            info!(status, "evaluation finished");
            exit(status);
        }
        Backend::X86 => {
            let output_path = arg_matches.value_of("output")
                .map(str::to_string)
                .unwrap_or_else(|| asm_path(input_path));
            let mut outfile = BufWriter::new(File::create(&output_path)?);
            if let Err(err) = write_x86(&program, &mut outfile) {
                eprintln!("[error] {}", err);
                exit(1);
            }
            outfile.flush()?;
            info!(path = %output_path, "wrote assembly");
        }
    }
    Ok(())
}
