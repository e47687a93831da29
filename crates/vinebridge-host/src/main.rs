use std::path::PathBuf;
use std::process::ExitCode;

use vinebridge_host::{vst2, vst3};

struct Args {
    kind: String,
    socket_dir: PathBuf,
    module_path: PathBuf,
    group: Option<String>,
}

fn parse_args() -> Option<Args> {
    let mut positional = Vec::new();
    let mut group = None;

    let mut arguments = std::env::args().skip(1);
    while let Some(argument) = arguments.next() {
        match argument.as_str() {
            "--group" => group = arguments.next(),
            _ => positional.push(argument),
        }
    }

    let [kind, socket_dir, module_path] = positional.try_into().ok()?;
    Some(Args {
        kind,
        socket_dir: PathBuf::from(socket_dir),
        module_path: PathBuf::from(module_path),
        group,
    })
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let Some(args) = parse_args() else {
        eprintln!("usage: vinebridge-host <vst2|vst3> <socket-dir> <module> [--group <id>]");
        return ExitCode::FAILURE;
    };
    if let Some(group) = &args.group {
        tracing::debug!(%group, "group identifier received");
    }

    let outcome = match args.kind.as_str() {
        "vst2" => vst2::run(&args.socket_dir, &args.module_path),
        "vst3" => vst3::run(&args.socket_dir, &args.module_path),
        other => {
            eprintln!("unknown plugin kind: {other}");
            return ExitCode::FAILURE;
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "host process failed");
            ExitCode::FAILURE
        }
    }
}
