use std::env;
use std::process::ExitCode;

mod args;
mod flows;
mod render;


use args::AppConfig;

fn main() -> ExitCode {
    // Pre-boot: a completed self-update leaves a `<self>_old` sidecar
    // behind; clear it before anything else runs.
    if let Ok(self_path) = env::current_exe() {
        let _ = rollout_platform::cleanup_old_self(&self_path);
    }

    let style = render::current_output_style();

    let config = match args::parse_cli(env::args_os()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err:#}");
            return ExitCode::from(1);
        }
    };

    let result = match config {
        AppConfig::Generate(generate) => flows::run_generate_command(generate, style),
        AppConfig::Install(install) => flows::run_install_flow(install, style),
        AppConfig::Update(update) => flows::run_update_flow(update, style),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(1)
        }
    }
}
