mod cli;

use tgconf::{ResolveOptions, Resolver, TerragruntConfig};

fn main() {
    use clap::Parser;
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("TGCONF_LOG"))
        .with_writer(std::io::stderr)
        .init();

    for new_path in cli.directory.iter() {
        match new_path.canonicalize() {
            Err(e) => {
                eprintln!(
                    "Failed to resolve path for -C/--directory {}\n{}",
                    new_path.display(),
                    e
                );
                std::process::exit(1);
            }
            Ok(cwd) => {
                if let Err(err) = std::env::set_current_dir(&cwd) {
                    eprintln!("Failed to set work directory to {}\n{}", cwd.display(), err,);
                    std::process::exit(1);
                }

                tracing::info!(directory=%cwd.display(), "Changed working directory");
            }
        }
    }

    let command_result = resolver(&cli.resolve).and_then(|resolver| match cli.command {
        cli::Command::Resolve(resolve_cli) => resolve(&resolver, resolve_cli),
        cli::Command::ShouldRun => should_run(&resolver),
        cli::Command::Eval(eval_cli) => eval(&resolver, eval_cli),
    });

    match command_result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            for error in e.chain() {
                eprintln!("{error}")
            }
            std::process::exit(2);
        }
    }
}

fn resolver(args: &cli::ResolveArgs) -> anyhow::Result<Resolver> {
    let working_dir = std::env::current_dir()?;
    let mut options = match &args.config {
        Some(config) => ResolveOptions::new(working_dir.join(config), working_dir),
        None => ResolveOptions::for_working_dir(working_dir),
    }
    .with_process_env()
    .with_pre_boot_configs(args.pre_boot_configs.clone())
    .with_boot_configs(args.boot_configs.clone())
    .erasing_unresolved(args.erase_unresolved);

    for (key, value) in &args.vars {
        options = options.with_variable(key.as_str(), value.as_str());
    }
    if let Some(download_dir) = &args.download_dir {
        options = options.with_download_dir(download_dir);
    }
    if let Some(command) = &args.command {
        options = options.with_command(command);
    }

    Ok(Resolver::new(options))
}

pub fn resolve(resolver: &Resolver, cli: cli::ResolveCommand) -> anyhow::Result<bool> {
    let config = resolver.resolve()?;
    output(&cli.output, &config)?;
    Ok(true)
}

pub fn should_run(resolver: &Resolver) -> anyhow::Result<bool> {
    let config = resolver.resolve()?;
    let answer = resolver.should_run(&config);
    println!("{answer}");
    Ok(answer)
}

pub fn eval(resolver: &Resolver, cli: cli::EvalCommand) -> anyhow::Result<bool> {
    let variables = match resolver.resolve() {
        Ok(config) => config.variables,
        Err(err) => {
            tracing::warn!(%err, "configuration not resolved, only explicit variables are available");
            resolver.options().seed_variables()
        }
    };
    println!("{}", resolver.evaluate_text(variables, &cli.text)?);
    Ok(true)
}

fn output(output: &cli::OutputArgs, config: &TerragruntConfig) -> anyhow::Result<()> {
    match output.format {
        cli::OutputFormat::Yaml => serde_yaml::to_writer(std::io::stdout(), config)?,
        cli::OutputFormat::Json => serde_json::to_writer_pretty(std::io::stdout(), config)?,
    };

    Ok(())
}
