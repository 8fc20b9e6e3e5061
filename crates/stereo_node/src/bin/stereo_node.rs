use anyhow::Context;
use argh::FromArgs;
use std::path::PathBuf;
use stereo_node::{
    ImageDecoder, NullEngine, PosePublisher, ProcessRuntime, StereoConfig, StereoNode,
};

#[derive(FromArgs)]
/// Stereo image ingestion and synchronization node for visual SLAM
struct Args {
    /// path to the configuration file (built-in defaults when omitted)
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// zenoh endpoint to connect to
    #[argh(option, short = 'e')]
    endpoint: Option<String>,
}

/// Split the command line into arguments `Args` understands and the rest.
///
/// Launchers append their own arguments (e.g. `--ros-args -p k:=v`); those
/// are returned separately instead of failing the parse.
fn split_args(args: &[String]) -> (Vec<&str>, Vec<&str>) {
    let mut known = Vec::new();
    let mut extra = Vec::new();
    let mut iter = args.iter().map(String::as_str);
    while let Some(arg) = iter.next() {
        match arg {
            "-c" | "--config" | "-e" | "--endpoint" => {
                known.push(arg);
                if let Some(value) = iter.next() {
                    known.push(value);
                }
            }
            "-h" | "--help" => known.push(arg),
            _ => extra.push(arg),
        }
    }
    (known, extra)
}

fn parse_args() -> (Args, Vec<String>) {
    let argv: Vec<String> = std::env::args().collect();
    let cmd = argv.first().map(String::as_str).unwrap_or("stereo_node");
    let rest = argv.get(1..).unwrap_or_default();
    let (known, extra) = split_args(rest);

    match Args::from_args(&[cmd], &known) {
        Ok(args) => (args, extra.into_iter().map(str::to_string).collect()),
        // --help, or a known option without its value
        Err(early_exit) if early_exit.status.is_ok() => {
            println!("{}", early_exit.output);
            std::process::exit(0);
        }
        Err(early_exit) => {
            eprintln!("{}", early_exit.output);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let env = env_logger::Env::default().default_filter_or("info");
    env_logger::init_from_env(env);

    let (args, extra) = parse_args();
    if !extra.is_empty() {
        log::warn!("Arguments supplied via command line are neglected: {:?}", extra);
    }

    let config = match &args.config {
        Some(path) => StereoConfig::from_file(path)
            .with_context(|| format!("Failed to load config from '{}'", path.display()))?,
        None => {
            log::info!("No config file given, using defaults");
            StereoConfig::default()
        }
    };

    let runtime = ProcessRuntime::init(args.endpoint.as_deref()).await?;
    let mut shutdown_rx = runtime.shutdown_receiver();
    let transport = runtime.transport();

    let mut node = StereoNode::new();
    node.configure(&config)?;

    let updater = PosePublisher::new(
        transport.clone(),
        &config.pose_topic,
        "map",
        node.latest_state(),
    );

    let started = tokio::select! {
        biased;

        _ = shutdown_rx.changed() => None,

        started = node.start(
            transport.as_ref(),
            ImageDecoder::new(config.decoder.output),
            NullEngine::default(),
            updater,
        ) => Some(started),
    };

    let Some(started) = started else {
        log::info!("Shutdown requested during startup");
        node.shutdown();
        runtime.close().await?;
        return Ok(());
    };
    started.context("Failed to start stereo node")?;

    node.spin(shutdown_rx).await?;
    drop(node);

    runtime.close().await?;
    log::info!("Stereo node exited");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn test_ros_args_are_set_aside() {
        let args = argv(&["--ros-args", "-p", "x:=1"]);
        let (known, extra) = split_args(&args);
        assert!(known.is_empty());
        assert_eq!(extra, vec!["--ros-args", "-p", "x:=1"]);

        let parsed = Args::from_args(&["stereo_node"], &known).unwrap();
        assert!(parsed.config.is_none());
        assert!(parsed.endpoint.is_none());
    }

    #[test]
    fn test_known_options_mixed_with_extra() {
        let args = argv(&[
            "-c",
            "stereo.yaml",
            "--ros-args",
            "-r",
            "__node:=slam",
            "--endpoint",
            "tcp/10.0.0.2:7447",
        ]);
        let (known, extra) = split_args(&args);
        assert_eq!(extra, vec!["--ros-args", "-r", "__node:=slam"]);

        let parsed = Args::from_args(&["stereo_node"], &known).unwrap();
        assert_eq!(parsed.config, Some(PathBuf::from("stereo.yaml")));
        assert_eq!(parsed.endpoint.as_deref(), Some("tcp/10.0.0.2:7447"));
    }

    #[test]
    fn test_positional_arguments_are_extra() {
        let args = argv(&["left", "right"]);
        let (known, extra) = split_args(&args);
        assert!(known.is_empty());
        assert_eq!(extra, vec!["left", "right"]);
    }
}
