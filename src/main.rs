//! Marquee - scripted playback engine main entry point.
//!
//! Ticks the script runner at the script's main loop rate, drains control
//! API commands between ticks, and exits once every scripted layer has
//! played out (unless the control API is serving, in which case it waits
//! for the next script).

use marquee::cli::Args;
use marquee::core::clock::global_clocks;
use marquee::core::flag::Flag;
use marquee::core::geom::XY;
use marquee::core::interval::Interval;
use marquee::core::spline::{linear_segment, BezierSpline};
use marquee::display::driver::DisplayDriver;
use marquee::display::headless::HeadlessDriver;
use marquee::media::synth::{synth_decoder_factory, SynthConfig};
use marquee::script::data::{fix_relative_times, parse_script, Script, ScriptLayer, ScriptMedia, ScriptScreen};
use marquee::script::runner::{RunnerContext, ScriptRunner};
use marquee::server::{ApiCommand, ApiServer, SharedApiState};

use anyhow::{bail, Context};
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let default_level = match args.verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    if let Some(log_file) = &args.log_file {
        let path = log_file
            .clone()
            .unwrap_or_else(|| PathBuf::from("marquee.log"));
        let file = std::fs::File::create(&path)
            .with_context(|| format!("creating log file {}", path.display()))?;
        env_logger::Builder::new()
            .parse_filters(default_level)
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();
    } else {
        env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(default_level),
        )
        .init();
    }
    Ok(())
}

fn parse_mode(text: &str) -> Option<XY<i32>> {
    let (w, h) = text.split_once(['x', 'X'])?;
    Some(XY::new(w.trim().parse().ok()?, h.trim().parse().ok()?))
}

/// One full-screen layer playing linearly from `seek`, like a plain
/// "just play this file" invocation.
fn make_quick_script(
    media: &PathBuf,
    screen: &str,
    mode: Option<XY<i32>>,
    seek: f64,
    start: f64,
) -> Script {
    let mut script = Script::default();
    let layer = ScriptLayer {
        media: ScriptMedia {
            file: media.to_string_lossy().into_owned(),
            play: BezierSpline {
                segments: vec![linear_segment(
                    Interval::new(start, start + 1e12),
                    Interval::new(seek, seek + 1e12),
                )],
                repeat: 0.0,
            },
            buffer: 0.2,
            decoder_idle_time: 1.0,
            seek_scan_time: 1.0,
        },
        from_xy: XY::default(),
        from_size: XY::default(),
        to_xy: XY::default(),
        to_size: XY::default(),
        opacity: BezierSpline::constant(1.0),
    };
    script.screens.insert(
        screen.to_string(),
        ScriptScreen {
            mode: mode.unwrap_or(XY::new(1920, 1080)),
            mode_hz: None,
            layers: vec![layer],
        },
    );
    script
}

fn load_script_file(path: &PathBuf, start: f64) -> anyhow::Result<Script> {
    info!("Loading script: {}", path.display());
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading script {}", path.display()))?;
    let mut script = parse_script(&text)
        .with_context(|| format!("parsing script {}", path.display()))?;
    fix_relative_times(&mut script, start);
    Ok(script)
}

fn run(args: Args) -> anyhow::Result<()> {
    let clocks = global_clocks();

    // The real KMS driver lives outside this crate; playback runs against
    // the headless driver, which logs every presentation.
    let driver: Arc<dyn DisplayDriver> = Arc::new(HeadlessDriver::with_default_screen());

    if args.list_screens {
        println!("=== Screens ===");
        for screen in driver.scan_screens()? {
            let detected = if screen.display_detected { "connected" } else { "-" };
            println!("  [{}] {} ({})", screen.id, screen.connector, detected);
            for mode in &screen.modes {
                println!("        {}", mode);
            }
        }
        return Ok(());
    }

    let start = clocks.monotonic();
    info!("Start: {:.3}s epoch, {:.3}s monotonic", clocks.realtime(), start);
    let mut script = if let Some(path) = &args.script {
        load_script_file(path, start)?
    } else if let Some(media) = &args.media {
        let mode = match &args.mode {
            Some(text) => Some(
                parse_mode(text)
                    .with_context(|| format!("bad --mode \"{}\" (expected WxH)", text))?,
            ),
            None => None,
        };
        make_quick_script(media, &args.screen, mode, args.seek, start)
    } else if args.port > 0 {
        Script::default() // wait for a script over the API
    } else {
        bail!("nothing to play: pass --script, --media, or --port");
    };

    let notify = Arc::new(Flag::new(Arc::clone(&clocks)));
    let mut runner = ScriptRunner::new(RunnerContext {
        driver,
        clocks: Arc::clone(&clocks),
        decoder_factory: synth_decoder_factory(SynthConfig::default()),
        notify: Some(notify),
    })?;

    let api = if args.port > 0 {
        let state = Arc::new(SharedApiState::default());
        let rx = ApiServer::start(args.port, Arc::clone(&state));
        Some((rx, state))
    } else {
        None
    };

    let waiter = Flag::new(Arc::clone(&clocks));
    let mut loop_time: f64 = 0.0;
    loop {
        let period = 1.0 / script.main_loop_hz.max(1.0);
        loop_time = clocks.monotonic().max(loop_time + period);
        waiter.wait_until(loop_time);

        if let Some((rx, _)) = &api {
            while let Ok(command) = rx.try_recv() {
                match command {
                    ApiCommand::PlayScript(mut new_script) => {
                        fix_relative_times(&mut new_script, clocks.monotonic());
                        info!(
                            "Script swapped in: {} screen(s), {} standby(s)",
                            new_script.screens.len(),
                            new_script.standbys.len()
                        );
                        script = new_script;
                    }
                    ApiCommand::Stop => {
                        info!("Playback stopped via API");
                        script = Script::default();
                    }
                    ApiCommand::Quit => {
                        info!("Shutting down via API");
                        return Ok(());
                    }
                    ApiCommand::FileInfo { file, response } => {
                        let answer = runner
                            .file_info(&file)
                            .map_err(|e| (e.is_not_found(), e.to_string()));
                        let _ = response.send(answer);
                    }
                }
            }
        }

        let done = runner.update(&script);

        if let Some((_, state)) = &api {
            *state.status.write().unwrap_or_else(|e| e.into_inner()) = runner.status();
        } else if done {
            info!("All media done playing");
            break;
        }
    }

    Ok(())
}

fn main() {
    let args = Args::parse();
    if let Err(e) = init_logging(&args) {
        eprintln!("Logging setup failed: {:#}", e);
        std::process::exit(1);
    }

    match run(args) {
        Ok(()) => println!("Done!"),
        Err(e) => {
            warn!("Fatal: {:#}", e);
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
