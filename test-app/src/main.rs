// scalelink command-line tool -- finds and reads weighing scales on serial
// ports, or on a simulated scale with --mock.
//
// Usage:
//   scalelink-cli list
//   scalelink-cli decode "P 01234" "D012500" "ST,GS,+0012.50kg"
//   scalelink-cli detect --port /dev/ttyUSB0
//   scalelink-cli detect --port COM3 --baud 2400 --framing 7E1 --delimiter CRLF
//   scalelink-cli loopback --port /dev/ttyUSB0
//   scalelink-cli monitor --duration 60 --smoothing 3
//   scalelink-cli monitor --grant /dev/ttyUSB1     (press Enter to authorize)
//   scalelink-cli --mock scale monitor
//
// Logging goes to stderr and follows RUST_LOG (default: info);
// --verbose forces debug.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use rand::Rng;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

use scalelink::detect::{LoopbackTester, MissReason, ProbeEngine, ProbeResult, default_loopback_config};
use scalelink::text_io::{BareDigits, ChannelSession, DecoderConfig, TelegramDecoder};
use scalelink::transport::{HotplugWatcher, PortFilter, SerialAuthorizer, SerialChannel, list_ports};
use scalelink::{
    Authorizer, Channel, DataBits, DiagLevel, Delimiter, Framing, LinkConfig, Parity, ScaleEvent,
    StopBits, SupervisorBuilder, SupervisorInput, format_weight,
};
use scalelink_test_harness::{MockAuthorizer, MockChannel};

const MOCK_PORT: &str = "MOCK0";

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// scalelink command-line tool -- detects and reads serial weighing scales.
#[derive(Parser)]
#[command(name = "scalelink-cli", version, about)]
struct Cli {
    /// Serial port path (e.g. /dev/ttyUSB0, COM3).
    /// Required by `detect` and `loopback` unless --mock is used.
    #[arg(long, global = true)]
    port: Option<String>,

    /// Use a simulated device instead of real serial ports.
    #[arg(long, value_enum, global = true)]
    mock: Option<MockDevice>,

    /// Listening window per candidate configuration, in milliseconds.
    #[arg(long, default_value_t = 1500, global = true)]
    probe_window_ms: u64,

    /// Log at debug level regardless of RUST_LOG.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List serial ports present on this machine.
    List {
        /// Only USB serial adapters.
        #[arg(long)]
        usb_only: bool,
    },

    /// Decode telegram lines offline and print what each yields.
    Decode {
        /// Lines to decode, e.g. "P 01234".
        #[arg(required = true)]
        lines: Vec<String>,

        /// Multiplier applied to fixed-width digit fields.
        #[arg(long, default_value_t = 0.001)]
        scale_factor: f64,

        /// Treat bare 5-digit lines as already in display units.
        #[arg(long)]
        bare_scaled: bool,
    },

    /// Search one port for a working configuration.
    /// With --baud, --framing or --delimiter, probe only that configuration.
    Detect {
        #[arg(long)]
        baud: Option<u32>,

        /// Framing such as 8N1 or 7E1.
        #[arg(long, value_parser = parse_framing)]
        framing: Option<Framing>,

        /// Line terminator: CRLF, LF, CR or ETX.
        #[arg(long, value_parser = parse_delimiter)]
        delimiter: Option<Delimiter>,
    },

    /// Write a token and check it comes back (loopback plug or echoing device).
    Loopback {
        /// Number of attempts.
        #[arg(long, default_value_t = 3)]
        attempts: u32,

        /// Read-back window per attempt, in milliseconds.
        #[arg(long, default_value_t = 300)]
        window_ms: u64,
    },

    /// Run the supervisor and print events in real time.
    Monitor {
        /// Duration in seconds (0 = run until Ctrl-C).
        #[arg(long, default_value_t = 0)]
        duration: u64,

        /// Moving-average window over the last N weights.
        #[arg(long)]
        smoothing: Option<usize>,

        /// Blank the weight after this many milliseconds without a telegram.
        #[arg(long, default_value_t = 3000)]
        idle_timeout_ms: u64,

        /// Only consider USB serial adapters.
        #[arg(long)]
        usb_only: bool,

        /// Port withheld until authorized by pressing Enter. Repeatable.
        #[arg(long)]
        grant: Vec<String>,

        /// Also print every raw line and ignored line.
        #[arg(long)]
        lines: bool,
    },
}

/// A simulated device for trying the tool without hardware.
#[derive(Clone, Copy, ValueEnum)]
enum MockDevice {
    /// An indicator streaming flagged telegrams at 2400 7E1 CRLF.
    Scale,
    /// A loopback plug: everything written comes back.
    Loopback,
    /// A port with nothing attached.
    Silent,
}

fn parse_framing(s: &str) -> std::result::Result<Framing, String> {
    s.parse().map_err(|e| format!("{e}"))
}

fn parse_delimiter(s: &str) -> std::result::Result<Delimiter, String> {
    s.parse().map_err(|e| format!("{e}"))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn mock_scale_config() -> Result<LinkConfig> {
    Ok(LinkConfig::new(
        2400,
        Framing::new(DataBits::Seven, Parity::Even, StopBits::One),
        Delimiter::CrLf,
    )?)
}

fn mock_channel(device: MockDevice) -> Result<MockChannel> {
    let mock = MockChannel::new(MOCK_PORT);
    Ok(match device {
        MockDevice::Scale => {
            let cfg = mock_scale_config()?;
            mock.accept_only([cfg])
                .script(cfg, b"\r\nP 01200\r\nN 01198\r\n")
        }
        MockDevice::Loopback => mock.echo(true),
        MockDevice::Silent => mock,
    })
}

/// Keep a simulated scale talking while it is open.
fn spawn_mock_feeder(mock: MockChannel) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_millis(250));
        loop {
            tick.tick().await;
            if mock.currently_open() {
                let grams: u32 = rand::thread_rng().gen_range(1195..1206);
                mock.push_rx(format!("P {grams:05}\r\n").as_bytes());
            }
        }
    })
}

/// The channel named by --port, or the simulated device.
fn open_target(cli: &Cli) -> Result<Box<dyn Channel>> {
    if let Some(device) = cli.mock {
        return Ok(Box::new(mock_channel(device)?));
    }
    let Some(port) = cli.port.as_deref() else {
        bail!("--port is required (or use --mock)");
    };
    Ok(Box::new(SerialChannel::new(port)))
}

fn describe_miss(reason: &MissReason) -> String {
    match reason {
        MissReason::Rejected(e) => format!("rejected: {e}"),
        MissReason::WindowElapsed => "no telegram".to_string(),
        MissReason::EndOfStream => "end of stream".to_string(),
        MissReason::ChannelFailed(e) => format!("read failed: {e}"),
        MissReason::Cancelled => "cancelled".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_list(cli: &Cli, usb_only: bool) -> Result<()> {
    if cli.mock.is_some() {
        println!("{MOCK_PORT}  (simulated)");
        return Ok(());
    }
    let ports = list_ports(&PortFilter {
        usb_only,
        allow: None,
    })
    .context("failed to enumerate serial ports")?;

    if ports.is_empty() {
        println!("No serial ports found.");
        return Ok(());
    }
    for port in &ports {
        println!("{port}");
    }
    println!();
    println!("{} ports total.", ports.len());
    Ok(())
}

fn cmd_decode(lines: &[String], scale_factor: f64, bare_scaled: bool) -> Result<()> {
    if !scale_factor.is_finite() || scale_factor == 0.0 {
        bail!("scale factor must be finite and non-zero");
    }
    let decoder = TelegramDecoder::new(DecoderConfig {
        scale_factor,
        bare_digits: if bare_scaled {
            BareDigits::Scaled
        } else {
            BareDigits::Grams
        },
        ..DecoderConfig::default()
    });

    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0);
    for line in lines {
        let telegram = decoder.telegram(line);
        match (telegram.weight, telegram.format) {
            (Some(_), Some(format)) => {
                let flag = telegram
                    .flag
                    .as_ref()
                    .map(|f| format!("  flag {}", f.letter()))
                    .unwrap_or_default();
                println!(
                    "{line:<width$}  {:>10}  {format}{flag}",
                    format_weight(telegram.weight),
                );
            }
            _ => println!("{line:<width$}  {:>10}  ignored", format_weight(None)),
        }
    }
    Ok(())
}

async fn cmd_detect(cli: &Cli, single: Option<LinkConfig>) -> Result<()> {
    let window = Duration::from_millis(cli.probe_window_ms);
    let mut session = ChannelSession::new(open_target(cli)?);
    let engine = ProbeEngine::default().window(window);

    if let Some(config) = single {
        println!("Probing {} at {config}...", session.id());
        let result = engine.probe(&mut session, config, window).await;
        session.close().await.ok();
        return match result {
            ProbeResult::Matched { sample, .. } => {
                println!(
                    "Telegram \"{}\" -> {}",
                    sample.raw_line,
                    format_weight(sample.weight)
                );
                Ok(())
            }
            ProbeResult::Unmatched { reason, .. } => bail!("{config}: {}", describe_miss(&reason)),
        };
    }

    let space = engine.parameter_space().len();
    println!("Searching {} ({space} configurations)...", session.id());
    let found = engine
        .auto_detect_with(&mut session, |result| match result {
            ProbeResult::Matched { config, sample } => {
                println!("  {:<16} \"{}\"", config.label(), sample.raw_line)
            }
            ProbeResult::Unmatched { config, reason } => {
                println!("  {:<16} {}", config.label(), describe_miss(reason))
            }
        })
        .await;
    session.close().await.ok();

    match found {
        Some(found) => {
            println!();
            println!("Scale found at {}.", found.config);
            println!(
                "Sample \"{}\" -> {} ({})",
                found.sample.raw_line,
                format_weight(found.sample.weight),
                found
                    .sample
                    .format
                    .map(|f| f.to_string())
                    .unwrap_or_default(),
            );
            Ok(())
        }
        None => bail!("no configuration produced a telegram"),
    }
}

async fn cmd_loopback(cli: &Cli, attempts: u32, window_ms: u64) -> Result<()> {
    let mut session = ChannelSession::new(open_target(cli)?);
    let tester = LoopbackTester::new()
        .attempts(attempts)
        .window(Duration::from_millis(window_ms));

    println!(
        "Loopback test on {} at {}...",
        session.id(),
        default_loopback_config()
    );
    let echoed = tester.run(&mut session).await;
    session.close().await.ok();

    if echoed {
        println!("Echo received: the link carries bytes.");
        Ok(())
    } else {
        bail!("no echo: nothing connected, or the device does not echo")
    }
}

struct MonitorOptions {
    duration: u64,
    smoothing: Option<usize>,
    idle_timeout: Duration,
    usb_only: bool,
    grant: Vec<String>,
    lines: bool,
}

fn print_event(event: &ScaleEvent, show_lines: bool, verbose: bool) {
    match event {
        ScaleEvent::StateChanged(state) => println!("[state] {state}"),
        ScaleEvent::ConfigSelected {
            channel,
            config,
            mode,
        } => println!("[config] {channel} {config} ({mode:?})"),
        ScaleEvent::Weight {
            value,
            smoothed,
            flag,
            ..
        } => {
            let flag = flag
                .as_ref()
                .map(|f| format!(" {}", f.letter()))
                .unwrap_or_default();
            if (smoothed - value).abs() > f64::EPSILON {
                println!(
                    "[weight] {} (raw {}){flag}",
                    format_weight(Some(*smoothed)),
                    format_weight(Some(*value))
                );
            } else {
                println!("[weight] {}{flag}", format_weight(Some(*value)));
            }
        }
        ScaleEvent::IdleReset => println!("[weight] {} (idle)", format_weight(None)),
        ScaleEvent::Line(telegram) if show_lines => println!("[line] {}", telegram.raw_line),
        ScaleEvent::Ignored { raw_line } if show_lines => println!("[ignored] {raw_line}"),
        ScaleEvent::Line(_) | ScaleEvent::Ignored { .. } => {}
        ScaleEvent::Diagnostic(entry) => {
            if verbose || entry.level >= DiagLevel::Info {
                println!("[diag] {entry}");
            }
        }
    }
}

/// Turn each Enter press on stdin into an authorization gesture.
fn spawn_gesture_reader(inputs: mpsc::Sender<SupervisorInput>) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            if line.is_err() || inputs.blocking_send(SupervisorInput::AuthorizationGesture).is_err() {
                break;
            }
        }
    });
}

async fn cmd_monitor(cli: &Cli, opts: MonitorOptions) -> Result<()> {
    let filter = PortFilter {
        usb_only: opts.usb_only,
        allow: cli.port.clone().map(|p| {
            let mut allow = vec![p];
            allow.extend(opts.grant.iter().cloned());
            allow
        }),
    };

    let mut builder = SupervisorBuilder::new()
        .probe_window(Duration::from_millis(cli.probe_window_ms))
        .idle_timeout(opts.idle_timeout);
    if let Some(n) = opts.smoothing {
        builder = builder.smoothing(n);
    }

    let mut feeder = None;
    let authorizer: Box<dyn Authorizer> = match cli.mock {
        Some(device) => {
            let mock = mock_channel(device)?;
            if matches!(device, MockDevice::Scale) {
                feeder = Some(spawn_mock_feeder(mock.clone()));
            }
            Box::new(MockAuthorizer::new().with_authorized(mock))
        }
        None => Box::new(SerialAuthorizer::new(filter.clone()).grantable(opts.grant.clone())),
    };

    let handle = builder
        .build_with_authorizer(authorizer)
        .await
        .context("failed to start supervisor")?;
    let mut events = handle.subscribe();

    let watcher = cli
        .mock
        .is_none()
        .then(|| HotplugWatcher::new(filter).spawn(handle.inputs()));
    if !opts.grant.is_empty() {
        println!("Press Enter to authorize the next of: {}", opts.grant.join(", "));
        spawn_gesture_reader(handle.inputs());
    }

    println!("Monitoring (Ctrl-C to stop)...");
    let deadline = (opts.duration > 0).then(|| Instant::now() + Duration::from_secs(opts.duration));

    loop {
        let elapsed = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupted.");
                break;
            }
            _ = elapsed => {
                println!("Monitor duration elapsed.");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => print_event(&event, opts.lines, cli.verbose),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    println!("[warning] missed {n} events (consumer too slow)");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    println!("Event channel closed.");
                    break;
                }
            }
        }
    }

    if let Some(watcher) = watcher {
        watcher.stop().await;
    }
    if let Some(feeder) = feeder {
        feeder.abort();
    }
    let last = handle.status().borrow().clone();
    handle.shutdown().await.context("supervisor did not stop cleanly")?;
    println!(
        "Last status: {} | {} | {}",
        last.status,
        last.config_label.as_deref().unwrap_or("-"),
        format_weight(last.weight)
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.probe_window_ms == 0 {
        bail!("--probe-window-ms must be positive");
    }

    match &cli.command {
        Command::List { usb_only } => cmd_list(&cli, *usb_only),
        Command::Decode {
            lines,
            scale_factor,
            bare_scaled,
        } => cmd_decode(lines, *scale_factor, *bare_scaled),
        Command::Detect {
            baud,
            framing,
            delimiter,
        } => {
            let single = (baud.is_some() || framing.is_some() || delimiter.is_some())
                .then(|| {
                    LinkConfig::new(
                        baud.unwrap_or(9600),
                        framing.unwrap_or(Framing::EIGHT_N_ONE),
                        delimiter.unwrap_or(Delimiter::CrLf),
                    )
                })
                .transpose()?;
            cmd_detect(&cli, single).await
        }
        Command::Loopback {
            attempts,
            window_ms,
        } => cmd_loopback(&cli, *attempts, *window_ms).await,
        Command::Monitor {
            duration,
            smoothing,
            idle_timeout_ms,
            usb_only,
            grant,
            lines,
        } => {
            let opts = MonitorOptions {
                duration: *duration,
                smoothing: *smoothing,
                idle_timeout: Duration::from_millis(*idle_timeout_ms),
                usb_only: *usb_only,
                grant: grant.clone(),
                lines: *lines,
            };
            cmd_monitor(&cli, opts).await
        }
    }
}
