//! Line-protocol driver for the crossing simulation.
//!
//! Commands arrive one per line on stdin; the pose stream leaves on stdout.
//! Diagnostics go to stderr through `env_logger`, keeping stdout clean for
//! protocol consumers.

use clap::Parser;
use crossbeam_channel::{bounded, Receiver, Sender};
use crossway::simulation::Direction;
use crossway::{scenario, SimEvent, Simulation};
use itertools::Itertools;
use log::warn;
use std::io::{BufRead, Write};
use std::time::{Duration, Instant};

/// Target integration step in s.
const TARGET_DT: f64 = 1.0 / 60.0;

/// Upper bound on a single integration step, in s.
const MAX_STEP: f64 = 0.05;

/// Sim-time interval between `time`/`signal` status lines, in s.
const STATUS_INTERVAL: f64 = 1.0;

#[derive(Parser)]
#[command(name = "crossway", about = "Deterministic microscopic traffic simulator")]
struct Args {
    /// Seed for spawn decisions and driver randomness.
    #[arg(long, default_value_t = 0xC0FFEE)]
    seed: u64,

    /// Simulated seconds between random vehicle spawns.
    #[arg(long, default_value_t = 2.0)]
    spawn_interval: f64,

    /// Start with adaptive signal timing enabled.
    #[arg(long)]
    adaptive: bool,

    /// Initial wall-clock-to-sim time scale.
    #[arg(long, default_value_t = 1.0)]
    speed: f64,

    /// Print the lane geometry as JSON and exit.
    #[arg(long)]
    dump_network: bool,
}

enum Command {
    Exit,
    Reset,
    Pause,
    Resume,
    Toggle,
    Speed(f64),
    Weight(Direction, f64),
    Adaptive(bool),
}

fn parse_command(line: &str) -> Option<Command> {
    let mut parts = line.split_whitespace();
    let command = match parts.next()? {
        "exit" => Command::Exit,
        "reset" => Command::Reset,
        "pause" => Command::Pause,
        "resume" => Command::Resume,
        "toggle" => Command::Toggle,
        "speed" => Command::Speed(parts.next()?.parse().ok()?),
        "weight" => {
            let direction = parts.next()?.parse().ok()?;
            Command::Weight(direction, parts.next()?.parse().ok()?)
        }
        "adaptive" => match parts.next()? {
            "on" => Command::Adaptive(true),
            "off" => Command::Adaptive(false),
            _ => return None,
        },
        _ => return None,
    };
    if parts.next().is_some() {
        return None;
    }
    Some(command)
}

/// Reads stdin until EOF or `exit`, forwarding commands to the sim loop.
fn input_loop(tx: Sender<Command>) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match parse_command(trimmed) {
            Some(Command::Exit) => {
                tx.send(Command::Exit).ok();
                return;
            }
            Some(command) => {
                if tx.send(command).is_err() {
                    return;
                }
            }
            None => warn!("ignoring malformed command: {trimmed}"),
        }
    }
    tx.send(Command::Exit).ok();
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let mut sim = scenario::four_way_crossing(args.seed);
    sim.set_adaptive(args.adaptive);

    if args.dump_network {
        let lanes = sim.network().export_lanes_for_render();
        println!("{}", serde_json::to_string(&lanes).expect("lane export serializes"));
        return;
    }

    let (tx, rx) = bounded(64);
    std::thread::spawn(move || input_loop(tx));
    run(sim, rx, &args);
}

fn run(mut sim: Simulation, rx: Receiver<Command>, args: &Args) {
    let stdout = std::io::stdout();
    let mut out = std::io::BufWriter::new(stdout.lock());

    let mut speed = args.speed.clamp(0.0, 100.0);
    let mut paused = false;
    let mut last_spawn = 0.0;
    let mut last_status = f64::NEG_INFINITY;
    let mut accumulator = 0.0;
    let mut last_instant = Instant::now();

    'sim: loop {
        // Commands apply only at tick boundaries.
        while let Ok(command) = rx.try_recv() {
            match command {
                Command::Exit => break 'sim,
                Command::Reset => {
                    sim.reset();
                    last_spawn = 0.0;
                    last_status = f64::NEG_INFINITY;
                    accumulator = 0.0;
                }
                Command::Pause => paused = true,
                Command::Resume => paused = false,
                Command::Toggle => paused = !paused,
                Command::Speed(k) => speed = k.clamp(0.0, 100.0),
                Command::Weight(direction, weight) => {
                    sim.set_direction_weight(direction, weight)
                }
                Command::Adaptive(on) => sim.set_adaptive(on),
            }
        }

        let now = Instant::now();
        let elapsed = now.duration_since(last_instant).as_secs_f64();
        last_instant = now;

        if !paused {
            // Cap the backlog so a stall doesn't turn into a burst.
            accumulator = f64::min(accumulator + elapsed * speed, 0.5);
        }

        let mut stepped = false;
        while accumulator >= TARGET_DT {
            accumulator -= TARGET_DT;
            sim.update(f64::min(TARGET_DT, MAX_STEP));
            stepped = true;

            if sim.time() - last_spawn >= args.spawn_interval {
                sim.add_random_vehicle();
                last_spawn = sim.time();
            }
        }

        if stepped {
            emit(&mut out, &mut sim, &mut last_status);
            out.flush().ok();
        }

        std::thread::sleep(Duration::from_millis(if paused { 20 } else { 2 }));
    }

    out.flush().ok();
}

/// Writes lifecycle events, the per-tick pose line and the periodic
/// time/signal status line.
fn emit(out: &mut impl Write, sim: &mut Simulation, last_status: &mut f64) {
    for event in sim.drain_events() {
        let result = match event {
            SimEvent::Spawned(id) => writeln!(out, "vh spawned {id}"),
            SimEvent::Removed(id) => writeln!(out, "vh deleted {id}"),
        };
        result.ok();
    }

    if sim.vehicles().next().is_some() {
        let line = sim
            .vehicles()
            .map(|v| {
                let pose = v.pose(sim.network());
                format!("vh move {} {:.3} {:.3} {:.3};", v.id(), pose.x, pose.y, pose.theta)
            })
            .join("");
        writeln!(out, "{line}").ok();
    }

    if sim.time() - *last_status >= STATUS_INTERVAL {
        *last_status = sim.time();
        let world = sim.world();
        let states = sim
            .signal_probes()
            .iter()
            .enumerate()
            .map(|(idx, &lane)| format!("signal {idx} {}", world.car_signal_for_lane(lane).code()))
            .join(";");
        writeln!(out, "time {:.2};{states}", sim.time()).ok();
    }
}
