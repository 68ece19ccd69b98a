use clap::Parser;
use log::{info, warn};
use std::error;
use std::error::Error;
use std::fmt;
use std::fs;
use std::path::Path;

use jpip::{
    Arrival, DispatchReport, Message, MessageDecoder, QualityLayers, Region, Session,
    SessionConfig, TrackerId,
};

#[derive(Debug)]
enum JpipClientError {
    ReplayingStream { error: String },
    MainHeaderMissing,
}

impl error::Error for JpipClientError {}
impl fmt::Display for JpipClientError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ReplayingStream { error } => {
                write!(f, "error replaying jpp-stream {}", error)
            }
            Self::MainHeaderMissing => {
                write!(f, "jpp-stream ended before the main header was complete")
            }
        }
    }
}

#[derive(Parser)]
struct Opts {
    #[clap(subcommand)]
    subcommand: SubCommand,
}

#[derive(Parser)]
enum SubCommand {
    /// Replay a JPP-stream capture and list the databins it filled (stdout)
    Inspect(Inspect),

    /// Replay a JPP-stream capture while tracking the quality layers available over a region
    Layers(Layers),
}

#[derive(Parser)]
struct Inspect {
    /// Path to .jpp file
    path: String,

    /// Split every message into arrivals of at most this many bytes
    #[clap(long, value_parser = clap::value_parser!(u64).range(1..))]
    chunk_size: Option<u64>,
}

#[derive(Parser)]
struct Layers {
    /// Path to .jpp file
    path: String,

    /// Region left edge on the reference grid
    #[clap(long)]
    x: u32,

    /// Region top edge on the reference grid
    #[clap(long)]
    y: u32,

    #[clap(long)]
    width: u32,

    #[clap(long)]
    height: u32,

    /// Quality layers wanted, all when not given
    #[clap(short, long)]
    quality: Option<u16>,

    /// Resolution levels to leave out, starting from the highest
    #[clap(short, long, default_value = "0")]
    discard_levels: u8,

    /// Split every message into arrivals of at most this many bytes
    #[clap(long, value_parser = clap::value_parser!(u64).range(1..))]
    chunk_size: Option<u64>,

    /// Reset the cache once it holds more than this many bytes
    #[clap(long)]
    max_cache_bytes: Option<u64>,
}

// Arrivals of one message, cut into chunks of at most `chunk_size` bytes.
fn chunks<'a>(arrival: Arrival<'a>, chunk_size: Option<u64>) -> Vec<Arrival<'a>> {
    let size = match chunk_size {
        Some(size) if !arrival.bytes.is_empty() => size as usize,
        _ => return vec![arrival],
    };
    let count = arrival.bytes.chunks(size).count();
    arrival
        .bytes
        .chunks(size)
        .enumerate()
        .map(|(index, bytes)| Arrival {
            offset: arrival.offset + (index * size) as u64,
            bytes,
            is_last_byte: arrival.is_last_byte && index + 1 == count,
            ..arrival
        })
        .collect()
}

fn report_failures(report: &DispatchReport) {
    for failure in &report.failures {
        warn!(
            "tracker {} stopped on databin {}: {}",
            failure.tracker, report.databin, failure.error
        );
    }
}

// Replays every message of `bytes`, calling `after` once per arrival.
fn replay(
    session: &Session,
    bytes: &[u8],
    chunk_size: Option<u64>,
    mut after: impl FnMut(&Session) -> Result<(), Box<dyn Error>>,
) -> Result<(), Box<dyn Error>> {
    for message in MessageDecoder::new(bytes) {
        let message = message.map_err(|error| JpipClientError::ReplayingStream {
            error: error.to_string(),
        })?;
        match message {
            Message::Databin { arrival, .. } => {
                for arrival in chunks(arrival, chunk_size) {
                    let report = session.add_data(arrival).map_err(|error| {
                        JpipClientError::ReplayingStream {
                            error: error.to_string(),
                        }
                    })?;
                    report_failures(&report);
                    after(session)?;
                }
            }
            Message::EndOfResponse { reason, .. } => info!("end of response: {}", reason),
        }
    }
    Ok(())
}

fn inspect(c: Inspect) -> Result<(), Box<dyn Error>> {
    let bytes = fs::read(Path::new(&c.path))?;
    let session = Session::default();
    replay(&session, &bytes, c.chunk_size, |_| Ok(()))?;

    for id in session.databin_ids() {
        let status = match session.databin_status(id) {
            Some(status) => status,
            None => continue,
        };
        let ranges: Vec<String> = status
            .existing_ranges
            .iter()
            .map(|range| format!("{}..{}", range.start, range.end()))
            .collect();
        println!(
            "{}\t{}\t{} bytes\t{}\t[{}]",
            id.class,
            id.in_class_id,
            status.loaded_bytes,
            if status.is_fully_loaded {
                "complete"
            } else {
                "partial"
            },
            ranges.join(", ")
        );
    }
    println!("total\t{} bytes", session.total_loaded_bytes());
    Ok(())
}

fn layers(c: Layers) -> Result<(), Box<dyn Error>> {
    let bytes = fs::read(Path::new(&c.path))?;
    let session = Session::new(SessionConfig {
        max_cache_bytes: c.max_cache_bytes,
        default_quality_layers: None,
    });
    let region = Region {
        x: c.x,
        y: c.y,
        width: c.width,
        height: c.height,
        discard_levels: c.discard_levels,
    };

    let mut tracker: Option<TrackerId> = None;
    replay(&session, &bytes, c.chunk_size, |session| {
        if session.is_over_budget() {
            warn!(
                "cache holds {} bytes, over budget: resetting",
                session.total_loaded_bytes()
            );
            session.reset();
            tracker = None;
        }
        if tracker.is_none() && session.structure().is_ok() {
            tracker = Some(session.track_region(
                &region,
                c.quality,
                Box::new(|layers: QualityLayers| println!("progress\t{}", layers)),
            )?);
        }
        Ok(())
    })?;

    let tracker = tracker.ok_or(JpipClientError::MainHeaderMissing)?;
    match session.tracker_minimum(tracker) {
        Ok(QualityLayers::Max) => println!("available\tall"),
        Ok(QualityLayers::Layers(layers)) => println!("available\t{}", layers),
        Err(error) => warn!("tracker {} stopped: {}", tracker, error),
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let opts: Opts = Opts::parse();

    match opts.subcommand {
        SubCommand::Inspect(c) => inspect(c),
        SubCommand::Layers(c) => layers(c),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    match run() {
        Err(e) => Err(e.to_string().into()),
        Ok(_) => Ok(()),
    }
}
