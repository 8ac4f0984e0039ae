//! Packetize data into loss-tolerant SSDV packets, and back.
//!
//! Encode reads a byte stream (typically a compressed image), emits 256-byte
//! packets to the output, and exits. Decode reads 256-byte packets, discards
//! anything the validation state machine rejects, runs erasure recovery once
//! the input ends, and writes whatever data could be reconstructed.
//!
//! A drop-test flag simulates a lossy channel while decoding; per-packet
//! problems are logged and never abort the run.

use clap::{value_parser, Arg, ArgAction, Command};
use rand::Rng;
use ssdv_cbec::{
    callsign,
    packet::{self, PACKET_SIZE},
    Decoder, Encoder, PacketInfo, PacketType,
};
use std::{
    fs::File,
    io::{self, Read, Write},
    process::ExitCode,
};
use tracing::{debug, error, info, warn};

fn main() -> ExitCode {
    let matches = Command::new("ssdv-cbec")
        .about("Packetize data into loss-tolerant SSDV packets, and back")
        .arg(
            Arg::new("encode")
                .short('e')
                .long("encode")
                .action(ArgAction::SetTrue)
                .help("Encode data to SSDV packets"),
        )
        .arg(
            Arg::new("decode")
                .short('d')
                .long("decode")
                .action(ArgAction::SetTrue)
                .conflicts_with("encode")
                .help("Decode SSDV packets to data"),
        )
        .arg(
            Arg::new("no-fec")
                .short('n')
                .long("no-fec")
                .action(ArgAction::SetTrue)
                .help("Encode packets without Reed-Solomon parity"),
        )
        .arg(
            Arg::new("legacy")
                .short('b')
                .long("legacy")
                .action(ArgAction::SetTrue)
                .help("Use the original packet type ids for backwards compatibility"),
        )
        .arg(
            Arg::new("callsign")
                .short('c')
                .long("callsign")
                .default_value("")
                .help("Callsign, A-Z 0-9, up to 6 characters"),
        )
        .arg(
            Arg::new("image-id")
                .short('i')
                .long("image-id")
                .value_parser(value_parser!(u8))
                .default_value("0")
                .help("Image ID (0-255)"),
        )
        .arg(
            Arg::new("droptest")
                .short('t')
                .long("droptest")
                .value_parser(value_parser!(u32).range(0..=100))
                .default_value("0")
                .help("Drop the given percentage of packets while decoding, for testing"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Report every decoded packet"),
        )
        .arg(Arg::new("input").help("Input file, - or absent for stdin"))
        .arg(Arg::new("output").help("Output file, - or absent for stdout"))
        .get_matches();

    let verbose = matches.get_flag("verbose");
    tracing_subscriber::fmt()
        .with_max_level(if verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_writer(io::stderr)
        .init();

    let input = match open_input(matches.get_one::<String>("input")) {
        Ok(input) => input,
        Err(err) => {
            error!(%err, "failed to open input");
            return ExitCode::FAILURE;
        }
    };
    let output = match open_output(matches.get_one::<String>("output")) {
        Ok(output) => output,
        Err(err) => {
            error!(%err, "failed to open output");
            return ExitCode::FAILURE;
        }
    };

    let result = if matches.get_flag("encode") {
        let packet_type = match (matches.get_flag("no-fec"), matches.get_flag("legacy")) {
            (false, false) => PacketType::Cbec,
            (true, false) => PacketType::CbecNoFec,
            (false, true) => PacketType::Legacy,
            (true, true) => PacketType::LegacyNoFec,
        };
        let call = matches.get_one::<String>("callsign").cloned().unwrap_or_default();
        if call.len() > callsign::MAX_LEN {
            warn!(callsign = %call, "callsign is longer than 6 characters");
        }
        let image_id = *matches.get_one::<u8>("image-id").unwrap_or(&0);
        run_encode(input, output, packet_type, &call, image_id)
    } else if matches.get_flag("decode") {
        let droptest = *matches.get_one::<u32>("droptest").unwrap_or(&0);
        run_decode(input, output, droptest)
    } else {
        error!("no mode specified, pass --encode or --decode");
        return ExitCode::FAILURE;
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "fatal");
            ExitCode::FAILURE
        }
    }
}

fn open_input(path: Option<&String>) -> io::Result<Box<dyn Read>> {
    match path.map(String::as_str) {
        None | Some("-") => Ok(Box::new(io::stdin())),
        Some(path) => Ok(Box::new(File::open(path)?)),
    }
}

fn open_output(path: Option<&String>) -> io::Result<Box<dyn Write>> {
    match path.map(String::as_str) {
        None | Some("-") => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(File::create(path)?)),
    }
}

fn run_encode(
    mut input: Box<dyn Read>,
    mut output: Box<dyn Write>,
    packet_type: PacketType,
    call: &str,
    image_id: u8,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut data = Vec::new();
    input.read_to_end(&mut data)?;

    let mut encoder = Encoder::new(packet_type, call, image_id);
    encoder.load(&data)?;
    info!(
        sequences = encoder.sequences(),
        blocks = encoder.blocks(),
        recovery = encoder.recovery_count(),
        "image loaded"
    );

    let mut written = 0usize;
    while let Some(pkt) = encoder.next_packet() {
        output.write_all(&pkt)?;
        written += 1;
    }
    output.flush()?;
    info!(packets = written, "encode complete");
    Ok(())
}

fn run_decode(
    mut input: Box<dyn Read>,
    mut output: Box<dyn Write>,
    droptest: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    if droptest > 0 {
        warn!(percent = droptest, "drop test enabled");
    }

    let mut decoder = Decoder::new();
    let mut rng = rand::thread_rng();
    let mut pkt = [0u8; PACKET_SIZE];
    let mut fed = 0usize;
    while read_packet(input.as_mut(), &mut pkt)? {
        if droptest > 0 && rng.gen_range(0..100u32) < droptest {
            continue;
        }
        match packet::validate(&mut pkt) {
            Ok(errors) => {
                let info = PacketInfo::decode(&pkt);
                debug!(
                    callsign = %info.callsign_text(),
                    image_id = info.image_id,
                    packet_id = info.packet_id,
                    errors,
                    eoi = info.eoi,
                    "decoded packet"
                );
                decoder.feed(&pkt);
                fed += 1;
            }
            Err(reason) => debug!(%reason, "rejected packet"),
        }
    }
    info!(packets = fed, "finished reading");

    // A failed sequence still leaves the others extractable.
    if let Err(err) = decoder.recover() {
        warn!(%err, "partial recovery");
    }

    let mut written = 0usize;
    while let Some(chunk) = decoder.next_chunk() {
        output.write_all(chunk)?;
        written += 1;
    }
    output.flush()?;
    info!(blocks = written, "decode complete");
    Ok(())
}

/// Read one whole packet; a clean EOF (or a truncated trailing packet) ends
/// the stream.
fn read_packet(input: &mut dyn Read, pkt: &mut [u8; PACKET_SIZE]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < pkt.len() {
        let n = input.read(&mut pkt[filled..])?;
        if n == 0 {
            return Ok(false);
        }
        filled += n;
    }
    Ok(true)
}
