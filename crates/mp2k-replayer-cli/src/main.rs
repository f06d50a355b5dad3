//! MP2K (Sappy) song ripper CLI
//!
//! Command-line ripper for MP2K driver music in GBA ROM images featuring:
//! - Heuristic song table discovery
//! - Per-track event stream dumps
//! - Instrument bank inspection
//! - Offline WAV rendering

mod args;

use std::path::{Path, PathBuf};
use std::process;

use mp2k_replayer::{
    export_to_wav, RomImage, SongData, SongTable, TrackData, DEFAULT_RENDER_RATE, HEADER_SIZE,
    ROM_BASE,
};

use args::CliArgs;

fn main() -> mp2k_replayer::Result<()> {
    println!("MP2K (Sappy) Song Ripper");
    println!("========================\n");

    let args = CliArgs::parse();

    if args.show_help {
        CliArgs::print_help();
        if args.rom_path.is_none() {
            return Ok(());
        }
        process::exit(2);
    }

    let Some(rom_path) = args.rom_path.as_deref() else {
        CliArgs::print_help();
        process::exit(2);
    };

    let rom = RomImage::load(rom_path)?;
    println!("{}: {} bytes", rom_path, rom.len());

    if args.scan {
        scan_tables(&rom);
        return Ok(());
    }
    if args.scan_songs {
        scan_all_songs(&rom);
        return Ok(());
    }
    if let Some(spec) = args.validate.as_deref() {
        validate_song(&rom, spec);
        return Ok(());
    }

    let (addr, label) = select_song(&rom, &args)?;

    if args.parse {
        return parse_song(&rom, addr);
    }

    let song = SongData::load(&rom, addr)?;
    report_failures(&song);
    println!(
        "song 0x{:08X}: {} tracks decoded, instrument bank 0x{:08X}",
        ROM_BASE | addr,
        song.tracks().len(),
        ROM_BASE | song.bank().addr
    );

    if args.instruments {
        print_instruments(&rom, &song);
        return Ok(());
    }

    rip_song(rom_path, &song, &label, args.output.as_deref())
}

/// Parse a 0x-prefixed hexadecimal address.
fn parse_addr(text: &str) -> Option<u32> {
    let digits = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X"))?;
    u32::from_str_radix(digits, 16).ok()
}

/// Strip the cartridge tag so both ROM addresses and file offsets work.
fn to_offset(addr: u32) -> u32 {
    addr & !ROM_BASE
}

/// List every song table in the image, with each entry resolved.
fn scan_tables(rom: &RomImage) {
    let tables = rom.find_song_tables();
    if tables.is_empty() {
        eprintln!("no song tables found");
        process::exit(1);
    }
    for (n, table) in tables.iter().enumerate() {
        println!(
            "table {} @ 0x{:08X}..0x{:08X}: {} entries, {} distinct songs",
            n,
            ROM_BASE | table.table_start,
            ROM_BASE | table.table_end,
            table.entry_count(),
            table.songs.len()
        );
        for i in 0..table.entry_count() {
            match table.song_from_table(rom, i) {
                Ok(addr) => println!("  song {:3} @ 0x{:08X}", i, ROM_BASE | addr),
                Err(_) => println!("  song {:3} (unreadable)", i),
            }
        }
    }
}

/// List every song header a whole-image scan turns up, table or not.
fn scan_all_songs(rom: &RomImage) {
    let found = rom.find_all_songs();
    if found.songs.is_empty() {
        eprintln!("no songs found");
        process::exit(1);
    }
    println!("{} song headers:", found.songs.len());
    for &addr in &found.songs {
        println!("  0x{:08X}", ROM_BASE | addr);
    }
}

/// Deep-validate one candidate song header address.
fn validate_song(rom: &RomImage, spec: &str) {
    let Some(addr) = parse_addr(spec) else {
        eprintln!("Bad --validate argument: {} (expected a 0x-prefixed address)", spec);
        process::exit(2);
    };
    if rom.check_song(to_offset(addr), true) {
        println!("0x{:08X}: valid song header", ROM_BASE | addr);
    } else {
        println!("0x{:08X}: not a valid song header", ROM_BASE | addr);
        process::exit(1);
    }
}

/// Resolve the `--table` override, or pick the biggest table in the image.
fn select_table(rom: &RomImage, spec: Option<&str>) -> SongTable {
    let table = match spec {
        None => rom.find_song_table(None, HEADER_SIZE),
        Some(spec) => match parse_addr(spec) {
            Some(addr) => rom.find_song_table(Some(0), to_offset(addr)),
            None => match spec.parse::<usize>() {
                Ok(index) => {
                    let mut tables = rom.find_song_tables();
                    if index >= tables.len() {
                        eprintln!("no song table {} (found {})", index, tables.len());
                        process::exit(1);
                    }
                    tables.swap_remove(index)
                }
                Err(_) => {
                    eprintln!("Bad --table argument: {}", spec);
                    CliArgs::print_help();
                    process::exit(2);
                }
            },
        },
    };
    if table.songs.is_empty() {
        eprintln!("no song table found");
        process::exit(1);
    }
    table
}

/// Turn the positional song selector into a header offset and a label for
/// the default output filename.
fn select_song(rom: &RomImage, args: &CliArgs) -> mp2k_replayer::Result<(u32, String)> {
    let selector = args.song.as_deref().unwrap_or("0");
    if let Some(addr) = parse_addr(selector) {
        return Ok((to_offset(addr), format!("0x{:08X}", ROM_BASE | addr)));
    }
    let Ok(index) = selector.parse::<usize>() else {
        eprintln!(
            "Bad song selector: {} (expected an index or 0x-prefixed address)",
            selector
        );
        CliArgs::print_help();
        process::exit(2);
    };
    let table = select_table(rom, args.table.as_deref());
    println!(
        "using table @ 0x{:08X} ({} entries)",
        ROM_BASE | table.table_start,
        table.entry_count()
    );
    let addr = table.song_from_table(rom, index)?;
    Ok((addr, index.to_string()))
}

/// Decode and print the event stream of every track in the song.
fn parse_song(rom: &RomImage, addr: u32) -> mp2k_replayer::Result<()> {
    let track_count = rom.read_u8(addr)?;
    println!("song @ 0x{:08X}: {} tracks", ROM_BASE | addr, track_count);
    for i in 0..u32::from(track_count) {
        let slot = addr + 8 + 4 * i;
        match rom
            .read_pointer(slot, false)
            .and_then(|start| TrackData::decode(rom, start))
        {
            Ok(track) => print_track(i, &track),
            Err(err) => eprintln!("track {}: {}", i, err),
        }
    }
    Ok(())
}

fn print_track(index: u32, track: &TrackData) {
    let looped = if track.has_loop { ", loops" } else { "" };
    println!(
        "\ntrack {} @ 0x{:08X}: {} events, {} ticks{}",
        index,
        ROM_BASE | track.addr,
        track.events.len(),
        track.length_ticks,
        looped
    );
    for event in &track.events {
        println!("  {}", event);
    }
}

/// Dump every occupied bank slot through its registry instrument.
fn print_instruments(rom: &RomImage, song: &SongData) {
    let bank = song.bank();
    println!(
        "instrument bank @ 0x{:08X}: {} distinct instruments",
        ROM_BASE | bank.addr,
        bank.registry_len()
    );
    for (slot, inst) in bank.iter() {
        print!("\n[{:3}] {}", slot, inst.describe(bank, rom));
    }
}

fn report_failures(song: &SongData) {
    for (index, err) in song.failures() {
        eprintln!("track {}: {}", index, err);
    }
}

/// Render the song and write it out as a 16-bit stereo WAV file.
fn rip_song(
    rom_path: &str,
    song: &SongData,
    label: &str,
    output: Option<&str>,
) -> mp2k_replayer::Result<()> {
    let path = match output {
        Some(path) => PathBuf::from(path),
        None => default_output(rom_path, label),
    };
    println!(
        "rendering song 0x{:08X} at {} Hz",
        ROM_BASE | song.addr,
        DEFAULT_RENDER_RATE
    );
    export_to_wav(song, &path, DEFAULT_RENDER_RATE)?;
    println!("wrote {}", path.display());
    Ok(())
}

fn default_output(rom_path: &str, label: &str) -> PathBuf {
    let stem = Path::new(rom_path)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "song".to_string());
    PathBuf::from(format!("{}.{}.wav", stem, label))
}
