//! Command-line argument parsing for the MP2K ripper CLI.
//!
//! This module handles parsing and validation of CLI arguments including:
//! - ROM path and song selector positionals
//! - Scan / parse / instrument dump mode flags
//! - Song table override and WAV output path
//! - Help text generation

use std::env;

/// Parsed command-line arguments.
#[derive(Debug, Default)]
pub struct CliArgs {
    /// GBA ROM image to rip from
    pub rom_path: Option<String>,
    /// Song selector: a table index (decimal) or a header address (0x-prefixed)
    pub song: Option<String>,
    /// Song table override: a scan offset (0x-prefixed) or a table number
    pub table: Option<String>,
    /// WAV destination path
    pub output: Option<String>,
    /// Header address to deep-validate instead of ripping
    pub validate: Option<String>,
    /// List every song table in the image
    pub scan: bool,
    /// List every song header found by a whole-image scan
    pub scan_songs: bool,
    /// Print the decoded event stream of each track
    pub parse: bool,
    /// Print the song's instrument bank
    pub instruments: bool,
    /// Whether help was requested
    pub show_help: bool,
}

impl CliArgs {
    /// Parse arguments from command line.
    pub fn parse() -> Self {
        let mut args = Self::default();
        let mut iter = env::args().skip(1);

        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--scan" => {
                    args.scan = true;
                }
                "--scan-songs" => {
                    args.scan_songs = true;
                }
                "--parse" => {
                    args.parse = true;
                }
                "--instruments" => {
                    args.instruments = true;
                }
                "--validate" => {
                    if let Some(value) = iter.next() {
                        args.validate = Some(value);
                    } else {
                        eprintln!("--validate requires an address argument");
                        args.show_help = true;
                    }
                }
                "--table" => {
                    if let Some(value) = iter.next() {
                        args.table = Some(value);
                    } else {
                        eprintln!("--table requires an argument (offset or table number)");
                        args.show_help = true;
                    }
                }
                "--output" | "-o" => {
                    if let Some(value) = iter.next() {
                        args.output = Some(value);
                    } else {
                        eprintln!("--output requires a path argument");
                        args.show_help = true;
                    }
                }
                "--help" | "-h" => {
                    args.show_help = true;
                }
                _ if arg.starts_with("--validate=") => {
                    args.validate = Some(arg[11..].to_string());
                }
                _ if arg.starts_with("--table=") => {
                    args.table = Some(arg[8..].to_string());
                }
                _ if arg.starts_with("--output=") => {
                    args.output = Some(arg[9..].to_string());
                }
                _ if arg.starts_with('-') => {
                    eprintln!("Unknown flag: {}", arg);
                    args.show_help = true;
                }
                _ => {
                    if args.rom_path.is_none() {
                        args.rom_path = Some(arg);
                    } else if args.song.is_none() {
                        args.song = Some(arg);
                    } else {
                        eprintln!("Unexpected argument: {}", arg);
                        args.show_help = true;
                    }
                }
            }
        }

        args
    }

    /// Print help text to stderr.
    pub fn print_help() {
        eprintln!(
            "Usage:\n  mp2k-ripper [mode] [options] <rom.gba> [song]\n\n\
             The song selector is a table index (decimal) or a song header\n\
             address (0x-prefixed). Without a mode flag the selected song is\n\
             rendered to a WAV file.\n\n\
             Modes:\n\
             \x20 --scan               List every song table in the image\n\
             \x20 --scan-songs         List every song header in the image\n\
             \x20 --validate <addr>    Deep-validate one song header address\n\
             \x20 --parse              Print the decoded events of each track\n\
             \x20 --instruments        Print the song's instrument bank\n\n\
             Options:\n\
             \x20 --table <addr|n>     Song table to index (scan offset or table number)\n\
             \x20 -o, --output <path>  WAV destination (default <rom>.<song>.wav)\n\
             \x20 -h, --help           Show this help\n\n\
             Examples:\n\
             \x20 mp2k-ripper game.gba --scan          # List song tables\n\
             \x20 mp2k-ripper game.gba 3               # Rip song 3 to game.3.wav\n\
             \x20 mp2k-ripper game.gba 0x081EAD34 -o intro.wav\n"
        );
    }
}
