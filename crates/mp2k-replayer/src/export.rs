//! Whole-song rendering and WAV export, behind the `export-wav` feature.

use std::path::Path;

use mp2k_synth::Engine;

use crate::error::{Mp2kError, Result};
use crate::player::SongPlayer;
use crate::song::SongData;

/// Renders every track of `song` into an interleaved stereo buffer at
/// `sample_rate`.
pub fn render_song(song: &SongData, sample_rate: u32) -> Result<Vec<(f32, f32)>> {
    let mut engine = Engine::new(sample_rate, song.samples().clone());
    let mut player = SongPlayer::new(song);
    engine.ensure_channels(player.channel_count());
    for (channel, command) in player.run() {
        engine.apply(channel, command)?;
    }
    Ok(engine.render())
}

/// Renders `song` and writes it to `path` as a 16-bit stereo WAV.
pub fn export_to_wav<P: AsRef<Path>>(song: &SongData, path: P, sample_rate: u32) -> Result<()> {
    let frames = render_song(song, sample_rate)?;
    write_wav_file(path.as_ref(), &frames, sample_rate)
}

fn write_wav_file(path: &Path, frames: &[(f32, f32)], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| Mp2kError::Export(format!("failed to create WAV file: {e}")))?;
    for &(left, right) in frames {
        for sample in [left, right] {
            let value = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
            writer
                .write_sample(value)
                .map_err(|e| Mp2kError::Export(format!("failed to write sample: {e}")))?;
        }
    }
    writer
        .finalize()
        .map_err(|e| Mp2kError::Export(format!("failed to finalize WAV file: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rom::RomImage;

    fn put_ptr(data: &mut [u8], at: usize, target: u32) {
        data[at..at + 4].copy_from_slice(&(target | 0x0800_0000).to_le_bytes());
    }

    #[test]
    fn test_render_song_produces_bounded_audio() {
        let mut data = vec![0u8; 0x1000];
        data[0x400] = 1;
        put_ptr(&mut data, 0x404, 0x500);
        put_ptr(&mut data, 0x408, 0x600);
        // One square instrument, one short note.
        data[0x500] = 2;
        data[0x504] = 1;
        data[0x508] = 7;
        data[0x50A] = 15;
        data[0x600..0x606].copy_from_slice(&[0xD4, 60, 100, 0x98, 0xB1, 0]);
        let rom = RomImage::new(data);
        let song = SongData::load(&rom, 0x400).unwrap();

        let frames = render_song(&song, 8000).unwrap();
        assert!(!frames.is_empty(), "a sounding note renders frames");
        assert!(frames.iter().any(|&(l, r)| l != 0.0 || r != 0.0));
        assert!(frames
            .iter()
            .all(|&(l, r)| l.abs() <= 2.0 && r.abs() <= 2.0));
    }
}
