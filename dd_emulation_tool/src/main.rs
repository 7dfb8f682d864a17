// Copyright 2026 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::path::PathBuf;

use anyhow::ensure;
use anyhow::Context;
use clap::Parser;
use dasp_sample::Sample;
use dasp_sample::ToSample;
use dd_emulation::channel::EMU_BLOCK_SIZE;
use dd_emulation::CompressionProfile;
use dd_emulation::DdEmulation;
use dd_emulation::EmulationSettings;
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(about = "Runs DD encoder and decoder metadata emulation over a WAVE file")]
struct Command {
    /// Path of input WAVE file
    input: PathBuf,
    /// Path of output WAVE file for the main decoder output
    output: PathBuf,

    /// Path of output WAVE file for the auxiliary decoder output
    #[arg(long)]
    aux_output: Option<PathBuf>,

    /// JSON file with the stream settings. The sample rate is taken from
    /// the input file.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Write the computed gain words of every frame to this JSON file.
    #[arg(long)]
    gain_log: Option<PathBuf>,

    /// Override the dialnorm of the settings.
    #[arg(long)]
    dialnorm: Option<u32>,

    /// Override the DRC profile, e.g. film_standard.
    #[arg(long, value_parser = parse_profile)]
    drc_profile: Option<CompressionProfile>,

    /// Override the Compr profile.
    #[arg(long, value_parser = parse_profile)]
    compr_profile: Option<CompressionProfile>,
}

fn parse_profile(arg: &str) -> Result<CompressionProfile, serde_json::Error> {
    serde_json::from_value(serde_json::Value::String(arg.to_string()))
}

impl Command {
    fn load_settings(&self) -> anyhow::Result<EmulationSettings> {
        let mut settings = match &self.settings {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("cannot read {}", path.display()))?;
                EmulationSettings::from_json_str(&json)?
            }
            None => EmulationSettings::default(),
        };
        if let Some(dialnorm) = self.dialnorm {
            settings.dialnorm = dialnorm;
        }
        if let Some(profile) = self.drc_profile {
            settings.drc_profile = profile;
        }
        if let Some(profile) = self.compr_profile {
            settings.compr_profile = profile;
        }
        Ok(settings)
    }
}

/// Computed gains of one frame, as written to the gain log.
#[derive(Serialize, Debug)]
struct FrameLog {
    frame: usize,
    reopened: bool,
    dynrng: Vec<u8>,
    drc_gain_db: Vec<f64>,
    compr: u8,
    compr_gain_db: f64,
}

/// Reads all samples of `reader` as interleaved `f64`.
/// `T` is the storage type hound reads, `U` the type converted from.
fn read_samples<T, U, R>(reader: hound::WavReader<R>) -> anyhow::Result<Vec<f64>>
where
    T: hound::Sample,
    U: Sample + From<T> + ToSample<f64>,
    R: std::io::Read,
{
    reader
        .into_samples::<T>()
        .map(|s| Ok(U::from(s?).to_sample::<f64>()))
        .collect()
}

fn read_wav(path: &Path) -> anyhow::Result<(hound::WavSpec, Vec<f64>)> {
    let reader = hound::WavReader::open(path).context("WavReader::open")?;
    let spec = reader.spec();
    let samples = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 8) => read_samples::<i8, i8, _>(reader),
        (hound::SampleFormat::Int, 16) => read_samples::<i16, i16, _>(reader),
        (hound::SampleFormat::Int, 24) => read_samples::<i32, dasp_sample::I24, _>(reader),
        (hound::SampleFormat::Int, 32) => read_samples::<i32, i32, _>(reader),
        (hound::SampleFormat::Float, 32) => read_samples::<f32, f32, _>(reader),
        (format, bits) => anyhow::bail!("unsupported sample format {format:?} {bits}"),
    }
    .with_context(|| format!("cannot read samples of {}", path.display()))?;
    Ok((spec, samples))
}

type Writer = hound::WavWriter<BufWriter<File>>;

fn create_wav(path: &Path, spec: &hound::WavSpec) -> anyhow::Result<Writer> {
    hound::WavWriter::create(
        path,
        hound::WavSpec {
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        },
    )
    .with_context(|| format!("cannot create {}", path.display()))
}

fn write_samples(writer: &mut Writer, samples: &[f64]) -> anyhow::Result<()> {
    for s in samples {
        writer.write_sample(s.to_sample::<f32>())?;
    }
    Ok(())
}

fn run(command: Command) -> anyhow::Result<()> {
    log::debug!("{:?}", command);
    let mut settings = command.load_settings()?;
    let (spec, samples) = read_wav(&command.input)?;
    settings.sample_rate = spec.sample_rate;
    let config = settings.to_process_config()?;
    let stride = config.sample_offset;
    ensure!(
        spec.channels as usize == stride,
        "{} has {} channels, settings describe {}",
        command.input.display(),
        spec.channels,
        stride
    );

    let mut main_writer = create_wav(&command.output, &spec)?;
    let mut aux_writer = command
        .aux_output
        .as_deref()
        .map(|path| create_wav(path, &spec))
        .transpose()?;

    let frame_len = config.blocks_per_frame.count() * EMU_BLOCK_SIZE;
    let mut emu = DdEmulation::new();
    let mut gain_log = Vec::new();
    let mut main = Vec::with_capacity(frame_len * stride);
    let mut aux = Vec::with_capacity(frame_len * stride);
    for (frame, chunk) in samples.chunks(frame_len * stride).enumerate() {
        let len = chunk.len() / stride;
        // A frame needs at least one block.
        let num_samples = len.max(EMU_BLOCK_SIZE);
        if num_samples != len {
            log::warn!("padding the last {len} samples to one block");
        }
        main.clear();
        main.extend_from_slice(chunk);
        main.resize(num_samples * stride, 0.);
        aux.clear();
        aux.resize(num_samples * stride, 0.);

        let report = emu.process(
            &config,
            num_samples,
            &mut main,
            aux_writer.as_ref().map(|_| &mut aux[..]),
        )?;

        write_samples(&mut main_writer, &main[..len * stride])?;
        if let Some(writer) = aux_writer.as_mut() {
            write_samples(writer, &aux[..len * stride])?;
        }
        if let Some(gains) = report.gains {
            gain_log.push(FrameLog {
                frame,
                reopened: report.reopened,
                dynrng: gains.drc_words().to_vec(),
                drc_gain_db: gains.drc_gains_db().to_vec(),
                compr: gains.compr_word,
                compr_gain_db: gains.compr_gain_db,
            });
        }
    }

    main_writer.finalize()?;
    if let Some(writer) = aux_writer {
        writer.finalize()?;
    }
    if let Some(path) = &command.gain_log {
        let file =
            File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &gain_log)?;
    }
    log::info!(
        "processed {} samples of {}",
        samples.len() / stride,
        command.input.display()
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    run(Command::parse())
}
