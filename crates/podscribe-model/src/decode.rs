//! Decode an arbitrary audio file (mp3/wav/m4a/ogg/flac/webm/opus) to mono
//! 16kHz f32 PCM, the format whisper.cpp expects. Grounded on the
//! symphonia-based decode pipeline used by `ponchovillalobos-maity_desktop`
//! and resampled with `rubato`, as `gibberish-audio` does for its capture
//! pipeline. Voice-activity filtering (spec.md §4.4, fixed/non-optional)
//! runs last, via `podscribe_vad`.

use podscribe_core::ModelError;
use rubato::Resampler;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

pub const WHISPER_SAMPLE_RATE: u32 = 16_000;

pub fn decode_to_pcm_16k_mono(path: &Path) -> Result<Vec<f32>, ModelError> {
    let file = std::fs::File::open(path).map_err(|e| ModelError::TranscriptionFailed {
        path: path.display().to_string(),
        detail: e.to_string(),
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| decode_err(path, e))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
        .ok_or_else(|| ModelError::TranscriptionFailed {
            path: path.display().to_string(),
            detail: "no decodable audio track".to_string(),
        })?
        .clone();

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| decode_err(path, e))?;

    let source_rate = track.codec_params.sample_rate.unwrap_or(WHISPER_SAMPLE_RATE);
    let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(1);

    let mut mono = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(_)) => break, // end of stream
            Err(e) => return Err(decode_err(path, e)),
        };
        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(symphonia::core::errors::Error::DecodeError(_)) => continue,
            Err(e) => return Err(decode_err(path, e)),
        };
        let spec = *decoded.spec();
        let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buf.copy_interleaved_ref(decoded);
        for frame in buf.samples().chunks(channels.max(1)) {
            let sum: f32 = frame.iter().sum();
            mono.push(sum / frame.len().max(1) as f32);
        }
    }

    let resampled = if source_rate == WHISPER_SAMPLE_RATE {
        mono
    } else {
        resample(&mono, source_rate, WHISPER_SAMPLE_RATE).map_err(|e| ModelError::TranscriptionFailed {
            path: path.display().to_string(),
            detail: e,
        })?
    };

    podscribe_vad::filter_speech(&resampled, WHISPER_SAMPLE_RATE).map_err(|e| ModelError::TranscriptionFailed {
        path: path.display().to_string(),
        detail: e.to_string(),
    })
}

fn decode_err(path: &Path, err: impl std::fmt::Display) -> ModelError {
    ModelError::TranscriptionFailed {
        path: path.display().to_string(),
        detail: err.to_string(),
    }
}

fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, String> {
    if samples.is_empty() {
        return Ok(Vec::new());
    }
    let ratio = to_rate as f64 / from_rate as f64;
    let mut resampler = rubato::FftFixedIn::<f32>::new(
        from_rate as usize,
        to_rate as usize,
        samples.len(),
        2,
        1,
    )
    .map_err(|e| e.to_string())?;
    let _ = ratio;
    let output = resampler
        .process(&[samples.to_vec()], None)
        .map_err(|e| e.to_string())?;
    Ok(output.into_iter().next().unwrap_or_default())
}
