//! Audio asset normalization and speech-to-text.
//!
//! Challenge audio arrives as MP3. It is decoded with Symphonia, folded down to
//! mono and written as 16-bit PCM WAV, which is what recognizers digest best.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use hound::{SampleFormat, WavSpec, WavWriter};
use serde::Deserialize;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::types::{ChallengeError, ChallengeResult};

/// Converts a downloaded asset into the normalized waveform format.
pub trait Transcoder: Send + Sync {
    fn transcode(&self, src: &Path, dest: &Path) -> ChallengeResult<()>;
}

/// Recognizes the words spoken in a normalized waveform.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, wav: &Path, locale: &str) -> ChallengeResult<String>;
}

/// Symphonia decoder + hound encoder.
#[derive(Debug, Default, Clone, Copy)]
pub struct WavTranscoder;

impl Transcoder for WavTranscoder {
    fn transcode(&self, src: &Path, dest: &Path) -> ChallengeResult<()> {
        let (samples, sample_rate) = decode_mono(src)?;
        if samples.is_empty() {
            return Err(ChallengeError::Transcode(format!(
                "{} contains no audio",
                src.display()
            )));
        }
        write_wav(dest, &samples, sample_rate)?;
        tracing::debug!(
            src = %src.display(),
            dest = %dest.display(),
            sample_rate,
            samples = samples.len(),
            "Transcoding complete"
        );
        Ok(())
    }
}

/// Decode any Symphonia-supported file into mono f32 samples.
fn decode_mono(path: &Path) -> ChallengeResult<(Vec<f32>, u32)> {
    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| ChallengeError::Transcode(format!("Failed to probe format: {e}")))?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| ChallengeError::Transcode("No audio tracks found".to_string()))?;

    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| ChallengeError::Transcode("Could not determine sample rate".to_string()))?;
    let mut channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(0);
    let codec_params = track.codec_params.clone();

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| ChallengeError::Transcode(format!("Failed to create decoder: {e}")))?;

    let mut samples = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => {
                return Err(ChallengeError::Transcode(format!(
                    "Failed to read packet: {e}"
                )))
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder
            .decode(&packet)
            .map_err(|e| ChallengeError::Transcode(format!("Failed to decode: {e}")))?;

        if sample_buf.is_none() {
            let spec = *decoded.spec();
            channels = spec.channels.count();
            sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
        }

        if let Some(buf) = sample_buf.as_mut() {
            buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buf.samples());
        }
    }

    Ok((downmix(&samples, channels), sample_rate))
}

/// Average interleaved frames down to a single channel.
pub fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

fn write_wav(dest: &Path, samples: &[f32], sample_rate: u32) -> ChallengeResult<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(dest, spec)
        .map_err(|e| ChallengeError::Transcode(format!("Failed to create WAV: {e}")))?;
    for s in samples {
        let pcm = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer
            .write_sample(pcm)
            .map_err(|e| ChallengeError::Transcode(format!("Failed to write WAV: {e}")))?;
    }
    writer
        .finalize()
        .map_err(|e| ChallengeError::Transcode(format!("Failed to finalize WAV: {e}")))?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Client for an OpenAI-compatible `/v1/audio/transcriptions` endpoint.
#[derive(Clone)]
pub struct HttpTranscriber {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpTranscriber {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key.filter(|k| !k.is_empty());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// `en-US` -> `en`.
fn primary_language(locale: &str) -> &str {
    locale.split(['-', '_']).next().unwrap_or(locale)
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, wav: &Path, locale: &str) -> ChallengeResult<String> {
        let bytes = tokio::fs::read(wav).await?;
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| ChallengeError::Transcription(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", primary_language(locale).to_string())
            .text("response_format", "json");

        let mut request = self.client.post(&self.endpoint).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        tracing::debug!(endpoint = %self.endpoint, locale, "Parsing audio file");
        let response = request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ChallengeError::Transcription(format!("Service unavailable: {e}")))?;

        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| ChallengeError::Transcription(format!("Unexpected response: {e}")))?;

        let text = body.text.trim().to_string();
        if text.is_empty() {
            return Err(ChallengeError::Transcription(
                "Audio could not be recognized".to_string(),
            ));
        }
        tracing::debug!(audio_answer = %text, "Analysis completed");
        Ok(text)
    }
}
