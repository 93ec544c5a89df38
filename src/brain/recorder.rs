//! Energy-based phrase segmentation over pulled audio

use std::collections::VecDeque;
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::client::AudioStream;
use crate::config::RecognizerConfig;
use crate::{Error, Result};

/// Silence kept ahead of the first loud chunk so word onsets survive
const PRE_ROLL: Duration = Duration::from_millis(500);

/// One recorded phrase of 16-bit mono PCM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phrase {
    samples: Vec<i16>,
    sample_rate: u32,
}

impl Phrase {
    #[must_use]
    pub const fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        #[allow(clippy::cast_precision_loss)]
        let secs = self.samples.len() as f64 / f64::from(self.sample_rate.max(1));
        Duration::from_secs_f64(secs)
    }

    /// Encode as a WAV file
    ///
    /// # Errors
    ///
    /// Returns error if encoding fails
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        let spec = WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer =
                WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;
            for &sample in &self.samples {
                writer
                    .write_sample(sample)
                    .map_err(|e| Error::Audio(e.to_string()))?;
            }
            writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
        }

        Ok(cursor.into_inner())
    }

    /// Write the phrase to `path` as WAV
    ///
    /// # Errors
    ///
    /// Returns error if encoding or writing fails
    pub async fn save(&self, path: &Path) -> Result<()> {
        tokio::fs::write(path, self.to_wav()?).await?;
        tracing::debug!(path = %path.display(), "saved recording");
        Ok(())
    }
}

/// Root-mean-square energy of a block of samples
#[must_use]
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| f64::from(s).powi(2)).sum();
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    let energy = (sum_squares / samples.len() as f64).sqrt() as f32;
    energy
}

/// Little-endian 16-bit decoder that carries a split sample into the next chunk
#[derive(Debug, Default)]
struct PcmDecoder {
    carry: Option<u8>,
}

impl PcmDecoder {
    fn decode(&mut self, bytes: &[u8]) -> Vec<i16> {
        let mut samples = Vec::with_capacity(bytes.len().div_ceil(2));
        let mut rest = bytes;

        if let Some(low) = self.carry.take() {
            let Some((&high, tail)) = rest.split_first() else {
                self.carry = Some(low);
                return samples;
            };
            samples.push(i16::from_le_bytes([low, high]));
            rest = tail;
        }

        let mut pairs = rest.chunks_exact(2);
        samples.extend(
            pairs
                .by_ref()
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
        );
        self.carry = pairs.remainder().first().copied();
        samples
    }
}

/// Waits for speech and records until a pause or the phrase time limit
#[derive(Debug, Clone)]
pub struct PhraseRecorder {
    energy_threshold: f32,
    pause_threshold: Duration,
    phrase_time_limit: Duration,
    sample_rate: u32,
}

impl PhraseRecorder {
    #[must_use]
    pub fn new(config: &RecognizerConfig, sample_rate: u32) -> Self {
        Self {
            energy_threshold: config.energy_threshold,
            pause_threshold: config.pause_threshold,
            phrase_time_limit: config.phrase_time_limit,
            sample_rate: sample_rate.max(1),
        }
    }

    fn samples_in(&self, duration: Duration) -> usize {
        let count = duration.as_millis() * u128::from(self.sample_rate) / 1000;
        usize::try_from(count).unwrap_or(usize::MAX)
    }

    /// Record one phrase from `stream`
    ///
    /// Waits indefinitely for a chunk louder than the energy threshold,
    /// then records until `pause_threshold` of continuous quiet or until
    /// `phrase_time_limit`. Returns `None` if the stream ends before any
    /// speech is heard.
    pub async fn record(&self, stream: &mut AudioStream) -> Option<Phrase> {
        let pause_samples = self.samples_in(self.pause_threshold);
        let limit_samples = self.samples_in(self.phrase_time_limit);
        let pre_roll_samples = self.samples_in(PRE_ROLL);

        let mut decoder = PcmDecoder::default();
        let mut pre_roll: VecDeque<Vec<i16>> = VecDeque::new();
        let mut pre_roll_len = 0usize;
        let mut phrase: Vec<i16> = Vec::new();
        let mut speaking = false;
        let mut quiet = 0usize;

        loop {
            let chunk = stream.read().await;
            if chunk.is_empty() {
                tracing::debug!(speaking, samples = phrase.len(), "audio stream ended");
                break;
            }

            let samples = decoder.decode(&chunk);
            let loud = rms(&samples) > self.energy_threshold;

            if !speaking {
                if loud {
                    tracing::debug!("speech detected");
                    speaking = true;
                    phrase.extend(pre_roll.drain(..).flatten());
                    phrase.extend_from_slice(&samples);
                } else {
                    pre_roll_len += samples.len();
                    pre_roll.push_back(samples);
                    while pre_roll_len > pre_roll_samples {
                        match pre_roll.pop_front() {
                            Some(old) => pre_roll_len -= old.len(),
                            None => break,
                        }
                    }
                }
                continue;
            }

            quiet = if loud { 0 } else { quiet + samples.len() };
            phrase.extend_from_slice(&samples);

            if quiet >= pause_samples {
                tracing::debug!(samples = phrase.len(), "pause detected, phrase complete");
                break;
            }
            if phrase.len() >= limit_samples {
                tracing::debug!(samples = phrase.len(), "phrase time limit reached");
                break;
            }
        }

        if speaking {
            Some(Phrase::new(phrase, self.sample_rate))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Bytes;

    use super::*;

    const RATE: u32 = 1000;

    fn chunk(value: i16, samples: usize) -> Bytes {
        let mut bytes = Vec::with_capacity(samples * 2);
        for _ in 0..samples {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        Bytes::from(bytes)
    }

    fn recorder() -> PhraseRecorder {
        let config = RecognizerConfig {
            energy_threshold: 300.0,
            pause_threshold: Duration::from_millis(300),
            phrase_time_limit: Duration::from_secs(2),
            ..RecognizerConfig::default()
        };
        PhraseRecorder::new(&config, RATE)
    }

    fn stream_of(chunks: Vec<Bytes>) -> AudioStream {
        AudioStream::from_stream(futures::stream::iter(chunks))
    }

    #[test]
    fn rms_of_constant_signal() {
        assert!((rms(&[400, -400, 400, -400]) - 400.0).abs() < f32::EPSILON);
        assert!(rms(&[]).abs() < f32::EPSILON);
    }

    #[test]
    fn decoder_carries_odd_byte_into_next_chunk() {
        let mut decoder = PcmDecoder::default();
        assert_eq!(decoder.decode(&[0x01, 0x00, 0xff, 0xff, 0x07]), vec![1, -1]);
        assert_eq!(decoder.decode(&[]), Vec::<i16>::new());
        assert_eq!(decoder.decode(&[0x00, 0x02, 0x00]), vec![7, 2]);
        assert_eq!(decoder.decode(&[0x03]), Vec::<i16>::new());
        assert_eq!(decoder.decode(&[0x00]), vec![3]);
    }

    #[tokio::test]
    async fn odd_length_chunks_stay_aligned() {
        // loud samples split across chunks at odd byte offsets
        let loud: Vec<u8> = chunk(1000, 300).to_vec();
        let quiet: Vec<u8> = chunk(0, 300).to_vec();
        let all = [loud, quiet].concat();
        let chunks: Vec<Bytes> = all.chunks(101).map(Bytes::copy_from_slice).collect();
        let mut stream = stream_of(chunks);

        let phrase = recorder().record(&mut stream).await.unwrap();

        assert_eq!(&phrase.samples()[..300], &[1000; 300][..]);
        assert!(phrase.samples()[300..].iter().all(|&s| s == 0));
    }

    #[tokio::test]
    async fn phrase_ends_after_pause() {
        // 100 samples per chunk = 100 ms at 1 kHz
        let mut chunks = vec![chunk(0, 100); 3];
        chunks.extend(vec![chunk(1000, 100); 4]);
        chunks.extend(vec![chunk(0, 100); 3]);
        chunks.extend(vec![chunk(1000, 100); 5]);
        let mut stream = stream_of(chunks);

        let phrase = recorder().record(&mut stream).await.unwrap();

        // 300 ms pre-roll + 400 ms speech + 300 ms pause
        assert_eq!(phrase.samples().len(), 1000);
        assert_eq!(phrase.samples()[0], 0);
        assert_eq!(phrase.samples()[300], 1000);
        assert!(!stream.is_finished());
    }

    #[tokio::test]
    async fn pre_roll_is_capped() {
        let mut chunks = vec![chunk(0, 100); 20];
        chunks.extend(vec![chunk(1000, 100); 2]);
        let mut stream = stream_of(chunks);

        let phrase = recorder().record(&mut stream).await.unwrap();

        // 500 ms of pre-roll then speech until the stream ends
        assert_eq!(phrase.samples().len(), 700);
    }

    #[tokio::test]
    async fn phrase_capped_at_time_limit() {
        let mut stream = stream_of(vec![chunk(2000, 100); 50]);

        let phrase = recorder().record(&mut stream).await.unwrap();

        assert_eq!(phrase.samples().len(), 2000);
        assert_eq!(phrase.duration(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn silence_until_end_yields_nothing() {
        let mut stream = stream_of(vec![chunk(10, 100); 5]);
        assert!(recorder().record(&mut stream).await.is_none());
    }

    #[test]
    fn wav_round_trips_samples() {
        let phrase = Phrase::new(vec![0, 1, -1, i16::MAX], 16_000);
        let wav = phrase.to_wav().unwrap();

        let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.spec().channels, 1);
        let samples: Vec<i16> = reader.into_samples().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0, 1, -1, i16::MAX]);
    }

    #[tokio::test]
    async fn save_writes_wav_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.wav");

        Phrase::new(vec![5; 160], 16_000).save(&path).await.unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.len(), 160);
    }
}
