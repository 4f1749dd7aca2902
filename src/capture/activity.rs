//! Energy-based voice activity detection

/// Minimum duration of speech worth transcribing (in samples at 16kHz)
const MIN_SPEECH_SAMPLES: usize = 4800; // 0.3 seconds

/// Silence that closes a speech segment (in samples)
const SILENCE_SAMPLES: usize = 8000; // 0.5 seconds

/// What a block of audio contained
#[derive(Debug, Clone, PartialEq)]
pub enum Activity {
    /// Nothing above the energy threshold
    Silence,
    /// Speech is in progress
    Speech,
    /// Speech followed by enough silence; holds the whole segment
    SegmentComplete(Vec<f32>),
}

/// Splits a microphone stream into speech segments
pub struct ActivityDetector {
    threshold: f32,
    speaking: bool,
    segment: Vec<f32>,
    silence_counter: usize,
}

impl ActivityDetector {
    #[must_use]
    pub const fn new(threshold: f32) -> Self {
        Self {
            threshold,
            speaking: false,
            segment: Vec::new(),
            silence_counter: 0,
        }
    }

    /// Feed the next block of samples
    pub fn process(&mut self, samples: &[f32]) -> Activity {
        let energy = rms_energy(samples);
        let is_speech = energy > self.threshold;

        if !self.speaking {
            if !is_speech {
                return Activity::Silence;
            }
            self.speaking = true;
            self.segment.clear();
            self.segment.extend_from_slice(samples);
            self.silence_counter = 0;
            tracing::trace!(energy, "speech started");
            return Activity::Speech;
        }

        self.segment.extend_from_slice(samples);
        if is_speech {
            self.silence_counter = 0;
            return Activity::Speech;
        }
        self.silence_counter += samples.len();

        if self.silence_counter > SILENCE_SAMPLES && self.speech_samples() > MIN_SPEECH_SAMPLES {
            tracing::debug!(samples = self.segment.len(), "speech segment complete");
            let segment = std::mem::take(&mut self.segment);
            self.reset();
            return Activity::SegmentComplete(segment);
        }

        // A blip too short to be speech
        if self.silence_counter > SILENCE_SAMPLES * 2 {
            tracing::trace!("discarding short noise");
            self.reset();
            return Activity::Silence;
        }

        Activity::Speech
    }

    /// Flush whatever speech is buffered, if long enough to be worth sending
    pub fn flush(&mut self) -> Option<Vec<f32>> {
        let long_enough = self.speaking && self.speech_samples() > MIN_SPEECH_SAMPLES;
        let segment = std::mem::take(&mut self.segment);
        self.reset();
        long_enough.then_some(segment)
    }

    /// Buffered samples excluding the trailing silence
    const fn speech_samples(&self) -> usize {
        self.segment.len().saturating_sub(self.silence_counter)
    }

    pub fn reset(&mut self) {
        self.speaking = false;
        self.segment.clear();
        self.silence_counter = 0;
    }
}

/// RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
