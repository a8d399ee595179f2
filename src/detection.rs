//! Switch press edge detection.
//!
//! A switch wired into a line input shows up as a sharp drop below the
//! resting signal level. The detector tracks that resting level (the bias),
//! looks for a falling edge through a hysteresis band below it, and then
//! ignores further edges for a refractory period so one physical actuation
//! produces exactly one press no matter how the samples are chunked.

use crate::error::DetectorError;

/// Weight kept from the previous bias on every armed block.
const BIAS_RETAIN: f32 = 0.995;
/// Weight given to the current block mean.
const BIAS_UPDATE: f32 = 0.005;

/// Detector state threaded from one block to the next.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorState {
    pub armed: bool,
    /// Samples left before the detector may re-arm.
    pub cooldown: usize,
    pub prev_sample: f32,
    pub bias: f32,
}

impl Default for DetectorState {
    fn default() -> Self {
        Self {
            armed: true,
            cooldown: 0,
            prev_sample: 0.0,
            bias: 0.0,
        }
    }
}

/// Number of samples covered by `debounce_ms` at `samplerate`, rounded up.
pub fn refractory_samples(debounce_ms: u64, samplerate: u32) -> usize {
    let scaled = debounce_ms.saturating_mul(u64::from(samplerate));
    scaled.div_ceil(1_000) as usize
}

/// Reject offsets that do not form a band below the bias.
pub fn validate_offsets(upper_offset: f32, lower_offset: f32) -> Result<(), DetectorError> {
    if lower_offset < upper_offset && upper_offset < 0.0 {
        Ok(())
    } else {
        Err(DetectorError::InvalidOffsets {
            upper: upper_offset,
            lower: lower_offset,
        })
    }
}

fn block_mean(block: &[f32]) -> f32 {
    block.iter().sum::<f32>() / block.len() as f32
}

/// Process one block and return the next state plus whether a press fired.
pub fn detect(
    block: &[f32],
    state: DetectorState,
    upper_offset: f32,
    lower_offset: f32,
    refractory_samples: usize,
) -> Result<(DetectorState, bool), DetectorError> {
    validate_offsets(upper_offset, lower_offset)?;
    let Some(&last) = block.last() else {
        return Err(DetectorError::EmptyBlock);
    };

    let mut bias = state.bias;
    if state.armed {
        bias = BIAS_RETAIN * bias + BIAS_UPDATE * block_mean(block);
    }
    let upper = bias + upper_offset;
    let lower = bias + lower_offset;

    // Index i of the extended sequence is `prev_sample` for i == 0 and
    // `block[i - 1]` otherwise, so an edge at i ends on block[i].
    let at = |i: usize| if i == 0 { state.prev_sample } else { block[i - 1] };
    let first_edge =
        |from: usize| (from..block.len()).find(|&i| at(i) >= upper && block[i] <= lower);

    let mut armed = state.armed;
    let mut cooldown = state.cooldown;
    let mut press_index = None;

    if armed {
        press_index = first_edge(0);
    } else if cooldown >= block.len() {
        cooldown -= block.len();
    } else {
        let expiry = cooldown;
        cooldown = 0;
        // Re-arm only once the signal is back above the upper threshold at
        // the expiry sample; the tail of the same actuation must not retrigger.
        if at(expiry) >= upper {
            armed = true;
            press_index = first_edge(expiry);
        }
    }

    if let Some(index) = press_index {
        armed = false;
        let after_edge = block.len() - index - 1;
        if refractory_samples > after_edge {
            cooldown = refractory_samples - after_edge;
        } else {
            cooldown = 0;
            armed = last >= upper;
        }
    }

    Ok((
        DetectorState {
            armed,
            cooldown,
            prev_sample: last,
            bias,
        },
        press_index.is_some(),
    ))
}

/// Threshold offsets plus the refractory period for a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorParams {
    pub upper_offset: f32,
    pub lower_offset: f32,
    pub refractory_samples: usize,
}

impl DetectorParams {
    pub fn new(
        upper_offset: f32,
        lower_offset: f32,
        refractory_samples: usize,
    ) -> Result<Self, DetectorError> {
        validate_offsets(upper_offset, lower_offset)?;
        Ok(Self {
            upper_offset,
            lower_offset,
            refractory_samples,
        })
    }
}

/// Owns the detector state for one listening session.
#[derive(Debug, Clone)]
pub struct EdgeDetector {
    params: DetectorParams,
    state: DetectorState,
    presses: u64,
    blocks: u64,
}

impl EdgeDetector {
    pub fn new(params: DetectorParams) -> Self {
        Self {
            params,
            state: DetectorState::default(),
            presses: 0,
            blocks: 0,
        }
    }

    pub fn process(&mut self, block: &[f32]) -> Result<bool, DetectorError> {
        let (next, pressed) = detect(
            block,
            self.state,
            self.params.upper_offset,
            self.params.lower_offset,
            self.params.refractory_samples,
        )?;
        self.state = next;
        self.blocks += 1;
        if pressed {
            self.presses += 1;
        }
        Ok(pressed)
    }

    /// Change the refractory period, e.g. after the stream opened at a
    /// different rate than requested. Pending cooldown is left untouched.
    pub fn set_refractory_samples(&mut self, refractory_samples: usize) {
        self.params.refractory_samples = refractory_samples;
    }

    pub fn params(&self) -> DetectorParams {
        self.params
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn presses(&self) -> u64 {
        self.presses
    }

    pub fn blocks(&self) -> u64 {
        self.blocks
    }
}
