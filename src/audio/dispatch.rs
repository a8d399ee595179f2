/// Downmix multi-channel input to mono while applying the provided converter,
/// so the detector sees one channel regardless of the interface layout.
pub(crate) fn append_downmixed_samples<T, F>(
    buf: &mut Vec<f32>,
    data: &[T],
    channels: usize,
    mut convert: F,
) where
    T: Copy,
    F: FnMut(T) -> f32,
{
    if channels <= 1 {
        buf.extend(data.iter().copied().map(&mut convert));
        return;
    }

    // Average each interleaved frame to produce a mono representation.
    let mut acc = 0.0f32;
    let mut count = 0usize;
    for sample in data.iter().copied() {
        acc += convert(sample);
        count += 1;
        if count == channels {
            buf.push(acc / channels as f32);
            acc = 0.0;
            count = 0;
        }
    }
    if count > 0 {
        buf.push(acc / count as f32);
    }
}

pub(crate) fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32_768.0
}

pub(crate) fn u16_to_f32(sample: u16) -> f32 {
    (sample as f32 - 32_768.0) / 32_768.0
}

/// Re-chunks driver buffers into fixed-size mono blocks.
///
/// Drivers are free to ignore the requested buffer size; the detector is
/// chunk-invariant, but keeping a steady block cadence keeps bias updates
/// comparable between hosts. Both buffers are reused, so steady-state pushes
/// do not allocate.
pub(crate) struct BlockAssembler {
    blocksize: usize,
    pending: Vec<f32>,
    scratch: Vec<f32>,
}

impl BlockAssembler {
    pub(crate) fn new(blocksize: usize) -> Self {
        let blocksize = blocksize.max(1);
        Self {
            blocksize,
            pending: Vec::with_capacity(blocksize),
            scratch: Vec::with_capacity(blocksize * 4),
        }
    }

    pub(crate) fn push<T, F, E>(&mut self, data: &[T], channels: usize, convert: F, mut emit: E)
    where
        T: Copy,
        F: FnMut(T) -> f32,
        E: FnMut(&[f32]),
    {
        let Self {
            blocksize,
            pending,
            scratch,
        } = self;
        let blocksize = *blocksize;

        scratch.clear();
        append_downmixed_samples(scratch, data, channels, convert);
        let mut input: &[f32] = scratch;

        if !pending.is_empty() {
            let take = (blocksize - pending.len()).min(input.len());
            pending.extend_from_slice(&input[..take]);
            input = &input[take..];
            if pending.len() == blocksize {
                emit(pending);
                pending.clear();
            }
        }
        while input.len() >= blocksize {
            emit(&input[..blocksize]);
            input = &input[blocksize..];
        }
        pending.extend_from_slice(input);
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.len()
    }
}
