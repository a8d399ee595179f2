//! Production [`AudioHost`] backed by CPAL.
//!
//! Handles device lookup, config negotiation and sample-format conversion.
//! Blocks handed to the callbacks are mono f32 at the negotiated rate.

use super::device::{DeviceSelector, HostApiInfo, InputDeviceInfo, ShareMode};
use super::dispatch::{i16_to_f32, u16_to_f32, BlockAssembler};
use super::host::{AudioHost, InputStream, StreamCallbacks, StreamRequest};
use anyhow::{anyhow, bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, SampleFormat, SampleRate, StreamConfig, SupportedBufferSize,
    SupportedStreamConfigRange,
};

/// A CPAL host identified by its [`cpal::HostId`].
///
/// The id is stored instead of a `cpal::Host` so the host stays `Send + Sync`
/// on every platform; a fresh handle is created per operation.
pub struct CpalHost {
    id: cpal::HostId,
}

impl CpalHost {
    pub fn new(id: cpal::HostId) -> Result<Self> {
        cpal::host_from_id(id).with_context(|| format!("{} host unavailable", id.name()))?;
        Ok(Self { id })
    }

    /// Every host API compiled into this build and usable on this machine.
    pub fn available() -> Vec<HostApiInfo> {
        cpal::available_hosts()
            .into_iter()
            .map(|id| HostApiInfo::new(id.name()))
            .collect()
    }

    /// Find the first available host whose API name satisfies `matches`.
    pub fn find(matches: impl Fn(&HostApiInfo) -> bool) -> Result<Self> {
        let id = cpal::available_hosts()
            .into_iter()
            .find(|id| matches(&HostApiInfo::new(id.name())))
            .ok_or_else(|| anyhow!("no matching host API compiled for this platform"))?;
        Self::new(id)
    }

    fn host(&self) -> Result<cpal::Host> {
        cpal::host_from_id(self.id).with_context(|| format!("{} host unavailable", self.id.name()))
    }

    fn find_device(&self, host: &cpal::Host, selector: &DeviceSelector) -> Result<cpal::Device> {
        match selector {
            DeviceSelector::Default => host
                .default_input_device()
                .context("no default input device available"),
            DeviceSelector::Index(index) => host
                .input_devices()
                .context("no input devices available")?
                .nth(*index)
                .ok_or_else(|| anyhow!("input device #{index} not found")),
            DeviceSelector::Name(name) => {
                let devices: Vec<cpal::Device> = host
                    .input_devices()
                    .context("no input devices available")?
                    .collect();
                let named = |pred: &dyn Fn(&str) -> bool| {
                    devices
                        .iter()
                        .find(|d| d.name().map(|n| pred(&n)).unwrap_or(false))
                        .cloned()
                };
                // ALSA exposes "sysdefault:CARD=..." style names; accept the
                // bare prefix when no exact name exists.
                let prefix = format!("{name}:");
                named(&|n| n == name)
                    .or_else(|| named(&|n| n.starts_with(&prefix)))
                    .ok_or_else(|| anyhow!("input device '{name}' not found"))
            }
        }
    }

    fn describe(&self, index: usize, device: &cpal::Device) -> Result<InputDeviceInfo> {
        let name = device.name().context("failed to read device name")?;
        let max_input_channels = device
            .supported_input_configs()
            .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
            .unwrap_or(0);
        let default_samplerate = device
            .default_input_config()
            .map(|c| c.sample_rate().0)
            .unwrap_or(0);
        Ok(InputDeviceInfo {
            index,
            name,
            hostapi: self.id.name().to_string(),
            max_input_channels,
            default_samplerate,
        })
    }

    fn index_of(&self, host: &cpal::Host, name: &str) -> usize {
        host.input_devices()
            .ok()
            .and_then(|mut devices| {
                devices.position(|d| d.name().map(|n| n == name).unwrap_or(false))
            })
            .unwrap_or(0)
    }
}

fn format_rank(format: SampleFormat) -> u8 {
    match format {
        SampleFormat::F32 => 0,
        SampleFormat::I16 => 1,
        SampleFormat::U16 => 2,
        _ => u8::MAX,
    }
}

/// Pick a supported config for `request`, preferring the requested channel
/// count, then the fewest channels, then f32 samples.
fn negotiate(device: &cpal::Device, request: &StreamRequest) -> Result<(StreamConfig, SampleFormat)> {
    let rate = SampleRate(request.samplerate);
    let ranges: Vec<SupportedStreamConfigRange> = device
        .supported_input_configs()
        .context("failed to query supported input configs")?
        .collect();
    let mut candidates: Vec<&SupportedStreamConfigRange> = ranges
        .iter()
        .filter(|r| r.min_sample_rate() <= rate && rate <= r.max_sample_rate())
        .filter(|r| format_rank(r.sample_format()) != u8::MAX)
        .collect();
    if candidates.is_empty() {
        bail!(
            "sample rate {} Hz not supported by this device",
            request.samplerate
        );
    }
    candidates.sort_by_key(|r| {
        (
            r.channels() != request.channels,
            r.channels(),
            format_rank(r.sample_format()),
        )
    });
    let best = candidates[0];
    if let SupportedBufferSize::Range { min, max } = best.buffer_size() {
        if !(*min..=*max).contains(&request.blocksize) {
            bail!(
                "buffer size {} outside supported range {min}..={max}",
                request.blocksize
            );
        }
    }
    let format = best.sample_format();
    let mut config: StreamConfig = best.clone().with_sample_rate(rate).config();
    config.buffer_size = BufferSize::Fixed(request.blocksize);
    Ok((config, format))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    blocksize: usize,
    callbacks: StreamCallbacks,
    convert: fn(T) -> f32,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample + Send + 'static,
{
    let channels = usize::from(config.channels.max(1));
    let mut assembler = BlockAssembler::new(blocksize);
    let data_callbacks = callbacks.clone();
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            assembler.push(data, channels, convert, |block| data_callbacks.block(block));
        },
        move |err: cpal::StreamError| callbacks.fault(err.to_string()),
        None,
    )?;
    Ok(stream)
}

struct CpalStream {
    stream: cpal::Stream,
}

impl InputStream for CpalStream {
    fn stop(&mut self) -> Result<()> {
        self.stream.pause().context("failed to pause audio stream")
    }
}

impl AudioHost for CpalHost {
    fn hostapi(&self) -> HostApiInfo {
        HostApiInfo::new(self.id.name())
    }

    fn input_devices(&self) -> Result<Vec<InputDeviceInfo>> {
        let host = self.host()?;
        let devices = host.input_devices().context("no input devices available")?;
        let mut infos = Vec::new();
        for (index, device) in devices.enumerate() {
            match self.describe(index, &device) {
                Ok(info) => infos.push(info),
                Err(err) => tracing::debug!(index, "skipping input device: {err:#}"),
            }
        }
        Ok(infos)
    }

    fn default_input_device(&self) -> Option<InputDeviceInfo> {
        let host = self.host().ok()?;
        let device = host.default_input_device()?;
        let name = device.name().ok()?;
        let index = self.index_of(&host, &name);
        self.describe(index, &device).ok()
    }

    fn device_info(&self, selector: &DeviceSelector) -> Result<InputDeviceInfo> {
        let host = self.host()?;
        let device = self.find_device(&host, selector)?;
        let index = match selector {
            DeviceSelector::Index(index) => *index,
            _ => self.index_of(&host, &device.name().unwrap_or_default()),
        };
        self.describe(index, &device)
    }

    fn check_input_settings(&self, request: &StreamRequest) -> Result<()> {
        if request.share == ShareMode::Exclusive {
            bail!("exclusive mode is not supported by the {} host", self.id.name());
        }
        let host = self.host()?;
        let device = self.find_device(&host, &request.device)?;
        negotiate(&device, request).map(|_| ())
    }

    fn open_input(
        &self,
        request: &StreamRequest,
        callbacks: StreamCallbacks,
    ) -> Result<Box<dyn InputStream>> {
        if request.share == ShareMode::Exclusive {
            bail!("exclusive mode is not supported by the {} host", self.id.name());
        }
        let host = self.host()?;
        let device = self.find_device(&host, &request.device)?;
        let (config, format) = negotiate(&device, request)?;
        let blocksize = request.blocksize as usize;
        tracing::debug!(
            %request,
            channels = config.channels,
            format = ?format,
            "building cpal input stream"
        );
        let stream = match format {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, blocksize, callbacks, |s| s)?,
            SampleFormat::I16 => {
                build_stream::<i16>(&device, &config, blocksize, callbacks, i16_to_f32)?
            }
            SampleFormat::U16 => {
                build_stream::<u16>(&device, &config, blocksize, callbacks, u16_to_f32)?
            }
            other => bail!("unsupported sample format: {other:?}"),
        };
        stream.play().context("failed to start audio stream")?;
        Ok(Box::new(CpalStream { stream }))
    }
}
