//! Host audio output: a cpal stream pulling from the machine's sample
//! queue. The queue is the only cross-thread audio state; on underrun the
//! callback repeats the last sample rather than clicking to zero.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use machine_atari_st::AudioQueue;

pub struct AudioOutput {
    _stream: cpal::Stream,
}

impl AudioOutput {
    pub fn new(queue: AudioQueue, sample_rate: u32) -> Result<Self, String> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| String::from("no default audio output device"))?;

        let supported = device
            .supported_output_configs()
            .map_err(|e| format!("failed to query output configs: {e}"))?
            .filter(|config| config.channels() == 1)
            .find(|config| {
                let min = config.min_sample_rate().0;
                let max = config.max_sample_rate().0;
                min <= sample_rate && sample_rate <= max
            })
            .ok_or_else(|| format!("no mono output config supports {sample_rate} Hz"))?;

        let sample_format = supported.sample_format();
        let config = supported
            .with_sample_rate(cpal::SampleRate(sample_rate))
            .config();

        let stream = match sample_format {
            cpal::SampleFormat::F32 => {
                let mut last = 0.0f32;
                device
                    .build_output_stream(
                        &config,
                        move |data: &mut [f32], _| queue.fill(data, &mut last),
                        |err| eprintln!("Audio stream error: {err}"),
                        None,
                    )
                    .map_err(|e| format!("failed to build f32 audio stream: {e}"))?
            }
            cpal::SampleFormat::I16 => {
                let mut last = 0.0f32;
                let mut scratch = Vec::new();
                device
                    .build_output_stream(
                        &config,
                        move |data: &mut [i16], _| {
                            scratch.resize(data.len(), 0.0);
                            queue.fill(&mut scratch, &mut last);
                            for (out, &sample) in data.iter_mut().zip(&scratch) {
                                *out = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
                            }
                        },
                        |err| eprintln!("Audio stream error: {err}"),
                        None,
                    )
                    .map_err(|e| format!("failed to build i16 audio stream: {e}"))?
            }
            other => return Err(format!("unsupported audio sample format: {other:?}")),
        };

        stream
            .play()
            .map_err(|e| format!("failed to start audio stream: {e}"))?;

        Ok(Self { _stream: stream })
    }
}
