//! Simulated hardware decoder
//!
//! Echoes every input packet back as one output buffer. The first output
//! poll after `start` reports a format change, like real codecs do. When a
//! surface is bound, rendered output is posted to it.

use crate::decoder::{
    DecoderFactory, HardwareDecoder, InputSlot, MediaType, OutputBuffer, OutputStatus,
    OutputSurface, PacketFlags, StreamFormat,
};
use crate::utils::error::{PipelineError, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const INPUT_SLOTS: usize = 4;

/// Factory with live-handle accounting and injectable failures
#[derive(Default)]
pub struct SimDecoderFactory {
    created: AtomicUsize,
    live: Arc<AtomicUsize>,
    fail_creates: AtomicUsize,
}

impl SimDecoderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoders created so far
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Acquire)
    }

    /// Decoders not yet destroyed
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Make the next `n` creations fail
    pub fn fail_next_creates(&self, n: usize) {
        self.fail_creates.store(n, Ordering::Release);
    }
}

impl DecoderFactory for SimDecoderFactory {
    fn create(&self, media_type: MediaType) -> Result<Box<dyn HardwareDecoder>> {
        let failing = self
            .fail_creates
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(PipelineError::decoder_error(format!(
                "simulated {} decoder creation failure",
                media_type
            )));
        }

        self.created.fetch_add(1, Ordering::AcqRel);
        self.live.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(SimDecoder::new(Arc::clone(&self.live))))
    }
}

/// Echoing decoder
pub struct SimDecoder {
    live: Arc<AtomicUsize>,
    format: Option<StreamFormat>,
    surface: Option<Arc<dyn OutputSurface>>,
    started: bool,
    format_reported: bool,
    free_inputs: VecDeque<usize>,
    outputs: VecDeque<(i64, usize, Vec<u8>, bool)>,
    in_flight: HashMap<usize, i64>,
    next_output: usize,
}

impl SimDecoder {
    fn new(live: Arc<AtomicUsize>) -> Self {
        Self {
            live,
            format: None,
            surface: None,
            started: false,
            format_reported: false,
            free_inputs: VecDeque::new(),
            outputs: VecDeque::new(),
            in_flight: HashMap::new(),
            next_output: 0,
        }
    }

    fn clear_buffers(&mut self) {
        self.outputs.clear();
        self.in_flight.clear();
        self.free_inputs = (0..INPUT_SLOTS).collect();
    }

    fn ensure_started(&self) -> Result<()> {
        if self.started {
            Ok(())
        } else {
            Err(PipelineError::decoder_error("simulated decoder is not started"))
        }
    }
}

impl Drop for SimDecoder {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

impl HardwareDecoder for SimDecoder {
    fn reset(&mut self) -> Result<()> {
        self.format = None;
        self.surface = None;
        self.started = false;
        self.format_reported = false;
        self.outputs.clear();
        self.in_flight.clear();
        self.free_inputs.clear();
        Ok(())
    }

    fn configure(&mut self, format: &StreamFormat, surface: Option<Arc<dyn OutputSurface>>) -> Result<()> {
        if self.started {
            return Err(PipelineError::decoder_error("configure while running"));
        }
        self.format = Some(format.clone());
        self.surface = surface;
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.format.is_none() {
            return Err(PipelineError::decoder_error("start before configure"));
        }
        self.started = true;
        self.format_reported = false;
        self.clear_buffers();
        Ok(())
    }

    fn dequeue_input(&mut self, _timeout: Duration) -> Result<Option<InputSlot>> {
        self.ensure_started()?;
        let capacity = self.format.as_ref().map_or(0, |f| f.max_input_size());
        Ok(self
            .free_inputs
            .pop_front()
            .map(|index| InputSlot { index, capacity }))
    }

    fn queue_input(&mut self, index: usize, data: &[u8], presentation_time_us: i64, flags: PacketFlags) -> Result<()> {
        self.ensure_started()?;
        if index >= INPUT_SLOTS || self.free_inputs.contains(&index) {
            return Err(PipelineError::decoder_error(format!("input slot {} not dequeued", index)));
        }
        self.free_inputs.push_back(index);

        if flags.is_end_of_stream() {
            self.outputs.push_back((presentation_time_us, 0, Vec::new(), true));
        } else if !data.is_empty() {
            let payload = if self.surface.is_some() { Vec::new() } else { data.to_vec() };
            self.outputs
                .push_back((presentation_time_us, data.len(), payload, false));
        }
        Ok(())
    }

    fn dequeue_output(&mut self, _timeout: Duration) -> Result<OutputStatus> {
        self.ensure_started()?;
        if !self.format_reported {
            self.format_reported = true;
            return Ok(OutputStatus::FormatChanged);
        }

        let Some((presentation_time_us, size, data, end_of_stream)) = self.outputs.pop_front() else {
            return Ok(OutputStatus::TryAgainLater);
        };

        let index = self.next_output;
        self.next_output = self.next_output.wrapping_add(1);
        self.in_flight.insert(index, presentation_time_us);

        Ok(OutputStatus::Buffer(OutputBuffer {
            index,
            presentation_time_us,
            size,
            data,
            end_of_stream,
        }))
    }

    fn release_output(&mut self, index: usize, render: bool) -> Result<()> {
        let presentation_time_us = self
            .in_flight
            .remove(&index)
            .ok_or_else(|| PipelineError::decoder_error(format!("output slot {} not dequeued", index)))?;

        if render {
            if let Some(surface) = &self.surface {
                surface.post_frame(presentation_time_us);
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.ensure_started()?;
        self.clear_buffers();
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.started = false;
        self.outputs.clear();
        self.in_flight.clear();
        self.free_inputs.clear();
        Ok(())
    }
}
