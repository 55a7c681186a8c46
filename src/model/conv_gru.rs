//! Convolutional GRU encoder-forecaster.
//!
//! The encoder walks the observed frames through a stack of levels, each a
//! strided convolution followed by a ConvGRU cell. The forecaster starts from
//! the encoder's final states and unrolls the stack in reverse, top level
//! first, upsampling with transposed convolutions until a 1x1 head emits one
//! frame per target step.

use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::PaddingConfig2d;
use burn::prelude::*;
use burn::tensor::activation::{relu, sigmoid, tanh};

use crate::data::FrameGeometry;
use crate::error::{HarnessError, Result as HarnessResult};
use crate::model::{Forecaster, InputConvention, ModelInput};

/// ConvGRU cell configuration
#[derive(Config, Debug)]
pub struct ConvGruCellConfig {
    pub input_channels: usize,
    pub hidden_channels: usize,
    #[config(default = "3")]
    pub kernel_size: usize,
}

impl ConvGruCellConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvGruCell<B> {
        let pad = self.kernel_size / 2;
        let joint = self.input_channels + self.hidden_channels;
        let conv = |out: usize| {
            Conv2dConfig::new([joint, out], [self.kernel_size, self.kernel_size])
                .with_padding(PaddingConfig2d::Explicit(pad, pad))
                .init(device)
        };

        ConvGruCell {
            gates: conv(2 * self.hidden_channels),
            candidate: conv(self.hidden_channels),
            hidden_channels: self.hidden_channels,
        }
    }
}

/// GRU cell whose gates are convolutions over `[input, hidden]`
#[derive(Module, Debug)]
pub struct ConvGruCell<B: Backend> {
    /// Reset and update gates, stacked on the channel axis
    gates: Conv2d<B>,
    candidate: Conv2d<B>,
    hidden_channels: usize,
}

impl<B: Backend> ConvGruCell<B> {
    /// One recurrent step: `x` is `[b, in, h, w]`, `state` is `[b, hidden, h, w]`
    pub fn forward(&self, x: Tensor<B, 4>, state: Tensor<B, 4>) -> Tensor<B, 4> {
        let gates = sigmoid(
            self.gates
                .forward(Tensor::cat(vec![x.clone(), state.clone()], 1)),
        );
        let [b, _, h, w] = gates.dims();
        let c = self.hidden_channels;
        let reset = gates.clone().slice([0..b, 0..c, 0..h, 0..w]);
        let update = gates.slice([0..b, c..2 * c, 0..h, 0..w]);

        let candidate = tanh(
            self.candidate
                .forward(Tensor::cat(vec![x, reset * state.clone()], 1)),
        );

        state.clone() + update * (candidate - state)
    }

    pub fn hidden_channels(&self) -> usize {
        self.hidden_channels
    }
}

/// Hyperparameters of the ConvGRU encoder-forecaster
#[derive(Config, Debug)]
pub struct ConvGruConfig {
    /// Channels of each encoder input frame
    pub input_channels: usize,
    /// Frames produced per forward pass
    pub target_steps: usize,
    /// Channels of the lowest level; each level above doubles it
    #[config(default = "8")]
    pub base_channels: usize,
    #[config(default = "2")]
    pub levels: usize,
    /// Down/upsampling factor between levels
    #[config(default = "2")]
    pub scale: usize,
    #[config(default = "3")]
    pub kernel_size: usize,
}

impl ConvGruConfig {
    /// Resolve a configuration for frames of the given geometry
    pub fn from_geometry(geometry: &FrameGeometry) -> HarnessResult<Self> {
        let config = Self::new(geometry.input_channels, geometry.target_steps);
        config.check(geometry)?;
        Ok(config)
    }

    /// Channels at level `level`
    pub fn level_channels(&self, level: usize) -> usize {
        self.base_channels << level
    }

    pub fn top_channels(&self) -> usize {
        self.level_channels(self.levels.saturating_sub(1))
    }

    /// Frames must downsample evenly through every level
    pub fn check(&self, geometry: &FrameGeometry) -> HarnessResult<()> {
        if self.levels == 0 || self.scale == 0 || self.base_channels == 0 {
            return Err(HarnessError::InvalidConfig(
                "levels, scale and base_channels must be positive".to_string(),
            ));
        }
        let factor = self.scale.pow(self.levels as u32);
        if geometry.height % factor != 0 || geometry.width % factor != 0 {
            return Err(HarnessError::InvalidConfig(format!(
                "frame {}x{} is not divisible by {} ({} levels of x{})",
                geometry.height, geometry.width, factor, self.levels, self.scale
            )));
        }
        Ok(())
    }

    pub fn init_core<B: Backend>(&self, device: &B::Device) -> EncoderForecaster<B> {
        let f = self.scale;
        let mut downsample = Vec::with_capacity(self.levels);
        let mut encoder_cells = Vec::with_capacity(self.levels);
        let mut forecaster_cells = Vec::with_capacity(self.levels);
        let mut upsample = Vec::with_capacity(self.levels);

        for level in 0..self.levels {
            let channels = self.level_channels(level);
            let below = if level == 0 {
                self.input_channels
            } else {
                self.level_channels(level - 1)
            };
            downsample.push(
                Conv2dConfig::new([below, channels], [f, f])
                    .with_stride([f, f])
                    .init(device),
            );
            encoder_cells.push(
                ConvGruCellConfig::new(channels, channels)
                    .with_kernel_size(self.kernel_size)
                    .init(device),
            );

            // The lowest level upsamples into the output head's base channels
            let up_out = if level == 0 {
                self.base_channels
            } else {
                self.level_channels(level - 1)
            };
            forecaster_cells.push(
                ConvGruCellConfig::new(channels, channels)
                    .with_kernel_size(self.kernel_size)
                    .init(device),
            );
            upsample.push(
                ConvTranspose2dConfig::new([channels, up_out], [f, f])
                    .with_stride([f, f])
                    .init(device),
            );
        }

        EncoderForecaster {
            downsample,
            encoder_cells,
            forecaster_cells,
            upsample,
            output: Conv2dConfig::new([self.base_channels, 1], [1, 1]).init(device),
            target_steps: self.target_steps,
        }
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> ConvGru<B> {
        ConvGru {
            core: self.init_core(device),
        }
    }
}

/// Multi-level encoder-forecaster shared by the registered architectures
#[derive(Module, Debug)]
pub struct EncoderForecaster<B: Backend> {
    downsample: Vec<Conv2d<B>>,
    encoder_cells: Vec<ConvGruCell<B>>,
    forecaster_cells: Vec<ConvGruCell<B>>,
    upsample: Vec<ConvTranspose2d<B>>,
    output: Conv2d<B>,
    target_steps: usize,
}

impl<B: Backend> EncoderForecaster<B> {
    /// Encode `[b, steps, c, h, w]` into one state per level, lowest first
    pub fn encode(&self, inputs: Tensor<B, 5>) -> Vec<Tensor<B, 4>> {
        let [b, steps, c, h, w] = inputs.dims();
        let mut states: Vec<Option<Tensor<B, 4>>> = vec![None; self.encoder_cells.len()];

        for t in 0..steps {
            let mut x = inputs
                .clone()
                .slice([0..b, t..t + 1, 0..c, 0..h, 0..w])
                .reshape([b, c, h, w]);

            for (level, (down, cell)) in self
                .downsample
                .iter()
                .zip(self.encoder_cells.iter())
                .enumerate()
            {
                x = relu(down.forward(x));
                let state = states[level]
                    .take()
                    .unwrap_or_else(|| x.zeros_like());
                let next = cell.forward(x, state);
                x = next.clone();
                states[level] = Some(next);
            }
        }

        states.into_iter().flatten().collect()
    }

    /// Unroll the forecaster from encoder states; `top_input` is a per-channel
    /// vector `[b, top_channels]` broadcast over the top level at every step
    pub fn forecast(
        &self,
        mut states: Vec<Tensor<B, 4>>,
        top_input: Option<Tensor<B, 2>>,
    ) -> Tensor<B, 4> {
        let top = states.len() - 1;
        let [b, c_top, _, _] = states[top].dims();
        let top_x = match top_input {
            Some(v) => states[top].zeros_like() + v.reshape([b, c_top, 1, 1]),
            None => states[top].zeros_like(),
        };

        let mut frames = Vec::with_capacity(self.target_steps);
        for _ in 0..self.target_steps {
            states[top] = self.forecaster_cells[top].forward(top_x.clone(), states[top].clone());
            let mut x = self.upsample[top].forward(states[top].clone());

            for level in (0..top).rev() {
                states[level] = self.forecaster_cells[level].forward(x, states[level].clone());
                x = self.upsample[level].forward(states[level].clone());
            }

            frames.push(self.output.forward(relu(x)));
        }

        Tensor::cat(frames, 1)
    }

    pub fn forward(&self, inputs: Tensor<B, 5>, top_input: Option<Tensor<B, 2>>) -> Tensor<B, 4> {
        let states = self.encode(inputs);
        self.forecast(states, top_input)
    }
}

/// Frames-only ConvGRU forecaster
#[derive(Module, Debug)]
pub struct ConvGru<B: Backend> {
    core: EncoderForecaster<B>,
}

impl<B: Backend> Forecaster<B> for ConvGru<B> {
    fn convention(&self) -> InputConvention {
        InputConvention::Frames
    }

    fn forward(&self, input: ModelInput<B>) -> Tensor<B, 4> {
        self.core.forward(input.into_frames(), None)
    }
}
