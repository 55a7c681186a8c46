pub mod checkpoint;
pub mod conv_gru;
pub mod loss;
pub mod ty_catcher;

use std::fmt;
use std::str::FromStr;

use burn::module::AutodiffModule;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::data::{FrameBatch, FrameGeometry};
use crate::error::{HarnessError, Result};

pub use conv_gru::{ConvGru, ConvGruConfig};
pub use ty_catcher::{TyCatcher, TyCatcherConfig};

/// How a model consumes a batch, resolved once at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputConvention {
    /// Observed frames only
    Frames,
    /// Frames plus storm-track features and a radar map
    WithAuxiliaries,
}

impl InputConvention {
    /// Split a batch into model input and targets
    pub fn assemble<B: Backend>(&self, batch: FrameBatch<B>) -> Result<(ModelInput<B>, Tensor<B, 4>)> {
        let FrameBatch {
            inputs,
            targets,
            ty_infos,
            radar_map,
        } = batch;

        let input = match self {
            InputConvention::Frames => ModelInput::Frames(inputs),
            InputConvention::WithAuxiliaries => ModelInput::WithAuxiliaries {
                encoder_inputs: inputs,
                ty_infos: ty_infos.ok_or(HarnessError::MissingBatchField("ty_infos"))?,
                radar_map: radar_map.ok_or(HarnessError::MissingBatchField("radar_map"))?,
            },
        };
        Ok((input, targets))
    }
}

/// Model input, tagged by calling convention
#[derive(Debug, Clone)]
pub enum ModelInput<B: Backend> {
    /// `[b, in_steps, c, h, w]`
    Frames(Tensor<B, 5>),
    WithAuxiliaries {
        encoder_inputs: Tensor<B, 5>,
        /// `[b, in_steps, info_dim]`
        ty_infos: Tensor<B, 3>,
        /// `[b, map_channels, h, w]`
        radar_map: Tensor<B, 4>,
    },
}

impl<B: Backend> ModelInput<B> {
    /// The observed frames, dropping any auxiliaries
    pub fn into_frames(self) -> Tensor<B, 5> {
        match self {
            ModelInput::Frames(inputs) => inputs,
            ModelInput::WithAuxiliaries { encoder_inputs, .. } => encoder_inputs,
        }
    }
}

/// Sequence forecaster: `[b, target_steps, h, w]` out
pub trait Forecaster<B: Backend>: Module<B> {
    fn convention(&self) -> InputConvention;

    fn forward(&self, input: ModelInput<B>) -> Tensor<B, 4>;
}

/// Work to run against whichever concrete model the registry builds
pub trait ModelJob<B: AutodiffBackend> {
    type Output;

    fn run<M>(self, model: M) -> Self::Output
    where
        M: AutodiffModule<B> + Forecaster<B> + 'static,
        M::InnerModule: Forecaster<B::InnerBackend>;
}

/// Registered architectures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ModelKind {
    ConvGru,
    TyCatcher,
}

impl ModelKind {
    pub const ALL: [ModelKind; 2] = [ModelKind::ConvGru, ModelKind::TyCatcher];

    /// Canonical tag used in logs and checkpoint metadata
    pub fn tag(&self) -> &'static str {
        match self {
            ModelKind::ConvGru => "CONVGRU",
            ModelKind::TyCatcher => "MYMODEL",
        }
    }

    pub fn convention(&self) -> InputConvention {
        match self {
            ModelKind::ConvGru => InputConvention::Frames,
            ModelKind::TyCatcher => InputConvention::WithAuxiliaries,
        }
    }

    /// Reject geometries the architecture cannot process
    pub fn check(&self, geometry: &FrameGeometry) -> Result<()> {
        ConvGruConfig::from_geometry(geometry).map(|_| ())
    }

    /// Construct the model on `device` and hand it to `job`
    pub fn build<B, J>(&self, geometry: &FrameGeometry, device: &B::Device, job: J) -> Result<J::Output>
    where
        B: AutodiffBackend,
        J: ModelJob<B>,
    {
        info!("Model: {}", self.tag());
        match self {
            ModelKind::ConvGru => {
                let model: ConvGru<B> = ConvGruConfig::from_geometry(geometry)?.init(device);
                Ok(job.run(model))
            }
            ModelKind::TyCatcher => {
                let model: TyCatcher<B> = TyCatcherConfig::from_geometry(geometry)?.init(device);
                Ok(job.run(model))
            }
        }
    }
}

impl FromStr for ModelKind {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "CONVGRU" => Ok(ModelKind::ConvGru),
            "MYMODEL" | "TYCATCHER" => Ok(ModelKind::TyCatcher),
            _ => Err(HarnessError::UnknownModelKind(s.to_string())),
        }
    }
}

impl TryFrom<String> for ModelKind {
    type Error = HarnessError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<ModelKind> for String {
    fn from(kind: ModelKind) -> Self {
        kind.tag().to_string()
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{synthetic, FrameBatcher, FrameSample};
    use burn::backend::{Autodiff, NdArray};
    use burn::data::dataloader::batcher::Batcher;

    type TestBackend = NdArray<f32>;
    type TestAutodiff = Autodiff<TestBackend>;

    struct Describe;

    impl ModelJob<TestAutodiff> for Describe {
        type Output = (InputConvention, usize);

        fn run<M>(self, model: M) -> Self::Output
        where
            M: AutodiffModule<TestAutodiff> + Forecaster<TestAutodiff> + 'static,
            M::InnerModule: Forecaster<TestBackend>,
        {
            (model.convention(), model.num_params())
        }
    }

    #[test]
    fn test_parse_kinds() {
        assert_eq!("convgru".parse::<ModelKind>().unwrap(), ModelKind::ConvGru);
        assert_eq!("MyModel".parse::<ModelKind>().unwrap(), ModelKind::TyCatcher);
        assert_eq!("TYCATCHER".parse::<ModelKind>().unwrap(), ModelKind::TyCatcher);

        match "NOPE".parse::<ModelKind>() {
            Err(HarnessError::UnknownModelKind(name)) => assert_eq!(name, "NOPE"),
            other => panic!("Expected UnknownModelKind, got {other:?}"),
        }
    }

    #[test]
    fn test_serde_round_trip_uses_tag() {
        let json = serde_json::to_string(&ModelKind::TyCatcher).unwrap();
        assert_eq!(json, "\"MYMODEL\"");
        assert!(serde_json::from_str::<ModelKind>("\"NOPE\"").is_err());
    }

    #[test]
    fn test_build_resolves_convention() {
        let device = Default::default();
        let g = FrameGeometry::tiny();
        for kind in ModelKind::ALL {
            let (convention, params) = kind.build::<TestAutodiff, _>(&g, &device, Describe).unwrap();
            assert_eq!(convention, kind.convention());
            assert!(params > 0);
        }
    }

    #[test]
    fn test_assemble_requires_auxiliaries() {
        let g = FrameGeometry::tiny();
        let batcher = FrameBatcher::<TestBackend>::new(Default::default(), g);
        let mut samples = synthetic::generate(&g, &Default::default(), 2, 1);
        let batch = batcher.batch(samples.clone());

        let (input, targets) = InputConvention::WithAuxiliaries.assemble(batch.clone()).unwrap();
        assert!(matches!(input, ModelInput::WithAuxiliaries { .. }));
        assert_eq!(targets.dims(), [2, g.target_steps, g.height, g.width]);

        let (input, _) = InputConvention::Frames.assemble(batch).unwrap();
        assert!(matches!(input, ModelInput::Frames(_)));

        samples.iter_mut().for_each(|s: &mut FrameSample| {
            s.ty_infos = None;
            s.radar_map = None;
        });
        let bare = batcher.batch(samples);
        assert!(matches!(
            InputConvention::WithAuxiliaries.assemble(bare),
            Err(HarnessError::MissingBatchField("ty_infos"))
        ));
    }
}
